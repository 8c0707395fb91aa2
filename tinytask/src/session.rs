//! The session controller: the single Idle/Recording/Playing state machine that
//! gates the recorder and the player against each other.

use crate::host::{InputSink, InputSource, Subscription};
use crate::player::{cancellation, CancelTrigger, InterruptReason, PlaybackReport, PlaybackStatus};
use crate::recorder::ActiveRecording;
use crate::store::{self, SaveOutcome};
use crate::{
    EventSequence, Player, PlayerConfig, Recorder, RecorderConfig, Result, TinytaskError,
};
use futures::FutureExt;
use std::{
    fmt,
    panic::AssertUnwindSafe,
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tracing::{debug, info, instrument, warn};

/// What the session is currently doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Recording,
    Playing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => f.write_str("idle"),
            SessionState::Recording => f.write_str("recording"),
            SessionState::Playing => f.write_str("playing"),
        }
    }
}

/// Configuration for a session
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub recorder: RecorderConfig,
    pub player: PlayerConfig,
}

/// Result of asking a playback to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopRequest {
    /// The running playback was flagged and will stop shortly
    Requested,
    /// Nothing was playing
    NotActive,
}

enum Activity {
    Idle,
    Recording {
        recording: ActiveRecording,
        generation: u64,
    },
    Playing {
        trigger: CancelTrigger,
        _interrupts: Option<Subscription>,
    },
}

struct Inner {
    activity: Mutex<Activity>,
    state_tx: watch::Sender<SessionState>,
    status_tx: broadcast::Sender<String>,
    source: Arc<dyn InputSource>,
    recorder: Recorder,
    player: Player,
    generation: AtomicU64,
    finished_recording: Mutex<Option<EventSequence>>,
}

/// Entry point for front ends: start/stop recording, load/save, play/stop playback.
///
/// Cloning is cheap; all clones drive the same state machine.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    pub fn new(
        source: Arc<dyn InputSource>,
        sink: Arc<dyn InputSink>,
        config: SessionConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (status_tx, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                activity: Mutex::new(Activity::Idle),
                state_tx,
                status_tx,
                recorder: Recorder::new(Arc::clone(&source), config.recorder),
                player: Player::new(sink, config.player),
                source,
                generation: AtomicU64::new(0),
                finished_recording: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state_tx.borrow()
    }

    /// Observe state transitions
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    /// Receive human-readable status messages
    pub fn subscribe_status(&self) -> broadcast::Receiver<String> {
        self.inner.status_tx.subscribe()
    }

    /// Get a stream of status messages
    pub fn status_stream(&self) -> impl Stream<Item = String> + Send + Unpin + 'static {
        let mut rx = self.inner.status_tx.subscribe();
        Box::pin(async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(message) => yield message,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        debug!(missed, "Status stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Begin capturing input into a new, empty sequence
    #[instrument(skip(self))]
    pub fn start_recording(&self) -> Result<()> {
        let mut activity = self.activity();
        self.ensure_idle(&activity, "start recording")?;

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let weak = Arc::downgrade(&self.inner);
        let recording = self.inner.recorder.start(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                Session { inner }.stop_from_key(generation);
            }
        }))?;

        *activity = Activity::Recording {
            recording,
            generation,
        };
        self.set_state(SessionState::Recording);
        let hint = match self.inner.recorder.config().stop_key {
            Some(key) => format!(" Release {} to stop.", key),
            None => String::new(),
        };
        self.notify(format!("Recording...{}", hint));
        Ok(())
    }

    /// Stop capturing and hand over the frozen sequence.
    ///
    /// Blocks until the host has delivered its last notification.
    #[instrument(skip(self))]
    pub fn stop_recording(&self) -> Result<EventSequence> {
        let mut activity = self.activity();
        let recording = self.take_recording(&mut activity, None)?;
        let sequence = recording.finish();
        self.end_recording(sequence.len());
        Ok(sequence)
    }

    /// Take the sequence of a recording that was ended by the stop key
    pub fn take_finished_recording(&self) -> Option<EventSequence> {
        self.inner
            .finished_recording
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn stop_from_key(&self, generation: u64) {
        let mut activity = self.activity();
        match self.take_recording(&mut activity, Some(generation)) {
            Ok(recording) => {
                let sequence = recording.finish();
                let events = sequence.len();
                // Parked before the state flips so Idle watchers always find it.
                *self
                    .inner
                    .finished_recording
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(sequence);
                self.end_recording(events);
            }
            Err(e) => debug!("Stop key ignored: {}", e),
        }
    }

    /// Detach the active recording, leaving the activity Idle.
    ///
    /// With `only`, a recording from another generation is left in place.
    fn take_recording(&self, activity: &mut Activity, only: Option<u64>) -> Result<ActiveRecording> {
        match std::mem::replace(activity, Activity::Idle) {
            Activity::Recording {
                recording,
                generation,
            } if only.map_or(true, |g| g == generation) => Ok(recording),
            other => {
                *activity = other;
                let message = "Not currently recording.";
                if only.is_none() {
                    self.notify(message.to_string());
                }
                Err(TinytaskError::Conflict(message.to_string()))
            }
        }
    }

    fn end_recording(&self, events: usize) {
        self.set_state(SessionState::Idle);
        self.notify(format!("Stopped recording ({} events).", events));
    }

    /// Start replaying `sequence` in the background and return immediately.
    ///
    /// Must be called from within a tokio runtime.
    #[instrument(skip(self, sequence), fields(events = sequence.len()))]
    pub fn play(&self, sequence: EventSequence) -> Result<PlaybackHandle> {
        let mut activity = self.activity();
        self.ensure_idle(&activity, "start playback")?;
        if sequence.is_empty() {
            let message = "No events loaded to play.";
            self.notify(message.to_string());
            return Err(TinytaskError::Conflict(message.to_string()));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TinytaskError::Runtime(e.to_string()))?;

        let (trigger, mut token) = cancellation();
        let interrupts = match self
            .inner
            .player
            .watch_interrupts(self.inner.source.as_ref(), trigger.clone())
        {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                warn!("Stop key and failsafe unavailable for this playback: {}", e);
                None
            }
        };

        *activity = Activity::Playing {
            trigger,
            _interrupts: interrupts,
        };
        self.set_state(SessionState::Playing);
        let hint = match self.inner.player.config().stop_key {
            Some(key) => format!(" Release {} to stop.", key),
            None => String::new(),
        };
        self.notify(format!("Playing {} events...{}", sequence.len(), hint));
        drop(activity);

        let session = self.clone();
        let join = runtime.spawn(async move {
            let run = session.inner.player.run(&sequence, &mut token);
            let report = AssertUnwindSafe(run)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| PlaybackReport {
                    status: PlaybackStatus::Failed("playback task panicked".to_string()),
                    played: 0,
                    skipped: Vec::new(),
                });
            session.finish_playback(&report);
            report
        });

        Ok(PlaybackHandle { join })
    }

    /// Ask the running playback to stop. Does not wait for it.
    pub fn stop_playback(&self) -> StopRequest {
        let activity = self.activity();
        match &*activity {
            Activity::Playing { trigger, .. } => {
                trigger.cancel(InterruptReason::Stopped);
                self.notify("Playback stop requested.".to_string());
                StopRequest::Requested
            }
            _ => {
                self.notify("No playback is currently active.".to_string());
                StopRequest::NotActive
            }
        }
    }

    fn finish_playback(&self, report: &PlaybackReport) {
        let mut activity = self.activity();
        *activity = Activity::Idle;
        self.set_state(SessionState::Idle);
        self.notify(report.to_string());
    }

    /// Load a sequence from disk
    pub fn load_sequence<P: AsRef<Path>>(&self, path: P) -> Result<EventSequence> {
        let path = path.as_ref();
        match store::load(path) {
            Ok(sequence) => {
                self.notify(format!(
                    "Loaded {} events from '{}'.",
                    sequence.len(),
                    path.display()
                ));
                Ok(sequence)
            }
            Err(e) => {
                self.notify(format!("Error loading '{}': {}", path.display(), e));
                Err(e)
            }
        }
    }

    /// Save a sequence to disk; empty sequences are reported, not written
    pub fn save_sequence<P: AsRef<Path>>(
        &self,
        sequence: &EventSequence,
        path: P,
    ) -> Result<SaveOutcome> {
        let path = path.as_ref();
        match store::save(sequence, path) {
            Ok(outcome) => {
                match &outcome {
                    SaveOutcome::Saved { path, events } => {
                        self.notify(format!("Saved {} events to '{}'.", events, path.display()))
                    }
                    SaveOutcome::NothingToSave => self.notify("No events to save.".to_string()),
                }
                Ok(outcome)
            }
            Err(e) => {
                self.notify(format!("Error saving '{}': {}", path.display(), e));
                Err(e)
            }
        }
    }

    fn activity(&self) -> MutexGuard<'_, Activity> {
        self.inner
            .activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_idle(&self, activity: &Activity, action: &str) -> Result<()> {
        let busy = match activity {
            Activity::Idle => return Ok(()),
            Activity::Recording { .. } => SessionState::Recording,
            Activity::Playing { .. } => SessionState::Playing,
        };
        let message = format!("Cannot {} while {}.", action, busy);
        self.notify(message.clone());
        Err(TinytaskError::Conflict(message))
    }

    fn set_state(&self, state: SessionState) {
        debug!(%state, "Session state changed");
        self.inner.state_tx.send_replace(state);
    }

    fn notify(&self, message: String) {
        info!("Status: {}", message);
        // No receivers is fine; nobody is listening.
        let _ = self.inner.status_tx.send(message);
    }
}

/// A playback running in the background
#[derive(Debug)]
pub struct PlaybackHandle {
    join: JoinHandle<PlaybackReport>,
}

impl PlaybackHandle {
    /// Wait for the playback to end and get its report
    pub async fn wait(self) -> PlaybackReport {
        match self.join.await {
            Ok(report) => report,
            Err(e) => PlaybackReport {
                status: PlaybackStatus::Failed(format!("playback task ended abnormally: {}", e)),
                played: 0,
                skipped: Vec::new(),
            },
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_display() {
        assert_eq!(SessionState::Idle.to_string(), "idle");
        assert_eq!(SessionState::Recording.to_string(), "recording");
        assert_eq!(SessionState::Playing.to_string(), "playing");
    }
}
