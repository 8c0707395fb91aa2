use crate::host::{InputSink, InputSource, RawInput, Subscription};
use crate::{Event, EventSequence, KeySymbol, NamedKey, Position, Result, TinytaskError};
use std::{fmt, sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Screen region that aborts playback when the pointer is driven into it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailsafeZone {
    pub x: i32,
    pub y: i32,
    /// How far from (`x`, `y`) on either axis still counts as inside
    pub tolerance: i32,
}

impl Default for FailsafeZone {
    /// The top-left screen corner
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            tolerance: 0,
        }
    }
}

impl FailsafeZone {
    pub fn contains(&self, position: Position) -> bool {
        (position.x - self.x).abs() <= self.tolerance && (position.y - self.y).abs() <= self.tolerance
    }
}

/// Configuration for the player
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Pointer region that interrupts playback (`None` disables the failsafe)
    pub failsafe: Option<FailsafeZone>,

    /// Releasing this key interrupts playback (`None` disables the hotkey)
    pub stop_key: Option<KeySymbol>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            failsafe: Some(FailsafeZone::default()),
            stop_key: Some(KeySymbol::Named(NamedKey::F9)),
        }
    }
}

/// Why a playback stopped before the end of its sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptReason {
    /// An explicit stop request
    Stopped,
    /// The playback stop key was released
    StopKey,
    /// The pointer reached the failsafe zone
    Failsafe,
}

impl fmt::Display for InterruptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterruptReason::Stopped => f.write_str("stop requested"),
            InterruptReason::StopKey => f.write_str("stop key pressed"),
            InterruptReason::Failsafe => f.write_str("failsafe triggered"),
        }
    }
}

/// Terminal status of a playback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackStatus {
    Completed,
    Interrupted(InterruptReason),
    Failed(String),
}

/// A key action that was skipped because the host could not express the key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedAction {
    /// Position of the event in the sequence
    pub index: usize,
    pub key: KeySymbol,
}

/// Outcome of one playback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackReport {
    pub status: PlaybackStatus,
    /// Number of actions synthesized
    pub played: usize,
    pub skipped: Vec<SkippedAction>,
}

impl fmt::Display for PlaybackReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            PlaybackStatus::Completed => write!(f, "Playback finished ({} actions)", self.played)?,
            PlaybackStatus::Interrupted(reason) => write!(
                f,
                "Playback interrupted: {} ({} actions)",
                reason, self.played
            )?,
            PlaybackStatus::Failed(reason) => write!(f, "Playback failed: {}", reason)?,
        }
        if !self.skipped.is_empty() {
            write!(f, ", {} unsupported key actions skipped", self.skipped.len())?;
        }
        Ok(())
    }
}

/// Create a linked cancellation trigger and token
pub fn cancellation() -> (CancelTrigger, CancelToken) {
    let (tx, rx) = watch::channel(None);
    (CancelTrigger { tx: Arc::new(tx) }, CancelToken { rx })
}

/// Requests cancellation of a playback; cheap to clone
#[derive(Clone)]
pub struct CancelTrigger {
    tx: Arc<watch::Sender<Option<InterruptReason>>>,
}

impl CancelTrigger {
    /// Set the flag. Only the first reason sticks; returns false if already set.
    pub fn cancel(&self, reason: InterruptReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        })
    }
}

/// Observes a cancellation flag set by a [`CancelTrigger`]
pub struct CancelToken {
    rx: watch::Receiver<Option<InterruptReason>>,
}

impl CancelToken {
    pub fn reason(&self) -> Option<InterruptReason> {
        *self.rx.borrow()
    }

    /// Resolves once the flag is set; never resolves if every trigger is gone
    pub async fn cancelled(&mut self) {
        loop {
            if self.reason().is_some() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Replays an [`EventSequence`] through an [`InputSink`]
pub struct Player {
    sink: Arc<dyn InputSink>,
    config: PlayerConfig,
}

impl Player {
    pub fn new(sink: Arc<dyn InputSink>, config: PlayerConfig) -> Self {
        Self { sink, config }
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Watch live input for the stop key and the failsafe zone while playing.
    ///
    /// Either one pulls `trigger`. Dropping the subscription ends the watch.
    pub fn watch_interrupts(
        &self,
        source: &dyn InputSource,
        trigger: CancelTrigger,
    ) -> Result<Subscription> {
        let stop_key = self.config.stop_key;
        let failsafe = self.config.failsafe;
        source.subscribe(Box::new(move |raw| match raw {
            RawInput::KeyUp(key) if Some(key) == stop_key => {
                if trigger.cancel(InterruptReason::StopKey) {
                    info!(%key, "Stop key released, stopping playback");
                }
            }
            RawInput::Move { position } if failsafe.is_some_and(|zone| zone.contains(position)) => {
                if trigger.cancel(InterruptReason::Failsafe) {
                    warn!(x = position.x, y = position.y, "Failsafe triggered, stopping playback");
                }
            }
            _ => {}
        }))
    }

    /// Replay `sequence` with its recorded pacing until it ends, fails, or `cancel` is set.
    ///
    /// The flag is checked before every event and after every wait, so no action
    /// is synthesized once it is set.
    pub async fn run(&self, sequence: &EventSequence, cancel: &mut CancelToken) -> PlaybackReport {
        info!(
            events = sequence.len(),
            duration_ms = sequence.duration().as_millis() as u64,
            "Playback started"
        );

        let mut last_event_time = Duration::ZERO;
        let mut played = 0;
        let mut skipped = Vec::new();

        for (index, event) in sequence.iter().enumerate() {
            if let Some(reason) = cancel.reason() {
                return interrupted(reason, played, skipped);
            }

            let wait = event.time().saturating_sub(last_event_time);
            if !wait.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = cancel.cancelled() => {}
                }
                if let Some(reason) = cancel.reason() {
                    return interrupted(reason, played, skipped);
                }
            }

            match self.perform(event) {
                Ok(()) => played += 1,
                Err(TinytaskError::UnsupportedKey(key)) => {
                    warn!(index, %key, "Skipping key the host cannot synthesize");
                    skipped.push(SkippedAction { index, key });
                }
                Err(e) => {
                    error!(index, "Playback aborted: {}", e);
                    return PlaybackReport {
                        status: PlaybackStatus::Failed(e.to_string()),
                        played,
                        skipped,
                    };
                }
            }
            last_event_time = event.time();
        }

        info!(played, skipped = skipped.len(), "Playback completed");
        PlaybackReport {
            status: PlaybackStatus::Completed,
            played,
            skipped,
        }
    }

    fn perform(&self, event: &Event) -> Result<()> {
        match *event {
            Event::PointerClick {
                x,
                y,
                button,
                pressed,
                ..
            } => {
                let position = Position::new(x, y);
                if pressed {
                    debug!(x, y, ?button, "[PLAY] Mouse down");
                    self.sink.button_down(position, button)
                } else {
                    debug!(x, y, ?button, "[PLAY] Mouse up");
                    self.sink.button_up(position, button)
                }
            }
            Event::PointerMove { x, y, .. } => self.sink.move_pointer(Position::new(x, y)),
            Event::PointerScroll { x, y, dx, dy, .. } => {
                debug!(x, y, dx, dy, "[PLAY] Scroll");
                self.sink.scroll(Position::new(x, y), dx, dy)
            }
            Event::KeyDown { key, .. } => {
                debug!(%key, "[PLAY] Key down");
                self.sink.key_down(key)
            }
            Event::KeyUp { key, .. } => {
                debug!(%key, "[PLAY] Key up");
                self.sink.key_up(key)
            }
        }
    }
}

fn interrupted(reason: InterruptReason, played: usize, skipped: Vec<SkippedAction>) -> PlaybackReport {
    info!(%reason, played, "Playback interrupted");
    PlaybackReport {
        status: PlaybackStatus::Interrupted(reason),
        played,
        skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::InputHub;

    #[test]
    fn test_failsafe_zone() {
        let corner = FailsafeZone::default();
        assert!(corner.contains(Position::new(0, 0)));
        assert!(!corner.contains(Position::new(1, 0)));

        let wide = FailsafeZone { x: 1919, y: 0, tolerance: 2 };
        assert!(wide.contains(Position::new(1921, 2)));
        assert!(!wide.contains(Position::new(1916, 0)));
    }

    #[test]
    fn test_player_config_default() {
        let config = PlayerConfig::default();
        assert_eq!(config.failsafe, Some(FailsafeZone::default()));
        assert_eq!(config.stop_key, Some(KeySymbol::Named(NamedKey::F9)));
    }

    #[test]
    fn test_first_cancel_reason_sticks() {
        let (trigger, token) = cancellation();
        assert_eq!(token.reason(), None);
        assert!(trigger.cancel(InterruptReason::Failsafe));
        assert!(!trigger.clone().cancel(InterruptReason::Stopped));
        assert_eq!(token.reason(), Some(InterruptReason::Failsafe));
    }

    #[test]
    fn test_report_display() {
        let report = PlaybackReport {
            status: PlaybackStatus::Interrupted(InterruptReason::StopKey),
            played: 4,
            skipped: vec![SkippedAction { index: 2, key: KeySymbol::Char('é') }],
        };
        assert_eq!(
            report.to_string(),
            "Playback interrupted: stop key pressed (4 actions), 1 unsupported key actions skipped"
        );
    }

    struct NullSink;

    impl InputSink for NullSink {
        fn move_pointer(&self, _: Position) -> Result<()> {
            Ok(())
        }
        fn button_down(&self, _: Position, _: crate::MouseButton) -> Result<()> {
            Ok(())
        }
        fn button_up(&self, _: Position, _: crate::MouseButton) -> Result<()> {
            Ok(())
        }
        fn scroll(&self, _: Position, _: i32, _: i32) -> Result<()> {
            Ok(())
        }
        fn key_down(&self, _: KeySymbol) -> Result<()> {
            Ok(())
        }
        fn key_up(&self, _: KeySymbol) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_interrupt_watch() {
        let hub = InputHub::new();
        let player = Player::new(Arc::new(NullSink), PlayerConfig::default());

        let (trigger, token) = cancellation();
        let watch = player.watch_interrupts(&hub, trigger).unwrap();
        hub.dispatch(RawInput::Move { position: Position::new(5, 5) });
        hub.dispatch(RawInput::KeyUp(KeySymbol::Char('x')));
        assert_eq!(token.reason(), None);
        hub.dispatch(RawInput::Move { position: Position::new(0, 0) });
        assert_eq!(token.reason(), Some(InterruptReason::Failsafe));
        drop(watch);

        let (trigger, token) = cancellation();
        let _watch = player.watch_interrupts(&hub, trigger).unwrap();
        hub.dispatch(RawInput::KeyUp(KeySymbol::Named(NamedKey::F9)));
        assert_eq!(token.reason(), Some(InterruptReason::StopKey));
    }
}
