use crate::host::{InputSource, RawInput, Subscription};
use crate::{Event, EventSequence, KeySymbol, NamedKey, Position, Result};
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};
use tracing::{debug, error, info, trace};

/// Configuration for the recorder
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// A pointer move is kept only if it differs from the previous move by more
    /// than this many pixels on either axis
    pub move_threshold: i32,

    /// Releasing this key ends the recording (`None` disables the hook)
    pub stop_key: Option<KeySymbol>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            move_threshold: 1,
            stop_key: Some(KeySymbol::Named(NamedKey::Escape)),
        }
    }
}

/// Called once, off the capture thread, when the stop key is released
pub type StopHook = Box<dyn FnOnce() + Send + 'static>;

/// The working sequence of a recording in progress
#[derive(Debug)]
pub(crate) struct CaptureBuffer {
    events: Vec<Event>,
    started: Instant,
    move_threshold: i32,
    closed: bool,
}

impl CaptureBuffer {
    pub(crate) fn new(move_threshold: i32) -> Self {
        Self {
            events: Vec::new(),
            started: Instant::now(),
            move_threshold,
            closed: false,
        }
    }

    /// Timestamp and append a notification. Returns false if it was coalesced away
    /// or the buffer is closed.
    pub(crate) fn push(&mut self, raw: RawInput) -> bool {
        let elapsed = self.started.elapsed();
        self.push_at(raw, elapsed)
    }

    pub(crate) fn push_at(&mut self, raw: RawInput, elapsed: Duration) -> bool {
        if self.closed {
            return false;
        }
        if let RawInput::Move { position } = raw {
            if !self.keeps_move(position) {
                return false;
            }
        }
        let event = Event::from_raw(raw, elapsed);
        // Insertion order is temporal order, even for caller-supplied timestamps.
        let event = match self.events.last() {
            Some(last) if event.time() < last.time() => Event::from_raw(raw, last.time()),
            _ => event,
        };
        self.events.push(event);
        true
    }

    fn keeps_move(&self, position: Position) -> bool {
        match self.events.last() {
            Some(Event::PointerMove { x, y, .. }) => {
                (position.x - x).abs() > self.move_threshold
                    || (position.y - y).abs() > self.move_threshold
            }
            _ => true,
        }
    }

    /// Refuse all further input
    pub(crate) fn close(&mut self) {
        self.closed = true;
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }

    pub(crate) fn into_sequence(self) -> EventSequence {
        EventSequence::from_recorded(self.events)
    }
}

/// Captures raw input into an [`EventSequence`]
pub struct Recorder {
    source: Arc<dyn InputSource>,
    config: RecorderConfig,
}

impl Recorder {
    pub fn new(source: Arc<dyn InputSource>, config: RecorderConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Start capturing into a fresh, empty sequence.
    ///
    /// `on_stop_key` runs on its own thread the first time the configured stop key
    /// is released; it is expected to end the recording.
    pub fn start(&self, on_stop_key: StopHook) -> Result<ActiveRecording> {
        let buffer = Arc::new(Mutex::new(CaptureBuffer::new(self.config.move_threshold)));
        let stop_key = self.config.stop_key;
        let stop_hook = Mutex::new(Some(on_stop_key));

        let callback_buffer = Arc::clone(&buffer);
        let subscription = self.source.subscribe(Box::new(move |raw| {
            let (appended, stopped) = {
                let mut buffer = callback_buffer.lock().unwrap_or_else(PoisonError::into_inner);
                let appended = buffer.push(raw);
                // The release is the last event; nothing after it gets in.
                let stopped = appended && matches!(raw, RawInput::KeyUp(key) if Some(key) == stop_key);
                if stopped {
                    buffer.close();
                }
                (appended, stopped)
            };
            log_capture(&raw, appended);

            if stopped {
                let hook = stop_hook.lock().unwrap_or_else(PoisonError::into_inner).take();
                if let Some(hook) = hook {
                    info!("Stop key released, ending recording");
                    // Ending the recording drops this subscription, which waits for
                    // this callback to return, so it cannot happen on this thread.
                    if let Err(e) = std::thread::Builder::new()
                        .name("tinytask-stop-key".to_string())
                        .spawn(hook)
                    {
                        error!("Failed to spawn stop-key handler: {}", e);
                    }
                }
            }
        }))?;

        info!(
            move_threshold = self.config.move_threshold,
            stop_key = ?self.config.stop_key,
            "Recording started"
        );
        Ok(ActiveRecording {
            buffer,
            subscription,
        })
    }
}

fn log_capture(raw: &RawInput, appended: bool) {
    match raw {
        RawInput::Move { position } => {
            trace!(x = position.x, y = position.y, appended, "[REC] Move")
        }
        RawInput::Click {
            position,
            button,
            pressed,
        } => debug!(x = position.x, y = position.y, ?button, pressed, "[REC] Click"),
        RawInput::Scroll { position, dx, dy } => {
            debug!(x = position.x, y = position.y, dx, dy, "[REC] Scroll")
        }
        RawInput::KeyDown(key) => debug!(%key, "[REC] Key press"),
        RawInput::KeyUp(key) => debug!(%key, "[REC] Key release"),
    }
}

/// A recording in progress. Finishing it is the only way to get the sequence out.
pub struct ActiveRecording {
    buffer: Arc<Mutex<CaptureBuffer>>,
    subscription: Subscription,
}

impl ActiveRecording {
    /// Number of events captured so far
    pub fn event_count(&self) -> usize {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Stop capturing and freeze the sequence.
    ///
    /// Blocks until the host has no notification in flight for this recording.
    pub fn finish(self) -> EventSequence {
        let ActiveRecording {
            buffer,
            subscription,
        } = self;
        drop(subscription);

        let buffer = std::mem::replace(
            &mut *buffer.lock().unwrap_or_else(PoisonError::into_inner),
            CaptureBuffer::new(0),
        );
        let stopped_by_key = buffer.is_closed();
        let sequence = buffer.into_sequence();
        info!(
            events = sequence.len(),
            stopped_by_key,
            duration_ms = sequence.duration().as_millis() as u64,
            "Recording stopped"
        );
        sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::InputHub;
    use crate::MouseButton;

    fn moved(x: i32, y: i32) -> RawInput {
        RawInput::Move {
            position: Position::new(x, y),
        }
    }

    #[test]
    fn test_recorder_config_default() {
        let config = RecorderConfig::default();
        assert_eq!(config.move_threshold, 1);
        assert_eq!(config.stop_key, Some(KeySymbol::Named(NamedKey::Escape)));
    }

    #[test]
    fn test_move_coalescing() {
        let mut buffer = CaptureBuffer::new(1);
        for (i, (x, y)) in [(0, 0), (0, 0), (0, 1), (5, 5)].into_iter().enumerate() {
            buffer.push_at(moved(x, y), Duration::from_millis(i as u64 * 10));
        }
        let sequence = buffer.into_sequence();
        let positions: Vec<_> = sequence.iter().filter_map(Event::position).collect();
        assert_eq!(positions, vec![Position::new(0, 0), Position::new(5, 5)]);
    }

    #[test]
    fn test_move_after_other_event_is_kept() {
        let mut buffer = CaptureBuffer::new(1);
        assert!(buffer.push_at(moved(10, 10), Duration::ZERO));
        assert!(buffer.push_at(
            RawInput::Click {
                position: Position::new(10, 10),
                button: MouseButton::Left,
                pressed: true,
            },
            Duration::from_millis(5),
        ));
        assert!(buffer.push_at(moved(10, 10), Duration::from_millis(6)));
        assert!(!buffer.push_at(moved(11, 9), Duration::from_millis(7)));
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_larger_threshold() {
        let mut buffer = CaptureBuffer::new(4);
        assert!(buffer.push_at(moved(0, 0), Duration::ZERO));
        assert!(!buffer.push_at(moved(4, -4), Duration::from_millis(1)));
        assert!(buffer.push_at(moved(0, 5), Duration::from_millis(2)));
    }

    #[test]
    fn test_times_never_go_backwards() {
        let mut buffer = CaptureBuffer::new(1);
        buffer.push_at(RawInput::KeyDown(KeySymbol::Char('a')), Duration::from_millis(20));
        buffer.push_at(RawInput::KeyUp(KeySymbol::Char('a')), Duration::from_millis(19));
        let sequence = buffer.into_sequence();
        assert_eq!(sequence.events()[1].time(), Duration::from_millis(20));
    }

    #[test]
    fn test_recording_captures_until_finished() {
        let hub = InputHub::new();
        let recorder = Recorder::new(Arc::new(hub.clone()), RecorderConfig::default());
        let recording = recorder.start(Box::new(|| {})).unwrap();

        hub.dispatch(moved(1, 1));
        hub.dispatch(RawInput::KeyDown(KeySymbol::Char('q')));
        assert_eq!(recording.event_count(), 2);

        let sequence = recording.finish();
        hub.dispatch(moved(50, 50));

        assert_eq!(sequence.len(), 2);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_stop_key_fires_hook_once() {
        let hub = InputHub::new();
        let recorder = Recorder::new(Arc::new(hub.clone()), RecorderConfig::default());
        let (tx, rx) = std::sync::mpsc::channel();
        let recording = recorder
            .start(Box::new(move || {
                let _ = tx.send(());
            }))
            .unwrap();

        let escape = KeySymbol::Named(NamedKey::Escape);
        hub.dispatch(RawInput::KeyDown(escape));
        hub.dispatch(RawInput::KeyUp(escape));
        hub.dispatch(RawInput::KeyUp(escape));

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        // The release that stopped the recording is its last event.
        let sequence = recording.finish();
        assert_eq!(sequence.len(), 2);
        assert_eq!(sequence.events()[1], Event::KeyUp { key: escape, time: sequence.events()[1].time() });
    }

    #[test]
    fn test_nothing_is_captured_after_stop_key() {
        let hub = InputHub::new();
        let recorder = Recorder::new(Arc::new(hub.clone()), RecorderConfig::default());
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        // The hook holds off until the flood below has been dispatched.
        let recording = recorder
            .start(Box::new(move || {
                let _ = rx.recv_timeout(Duration::from_secs(5));
            }))
            .unwrap();

        let escape = KeySymbol::Named(NamedKey::Escape);
        hub.dispatch(RawInput::KeyUp(escape));
        for i in 0..5000 {
            hub.dispatch(moved(10 * i + 50, 10 * i));
        }
        hub.dispatch(RawInput::KeyDown(KeySymbol::Char('z')));
        let _ = tx.send(());

        let sequence = recording.finish();
        assert_eq!(sequence.len(), 1);
        assert_eq!(sequence.events()[0], Event::KeyUp { key: escape, time: sequence.events()[0].time() });
    }

    #[test]
    fn test_closed_buffer_refuses_input() {
        let mut buffer = CaptureBuffer::new(1);
        assert!(buffer.push_at(moved(1, 1), Duration::ZERO));
        buffer.close();
        assert!(buffer.is_closed());
        assert!(!buffer.push_at(moved(9, 9), Duration::from_millis(1)));
        assert!(!buffer.push_at(RawInput::KeyDown(KeySymbol::Char('a')), Duration::from_millis(2)));
        assert_eq!(buffer.len(), 1);
    }
}
