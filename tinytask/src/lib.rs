//! Mouse and keyboard macro recorder
//!
//! This crate captures a user's mouse and keyboard activity as a time-stamped
//! event sequence and replays it against the live desktop at the original pace.
//! Front ends drive everything through a [`Session`]; the host desktop is
//! reached through the [`InputSource`] and [`InputSink`] capabilities, which
//! [`platforms::create_backend`] supplies for the current build.

pub mod error;
pub mod events;
pub mod host;
pub mod platforms;
pub mod player;
pub mod recorder;
pub mod session;
pub mod store;

pub use error::*;
pub use events::*;
pub use host::{InputCallback, InputHub, InputSink, InputSource, RawInput, Subscription};
pub use player::{
    FailsafeZone, InterruptReason, PlaybackReport, PlaybackStatus, Player, PlayerConfig,
    SkippedAction,
};
pub use recorder::{ActiveRecording, Recorder, RecorderConfig};
pub use session::{PlaybackHandle, Session, SessionConfig, SessionState, StopRequest};
pub use store::{SaveOutcome, DEFAULT_FILE};

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_position_copy_trait() {
        let pos1 = Position { x: 100, y: 200 };
        let pos2 = pos1;
        assert_eq!(pos1.x, pos2.x);
        assert_eq!(pos1.y, pos2.y);
    }

    #[test]
    fn test_mouse_button_equality() {
        assert_eq!(MouseButton::Left, MouseButton::Left);
        assert_ne!(MouseButton::Left, MouseButton::Right);
        assert_ne!(MouseButton::Right, MouseButton::Middle);
    }

    #[test]
    fn test_error_types() {
        let conflict = TinytaskError::Conflict("Cannot start playback while recording.".to_string());
        let missing = TinytaskError::NotFound("my_macro.json".into());
        let key = TinytaskError::UnsupportedKey(KeySymbol::Named(NamedKey::PrintScreen));

        assert!(conflict.to_string().contains("while recording"));
        assert!(missing.to_string().contains("my_macro.json"));
        assert!(key.to_string().contains("print_screen"));
    }

    #[test]
    fn test_json_errors_are_format_errors() {
        let err: TinytaskError = serde_json::from_str::<EventSequence>("{").unwrap_err().into();
        assert!(matches!(err, TinytaskError::Format(_)));
    }

    #[test]
    fn test_event_time_accessor() {
        let event = Event::KeyUp {
            key: KeySymbol::Char('1'),
            time: Duration::from_millis(42),
        };
        assert_eq!(event.time(), Duration::from_millis(42));
        assert_eq!(event.position(), None);
    }
}
