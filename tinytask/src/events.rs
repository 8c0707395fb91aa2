use crate::host::RawInput;
use crate::{Result, TinytaskError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Represents a position on the screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Represents the type of mouse button
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// Symbolic keys that have no single-character representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamedKey {
    Escape,
    Enter,
    Tab,
    Backspace,
    Space,
    Delete,
    Insert,
    Home,
    End,
    PageUp,
    PageDown,
    ArrowUp,
    ArrowDown,
    ArrowLeft,
    ArrowRight,
    F1,
    F2,
    F3,
    F4,
    F5,
    F6,
    F7,
    F8,
    F9,
    F10,
    F11,
    F12,
    ShiftLeft,
    ShiftRight,
    ControlLeft,
    ControlRight,
    Alt,
    AltGr,
    MetaLeft,
    MetaRight,
    CapsLock,
    NumLock,
    ScrollLock,
    PrintScreen,
    Pause,
}

impl NamedKey {
    pub const ALL: [NamedKey; 40] = [
        NamedKey::Escape,
        NamedKey::Enter,
        NamedKey::Tab,
        NamedKey::Backspace,
        NamedKey::Space,
        NamedKey::Delete,
        NamedKey::Insert,
        NamedKey::Home,
        NamedKey::End,
        NamedKey::PageUp,
        NamedKey::PageDown,
        NamedKey::ArrowUp,
        NamedKey::ArrowDown,
        NamedKey::ArrowLeft,
        NamedKey::ArrowRight,
        NamedKey::F1,
        NamedKey::F2,
        NamedKey::F3,
        NamedKey::F4,
        NamedKey::F5,
        NamedKey::F6,
        NamedKey::F7,
        NamedKey::F8,
        NamedKey::F9,
        NamedKey::F10,
        NamedKey::F11,
        NamedKey::F12,
        NamedKey::ShiftLeft,
        NamedKey::ShiftRight,
        NamedKey::ControlLeft,
        NamedKey::ControlRight,
        NamedKey::Alt,
        NamedKey::AltGr,
        NamedKey::MetaLeft,
        NamedKey::MetaRight,
        NamedKey::CapsLock,
        NamedKey::NumLock,
        NamedKey::ScrollLock,
        NamedKey::PrintScreen,
        NamedKey::Pause,
    ];

    /// The name used in persisted files and config
    pub fn as_str(&self) -> &'static str {
        match self {
            NamedKey::Escape => "escape",
            NamedKey::Enter => "enter",
            NamedKey::Tab => "tab",
            NamedKey::Backspace => "backspace",
            NamedKey::Space => "space",
            NamedKey::Delete => "delete",
            NamedKey::Insert => "insert",
            NamedKey::Home => "home",
            NamedKey::End => "end",
            NamedKey::PageUp => "page_up",
            NamedKey::PageDown => "page_down",
            NamedKey::ArrowUp => "arrow_up",
            NamedKey::ArrowDown => "arrow_down",
            NamedKey::ArrowLeft => "arrow_left",
            NamedKey::ArrowRight => "arrow_right",
            NamedKey::F1 => "f1",
            NamedKey::F2 => "f2",
            NamedKey::F3 => "f3",
            NamedKey::F4 => "f4",
            NamedKey::F5 => "f5",
            NamedKey::F6 => "f6",
            NamedKey::F7 => "f7",
            NamedKey::F8 => "f8",
            NamedKey::F9 => "f9",
            NamedKey::F10 => "f10",
            NamedKey::F11 => "f11",
            NamedKey::F12 => "f12",
            NamedKey::ShiftLeft => "shift_left",
            NamedKey::ShiftRight => "shift_right",
            NamedKey::ControlLeft => "control_left",
            NamedKey::ControlRight => "control_right",
            NamedKey::Alt => "alt",
            NamedKey::AltGr => "alt_gr",
            NamedKey::MetaLeft => "meta_left",
            NamedKey::MetaRight => "meta_right",
            NamedKey::CapsLock => "caps_lock",
            NamedKey::NumLock => "num_lock",
            NamedKey::ScrollLock => "scroll_lock",
            NamedKey::PrintScreen => "print_screen",
            NamedKey::Pause => "pause",
        }
    }
}

/// A key as captured: either the literal character it produces or a symbolic name.
///
/// Persisted with an explicit tag (`{"char": "a"}` / `{"named": "escape"}`), so
/// a character key never collides with a symbolic name spelled the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySymbol {
    Char(char),
    Named(NamedKey),
}

impl From<NamedKey> for KeySymbol {
    fn from(key: NamedKey) -> Self {
        KeySymbol::Named(key)
    }
}

impl fmt::Display for KeySymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySymbol::Char(c) => write!(f, "'{}'", c),
            KeySymbol::Named(key) => f.write_str(key.as_str()),
        }
    }
}

impl FromStr for KeySymbol {
    type Err = TinytaskError;

    /// A single character parses as a literal key, anything else as a named key.
    fn from_str(s: &str) -> Result<Self> {
        let mut chars = s.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            return Ok(KeySymbol::Char(c));
        }
        let wanted = s.trim().to_lowercase();
        NamedKey::ALL
            .iter()
            .find(|key| key.as_str() == wanted)
            .map(|key| KeySymbol::Named(*key))
            .ok_or_else(|| TinytaskError::Format(format!("unknown key name '{}'", s)))
    }
}

/// One captured input occurrence, stamped with the time elapsed since recording began.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "mouse_click")]
    PointerClick {
        x: i32,
        y: i32,
        button: MouseButton,
        pressed: bool,
        #[serde(with = "seconds")]
        time: Duration,
    },

    #[serde(rename = "mouse_move")]
    PointerMove {
        x: i32,
        y: i32,
        #[serde(with = "seconds")]
        time: Duration,
    },

    #[serde(rename = "mouse_scroll")]
    PointerScroll {
        x: i32,
        y: i32,
        dx: i32,
        dy: i32,
        #[serde(with = "seconds")]
        time: Duration,
    },

    #[serde(rename = "key_press")]
    KeyDown {
        key: KeySymbol,
        #[serde(with = "seconds")]
        time: Duration,
    },

    #[serde(rename = "key_release")]
    KeyUp {
        key: KeySymbol,
        #[serde(with = "seconds")]
        time: Duration,
    },
}

impl Event {
    /// Build an event from a raw notification. `elapsed` is truncated to whole milliseconds.
    pub fn from_raw(raw: RawInput, elapsed: Duration) -> Self {
        let time = Duration::from_millis(elapsed.as_millis() as u64);
        match raw {
            RawInput::Click {
                position,
                button,
                pressed,
            } => Event::PointerClick {
                x: position.x,
                y: position.y,
                button,
                pressed,
                time,
            },
            RawInput::Move { position } => Event::PointerMove {
                x: position.x,
                y: position.y,
                time,
            },
            RawInput::Scroll { position, dx, dy } => Event::PointerScroll {
                x: position.x,
                y: position.y,
                dx,
                dy,
                time,
            },
            RawInput::KeyDown(key) => Event::KeyDown { key, time },
            RawInput::KeyUp(key) => Event::KeyUp { key, time },
        }
    }

    /// Elapsed time since recording start
    pub fn time(&self) -> Duration {
        match self {
            Event::PointerClick { time, .. }
            | Event::PointerMove { time, .. }
            | Event::PointerScroll { time, .. }
            | Event::KeyDown { time, .. }
            | Event::KeyUp { time, .. } => *time,
        }
    }

    /// Pointer position for mouse events
    pub fn position(&self) -> Option<Position> {
        match self {
            Event::PointerClick { x, y, .. }
            | Event::PointerMove { x, y, .. }
            | Event::PointerScroll { x, y, .. } => Some(Position::new(*x, *y)),
            Event::KeyDown { .. } | Event::KeyUp { .. } => None,
        }
    }
}

/// An ordered, time-monotonic list of events.
///
/// The only way to build one from arbitrary events is [`EventSequence::try_from`],
/// which rejects timestamps that go backwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Event>", into = "Vec<Event>")]
pub struct EventSequence {
    events: Vec<Event>,
}

impl EventSequence {
    /// Create an empty sequence
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap events appended in capture order, whose timestamps are already monotonic.
    pub(crate) fn from_recorded(events: Vec<Event>) -> Self {
        debug_assert!(first_out_of_order(&events).is_none());
        Self { events }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    /// Timestamp of the last event, i.e. how long a replay takes
    pub fn duration(&self) -> Duration {
        self.events.last().map(Event::time).unwrap_or_default()
    }

    /// Serialize to the persisted JSON array format
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and validate the persisted JSON array format
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl TryFrom<Vec<Event>> for EventSequence {
    type Error = TinytaskError;

    fn try_from(events: Vec<Event>) -> Result<Self> {
        if let Some(index) = first_out_of_order(&events) {
            return Err(TinytaskError::Format(format!(
                "event {} at {:.3}s is earlier than the event before it at {:.3}s",
                index,
                events[index].time().as_secs_f64(),
                events[index - 1].time().as_secs_f64(),
            )));
        }
        Ok(Self { events })
    }
}

impl From<EventSequence> for Vec<Event> {
    fn from(sequence: EventSequence) -> Self {
        sequence.events
    }
}

impl<'a> IntoIterator for &'a EventSequence {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

fn first_out_of_order(events: &[Event]) -> Option<usize> {
    events
        .windows(2)
        .position(|pair| pair[1].time() < pair[0].time())
        .map(|i| i + 1)
}

/// `Duration` <-> floating point seconds, at millisecond precision
mod seconds {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(time: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(time.as_millis() as f64 / 1000.0)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(D::Error::custom(format!("invalid event time {}", secs)));
        }
        Ok(Duration::from_millis((secs * 1000.0).round() as u64))
    }
}
