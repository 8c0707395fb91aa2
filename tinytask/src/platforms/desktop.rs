//! Live desktop binding on top of `rdev`: global input capture and synthesis.

use crate::host::{InputCallback, InputHub, InputSink, InputSource, RawInput, Subscription};
use crate::{KeySymbol, MouseButton, NamedKey, Position, Result, TinytaskError};
use rdev::{Button, EventType, Key};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tracing::{debug, error, info};

/// Keys that produce a literal character
const CHAR_KEYS: [(char, Key); 48] = [
    ('a', Key::KeyA),
    ('b', Key::KeyB),
    ('c', Key::KeyC),
    ('d', Key::KeyD),
    ('e', Key::KeyE),
    ('f', Key::KeyF),
    ('g', Key::KeyG),
    ('h', Key::KeyH),
    ('i', Key::KeyI),
    ('j', Key::KeyJ),
    ('k', Key::KeyK),
    ('l', Key::KeyL),
    ('m', Key::KeyM),
    ('n', Key::KeyN),
    ('o', Key::KeyO),
    ('p', Key::KeyP),
    ('q', Key::KeyQ),
    ('r', Key::KeyR),
    ('s', Key::KeyS),
    ('t', Key::KeyT),
    ('u', Key::KeyU),
    ('v', Key::KeyV),
    ('w', Key::KeyW),
    ('x', Key::KeyX),
    ('y', Key::KeyY),
    ('z', Key::KeyZ),
    ('0', Key::Num0),
    ('1', Key::Num1),
    ('2', Key::Num2),
    ('3', Key::Num3),
    ('4', Key::Num4),
    ('5', Key::Num5),
    ('6', Key::Num6),
    ('7', Key::Num7),
    ('8', Key::Num8),
    ('9', Key::Num9),
    ('`', Key::BackQuote),
    ('-', Key::Minus),
    ('=', Key::Equal),
    ('[', Key::LeftBracket),
    (']', Key::RightBracket),
    (';', Key::SemiColon),
    ('\'', Key::Quote),
    ('\\', Key::BackSlash),
    (',', Key::Comma),
    ('.', Key::Dot),
    ('/', Key::Slash),
    ('<', Key::IntlBackslash),
];

/// Symbolic keys
const NAMED_KEYS: [(NamedKey, Key); 40] = [
    (NamedKey::Escape, Key::Escape),
    (NamedKey::Enter, Key::Return),
    (NamedKey::Tab, Key::Tab),
    (NamedKey::Backspace, Key::Backspace),
    (NamedKey::Space, Key::Space),
    (NamedKey::Delete, Key::Delete),
    (NamedKey::Insert, Key::Insert),
    (NamedKey::Home, Key::Home),
    (NamedKey::End, Key::End),
    (NamedKey::PageUp, Key::PageUp),
    (NamedKey::PageDown, Key::PageDown),
    (NamedKey::ArrowUp, Key::UpArrow),
    (NamedKey::ArrowDown, Key::DownArrow),
    (NamedKey::ArrowLeft, Key::LeftArrow),
    (NamedKey::ArrowRight, Key::RightArrow),
    (NamedKey::F1, Key::F1),
    (NamedKey::F2, Key::F2),
    (NamedKey::F3, Key::F3),
    (NamedKey::F4, Key::F4),
    (NamedKey::F5, Key::F5),
    (NamedKey::F6, Key::F6),
    (NamedKey::F7, Key::F7),
    (NamedKey::F8, Key::F8),
    (NamedKey::F9, Key::F9),
    (NamedKey::F10, Key::F10),
    (NamedKey::F11, Key::F11),
    (NamedKey::F12, Key::F12),
    (NamedKey::ShiftLeft, Key::ShiftLeft),
    (NamedKey::ShiftRight, Key::ShiftRight),
    (NamedKey::ControlLeft, Key::ControlLeft),
    (NamedKey::ControlRight, Key::ControlRight),
    (NamedKey::Alt, Key::Alt),
    (NamedKey::AltGr, Key::AltGr),
    (NamedKey::MetaLeft, Key::MetaLeft),
    (NamedKey::MetaRight, Key::MetaRight),
    (NamedKey::CapsLock, Key::CapsLock),
    (NamedKey::NumLock, Key::NumLock),
    (NamedKey::ScrollLock, Key::ScrollLock),
    (NamedKey::PrintScreen, Key::PrintScreen),
    (NamedKey::Pause, Key::Pause),
];

/// Map a captured key to the symbol it is recorded as
fn key_to_symbol(key: Key) -> Option<KeySymbol> {
    // Keypad keys record as the main-block key they produce.
    let key = match key {
        Key::Kp0 => Key::Num0,
        Key::Kp1 => Key::Num1,
        Key::Kp2 => Key::Num2,
        Key::Kp3 => Key::Num3,
        Key::Kp4 => Key::Num4,
        Key::Kp5 => Key::Num5,
        Key::Kp6 => Key::Num6,
        Key::Kp7 => Key::Num7,
        Key::Kp8 => Key::Num8,
        Key::Kp9 => Key::Num9,
        Key::KpMinus => Key::Minus,
        Key::KpDivide => Key::Slash,
        Key::KpReturn => Key::Return,
        Key::KpDelete => Key::Delete,
        other => other,
    };
    if let Some((c, _)) = CHAR_KEYS.iter().find(|(_, k)| *k == key) {
        return Some(KeySymbol::Char(*c));
    }
    NAMED_KEYS
        .iter()
        .find(|(_, k)| *k == key)
        .map(|(named, _)| KeySymbol::Named(*named))
}

/// Map a recorded symbol to the key that synthesizes it
fn symbol_to_key(symbol: KeySymbol) -> Result<Key> {
    let found = match symbol {
        KeySymbol::Char(c) => {
            let c = c.to_ascii_lowercase();
            CHAR_KEYS.iter().find(|(ch, _)| *ch == c).map(|(_, k)| *k)
        }
        KeySymbol::Named(named) => NAMED_KEYS.iter().find(|(n, _)| *n == named).map(|(_, k)| *k),
    };
    found.ok_or(TinytaskError::UnsupportedKey(symbol))
}

fn to_mouse_button(button: Button) -> Option<MouseButton> {
    match button {
        Button::Left => Some(MouseButton::Left),
        Button::Right => Some(MouseButton::Right),
        Button::Middle => Some(MouseButton::Middle),
        Button::Unknown(_) => None,
    }
}

fn to_rdev_button(button: MouseButton) -> Button {
    match button {
        MouseButton::Left => Button::Left,
        MouseButton::Right => Button::Right,
        MouseButton::Middle => Button::Middle,
    }
}

/// Translate an rdev event. Clicks and wheel events carry no position, so the
/// last pointer position seen is used; until one is seen they are dropped.
fn translate(event_type: EventType, pointer: &Mutex<Option<Position>>) -> Option<RawInput> {
    let current = |what: &str| {
        let position = *pointer.lock().unwrap_or_else(PoisonError::into_inner);
        if position.is_none() {
            debug!("Ignoring {} before the first pointer move", what);
        }
        position
    };
    match event_type {
        EventType::MouseMove { x, y } => {
            let position = Position::new(x.round() as i32, y.round() as i32);
            *pointer.lock().unwrap_or_else(PoisonError::into_inner) = Some(position);
            Some(RawInput::Move { position })
        }
        EventType::ButtonPress(button) => {
            let button = to_mouse_button(button)?;
            current("button press").map(|position| RawInput::Click {
                position,
                button,
                pressed: true,
            })
        }
        EventType::ButtonRelease(button) => {
            let button = to_mouse_button(button)?;
            current("button release").map(|position| RawInput::Click {
                position,
                button,
                pressed: false,
            })
        }
        EventType::Wheel { delta_x, delta_y } => current("wheel").map(|position| RawInput::Scroll {
            position,
            dx: delta_x as i32,
            dy: delta_y as i32,
        }),
        EventType::KeyPress(key) => {
            let symbol = key_to_symbol(key);
            if symbol.is_none() {
                debug!(?key, "Ignoring key with no recordable symbol");
            }
            symbol.map(RawInput::KeyDown)
        }
        EventType::KeyRelease(key) => key_to_symbol(key).map(RawInput::KeyUp),
    }
}

/// Global input capture. rdev can only listen once per process, so there is one
/// shared instance whose listener thread fans out to subscribers.
pub struct DesktopInput {
    hub: InputHub,
    pointer: Arc<Mutex<Option<Position>>>,
    listening: Mutex<bool>,
}

impl DesktopInput {
    pub fn shared() -> Arc<DesktopInput> {
        static SHARED: OnceLock<Arc<DesktopInput>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| {
            Arc::new(DesktopInput {
                hub: InputHub::new(),
                pointer: Arc::new(Mutex::new(None)),
                listening: Mutex::new(false),
            })
        }))
    }

    fn ensure_listening(&self) -> Result<()> {
        let mut listening = self.listening.lock().unwrap_or_else(PoisonError::into_inner);
        if *listening {
            return Ok(());
        }

        let hub = self.hub.clone();
        let pointer = Arc::clone(&self.pointer);
        std::thread::Builder::new()
            .name("tinytask-input".to_string())
            .spawn(move || {
                info!("Desktop input listener starting");
                if let Err(e) = rdev::listen(move |event| {
                    if let Some(raw) = translate(event.event_type, &pointer) {
                        hub.dispatch(raw);
                    }
                }) {
                    error!("Failed to listen for input events: {:?}", e);
                }
                info!("Desktop input listener has finished or encountered an error.");
            })
            .map_err(|e| TinytaskError::Capture(e.to_string()))?;

        *listening = true;
        Ok(())
    }
}

impl InputSource for DesktopInput {
    fn subscribe(&self, callback: InputCallback) -> Result<Subscription> {
        self.ensure_listening()?;
        self.hub.subscribe(callback)
    }
}

/// Input synthesis through `rdev::simulate`
#[derive(Debug, Default)]
pub struct DesktopSink;

impl DesktopSink {
    pub fn new() -> Self {
        Self
    }

    fn send(&self, event_type: EventType) -> Result<()> {
        rdev::simulate(&event_type)
            .map_err(|_| TinytaskError::Synthesis(format!("could not send {:?}", event_type)))
    }
}

impl InputSink for DesktopSink {
    fn move_pointer(&self, position: Position) -> Result<()> {
        self.send(EventType::MouseMove {
            x: position.x as f64,
            y: position.y as f64,
        })
    }

    fn button_down(&self, position: Position, button: MouseButton) -> Result<()> {
        self.move_pointer(position)?;
        self.send(EventType::ButtonPress(to_rdev_button(button)))
    }

    fn button_up(&self, position: Position, button: MouseButton) -> Result<()> {
        self.move_pointer(position)?;
        self.send(EventType::ButtonRelease(to_rdev_button(button)))
    }

    fn scroll(&self, position: Position, dx: i32, dy: i32) -> Result<()> {
        self.move_pointer(position)?;
        self.send(EventType::Wheel {
            delta_x: dx as i64,
            delta_y: dy as i64,
        })
    }

    fn key_down(&self, key: KeySymbol) -> Result<()> {
        self.send(EventType::KeyPress(symbol_to_key(key)?))
    }

    fn key_up(&self, key: KeySymbol) -> Result<()> {
        self.send(EventType::KeyRelease(symbol_to_key(key)?))
    }
}
