//! Host capabilities the engine consumes: a raw-input subscription and an
//! input-synthesis primitive set.
//!
//! Both are trait objects so the engine can run against the live desktop
//! (see [`crate::platforms`]) or against stubs in tests.

use crate::{KeySymbol, MouseButton, Position, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tracing::trace;

/// A raw input notification delivered by the host input subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawInput {
    Click {
        position: Position,
        button: MouseButton,
        pressed: bool,
    },
    Move {
        position: Position,
    },
    Scroll {
        position: Position,
        dx: i32,
        dy: i32,
    },
    KeyDown(KeySymbol),
    KeyUp(KeySymbol),
}

/// Callback invoked for every raw input notification, possibly from a host thread
pub type InputCallback = Box<dyn Fn(RawInput) + Send + Sync>;

/// Something that can deliver raw input notifications
pub trait InputSource: Send + Sync {
    /// Register `callback` for all pointer and keyboard notifications.
    ///
    /// Notifications stop when the returned [`Subscription`] is dropped. Once the
    /// drop has returned, the callback is not running and will never run again.
    fn subscribe(&self, callback: InputCallback) -> Result<Subscription>;
}

/// Something that can synthesize input against the desktop
pub trait InputSink: Send + Sync {
    /// Move the pointer without any pacing
    fn move_pointer(&self, position: Position) -> Result<()>;

    /// Press `button` at `position`
    fn button_down(&self, position: Position, button: MouseButton) -> Result<()>;

    /// Release `button` at `position`
    fn button_up(&self, position: Position, button: MouseButton) -> Result<()>;

    /// Scroll at `position`. Hosts without a horizontal wheel ignore `dx`.
    fn scroll(&self, position: Position, dx: i32, dy: i32) -> Result<()>;

    /// Press `key`; fails with `UnsupportedKey` if the host cannot express it
    fn key_down(&self, key: KeySymbol) -> Result<()>;

    /// Release `key`; fails with `UnsupportedKey` if the host cannot express it
    fn key_up(&self, key: KeySymbol) -> Result<()>;
}

struct Subscriber {
    id: u64,
    callback: InputCallback,
}

struct HubInner {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
}

/// Fan-out point between a host's input thread(s) and engine subscribers.
///
/// Host bindings push notifications with [`InputHub::dispatch`]; tests can do
/// the same to stand in for a real desktop.
#[derive(Clone)]
pub struct InputHub {
    inner: Arc<HubInner>,
}

impl InputHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Deliver a notification to every current subscriber
    pub fn dispatch(&self, raw: RawInput) {
        // Held for the whole delivery: unsubscribing waits on it.
        let subscribers = self
            .inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for subscriber in subscribers.iter() {
            (subscriber.callback)(raw);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for InputHub {
    fn default() -> Self {
        Self::new()
    }
}

impl InputSource for InputHub {
    fn subscribe(&self, callback: InputCallback) -> Result<Subscription> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber { id, callback });
        trace!(subscription = id, "Input subscription registered");
        Ok(Subscription {
            id,
            hub: Arc::downgrade(&self.inner),
        })
    }
}

/// Handle to a registered input callback; dropping it unregisters the callback
pub struct Subscription {
    id: u64,
    hub: Weak<HubInner>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.subscribers
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|subscriber| subscriber.id != self.id);
            trace!(subscription = self.id, "Input subscription released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_dispatch_reaches_subscribers_until_dropped() {
        let hub = InputHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let subscription = hub
            .subscribe(Box::new(move |raw| sink.lock().unwrap().push(raw)))
            .unwrap();
        assert_eq!(hub.subscriber_count(), 1);

        hub.dispatch(RawInput::Move { position: Position::new(1, 2) });
        drop(subscription);
        hub.dispatch(RawInput::Move { position: Position::new(3, 4) });

        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![RawInput::Move { position: Position::new(1, 2) }]
        );
    }

    #[test]
    fn test_drop_waits_for_in_flight_callback() {
        use std::sync::atomic::AtomicBool;
        use std::time::Duration;

        let hub = InputHub::new();
        let entered = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));

        let (e, f) = (Arc::clone(&entered), Arc::clone(&finished));
        let subscription = hub
            .subscribe(Box::new(move |_| {
                e.store(true, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(100));
                f.store(true, Ordering::SeqCst);
            }))
            .unwrap();

        let dispatcher = {
            let hub = hub.clone();
            std::thread::spawn(move || hub.dispatch(RawInput::KeyDown(KeySymbol::Char('x'))))
        };
        while !entered.load(Ordering::SeqCst) {
            std::thread::yield_now();
        }
        drop(subscription);
        assert!(finished.load(Ordering::SeqCst));
        dispatcher.join().unwrap();
    }
}
