//! Typed event emitter shared by every backend.
//!
//! The emitter is a small multi-listener registry keyed by [`EventKind`].
//! Listeners are dispatched synchronously on the emitting thread, in
//! registration order, against a snapshot of the listener set taken at
//! emit time:
//!
//! - a listener removed before `emit` never observes that emission,
//! - a listener added during `emit` never observes the in-progress emission,
//! - the internal lock is released before any listener runs, so listeners
//!   may subscribe or unsubscribe without deadlocking.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Event categories a listener can subscribe to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Inbound bytes were read from the device.
    Data,
}

/// Payload delivered to listeners.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SerialEvent {
    /// The bytes of one successful device read, in arrival order.
    Data(Vec<u8>),
}

/// Identifies one registration for later removal.
///
/// Handles are unique for the lifetime of the emitter and are never reused,
/// even after the listener they name has been removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListenerHandle(u64);

type Callback = Arc<dyn Fn(&SerialEvent) + Send + Sync>;

struct Registration {
    handle: ListenerHandle,
    callback: Callback,
}

struct Registry {
    listeners: HashMap<EventKind, Vec<Registration>>,
    next_handle: u64,
}

/// Multi-listener publish/subscribe registry.
pub struct EventEmitter {
    inner: Mutex<Registry>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Registry {
                listeners: HashMap::new(),
                next_handle: 0,
            }),
        }
    }

    /// Registers `listener` for `kind` and returns its removal handle.
    pub fn on(
        &self,
        kind: EventKind,
        listener: impl Fn(&SerialEvent) + Send + Sync + 'static,
    ) -> ListenerHandle {
        let mut registry = self.inner.lock().unwrap();

        let handle = ListenerHandle(registry.next_handle);
        registry.next_handle += 1;

        registry
            .listeners
            .entry(kind)
            .or_default()
            .push(Registration {
                handle,
                callback: Arc::new(listener),
            });

        handle
    }

    /// Removes the listener registered under `handle`.
    ///
    /// A handle that does not exist (already removed, or registered for a
    /// different kind) is a no-op. Removing the last listener of a kind
    /// frees that kind's bookkeeping.
    pub fn remove_listener(&self, kind: EventKind, handle: ListenerHandle) {
        let mut registry = self.inner.lock().unwrap();

        if let Some(registrations) = registry.listeners.get_mut(&kind) {
            registrations.retain(|r| r.handle != handle);

            if registrations.is_empty() {
                registry.listeners.remove(&kind);
            }
        }
    }

    /// Invokes every listener currently registered for `kind`.
    ///
    /// The listener set is snapshotted before dispatch; the registry lock
    /// is not held while listeners run.
    pub fn emit(&self, kind: EventKind, event: &SerialEvent) {
        let snapshot: Vec<Callback> = {
            let registry = self.inner.lock().unwrap();

            match registry.listeners.get(&kind) {
                Some(registrations) => registrations.iter().map(|r| r.callback.clone()).collect(),
                None => return,
            }
        };

        for callback in snapshot {
            callback(event);
        }
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}
