//! Named-event pub/sub for client lifecycle and host messages.
//!
//! Listeners subscribe by event name and are invoked synchronously, in
//! subscription order, on the client task that publishes.
//!
//! # Event names
//!
//! - `ipc-connect` - socket connected, handshake written
//! - `ipc-message` - every inbound frame, raw
//! - `READY` - host acknowledged the handshake
//! - any other `cmd`/`evt` value from the host, relayed as-is
//! - `ipc-error` - transport fault; a reconnect follows
//! - `ipc-end` - socket closed cleanly; a reconnect follows
//!
//! A listener that returns an error or panics is logged and skipped; the
//! remaining listeners still run.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::ipc::framing::Frame;
use crate::ipc::IpcError;

/// Outward event names.
pub mod names {
    /// Socket connected and handshake sent.
    pub const CONNECT: &str = "ipc-connect";
    /// Raw inbound frame.
    pub const MESSAGE: &str = "ipc-message";
    /// Handshake acknowledged.
    pub const READY: &str = crate::ipc::session::READY;
    /// Transport fault.
    pub const ERROR: &str = "ipc-error";
    /// Clean close.
    pub const END: &str = "ipc-end";
}

/// An event published to listeners.
#[derive(Debug, Clone)]
pub enum IpcEvent {
    /// Socket connected; handshake written but not yet acknowledged.
    Connect,
    /// An inbound frame, before any command-specific dispatch.
    Message(Frame),
    /// An inbound frame keyed by its `cmd` or `evt` value.
    Relay {
        /// The `cmd`/`evt` value.
        name: String,
        /// The frame that carried it.
        frame: Frame,
    },
    /// Transport fault that ended the session.
    Error(IpcError),
    /// Session ended without a fault.
    End,
}

impl IpcEvent {
    /// Name listeners subscribe to.
    pub fn name(&self) -> &str {
        match self {
            Self::Connect => names::CONNECT,
            Self::Message(_) => names::MESSAGE,
            Self::Relay { name, .. } => name,
            Self::Error(_) => names::ERROR,
            Self::End => names::END,
        }
    }

    /// Frame carried by this event, if any.
    pub fn frame(&self) -> Option<&Frame> {
        match self {
            Self::Message(frame) | Self::Relay { frame, .. } => Some(frame),
            _ => None,
        }
    }
}

/// Listener callback.
pub type Listener = Arc<dyn Fn(&IpcEvent) -> anyhow::Result<()> + Send + Sync>;

/// Handle returned by subscribe, used to unsubscribe.
pub type ListenerId = u64;

/// Shared listener id counter.
///
/// Cloned into client handles so they can hand out ids before the
/// registration reaches the registry.
#[derive(Debug, Clone, Default)]
pub struct ListenerIds(Arc<AtomicU64>);

impl ListenerIds {
    /// Allocate the next id.
    pub fn next(&self) -> ListenerId {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

struct Registration {
    id: ListenerId,
    event: String,
    callback: Listener,
    once: bool,
}

/// Listener storage and dispatch.
#[derive(Default)]
pub struct EventRegistry {
    listeners: Vec<Registration>,
    ids: ListenerIds,
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRegistry")
            .field("listener_count", &self.listeners.len())
            .finish()
    }
}

impl EventRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for `event`.
    ///
    /// `once` listeners are removed after their first invocation.
    pub fn subscribe(&mut self, event: &str, callback: Listener, once: bool) -> ListenerId {
        let id = self.ids.next();
        self.insert(id, event, callback, once);
        id
    }

    /// Register a listener under an id from [`EventRegistry::ids`].
    pub fn insert(&mut self, id: ListenerId, event: &str, callback: Listener, once: bool) {
        self.listeners.push(Registration {
            id,
            event: event.to_string(),
            callback,
            once,
        });
        log::debug!("[Events] Registered listener {} for '{}' (once: {})", id, event, once);
    }

    /// Id allocator shared with this registry.
    pub fn ids(&self) -> ListenerIds {
        self.ids.clone()
    }

    /// Remove a listener. Returns `false` if the id was unknown.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|r| r.id != id);
        before != self.listeners.len()
    }

    /// Returns `true` if any listener is registered for `event`.
    pub fn has_listeners(&self, event: &str) -> bool {
        self.listeners.iter().any(|r| r.event == event)
    }

    /// Total number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Invoke every listener registered for the event's name.
    ///
    /// The matching set is snapshotted first and `once` listeners are removed
    /// before any callback runs. Returns the number of callbacks that
    /// completed without error.
    pub fn publish(&mut self, event: &IpcEvent) -> usize {
        let name = event.name();
        let snapshot: Vec<(ListenerId, Listener)> = self
            .listeners
            .iter()
            .filter(|r| r.event == name)
            .map(|r| (r.id, Arc::clone(&r.callback)))
            .collect();

        if snapshot.is_empty() {
            return 0;
        }

        self.listeners.retain(|r| !(r.once && r.event == name));

        let mut invoked = 0;
        for (id, callback) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(Ok(())) => invoked += 1,
                Ok(Err(e)) => log::warn!("[Events] Listener {} for '{}' failed: {e:#}", id, name),
                Err(_) => log::error!("[Events] Listener {} for '{}' panicked", id, name),
            }
        }
        invoked
    }
}
