//! Event System
//!
//! Typed observer registry used by [`DeviceManager`](crate::manager::DeviceManager)
//! and [`Device`](crate::device::Device) to publish changes to UI code.
//!
//! Handlers are invoked synchronously on the thread that emits, after the
//! registry lock is released, so a handler may freely call back into the
//! object that emitted the event (or connect/disconnect other handlers).
//!
//! ## Example
//!
//! ```rust
//! use mconnect_core::events::EventEmitter;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let emitter: EventEmitter<u32> = EventEmitter::new();
//! let seen = Arc::new(AtomicUsize::new(0));
//!
//! let counter = Arc::clone(&seen);
//! let id = emitter.connect(move |value| {
//!     counter.fetch_add(*value as usize, Ordering::SeqCst);
//! });
//!
//! emitter.emit(&2);
//! assert!(emitter.disconnect(id));
//! emitter.emit(&5);
//! assert_eq!(seen.load(Ordering::SeqCst), 2);
//! ```

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Identifier returned by [`EventEmitter::connect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler#{}", self.0)
    }
}

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Observer registry for events of type `E`
pub struct EventEmitter<E> {
    handlers: Mutex<Vec<(HandlerId, Handler<E>)>>,
    next_id: AtomicU64,
}

impl<E> EventEmitter<E> {
    /// Create an emitter with no observers
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register an observer
    pub fn connect<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.lock().push((id, Arc::new(handler)));
        id
    }

    /// Remove one observer; returns `false` if it was not connected
    pub fn disconnect(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }

    /// Remove every observer
    pub fn disconnect_all(&self) {
        self.handlers.lock().clear();
    }

    /// Number of connected observers
    pub fn observer_count(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Deliver `event` to every observer in connection order
    pub fn emit(&self, event: &E) {
        let handlers: Vec<Handler<E>> = self
            .handlers
            .lock()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in handlers {
            handler(event);
        }
    }
}

impl<E> EventEmitter<E>
where
    E: Clone + Send + 'static,
{
    /// Forward events into an unbounded channel
    ///
    /// The receiver reports closed once the handler is disconnected, which
    /// happens when the emitting object is destroyed.
    pub fn subscribe_channel(&self) -> (HandlerId, mpsc::UnboundedReceiver<E>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.connect(move |event: &E| {
            // Receiver gone means the consumer lost interest
            let _ = tx.send(event.clone());
        });
        (id, rx)
    }
}

impl<E> Default for EventEmitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for EventEmitter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("observers", &self.observer_count())
            .finish()
    }
}
