//! Synchronous, typed event fan-out.
//!
//! Listeners are plain closures invoked in subscription order on the
//! emitting thread. [`EventBus::subscribe`] returns a [`Subscription`]
//! handle whose drop (or explicit [`Subscription::unsubscribe`]) detaches
//! the listener deterministically. A panicking listener is caught and
//! logged; emission continues with the remaining listeners. The listener
//! list lock is released before any listener runs.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arbor_core::events::ArborEvent;
use parking_lot::RwLock;
use tracing::error;

type ListenerFn = Arc<dyn Fn(&ArborEvent) + Send + Sync>;

struct BusInner {
    listeners: RwLock<Vec<(u64, ListenerFn)>>,
    next_id: AtomicU64,
    emit_count: AtomicU64,
}

/// Typed event bus. Cheap to clone; clones share the listener list.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                listeners: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                emit_count: AtomicU64::new(0),
            }),
        }
    }

    /// Register a listener. Keep the returned handle alive for as long as
    /// the listener should receive events.
    #[must_use]
    pub fn subscribe(&self, listener: impl Fn(&ArborEvent) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.write().push((id, Arc::new(listener)));
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Emit an event to all listeners, synchronously, in subscription order.
    ///
    /// Returns the number of listeners invoked.
    pub fn emit(&self, event: &ArborEvent) -> usize {
        let _ = self.inner.emit_count.fetch_add(1, Ordering::Relaxed);
        // Snapshot under the read lock so no lock is held while listeners run.
        let snapshot: Vec<(u64, ListenerFn)> = self.inner.listeners.read().clone();
        for (id, listener) in &snapshot {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| listener(event)));
            if result.is_err() {
                error!(
                    subscription = id,
                    event_type = event.event_type(),
                    "event listener panicked; continuing fan-out"
                );
            }
        }
        snapshot.len()
    }

    /// Number of attached listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }

    /// Total number of events emitted.
    #[must_use]
    pub fn emit_count(&self) -> u64 {
        self.inner.emit_count.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for one listener registration. Dropping it detaches the listener.
pub struct Subscription {
    id: u64,
    inner: Weak<BusInner>,
}

impl Subscription {
    /// Detach the listener now.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.listeners.write().retain(|(id, _)| *id != self.id);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
