//! Subscriber types for the reactive system.
//!
//! A subscriber is anything that wants to hear about writes to a control
//! cell: a parameter binding, a cell-to-cell derivation, or an effect.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Unique identifier for a subscriber.
///
/// Each binding or effect gets one when it is created. The id is the key in
/// a cell's notifier map, so subscribing twice with the same id replaces the
/// callback in place without changing its notification order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Callback invoked with the freshly stored (clamped) value.
pub type Notifier = Arc<dyn Fn(f32) + Send + Sync>;

/// A subscriber to a control cell.
#[derive(Clone)]
pub struct Subscriber {
    id: SubscriberId,
    notify: Notifier,
}

impl Subscriber {
    /// Create a new subscriber with the given notification callback.
    pub fn new<F>(notify: F) -> Self
    where
        F: Fn(f32) + Send + Sync + 'static,
    {
        Self::with_id(SubscriberId::new(), notify)
    }

    /// Create a subscriber that reuses an existing id.
    pub fn with_id<F>(id: SubscriberId, notify: F) -> Self
    where
        F: Fn(f32) + Send + Sync + 'static,
    {
        Self {
            id,
            notify: Arc::new(notify),
        }
    }

    /// Get the subscriber's unique ID.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Deliver a value to the subscriber.
    pub fn notify(&self, value: f32) {
        (self.notify)(value);
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn subscriber_ids_are_unique() {
        let id1 = SubscriberId::new();
        let id2 = SubscriberId::new();
        let id3 = SubscriberId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn subscriber_notify_passes_value() {
        let seen = Arc::new(AtomicU32::new(0));
        let seen_clone = seen.clone();

        let subscriber = Subscriber::new(move |value| {
            seen_clone.store(value.to_bits(), Ordering::SeqCst);
        });

        subscriber.notify(0.25);
        assert_eq!(f32::from_bits(seen.load(Ordering::SeqCst)), 0.25);
    }
}
