//! Input Events
//!
//! The [`EventBus`] carries host input (key presses, focus loss) to nodes
//! that react to it. Delivery is synchronous and in subscription order.
//! Listeners added or removed during a publish take effect from the next
//! publish, except that a removed listener is never called after removal.

use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::trace;

use crate::dispose::Disposable;
use crate::error::Result;
use crate::reactive::SubscriberId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// An identifier became active (key down).
    Activate,
    /// An identifier became inactive (key up).
    Deactivate,
    /// Everything should return to rest (focus lost).
    Reset,
}

/// A host input event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputEvent {
    pub kind: EventKind,
    /// Empty for [`EventKind::Reset`].
    #[serde(default)]
    pub identifier: String,
    /// Set when a modifier (ctrl, meta, shift) was held. Such activations
    /// are ignored by gates.
    #[serde(default)]
    pub modified: bool,
}

impl InputEvent {
    pub fn activate(identifier: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Activate,
            identifier: identifier.into(),
            modified: false,
        }
    }

    pub fn deactivate(identifier: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Deactivate,
            identifier: identifier.into(),
            modified: false,
        }
    }

    pub fn reset() -> Self {
        Self {
            kind: EventKind::Reset,
            identifier: String::new(),
            modified: false,
        }
    }

    pub fn with_modifier(mut self) -> Self {
        self.modified = true;
        self
    }
}

type Listener = Arc<dyn Fn(&InputEvent) + Send + Sync>;
type Listeners = Mutex<IndexMap<SubscriberId, Listener>>;

/// Synchronous fan-out of [`InputEvent`]s. Clones share listeners.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<Listeners>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. It stays registered until the returned
    /// subscription is cancelled or dropped.
    #[must_use = "dropping an EventSubscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, listener: F) -> EventSubscription
    where
        F: Fn(&InputEvent) + Send + Sync + 'static,
    {
        let id = SubscriberId::new();
        self.listeners.lock().insert(id, Arc::new(listener));
        EventSubscription {
            id,
            listeners: Some(Arc::downgrade(&self.listeners)),
        }
    }

    /// Deliver `event` to every listener. Returns how many were called.
    pub fn publish(&self, event: &InputEvent) -> usize {
        let snapshot: SmallVec<[(SubscriberId, Listener); 8]> = self
            .listeners
            .lock()
            .iter()
            .map(|(id, listener)| (*id, listener.clone()))
            .collect();

        let mut delivered = 0;
        for (id, listener) in snapshot {
            if !self.listeners.lock().contains_key(&id) {
                continue;
            }
            listener(event);
            delivered += 1;
        }
        trace!(kind = ?event.kind, identifier = %event.identifier, delivered, "event published");
        delivered
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// A registered listener. Returned by [`EventBus::subscribe`].
pub struct EventSubscription {
    id: SubscriberId,
    listeners: Option<Weak<Listeners>>,
}

impl EventSubscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.listeners.is_some()
    }

    /// Remove the listener. Returns `false` if already removed.
    pub fn cancel(&mut self) -> bool {
        let Some(listeners) = self.listeners.take() else {
            return false;
        };
        if let Some(listeners) = listeners.upgrade() {
            listeners.lock().shift_remove(&self.id);
        }
        true
    }
}

impl Disposable for EventSubscription {
    fn dispose(&mut self) -> Result<()> {
        self.cancel();
        Ok(())
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for EventSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSubscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn delivers_in_subscription_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let _a = bus.subscribe({
            let order = order.clone();
            move |_| order.lock().push('a')
        });
        let _b = bus.subscribe({
            let order = order.clone();
            move |_| order.lock().push('b')
        });

        assert_eq!(bus.publish(&InputEvent::activate("KeyA")), 2);
        assert_eq!(*order.lock(), vec!['a', 'b']);
    }

    #[test]
    fn cancel_is_idempotent() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let mut sub = bus.subscribe({
            let hits = hits.clone();
            move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            }
        });

        assert!(sub.cancel());
        assert!(!sub.cancel());
        bus.publish(&InputEvent::reset());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn listener_removed_mid_publish_is_skipped() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let victim: Arc<Mutex<Option<EventSubscription>>> = Arc::new(Mutex::new(None));

        let _killer = bus.subscribe({
            let victim = victim.clone();
            move |_| {
                victim.lock().take();
            }
        });
        *victim.lock() = Some(bus.subscribe({
            let hits = hits.clone();
            move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            }
        }));

        assert_eq!(bus.publish(&InputEvent::reset()), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn events_deserialize_from_json() {
        let event: InputEvent =
            serde_json::from_str(r#"{"kind":"activate","identifier":"KeyQ"}"#).unwrap();
        assert_eq!(event, InputEvent::activate("KeyQ"));
        assert!(!event.modified);
    }
}
