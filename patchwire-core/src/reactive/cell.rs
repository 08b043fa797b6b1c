//! Control Cell Implementation
//!
//! A control cell is the reactive scalar behind every control port and every
//! user-facing parameter. It holds an `f32`, an optional `[min, max]` clamp
//! and a default.
//!
//! # How Cells Work
//!
//! 1. A write is clamped to the declared range before it is stored.
//!
//! 2. After the store, every subscriber is called synchronously, in the order
//!    the subscriptions were registered, before `set` returns.
//!
//! 3. A read inside an effect records the cell as one of the effect's
//!    dependencies (see [`ReactiveContext`]).
//!
//! # Cell-to-Cell Links
//!
//! Besides plain callbacks, a cell remembers which other cells it drives
//! (its downstream links). Bindings consult these links to reject cycles
//! before a subscription is ever registered.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use tracing::{trace, warn};

use super::context::{PropagationGuard, ReactiveContext};
use super::subscriber::{Notifier, Subscriber, SubscriberId};
use crate::error::{GraphError, Result};

/// Unique identifier for a control cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(u64);

impl CellId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Declared range and default of a control cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlRange {
    pub min: Option<f32>,
    pub max: Option<f32>,
    pub default: f32,
}

impl ControlRange {
    /// A closed range `[min, max]` with the given default.
    pub fn new(min: f32, max: f32, default: f32) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
            default,
        }
    }

    /// No clamping at all.
    pub fn unbounded(default: f32) -> Self {
        Self {
            min: None,
            max: None,
            default,
        }
    }

    /// `value' = max(min, min(max, value))`, skipping unset bounds.
    pub fn clamp(&self, value: f32) -> f32 {
        let upper = match self.max {
            Some(max) => value.min(max),
            None => value,
        };
        match self.min {
            Some(min) => upper.max(min),
            None => upper,
        }
    }

    fn validate(&self, label: &str) -> Result<()> {
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(GraphError::InvalidRange {
                    cell: label.to_string(),
                    min,
                    max,
                });
            }
        }
        Ok(())
    }
}

struct CellInner {
    id: CellId,
    label: String,
    range: ControlRange,
    value: RwLock<f32>,
    notifiers: Mutex<IndexMap<SubscriberId, Notifier>>,
    /// Cells this cell drives through a binding, keyed by the binding.
    downstream: Mutex<IndexMap<SubscriberId, Weak<CellInner>>>,
    /// The binding currently driving this cell, if any.
    driver: Mutex<Option<SubscriberId>>,
}

/// A reactive scalar with clamped writes and synchronous notification.
///
/// Cloning a cell yields another handle to the same state.
#[derive(Clone)]
pub struct ControlCell {
    inner: Arc<CellInner>,
}

/// A non-owning handle to a cell.
#[derive(Clone)]
pub struct WeakCell {
    inner: Weak<CellInner>,
}

impl WeakCell {
    pub fn upgrade(&self) -> Option<ControlCell> {
        self.inner.upgrade().map(|inner| ControlCell { inner })
    }
}

impl ControlCell {
    /// Create a cell. The default is clamped and stored as the initial value.
    pub fn new(label: impl Into<String>, range: ControlRange) -> Result<Self> {
        let label = label.into();
        range.validate(&label)?;

        Ok(Self {
            inner: Arc::new(CellInner {
                id: CellId::next(),
                value: RwLock::new(range.clamp(range.default)),
                label,
                range,
                notifiers: Mutex::new(IndexMap::new()),
                downstream: Mutex::new(IndexMap::new()),
                driver: Mutex::new(None),
            }),
        })
    }

    pub fn id(&self) -> CellId {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn range(&self) -> ControlRange {
        self.inner.range
    }

    /// Read the value, recording the read if an effect is running.
    pub fn get(&self) -> f32 {
        if ReactiveContext::is_active() {
            ReactiveContext::track(self);
        }
        self.get_untracked()
    }

    /// Read the value without establishing a dependency.
    pub fn get_untracked(&self) -> f32 {
        *self.inner.value.read()
    }

    /// Clamp, store and notify. Returns the stored value.
    pub fn set(&self, value: f32) -> f32 {
        if value.is_nan() {
            warn!(cell = %self.label(), "ignoring NaN write");
            return self.get_untracked();
        }

        let clamped = self.inner.range.clamp(value);
        *self.inner.value.write() = clamped;
        trace!(cell = %self.label(), value, clamped, "cell write");

        self.notify_subscribers();
        clamped
    }

    /// Update the value using a function of the current value.
    pub fn update<F>(&self, f: F) -> f32
    where
        F: FnOnce(f32) -> f32,
    {
        let next = f(self.get_untracked());
        self.set(next)
    }

    /// Write the declared default back into the cell.
    pub fn reset(&self) -> f32 {
        self.set(self.inner.range.default)
    }

    /// Register a subscriber. Re-registering an id keeps its position.
    pub fn subscribe(&self, subscriber: Subscriber) {
        let id = subscriber.id();
        let notify: Notifier = Arc::new(move |value| subscriber.notify(value));
        self.inner.notifiers.lock().insert(id, notify);
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&self, subscriber_id: SubscriberId) -> bool {
        self.inner
            .notifiers
            .lock()
            .shift_remove(&subscriber_id)
            .is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.notifiers.lock().len()
    }

    pub fn downgrade(&self) -> WeakCell {
        WeakCell {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Whether a binding currently drives this cell.
    pub fn is_driven(&self) -> bool {
        self.inner.driver.lock().is_some()
    }

    fn notify_subscribers(&self) {
        let Some(_guard) = PropagationGuard::enter(self.id()) else {
            warn!(
                cell = %self.label(),
                "write re-entered a cell that is already propagating; value stored, not re-propagated"
            );
            return;
        };

        let snapshot: SmallVec<[(SubscriberId, Notifier); 4]> = self
            .inner
            .notifiers
            .lock()
            .iter()
            .map(|(id, notify)| (*id, Arc::clone(notify)))
            .collect();

        for (id, notify) in snapshot {
            // An earlier subscriber may have torn this one down mid-pass.
            if !self.inner.notifiers.lock().contains_key(&id) {
                continue;
            }
            notify(self.get_untracked());
        }
    }

    pub(crate) fn claim_driver(&self, binding: SubscriberId) -> Result<()> {
        let mut driver = self.inner.driver.lock();
        if driver.is_some() {
            return Err(GraphError::AlreadyDriven {
                target: self.label().to_string(),
            });
        }
        *driver = Some(binding);
        Ok(())
    }

    pub(crate) fn release_driver(&self, binding: SubscriberId) {
        let mut driver = self.inner.driver.lock();
        if *driver == Some(binding) {
            *driver = None;
        }
    }

    pub(crate) fn add_downstream(&self, binding: SubscriberId, target: &ControlCell) {
        self.inner
            .downstream
            .lock()
            .insert(binding, Arc::downgrade(&target.inner));
    }

    pub(crate) fn remove_downstream(&self, binding: SubscriberId) {
        self.inner.downstream.lock().shift_remove(&binding);
    }

    /// Whether a write to `self` can reach the cell `target` through bindings.
    pub(crate) fn reaches(&self, target: CellId) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![self.clone()];

        while let Some(cell) = stack.pop() {
            if cell.id() == target {
                return true;
            }
            if !visited.insert(cell.id()) {
                continue;
            }
            let next: Vec<ControlCell> = cell
                .inner
                .downstream
                .lock()
                .values()
                .filter_map(|weak| weak.upgrade().map(|inner| ControlCell { inner }))
                .collect();
            stack.extend(next);
        }
        false
    }
}

impl fmt::Debug for ControlCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlCell")
            .field("label", &self.label())
            .field("value", &self.get_untracked())
            .field("range", &self.inner.range)
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
