//! Effect Implementation
//!
//! An Effect is a side-effecting computation that re-runs whenever one of
//! the cells it read changes.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs immediately inside a tracking context,
//!    which records every cell it reads.
//!
//! 2. The effect subscribes to exactly those cells. A write to any of them
//!    re-runs the effect synchronously; writes to other cells never do.
//!
//! 3. After each run the dependency set is diffed against the previous one.
//!    Cells no longer read are unsubscribed; cells still read keep their
//!    original notification position.
//!
//! # Use Cases
//!
//! Effects keep derived processing state in sync with the control plane,
//! e.g. regenerating a shaper's lookup table when its mode or drive change.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::cell::{CellId, WeakCell};
use super::context::ReactiveContext;
use super::subscriber::{Subscriber, SubscriberId};
use crate::dispose::Disposable;
use crate::error::Result;

struct EffectInner {
    subscriber_id: SubscriberId,
    run: Box<dyn Fn() + Send + Sync>,
    dependencies: Mutex<Vec<(CellId, WeakCell)>>,
    disposed: AtomicBool,
    run_count: AtomicUsize,
}

impl EffectInner {
    fn execute(self: &Arc<Self>) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }

        let tracked = {
            let ctx = ReactiveContext::enter(self.subscriber_id);
            (self.run)();
            ctx.take_dependencies()
        };
        self.run_count.fetch_add(1, Ordering::SeqCst);

        // Disposed from inside its own run; don't resubscribe.
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }

        let mut dependencies = self.dependencies.lock();
        for (id, weak) in dependencies.iter() {
            if !tracked.iter().any(|cell| cell.id() == *id) {
                if let Some(cell) = weak.upgrade() {
                    cell.unsubscribe(self.subscriber_id);
                }
            }
        }

        let mut next = Vec::with_capacity(tracked.len());
        for cell in &tracked {
            let weak: Weak<EffectInner> = Arc::downgrade(self);
            cell.subscribe(Subscriber::with_id(self.subscriber_id, move |_| {
                if let Some(effect) = weak.upgrade() {
                    effect.execute();
                }
            }));
            next.push((cell.id(), cell.downgrade()));
        }
        *dependencies = next;
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        for (_, weak) in self.dependencies.lock().drain(..) {
            if let Some(cell) = weak.upgrade() {
                cell.unsubscribe(self.subscriber_id);
            }
        }
    }
}

impl Drop for EffectInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// A computation that re-runs when the cells it reads change.
///
/// Clones share state. The effect stops when disposed or when the last
/// handle is dropped.
///
/// # Example
///
/// ```rust,ignore
/// let drive = ControlCell::new("drive", ControlRange::new(0.0, 24.0, 0.0))?;
///
/// let effect = Effect::new({
///     let drive = drive.clone();
///     move || println!("drive is {}", drive.get())
/// });
///
/// drive.set(6.0); // prints "drive is 6"
/// ```
#[derive(Clone)]
pub struct Effect {
    inner: Arc<EffectInner>,
}

impl Effect {
    /// Create an effect and run it once to establish its dependencies.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let effect = Self {
            inner: Arc::new(EffectInner {
                subscriber_id: SubscriberId::new(),
                run: Box::new(run),
                dependencies: Mutex::new(Vec::new()),
                disposed: AtomicBool::new(false),
                run_count: AtomicUsize::new(0),
            }),
        };

        effect.execute();
        effect
    }

    pub fn subscriber_id(&self) -> SubscriberId {
        self.inner.subscriber_id
    }

    /// Run the effect now and refresh its dependencies.
    pub fn execute(&self) {
        self.inner.execute();
    }

    /// Stop the effect and unsubscribe from every dependency.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::SeqCst)
    }

    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.lock().len()
    }
}

impl Disposable for Effect {
    fn dispose(&mut self) -> Result<()> {
        Effect::dispose(self);
        Ok(())
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("subscriber_id", &self.subscriber_id())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
