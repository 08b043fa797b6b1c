//! Reactive Context
//!
//! Two pieces of per-thread bookkeeping live here:
//!
//! - The tracking stack. While an effect runs, every cell it reads is
//!   recorded against the effect, so the effect can subscribe to exactly the
//!   cells it depends on and nothing else.
//! - The propagation stack. While a cell notifies its subscribers, its id is
//!   on this stack. A write that reaches the same cell again inside the same
//!   pass is stored but not re-propagated, which keeps a misbehaving callback
//!   from recursing forever.
//!
//! Both stacks are thread-local. The control plane is single-threaded, so
//! there is never contention; the stacks only exist to observe nesting.

use std::cell::RefCell;

use super::cell::{CellId, ControlCell};
use super::SubscriberId;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = const { RefCell::new(Vec::new()) };
    static PROPAGATION_STACK: RefCell<Vec<CellId>> = const { RefCell::new(Vec::new()) };
}

/// An entry in the tracking stack.
struct ContextEntry {
    subscriber_id: SubscriberId,
    /// Cells read during this computation, in first-read order.
    dependencies: Vec<ControlCell>,
}

/// Guard that pops the tracking context when dropped.
///
/// This keeps the stack balanced even if the computation panics.
pub struct ReactiveContext {
    subscriber_id: SubscriberId,
}

impl ReactiveContext {
    /// Enter a new tracking context for the given subscriber.
    pub fn enter(subscriber_id: SubscriberId) -> Self {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry {
                subscriber_id,
                dependencies: Vec::new(),
            });
        });

        Self { subscriber_id }
    }

    /// Check if there is an active tracking context.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// Get the current subscriber ID, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().map(|entry| entry.subscriber_id))
    }

    /// Record a read of `cell` in the innermost context.
    pub fn track(cell: &ControlCell) {
        CONTEXT_STACK.with(|stack| {
            if let Some(entry) = stack.borrow_mut().last_mut() {
                if !entry.dependencies.iter().any(|dep| dep.id() == cell.id()) {
                    entry.dependencies.push(cell.clone());
                }
            }
        });
    }

    /// Take the cells collected in this context so far.
    pub fn take_dependencies(&self) -> Vec<ControlCell> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow_mut()
                .last_mut()
                .map(|entry| std::mem::take(&mut entry.dependencies))
                .unwrap_or_default()
        })
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            if let Some(entry) = popped {
                debug_assert_eq!(
                    entry.subscriber_id, self.subscriber_id,
                    "ReactiveContext mismatch: expected {:?}, got {:?}",
                    self.subscriber_id, entry.subscriber_id
                );
            }
        });
    }
}

/// Marks a cell as "currently notifying" for the lifetime of the guard.
pub struct PropagationGuard {
    cell: CellId,
}

impl PropagationGuard {
    /// Returns `None` if `cell` is already propagating on this thread.
    pub fn enter(cell: CellId) -> Option<Self> {
        PROPAGATION_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.contains(&cell) {
                None
            } else {
                stack.push(cell);
                Some(Self { cell })
            }
        })
    }

    /// Number of cells currently propagating on this thread.
    pub fn depth() -> usize {
        PROPAGATION_STACK.with(|stack| stack.borrow().len())
    }
}

impl Drop for PropagationGuard {
    fn drop(&mut self) {
        PROPAGATION_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|id| *id == self.cell) {
                stack.remove(pos);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::ControlRange;

    #[test]
    fn context_tracks_subscriber() {
        let id = SubscriberId::new();

        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current_subscriber().is_none());

        {
            let _ctx = ReactiveContext::enter(id);

            assert!(ReactiveContext::is_active());
            assert_eq!(ReactiveContext::current_subscriber(), Some(id));
        }

        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current_subscriber().is_none());
    }

    #[test]
    fn context_dedupes_reads() {
        let a = ControlCell::new("a", ControlRange::unbounded(0.0)).unwrap();
        let b = ControlCell::new("b", ControlRange::unbounded(0.0)).unwrap();

        let ctx = ReactiveContext::enter(SubscriberId::new());
        a.get();
        b.get();
        a.get();

        let deps = ctx.take_dependencies();
        let ids: Vec<_> = deps.iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec![a.id(), b.id()]);
    }

    #[test]
    fn nested_contexts_collect_separately() {
        let outer_cell = ControlCell::new("outer", ControlRange::unbounded(0.0)).unwrap();
        let inner_cell = ControlCell::new("inner", ControlRange::unbounded(0.0)).unwrap();

        let outer = ReactiveContext::enter(SubscriberId::new());
        outer_cell.get();
        {
            let inner = ReactiveContext::enter(SubscriberId::new());
            inner_cell.get();
            assert_eq!(inner.take_dependencies().len(), 1);
        }
        let deps = outer.take_dependencies();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].id(), outer_cell.id());
    }

    #[test]
    fn propagation_guard_rejects_reentry() {
        let cell = ControlCell::new("x", ControlRange::unbounded(0.0)).unwrap();
        let first = PropagationGuard::enter(cell.id());
        assert!(first.is_some());
        assert!(PropagationGuard::enter(cell.id()).is_none());
        assert_eq!(PropagationGuard::depth(), 1);
        drop(first);
        assert_eq!(PropagationGuard::depth(), 0);
        assert!(PropagationGuard::enter(cell.id()).is_some());
    }
}
