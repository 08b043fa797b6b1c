//! Disposer Bundles
//!
//! Every scope that acquires resources (a node's connect call, one slot of a
//! sub-node collection) records how to release them in a [`DisposerBundle`].
//! Bundles form a tree: a bundle may contain leaf teardown actions and
//! nested bundles.
//!
//! # Contract
//!
//! - Disposing a bundle runs every contained action exactly once. A second
//!   call is a no-op.
//! - Actions run in the order they were added, nested bundles inline.
//! - Teardown is best-effort. An action that fails (or panics) is logged as
//!   `DisposalActionFailed` and collected into the [`DisposalReport`]; the
//!   remaining actions still run.
//! - A bundle dropped without being disposed disposes itself.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, warn};

use crate::error::{GraphError, Result};

/// Something that owns a resource and knows how to release it.
pub trait Disposable: Send {
    /// Release the resource. Must be safe to call more than once.
    fn dispose(&mut self) -> Result<()>;
}

/// A one-shot closure used as a teardown action.
struct Deferred<F>(Option<F>);

impl<F> Disposable for Deferred<F>
where
    F: FnOnce() -> Result<()> + Send,
{
    fn dispose(&mut self) -> Result<()> {
        match self.0.take() {
            Some(action) => action(),
            None => Ok(()),
        }
    }
}

enum Entry {
    Leaf {
        label: String,
        item: Box<dyn Disposable>,
    },
    Nested(DisposerBundle),
}

/// Outcome of disposing a bundle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisposalReport {
    /// Leaf actions that completed successfully, including nested ones.
    pub completed: usize,
    /// Leaf actions that failed. Each is a `DisposalActionFailed`.
    pub failures: Vec<GraphError>,
}

impl DisposalReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Total number of leaf actions that ran.
    pub fn ran(&self) -> usize {
        self.completed + self.failures.len()
    }

    pub fn merge(&mut self, other: DisposalReport) {
        self.completed += other.completed;
        self.failures.extend(other.failures);
    }
}

/// An ordered tree of teardown actions belonging to one scope.
pub struct DisposerBundle {
    scope: String,
    entries: Vec<Entry>,
    disposed: bool,
}

impl DisposerBundle {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            entries: Vec::new(),
            disposed: false,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Add a resource to be released with this bundle.
    pub fn add<D>(&mut self, label: impl Into<String>, item: D) -> &mut Self
    where
        D: Disposable + 'static,
    {
        self.entries.push(Entry::Leaf {
            label: label.into(),
            item: Box::new(item),
        });
        self
    }

    /// Add an infallible closure.
    pub fn defer<F>(&mut self, label: impl Into<String>, action: F) -> &mut Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.defer_fallible(label, move || {
            action();
            Ok(())
        })
    }

    /// Add a closure that may report a failure.
    pub fn defer_fallible<F>(&mut self, label: impl Into<String>, action: F) -> &mut Self
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.add(label, Deferred(Some(action)))
    }

    /// Nest a child bundle. It is disposed along with this one.
    pub fn nest(&mut self, child: DisposerBundle) -> &mut Self {
        self.entries.push(Entry::Nested(child));
        self
    }

    /// Leaf action labels in run order, nested bundles inline.
    pub fn labels(&self) -> Vec<&str> {
        self.entries
            .iter()
            .flat_map(|entry| match entry {
                Entry::Leaf { label, .. } => vec![label.as_str()],
                Entry::Nested(child) => child.labels(),
            })
            .collect()
    }

    /// Number of leaf actions, counting nested bundles recursively.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .map(|entry| match entry {
                Entry::Leaf { .. } => 1,
                Entry::Nested(child) => child.len(),
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Run every action once. Never fails; see the module docs.
    pub fn dispose(&mut self) -> DisposalReport {
        let mut report = DisposalReport::default();
        if self.disposed {
            return report;
        }
        self.disposed = true;

        for entry in std::mem::take(&mut self.entries) {
            match entry {
                Entry::Leaf { label, mut item } => {
                    let outcome = catch_unwind(AssertUnwindSafe(|| item.dispose()));
                    let reason = match outcome {
                        Ok(Ok(())) => {
                            report.completed += 1;
                            continue;
                        }
                        Ok(Err(error)) => error.to_string(),
                        Err(payload) => panic_message(payload.as_ref()),
                    };
                    warn!(scope = %self.scope, action = %label, %reason, "disposal action failed");
                    report.failures.push(GraphError::DisposalActionFailed {
                        scope: self.scope.clone(),
                        action: label,
                        reason,
                    });
                }
                Entry::Nested(mut child) => report.merge(child.dispose()),
            }
        }

        debug!(
            scope = %self.scope,
            completed = report.completed,
            failed = report.failures.len(),
            "bundle disposed"
        );
        report
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        format!("panicked: {text}")
    } else if let Some(text) = payload.downcast_ref::<String>() {
        format!("panicked: {text}")
    } else {
        "panicked".to_string()
    }
}

impl Disposable for DisposerBundle {
    fn dispose(&mut self) -> Result<()> {
        // Failures were already logged and are not escalated.
        DisposerBundle::dispose(self);
        Ok(())
    }
}

impl Drop for DisposerBundle {
    fn drop(&mut self) {
        if !self.disposed && !self.entries.is_empty() {
            debug!(scope = %self.scope, "bundle dropped undisposed; disposing");
            self.dispose();
        }
    }
}

impl fmt::Debug for DisposerBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisposerBundle")
            .field("scope", &self.scope)
            .field("actions", &self.len())
            .field("disposed", &self.disposed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    fn counting(bundle: &mut DisposerBundle, label: &str, hits: &Arc<AtomicUsize>) {
        let hits = hits.clone();
        bundle.defer(label, move || {
            hits.fetch_add(1, Ordering::SeqCst);
        });
    }

    #[test]
    fn runs_every_action_once() {
        let hits = counter();
        let mut bundle = DisposerBundle::new("scope");
        counting(&mut bundle, "a", &hits);
        counting(&mut bundle, "b", &hits);

        let report = bundle.dispose();
        assert_eq!(report.completed, 2);
        assert!(report.is_clean());
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        let again = bundle.dispose();
        assert_eq!(again.ran(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(bundle.is_disposed());
    }

    #[test]
    fn nested_bundles_are_disposed_with_parent() {
        let hits = counter();
        let mut child = DisposerBundle::new("child");
        counting(&mut child, "inner", &hits);

        let mut parent = DisposerBundle::new("parent");
        counting(&mut parent, "outer", &hits);
        parent.nest(child);
        assert_eq!(parent.len(), 2);

        let report = parent.dispose();
        assert_eq!(report.completed, 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn actions_run_in_insertion_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let push = |bundle: &mut DisposerBundle, label: &'static str| {
            let order = order.clone();
            bundle.defer(label, move || order.lock().push(label));
        };

        let mut inner = DisposerBundle::new("inner");
        push(&mut inner, "b");
        let mut outer = DisposerBundle::new("outer");
        push(&mut outer, "a");
        outer.nest(inner);
        push(&mut outer, "c");

        assert_eq!(outer.labels(), vec!["a", "b", "c"]);
        outer.dispose();
        assert_eq!(*order.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn failures_do_not_stop_teardown() {
        let hits = counter();
        let mut bundle = DisposerBundle::new("node");
        counting(&mut bundle, "first", &hits);
        bundle.defer_fallible("broken", || Err(GraphError::NodeNotFound("x".into())));
        bundle.defer("panicky", || panic!("unit already gone"));
        counting(&mut bundle, "last", &hits);

        let report = bundle.dispose();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(report.completed, 2);
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures.iter().all(GraphError::is_teardown));

        match &report.failures[1] {
            GraphError::DisposalActionFailed { scope, action, reason } => {
                assert_eq!(scope, "node");
                assert_eq!(action, "panicky");
                assert!(reason.contains("unit already gone"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn drop_disposes_pending_actions() {
        let hits = counter();
        {
            let mut bundle = DisposerBundle::new("scoped");
            counting(&mut bundle, "a", &hits);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_after_dispose_does_not_rerun() {
        let hits = counter();
        let mut bundle = DisposerBundle::new("scoped");
        counting(&mut bundle, "a", &hits);
        bundle.dispose();
        drop(bundle);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
