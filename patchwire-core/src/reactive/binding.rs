//! Parameter Bindings
//!
//! A binding is a standing link that makes a control cell drive either a
//! native processing parameter or another control cell.
//!
//! # Contract
//!
//! 1. `bind` applies the source's current value to the target immediately.
//! 2. Every later write to the source re-applies the stored (clamped) value
//!    to the target before the write returns.
//! 3. A target has at most one driver. Binding onto a driven target fails
//!    with `AlreadyDriven`; the earlier binding must be unbound first.
//! 4. Cell-to-cell bindings that would let a write reach its own source are
//!    rejected with `CyclicBinding` before anything is registered.
//!
//! The returned [`Unbinder`] removes the link. Unbinding twice is a no-op,
//! and dropping an unbinder unbinds.

use std::fmt;

use tracing::trace;

use super::cell::{ControlCell, WeakCell};
use super::subscriber::{Subscriber, SubscriberId};
use crate::dispose::Disposable;
use crate::error::{GraphError, Result};
use crate::graph::AudioParam;

/// What a binding drives.
#[derive(Clone, Debug)]
pub enum BindTarget {
    Param(AudioParam),
    Cell(ControlCell),
}

impl BindTarget {
    fn label(&self) -> &str {
        match self {
            BindTarget::Param(param) => param.name(),
            BindTarget::Cell(cell) => cell.label(),
        }
    }

    fn claim(&self, binding: SubscriberId) -> Result<()> {
        match self {
            BindTarget::Param(param) => param.claim_driver(binding),
            BindTarget::Cell(cell) => cell.claim_driver(binding),
        }
    }
}

impl From<AudioParam> for BindTarget {
    fn from(param: AudioParam) -> Self {
        BindTarget::Param(param)
    }
}

impl From<ControlCell> for BindTarget {
    fn from(cell: ControlCell) -> Self {
        BindTarget::Cell(cell)
    }
}

impl From<&AudioParam> for BindTarget {
    fn from(param: &AudioParam) -> Self {
        BindTarget::Param(param.clone())
    }
}

impl From<&ControlCell> for BindTarget {
    fn from(cell: &ControlCell) -> Self {
        BindTarget::Cell(cell.clone())
    }
}

/// The target as held by a live binding. Cells are held weakly so that a
/// binding never keeps a torn-down cell alive.
enum HeldTarget {
    Param(AudioParam),
    Cell(WeakCell),
}

/// Bind `source` so that it drives `target`.
pub fn bind(source: &ControlCell, target: impl Into<BindTarget>) -> Result<Unbinder> {
    let target = target.into();
    let binding = SubscriberId::new();

    if let BindTarget::Cell(cell) = &target {
        if cell.id() == source.id() || cell.reaches(source.id()) {
            return Err(GraphError::CyclicBinding {
                source_cell: source.label().to_string(),
                target: cell.label().to_string(),
            });
        }
    }
    target.claim(binding)?;

    let held = match &target {
        BindTarget::Param(param) => {
            param.set(source.get_untracked());
            let driven = param.clone();
            source.subscribe(Subscriber::with_id(binding, move |value| driven.set(value)));
            HeldTarget::Param(param.clone())
        }
        BindTarget::Cell(cell) => {
            cell.set(source.get_untracked());
            source.add_downstream(binding, cell);
            let weak = cell.downgrade();
            source.subscribe(Subscriber::with_id(binding, move |value| {
                if let Some(cell) = weak.upgrade() {
                    cell.set(value);
                }
            }));
            HeldTarget::Cell(cell.downgrade())
        }
    };

    trace!(source = %source.label(), target = %target.label(), %binding, "bound");

    Ok(Unbinder {
        binding,
        source: source.downgrade(),
        target: Some(held),
    })
}

/// Removes a binding. Returned by [`bind`].
#[must_use = "dropping an Unbinder removes the binding immediately"]
pub struct Unbinder {
    binding: SubscriberId,
    source: WeakCell,
    target: Option<HeldTarget>,
}

impl Unbinder {
    pub fn id(&self) -> SubscriberId {
        self.binding
    }

    pub fn is_bound(&self) -> bool {
        self.target.is_some()
    }

    /// Remove the binding. Returns `false` if it was already removed.
    pub fn unbind(&mut self) -> bool {
        let Some(target) = self.target.take() else {
            return false;
        };

        if let Some(source) = self.source.upgrade() {
            source.unsubscribe(self.binding);
            source.remove_downstream(self.binding);
        }
        match target {
            HeldTarget::Param(param) => param.release_driver(self.binding),
            HeldTarget::Cell(weak) => {
                if let Some(cell) = weak.upgrade() {
                    cell.release_driver(self.binding);
                }
            }
        }
        trace!(binding = %self.binding, "unbound");
        true
    }
}

impl Disposable for Unbinder {
    fn dispose(&mut self) -> Result<()> {
        self.unbind();
        Ok(())
    }
}

impl Drop for Unbinder {
    fn drop(&mut self) {
        self.unbind();
    }
}

impl fmt::Debug for Unbinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unbinder")
            .field("binding", &self.binding)
            .field("bound", &self.is_bound())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::ControlRange;

    fn cell(label: &str, min: f32, max: f32, default: f32) -> ControlCell {
        ControlCell::new(label, ControlRange::new(min, max, default)).unwrap()
    }

    #[test]
    fn binding_applies_current_value_immediately() {
        let drive = cell("drive", 0.0, 24.0, 6.0);
        let gain = AudioParam::new("gain", 1.0);

        let _unbind = bind(&drive, &gain).unwrap();
        assert_eq!(gain.get(), 6.0);
    }

    #[test]
    fn writes_reach_parameter_clamped() {
        let drive = cell("drive", 0.0, 24.0, 0.0);
        let gain = AudioParam::new("gain", 1.0);
        let _unbind = bind(&drive, &gain).unwrap();

        drive.set(30.0);
        assert_eq!(gain.get(), 24.0);
        drive.set(-5.0);
        assert_eq!(gain.get(), 0.0);
    }

    #[test]
    fn unbind_is_idempotent_and_stops_propagation() {
        let drive = cell("drive", 0.0, 24.0, 0.0);
        let gain = AudioParam::new("gain", 1.0);
        let mut unbind = bind(&drive, &gain).unwrap();

        assert!(unbind.unbind());
        assert!(!unbind.unbind());
        drive.set(10.0);
        assert_eq!(gain.get(), 0.0);
        assert!(!gain.is_driven());
        assert_eq!(drive.subscriber_count(), 0);
    }

    #[test]
    fn second_driver_is_rejected_until_unbound() {
        let a = cell("a", 0.0, 1.0, 0.2);
        let b = cell("b", 0.0, 1.0, 0.8);
        let gain = AudioParam::new("gain", 0.0);

        let mut first = bind(&a, &gain).unwrap();
        let err = bind(&b, &gain).unwrap_err();
        assert!(matches!(err, GraphError::AlreadyDriven { .. }));
        assert_eq!(b.subscriber_count(), 0);

        first.unbind();
        let _second = bind(&b, &gain).unwrap();
        assert_eq!(gain.get(), 0.8);
    }

    #[test]
    fn chained_cells_propagate_synchronously() {
        let a = cell("a", 0.0, 10.0, 0.0);
        let b = cell("b", 0.0, 5.0, 0.0);
        let param = AudioParam::new("c", 0.0);

        let _ab = bind(&a, &b).unwrap();
        let _bc = bind(&b, &param).unwrap();

        a.set(3.0);
        assert_eq!(b.get(), 3.0);
        assert_eq!(param.get(), 3.0);

        // b clamps on its own range.
        a.set(8.0);
        assert_eq!(b.get(), 5.0);
        assert_eq!(param.get(), 5.0);
    }

    #[test]
    fn self_binding_is_cyclic() {
        let a = cell("a", 0.0, 1.0, 0.0);
        let err = bind(&a, &a).unwrap_err();
        assert!(matches!(err, GraphError::CyclicBinding { .. }));
        assert_eq!(a.subscriber_count(), 0);
        assert!(!a.is_driven());
    }

    #[test]
    fn transitive_cycle_is_rejected() {
        let a = cell("a", 0.0, 1.0, 0.0);
        let b = cell("b", 0.0, 1.0, 0.0);
        let c = cell("c", 0.0, 1.0, 0.0);

        let _ab = bind(&a, &b).unwrap();
        let _bc = bind(&b, &c).unwrap();
        let err = bind(&c, &a).unwrap_err();
        assert!(matches!(err, GraphError::CyclicBinding { .. }));
        assert_eq!(c.subscriber_count(), 0);
    }

    #[test]
    fn cycle_check_forgets_removed_links() {
        let a = cell("a", 0.0, 1.0, 0.0);
        let b = cell("b", 0.0, 1.0, 0.0);

        let mut ab = bind(&a, &b).unwrap();
        assert!(bind(&b, &a).is_err());
        ab.unbind();
        let _ba = bind(&b, &a).unwrap();
    }

    #[test]
    fn dropping_unbinder_unbinds() {
        let a = cell("a", 0.0, 1.0, 0.0);
        let gain = AudioParam::new("gain", 0.0);
        {
            let _unbind = bind(&a, &gain).unwrap();
            assert!(gain.is_driven());
        }
        assert!(!gain.is_driven());
        a.set(1.0);
        assert_eq!(gain.get(), 0.0);
    }

    #[test]
    fn dropped_target_cell_is_not_kept_alive() {
        let a = cell("a", 0.0, 1.0, 0.0);
        let b = cell("b", 0.0, 1.0, 0.0);
        let weak = b.downgrade();
        let _unbind = bind(&a, &b).unwrap();
        drop(b);
        assert!(weak.upgrade().is_none());
        a.set(1.0);
    }
}
