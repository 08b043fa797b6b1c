//! Reactive Primitives
//!
//! This module implements the control plane's reactive layer: control cells,
//! bindings and effects.
//!
//! # Concepts
//!
//! ## Control Cells
//!
//! A [`ControlCell`] holds a scalar with an optional clamp range and a
//! default. Every write is clamped, stored, and then pushed synchronously to
//! all subscribers in registration order.
//!
//! ## Bindings
//!
//! [`bind`] makes a cell drive a native [`AudioParam`](crate::graph::AudioParam)
//! or another cell. A target accepts a single driver, and cell chains that
//! would loop back on themselves are rejected up front.
//!
//! ## Effects
//!
//! An [`Effect`] re-runs whenever a cell it read changes. Dependencies are
//! discovered by running the effect inside a tracking context, so an effect
//! only reacts to what it actually used on its last run.
//!
//! # Implementation Notes
//!
//! Propagation is fully synchronous: there is no batching and no deferred
//! queue. A thread-local propagation stack stops a cell from re-propagating
//! a write that originated from its own notification pass.

mod binding;
mod cell;
mod context;
mod effect;
mod subscriber;

pub use binding::{bind, BindTarget, Unbinder};
pub use cell::{CellId, ControlCell, ControlRange, WeakCell};
pub use context::{PropagationGuard, ReactiveContext};
pub use effect::Effect;
pub use subscriber::{Notifier, Subscriber, SubscriberId};
