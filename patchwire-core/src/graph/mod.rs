//! Node Graph
//!
//! This module implements the structure that audio flows through: nodes,
//! their typed ports, and the connections between them.
//!
//! # Overview
//!
//! - [`Node`]s expose [`Port`]s. A port is either a signal port (fronting a
//!   [`SignalUnit`]) or a control port (fronting a control cell).
//! - [`connect`] links an output port to an input port of the same kind.
//!   Signal links pipe units together; control links bind cells.
//! - [`NodeHandle`] tracks a node's lifecycle and owns the disposer bundle
//!   produced by its connect hook.
//! - [`Graph`] owns handles and connections and is the usual entry point.
//!
//! # Planes
//!
//! The control plane (cells, bindings, effects) runs on the caller's thread
//! and is synchronous. The processing plane reads [`AudioParam`]s and
//! published tables without locking; the only state it shares with the
//! control plane is atomics and `ArcSwap` pointers.

mod connection;
mod node;
mod param;
mod patch;
mod port;
mod unit;

pub use connection::{connect, Connection, ConnectionId};
pub use node::{LifecycleState, Node, NodeHandle, NodeId};
pub use param::AudioParam;
pub use patch::{Graph, Link};
pub use port::{Endpoint, Port, PortDirection, PortId, PortKind};
pub use unit::{pipe, ConstantKernel, GainKernel, Kernel, LinkId, PassKernel, Pipe, SignalUnit};
