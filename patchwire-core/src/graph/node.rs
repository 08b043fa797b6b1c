//! Graph Nodes
//!
//! A [`Node`] is an independently instantiable processing unit with named
//! ports. Its lifecycle is tracked by a [`NodeHandle`]:
//!
//! ```text
//!  Instantiated --connect--> Connected --disconnect--> Disconnected
//!                               ^                           |
//!                               +---------connect-----------+
//! ```
//!
//! Instantiation builds the node's cells, units and ports but wires nothing.
//! `connect` runs the node's hook, which performs all wiring and returns a
//! [`DisposerBundle`] recording how to undo it. `disconnect` disposes that
//! bundle. Releasing a handle severs every connection still touching the
//! node's ports.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use super::port::Port;
use crate::context::AudioContext;
use crate::dispose::{DisposalReport, DisposerBundle};
use crate::error::{GraphError, Result};

/// Unique identifier for a node instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// A processing unit that can be placed in a graph.
pub trait Node: Send {
    /// The catalog name this node was created under.
    fn type_name(&self) -> &'static str;

    /// Every port the node currently exposes.
    fn ports(&self) -> Vec<Port>;

    fn port(&self, name: &str) -> Option<Port> {
        self.ports().into_iter().find(|port| port.name() == name)
    }

    /// Wire the node's internals. Everything acquired here must be recorded
    /// in the returned bundle.
    fn on_connect(&mut self, ctx: &AudioContext) -> Result<DisposerBundle>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Instantiated,
    Connected,
    Disconnected,
}

/// Owns a node and its lifecycle.
pub struct NodeHandle {
    id: NodeId,
    label: String,
    node: Box<dyn Node>,
    disposer: Option<DisposerBundle>,
    state: LifecycleState,
}

impl NodeHandle {
    pub fn new(node: Box<dyn Node>, label: impl Into<String>) -> Self {
        let id = NodeId::new();
        let label = label.into();
        debug!(%id, node_type = node.type_name(), %label, "node instantiated");
        Self {
            id,
            label,
            node,
            disposer: None,
            state: LifecycleState::Instantiated,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn type_name(&self) -> &'static str {
        self.node.type_name()
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.disposer.is_some()
    }

    pub fn node(&self) -> &dyn Node {
        self.node.as_ref()
    }

    pub fn node_mut(&mut self) -> &mut dyn Node {
        self.node.as_mut()
    }

    pub fn downcast_ref<T: Node + 'static>(&self) -> Option<&T> {
        self.node.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Node + 'static>(&mut self) -> Option<&mut T> {
        self.node.as_any_mut().downcast_mut::<T>()
    }

    pub fn ports(&self) -> Vec<Port> {
        self.node.ports()
    }

    pub fn port(&self, name: &str) -> Option<Port> {
        self.node.port(name)
    }

    /// Run the node's connect hook.
    ///
    /// Fails with `DoubleConnect` if already connected. If the hook fails,
    /// the node stays in its previous state.
    pub fn connect(&mut self, ctx: &AudioContext) -> Result<()> {
        if self.disposer.is_some() {
            return Err(GraphError::DoubleConnect {
                node: self.describe(),
            });
        }
        let bundle = self.node.on_connect(ctx)?;
        debug!(id = %self.id, actions = bundle.len(), "node connected");
        self.disposer = Some(bundle);
        self.state = LifecycleState::Connected;
        Ok(())
    }

    /// Undo everything `connect` wired. A no-op when not connected.
    pub fn disconnect(&mut self) -> DisposalReport {
        let Some(mut bundle) = self.disposer.take() else {
            return DisposalReport::default();
        };
        let report = bundle.dispose();
        self.state = LifecycleState::Disconnected;
        if report.is_clean() {
            debug!(id = %self.id, completed = report.completed, "node disconnected");
        } else {
            warn!(id = %self.id, failed = report.failures.len(), "node disconnected with failures");
        }
        report
    }

    /// Sever every connection touching the node's ports. Returns how many
    /// were live.
    pub fn detach_ports(&self) -> usize {
        self.node.ports().iter().map(Port::detach_all).sum()
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.id, self.label)
    }
}

impl Drop for NodeHandle {
    fn drop(&mut self) {
        self.disconnect();
        let severed = self.detach_ports();
        debug!(id = %self.id, severed, "node released");
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHandle")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("type", &self.type_name())
            .field("state", &self.state)
            .finish()
    }
}
