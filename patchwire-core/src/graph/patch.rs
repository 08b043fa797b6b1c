//! The node graph.
//!
//! [`Graph`] owns node handles and the connections between their ports.
//! Structural operations validate first and mutate second: an `Err` means
//! nothing changed.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use super::connection::{connect, Connection, ConnectionId};
use super::node::{Node, NodeHandle, NodeId};
use super::port::{Endpoint, Port, PortDirection, PortId, PortKind};
use crate::config::{EngineConfig, NodeConfig};
use crate::context::AudioContext;
use crate::dispose::DisposalReport;
use crate::error::{GraphError, Result};
use crate::nodes::NodeCatalog;

/// A summary of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Link {
    pub id: ConnectionId,
    pub from: (NodeId, PortId),
    pub to: (NodeId, PortId),
}

pub struct Graph {
    ctx: AudioContext,
    catalog: Arc<NodeCatalog>,
    nodes: IndexMap<NodeId, NodeHandle>,
    connections: IndexMap<ConnectionId, (NodeId, NodeId, Connection)>,
}

impl Graph {
    pub fn new(ctx: AudioContext, catalog: Arc<NodeCatalog>) -> Self {
        info!(
            sample_rate = ctx.sample_rate(),
            block_size = ctx.block_size(),
            node_types = catalog.len(),
            "graph created"
        );
        Self {
            ctx,
            catalog,
            nodes: IndexMap::new(),
            connections: IndexMap::new(),
        }
    }

    /// A graph with the built-in node types.
    pub fn with_config(config: EngineConfig) -> Result<Self> {
        Ok(Self::new(
            AudioContext::new(config)?,
            Arc::new(NodeCatalog::with_builtins()),
        ))
    }

    pub fn context(&self) -> &AudioContext {
        &self.ctx
    }

    pub fn catalog(&self) -> &NodeCatalog {
        &self.catalog
    }

    /// Create a node through the catalog. Nothing is wired yet.
    pub fn instantiate(&mut self, type_name: &str, config: &NodeConfig) -> Result<NodeId> {
        let node = self.catalog.create(type_name, &self.ctx, config)?;
        let label = config.label.clone().unwrap_or_else(|| type_name.to_string());
        Ok(self.insert(node, label))
    }

    /// Adopt a node built outside the catalog.
    pub fn insert(&mut self, node: Box<dyn Node>, label: impl Into<String>) -> NodeId {
        let handle = NodeHandle::new(node, label);
        let id = handle.id();
        self.nodes.insert(id, handle);
        id
    }

    pub fn connect_node(&mut self, id: NodeId) -> Result<()> {
        let ctx = self.ctx.clone();
        self.handle_mut(id)?.connect(&ctx)
    }

    /// Disconnect a node. Unknown ids and repeated calls are no-ops.
    pub fn disconnect_node(&mut self, id: NodeId) -> DisposalReport {
        match self.nodes.get_mut(&id) {
            Some(handle) => handle.disconnect(),
            None => {
                warn!(%id, "disconnect of unknown node ignored");
                DisposalReport::default()
            }
        }
    }

    /// Release a disconnected node and sever the connections touching it.
    pub fn destroy(&mut self, id: NodeId) -> Result<()> {
        let handle = self.handle(id)?;
        if handle.is_connected() {
            return Err(GraphError::StillConnected {
                node: format!("{} ({})", id, handle.label()),
            });
        }
        if let Some(handle) = self.nodes.shift_remove(&id) {
            let severed = handle.detach_ports();
            debug!(%id, severed, "node destroyed");
        }
        self.prune();
        Ok(())
    }

    /// Disconnect then destroy.
    pub fn remove(&mut self, id: NodeId) -> Result<DisposalReport> {
        self.handle(id)?;
        let report = self.disconnect_node(id);
        self.destroy(id)?;
        Ok(report)
    }

    pub fn node(&self, id: NodeId) -> Result<&NodeHandle> {
        self.handle(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeHandle> {
        self.handle_mut(id)
    }

    /// Borrow a node as its concrete type.
    pub fn node_as<T: Node + 'static>(&self, id: NodeId) -> Option<&T> {
        self.nodes.get(&id)?.downcast_ref::<T>()
    }

    pub fn node_as_mut<T: Node + 'static>(&mut self, id: NodeId) -> Option<&mut T> {
        self.nodes.get_mut(&id)?.downcast_mut::<T>()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn port(&self, id: NodeId, name: &str) -> Result<Port> {
        self.handle(id)?
            .port(name)
            .ok_or_else(|| GraphError::PortNotFound {
                node: id.to_string(),
                port: name.to_string(),
            })
    }

    /// Connect an output port of one node to an input port of another.
    pub fn connect(&mut self, from: (NodeId, &str), to: (NodeId, &str)) -> Result<ConnectionId> {
        let output = self.port(from.0, from.1)?;
        let input = self.port(to.0, to.1)?;
        let connection = connect(&output, &input)?;
        let id = connection.id();
        self.prune();
        self.connections.insert(id, (from.0, to.0, connection));
        Ok(id)
    }

    /// Sever a connection. Returns `false` if it is unknown or already severed.
    pub fn sever(&mut self, id: ConnectionId) -> bool {
        match self.connections.shift_remove(&id) {
            Some((_, _, connection)) => connection.sever(),
            None => false,
        }
    }

    /// Live connections in creation order.
    pub fn connections(&self) -> Vec<Link> {
        self.connections
            .values()
            .filter(|(_, _, connection)| connection.is_live())
            .map(|(from, to, connection)| Link {
                id: connection.id(),
                from: (*from, connection.from_port().id()),
                to: (*to, connection.to_port().id()),
            })
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections
            .values()
            .filter(|(_, _, connection)| connection.is_live())
            .count()
    }

    /// Pull one block from a signal output.
    pub fn render(&self, id: NodeId, port: &str, frames: usize) -> Result<Vec<f32>> {
        let port = self.port(id, port)?;
        if port.direction() != PortDirection::Output {
            return Err(GraphError::DirectionMismatch {
                port: port.name().to_string(),
                expected: PortDirection::Output,
                actual: port.direction(),
            });
        }
        match port.endpoint() {
            Endpoint::Signal(unit) => Ok(unit.render(self.ctx.next_block(), frames)),
            Endpoint::Control(_) => Err(GraphError::KindMismatch {
                output_port: port.name().to_string(),
                output: port.kind(),
                input_port: "render".to_string(),
                input: PortKind::Signal,
            }),
        }
    }

    fn prune(&mut self) {
        self.connections.retain(|_, (_, _, connection)| connection.is_live());
    }

    fn handle(&self, id: NodeId) -> Result<&NodeHandle> {
        self.nodes
            .get(&id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))
    }

    fn handle_mut(&mut self, id: NodeId) -> Result<&mut NodeHandle> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))
    }
}

impl Drop for Graph {
    fn drop(&mut self) {
        for (_, _, connection) in self.connections.values() {
            connection.sever();
        }
        for handle in self.nodes.values_mut().rev() {
            handle.disconnect();
        }
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes.len())
            .field("connections", &self.connections.len())
            .finish()
    }
}
