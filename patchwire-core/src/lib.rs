//! Patchwire Core
//!
//! This crate provides the runtime for a modular audio node graph. It
//! implements:
//!
//! - Control cells: clamped reactive scalars with synchronous propagation
//! - Bindings from cells to native parameters and to other cells
//! - Effects that re-run when the cells they read change
//! - A node lifecycle (instantiate, connect, disconnect, destroy) backed by
//!   disposer bundles
//! - Typed port connections and a small pull-based signal plane
//! - Dynamic sub-node collections with incremental child management
//! - Transfer-table generation for waveshaping
//!
//! # Architecture
//!
//! - `reactive`: control cells, bindings, effects and tracking contexts
//! - `graph`: nodes, ports, connections, signal units and the [`Graph`]
//! - `dispose`: disposer bundles and best-effort teardown
//! - `collection`: sub-node collections
//! - `transfer`: transfer curves, tables and the shaper kernel
//! - `nodes`: built-in node types and the catalog
//! - `events`, `config`, `context`: host input, settings and shared services
//!
//! # Example
//!
//! ```rust,ignore
//! use patchwire_core::{EngineConfig, Graph, NodeConfig, SaturatorNode};
//!
//! let mut graph = Graph::with_config(EngineConfig::default())?;
//! let sat = graph.instantiate("saturator", &NodeConfig::new().with("mode", 2))?;
//! graph.connect_node(sat)?;
//!
//! let node = graph.node_as::<SaturatorNode>(sat).unwrap();
//! node.drive().set(30.0); // clamped to 24
//!
//! graph.disconnect_node(sat);
//! graph.destroy(sat)?;
//! ```

pub mod collection;
pub mod config;
pub mod context;
pub mod dispose;
pub mod error;
pub mod events;
pub mod graph;
pub mod nodes;
pub mod reactive;
pub mod transfer;

pub use collection::{SlotChange, SubNodeCollection};
pub use config::{EngineConfig, NodeConfig};
pub use context::AudioContext;
pub use dispose::{Disposable, DisposalReport, DisposerBundle};
pub use error::{GraphError, Result};
pub use events::{EventBus, EventKind, EventSubscription, InputEvent};
pub use graph::{
    connect, AudioParam, Connection, ConnectionId, Graph, Node, NodeHandle, NodeId, Port,
    PortDirection, PortKind,
};
pub use nodes::{
    ConstantNode, GainNode, KeyNode, KeyboardNode, NodeCatalog, NodeCategory, NodeDescriptor,
    SaturatorNode,
};
pub use reactive::{bind, ControlCell, ControlRange, Effect, Unbinder};
pub use transfer::{TableHandle, TransferMode, TransferParams, TransferRegistry};
