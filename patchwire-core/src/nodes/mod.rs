//! Built-in nodes and the catalog that creates them by name.

mod constant;
mod gain;
mod keyboard;
mod saturator;

pub use constant::ConstantNode;
pub use gain::GainNode;
pub use keyboard::{KeyNode, KeyboardNode};
pub use saturator::SaturatorNode;

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

use crate::config::NodeConfig;
use crate::context::AudioContext;
use crate::error::{GraphError, Result};
use crate::graph::Node;
use crate::reactive::{ControlCell, ControlRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeCategory {
    /// Produces signal from nothing.
    Generator,
    /// Transforms signal.
    Processor,
    /// Produces control values.
    Controller,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeDescriptor {
    pub type_name: &'static str,
    pub display_name: &'static str,
    pub category: NodeCategory,
}

/// Builds a node from the context and its settings. Must not wire anything.
pub type NodeFactory =
    Arc<dyn Fn(&AudioContext, &NodeConfig) -> Result<Box<dyn Node>> + Send + Sync>;

/// Node types by name, in registration order.
#[derive(Default)]
pub struct NodeCatalog {
    entries: IndexMap<&'static str, (NodeDescriptor, NodeFactory)>,
}

impl NodeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog with `constant`, `gain`, `saturator` and `keyboard`.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog.register(
            NodeDescriptor {
                type_name: ConstantNode::TYPE_NAME,
                display_name: "Constant",
                category: NodeCategory::Generator,
            },
            |_, config| Ok(Box::new(ConstantNode::new(config)?)),
        );
        catalog.register(
            NodeDescriptor {
                type_name: GainNode::TYPE_NAME,
                display_name: "Gain",
                category: NodeCategory::Processor,
            },
            |_, config| Ok(Box::new(GainNode::new(config)?)),
        );
        catalog.register(
            NodeDescriptor {
                type_name: SaturatorNode::TYPE_NAME,
                display_name: "Saturator",
                category: NodeCategory::Processor,
            },
            |ctx, config| Ok(Box::new(SaturatorNode::new(ctx, config)?)),
        );
        catalog.register(
            NodeDescriptor {
                type_name: KeyboardNode::TYPE_NAME,
                display_name: "Keyboard",
                category: NodeCategory::Controller,
            },
            |ctx, config| Ok(Box::new(KeyboardNode::new(ctx, config)?)),
        );
        catalog
    }

    /// Register a node type. A later registration under the same name
    /// replaces the earlier one.
    pub fn register<F>(&mut self, descriptor: NodeDescriptor, factory: F)
    where
        F: Fn(&AudioContext, &NodeConfig) -> Result<Box<dyn Node>> + Send + Sync + 'static,
    {
        debug!(node_type = descriptor.type_name, "node type registered");
        self.entries
            .insert(descriptor.type_name, (descriptor, Arc::new(factory)));
    }

    pub fn create(
        &self,
        type_name: &str,
        ctx: &AudioContext,
        config: &NodeConfig,
    ) -> Result<Box<dyn Node>> {
        let (_, factory) = self
            .entries
            .get(type_name)
            .ok_or_else(|| GraphError::UnknownNodeType(type_name.to_string()))?;
        factory(ctx, config)
    }

    pub fn descriptor(&self, type_name: &str) -> Option<&NodeDescriptor> {
        self.entries.get(type_name).map(|(descriptor, _)| descriptor)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &NodeDescriptor> {
        self.entries.values().map(|(descriptor, _)| descriptor)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.entries.contains_key(type_name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for NodeCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}

/// A cell named `key` whose initial value comes from `config` when set.
pub(crate) fn control_cell(
    config: &NodeConfig,
    key: &str,
    range: ControlRange,
) -> Result<ControlCell> {
    let cell = ControlCell::new(key, range)?;
    if let Some(initial) = config.f32(key)? {
        cell.set(initial);
    }
    Ok(cell)
}
