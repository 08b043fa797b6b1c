//! Error types for the graph runtime.
//!
//! Structural errors (`KindMismatch`, `DirectionMismatch`, `CyclicBinding`,
//! `DoubleConnect`, ...) are returned before anything is mutated, so the
//! graph is left exactly as it was. `DisposalActionFailed` is never returned
//! from a disposal call; it is logged and collected into a
//! [`DisposalReport`](crate::dispose::DisposalReport).

use thiserror::Error;

use crate::graph::{PortDirection, PortKind};

/// Errors produced by the graph runtime.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    /// A port was used where a port of another kind is required.
    #[error("{output} port '{output_port}' cannot feed {input} port '{input_port}'")]
    KindMismatch {
        output_port: String,
        output: PortKind,
        input_port: String,
        input: PortKind,
    },

    /// The source is not an output or the destination is not an input.
    #[error("port '{port}' is an {actual} port, expected {expected}")]
    DirectionMismatch {
        port: String,
        expected: PortDirection,
        actual: PortDirection,
    },

    /// Binding `source` to `target` would let a write feed back into itself.
    #[error("binding '{source_cell}' to '{target}' would create a cycle")]
    CyclicBinding { source_cell: String, target: String },

    /// `connect` was called on a node that is already connected.
    #[error("node {node} is already connected")]
    DoubleConnect { node: String },

    /// A teardown action failed. Remaining actions still ran.
    #[error("disposal of '{action}' in scope '{scope}' failed: {reason}")]
    DisposalActionFailed {
        scope: String,
        action: String,
        reason: String,
    },

    /// The target already has a binding driving it.
    #[error("'{target}' is already driven by another binding")]
    AlreadyDriven { target: String },

    /// The two signal units are already piped together.
    #[error("'{from}' is already connected to '{to}'")]
    DuplicateConnection { from: String, to: String },

    #[error("node {0} not found")]
    NodeNotFound(String),

    #[error("port '{port}' not found on node {node}")]
    PortNotFound { node: String, port: String },

    #[error("unknown node type '{0}'")]
    UnknownNodeType(String),

    /// `destroy` was called before `disconnect`.
    #[error("node {node} must be disconnected before it is destroyed")]
    StillConnected { node: String },

    #[error("slot index {index} out of range (len {len})")]
    SlotOutOfRange { index: usize, len: usize },

    #[error("invalid range for '{cell}': min {min} > max {max}")]
    InvalidRange { cell: String, min: f32, max: f32 },

    #[error("no transfer function registered for {0}")]
    UnknownTransfer(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GraphError>;

impl GraphError {
    /// Whether the error was produced by best-effort teardown.
    pub fn is_teardown(&self) -> bool {
        matches!(self, GraphError::DisposalActionFailed { .. })
    }
}

impl From<serde_json::Error> for GraphError {
    fn from(error: serde_json::Error) -> Self {
        GraphError::InvalidConfig(error.to_string())
    }
}
