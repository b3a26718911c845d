//! Error types for lgdb-core.
//!
//! Graph mutations that would break a netlist invariant (self loops, a sink
//! with two drivers, mutating a boundary node) are rejected with a
//! [`GraphError`] and leave the graph untouched. Lookup misses are not errors;
//! they surface as `Option`/`bool`.

use thiserror::Error;

use lgdb_store::StoreError;

use crate::id::{GraphId, HierNode, NodeId, PinId, PinKind};
use crate::op::NodeOp;

/// Errors produced by graph and library operations.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Snapshot serialization failed.
    #[error("snapshot serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Driver and sink pin belong to the same node.
    #[error("self loop on node {node}")]
    SelfLoop { node: NodeId },

    #[error("node not found: {node}")]
    NodeNotFound { node: NodeId },

    #[error("pin not found: {pin}")]
    PinNotFound { pin: PinId },

    /// A sink was passed where a driver is required, or the reverse.
    #[error("pin {pin} is not a {expected:?} pin")]
    WrongPinKind { pin: PinId, expected: PinKind },

    /// The sink already has a different driver; remove that edge first.
    #[error("sink pin {sink} is already driven")]
    SinkAlreadyDriven { sink: PinId },

    /// A port with this name or position already exists.
    #[error("duplicate graph port '{name}'")]
    DuplicatePort { name: String },

    #[error("graph '{name}' already exists")]
    GraphExists { name: String },

    #[error("graph not found: {id}")]
    GraphNotFound { id: GraphId },

    /// The graph is registered but not open in this library.
    #[error("graph {id} is not loaded")]
    GraphNotLoaded { id: GraphId },

    /// A graph instantiates itself, directly or through its sub graphs.
    #[error("graph {graph} instantiates itself")]
    RecursiveHierarchy { graph: GraphId },

    #[error("node {node} is not a sub graph instance")]
    NotAnInstance { node: NodeId },

    /// The graph boundary nodes cannot be retyped, renamed away or deleted.
    #[error("node {node} is a graph boundary node")]
    ReservedNode { node: NodeId },

    #[error("node {node} cannot be given an empty name")]
    EmptyName { node: NodeId },

    /// Only the boundary nodes carry this op.
    #[error("op {op:?} cannot be assigned to a regular node")]
    ReservedOp { op: NodeOp },
}

/// A dependency that a topological order fails to respect.
///
/// For a forward order `driver` must come before `sink`; for a backward
/// order `sink` must come before `driver`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("order violation: {driver} -> {sink}")]
pub struct OrderViolation {
    pub driver: HierNode,
    pub sink: HierNode,
}
