//! Persistent netlist graphs with hierarchical traversal.
//!
//! - [`Graph`]: one netlist (nodes, pins, edges, ports) stored in mmap tables
//! - [`Library`]: graphs under one root directory, addressed by name
//! - [`HierView`]: a top graph with its instances expanded
//! - [`TopoIter`]: forward/backward topological iteration over a view

pub mod error;
pub mod graph;
pub mod hierarchy;
pub mod id;
pub mod library;
pub mod node;
pub mod op;
pub mod snapshot;
pub mod topo;
pub mod traverse;

// Re-export commonly used types
pub use error::{GraphError, OrderViolation};
pub use graph::{EdgeIter, Graph};
pub use hierarchy::{HierEntry, Hierarchy};
pub use id::{
    EdgeId, GraphId, HierIdx, HierNode, NodeCompact, NodeId, PinCompact, PinId, PinKind,
};
pub use library::Library;
pub use node::{ConstValue, Edge, PinInfo, PortDir, PortInfo};
pub use op::NodeOp;
pub use snapshot::{GraphSnapshot, NetlistGraph, NodeSnapshot};
pub use topo::{validate_backward, validate_forward, TopoIter};
pub use traverse::{HierView, Neighbours};

pub use lgdb_store::StoreConfig;
