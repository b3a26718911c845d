//! Stable ID newtypes and compact handles.
//!
//! All IDs are distinct newtype wrappers over `u32`, so a `NodeId` cannot be
//! used where a `PinId` is expected. IDs are allocated from persisted
//! counters starting at 1 and are never reused inside a graph, which is what
//! makes a stale handle detectable: it simply fails to resolve.
//!
//! Compact handles ([`NodeCompact`], [`PinCompact`], [`HierNode`]) qualify an
//! ID with its graph (and hierarchy position). They are small, `Copy`, and
//! have fixed-width encodings so they can be stored as table keys.

use std::fmt;

use lgdb_store::{mix64, FieldReader, FieldWriter, FixedCodec, MapKey};
use serde::{Deserialize, Serialize};

/// Graph identity inside a library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct GraphId(pub u32);

/// Node identity inside one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// Pin identity inside one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct PinId(pub u32);

/// Edge identity inside one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct EdgeId(pub u32);

impl NodeId {
    /// Boundary node owning the graph input driver pins.
    pub const GRAPH_INPUT: NodeId = NodeId(1);
    /// Boundary node owning the graph output sink pins.
    pub const GRAPH_OUTPUT: NodeId = NodeId(2);
    /// First id handed out to a regular node.
    pub const FIRST: NodeId = NodeId(3);

    pub fn is_graph_io(self) -> bool {
        self == Self::GRAPH_INPUT || self == Self::GRAPH_OUTPUT
    }
}

macro_rules! id_impls {
    ($($ty:ident),*) => {
        $(
            impl $ty {
                /// The null id. Never allocated.
                pub const NONE: $ty = $ty(0);

                pub fn is_none(self) -> bool {
                    self.0 == 0
                }
            }

            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl FixedCodec for $ty {
                const SIZE: usize = 4;

                fn encode(&self, out: &mut [u8]) {
                    self.0.encode(out);
                }

                fn decode(bytes: &[u8]) -> Self {
                    $ty(u32::decode(bytes))
                }
            }

            impl MapKey for $ty {
                fn key_hash(&self) -> u64 {
                    mix64(self.0 as u64)
                }
            }
        )*
    };
}

id_impls!(GraphId, NodeId, PinId, EdgeId);

/// Direction of a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum PinKind {
    /// Produces a value; may fan out to many sinks.
    #[default]
    Driver,
    /// Consumes a value; fed by at most one driver.
    Sink,
}

impl FixedCodec for PinKind {
    const SIZE: usize = 1;

    fn encode(&self, out: &mut [u8]) {
        out[0] = match self {
            PinKind::Driver => 0,
            PinKind::Sink => 1,
        };
    }

    fn decode(bytes: &[u8]) -> Self {
        if bytes[0] == 1 {
            PinKind::Sink
        } else {
            PinKind::Driver
        }
    }
}

impl MapKey for PinKind {
    fn key_hash(&self) -> u64 {
        mix64(*self as u64 + 1)
    }
}

// ---------------------------------------------------------------------------
// Compact handles
// ---------------------------------------------------------------------------

/// Graph-qualified node handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeCompact {
    pub graph: GraphId,
    pub node: NodeId,
}

/// Graph-qualified pin handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PinCompact {
    pub graph: GraphId,
    pub pin: PinId,
}

/// Index of an entry in a [`Hierarchy`](crate::hierarchy::Hierarchy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct HierIdx(pub u32);

impl HierIdx {
    pub const ROOT: HierIdx = HierIdx(0);

    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }
}

/// A node at a specific position of a hierarchy.
///
/// The same graph node instantiated twice appears as two `HierNode`s that
/// differ only in `hidx`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HierNode {
    pub hidx: HierIdx,
    pub graph: GraphId,
    pub node: NodeId,
}

impl HierNode {
    pub fn compact(self) -> NodeCompact {
        NodeCompact {
            graph: self.graph,
            node: self.node,
        }
    }
}

impl fmt::Display for NodeCompact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}:n{}", self.graph, self.node)
    }
}

impl fmt::Display for PinCompact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}:p{}", self.graph, self.pin)
    }
}

impl fmt::Display for HierNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}:g{}:n{}", self.hidx.0, self.graph, self.node)
    }
}

impl FixedCodec for NodeCompact {
    const SIZE: usize = 8;

    fn encode(&self, out: &mut [u8]) {
        let mut w = FieldWriter::new(out);
        w.put(&self.graph);
        w.put(&self.node);
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut r = FieldReader::new(bytes);
        NodeCompact {
            graph: r.get(),
            node: r.get(),
        }
    }
}

impl MapKey for NodeCompact {
    fn key_hash(&self) -> u64 {
        mix64(((self.graph.0 as u64) << 32) | self.node.0 as u64)
    }
}

impl FixedCodec for PinCompact {
    const SIZE: usize = 8;

    fn encode(&self, out: &mut [u8]) {
        let mut w = FieldWriter::new(out);
        w.put(&self.graph);
        w.put(&self.pin);
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut r = FieldReader::new(bytes);
        PinCompact {
            graph: r.get(),
            pin: r.get(),
        }
    }
}

impl MapKey for PinCompact {
    fn key_hash(&self) -> u64 {
        mix64(((self.graph.0 as u64) << 32) | self.pin.0 as u64)
    }
}
