//! Persisted records for nodes, pins, edges and ports.
//!
//! These are the fixed-width values stored in a graph's tables. Adjacency is
//! threaded through the records themselves: every node heads two doubly
//! linked lists of edges (outgoing and incoming) and a singly linked list of
//! its pins, so local traversal never scans a table.

use lgdb_store::{FieldReader, FieldWriter, FixedCodec, TextRef};
use serde::{Deserialize, Serialize};

use crate::id::{EdgeId, GraphId, NodeId, PinId, PinKind};
use crate::op::NodeOp;

// ---------------------------------------------------------------------------
// Public value types
// ---------------------------------------------------------------------------

/// Value carried by a `Const` node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstValue {
    Int { value: u64, bits: u32 },
    Str { text: String, bits: u32 },
}

/// Direction of a graph port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum PortDir {
    #[default]
    Input,
    Output,
}

/// Snapshot of a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinInfo {
    pub id: PinId,
    pub node: NodeId,
    pub port: u32,
    pub kind: PinKind,
    /// 0 = not yet inferred.
    pub bits: u32,
}

/// A declared graph input or output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    pub name: String,
    pub dir: PortDir,
    pub pos: u32,
    pub bits: u32,
    /// Driver pin on the input boundary node, or sink pin on the output one.
    pub pin: PinId,
}

/// One edge as seen from either endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub driver: PinId,
    pub sink: PinId,
    pub driver_node: NodeId,
    pub sink_node: NodeId,
}

// ---------------------------------------------------------------------------
// Stored records
// ---------------------------------------------------------------------------

const CONST_NONE: u8 = 0;
const CONST_INT: u8 = 1;
const CONST_STR: u8 = 2;

/// Constant payload as stored; text still needs resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StoredConst {
    Int(u64),
    Text(TextRef),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct NodeRecord {
    pub op: NodeOp,
    /// Instantiated graph for `Sub` nodes.
    pub sub: GraphId,
    pub const_tag: u8,
    pub const_bits: u32,
    pub const_int: u64,
    /// String constants live in the graph's constant segment.
    pub const_text: TextRef,
    pub first_out: EdgeId,
    pub last_out: EdgeId,
    pub first_inp: EdgeId,
    pub last_inp: EdgeId,
    pub first_pin: PinId,
}

impl NodeRecord {
    pub fn with_op(op: NodeOp) -> Self {
        NodeRecord {
            op,
            ..NodeRecord::default()
        }
    }

    pub fn set_const_int(&mut self, value: u64, bits: u32) {
        self.const_tag = CONST_INT;
        self.const_int = value;
        self.const_bits = bits;
    }

    pub fn set_const_text(&mut self, text: TextRef, bits: u32) {
        self.const_tag = CONST_STR;
        self.const_text = text;
        self.const_bits = bits;
    }

    pub fn clear_const(&mut self) {
        self.const_tag = CONST_NONE;
        self.const_int = 0;
        self.const_text = TextRef::EMPTY;
        self.const_bits = 0;
    }

    /// The stored constant and its width.
    pub fn const_parts(&self) -> Option<(StoredConst, u32)> {
        match self.const_tag {
            CONST_INT => Some((StoredConst::Int(self.const_int), self.const_bits)),
            CONST_STR => Some((StoredConst::Text(self.const_text), self.const_bits)),
            _ => None,
        }
    }
}

impl FixedCodec for NodeRecord {
    const SIZE: usize = 2 + 4 + 1 + 4 + 8 + 8 + 4 * 4 + 4;

    fn encode(&self, out: &mut [u8]) {
        let mut w = FieldWriter::new(out);
        w.put(&self.op);
        w.put(&self.sub);
        w.put(&self.const_tag);
        w.put(&self.const_bits);
        w.put(&self.const_int);
        w.put(&self.const_text);
        w.put(&self.first_out);
        w.put(&self.last_out);
        w.put(&self.first_inp);
        w.put(&self.last_inp);
        w.put(&self.first_pin);
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut r = FieldReader::new(bytes);
        NodeRecord {
            op: r.get(),
            sub: r.get(),
            const_tag: r.get(),
            const_bits: r.get(),
            const_int: r.get(),
            const_text: r.get(),
            first_out: r.get(),
            last_out: r.get(),
            first_inp: r.get(),
            last_inp: r.get(),
            first_pin: r.get(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct PinRecord {
    pub node: NodeId,
    pub port: u32,
    pub kind: PinKind,
    pub bits: u32,
    /// Sinks only: the edge feeding this pin.
    pub driver_edge: EdgeId,
    pub next_pin: PinId,
}

impl PinRecord {
    pub fn info(&self, id: PinId) -> PinInfo {
        PinInfo {
            id,
            node: self.node,
            port: self.port,
            kind: self.kind,
            bits: self.bits,
        }
    }
}

impl FixedCodec for PinRecord {
    const SIZE: usize = 4 + 4 + 1 + 4 + 4 + 4;

    fn encode(&self, out: &mut [u8]) {
        let mut w = FieldWriter::new(out);
        w.put(&self.node);
        w.put(&self.port);
        w.put(&self.kind);
        w.put(&self.bits);
        w.put(&self.driver_edge);
        w.put(&self.next_pin);
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut r = FieldReader::new(bytes);
        PinRecord {
            node: r.get(),
            port: r.get(),
            kind: r.get(),
            bits: r.get(),
            driver_edge: r.get(),
            next_pin: r.get(),
        }
    }
}

/// `(node, port, kind)`: at most one pin per key.
pub(crate) type PinKey = (NodeId, u32, PinKind);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct EdgeRecord {
    pub driver: PinId,
    pub sink: PinId,
    pub driver_node: NodeId,
    pub sink_node: NodeId,
    pub next_out: EdgeId,
    pub prev_out: EdgeId,
    pub next_inp: EdgeId,
    pub prev_inp: EdgeId,
}

impl EdgeRecord {
    pub fn edge(&self, id: EdgeId) -> Edge {
        Edge {
            id,
            driver: self.driver,
            sink: self.sink,
            driver_node: self.driver_node,
            sink_node: self.sink_node,
        }
    }
}

impl FixedCodec for EdgeRecord {
    const SIZE: usize = 4 * 8;

    fn encode(&self, out: &mut [u8]) {
        let mut w = FieldWriter::new(out);
        w.put(&self.driver);
        w.put(&self.sink);
        w.put(&self.driver_node);
        w.put(&self.sink_node);
        w.put(&self.next_out);
        w.put(&self.prev_out);
        w.put(&self.next_inp);
        w.put(&self.prev_inp);
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut r = FieldReader::new(bytes);
        EdgeRecord {
            driver: r.get(),
            sink: r.get(),
            driver_node: r.get(),
            sink_node: r.get(),
            next_out: r.get(),
            prev_out: r.get(),
            next_inp: r.get(),
            prev_inp: r.get(),
        }
    }
}

impl FixedCodec for PortDir {
    const SIZE: usize = 1;

    fn encode(&self, out: &mut [u8]) {
        out[0] = match self {
            PortDir::Input => 0,
            PortDir::Output => 1,
        };
    }

    fn decode(bytes: &[u8]) -> Self {
        if bytes[0] == 1 {
            PortDir::Output
        } else {
            PortDir::Input
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct PortRecord {
    pub dir: PortDir,
    pub pos: u32,
    pub pin: PinId,
    /// Outputs only: driver pin on the output boundary node.
    pub driver: PinId,
}

impl FixedCodec for PortRecord {
    const SIZE: usize = 1 + 4 + 4 + 4;

    fn encode(&self, out: &mut [u8]) {
        let mut w = FieldWriter::new(out);
        w.put(&self.dir);
        w.put(&self.pos);
        w.put(&self.pin);
        w.put(&self.driver);
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut r = FieldReader::new(bytes);
        PortRecord {
            dir: r.get(),
            pos: r.get(),
            pin: r.get(),
            driver: r.get(),
        }
    }
}
