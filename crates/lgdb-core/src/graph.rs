//! Graph: one persisted netlist.
//!
//! A [`Graph`] owns a directory of store tables (or anonymous tables for an
//! in-memory graph) and exposes the netlist mutations: nodes, pins, edges,
//! graph ports, names and constants. Every entity is addressed by an id
//! allocated from a persisted counter, so handles taken before a restart
//! still resolve afterwards and handles to deleted entities stop resolving.
//!
//! # Boundary nodes
//!
//! Every graph has two `GraphIo` nodes that exist from creation:
//! [`NodeId::GRAPH_INPUT`] owns one driver pin per graph input and
//! [`NodeId::GRAPH_OUTPUT`] owns one sink pin (plus a driver twin) per graph
//! output. The pin port number is the port position, which is how instance
//! pins of a `Sub` node line up with the instantiated graph's ports.
//!
//! # Tables
//!
//! | table        | key → value                      |
//! |--------------|----------------------------------|
//! | `meta`       | counter slot → u64               |
//! | `nodes`      | `NodeId` → node record           |
//! | `pins`       | `PinId` → pin record             |
//! | `pin_index`  | `(node, port, kind)` → `PinId`   |
//! | `edges`      | `EdgeId` → edge record           |
//! | `names`      | name → `NodeId`                  |
//! | `node_names` | `NodeId` → name text             |
//! | `ports`      | port name → port record          |
//! | `consts.txt` | string constant text             |

use std::path::{Path, PathBuf};

use lgdb_store::{
    Location, MmapMap, MmapStrMap, StoreConfig, StoreError, TextRef, TextSegment,
};
use tracing::debug;

use crate::error::GraphError;
use crate::id::{EdgeId, GraphId, NodeCompact, NodeId, PinCompact, PinId, PinKind};
use crate::node::{
    ConstValue, Edge, EdgeRecord, NodeRecord, PinInfo, PinKey, PinRecord, PortDir, PortInfo,
    PortRecord, StoredConst,
};
use crate::op::NodeOp;

const META_GRAPH_ID: u32 = 0;
const META_NEXT_NODE: u32 = 1;
const META_NEXT_PIN: u32 = 2;
const META_NEXT_EDGE: u32 = 3;

/// A persisted netlist graph.
#[derive(Debug)]
pub struct Graph {
    id: GraphId,
    name: String,
    dir: Option<PathBuf>,
    meta: MmapMap<u32, u64>,
    nodes: MmapMap<NodeId, NodeRecord>,
    pins: MmapMap<PinId, PinRecord>,
    pin_index: MmapMap<PinKey, PinId>,
    edges: MmapMap<EdgeId, EdgeRecord>,
    names: MmapStrMap<NodeId>,
    node_names: MmapMap<NodeId, TextRef>,
    ports: MmapStrMap<PortRecord>,
    consts: TextSegment,
}

fn table(dir: Option<&Path>, name: &str) -> Location {
    match dir {
        Some(dir) => Location::file(dir, name),
        None => Location::Memory,
    }
}

impl Graph {
    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Creates an empty graph under `dir` (anonymous tables when `None`),
    /// replacing any tables already there.
    pub(crate) fn create(
        dir: Option<&Path>,
        id: GraphId,
        name: &str,
        config: &StoreConfig,
    ) -> Result<Self, GraphError> {
        let mut graph = Graph {
            id,
            name: name.to_string(),
            dir: dir.map(Path::to_path_buf),
            meta: MmapMap::create_at(table(dir, "meta"), config)?,
            nodes: MmapMap::create_at(table(dir, "nodes"), config)?,
            pins: MmapMap::create_at(table(dir, "pins"), config)?,
            pin_index: MmapMap::create_at(table(dir, "pin_index"), config)?,
            edges: MmapMap::create_at(table(dir, "edges"), config)?,
            names: MmapStrMap::create_at(table(dir, "names"), config)?,
            node_names: MmapMap::create_at(table(dir, "node_names"), config)?,
            ports: MmapStrMap::create_at(table(dir, "ports"), config)?,
            consts: TextSegment::create_at(table(dir, "consts.txt"), config)?,
        };
        graph.meta.insert(META_GRAPH_ID, id.0 as u64)?;
        graph.init_boundary()?;
        debug!(graph = name, id = id.0, "created graph");
        Ok(graph)
    }

    /// Opens the graph stored under `dir`. `Ok(None)` if there is none.
    pub(crate) fn open(
        dir: &Path,
        name: &str,
        config: &StoreConfig,
    ) -> Result<Option<Self>, GraphError> {
        let Some(meta) = MmapMap::<u32, u64>::open_at(Location::file(dir, "meta"), config)? else {
            return Ok(None);
        };
        let Some(id) = meta.get(&META_GRAPH_ID) else {
            return Err(StoreError::Corrupt {
                path: dir.join("meta"),
                reason: "graph id missing".into(),
            }
            .into());
        };
        let loc = |name: &str| Location::file(dir, name);
        let mut graph = Graph {
            id: GraphId(id as u32),
            name: name.to_string(),
            dir: Some(dir.to_path_buf()),
            meta,
            nodes: MmapMap::open_or_create_at(loc("nodes"), config)?,
            pins: MmapMap::open_or_create_at(loc("pins"), config)?,
            pin_index: MmapMap::open_or_create_at(loc("pin_index"), config)?,
            edges: MmapMap::open_or_create_at(loc("edges"), config)?,
            names: MmapStrMap::open_or_create_at(loc("names"), config)?,
            node_names: MmapMap::open_or_create_at(loc("node_names"), config)?,
            ports: MmapStrMap::open_or_create_at(loc("ports"), config)?,
            consts: TextSegment::open_or_create_at(loc("consts.txt"), config)?,
        };
        graph.init_boundary()?;
        debug!(
            graph = name,
            id = id,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "opened graph"
        );
        Ok(Some(graph))
    }

    /// A standalone graph backed by anonymous memory.
    pub fn in_memory(id: GraphId, name: &str) -> Result<Self, GraphError> {
        Self::create(None, id, name, &StoreConfig::default())
    }

    fn init_boundary(&mut self) -> Result<(), GraphError> {
        for io in [NodeId::GRAPH_INPUT, NodeId::GRAPH_OUTPUT] {
            if !self.nodes.has(&io) {
                self.nodes.insert(io, NodeRecord::with_op(NodeOp::GraphIo))?;
            }
        }
        Ok(())
    }

    /// Removes every node, pin, edge, name and port. The boundary nodes are
    /// recreated and the id counters keep counting, so ids handed out before
    /// the clear never resolve again.
    pub fn clear(&mut self) -> Result<(), GraphError> {
        self.nodes.clear()?;
        self.pins.clear()?;
        self.pin_index.clear()?;
        self.edges.clear()?;
        self.names.clear()?;
        self.node_names.clear()?;
        self.ports.clear()?;
        self.consts.reset();
        self.init_boundary()?;
        debug!(graph = %self.name, "cleared graph");
        Ok(())
    }

    /// Releases every table and deletes the graph directory.
    pub(crate) fn destroy(mut self) -> Result<(), GraphError> {
        // A second clear on an emptied table releases its file.
        for _ in 0..2 {
            self.meta.clear()?;
            self.nodes.clear()?;
            self.pins.clear()?;
            self.pin_index.clear()?;
            self.edges.clear()?;
            self.names.clear()?;
            self.node_names.clear()?;
            self.ports.clear()?;
        }
        self.consts.release()?;
        if let Some(dir) = self.dir.take() {
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::from(e).into()),
            }
        }
        debug!(graph = %self.name, "destroyed graph");
        Ok(())
    }

    /// Flushes every table to disk.
    pub fn sync(&self) -> Result<(), GraphError> {
        self.meta.sync()?;
        self.nodes.sync()?;
        self.pins.sync()?;
        self.pin_index.sync()?;
        self.edges.sync()?;
        self.names.sync()?;
        self.node_names.sync()?;
        self.ports.sync()?;
        self.consts.flush()?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Identity and counts
    // -----------------------------------------------------------------------

    pub fn id(&self) -> GraphId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Regular nodes, boundary nodes excluded.
    pub fn node_count(&self) -> usize {
        self.nodes.len().saturating_sub(2)
    }

    pub fn pin_count(&self) -> usize {
        self.pins.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Whether the graph has any node besides its boundary nodes. Instances
    /// of a graph without internals are never expanded.
    pub fn has_internals(&self) -> bool {
        self.node_count() > 0
    }

    pub fn node_compact(&self, node: NodeId) -> NodeCompact {
        NodeCompact {
            graph: self.id,
            node,
        }
    }

    pub fn pin_compact(&self, pin: PinId) -> PinCompact {
        PinCompact {
            graph: self.id,
            pin,
        }
    }

    // -----------------------------------------------------------------------
    // Record helpers
    // -----------------------------------------------------------------------

    fn next_id(&mut self, counter: u32, first: u32) -> Result<u32, GraphError> {
        let mut slot = self.meta.entry(counter)?;
        if *slot < first as u64 {
            *slot = first as u64;
        }
        let id = *slot as u32;
        *slot += 1;
        Ok(id)
    }

    fn node_record(&self, node: NodeId) -> Result<NodeRecord, GraphError> {
        self.nodes
            .get(&node)
            .ok_or(GraphError::NodeNotFound { node })
    }

    fn update_node(
        &mut self,
        node: NodeId,
        f: impl FnOnce(&mut NodeRecord),
    ) -> Result<(), GraphError> {
        let mut rec = self.node_record(node)?;
        f(&mut rec);
        self.nodes.insert(node, rec)?;
        Ok(())
    }

    fn pin_record(&self, pin: PinId) -> Result<PinRecord, GraphError> {
        self.pins.get(&pin).ok_or(GraphError::PinNotFound { pin })
    }

    fn update_edge(&mut self, edge: EdgeId, f: impl FnOnce(&mut EdgeRecord)) -> Result<(), GraphError> {
        if let Some(mut rec) = self.edges.get(&edge) {
            f(&mut rec);
            self.edges.insert(edge, rec)?;
        }
        Ok(())
    }

    fn check_regular(node: NodeId) -> Result<(), GraphError> {
        if node.is_graph_io() {
            return Err(GraphError::ReservedNode { node });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Nodes
    // -----------------------------------------------------------------------

    /// Allocates a node with `op`. `NodeOp::Invalid` is allowed and can be
    /// retyped later with [`set_type`](Self::set_type).
    pub fn create_node(&mut self, op: NodeOp) -> Result<NodeId, GraphError> {
        if op.is_graph_io() {
            return Err(GraphError::ReservedOp { op });
        }
        let node = NodeId(self.next_id(META_NEXT_NODE, NodeId::FIRST.0)?);
        self.nodes.insert(node, NodeRecord::with_op(op))?;
        Ok(node)
    }

    /// Allocates an integer constant. The constant is produced on driver pin
    /// 0, whose width is the minimal width of `value`.
    pub fn create_node_const(&mut self, value: u64) -> Result<NodeId, GraphError> {
        let bits = (64 - value.leading_zeros()).max(1);
        let node = self.create_node(NodeOp::Const)?;
        self.update_node(node, |rec| rec.set_const_int(value, bits))?;
        let pin = self.setup_driver_pin(node, 0)?;
        self.set_bits(pin, bits)?;
        Ok(node)
    }

    /// Allocates a string constant of `bits` width.
    pub fn create_node_const_str(&mut self, text: &str, bits: u32) -> Result<NodeId, GraphError> {
        let text_ref = self.consts.append(text)?;
        let node = self.create_node(NodeOp::Const)?;
        self.update_node(node, |rec| rec.set_const_text(text_ref, bits))?;
        let pin = self.setup_driver_pin(node, 0)?;
        self.set_bits(pin, bits)?;
        Ok(node)
    }

    /// Allocates an instance of graph `sub`.
    pub fn create_node_sub(&mut self, sub: GraphId) -> Result<NodeId, GraphError> {
        let node = self.create_node(NodeOp::Sub)?;
        self.update_node(node, |rec| rec.sub = sub)?;
        Ok(node)
    }

    /// Retypes a regular node. Dropping the `Const` or `Sub` op also drops
    /// the constant value or instantiated graph.
    pub fn set_type(&mut self, node: NodeId, op: NodeOp) -> Result<(), GraphError> {
        Self::check_regular(node)?;
        if op.is_graph_io() {
            return Err(GraphError::ReservedOp { op });
        }
        self.update_node(node, |rec| {
            rec.op = op;
            if !op.is_const() {
                rec.clear_const();
            }
            if !op.is_sub() {
                rec.sub = GraphId::NONE;
            }
        })
    }

    /// Points an existing instance at another graph.
    pub fn set_sub_graph(&mut self, node: NodeId, sub: GraphId) -> Result<(), GraphError> {
        if self.node_record(node)?.op != NodeOp::Sub {
            return Err(GraphError::NotAnInstance { node });
        }
        self.update_node(node, |rec| rec.sub = sub)
    }

    pub fn is_valid_node(&self, node: NodeId) -> bool {
        self.nodes.has(&node)
    }

    pub fn node_op(&self, node: NodeId) -> Option<NodeOp> {
        self.nodes.get(&node).map(|rec| rec.op)
    }

    pub fn node_const(&self, node: NodeId) -> Option<ConstValue> {
        let (stored, bits) = self.nodes.get(&node)?.const_parts()?;
        Some(match stored {
            StoredConst::Int(value) => ConstValue::Int { value, bits },
            StoredConst::Text(r) => ConstValue::Str {
                text: self.consts.text(r).to_string(),
                bits,
            },
        })
    }

    /// The graph instantiated by a `Sub` node.
    pub fn sub_graph(&self, node: NodeId) -> Option<GraphId> {
        let rec = self.nodes.get(&node)?;
        (rec.op == NodeOp::Sub && !rec.sub.is_none()).then_some(rec.sub)
    }

    /// Deletes a regular node with its pins, edges and name. The id is never
    /// handed out again.
    pub fn del_node(&mut self, node: NodeId) -> Result<(), GraphError> {
        Self::check_regular(node)?;
        let rec = self.node_record(node)?;
        let edges: Vec<EdgeId> = self
            .out_edges(node)
            .chain(self.inp_edges(node))
            .map(|e| e.id)
            .collect();
        for edge in edges {
            self.unlink_edge(edge)?;
        }
        let mut pin = rec.first_pin;
        while !pin.is_none() {
            let Some(prec) = self.pins.get(&pin) else {
                break;
            };
            self.pin_index.erase(&(prec.node, prec.port, prec.kind));
            self.pins.erase(&pin);
            pin = prec.next_pin;
        }
        self.clear_name(node);
        self.nodes.erase(&node);
        Ok(())
    }

    /// Regular nodes in storage order.
    pub fn fast(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().filter(|node| !node.is_graph_io())
    }

    // -----------------------------------------------------------------------
    // Pins
    // -----------------------------------------------------------------------

    /// Every pin, in storage order.
    pub fn pins(&self) -> impl Iterator<Item = PinInfo> + '_ {
        self.pins.iter().map(|(id, rec)| rec.info(id))
    }

    /// Every edge, in storage order.
    pub fn edges(&self) -> impl Iterator<Item = Edge> + '_ {
        self.edges.iter().map(|(id, rec)| rec.edge(id))
    }


    /// Returns the driver pin `port` of `node`, creating it on first use.
    pub fn setup_driver_pin(&mut self, node: NodeId, port: u32) -> Result<PinId, GraphError> {
        Self::check_regular(node)?;
        self.setup_pin(node, port, PinKind::Driver)
    }

    /// Returns the sink pin `port` of `node`, creating it on first use.
    pub fn setup_sink_pin(&mut self, node: NodeId, port: u32) -> Result<PinId, GraphError> {
        Self::check_regular(node)?;
        self.setup_pin(node, port, PinKind::Sink)
    }

    fn setup_pin(&mut self, node: NodeId, port: u32, kind: PinKind) -> Result<PinId, GraphError> {
        if let Some(pin) = self.pin_index.get(&(node, port, kind)) {
            return Ok(pin);
        }
        let mut rec = self.node_record(node)?;
        let pin = PinId(self.next_id(META_NEXT_PIN, 1)?);
        self.pins.insert(
            pin,
            PinRecord {
                node,
                port,
                kind,
                next_pin: rec.first_pin,
                ..PinRecord::default()
            },
        )?;
        self.pin_index.insert((node, port, kind), pin)?;
        rec.first_pin = pin;
        self.nodes.insert(node, rec)?;
        Ok(pin)
    }

    pub fn find_driver_pin(&self, node: NodeId, port: u32) -> Option<PinId> {
        self.pin_index.get(&(node, port, PinKind::Driver))
    }

    pub fn find_sink_pin(&self, node: NodeId, port: u32) -> Option<PinId> {
        self.pin_index.get(&(node, port, PinKind::Sink))
    }

    pub fn is_valid_pin(&self, pin: PinId) -> bool {
        self.pins.has(&pin)
    }

    pub fn pin(&self, pin: PinId) -> Option<PinInfo> {
        self.pins.get(&pin).map(|rec| rec.info(pin))
    }

    /// Pins of `node`, most recently created first.
    pub fn node_pins(&self, node: NodeId) -> impl Iterator<Item = PinInfo> + '_ {
        let mut next = self
            .nodes
            .get(&node)
            .map(|rec| rec.first_pin)
            .unwrap_or(PinId::NONE);
        std::iter::from_fn(move || {
            if next.is_none() {
                return None;
            }
            let rec = self.pins.get(&next)?;
            let info = rec.info(next);
            next = rec.next_pin;
            Some(info)
        })
    }

    pub fn set_bits(&mut self, pin: PinId, bits: u32) -> Result<(), GraphError> {
        let mut rec = self.pin_record(pin)?;
        rec.bits = bits;
        self.pins.insert(pin, rec)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Graph ports
    // -----------------------------------------------------------------------

    /// Declares graph input `name` at position `pos`. Returns the driver pin
    /// that feeds the graph internals.
    pub fn add_graph_input(&mut self, name: &str, pos: u32, bits: u32) -> Result<PinId, GraphError> {
        if self.ports.has(name) || self.graph_input_at(pos).is_some() {
            return Err(GraphError::DuplicatePort {
                name: name.to_string(),
            });
        }
        let pin = self.setup_pin(NodeId::GRAPH_INPUT, pos, PinKind::Driver)?;
        self.set_bits(pin, bits)?;
        self.ports.insert(
            name,
            PortRecord {
                dir: PortDir::Input,
                pos,
                pin,
                driver: pin,
            },
        )?;
        Ok(pin)
    }

    /// Declares graph output `name` at position `pos`. Returns the sink pin
    /// that collects the output value.
    pub fn add_graph_output(&mut self, name: &str, pos: u32, bits: u32) -> Result<PinId, GraphError> {
        if self.ports.has(name) || self.graph_output_at(pos).is_some() {
            return Err(GraphError::DuplicatePort {
                name: name.to_string(),
            });
        }
        let sink = self.setup_pin(NodeId::GRAPH_OUTPUT, pos, PinKind::Sink)?;
        let driver = self.setup_pin(NodeId::GRAPH_OUTPUT, pos, PinKind::Driver)?;
        self.set_bits(sink, bits)?;
        self.set_bits(driver, bits)?;
        self.ports.insert(
            name,
            PortRecord {
                dir: PortDir::Output,
                pos,
                pin: sink,
                driver,
            },
        )?;
        Ok(sink)
    }

    pub fn get_graph_input(&self, name: &str) -> Option<PinId> {
        self.ports
            .get(name)
            .filter(|port| port.dir == PortDir::Input)
            .map(|port| port.pin)
    }

    pub fn get_graph_output(&self, name: &str) -> Option<PinId> {
        self.ports
            .get(name)
            .filter(|port| port.dir == PortDir::Output)
            .map(|port| port.pin)
    }

    /// The driver twin of output `name`: the value the output presents
    /// inside the graph.
    pub fn get_graph_output_driver(&self, name: &str) -> Option<PinId> {
        self.ports
            .get(name)
            .filter(|port| port.dir == PortDir::Output)
            .map(|port| port.driver)
    }

    pub fn graph_input_at(&self, pos: u32) -> Option<PinId> {
        self.find_driver_pin(NodeId::GRAPH_INPUT, pos)
    }

    pub fn graph_output_at(&self, pos: u32) -> Option<PinId> {
        self.find_sink_pin(NodeId::GRAPH_OUTPUT, pos)
    }

    /// Declared ports, inputs first, each group by position.
    pub fn ports(&self) -> Vec<PortInfo> {
        let mut ports: Vec<PortInfo> = self
            .ports
            .iter()
            .map(|entry| PortInfo {
                name: entry.key.to_string(),
                dir: entry.value.dir,
                pos: entry.value.pos,
                bits: self.pins.get(&entry.value.pin).map_or(0, |p| p.bits),
                pin: entry.value.pin,
            })
            .collect();
        ports.sort_by_key(|port| (port.dir, port.pos));
        ports
    }

    // -----------------------------------------------------------------------
    // Edges
    // -----------------------------------------------------------------------

    /// Connects `driver` to `sink`. Returns `Ok(false)` when that exact edge
    /// already exists.
    ///
    /// Rejected: pins of the wrong kind, deleted pins, both pins on one node,
    /// and a sink that already has a different driver.
    pub fn add_edge(&mut self, driver: PinId, sink: PinId) -> Result<bool, GraphError> {
        let d = self.pin_record(driver)?;
        if d.kind != PinKind::Driver {
            return Err(GraphError::WrongPinKind {
                pin: driver,
                expected: PinKind::Driver,
            });
        }
        let mut s = self.pin_record(sink)?;
        if s.kind != PinKind::Sink {
            return Err(GraphError::WrongPinKind {
                pin: sink,
                expected: PinKind::Sink,
            });
        }
        if d.node == s.node {
            return Err(GraphError::SelfLoop { node: d.node });
        }
        if let Some(existing) = self.edges.get(&s.driver_edge) {
            if existing.driver == driver {
                return Ok(false);
            }
            return Err(GraphError::SinkAlreadyDriven { sink });
        }

        let mut dn = self.node_record(d.node)?;
        let mut sn = self.node_record(s.node)?;
        let id = EdgeId(self.next_id(META_NEXT_EDGE, 1)?);

        if dn.last_out.is_none() {
            dn.first_out = id;
        } else {
            self.update_edge(dn.last_out, |e| e.next_out = id)?;
        }
        if sn.last_inp.is_none() {
            sn.first_inp = id;
        } else {
            self.update_edge(sn.last_inp, |e| e.next_inp = id)?;
        }
        self.edges.insert(
            id,
            EdgeRecord {
                driver,
                sink,
                driver_node: d.node,
                sink_node: s.node,
                next_out: EdgeId::NONE,
                prev_out: dn.last_out,
                next_inp: EdgeId::NONE,
                prev_inp: sn.last_inp,
            },
        )?;
        dn.last_out = id;
        sn.last_inp = id;
        self.nodes.insert(d.node, dn)?;
        self.nodes.insert(s.node, sn)?;
        s.driver_edge = id;
        self.pins.insert(sink, s)?;
        Ok(true)
    }

    /// O(1): a sink has at most one driving edge.
    pub fn has_edge(&self, driver: PinId, sink: PinId) -> bool {
        self.sink_edge(sink).is_some_and(|e| e.driver == driver)
    }

    fn sink_edge(&self, sink: PinId) -> Option<Edge> {
        let pin = self.pins.get(&sink)?;
        self.edges
            .get(&pin.driver_edge)
            .map(|rec| rec.edge(pin.driver_edge))
    }

    /// The driver pin feeding `sink`, if connected.
    pub fn sink_driver(&self, sink: PinId) -> Option<PinId> {
        self.sink_edge(sink).map(|e| e.driver)
    }

    /// Removes the edge `driver → sink`. Returns whether it existed.
    pub fn del_edge(&mut self, driver: PinId, sink: PinId) -> Result<bool, GraphError> {
        match self.sink_edge(sink) {
            Some(edge) if edge.driver == driver => {
                self.unlink_edge(edge.id)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn unlink_edge(&mut self, id: EdgeId) -> Result<(), GraphError> {
        let Some(e) = self.edges.get(&id) else {
            return Ok(());
        };
        let mut dn = self.node_record(e.driver_node)?;
        if e.prev_out.is_none() {
            dn.first_out = e.next_out;
        } else {
            self.update_edge(e.prev_out, |p| p.next_out = e.next_out)?;
        }
        if e.next_out.is_none() {
            dn.last_out = e.prev_out;
        } else {
            self.update_edge(e.next_out, |n| n.prev_out = e.prev_out)?;
        }
        self.nodes.insert(e.driver_node, dn)?;

        let mut sn = self.node_record(e.sink_node)?;
        if e.prev_inp.is_none() {
            sn.first_inp = e.next_inp;
        } else {
            self.update_edge(e.prev_inp, |p| p.next_inp = e.next_inp)?;
        }
        if e.next_inp.is_none() {
            sn.last_inp = e.prev_inp;
        } else {
            self.update_edge(e.next_inp, |n| n.prev_inp = e.prev_inp)?;
        }
        self.nodes.insert(e.sink_node, sn)?;

        if let Some(mut sink) = self.pins.get(&e.sink) {
            sink.driver_edge = EdgeId::NONE;
            self.pins.insert(e.sink, sink)?;
        }
        self.edges.erase(&id);
        Ok(())
    }

    /// Edges leaving `node`, in insertion order.
    pub fn out_edges(&self, node: NodeId) -> EdgeIter<'_> {
        EdgeIter {
            edges: &self.edges,
            next: self.nodes.get(&node).map_or(EdgeId::NONE, |rec| rec.first_out),
            outgoing: true,
        }
    }

    /// Edges entering `node`, in insertion order.
    pub fn inp_edges(&self, node: NodeId) -> EdgeIter<'_> {
        EdgeIter {
            edges: &self.edges,
            next: self.nodes.get(&node).map_or(EdgeId::NONE, |rec| rec.first_inp),
            outgoing: false,
        }
    }

    /// Edges leaving one driver pin.
    pub fn pin_out_edges(&self, pin: PinId) -> impl Iterator<Item = Edge> + '_ {
        let node = self.pins.get(&pin).map_or(NodeId::NONE, |rec| rec.node);
        self.out_edges(node).filter(move |e| e.driver == pin)
    }

    // -----------------------------------------------------------------------
    // Names
    // -----------------------------------------------------------------------

    /// Names `node`. A name identifies one node: giving it to `node` takes it
    /// away from whichever node held it. Names must not be empty.
    pub fn set_name(&mut self, node: NodeId, name: &str) -> Result<(), GraphError> {
        self.node_record(node)?;
        if name.is_empty() {
            return Err(GraphError::EmptyName { node });
        }
        if let Some(holder) = self.names.get(name) {
            if holder == node {
                return Ok(());
            }
            self.node_names.erase(&holder);
        }
        self.clear_name(node);
        self.names.insert(name, node)?;
        if let Some(r) = self.names.find(name).and_then(|pos| self.names.key_ref(pos)) {
            self.node_names.insert(node, r)?;
        }
        Ok(())
    }

    fn clear_name(&mut self, node: NodeId) {
        if let Some(r) = self.node_names.get(&node) {
            let name = self.names.text(r).to_string();
            self.names.erase(&name);
            self.node_names.erase(&node);
        }
    }

    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.names.get(name)
    }

    pub fn node_name(&self, node: NodeId) -> Option<&str> {
        self.node_names.get(&node).map(|r| self.names.text(r))
    }

    /// `<id><mnemonic>` with `:<name>` appended when the node is named.
    /// Boundary nodes read `1i` and `2o`.
    pub fn debug_name(&self, node: NodeId) -> String {
        let mnemonic = match node {
            NodeId::GRAPH_INPUT => "i",
            NodeId::GRAPH_OUTPUT => "o",
            _ => self.node_op(node).unwrap_or_default().mnemonic(),
        };
        match self.node_name(node) {
            Some(name) => format!("{}{}:{}", node, mnemonic, name),
            None => format!("{}{}", node, mnemonic),
        }
    }
}

/// Lazy walk over one of a node's edge lists.
pub struct EdgeIter<'a> {
    edges: &'a MmapMap<EdgeId, EdgeRecord>,
    next: EdgeId,
    outgoing: bool,
}

impl Iterator for EdgeIter<'_> {
    type Item = Edge;

    fn next(&mut self) -> Option<Edge> {
        if self.next.is_none() {
            return None;
        }
        let id = self.next;
        let rec = self.edges.get(&id)?;
        self.next = if self.outgoing {
            rec.next_out
        } else {
            rec.next_inp
        };
        Some(rec.edge(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> Graph {
        Graph::in_memory(GraphId(1), "top").unwrap()
    }

    #[test]
    fn new_graph_has_only_boundary_nodes() {
        let g = graph();
        assert_eq!(g.node_count(), 0);
        assert!(!g.has_internals());
        assert_eq!(g.fast().count(), 0);
        assert_eq!(g.node_op(NodeId::GRAPH_INPUT), Some(NodeOp::GraphIo));
        assert_eq!(g.debug_name(NodeId::GRAPH_OUTPUT), "2o");
    }

    #[test]
    fn node_ids_start_after_boundary_and_are_not_reused() {
        let mut g = graph();
        let a = g.create_node(NodeOp::Sum).unwrap();
        let b = g.create_node(NodeOp::Xor).unwrap();
        assert_eq!(a, NodeId::FIRST);
        assert_eq!(b, NodeId(4));

        g.del_node(b).unwrap();
        assert!(!g.is_valid_node(b));
        let c = g.create_node(NodeOp::Xor).unwrap();
        assert_eq!(c, NodeId(5));
    }

    #[test]
    fn graph_io_op_is_reserved() {
        let mut g = graph();
        assert!(matches!(
            g.create_node(NodeOp::GraphIo),
            Err(GraphError::ReservedOp { .. })
        ));
        assert!(matches!(
            g.set_type(NodeId::GRAPH_INPUT, NodeOp::Sum),
            Err(GraphError::ReservedNode { .. })
        ));
        assert!(matches!(
            g.del_node(NodeId::GRAPH_OUTPUT),
            Err(GraphError::ReservedNode { .. })
        ));
    }

    #[test]
    fn setup_pin_is_idempotent() {
        let mut g = graph();
        let n = g.create_node(NodeOp::And).unwrap();
        let d0 = g.setup_driver_pin(n, 0).unwrap();
        assert_eq!(g.setup_driver_pin(n, 0).unwrap(), d0);
        let s0 = g.setup_sink_pin(n, 0).unwrap();
        assert_ne!(s0, d0);
        assert_eq!(g.find_sink_pin(n, 0), Some(s0));
        assert_eq!(g.find_sink_pin(n, 1), None);
        assert_eq!(g.node_pins(n).count(), 2);
        assert_eq!(g.pin(s0).unwrap().kind, PinKind::Sink);
    }

    #[test]
    fn constants() {
        let mut g = graph();
        let c = g.create_node_const(21).unwrap();
        assert_eq!(
            g.node_const(c),
            Some(ConstValue::Int { value: 21, bits: 5 })
        );
        let pin = g.find_driver_pin(c, 0).unwrap();
        assert_eq!(g.pin(pin).unwrap().bits, 5);

        let s = g.create_node_const_str("yyyy", 4).unwrap();
        assert_eq!(
            g.node_const(s),
            Some(ConstValue::Str {
                text: "yyyy".into(),
                bits: 4
            })
        );

        g.set_type(c, NodeOp::Or).unwrap();
        assert_eq!(g.node_const(c), None);
    }

    #[test]
    fn edges_keep_insertion_order() {
        let mut g = graph();
        let src = g.create_node(NodeOp::Sum).unwrap();
        let d = g.setup_driver_pin(src, 0).unwrap();
        let mut sinks = Vec::new();
        for _ in 0..4 {
            let n = g.create_node(NodeOp::Not).unwrap();
            let s = g.setup_sink_pin(n, 0).unwrap();
            assert!(g.add_edge(d, s).unwrap());
            sinks.push(s);
        }
        let order: Vec<PinId> = g.out_edges(src).map(|e| e.sink).collect();
        assert_eq!(order, sinks);

        // Unlink from the middle, then the tail.
        assert!(g.del_edge(d, sinks[1]).unwrap());
        assert!(g.del_edge(d, sinks[3]).unwrap());
        let order: Vec<PinId> = g.out_edges(src).map(|e| e.sink).collect();
        assert_eq!(order, vec![sinks[0], sinks[2]]);
        assert_eq!(g.edge_count(), 2);
        assert!(!g.has_edge(d, sinks[1]));
        assert_eq!(g.sink_driver(sinks[1]), None);

        let last = g.pin(sinks[3]).unwrap().node;
        let s = g.setup_sink_pin(last, 0).unwrap();
        assert!(g.add_edge(d, s).unwrap());
        let order: Vec<PinId> = g.out_edges(src).map(|e| e.sink).collect();
        assert_eq!(order, vec![sinks[0], sinks[2], sinks[3]]);
    }

    #[test]
    fn self_loop_is_rejected() {
        let mut g = graph();
        let n = g.create_node(NodeOp::Sum).unwrap();
        let d = g.setup_driver_pin(n, 0).unwrap();
        let s = g.setup_sink_pin(n, 0).unwrap();
        assert!(matches!(
            g.add_edge(d, s),
            Err(GraphError::SelfLoop { .. })
        ));
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn duplicate_edge_and_driven_sink() {
        let mut g = graph();
        let a = g.create_node(NodeOp::Sum).unwrap();
        let b = g.create_node(NodeOp::Sum).unwrap();
        let c = g.create_node(NodeOp::Sum).unwrap();
        let da = g.setup_driver_pin(a, 0).unwrap();
        let db = g.setup_driver_pin(b, 0).unwrap();
        let sc = g.setup_sink_pin(c, 0).unwrap();

        assert!(!g.has_edge(da, sc));
        assert!(g.add_edge(da, sc).unwrap());
        assert!(g.has_edge(da, sc));
        assert!(!g.add_edge(da, sc).unwrap());
        assert_eq!(g.edge_count(), 1);

        assert!(matches!(
            g.add_edge(db, sc),
            Err(GraphError::SinkAlreadyDriven { .. })
        ));
        assert!(matches!(
            g.add_edge(sc, da),
            Err(GraphError::WrongPinKind { .. })
        ));
    }

    #[test]
    fn del_node_removes_edges_and_pins() {
        let mut g = graph();
        let a = g.create_node(NodeOp::Sum).unwrap();
        let b = g.create_node(NodeOp::Sum).unwrap();
        let c = g.create_node(NodeOp::Sum).unwrap();
        let ab = g.setup_sink_pin(b, 0).unwrap();
        let da = g.setup_driver_pin(a, 0).unwrap();
        let db = g.setup_driver_pin(b, 0).unwrap();
        let sc = g.setup_sink_pin(c, 0).unwrap();
        g.add_edge(da, ab).unwrap();
        g.add_edge(db, sc).unwrap();
        g.set_name(b, "mid").unwrap();

        g.del_node(b).unwrap();
        assert_eq!(g.edge_count(), 0);
        assert!(!g.is_valid_pin(db));
        assert_eq!(g.out_edges(a).count(), 0);
        assert_eq!(g.inp_edges(c).count(), 0);
        assert_eq!(g.find_node("mid"), None);
        assert_eq!(g.sink_driver(sc), None);
    }

    #[test]
    fn names_move_between_nodes() {
        let mut g = graph();
        let a = g.create_node(NodeOp::Sum).unwrap();
        let b = g.create_node(NodeOp::Mult).unwrap();
        g.set_name(a, "x").unwrap();
        assert_eq!(g.find_node("x"), Some(a));
        assert_eq!(g.debug_name(a), "3sum:x");

        g.set_name(b, "x").unwrap();
        assert_eq!(g.find_node("x"), Some(b));
        assert_eq!(g.node_name(a), None);

        g.set_name(b, "y").unwrap();
        assert_eq!(g.find_node("x"), None);
        assert_eq!(g.node_name(b), Some("y"));
    }

    #[test]
    fn empty_name_is_rejected() {
        let mut g = graph();
        let a = g.create_node(NodeOp::Sum).unwrap();
        g.set_name(a, "acc").unwrap();
        assert!(matches!(
            g.set_name(a, ""),
            Err(GraphError::EmptyName { node }) if node == a
        ));
        assert_eq!(g.node_name(a), Some("acc"));
        assert_eq!(g.debug_name(a), "3sum:acc");
        assert_eq!(g.find_node(""), None);
    }

    #[test]
    fn graph_ports() {
        let mut g = graph();
        let i0 = g.add_graph_input("i0", 0, 1).unwrap();
        let o0 = g.add_graph_output("o0", 0, 8).unwrap();
        assert_eq!(g.get_graph_input("i0"), Some(i0));
        assert_eq!(g.get_graph_output("o0"), Some(o0));
        assert_eq!(g.get_graph_input("o0"), None);
        assert_eq!(g.graph_input_at(0), Some(i0));
        assert_eq!(g.graph_output_at(0), Some(o0));

        let od = g.get_graph_output_driver("o0").unwrap();
        assert_eq!(g.pin(od).unwrap().kind, PinKind::Driver);
        assert_eq!(g.pin(od).unwrap().node, NodeId::GRAPH_OUTPUT);

        assert!(matches!(
            g.add_graph_input("i0", 5, 1),
            Err(GraphError::DuplicatePort { .. })
        ));
        assert!(matches!(
            g.add_graph_output("o1", 0, 1),
            Err(GraphError::DuplicatePort { .. })
        ));

        let ports = g.ports();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].dir, PortDir::Input);
        assert_eq!(ports[1].bits, 8);
    }

    #[test]
    fn ports_connect_through_boundary_nodes() {
        let mut g = graph();
        let i0 = g.add_graph_input("a", 0, 1).unwrap();
        let o0 = g.add_graph_output("y", 0, 1).unwrap();
        let n = g.create_node(NodeOp::Not).unwrap();
        let s = g.setup_sink_pin(n, 0).unwrap();
        let d = g.setup_driver_pin(n, 0).unwrap();
        g.add_edge(i0, s).unwrap();
        g.add_edge(d, o0).unwrap();
        assert_eq!(g.inp_edges(NodeId::GRAPH_OUTPUT).count(), 1);
        assert_eq!(g.pin_out_edges(i0).count(), 1);
    }

    #[test]
    fn clear_keeps_counting() {
        let mut g = graph();
        let a = g.create_node(NodeOp::Sum).unwrap();
        g.add_graph_input("i", 0, 1).unwrap();
        g.clear().unwrap();
        assert!(!g.is_valid_node(a));
        assert!(g.ports().is_empty());
        assert!(g.is_valid_node(NodeId::GRAPH_INPUT));
        let b = g.create_node(NodeOp::Sum).unwrap();
        assert!(b > a);
        g.add_graph_input("i", 0, 1).unwrap();
    }

    #[test]
    fn reopen_restores_everything() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::default();
        let (a, b, clk_sink, clk) = {
            let mut g = Graph::create(Some(dir.path()), GraphId(7), "top", &config).unwrap();
            let i = g.add_graph_input("clk", 0, 1).unwrap();
            let a = g.create_node(NodeOp::FFlop).unwrap();
            let b = g.create_node_const_str("xxx", 3).unwrap();
            let sa = g.setup_sink_pin(a, 0).unwrap();
            let sa1 = g.setup_sink_pin(a, 1).unwrap();
            let db = g.find_driver_pin(b, 0).unwrap();
            g.add_edge(i, sa).unwrap();
            g.add_edge(db, sa1).unwrap();
            g.set_name(a, "reg").unwrap();
            g.sync().unwrap();
            (a, b, sa, i)
        };

        let mut g = Graph::open(dir.path(), "top", &config).unwrap().unwrap();
        assert_eq!(g.id(), GraphId(7));
        assert_eq!(g.node_count(), 2);
        assert_eq!(g.find_node("reg"), Some(a));
        assert_eq!(g.get_graph_input("clk"), Some(clk));
        assert!(g.has_edge(clk, clk_sink));
        assert_eq!(
            g.node_const(b),
            Some(ConstValue::Str {
                text: "xxx".into(),
                bits: 3
            })
        );
        let drivers: Vec<NodeId> = g.inp_edges(a).map(|e| e.driver_node).collect();
        assert_eq!(drivers, vec![NodeId::GRAPH_INPUT, b]);

        // Counters survive too.
        let c = g.create_node(NodeOp::Sum).unwrap();
        assert!(c > b);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;
        use std::collections::{BTreeSet, HashMap};

        #[derive(Debug, Clone)]
        enum EdgeOp {
            Add { from: usize, to: usize, port: u32 },
            Del { from: usize, to: usize, port: u32 },
            DelNode(usize),
        }

        fn edge_op() -> impl Strategy<Value = EdgeOp> {
            prop_oneof![
                6 => (0..8usize, 0..8usize, 0..3u32)
                    .prop_map(|(from, to, port)| EdgeOp::Add { from, to, port }),
                3 => (0..8usize, 0..8usize, 0..3u32)
                    .prop_map(|(from, to, port)| EdgeOp::Del { from, to, port }),
                1 => (0..8usize).prop_map(EdgeOp::DelNode),
            ]
        }

        proptest! {
            #[test]
            fn edge_lists_agree_with_model(ops in prop::collection::vec(edge_op(), 1..120)) {
                let mut g = Graph::in_memory(GraphId(1), "prop").unwrap();
                let nodes: Vec<NodeId> = (0..8).map(|_| g.create_node(NodeOp::Sum).unwrap()).collect();
                let mut alive = vec![true; nodes.len()];
                // sink pin -> driver pin
                let mut model: HashMap<PinId, PinId> = HashMap::new();

                for op in ops {
                    match op {
                        EdgeOp::Add { from, to, port } if alive[from] && alive[to] && from != to => {
                            let d = g.setup_driver_pin(nodes[from], 0).unwrap();
                            let s = g.setup_sink_pin(nodes[to], port).unwrap();
                            match model.get(&s) {
                                Some(&existing) if existing == d => {
                                    prop_assert!(!g.add_edge(d, s).unwrap());
                                }
                                Some(_) => prop_assert!(g.add_edge(d, s).is_err()),
                                None => {
                                    prop_assert!(g.add_edge(d, s).unwrap());
                                    model.insert(s, d);
                                }
                            }
                        }
                        EdgeOp::Del { from, to, port } if alive[from] && alive[to] => {
                            let (Some(d), Some(s)) = (
                                g.find_driver_pin(nodes[from], 0),
                                g.find_sink_pin(nodes[to], port),
                            ) else {
                                continue;
                            };
                            let expected = model.get(&s) == Some(&d);
                            prop_assert_eq!(g.del_edge(d, s).unwrap(), expected);
                            if expected {
                                model.remove(&s);
                            }
                        }
                        EdgeOp::DelNode(i) if alive[i] => {
                            let node = nodes[i];
                            model.retain(|s, d| {
                                g.pin(*s).map(|p| p.node) != Some(node)
                                    && g.pin(*d).map(|p| p.node) != Some(node)
                            });
                            g.del_node(node).unwrap();
                            alive[i] = false;
                        }
                        _ => {}
                    }
                }

                prop_assert_eq!(g.edge_count(), model.len());
                for (i, &node) in nodes.iter().enumerate() {
                    if !alive[i] {
                        prop_assert!(!g.is_valid_node(node));
                        continue;
                    }
                    let inp: BTreeSet<(PinId, PinId)> =
                        g.inp_edges(node).map(|e| (e.driver, e.sink)).collect();
                    let want_inp: BTreeSet<(PinId, PinId)> = model
                        .iter()
                        .filter(|(s, _)| g.pin(**s).map(|p| p.node) == Some(node))
                        .map(|(s, d)| (*d, *s))
                        .collect();
                    prop_assert_eq!(inp, want_inp);

                    let out: BTreeSet<(PinId, PinId)> =
                        g.out_edges(node).map(|e| (e.driver, e.sink)).collect();
                    let want_out: BTreeSet<(PinId, PinId)> = model
                        .iter()
                        .filter(|(_, d)| g.pin(**d).map(|p| p.node) == Some(node))
                        .map(|(s, d)| (*d, *s))
                        .collect();
                    prop_assert_eq!(out, want_out);
                }
            }
        }
    }

    #[test]
    fn open_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let missing = Graph::open(&dir.path().join("nope"), "nope", &StoreConfig::default());
        assert!(missing.unwrap().is_none());
    }
}
