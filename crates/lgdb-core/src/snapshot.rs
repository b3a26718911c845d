//! Owned snapshots of a graph.
//!
//! A [`GraphSnapshot`] copies everything out of the store tables into plain
//! sorted vectors. It is what `dump()` serializes and what tests compare
//! against; [`Graph::to_petgraph`] converts the same content into a
//! `StableGraph` for use with petgraph's algorithms.

use std::collections::HashMap;

use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableGraph;
use petgraph::Directed;
use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::graph::Graph;
use crate::id::{GraphId, NodeId};
use crate::node::{ConstValue, Edge, PinInfo, PortInfo};
use crate::op::NodeOp;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub op: NodeOp,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub constant: Option<ConstValue>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sub: Option<GraphId>,
}

/// Full content of one graph, every list sorted by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub id: GraphId,
    pub name: String,
    pub nodes: Vec<NodeSnapshot>,
    pub pins: Vec<PinInfo>,
    pub edges: Vec<Edge>,
    pub ports: Vec<PortInfo>,
}

/// Node-level netlist graph: one petgraph node per graph node (boundary
/// nodes included), one petgraph edge per pin-to-pin edge.
pub type NetlistGraph = StableGraph<NodeId, Edge, Directed, u32>;

impl Graph {
    pub fn snapshot(&self) -> GraphSnapshot {
        let mut ids: Vec<NodeId> = vec![NodeId::GRAPH_INPUT, NodeId::GRAPH_OUTPUT];
        ids.extend(self.fast());
        ids.sort();
        let nodes = ids
            .into_iter()
            .map(|id| NodeSnapshot {
                id,
                op: self.node_op(id).unwrap_or_default(),
                name: self.node_name(id).map(str::to_string),
                constant: self.node_const(id),
                sub: self.sub_graph(id),
            })
            .collect();

        let mut pins: Vec<PinInfo> = self.pins().collect();
        pins.sort_by_key(|p| p.id);
        let mut edges: Vec<Edge> = self.edges().collect();
        edges.sort_by_key(|e| e.id);

        GraphSnapshot {
            id: self.id(),
            name: self.name().to_string(),
            nodes,
            pins,
            edges,
            ports: self.ports(),
        }
    }

    /// Pretty-printed JSON of [`snapshot`](Self::snapshot).
    pub fn dump(&self) -> Result<String, GraphError> {
        Ok(serde_json::to_string_pretty(&self.snapshot())?)
    }

    /// Converts to a petgraph graph. The map gives the petgraph index of
    /// every node id.
    pub fn to_petgraph(&self) -> (NetlistGraph, HashMap<NodeId, NodeIndex<u32>>) {
        let mut graph = NetlistGraph::default();
        let mut index = HashMap::new();
        for id in [NodeId::GRAPH_INPUT, NodeId::GRAPH_OUTPUT]
            .into_iter()
            .chain(self.fast())
        {
            index.insert(id, graph.add_node(id));
        }
        for edge in self.edges() {
            if let (Some(&from), Some(&to)) =
                (index.get(&edge.driver_node), index.get(&edge.sink_node))
            {
                graph.add_edge(from, to, edge);
            }
        }
        (graph, index)
    }
}
