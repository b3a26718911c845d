//! Hierarchical views over loaded graphs.
//!
//! A [`HierView`] pairs a [`Hierarchy`] with the graph of every entry. It
//! answers "who drives this node" and "who does this node drive" across
//! instance boundaries: an expanded instance is transparent, so a driver
//! found on an instance output pin is followed into the instantiated graph,
//! and a graph input inside an instance is followed out to whatever drives
//! the instance pin in the parent.
//!
//! Views are cheap to clone; the iterators in [`crate::topo`] own a clone.

use std::collections::HashSet;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::error::GraphError;
use crate::graph::Graph;
use crate::hierarchy::Hierarchy;
use crate::id::{GraphId, HierIdx, HierNode, NodeId, PinId};

/// Resolved neighbours of a node. Most nodes have a handful.
pub type Neighbours = SmallVec<[HierNode; 4]>;

#[derive(Clone)]
pub struct HierView<'a> {
    hier: Rc<Hierarchy>,
    /// Graph of each hierarchy entry, indexed by `HierIdx`.
    graphs: Rc<[&'a Graph]>,
}

impl<'a> HierView<'a> {
    /// A view of `top` alone. Instances are opaque nodes.
    pub fn flat(top: &'a Graph) -> Self {
        HierView {
            hier: Rc::new(Hierarchy::flat(top.id())),
            graphs: Rc::from(vec![top]),
        }
    }

    /// A view of `top`. With `hierarchical`, every instance whose graph
    /// `lookup` provides (and which has internals) is expanded.
    pub fn new(
        top: &'a Graph,
        lookup: impl Fn(GraphId) -> Option<&'a Graph>,
        hierarchical: bool,
    ) -> Result<Self, GraphError> {
        if !hierarchical {
            return Ok(Self::flat(top));
        }
        let hier = Hierarchy::build(top, &lookup)?;
        let graphs = hier
            .iter()
            .map(|(hidx, entry)| {
                if hidx.is_root() {
                    return Ok(top);
                }
                lookup(entry.graph).ok_or(GraphError::GraphNotLoaded { id: entry.graph })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(HierView {
            hier: Rc::new(hier),
            graphs: Rc::from(graphs),
        })
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hier
    }

    pub fn top(&self) -> &'a Graph {
        self.graphs[0]
    }

    /// # Panics
    ///
    /// If `hidx` is not an entry of this view.
    pub fn graph(&self, hidx: HierIdx) -> &'a Graph {
        self.graphs[hidx.0 as usize]
    }

    pub fn root_node(&self, node: NodeId) -> HierNode {
        HierNode {
            hidx: HierIdx::ROOT,
            graph: self.top().id(),
            node,
        }
    }

    /// Whether `node` is an instance that this view expands.
    pub fn is_expanded(&self, node: HierNode) -> bool {
        self.hier.go_down(node).is_some()
    }

    /// Every node of every entry, expanded instances excluded. Entries are
    /// visited in hierarchy order, nodes in storage order.
    pub fn fast(&self) -> impl Iterator<Item = HierNode> + 'a {
        let hier = Rc::clone(&self.hier);
        let graphs = Rc::clone(&self.graphs);
        (0..graphs.len()).flat_map(move |i| {
            let hidx = HierIdx(i as u32);
            let graph: &'a Graph = graphs[i];
            let hier = Rc::clone(&hier);
            graph
                .fast()
                .filter(move |node| hier.child(hidx, *node).is_none())
                .map(move |node| HierNode {
                    hidx,
                    graph: graph.id(),
                    node,
                })
        })
    }

    /// Pipelined and boundary nodes break dependency chains: their inputs
    /// are not ordered against them. Deleted nodes are exempt too.
    pub fn is_exempt(&self, node: HierNode) -> bool {
        self.graph(node.hidx)
            .node_op(node.node)
            .map_or(true, |op| op.is_pipelined() || op.is_graph_io())
    }

    /// Nodes driving `node`, with expanded instances and instance boundaries
    /// resolved away.
    pub fn drivers(&self, node: HierNode) -> Neighbours {
        let graph = self.graph(node.hidx);
        let mut work: Vec<(HierIdx, PinId)> = graph
            .inp_edges(node.node)
            .map(|e| (node.hidx, e.driver))
            .collect();
        let mut seen = HashSet::new();
        let mut out = Neighbours::new();

        while let Some((hidx, pin)) = work.pop() {
            if !seen.insert((hidx, pin)) {
                continue;
            }
            let graph = self.graph(hidx);
            let Some(info) = graph.pin(pin) else {
                continue;
            };
            if info.node == NodeId::GRAPH_INPUT && !hidx.is_root() {
                // Out to whatever drives the instance pin.
                let inst = self.hier.go_up(hidx);
                let parent = self.graph(inst.hidx);
                if let Some(driver) = parent
                    .find_sink_pin(inst.node, info.port)
                    .and_then(|sink| parent.sink_driver(sink))
                {
                    work.push((inst.hidx, driver));
                }
                continue;
            }
            if let Some(child) = self.hier.child(hidx, info.node) {
                // Into the instantiated graph's matching output.
                let sub = self.graph(child);
                if let Some(driver) = sub
                    .graph_output_at(info.port)
                    .and_then(|sink| sub.sink_driver(sink))
                {
                    work.push((child, driver));
                }
                continue;
            }
            push_unique(
                &mut out,
                HierNode {
                    hidx,
                    graph: graph.id(),
                    node: info.node,
                },
            );
        }
        out
    }

    /// Nodes driven by `node`, resolved like [`drivers`](Self::drivers).
    pub fn sinks(&self, node: HierNode) -> Neighbours {
        let graph = self.graph(node.hidx);
        let mut work: Vec<(HierIdx, PinId)> = graph
            .out_edges(node.node)
            .map(|e| (node.hidx, e.sink))
            .collect();
        let mut seen = HashSet::new();
        let mut out = Neighbours::new();

        while let Some((hidx, pin)) = work.pop() {
            if !seen.insert((hidx, pin)) {
                continue;
            }
            let graph = self.graph(hidx);
            let Some(info) = graph.pin(pin) else {
                continue;
            };
            if info.node == NodeId::GRAPH_OUTPUT && !hidx.is_root() {
                let inst = self.hier.go_up(hidx);
                let parent = self.graph(inst.hidx);
                if let Some(driver) = parent.find_driver_pin(inst.node, info.port) {
                    work.extend(parent.pin_out_edges(driver).map(|e| (inst.hidx, e.sink)));
                }
                continue;
            }
            if let Some(child) = self.hier.child(hidx, info.node) {
                let sub = self.graph(child);
                if let Some(driver) = sub.graph_input_at(info.port) {
                    work.extend(sub.pin_out_edges(driver).map(|e| (child, e.sink)));
                }
                continue;
            }
            push_unique(
                &mut out,
                HierNode {
                    hidx,
                    graph: graph.id(),
                    node: info.node,
                },
            );
        }
        out
    }

    /// `h<entry>:<graph name>:<node debug name>`.
    pub fn debug_name(&self, node: HierNode) -> String {
        let graph = self.graph(node.hidx);
        format!(
            "h{}:{}:{}",
            node.hidx.0,
            graph.name(),
            graph.debug_name(node.node)
        )
    }
}

fn push_unique(out: &mut Neighbours, node: HierNode) {
    if !out.contains(&node) {
        out.push(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::NodeOp;

    /// `y = not(a)` as a reusable sub graph.
    fn inverter(id: u32) -> Graph {
        let mut g = Graph::in_memory(GraphId(id), "inv").unwrap();
        let a = g.add_graph_input("a", 0, 1).unwrap();
        let y = g.add_graph_output("y", 0, 1).unwrap();
        let n = g.create_node(NodeOp::Not).unwrap();
        let s = g.setup_sink_pin(n, 0).unwrap();
        let d = g.setup_driver_pin(n, 0).unwrap();
        g.add_edge(a, s).unwrap();
        g.add_edge(d, y).unwrap();
        g
    }

    /// `c -> inv -> or`, returning (top, c, inst, or).
    fn top_with_instance() -> (Graph, NodeId, NodeId, NodeId) {
        let mut top = Graph::in_memory(GraphId(1), "top").unwrap();
        let c = top.create_node_const(1).unwrap();
        let inst = top.create_node_sub(GraphId(2)).unwrap();
        let or = top.create_node(NodeOp::Or).unwrap();
        let cd = top.find_driver_pin(c, 0).unwrap();
        let is = top.setup_sink_pin(inst, 0).unwrap();
        let id = top.setup_driver_pin(inst, 0).unwrap();
        let os = top.setup_sink_pin(or, 0).unwrap();
        top.add_edge(cd, is).unwrap();
        top.add_edge(id, os).unwrap();
        (top, c, inst, or)
    }

    #[test]
    fn flat_view_treats_instances_as_nodes() {
        let (top, c, inst, or) = top_with_instance();
        let view = HierView::flat(&top);
        assert_eq!(view.fast().count(), 3);
        assert_eq!(view.drivers(view.root_node(or)).as_slice(), &[view.root_node(inst)]);
        assert_eq!(view.sinks(view.root_node(c)).as_slice(), &[view.root_node(inst)]);
    }

    #[test]
    fn hierarchical_view_resolves_through_instances() {
        let sub = inverter(2);
        let (top, c, inst, or) = top_with_instance();
        let view = HierView::new(&top, |id| (id == GraphId(2)).then_some(&sub), true).unwrap();

        let fast: Vec<HierNode> = view.fast().collect();
        assert_eq!(fast.len(), 3);
        assert!(!fast.contains(&view.root_node(inst)));

        let child = view.hierarchy().child(HierIdx::ROOT, inst).unwrap();
        let not = HierNode {
            hidx: child,
            graph: GraphId(2),
            node: NodeId::FIRST,
        };
        assert!(fast.contains(&not));

        assert_eq!(view.drivers(view.root_node(or)).as_slice(), &[not]);
        assert_eq!(view.drivers(not).as_slice(), &[view.root_node(c)]);
        assert_eq!(view.sinks(view.root_node(c)).as_slice(), &[not]);
        assert_eq!(view.sinks(not).as_slice(), &[view.root_node(or)]);
        assert!(view.is_expanded(view.root_node(inst)));
        assert_eq!(view.debug_name(not), format!("h{}:inv:3not", child.0));
    }

    #[test]
    fn exempt_nodes() {
        let mut g = Graph::in_memory(GraphId(1), "top").unwrap();
        let ff = g.create_node(NodeOp::FFlop).unwrap();
        let sum = g.create_node(NodeOp::Sum).unwrap();
        let view = HierView::flat(&g);
        assert!(view.is_exempt(view.root_node(ff)));
        assert!(view.is_exempt(view.root_node(NodeId::GRAPH_INPUT)));
        assert!(!view.is_exempt(view.root_node(sum)));
    }
}
