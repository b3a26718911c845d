//! Hierarchy tree: which instances of which graphs sit where.
//!
//! A [`Hierarchy`] is built once for a top graph. Entry 0 is the top graph;
//! every expanded `Sub` instance adds one entry whose parent is the
//! `(entry, instance node)` it was expanded from. The same graph instantiated
//! twice gets two entries, which is what lets [`HierNode`] tell the two
//! copies of a node apart.

use indexmap::IndexMap;
use tracing::debug;

use crate::error::GraphError;
use crate::graph::Graph;
use crate::id::{GraphId, HierIdx, HierNode, NodeId};

/// One position in the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierEntry {
    pub graph: GraphId,
    /// The entry and instance node this entry was expanded from. `None` only
    /// for the root.
    pub parent: Option<(HierIdx, NodeId)>,
    /// Expanded instance nodes of this entry, in discovery order.
    pub children: IndexMap<NodeId, HierIdx>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hierarchy {
    entries: Vec<HierEntry>,
}

impl Hierarchy {
    /// A hierarchy with only the root: nothing is expanded.
    pub fn flat(top: GraphId) -> Self {
        Hierarchy {
            entries: vec![HierEntry {
                graph: top,
                parent: None,
                children: IndexMap::new(),
            }],
        }
    }

    /// Expands every instance reachable from `top`.
    ///
    /// An instance is expanded when `lookup` knows its graph and that graph
    /// has internals. Fails when an instance's graph is not available or when
    /// a graph appears among its own ancestors.
    pub fn build<'a>(
        top: &'a Graph,
        lookup: impl Fn(GraphId) -> Option<&'a Graph>,
    ) -> Result<Self, GraphError> {
        let mut hier = Self::flat(top.id());
        let mut stack: Vec<(HierIdx, &'a Graph)> = vec![(HierIdx::ROOT, top)];

        while let Some((hidx, graph)) = stack.pop() {
            for node in graph.fast() {
                let Some(sub_id) = graph.sub_graph(node) else {
                    continue;
                };
                let sub = lookup(sub_id).ok_or(GraphError::GraphNotLoaded { id: sub_id })?;
                if !sub.has_internals() {
                    continue;
                }
                if sub_id == graph.id() || hier.ancestors(hidx).any(|g| g == sub_id) {
                    return Err(GraphError::RecursiveHierarchy { graph: sub_id });
                }
                let child = HierIdx(hier.entries.len() as u32);
                hier.entries.push(HierEntry {
                    graph: sub_id,
                    parent: Some((hidx, node)),
                    children: IndexMap::new(),
                });
                hier.entries[hidx.0 as usize].children.insert(node, child);
                stack.push((child, sub));
            }
        }

        debug!(top = top.name(), entries = hier.len(), "built hierarchy");
        Ok(hier)
    }

    /// Graphs of `hidx` and everything above it.
    fn ancestors(&self, hidx: HierIdx) -> impl Iterator<Item = GraphId> + '_ {
        let mut next = Some(hidx);
        std::iter::from_fn(move || {
            let entry = self.entry(next?);
            next = entry.parent.map(|(parent, _)| parent);
            Some(entry.graph)
        })
    }

    pub fn root(&self) -> &HierEntry {
        &self.entries[0]
    }

    /// # Panics
    ///
    /// If `hidx` does not belong to this hierarchy.
    pub fn entry(&self, hidx: HierIdx) -> &HierEntry {
        &self.entries[hidx.0 as usize]
    }

    pub fn graph(&self, hidx: HierIdx) -> GraphId {
        self.entry(hidx).graph
    }

    pub fn is_root(&self, hidx: HierIdx) -> bool {
        hidx.is_root()
    }

    /// The instance node `hidx` was expanded from.
    pub fn parent(&self, hidx: HierIdx) -> Option<HierNode> {
        self.entry(hidx).parent.map(|(parent, node)| HierNode {
            hidx: parent,
            graph: self.graph(parent),
            node,
        })
    }

    /// The entry `node` of `hidx` expands into, if it was expanded.
    pub fn child(&self, hidx: HierIdx, node: NodeId) -> Option<HierIdx> {
        self.entry(hidx).children.get(&node).copied()
    }

    /// Instance node of the parent entry. `hidx` must not be the root.
    ///
    /// # Panics
    ///
    /// If `hidx` has no parent.
    pub fn go_up(&self, hidx: HierIdx) -> HierNode {
        match self.parent(hidx) {
            Some(parent) => parent,
            None => panic!("hierarchy entry {} has no parent", hidx.0),
        }
    }

    /// The entry an instance node expands into.
    pub fn go_down(&self, node: HierNode) -> Option<HierIdx> {
        self.child(node.hidx, node.node)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (HierIdx, &HierEntry)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (HierIdx(i as u32), entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::NodeOp;

    fn leaf(id: u32) -> Graph {
        let mut g = Graph::in_memory(GraphId(id), &format!("leaf{id}")).unwrap();
        g.create_node(NodeOp::Not).unwrap();
        g
    }

    #[test]
    fn flat_hierarchy_has_only_root() {
        let h = Hierarchy::flat(GraphId(3));
        assert_eq!(h.len(), 1);
        assert_eq!(h.root().graph, GraphId(3));
        assert!(h.parent(HierIdx::ROOT).is_none());
    }

    #[test]
    fn instances_get_one_entry_each() {
        let sub = leaf(2);
        let empty = Graph::in_memory(GraphId(3), "empty").unwrap();
        let mut top = Graph::in_memory(GraphId(1), "top").unwrap();
        let i1 = top.create_node_sub(GraphId(2)).unwrap();
        let i2 = top.create_node_sub(GraphId(2)).unwrap();
        let blackbox = top.create_node_sub(GraphId(3)).unwrap();

        let lookup = |id: GraphId| match id.0 {
            2 => Some(&sub),
            3 => Some(&empty),
            _ => None,
        };
        let h = Hierarchy::build(&top, lookup).unwrap();
        assert_eq!(h.len(), 3);

        let c1 = h.child(HierIdx::ROOT, i1).unwrap();
        let c2 = h.child(HierIdx::ROOT, i2).unwrap();
        assert_ne!(c1, c2);
        assert_eq!(h.graph(c1), GraphId(2));
        assert_eq!(h.go_up(c2).node, i2);
        assert_eq!(h.child(HierIdx::ROOT, blackbox), None);
        assert_eq!(
            h.go_down(HierNode {
                hidx: HierIdx::ROOT,
                graph: GraphId(1),
                node: i1
            }),
            Some(c1)
        );
    }

    #[test]
    fn missing_sub_graph_is_an_error() {
        let mut top = Graph::in_memory(GraphId(1), "top").unwrap();
        top.create_node_sub(GraphId(9)).unwrap();
        let err = Hierarchy::build(&top, |_| None).unwrap_err();
        assert!(matches!(err, GraphError::GraphNotLoaded { id } if id == GraphId(9)));
    }

    #[test]
    fn self_instance_is_recursive() {
        let mut top = Graph::in_memory(GraphId(1), "top").unwrap();
        top.create_node_sub(GraphId(1)).unwrap();
        let err = Hierarchy::build(&top, |id| (id == GraphId(1)).then_some(&top)).unwrap_err();
        assert!(matches!(err, GraphError::RecursiveHierarchy { graph } if graph == GraphId(1)));
    }

    #[test]
    fn indirect_recursion_is_detected() {
        let mut a = Graph::in_memory(GraphId(2), "a").unwrap();
        a.create_node_sub(GraphId(3)).unwrap();
        let mut b = Graph::in_memory(GraphId(3), "b").unwrap();
        b.create_node_sub(GraphId(2)).unwrap();
        let mut top = Graph::in_memory(GraphId(1), "top").unwrap();
        top.create_node_sub(GraphId(2)).unwrap();

        let lookup = |id: GraphId| match id.0 {
            2 => Some(&a),
            3 => Some(&b),
            _ => None,
        };
        let err = Hierarchy::build(&top, lookup).unwrap_err();
        assert!(matches!(err, GraphError::RecursiveHierarchy { graph } if graph == GraphId(2)));
    }

    #[test]
    #[should_panic(expected = "has no parent")]
    fn go_up_from_root_panics() {
        Hierarchy::flat(GraphId(1)).go_up(HierIdx::ROOT);
    }
}
