//! Library: the set of graphs under one root directory.
//!
//! A graph is identified by `(root, name)`. The library keeps a persistent
//! registry mapping names to [`GraphId`]s and hands out ids from a persisted
//! counter, so ids survive restarts and are never reused for a different
//! graph. Each graph lives in its own directory, `<root>/graph_<id>`, so
//! graph names are free-form.
//!
//! Graphs are opened lazily. [`Library::load_hierarchy`] opens a top graph
//! and everything it instantiates, after which [`Library::view`] can build a
//! hierarchical view over them.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use lgdb_store::{Location, MmapMap, MmapStrMap, StoreConfig, StoreError};
use tracing::{debug, info};

use crate::error::GraphError;
use crate::graph::Graph;
use crate::id::{GraphId, NodeCompact, NodeId, PinCompact};
use crate::node::PinInfo;
use crate::traverse::HierView;

const NEXT_GRAPH: u32 = 0;

#[derive(Debug)]
pub struct Library {
    root: Option<PathBuf>,
    config: StoreConfig,
    registry: MmapStrMap<GraphId>,
    meta: MmapMap<u32, u32>,
    loaded: IndexMap<GraphId, Graph>,
}

impl Library {
    /// Opens (or starts) the library under `root`, configured from the
    /// environment.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, GraphError> {
        Self::open_with(root, StoreConfig::from_env())
    }

    pub fn open_with(root: impl AsRef<Path>, config: StoreConfig) -> Result<Self, GraphError> {
        let root = root.as_ref();
        std::fs::create_dir_all(root).map_err(StoreError::from)?;
        let registry = MmapStrMap::open_or_create_at(Location::file(root, "graphs"), &config)?;
        let meta = MmapMap::open_or_create_at(Location::file(root, "library"), &config)?;
        info!(root = %root.display(), graphs = registry.len(), "opened library");
        Ok(Library {
            root: Some(root.to_path_buf()),
            config,
            registry,
            meta,
            loaded: IndexMap::new(),
        })
    }

    /// A library whose graphs live in anonymous memory.
    pub fn in_memory() -> Result<Self, GraphError> {
        let config = StoreConfig::default();
        Ok(Library {
            root: None,
            registry: MmapStrMap::in_memory_with(&config)?,
            meta: MmapMap::in_memory_with(&config)?,
            config,
            loaded: IndexMap::new(),
        })
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    fn graph_dir(&self, id: GraphId) -> Option<PathBuf> {
        self.root
            .as_ref()
            .map(|root| root.join(format!("graph_{}", id.0)))
    }

    fn allocate_id(&mut self) -> Result<GraphId, GraphError> {
        let mut next = self.meta.entry(NEXT_GRAPH)?;
        if *next == 0 {
            *next = 1;
        }
        let id = GraphId(*next);
        *next += 1;
        Ok(id)
    }

    // -----------------------------------------------------------------------
    // Graph lifecycle
    // -----------------------------------------------------------------------

    /// Registers and creates an empty graph.
    pub fn create_graph(&mut self, name: &str) -> Result<GraphId, GraphError> {
        if self.registry.has(name) {
            return Err(GraphError::GraphExists {
                name: name.to_string(),
            });
        }
        let id = self.allocate_id()?;
        let dir = self.graph_dir(id);
        let graph = Graph::create(dir.as_deref(), id, name, &self.config)?;
        self.registry.insert(name, id)?;
        self.loaded.insert(id, graph);
        info!(graph = name, id = id.0, "created graph");
        Ok(id)
    }

    /// Empties graph `name`, creating it if needed. The id is kept.
    pub fn reset_graph(&mut self, name: &str) -> Result<GraphId, GraphError> {
        match self.open_graph(name)? {
            Some(id) => {
                if let Some(graph) = self.loaded.get_mut(&id) {
                    graph.clear()?;
                }
                Ok(id)
            }
            None => {
                // Registered but gone from disk: drop the stale entry.
                self.registry.erase(name);
                self.create_graph(name)
            }
        }
    }

    /// Loads graph `name`. `Ok(None)` if it is not registered or its
    /// storage is gone.
    pub fn open_graph(&mut self, name: &str) -> Result<Option<GraphId>, GraphError> {
        let Some(id) = self.registry.get(name) else {
            return Ok(None);
        };
        if self.loaded.contains_key(&id) {
            return Ok(Some(id));
        }
        let Some(dir) = self.graph_dir(id) else {
            return Ok(None);
        };
        match Graph::open(&dir, name, &self.config)? {
            Some(graph) => {
                self.loaded.insert(id, graph);
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    pub fn find_graph(&self, name: &str) -> Option<GraphId> {
        self.registry.get(name)
    }

    pub fn graph(&self, id: GraphId) -> Option<&Graph> {
        self.loaded.get(&id)
    }

    pub fn graph_mut(&mut self, id: GraphId) -> Option<&mut Graph> {
        self.loaded.get_mut(&id)
    }

    pub fn graph_name(&self, id: GraphId) -> Option<String> {
        if let Some(graph) = self.loaded.get(&id) {
            return Some(graph.name().to_string());
        }
        self.registry
            .iter()
            .find(|entry| entry.value == id)
            .map(|entry| entry.key.to_string())
    }

    /// Registered graphs, sorted by name.
    pub fn graphs(&self) -> Vec<(String, GraphId)> {
        let mut graphs: Vec<(String, GraphId)> = self
            .registry
            .iter()
            .map(|entry| (entry.key.to_string(), entry.value))
            .collect();
        graphs.sort();
        graphs
    }

    pub fn is_loaded(&self, id: GraphId) -> bool {
        self.loaded.contains_key(&id)
    }

    /// Flushes and unloads a graph. In an in-memory library there is nothing
    /// to reopen, so closing deletes the graph.
    pub fn close_graph(&mut self, id: GraphId) -> Result<bool, GraphError> {
        if self.root.is_none() {
            return self.delete_graph(id);
        }
        match self.loaded.shift_remove(&id) {
            Some(graph) => {
                graph.sync()?;
                debug!(graph = graph.name(), "closed graph");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Unregisters a graph and deletes its storage.
    pub fn delete_graph(&mut self, id: GraphId) -> Result<bool, GraphError> {
        let Some(name) = self.graph_name(id) else {
            return Ok(false);
        };
        let graph = match self.loaded.shift_remove(&id) {
            Some(graph) => Some(graph),
            None => match self.graph_dir(id) {
                Some(dir) => Graph::open(&dir, &name, &self.config)?,
                None => None,
            },
        };
        if let Some(graph) = graph {
            graph.destroy()?;
        }
        self.registry.erase(&name);
        info!(graph = %name, id = id.0, "deleted graph");
        Ok(true)
    }

    /// Opens `top` and every graph it instantiates, directly or not.
    pub fn load_hierarchy(&mut self, top: GraphId) -> Result<(), GraphError> {
        let mut stack = vec![top];
        let mut seen = std::collections::HashSet::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if !self.loaded.contains_key(&id) {
                let name = self
                    .graph_name(id)
                    .ok_or(GraphError::GraphNotFound { id })?;
                self.open_graph(&name)?
                    .ok_or(GraphError::GraphNotFound { id })?;
            }
            let Some(graph) = self.loaded.get(&id) else {
                return Err(GraphError::GraphNotFound { id });
            };
            stack.extend(graph.fast().filter_map(|node| graph.sub_graph(node)));
        }
        debug!(top = top.0, graphs = seen.len(), "loaded hierarchy");
        Ok(())
    }

    /// Flushes the registry and every loaded graph.
    pub fn sync(&self) -> Result<(), GraphError> {
        self.registry.sync()?;
        self.meta.sync()?;
        for graph in self.loaded.values() {
            graph.sync()?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Handles and views
    // -----------------------------------------------------------------------

    /// The loaded graph and node a compact handle points at. `None` for
    /// handles to deleted nodes or unloaded graphs.
    pub fn resolve_node(&self, handle: NodeCompact) -> Option<(&Graph, NodeId)> {
        let graph = self.loaded.get(&handle.graph)?;
        graph
            .is_valid_node(handle.node)
            .then_some((graph, handle.node))
    }

    pub fn resolve_pin(&self, handle: PinCompact) -> Option<(&Graph, PinInfo)> {
        let graph = self.loaded.get(&handle.graph)?;
        graph.pin(handle.pin).map(|info| (graph, info))
    }

    /// A view rooted at `top`. With `hierarchical`, loaded sub graphs are
    /// expanded; call [`load_hierarchy`](Self::load_hierarchy) first.
    pub fn view(&self, top: GraphId, hierarchical: bool) -> Result<HierView<'_>, GraphError> {
        let graph = self
            .loaded
            .get(&top)
            .ok_or(GraphError::GraphNotLoaded { id: top })?;
        HierView::new(graph, |id| self.loaded.get(&id), hierarchical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::NodeOp;

    #[test]
    fn create_and_find() {
        let mut lib = Library::in_memory().unwrap();
        let a = lib.create_graph("alu").unwrap();
        let b = lib.create_graph("top").unwrap();
        assert_ne!(a, b);
        assert_eq!(lib.find_graph("alu"), Some(a));
        assert_eq!(lib.graph_name(b).as_deref(), Some("top"));
        assert!(matches!(
            lib.create_graph("alu"),
            Err(GraphError::GraphExists { .. })
        ));
        assert_eq!(
            lib.graphs(),
            vec![("alu".to_string(), a), ("top".to_string(), b)]
        );
    }

    #[test]
    fn reset_keeps_id() {
        let mut lib = Library::in_memory().unwrap();
        let id = lib.create_graph("g").unwrap();
        lib.graph_mut(id).unwrap().create_node(NodeOp::Sum).unwrap();
        assert_eq!(lib.reset_graph("g").unwrap(), id);
        assert_eq!(lib.graph(id).unwrap().node_count(), 0);

        let fresh = lib.reset_graph("new").unwrap();
        assert_ne!(fresh, id);
    }

    #[test]
    fn delete_unregisters() {
        let mut lib = Library::in_memory().unwrap();
        let id = lib.create_graph("g").unwrap();
        assert!(lib.delete_graph(id).unwrap());
        assert_eq!(lib.find_graph("g"), None);
        assert!(lib.graph(id).is_none());
        assert!(!lib.delete_graph(id).unwrap());
        // Ids are not reused.
        assert!(lib.create_graph("g").unwrap() > id);
    }

    #[test]
    fn stale_handles_do_not_resolve() {
        let mut lib = Library::in_memory().unwrap();
        let id = lib.create_graph("g").unwrap();
        let g = lib.graph_mut(id).unwrap();
        let n = g.create_node(NodeOp::And).unwrap();
        let p = g.setup_driver_pin(n, 0).unwrap();
        let (nc, pc) = (g.node_compact(n), g.pin_compact(p));

        assert_eq!(lib.resolve_node(nc).map(|(_, n)| n), Some(n));
        assert_eq!(lib.resolve_pin(pc).map(|(_, p)| p.node), Some(n));

        lib.graph_mut(id).unwrap().del_node(n).unwrap();
        assert!(lib.resolve_node(nc).is_none());
        assert!(lib.resolve_pin(pc).is_none());
    }

    #[test]
    fn persisted_registry_and_lazy_open() {
        let dir = tempfile::tempdir().unwrap();
        let (top, sub) = {
            let mut lib = Library::open_with(dir.path(), StoreConfig::default()).unwrap();
            let sub = lib.create_graph("sub").unwrap();
            lib.graph_mut(sub).unwrap().create_node(NodeOp::Not).unwrap();
            let top = lib.create_graph("top").unwrap();
            lib.graph_mut(top).unwrap().create_node_sub(sub).unwrap();
            lib.sync().unwrap();
            (top, sub)
        };

        let mut lib = Library::open_with(dir.path(), StoreConfig::default()).unwrap();
        assert_eq!(lib.find_graph("top"), Some(top));
        assert!(!lib.is_loaded(top));
        assert!(matches!(
            lib.view(top, true),
            Err(GraphError::GraphNotLoaded { .. })
        ));

        lib.load_hierarchy(top).unwrap();
        assert!(lib.is_loaded(sub));
        let view = lib.view(top, true).unwrap();
        assert_eq!(view.hierarchy().len(), 2);
        assert_eq!(view.fast().count(), 1);
        assert_eq!(lib.view(top, false).unwrap().fast().count(), 1);
    }

    #[test]
    fn close_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut lib = Library::open_with(dir.path(), StoreConfig::default()).unwrap();
        let id = lib.create_graph("g").unwrap();
        let n = lib.graph_mut(id).unwrap().create_node(NodeOp::Mux).unwrap();
        assert!(lib.close_graph(id).unwrap());
        assert!(lib.graph(id).is_none());

        assert_eq!(lib.open_graph("g").unwrap(), Some(id));
        assert_eq!(lib.graph(id).unwrap().node_op(n), Some(NodeOp::Mux));
        assert_eq!(lib.open_graph("missing").unwrap(), None);

        assert!(lib.delete_graph(id).unwrap());
        assert!(!dir.path().join(format!("graph_{}", id.0)).exists());
    }
}
