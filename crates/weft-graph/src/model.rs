use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::types::{Edge, EdgeConfig, EdgeType, Graph, Node, NodePatch, Position};

/// Why an `add_edge` request was ignored. Never surfaced as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRejected {
    SelfLoop,
    Duplicate,
}

/// Outcome of `GraphModel::add_edge`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddEdge {
    /// A new edge was added with this id.
    Created(String),
    /// The request was a silent no-op.
    Ignored(ConnectionRejected),
}

impl AddEdge {
    pub fn edge_id(&self) -> Option<&str> {
        match self {
            Self::Created(id) => Some(id),
            Self::Ignored(_) => None,
        }
    }
}

/// A graph plus its unsaved-changes flag.
///
/// All structural invariants except acyclicity are enforced here: unique
/// node ids, existing edge endpoints, no self-loops, and at most one edge
/// per ordered pair. Cycles may exist transiently and are rejected on save.
#[derive(Debug, Clone, Default)]
pub struct GraphModel {
    graph: Graph,
    dirty: bool,
}

impl GraphModel {
    /// Wrap a loaded graph. Starts clean.
    pub fn new(graph: Graph) -> Self {
        Self { graph, dirty: false }
    }

    /// Rebuild an externally supplied graph through the model's checks.
    ///
    /// Duplicate node ids and dangling edges are errors. Self-loops and
    /// repeated ordered pairs are dropped the way `add_edge` drops them; edge
    /// ids are kept. The result is dirty.
    pub fn import(graph: Graph) -> Result<Self> {
        let Graph {
            id,
            name,
            nodes,
            edges,
        } = graph;
        let mut model = Self::new(Graph::new(id, name));
        for node in nodes {
            model.add_node(node)?;
        }
        for edge in edges {
            for endpoint in [&edge.source_node_id, &edge.target_node_id] {
                if model.graph.node(endpoint).is_none() {
                    return Err(WeftError::NodeNotFound(endpoint.clone()));
                }
            }
            if edge.source_node_id == edge.target_node_id
                || model.graph.has_edge_between(&edge.source_node_id, &edge.target_node_id)
            {
                debug!(edge_id = %edge.id, "Dropping self-loop or duplicate edge on import");
                continue;
            }
            model.graph.edges.push(edge);
        }
        model.dirty = true;
        Ok(model)
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }

    pub fn nodes(&self) -> &[Node] {
        &self.graph.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.graph.edges
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.graph.node(id)
    }

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.graph.edge(id)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clear the dirty flag after the persistence adapter confirmed a save.
    pub fn mark_saved(&mut self, saved: Graph) {
        self.graph = saved;
        self.dirty = false;
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.graph.name = name.into();
        self.dirty = true;
    }

    pub fn add_node(&mut self, node: Node) -> Result<()> {
        if self.graph.node(&node.id).is_some() {
            return Err(WeftError::DuplicateNode(node.id));
        }
        debug!(node_id = %node.id, agent_type = %node.agent_type, "Node added");
        self.graph.nodes.push(node);
        self.dirty = true;
        Ok(())
    }

    pub fn update_node(&mut self, id: &str, patch: NodePatch) -> Result<()> {
        let node = self
            .graph
            .nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| WeftError::NodeNotFound(id.to_string()))?;

        if let Some(agent_type) = patch.agent_type {
            node.agent_type = agent_type;
        }
        if let Some(position) = patch.position {
            node.position = position;
        }
        if let Some(label) = patch.label {
            node.label = Some(label);
        }
        if let Some(cluster) = patch.cluster {
            node.cluster = Some(cluster);
        }
        if let Some(config) = patch.config {
            node.config = config;
        }
        self.dirty = true;
        Ok(())
    }

    /// Live position update from a node drag.
    pub fn move_node(&mut self, id: &str, position: Position) -> Result<()> {
        let node = self
            .graph
            .nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| WeftError::NodeNotFound(id.to_string()))?;
        node.position = position;
        self.dirty = true;
        Ok(())
    }

    /// Remove a node and every edge touching it. Returns the removed edge count.
    pub fn remove_node(&mut self, id: &str) -> Result<usize> {
        let index = self
            .graph
            .nodes
            .iter()
            .position(|n| n.id == id)
            .ok_or_else(|| WeftError::NodeNotFound(id.to_string()))?;
        self.graph.nodes.remove(index);

        let before = self.graph.edges.len();
        self.graph.edges.retain(|e| !e.touches(id));
        let removed = before - self.graph.edges.len();

        debug!(node_id = %id, removed_edges = removed, "Node removed");
        self.dirty = true;
        Ok(removed)
    }

    /// Connect `source -> target`.
    ///
    /// Self-loops and duplicate ordered pairs are ignored without error.
    /// Missing endpoints are an error.
    pub fn add_edge(
        &mut self,
        source: &str,
        target: &str,
        edge_type: EdgeType,
        config: Option<EdgeConfig>,
    ) -> Result<AddEdge> {
        if source == target {
            debug!(node_id = %source, "Ignoring self-loop");
            return Ok(AddEdge::Ignored(ConnectionRejected::SelfLoop));
        }
        for endpoint in [source, target] {
            if self.graph.node(endpoint).is_none() {
                return Err(WeftError::NodeNotFound(endpoint.to_string()));
            }
        }
        if self.graph.has_edge_between(source, target) {
            debug!(source, target, "Ignoring duplicate edge");
            return Ok(AddEdge::Ignored(ConnectionRejected::Duplicate));
        }

        let edge = Edge::new(source, target, edge_type, config.unwrap_or_default());
        let id = edge.id.clone();
        self.graph.edges.push(edge);
        self.dirty = true;
        Ok(AddEdge::Created(id))
    }

    pub fn update_edge(&mut self, id: &str, edge_type: EdgeType, config: EdgeConfig) -> Result<()> {
        let edge = self
            .graph
            .edges
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| WeftError::EdgeNotFound(id.to_string()))?;
        edge.edge_type = edge_type;
        edge.config = config;
        self.dirty = true;
        Ok(())
    }

    pub fn remove_edge(&mut self, id: &str) -> Result<()> {
        let index = self
            .graph
            .edges
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| WeftError::EdgeNotFound(id.to_string()))?;
        self.graph.edges.remove(index);
        self.dirty = true;
        Ok(())
    }
}
