use std::sync::Arc;

use tracing::{debug, info, warn};

use weft_core::config::EditorConfig;
use weft_core::error::{Result, WeftError};
use weft_core::traits::{AgentDirectory, PersistenceAdapter};
use weft_core::types::{Graph, Node, NodePatch, Position};

use crate::dag;
use crate::editor::{EditingStateMachine, Selection};
use crate::gate::{EdgeConfigGate, GateDecision};
use crate::model::{AddEdge, GraphModel};

/// One open graph: model, canvas state, and the edge configuration step.
///
/// Owned exclusively by the caller; `&mut self` on `save` guarantees at most
/// one in-flight save per session.
pub struct EditingSession {
    model: GraphModel,
    editor: EditingStateMachine,
    gate: EdgeConfigGate,
    directory: Arc<dyn AgentDirectory>,
}

impl EditingSession {
    pub fn new(graph: Graph, config: EditorConfig, directory: Arc<dyn AgentDirectory>) -> Self {
        Self {
            model: GraphModel::new(graph),
            editor: EditingStateMachine::new(config),
            gate: EdgeConfigGate::new(),
            directory,
        }
    }

    /// Open an externally supplied graph, checking structure and agent types.
    pub fn import(graph: Graph, config: EditorConfig, directory: Arc<dyn AgentDirectory>) -> Result<Self> {
        let model = GraphModel::import(graph)?;
        let session = Self {
            model,
            editor: EditingStateMachine::new(config),
            gate: EdgeConfigGate::new(),
            directory,
        };
        for node in session.model.nodes() {
            session.ensure_known_agent(&node.agent_type)?;
        }
        Ok(session)
    }

    /// Open a stored graph.
    pub async fn load(
        store: &dyn PersistenceAdapter,
        id: &str,
        config: EditorConfig,
        directory: Arc<dyn AgentDirectory>,
    ) -> Result<Self> {
        let graph = store.load_graph(id).await?;
        info!(graph_id = %id, nodes = graph.nodes.len(), edges = graph.edges.len(), "Graph opened");
        Ok(Self::new(graph, config, directory))
    }

    pub fn graph(&self) -> &Graph {
        self.model.graph()
    }

    pub fn model(&self) -> &GraphModel {
        &self.model
    }

    pub fn editor(&self) -> &EditingStateMachine {
        &self.editor
    }

    /// Selection, lock, and view transitions that never touch the graph.
    pub fn editor_mut(&mut self) -> &mut EditingStateMachine {
        &mut self.editor
    }

    pub fn gate(&self) -> &EdgeConfigGate {
        &self.gate
    }

    pub fn gate_mut(&mut self) -> &mut EdgeConfigGate {
        &mut self.gate
    }

    pub fn is_dirty(&self) -> bool {
        self.model.is_dirty()
    }

    // ── Nodes ───────────────────────────────────────────────────

    /// Drop a new agent node at `position`; returns its id.
    pub fn add_agent(&mut self, agent_type: &str, position: Position) -> Result<String> {
        let node = Node::new(agent_type, position);
        let id = node.id.clone();
        self.add_node(node)?;
        Ok(id)
    }

    pub fn add_node(&mut self, node: Node) -> Result<()> {
        self.ensure_known_agent(&node.agent_type)?;
        self.model.add_node(node)
    }

    pub fn update_node(&mut self, id: &str, patch: NodePatch) -> Result<()> {
        if let Some(ref agent_type) = patch.agent_type {
            self.ensure_known_agent(agent_type)?;
        }
        self.model.update_node(id, patch)
    }

    pub fn remove_node(&mut self, id: &str) -> Result<usize> {
        self.ensure_unlocked()?;
        let removed = self.model.remove_node(id)?;
        self.editor.forget(id);
        Ok(removed)
    }

    pub fn remove_edge(&mut self, id: &str) -> Result<()> {
        self.ensure_unlocked()?;
        self.model.remove_edge(id)?;
        self.editor.forget(id);
        Ok(())
    }

    /// Delete whatever is selected. Returns false when nothing was selected.
    pub fn delete_selected(&mut self) -> Result<bool> {
        match self.editor.selection().clone() {
            Selection::Node(id) => self.remove_node(&id).map(|_| true),
            Selection::Edge(id) => self.remove_edge(&id).map(|_| true),
            Selection::None => Ok(false),
        }
    }

    // ── Pointer input ───────────────────────────────────────────

    /// Pointer-down on a node body: select it and start dragging.
    pub fn pointer_down_on_node(&mut self, id: &str, pointer_screen: Position) -> Result<bool> {
        let position = self
            .model
            .node(id)
            .map(|n| n.position)
            .ok_or_else(|| WeftError::NodeNotFound(id.to_string()))?;
        if !self.editor.begin_drag(id, pointer_screen, position) {
            self.editor.select_node(id);
            return Ok(false);
        }
        Ok(true)
    }

    /// Pointer-down on a node's output anchor: start a connection draft.
    pub fn pointer_down_on_output(&mut self, id: &str, pointer_screen: Position) -> Result<bool> {
        if self.model.node(id).is_none() {
            return Err(WeftError::NodeNotFound(id.to_string()));
        }
        Ok(self.editor.begin_connection(id, pointer_screen))
    }

    /// Pointer-move: update a dragged node live, or the draft line.
    pub fn pointer_move(&mut self, pointer_screen: Position) -> Result<()> {
        if let Some((id, position)) = self.editor.drag_to(pointer_screen) {
            let id = id.to_string();
            self.model.move_node(&id, position)?;
        }
        self.editor.update_pointer(pointer_screen);
        Ok(())
    }

    /// Pointer-up. `over_input_of` names the node whose input anchor is under
    /// the pointer. A completed draft opens the edge configuration step.
    pub fn pointer_up(&mut self, over_input_of: Option<&str>) {
        self.editor.end_drag();
        if let Some(request) = self.editor.end_connection(over_input_of) {
            debug!(source = %request.source, target = %request.target, "Connection awaiting configuration");
            self.gate.open_new(request);
        }
    }

    /// Click on an existing edge: select it and open its configuration step.
    pub fn click_edge(&mut self, id: &str) -> Result<()> {
        let edge = self
            .model
            .edge(id)
            .ok_or_else(|| WeftError::EdgeNotFound(id.to_string()))?;
        self.gate.open_existing(edge);
        self.editor.select_edge(id);
        Ok(())
    }

    /// Apply the configuration step. Returns the created edge id, if any.
    ///
    /// A confirmed new edge that turns out to be a self-loop or duplicate is
    /// dropped silently.
    pub fn confirm_edge_config(&mut self) -> Result<Option<String>> {
        let Some(decision) = self.gate.confirm() else {
            return Ok(None);
        };
        match decision {
            GateDecision::Create {
                source,
                target,
                edge_type,
                config,
            } => match self.model.add_edge(&source, &target, edge_type, Some(config))? {
                AddEdge::Created(id) => {
                    info!(edge_id = %id, source = %source, target = %target, "Edge created");
                    Ok(Some(id))
                }
                AddEdge::Ignored(reason) => {
                    debug!(?reason, "Edge creation ignored");
                    Ok(None)
                }
            },
            GateDecision::Update {
                edge_id,
                edge_type,
                config,
            } => {
                self.model.update_edge(&edge_id, edge_type, config)?;
                Ok(None)
            }
        }
    }

    pub fn cancel_edge_config(&mut self) {
        self.gate.cancel();
    }

    // ── Save ────────────────────────────────────────────────────

    /// Validate and persist the graph as one unit.
    ///
    /// Cyclic graphs are rejected before any I/O. On any failure the
    /// in-memory graph and dirty flag are left as they were.
    pub async fn save(&mut self, store: &dyn PersistenceAdapter) -> Result<Graph> {
        if let Err(e) = dag::validate(self.model.graph()) {
            warn!(graph_id = %self.model.graph().id, error = %e, "Save rejected");
            return Err(e);
        }

        let id = self.model.graph().id.clone();
        match store.save_graph(&id, self.model.graph()).await {
            Ok(saved) => {
                info!(graph_id = %id, nodes = saved.nodes.len(), edges = saved.edges.len(), "Graph saved");
                self.model.mark_saved(saved.clone());
                Ok(saved)
            }
            Err(e) => {
                warn!(graph_id = %id, error = %e, "Graph save failed");
                Err(e)
            }
        }
    }

    fn ensure_known_agent(&self, agent_type: &str) -> Result<()> {
        if self.directory.resolve(agent_type).is_none() {
            return Err(WeftError::UnknownAgentType(agent_type.to_string()));
        }
        Ok(())
    }

    fn ensure_unlocked(&self) -> Result<()> {
        if self.editor.is_locked() {
            return Err(WeftError::Locked);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::directory::AgentCatalog;
    use weft_core::types::EdgeType;
    use weft_test_utils::{linear_graph, MemoryStore};

    fn session(graph: Graph) -> EditingSession {
        EditingSession::new(graph, EditorConfig::default(), Arc::new(AgentCatalog::builtin()))
    }

    fn connect(s: &mut EditingSession, from: &str, to: &str) -> Option<String> {
        assert!(s.pointer_down_on_output(from, Position::default()).unwrap());
        s.pointer_move(Position::new(300.0, 300.0)).unwrap();
        s.pointer_up(Some(to));
        s.confirm_edge_config().unwrap()
    }

    #[tokio::test]
    async fn test_import_checks_agents_then_saves() {
        let directory: Arc<dyn AgentDirectory> = Arc::new(AgentCatalog::builtin());
        let mut graph = linear_graph("wf", &["a", "b"], true);
        graph.nodes[1].agent_type = "astrologer".into();
        assert!(matches!(
            EditingSession::import(graph, EditorConfig::default(), directory.clone()),
            Err(WeftError::UnknownAgentType(t)) if t == "astrologer"
        ));

        let store = MemoryStore::new();
        let mut s = EditingSession::import(
            linear_graph("wf", &["a", "b"], true),
            EditorConfig::default(),
            directory,
        )
        .unwrap();
        assert!(s.is_dirty());
        s.save(&store).await.unwrap();
        assert!(!s.is_dirty());
        assert_eq!(store.load_graph("wf").await.unwrap().edges.len(), 1);
    }

    #[test]
    fn test_unknown_agent_type_rejected() {
        let mut s = session(Graph::new("wf", "g"));
        let err = s.add_agent("astrologer", Position::default()).unwrap_err();
        assert!(matches!(err, WeftError::UnknownAgentType(_)));
        assert!(s.graph().nodes.is_empty());
    }

    #[test]
    fn test_draft_opens_gate_before_edge_exists() {
        let mut s = session(linear_graph("wf", &["a", "b"], false));
        s.pointer_down_on_output("a", Position::default()).unwrap();
        s.pointer_up(Some("b"));
        assert!(s.gate().is_open());
        assert!(s.graph().edges.is_empty());

        let id = s.confirm_edge_config().unwrap().unwrap();
        assert_eq!(s.graph().edge(&id).unwrap().edge_type, EdgeType::DataFlow);
    }

    #[test]
    fn test_cancelled_gate_creates_no_edge() {
        let mut s = session(linear_graph("wf", &["a", "b"], false));
        s.pointer_down_on_output("a", Position::default()).unwrap();
        s.pointer_up(Some("b"));
        s.cancel_edge_config();
        assert!(s.confirm_edge_config().unwrap().is_none());
        assert!(s.graph().edges.is_empty());
    }

    #[test]
    fn test_duplicate_connection_silently_ignored() {
        let mut s = session(linear_graph("wf", &["a", "b"], false));
        assert!(connect(&mut s, "a", "b").is_some());
        assert!(connect(&mut s, "a", "b").is_none());
        assert_eq!(s.graph().edges.len(), 1);
    }

    #[test]
    fn test_click_edge_updates_only_on_confirm() {
        let mut s = session(linear_graph("wf", &["a", "b"], true));
        let edge_id = s.graph().edges[0].id.clone();
        s.click_edge(&edge_id).unwrap();
        assert_eq!(s.editor().selection(), &Selection::Edge(edge_id.clone()));
        s.gate_mut().edit(|_, cfg| cfg.priority = 1);
        assert_eq!(s.graph().edge(&edge_id).unwrap().config.priority, 5);

        s.confirm_edge_config().unwrap();
        assert_eq!(s.graph().edge(&edge_id).unwrap().config.priority, 1);
    }

    #[test]
    fn test_drag_moves_node_live() {
        let mut s = session(linear_graph("wf", &["a"], false));
        let start = s.graph().node("a").unwrap().position;
        assert!(s.pointer_down_on_node("a", start + Position::new(5.0, 5.0)).unwrap());
        s.pointer_move(start + Position::new(55.0, 25.0)).unwrap();
        assert_eq!(s.graph().node("a").unwrap().position, start + Position::new(50.0, 20.0));
        assert!(s.is_dirty());
        s.pointer_up(None);
        assert!(!s.editor().is_dragging());
    }

    #[test]
    fn test_locked_session_blocks_structure_edits() {
        let mut s = session(linear_graph("wf", &["a", "b"], true));
        s.editor_mut().set_locked(true);

        assert!(!s.pointer_down_on_node("a", Position::default()).unwrap());
        assert_eq!(s.editor().selection(), &Selection::Node("a".into()));
        assert!(matches!(s.delete_selected(), Err(WeftError::Locked)));
        assert!(!s.pointer_down_on_output("a", Position::default()).unwrap());
        assert_eq!(s.graph().nodes.len(), 2);

        s.editor_mut().set_locked(false);
        assert!(s.delete_selected().unwrap());
        assert_eq!(s.graph().nodes.len(), 1);
        assert!(s.graph().edges.is_empty());
        assert_eq!(s.editor().selection(), &Selection::None);
    }

    #[tokio::test]
    async fn test_save_rejects_cycle_and_keeps_state() {
        let store = MemoryStore::new();
        let mut s = session(linear_graph("wf", &["a", "b", "c"], true));
        s.model.mark_saved(s.graph().clone());
        assert!(connect(&mut s, "c", "a").is_some());

        let err = s.save(&store).await.unwrap_err();
        assert!(err.is_validation());
        assert!(s.is_dirty());
        assert_eq!(s.graph().edges.len(), 3);
        assert!(store.load_graph("wf").await.is_err());
    }

    #[tokio::test]
    async fn test_save_clears_dirty() {
        let store = MemoryStore::new();
        let mut s = session(linear_graph("wf", &["a", "b"], true));
        s.add_agent("reporter", Position::new(500.0, 0.0)).unwrap();
        let saved = s.save(&store).await.unwrap();
        assert_eq!(saved.nodes.len(), 3);
        assert!(!s.is_dirty());
        assert_eq!(store.load_graph("wf").await.unwrap(), saved);
    }

    #[tokio::test]
    async fn test_failed_save_keeps_dirty() {
        let store = MemoryStore::new();
        store.fail_writes(true);
        let mut s = session(Graph::new("wf", "g"));
        s.add_agent("coder", Position::default()).unwrap();
        let err = s.save(&store).await.unwrap_err();
        assert!(err.is_persistence());
        assert!(s.is_dirty());
    }
}
