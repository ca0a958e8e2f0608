use tracing::debug;

use weft_core::config::EditorConfig;
use weft_core::types::{Graph, Position};

/// What is currently selected. Selecting one kind clears the other.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Selection {
    #[default]
    None,
    Node(String),
    Edge(String),
}

/// Transient state while the user drags out a new edge.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ConnectionDraft {
    #[default]
    Idle,
    Connecting {
        source: String,
        /// Pointer in graph coordinates.
        pointer: Position,
    },
}

/// Zoom and pan applied to the canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewTransform {
    pub zoom: f64,
    pub pan: Position,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            pan: Position::default(),
        }
    }
}

impl ViewTransform {
    /// Map a screen point into graph coordinates.
    pub fn to_graph(&self, screen: Position) -> Position {
        Position::new(
            (screen.x - self.pan.x) / self.zoom,
            (screen.y - self.pan.y) / self.zoom,
        )
    }

    /// Map a graph point onto the screen.
    pub fn to_screen(&self, graph: Position) -> Position {
        Position::new(
            graph.x * self.zoom + self.pan.x,
            graph.y * self.zoom + self.pan.y,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
struct NodeDrag {
    node_id: String,
    /// Pointer minus node position at pointer-down, in graph coordinates.
    offset: Position,
}

/// A finished connection draft waiting for the edge configuration gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequest {
    pub source: String,
    pub target: String,
}

/// Interactive canvas state. Never mutates the graph itself; callers apply
/// the positions and connection requests it produces.
#[derive(Debug, Clone)]
pub struct EditingStateMachine {
    config: EditorConfig,
    selection: Selection,
    draft: ConnectionDraft,
    locked: bool,
    view: ViewTransform,
    drag: Option<NodeDrag>,
}

impl EditingStateMachine {
    pub fn new(config: EditorConfig) -> Self {
        Self {
            config,
            selection: Selection::None,
            draft: ConnectionDraft::Idle,
            locked: false,
            view: ViewTransform::default(),
            drag: None,
        }
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn draft(&self) -> &ConnectionDraft {
        &self.draft
    }

    pub fn view(&self) -> ViewTransform {
        self.view
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    // ── Selection ───────────────────────────────────────────────

    pub fn select_node(&mut self, id: impl Into<String>) {
        self.selection = Selection::Node(id.into());
    }

    pub fn select_edge(&mut self, id: impl Into<String>) {
        self.selection = Selection::Edge(id.into());
    }

    pub fn clear_selection(&mut self) {
        self.selection = Selection::None;
    }

    /// Drop a selection that points at an element that no longer exists.
    pub fn forget(&mut self, id: &str) {
        let stale = match &self.selection {
            Selection::Node(n) => n == id,
            Selection::Edge(e) => e == id,
            Selection::None => false,
        };
        if stale {
            self.selection = Selection::None;
        }
    }

    // ── Lock ────────────────────────────────────────────────────

    /// Locking aborts any drag or draft in progress.
    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
        if locked {
            self.drag = None;
            self.draft = ConnectionDraft::Idle;
        }
        debug!(locked, "Canvas lock changed");
    }

    pub fn toggle_lock(&mut self) -> bool {
        self.set_locked(!self.locked);
        self.locked
    }

    /// Whether structural deletion is currently allowed.
    pub fn can_delete(&self) -> bool {
        !self.locked
    }

    // ── View transform ──────────────────────────────────────────

    pub fn set_zoom(&mut self, zoom: f64) {
        self.view.zoom = zoom.clamp(self.config.min_zoom, self.config.max_zoom);
    }

    pub fn zoom_in(&mut self) {
        self.set_zoom(self.view.zoom + self.config.zoom_step);
    }

    pub fn zoom_out(&mut self) {
        self.set_zoom(self.view.zoom - self.config.zoom_step);
    }

    /// Zoom keeping the graph point under `anchor` (screen) fixed.
    pub fn zoom_at(&mut self, zoom: f64, anchor: Position) {
        let before = self.view.to_graph(anchor);
        self.set_zoom(zoom);
        self.view.pan = Position::new(
            anchor.x - before.x * self.view.zoom,
            anchor.y - before.y * self.view.zoom,
        );
    }

    pub fn pan_by(&mut self, dx: f64, dy: f64) {
        self.view.pan = Position::new(self.view.pan.x + dx, self.view.pan.y + dy);
    }

    pub fn reset_view(&mut self) {
        self.view = ViewTransform::default();
    }

    // ── Node drag ───────────────────────────────────────────────

    /// Pointer-down on a node. Returns false when locked.
    pub fn begin_drag(&mut self, node_id: &str, pointer_screen: Position, node_pos: Position) -> bool {
        if self.locked {
            return false;
        }
        let pointer = self.view.to_graph(pointer_screen);
        self.drag = Some(NodeDrag {
            node_id: node_id.to_string(),
            offset: pointer - node_pos,
        });
        self.selection = Selection::Node(node_id.to_string());
        true
    }

    /// Pointer-move during a drag: the node's new position.
    pub fn drag_to(&self, pointer_screen: Position) -> Option<(&str, Position)> {
        let drag = self.drag.as_ref()?;
        let pointer = self.view.to_graph(pointer_screen);
        Some((drag.node_id.as_str(), pointer - drag.offset))
    }

    /// Pointer-up. There is no commit step; positions are already live.
    pub fn end_drag(&mut self) {
        self.drag = None;
    }

    // ── Connection draft ────────────────────────────────────────

    /// Pointer-down on `source`'s output anchor. Returns false when locked.
    pub fn begin_connection(&mut self, source: &str, pointer_screen: Position) -> bool {
        if self.locked {
            return false;
        }
        self.draft = ConnectionDraft::Connecting {
            source: source.to_string(),
            pointer: self.view.to_graph(pointer_screen),
        };
        true
    }

    pub fn update_pointer(&mut self, pointer_screen: Position) {
        let view = self.view;
        if let ConnectionDraft::Connecting { pointer, .. } = &mut self.draft {
            *pointer = view.to_graph(pointer_screen);
        }
    }

    /// Pointer-up. `over_input_of` is the node whose input anchor is under
    /// the pointer, if any. Always returns the draft to idle.
    pub fn end_connection(&mut self, over_input_of: Option<&str>) -> Option<ConnectionRequest> {
        let draft = std::mem::take(&mut self.draft);
        let ConnectionDraft::Connecting { source, .. } = draft else {
            return None;
        };
        match over_input_of {
            Some(target) if target != source => Some(ConnectionRequest {
                source,
                target: target.to_string(),
            }),
            _ => {
                debug!(source = %source, "Connection draft cancelled");
                None
            }
        }
    }

    pub fn cancel_connection(&mut self) {
        self.draft = ConnectionDraft::Idle;
    }

    /// Line from the source node's center to the pointer, in graph coordinates.
    pub fn draft_line(&self, graph: &Graph) -> Option<(Position, Position)> {
        let ConnectionDraft::Connecting { source, pointer } = &self.draft else {
            return None;
        };
        let node = graph.node(source)?;
        Some((self.node_center(node.position), *pointer))
    }

    pub fn node_center(&self, top_left: Position) -> Position {
        Position::new(
            top_left.x + self.config.node_width / 2.0,
            top_left.y + self.config.node_height / 2.0,
        )
    }
}

impl Default for EditingStateMachine {
    fn default() -> Self {
        Self::new(EditorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::types::Node;

    #[test]
    fn test_selection_is_exclusive() {
        let mut sm = EditingStateMachine::default();
        sm.select_node("n1");
        assert_eq!(sm.selection(), &Selection::Node("n1".into()));
        sm.select_edge("e1");
        assert_eq!(sm.selection(), &Selection::Edge("e1".into()));
        sm.forget("e1");
        assert_eq!(sm.selection(), &Selection::None);
    }

    #[test]
    fn test_zoom_is_clamped_pan_is_not() {
        let mut sm = EditingStateMachine::default();
        sm.set_zoom(10.0);
        assert_eq!(sm.view().zoom, 2.0);
        sm.set_zoom(0.01);
        assert_eq!(sm.view().zoom, 0.25);
        for _ in 0..100 {
            sm.zoom_out();
        }
        assert_eq!(sm.view().zoom, 0.25);

        sm.pan_by(-1e6, 5e6);
        assert_eq!(sm.view().pan, Position::new(-1e6, 5e6));
    }

    #[test]
    fn test_zoom_at_keeps_anchor_fixed() {
        let mut sm = EditingStateMachine::default();
        sm.pan_by(40.0, 10.0);
        let anchor = Position::new(300.0, 200.0);
        let before = sm.view().to_graph(anchor);
        sm.zoom_at(1.5, anchor);
        let after = sm.view().to_graph(anchor);
        assert!((before.x - after.x).abs() < 1e-9);
        assert!((before.y - after.y).abs() < 1e-9);
    }

    #[test]
    fn test_screen_graph_conversion() {
        let mut sm = EditingStateMachine::default();
        sm.pan_by(100.0, 50.0);
        sm.set_zoom(2.0);
        let view = sm.view();
        let g = view.to_graph(Position::new(300.0, 250.0));
        assert_eq!(g, Position::new(100.0, 100.0));
        assert_eq!(view.to_screen(g), Position::new(300.0, 250.0));
    }

    #[test]
    fn test_connection_to_other_node_produces_request() {
        let mut sm = EditingStateMachine::default();
        assert!(sm.begin_connection("a", Position::new(0.0, 0.0)));
        sm.update_pointer(Position::new(50.0, 60.0));
        assert_eq!(
            sm.draft(),
            &ConnectionDraft::Connecting {
                source: "a".into(),
                pointer: Position::new(50.0, 60.0)
            }
        );
        let req = sm.end_connection(Some("b")).unwrap();
        assert_eq!(req, ConnectionRequest { source: "a".into(), target: "b".into() });
        assert_eq!(sm.draft(), &ConnectionDraft::Idle);
    }

    #[test]
    fn test_connection_to_self_or_nowhere_cancels() {
        let mut sm = EditingStateMachine::default();
        sm.begin_connection("a", Position::default());
        assert!(sm.end_connection(Some("a")).is_none());
        assert_eq!(sm.draft(), &ConnectionDraft::Idle);

        sm.begin_connection("a", Position::default());
        assert!(sm.end_connection(None).is_none());
        assert_eq!(sm.draft(), &ConnectionDraft::Idle);

        assert!(sm.end_connection(Some("b")).is_none());
    }

    #[test]
    fn test_lock_blocks_drag_draft_and_delete() {
        let mut sm = EditingStateMachine::default();
        sm.begin_connection("a", Position::default());
        sm.set_locked(true);
        assert_eq!(sm.draft(), &ConnectionDraft::Idle);

        assert!(!sm.begin_connection("a", Position::default()));
        assert!(!sm.begin_drag("a", Position::default(), Position::default()));
        assert!(!sm.can_delete());

        // Selection and view remain available.
        sm.select_node("a");
        sm.zoom_in();
        sm.pan_by(5.0, 5.0);
        assert_eq!(sm.selection(), &Selection::Node("a".into()));
        assert!(sm.view().zoom > 1.0);

        assert!(!sm.toggle_lock());
        assert!(sm.can_delete());
    }

    #[test]
    fn test_drag_follows_pointer_minus_offset() {
        let mut sm = EditingStateMachine::default();
        sm.set_zoom(2.0);
        // Node at graph (100, 100); pointer-down at screen (220, 240) = graph (110, 120).
        assert!(sm.begin_drag("n", Position::new(220.0, 240.0), Position::new(100.0, 100.0)));
        let (id, pos) = sm.drag_to(Position::new(420.0, 440.0)).unwrap();
        assert_eq!(id, "n");
        assert_eq!(pos, Position::new(200.0, 200.0));
        sm.end_drag();
        assert!(sm.drag_to(Position::default()).is_none());
    }

    #[test]
    fn test_draft_line_starts_at_node_center() {
        let mut graph = Graph::new("wf", "g");
        graph
            .nodes
            .push(Node::new("coder", Position::new(10.0, 20.0)).with_id("a"));
        let mut sm = EditingStateMachine::default();
        sm.begin_connection("a", Position::new(400.0, 400.0));
        let (from, to) = sm.draft_line(&graph).unwrap();
        assert_eq!(from, Position::new(110.0, 60.0));
        assert_eq!(to, Position::new(400.0, 400.0));
    }
}
