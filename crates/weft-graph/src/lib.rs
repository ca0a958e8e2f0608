//! Graph editing: the node/edge model, cycle validation, and the
//! interactive canvas state layered over it.
//!
//! `GraphModel` owns the data and its structural invariants. The
//! `EditingStateMachine` tracks selection, view transform, lock, node drag,
//! and connection drafts without touching the graph; `EditingSession` wires
//! pointer input through both and gates saves on `dag::validate`.

pub mod dag;
pub mod editor;
pub mod gate;
pub mod model;
pub mod session;

pub use dag::{is_acyclic, topological_order};
pub use editor::{ConnectionDraft, EditingStateMachine, Selection, ViewTransform};
pub use gate::{EdgeConfigGate, GateDecision, GateTarget};
pub use model::{AddEdge, ConnectionRejected, GraphModel};
pub use session::EditingSession;
