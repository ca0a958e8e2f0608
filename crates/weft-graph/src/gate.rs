use weft_core::types::{Edge, EdgeConfig, EdgeType};

use crate::editor::ConnectionRequest;

/// Which edge the configuration step is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateTarget {
    /// A completed connection draft not yet in the graph.
    NewEdge { source: String, target: String },
    /// An existing edge the user clicked.
    ExistingEdge { edge_id: String },
}

/// What the caller must apply to the graph after a confirm.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Create {
        source: String,
        target: String,
        edge_type: EdgeType,
        config: EdgeConfig,
    },
    Update {
        edge_id: String,
        edge_type: EdgeType,
        config: EdgeConfig,
    },
}

#[derive(Debug, Clone)]
struct PendingEdit {
    target: GateTarget,
    edge_type: EdgeType,
    config: EdgeConfig,
}

/// Edge configuration step. Edges are created, and existing edge configs
/// change, only through `confirm`.
#[derive(Debug, Clone, Default)]
pub struct EdgeConfigGate {
    pending: Option<PendingEdit>,
}

impl EdgeConfigGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.pending.is_some()
    }

    pub fn target(&self) -> Option<&GateTarget> {
        self.pending.as_ref().map(|p| &p.target)
    }

    /// Draft values currently shown in the configuration step.
    pub fn draft(&self) -> Option<(EdgeType, &EdgeConfig)> {
        self.pending.as_ref().map(|p| (p.edge_type, &p.config))
    }

    /// Open for a new connection, starting from the default config.
    pub fn open_new(&mut self, request: ConnectionRequest) {
        self.pending = Some(PendingEdit {
            target: GateTarget::NewEdge {
                source: request.source,
                target: request.target,
            },
            edge_type: EdgeType::default(),
            config: EdgeConfig::default(),
        });
    }

    /// Open for an existing edge, starting from its current config.
    pub fn open_existing(&mut self, edge: &Edge) {
        self.pending = Some(PendingEdit {
            target: GateTarget::ExistingEdge {
                edge_id: edge.id.clone(),
            },
            edge_type: edge.edge_type,
            config: edge.config.clone(),
        });
    }

    /// Edit the draft. No-op when closed.
    pub fn edit(&mut self, f: impl FnOnce(&mut EdgeType, &mut EdgeConfig)) {
        if let Some(p) = self.pending.as_mut() {
            f(&mut p.edge_type, &mut p.config);
        }
    }

    /// Accept the draft and close.
    pub fn confirm(&mut self) -> Option<GateDecision> {
        let p = self.pending.take()?;
        Some(match p.target {
            GateTarget::NewEdge { source, target } => GateDecision::Create {
                source,
                target,
                edge_type: p.edge_type,
                config: p.config,
            },
            GateTarget::ExistingEdge { edge_id } => GateDecision::Update {
                edge_id,
                edge_type: p.edge_type,
                config: p.config,
            },
        })
    }

    /// Discard the draft. New edges are not created.
    pub fn cancel(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ConnectionRequest {
        ConnectionRequest {
            source: "a".into(),
            target: "b".into(),
        }
    }

    #[test]
    fn test_new_edge_defaults_when_accepted_unchanged() {
        let mut gate = EdgeConfigGate::new();
        gate.open_new(request());
        assert!(gate.is_open());
        let decision = gate.confirm().unwrap();
        assert_eq!(
            decision,
            GateDecision::Create {
                source: "a".into(),
                target: "b".into(),
                edge_type: EdgeType::DataFlow,
                config: EdgeConfig {
                    data_format: "auto".into(),
                    transform: "pass".into(),
                    priority: 5,
                    blocking: true,
                    timeout: 300,
                    condition: None,
                },
            }
        );
        assert!(!gate.is_open());
    }

    #[test]
    fn test_edits_apply_on_confirm() {
        let mut gate = EdgeConfigGate::new();
        gate.open_new(request());
        gate.edit(|ty, cfg| {
            *ty = EdgeType::Conditional;
            cfg.priority = 8;
        });
        match gate.confirm() {
            Some(GateDecision::Create { edge_type, config, .. }) => {
                assert_eq!(edge_type, EdgeType::Conditional);
                assert_eq!(config.priority, 8);
            }
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[test]
    fn test_cancel_creates_nothing() {
        let mut gate = EdgeConfigGate::new();
        gate.open_new(request());
        gate.cancel();
        assert!(gate.confirm().is_none());
    }

    #[test]
    fn test_existing_edge_starts_from_current_config() {
        let edge = Edge::new(
            "a",
            "b",
            EdgeType::StorageWrite,
            EdgeConfig {
                timeout: 60,
                ..Default::default()
            },
        );
        let mut gate = EdgeConfigGate::new();
        gate.open_existing(&edge);
        let (ty, cfg) = gate.draft().unwrap();
        assert_eq!(ty, EdgeType::StorageWrite);
        assert_eq!(cfg.timeout, 60);
        assert_eq!(
            gate.target(),
            Some(&GateTarget::ExistingEdge { edge_id: edge.id.clone() })
        );
        assert!(matches!(gate.confirm(), Some(GateDecision::Update { .. })));
    }
}
