use thiserror::Error;

#[derive(Debug, Error)]
pub enum WeftError {
    // Validation errors
    #[error("Graph contains a cycle through: {}", nodes.join(", "))]
    CycleDetected { nodes: Vec<String> },

    #[error("Graph validation failed: {0}")]
    Validation(String),

    // Graph errors
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Edge not found: {0}")]
    EdgeNotFound(String),

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Unknown agent type: {0}")]
    UnknownAgentType(String),

    #[error("Editing is locked")]
    Locked,

    // Mission errors
    #[error("Mission not found: {0}")]
    MissionNotFound(String),

    #[error("Mission {mission_id} cannot {action} while {status}")]
    InvalidTransition {
        mission_id: String,
        action: String,
        status: String,
    },

    // Persistence errors
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Database error: {0}")]
    Database(String),

    // Stream errors
    #[error("Execution stream error: {0}")]
    Stream(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WeftError {
    /// True for errors a UI should show as a dismissible persistence message.
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::Database(_))
    }

    /// True when a lookup found no such record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::MissionNotFound(_))
    }

    /// True for errors that should trigger the simulated-runner fallback.
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// True for graph validation failures raised on save.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::CycleDetected { .. } | Self::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, WeftError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_nodes() {
        let err = WeftError::CycleDetected {
            nodes: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "Graph contains a cycle through: a, b");
        assert!(err.is_validation());
        assert!(!err.is_persistence());
    }

    #[test]
    fn test_error_classification() {
        assert!(WeftError::Stream("eof".into()).is_stream());
        assert!(WeftError::Database("locked".into()).is_persistence());
        assert!(!WeftError::Locked.is_stream());
    }

    #[test]
    fn test_missing_record_is_not_a_persistence_failure() {
        let missing = WeftError::NotFound("graph wf".into());
        assert!(missing.is_not_found());
        assert!(!missing.is_persistence());
        assert!(WeftError::MissionNotFound("m1".into()).is_not_found());
        assert!(!WeftError::Persistence("disk full".into()).is_not_found());
    }
}
