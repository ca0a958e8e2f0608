use std::sync::Arc;

use weft_core::config::GatewayConfig;
use weft_core::traits::{AgentDirectory, PersistenceAdapter};

/// Shared state for all gateway handlers.
pub struct AppState {
    pub config: GatewayConfig,
    pub store: Arc<dyn PersistenceAdapter>,
    pub directory: Arc<dyn AgentDirectory>,
    /// Leader used when a create request names none.
    pub default_leader: String,
}
