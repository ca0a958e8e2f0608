use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::*;

/// Persistence adapter for graphs, missions, and the document library.
pub trait PersistenceAdapter: Send + Sync + 'static {
    /// Load a graph by workflow id.
    fn load_graph(&self, id: &str) -> BoxFuture<'_, Result<Graph>>;

    /// Save a graph as one unit (nodes and edges together).
    fn save_graph(&self, id: &str, graph: &Graph) -> BoxFuture<'_, Result<Graph>>;

    /// List missions created for a workflow, newest first.
    fn list_missions(&self, workflow_id: &str) -> BoxFuture<'_, Result<Vec<Mission>>>;

    /// Create a mission in `pending` state.
    fn create_mission(&self, workflow_id: &str, new: NewMission) -> BoxFuture<'_, Result<Mission>>;

    /// Merge a partial update into a stored mission.
    fn update_mission(
        &self,
        workflow_id: &str,
        mission_id: &MissionId,
        patch: MissionPatch,
    ) -> BoxFuture<'_, Result<()>>;

    /// Write the mission's result into the document library.
    fn save_mission_result_to_library(
        &self,
        workflow_id: &str,
        mission_id: &MissionId,
        tags: Vec<String>,
    ) -> BoxFuture<'_, Result<LibraryDocument>>;
}

/// Agent directory: resolves agent descriptors by type.
pub trait AgentDirectory: Send + Sync + 'static {
    /// Resolve a profile; customized profiles win over built-ins.
    fn resolve(&self, agent_type: &str) -> Option<AgentProfile>;

    /// All known profiles.
    fn profiles(&self) -> Vec<AgentProfile>;

    /// Display name for `agent_type`, or the type itself when unknown.
    fn display_name(&self, agent_type: &str) -> String {
        self.resolve(agent_type)
            .map(|p| p.display_name)
            .unwrap_or_else(|| agent_type.to_string())
    }
}
