use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use futures::future::BoxFuture;
use tokio::sync::Notify;

use weft_core::error::{Result, WeftError};
use weft_core::traits::PersistenceAdapter;
use weft_core::types::{
    new_id, Graph, LibraryDocument, Mission, MissionId, MissionPatch, NewMission,
};

/// A library document captured by `MemoryStore`.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub document_id: String,
    pub workflow_id: String,
    pub mission_id: MissionId,
    pub tags: Vec<String>,
    pub result: Option<String>,
}

#[derive(Default)]
struct Inner {
    graphs: HashMap<String, Graph>,
    missions: HashMap<String, Vec<Mission>>,
    documents: Vec<StoredDocument>,
    updates: Vec<(MissionId, MissionPatch)>,
}

/// In-memory `PersistenceAdapter` with switchable failures.
///
/// Reads (`load_graph`, `list_missions`) and writes (everything else) can be
/// made to fail independently. Every `update_mission` call is recorded,
/// including failed ones.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    updated: Notify,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with one graph.
    pub fn with_graph(graph: Graph) -> Self {
        let store = Self::new();
        store.put_graph(graph);
        store
    }

    pub fn put_graph(&self, graph: Graph) {
        self.lock().graphs.insert(graph.id.clone(), graph);
    }

    pub fn put_mission(&self, mission: Mission) {
        self.lock()
            .missions
            .entry(mission.workflow_id.clone())
            .or_default()
            .push(mission);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Stored copy of a mission.
    pub fn mission(&self, workflow_id: &str, mission_id: &MissionId) -> Option<Mission> {
        self.lock()
            .missions
            .get(workflow_id)
            .and_then(|ms| ms.iter().find(|m| &m.id == mission_id).cloned())
    }

    /// Every `update_mission` call seen so far, in order.
    pub fn updates(&self) -> Vec<(MissionId, MissionPatch)> {
        self.lock().updates.clone()
    }

    pub fn documents(&self) -> Vec<StoredDocument> {
        self.lock().documents.clone()
    }

    /// Wait until at least `count` `update_mission` calls were made.
    pub async fn wait_for_updates(&self, count: usize) {
        loop {
            let notified = self.updated.notified();
            if self.lock().updates.len() >= count {
                return;
            }
            notified.await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_reads(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(WeftError::Persistence("read failed (injected)".into()));
        }
        Ok(())
    }

    fn check_writes(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(WeftError::Persistence("write failed (injected)".into()));
        }
        Ok(())
    }
}

impl PersistenceAdapter for MemoryStore {
    fn load_graph(&self, id: &str) -> BoxFuture<'_, Result<Graph>> {
        let id = id.to_string();
        Box::pin(async move {
            self.check_reads()?;
            self.lock()
                .graphs
                .get(&id)
                .cloned()
                .ok_or_else(|| WeftError::NotFound(format!("graph {id}")))
        })
    }

    fn save_graph(&self, id: &str, graph: &Graph) -> BoxFuture<'_, Result<Graph>> {
        let id = id.to_string();
        let mut graph = graph.clone();
        Box::pin(async move {
            self.check_writes()?;
            graph.id = id.clone();
            self.lock().graphs.insert(id, graph.clone());
            Ok(graph)
        })
    }

    fn list_missions(&self, workflow_id: &str) -> BoxFuture<'_, Result<Vec<Mission>>> {
        let workflow_id = workflow_id.to_string();
        Box::pin(async move {
            self.check_reads()?;
            let mut missions = self
                .lock()
                .missions
                .get(&workflow_id)
                .cloned()
                .unwrap_or_default();
            missions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(missions)
        })
    }

    fn create_mission(&self, workflow_id: &str, new: NewMission) -> BoxFuture<'_, Result<Mission>> {
        let workflow_id = workflow_id.to_string();
        Box::pin(async move {
            self.check_writes()?;
            let mission = Mission::from_new(workflow_id, new);
            self.put_mission(mission.clone());
            Ok(mission)
        })
    }

    fn update_mission(
        &self,
        workflow_id: &str,
        mission_id: &MissionId,
        patch: MissionPatch,
    ) -> BoxFuture<'_, Result<()>> {
        let workflow_id = workflow_id.to_string();
        let mission_id = mission_id.clone();
        Box::pin(async move {
            let outcome = {
                let mut inner = self.lock();
                inner.updates.push((mission_id.clone(), patch.clone()));
                self.check_writes().and_then(|_| {
                    let mission = inner
                        .missions
                        .get_mut(&workflow_id)
                        .and_then(|ms| ms.iter_mut().find(|m| m.id == mission_id))
                        .ok_or_else(|| WeftError::MissionNotFound(mission_id.to_string()))?;
                    mission.apply_patch(&patch);
                    Ok(())
                })
            };
            self.updated.notify_waiters();
            outcome
        })
    }

    fn save_mission_result_to_library(
        &self,
        workflow_id: &str,
        mission_id: &MissionId,
        tags: Vec<String>,
    ) -> BoxFuture<'_, Result<LibraryDocument>> {
        let workflow_id = workflow_id.to_string();
        let mission_id = mission_id.clone();
        Box::pin(async move {
            self.check_writes()?;
            let result = self
                .mission(&workflow_id, &mission_id)
                .ok_or_else(|| WeftError::MissionNotFound(mission_id.to_string()))?
                .result;
            let document_id = new_id("doc");
            self.lock().documents.push(StoredDocument {
                document_id: document_id.clone(),
                workflow_id,
                mission_id,
                tags,
                result,
            });
            Ok(LibraryDocument { document_id })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::types::{MissionStatus, SubTask};

    fn new_mission() -> NewMission {
        NewMission {
            leader_type: "coordinator".into(),
            leader_name: "Coordinator".into(),
            description: "test".into(),
            sub_tasks: vec![SubTask::new("Step 1", "researcher", "Researcher")],
        }
    }

    #[tokio::test]
    async fn test_update_merges_and_records() {
        let store = MemoryStore::new();
        let mission = store.create_mission("wf", new_mission()).await.unwrap();
        let patch = MissionPatch {
            status: Some(MissionStatus::Completed),
            result: Some(Some("done".into())),
            ..Default::default()
        };
        store.update_mission("wf", &mission.id, patch).await.unwrap();

        let stored = store.mission("wf", &mission.id).unwrap();
        assert_eq!(stored.status, MissionStatus::Completed);
        assert_eq!(stored.result.as_deref(), Some("done"));
        assert_eq!(store.updates().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_update_still_recorded() {
        let store = MemoryStore::new();
        let mission = store.create_mission("wf", new_mission()).await.unwrap();
        store.fail_writes(true);
        let err = store
            .update_mission("wf", &mission.id, MissionPatch::default())
            .await
            .unwrap_err();
        assert!(err.is_persistence());
        assert_eq!(store.updates().len(), 1);
    }

    #[tokio::test]
    async fn test_injected_read_failure() {
        let store = MemoryStore::new();
        store.fail_reads(true);
        assert!(store.list_missions("wf").await.is_err());
    }
}
