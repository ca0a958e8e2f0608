use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use weft_core::config::AppConfig;
use weft_core::error::{Result, WeftError};
use weft_core::event::EventBus;
use weft_core::traits::{AgentDirectory, PersistenceAdapter};
use weft_core::types::{
    Graph, LibraryDocument, Mission, MissionEvent, MissionId, MissionPatch, MissionStatus,
};

use crate::derive::{derive_sub_tasks, plan_mission};
use crate::reducer::{self, MissionDelta};
use crate::runner::{EventSource, HttpEventSource, Runner, RunnerDeps};

type MissionCell = Arc<RwLock<Mission>>;

struct RunHandle {
    cancel: CancellationToken,
    /// Cancelled by the run task when it exits, however it exits.
    done: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns in-memory missions and the runner driving each of them.
///
/// At most one runner is active per mission id; every lifecycle action that
/// starts a runner stops the previous one first and waits for it to exit.
pub struct MissionExecutor {
    deps: RunnerDeps,
    directory: Arc<dyn AgentDirectory>,
    default_leader: String,
    missions: RwLock<HashMap<MissionId, MissionCell>>,
    /// Held across stop, check and spawn so concurrent actions on one id
    /// cannot leave an untracked runner behind.
    runs: Mutex<HashMap<MissionId, RunHandle>>,
}

impl MissionExecutor {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn PersistenceAdapter>,
        directory: Arc<dyn AgentDirectory>,
        bus: Arc<EventBus>,
    ) -> Self {
        let exec = &config.execution;
        let source = exec.stream_url.as_ref().map(|url| {
            Arc::new(HttpEventSource::new(url.clone(), exec.api_key.clone())) as Arc<dyn EventSource>
        });
        Self {
            deps: RunnerDeps {
                config: exec.clone(),
                store,
                bus,
                source,
            },
            directory,
            default_leader: config.mission.default_leader.clone(),
            missions: RwLock::new(HashMap::new()),
            runs: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the streaming endpoint.
    pub fn with_event_source(mut self, source: Arc<dyn EventSource>) -> Self {
        self.deps.source = Some(source);
        self
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.deps.bus.clone()
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<MissionEvent> {
        self.deps.bus.subscribe()
    }

    /// Pull a workflow's missions from the store into memory.
    ///
    /// A failing store reads as "no missions yet". Missions already held in
    /// memory win over their stored copies.
    pub async fn load(&self, workflow_id: &str) -> Vec<Mission> {
        match self.deps.store.list_missions(workflow_id).await {
            Ok(stored) => {
                let mut missions = self.missions.write().await;
                for mission in stored {
                    missions
                        .entry(mission.id.clone())
                        .or_insert_with(|| Arc::new(RwLock::new(mission)));
                }
            }
            Err(e) => {
                warn!(workflow_id = %workflow_id, error = %e, "Could not list missions; treating as empty");
            }
        }
        self.missions(workflow_id).await
    }

    /// In-memory missions of a workflow, newest first.
    pub async fn missions(&self, workflow_id: &str) -> Vec<Mission> {
        let cells: Vec<MissionCell> = self.missions.read().await.values().cloned().collect();
        let mut out = Vec::new();
        for cell in cells {
            let mission = cell.read().await;
            if mission.workflow_id == workflow_id {
                out.push(mission.clone());
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    /// Derive sub-tasks from `graph` and create a `pending` mission.
    pub async fn create(
        &self,
        workflow_id: &str,
        graph: &Graph,
        description: &str,
        leader_type: Option<&str>,
    ) -> Result<Mission> {
        let leader = leader_type.unwrap_or(&self.default_leader);
        let new = plan_mission(graph, description, leader, self.directory.as_ref());
        let mission = self.deps.store.create_mission(workflow_id, new).await?;
        info!(
            mission_id = %mission.id,
            workflow_id = %workflow_id,
            sub_tasks = mission.sub_tasks.len(),
            "Mission created"
        );
        self.missions
            .write()
            .await
            .insert(mission.id.clone(), Arc::new(RwLock::new(mission.clone())));
        Ok(mission)
    }

    /// Read-only copy of a mission.
    pub async fn snapshot(&self, id: &MissionId) -> Option<Mission> {
        let cell = self.missions.read().await.get(id).cloned()?;
        let mission = cell.read().await.clone();
        Some(mission)
    }

    /// Whether a runner is currently driving `id`.
    pub async fn is_executing(&self, id: &MissionId) -> bool {
        self.runs
            .lock()
            .await
            .get(id)
            .is_some_and(|run| !run.done.is_cancelled())
    }

    /// Begin executing a pending (or interrupted running) mission.
    pub async fn start(&self, id: &MissionId) -> Result<()> {
        let cell = self.cell(id).await?;
        let mut runs = self.runs.lock().await;
        halt(id, runs.remove(id)).await;
        {
            let mission = cell.read().await;
            if mission.status.is_terminal() {
                return Err(invalid(&mission, "start"));
            }
        }
        self.spawn_run(&mut runs, id, cell).await;
        Ok(())
    }

    /// Stop the runner and mark the mission cancelled.
    pub async fn cancel(&self, id: &MissionId) -> Result<Mission> {
        let cell = self.cell(id).await?;
        let snapshot = {
            let mut runs = self.runs.lock().await;
            halt(id, runs.remove(id)).await;
            let mut mission = cell.write().await;
            if mission.status.is_terminal() {
                return Err(invalid(&mission, "cancel"));
            }
            reducer::apply(&mut mission, &MissionDelta::Cancelled);
            mission.clone()
        };
        info!(mission_id = %id, "Mission cancelled");
        self.deps.bus.publish(MissionEvent::Cancelled {
            mission_id: id.clone(),
        });
        self.sync(&snapshot).await;
        Ok(snapshot)
    }

    /// Reset every sub-task and run again from the first.
    pub async fn retry(&self, id: &MissionId) -> Result<()> {
        self.restart(id, MissionDelta::Reset, "retry").await
    }

    /// Re-derive sub-tasks from `graph`, then retry.
    pub async fn replan(&self, id: &MissionId, graph: &Graph) -> Result<()> {
        let description = self
            .snapshot(id)
            .await
            .ok_or_else(|| WeftError::MissionNotFound(id.to_string()))?
            .description;
        let sub_tasks = derive_sub_tasks(graph, &description, self.directory.as_ref());
        self.restart(id, MissionDelta::Replanned { sub_tasks }, "replan").await
    }

    /// Mirror the completed mission and write its result into the library.
    pub async fn save_to_library(&self, id: &MissionId, tags: Vec<String>) -> Result<LibraryDocument> {
        let mission = self
            .snapshot(id)
            .await
            .ok_or_else(|| WeftError::MissionNotFound(id.to_string()))?;
        if mission.status != MissionStatus::Completed {
            return Err(invalid(&mission, "save to library"));
        }

        let store = &self.deps.store;
        store
            .update_mission(&mission.workflow_id, id, MissionPatch::snapshot(&mission))
            .await?;
        let doc = store
            .save_mission_result_to_library(&mission.workflow_id, id, tags)
            .await?;
        info!(mission_id = %id, document_id = %doc.document_id, "Mission saved to library");
        Ok(doc)
    }

    /// Wait for the current run of `id`, if any, to exit.
    pub async fn wait(&self, id: &MissionId) {
        let done = self.runs.lock().await.get(id).map(|run| run.done.clone());
        if let Some(done) = done {
            done.cancelled().await;
        }
    }

    /// Stop every runner. Missions keep their current state.
    pub async fn shutdown(&self) {
        let mut runs = self.runs.lock().await;
        let stopping: Vec<(MissionId, RunHandle)> = runs.drain().collect();
        for (id, run) in stopping {
            halt(&id, Some(run)).await;
        }
    }

    async fn restart(&self, id: &MissionId, delta: MissionDelta, action: &str) -> Result<()> {
        let cell = self.cell(id).await?;
        let mut runs = self.runs.lock().await;
        halt(id, runs.remove(id)).await;
        {
            let mut mission = cell.write().await;
            if !mission.status.is_terminal() {
                return Err(invalid(&mission, action));
            }
            reducer::apply(&mut mission, &delta);
            info!(mission_id = %id, action, sub_tasks = mission.sub_tasks.len(), "Mission restarted");
            self.deps.bus.publish(MissionEvent::Started {
                mission_id: id.clone(),
                total: mission.sub_tasks.len(),
            });
        }
        self.spawn_run(&mut runs, id, cell).await;
        Ok(())
    }

    async fn cell(&self, id: &MissionId) -> Result<MissionCell> {
        self.missions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| WeftError::MissionNotFound(id.to_string()))
    }

    /// Spawn a runner for `id`. Callers hold the `runs` guard from stopping
    /// the previous runner until this returns.
    async fn spawn_run(
        &self,
        runs: &mut HashMap<MissionId, RunHandle>,
        id: &MissionId,
        cell: MissionCell,
    ) {
        let cancel = CancellationToken::new();
        let done = CancellationToken::new();
        let runner = self.deps.primary();
        debug!(mission_id = %id, runner = runner.name(), "Spawning runner");

        let handle = tokio::spawn(drive(
            cell,
            runner,
            self.deps.clone(),
            cancel.clone(),
            done.clone(),
        ));
        let previous = runs.insert(id.clone(), RunHandle { cancel, done, handle });
        halt(id, previous).await;
    }

    async fn sync(&self, mission: &Mission) {
        let patch = MissionPatch::snapshot(mission);
        if let Err(e) = self
            .deps
            .store
            .update_mission(&mission.workflow_id, &mission.id, patch)
            .await
        {
            warn!(mission_id = %mission.id, error = %e, "Mission sync failed");
            self.deps.bus.publish(MissionEvent::SyncFailed {
                mission_id: mission.id.clone(),
                error: e.to_string(),
            });
        }
    }
}

/// Run loop for one mission: advance, reduce, publish, until terminal.
async fn drive(
    cell: MissionCell,
    mut runner: Box<dyn Runner>,
    deps: RunnerDeps,
    cancel: CancellationToken,
    done: CancellationToken,
) {
    let _done = done.drop_guard();

    loop {
        let snapshot = cell.read().await.clone();
        if snapshot.status.is_terminal() {
            break;
        }
        let mission_id = snapshot.id.clone();

        let step = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(mission_id = %mission_id, "Runner cancelled");
                break;
            }
            step = runner.advance(&snapshot) => step,
        };

        match step {
            Ok(Some(delta)) => {
                let mut mission = cell.write().await;
                if cancel.is_cancelled() {
                    break;
                }
                if reducer::apply(&mut mission, &delta) {
                    if let Some(event) = event_for(&mission, &delta) {
                        deps.bus.publish(event);
                    }
                }
            }
            Ok(None) => break,
            Err(e) if e.is_stream() && runner.name() != "simulated" => {
                warn!(mission_id = %mission_id, error = %e, "Execution stream failed, falling back to simulation");
                deps.bus.publish(MissionEvent::RunnerFallback {
                    mission_id,
                    reason: e.to_string(),
                });
                runner = deps.fallback();
            }
            Err(e) => {
                error!(mission_id = %mission_id, runner = runner.name(), error = %e, "Runner failed");
                let delta = MissionDelta::Failed {
                    reason: e.to_string(),
                };
                let mut mission = cell.write().await;
                if reducer::apply(&mut mission, &delta) {
                    if let Some(event) = event_for(&mission, &delta) {
                        deps.bus.publish(event);
                    }
                }
                break;
            }
        }
    }
}

/// Cancel a runner and wait for its task to exit.
async fn halt(id: &MissionId, run: Option<RunHandle>) {
    if let Some(run) = run {
        run.cancel.cancel();
        if let Err(e) = run.handle.await {
            warn!(mission_id = %id, error = %e, "Runner task ended abnormally");
        }
    }
}

fn event_for(mission: &Mission, delta: &MissionDelta) -> Option<MissionEvent> {
    let mission_id = mission.id.clone();
    let event = match delta {
        MissionDelta::Started { .. } | MissionDelta::Reset | MissionDelta::Replanned { .. } => {
            MissionEvent::Started {
                mission_id,
                total: mission.sub_tasks.len(),
            }
        }
        MissionDelta::StepStarted { step, .. } => MissionEvent::StepStarted {
            mission_id,
            step: *step,
            title: mission.sub_tasks.get(*step)?.title.clone(),
        },
        MissionDelta::StepCompleted {
            step, duration_ms, ..
        } => MissionEvent::StepCompleted {
            mission_id,
            step: *step,
            duration_ms: *duration_ms,
        },
        MissionDelta::StepFailed { step, error, .. } => MissionEvent::StepFailed {
            mission_id,
            step: *step,
            error: error.clone(),
        },
        MissionDelta::Completed { result } => MissionEvent::Completed {
            mission_id,
            result: result.clone(),
        },
        MissionDelta::Failed { reason } => MissionEvent::Failed {
            mission_id,
            reason: reason.clone(),
        },
        MissionDelta::Cancelled => MissionEvent::Cancelled { mission_id },
    };
    Some(event)
}

fn invalid(mission: &Mission, action: &str) -> WeftError {
    WeftError::InvalidTransition {
        mission_id: mission.id.to_string(),
        action: action.to_string(),
        status: mission.status.to_string(),
    }
}
