use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use rand::Rng;
use tracing::{debug, info, warn};

use weft_core::config::ExecutionConfig;
use weft_core::error::Result;
use weft_core::event::EventBus;
use weft_core::traits::PersistenceAdapter;
use weft_core::types::{Mission, MissionEvent, MissionPatch, MissionStatus, SubTask, SubTaskStatus};

use crate::reducer::{self, MissionDelta};
use crate::runner::Runner;

/// Local stand-in for the execution service.
///
/// One sub-task transition per tick: pending to running, then running to
/// completed on the next tick. After the last sub-task the mission completes
/// with a summary and is mirrored to the store without waiting.
pub struct SimulatedRunner {
    tick: Duration,
    min_duration_ms: u64,
    max_duration_ms: u64,
    store: Arc<dyn PersistenceAdapter>,
    bus: Arc<EventBus>,
}

impl SimulatedRunner {
    pub fn new(config: &ExecutionConfig, store: Arc<dyn PersistenceAdapter>, bus: Arc<EventBus>) -> Self {
        Self {
            tick: Duration::from_millis(config.tick_interval_ms),
            min_duration_ms: config.sim_min_duration_ms,
            max_duration_ms: config.sim_max_duration_ms.max(config.sim_min_duration_ms),
            store,
            bus,
        }
    }

    async fn next_delta(&mut self, mission: &Mission) -> Result<Option<MissionDelta>> {
        match mission.status {
            MissionStatus::Pending => {
                return Ok(Some(MissionDelta::Started {
                    total: mission.sub_tasks.len(),
                }))
            }
            MissionStatus::Running => {}
            _ => return Ok(None),
        }

        let running = mission
            .sub_tasks
            .iter()
            .position(|t| t.status == SubTaskStatus::Running);
        let pending = mission
            .sub_tasks
            .iter()
            .position(|t| t.status == SubTaskStatus::Pending);

        let delta = match (running, pending) {
            (Some(step), _) => {
                tokio::time::sleep(self.tick).await;
                MissionDelta::StepCompleted {
                    step,
                    output: synthesize_output(&mission.sub_tasks[step]),
                    duration_ms: self.duration_ms(),
                    at: Utc::now(),
                }
            }
            (None, Some(step)) => {
                tokio::time::sleep(self.tick).await;
                MissionDelta::StepStarted { step, at: Utc::now() }
            }
            (None, None) => {
                let delta = MissionDelta::Completed {
                    result: summarize(mission),
                };
                self.mirror(mission, &delta);
                delta
            }
        };
        Ok(Some(delta))
    }

    fn duration_ms(&self) -> u64 {
        rand::thread_rng().gen_range(self.min_duration_ms..=self.max_duration_ms)
    }

    /// Push the completed mission to the store in the background.
    fn mirror(&self, mission: &Mission, delta: &MissionDelta) {
        let mut finished = mission.clone();
        reducer::apply(&mut finished, delta);
        let patch = MissionPatch::snapshot(&finished);
        let store = self.store.clone();
        let bus = self.bus.clone();

        tokio::spawn(async move {
            let (workflow_id, mission_id) = (finished.workflow_id, finished.id);
            match store.update_mission(&workflow_id, &mission_id, patch).await {
                Ok(()) => debug!(mission_id = %mission_id, "Mission mirrored to store"),
                Err(e) => {
                    warn!(mission_id = %mission_id, error = %e, "Mission sync failed");
                    bus.publish(MissionEvent::SyncFailed {
                        mission_id,
                        error: e.to_string(),
                    });
                }
            }
        });
    }
}

impl Runner for SimulatedRunner {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn advance<'a>(&'a mut self, mission: &'a Mission) -> BoxFuture<'a, Result<Option<MissionDelta>>> {
        Box::pin(self.next_delta(mission))
    }
}

/// Canned step output for `task`, keyed by agent type.
pub fn synthesize_output(task: &SubTask) -> String {
    let subject = task.input.as_deref().unwrap_or(task.title.as_str());
    let body = match task.agent_type.as_str() {
        "coordinator" => "Broke the request into ordered work items and assigned an owner to each.",
        "researcher" => "Collected background sources and extracted the relevant facts.",
        "analyst" => "Compared the gathered material and identified the main findings.",
        "validator" => "Cross-checked the findings; no contradictions remain open.",
        "reporter" => "Compiled the findings into a structured final report.",
        "writer" => "Drafted the narrative sections from the available material.",
        "coder" => "Produced and reviewed the code changes for this step.",
        "critic" => "Challenged the weakest assumptions and recorded the objections.",
        "planner" => "Laid out a step-by-step plan with checkpoints.",
        "data_engineer" => "Cleaned and reshaped the datasets for downstream use.",
        _ => "Completed the assigned work.",
    };
    format!("[{}] {} ({})", task.agent_name, body, truncate(subject, 80))
}

/// Summary result for a mission whose sub-tasks have all finished.
pub fn summarize(mission: &Mission) -> String {
    let completed = mission.completed_count();
    let failed = mission.failed_count();
    let mut summary = format!(
        "{} finished \"{}\": {} of {} steps completed",
        mission.leader_name,
        mission.description,
        completed,
        mission.sub_tasks.len()
    );
    if failed > 0 {
        summary.push_str(&format!(", {} failed", failed));
    }
    summary.push('.');
    for task in &mission.sub_tasks {
        let mark = match task.status {
            SubTaskStatus::Completed => "done",
            SubTaskStatus::Failed => "failed",
            _ => "skipped",
        };
        summary.push_str(&format!("\n- {} [{}]", task.title, mark));
    }
    info!(mission_id = %mission.id, completed, failed, "Simulated mission summarized");
    summary
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}
