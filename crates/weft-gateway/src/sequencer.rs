//! Server-side execution: walks a stored mission's sub-tasks in order and
//! emits the execution stream events for it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use weft_core::traits::PersistenceAdapter;
use weft_core::types::{Mission, MissionPatch, MissionStatus};
use weft_mission::reducer;
use weft_mission::runner::simulated::{summarize, synthesize_output};
use weft_mission::{ExecutionEvent, MissionDelta};

/// Run `mission` in the background. The receiver yields every event and
/// closes once the final mission has been mirrored to `store`.
pub(crate) fn spawn(
    mission: Mission,
    step_delay: Duration,
    store: Arc<dyn PersistenceAdapter>,
) -> mpsc::Receiver<ExecutionEvent> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(run(mission, step_delay, store, tx));
    rx
}

async fn run(
    mut mission: Mission,
    step_delay: Duration,
    store: Arc<dyn PersistenceAdapter>,
    tx: mpsc::Sender<ExecutionEvent>,
) {
    if mission.status != MissionStatus::Pending {
        reducer::apply(&mut mission, &MissionDelta::Reset);
    }
    let total = mission.sub_tasks.len();
    info!(mission_id = %mission.id, total, "Server-side execution started");

    if !emit(&tx, &mut mission, ExecutionEvent::Start { total }).await {
        return;
    }
    for step in 0..total {
        if !emit(&tx, &mut mission, ExecutionEvent::StepStart { step }).await {
            return;
        }
        tokio::time::sleep(step_delay).await;
        let complete = ExecutionEvent::StepComplete {
            step,
            output: synthesize_output(&mission.sub_tasks[step]),
            duration_ms: step_delay.as_millis() as u64,
        };
        if !emit(&tx, &mut mission, complete).await {
            return;
        }
    }
    let result = summarize(&mission);
    if !emit(&tx, &mut mission, ExecutionEvent::Complete { result }).await {
        return;
    }

    let patch = MissionPatch::snapshot(&mission);
    if let Err(e) = store
        .update_mission(&mission.workflow_id, &mission.id, patch)
        .await
    {
        warn!(mission_id = %mission.id, error = %e, "Failed to mirror executed mission");
    }
}

/// Apply `event` locally, then send it. False once the client has gone.
async fn emit(tx: &mpsc::Sender<ExecutionEvent>, mission: &mut Mission, event: ExecutionEvent) -> bool {
    if let Some(delta) = event.clone().into_delta() {
        reducer::apply(mission, &delta);
    }
    if tx.send(event).await.is_err() {
        debug!(mission_id = %mission.id, "Execution stream client disconnected");
        return false;
    }
    true
}
