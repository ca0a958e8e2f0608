use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use weft_core::types::{Mission, MissionStatus, Progress, SubTask, SubTaskStatus};

/// One state change produced by a runner or a lifecycle action.
#[derive(Debug, Clone, PartialEq)]
pub enum MissionDelta {
    Started {
        total: usize,
    },
    StepStarted {
        step: usize,
        at: DateTime<Utc>,
    },
    StepCompleted {
        step: usize,
        output: String,
        duration_ms: u64,
        at: DateTime<Utc>,
    },
    StepFailed {
        step: usize,
        error: String,
        at: DateTime<Utc>,
    },
    Completed {
        result: String,
    },
    Failed {
        reason: String,
    },
    Cancelled,
    /// Every sub-task back to pending, mission running from step 0.
    Reset,
    /// Replace the sub-task list, then reset.
    Replanned {
        sub_tasks: Vec<SubTask>,
    },
}

impl MissionDelta {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::StepStarted { .. } => "step_started",
            Self::StepCompleted { .. } => "step_completed",
            Self::StepFailed { .. } => "step_failed",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
            Self::Reset => "reset",
            Self::Replanned { .. } => "replanned",
        }
    }
}

/// Apply `delta` to `mission`. Returns false when the delta was ignored.
///
/// Ignored deltas leave the mission untouched, `updated_at` included.
/// Terminal missions only accept `Reset` and `Replanned`. Step deltas must
/// name an existing sub-task whose predecessors are all terminal, and a
/// sub-task that already reached a terminal state is never overwritten.
pub fn apply(mission: &mut Mission, delta: &MissionDelta) -> bool {
    let restarting = matches!(delta, MissionDelta::Reset | MissionDelta::Replanned { .. });
    if mission.status.is_terminal() && !restarting {
        debug!(mission_id = %mission.id, status = %mission.status, delta = delta.kind(), "Ignoring delta for finished mission");
        return false;
    }

    let applied = match delta {
        MissionDelta::Started { total } => {
            let len = mission.sub_tasks.len();
            if *total != len {
                warn!(mission_id = %mission.id, total, sub_tasks = len, "Start total disagrees with sub-task count");
            }
            mission.status = MissionStatus::Running;
            mission.progress = Progress { current: 0, total: len };
            true
        }
        MissionDelta::StepStarted { step, at } => match step_slot(mission, *step) {
            Some(i) if mission.sub_tasks[i].status == SubTaskStatus::Pending => {
                if i > 0 && mission.sub_tasks[i].input.is_none() {
                    mission.sub_tasks[i].input = mission.sub_tasks[i - 1].output.clone();
                }
                let task = &mut mission.sub_tasks[i];
                task.status = SubTaskStatus::Running;
                task.started_at = Some(*at);
                if mission.status == MissionStatus::Pending {
                    mission.status = MissionStatus::Running;
                }
                true
            }
            _ => false,
        },
        MissionDelta::StepCompleted {
            step,
            output,
            duration_ms,
            at,
        } => match step_slot(mission, *step) {
            Some(i) if !mission.sub_tasks[i].status.is_terminal() => {
                let task = &mut mission.sub_tasks[i];
                task.status = SubTaskStatus::Completed;
                task.output = Some(output.clone());
                task.duration_ms = Some(*duration_ms);
                task.completed_at = Some(*at);
                task.started_at.get_or_insert(*at);
                let total = mission.sub_tasks.len();
                mission.progress.total = total;
                mission.progress.current = mission.progress.current.max(i + 1).min(total);
                true
            }
            _ => false,
        },
        MissionDelta::StepFailed { step, error, at } => match step_slot(mission, *step) {
            Some(i) if !mission.sub_tasks[i].status.is_terminal() => {
                let task = &mut mission.sub_tasks[i];
                task.status = SubTaskStatus::Failed;
                task.output = Some(error.clone());
                task.completed_at = Some(*at);
                task.started_at.get_or_insert(*at);
                true
            }
            _ => false,
        },
        MissionDelta::Completed { result } => {
            mission.status = MissionStatus::Completed;
            mission.result = Some(result.clone());
            true
        }
        MissionDelta::Failed { reason } => {
            debug!(mission_id = %mission.id, reason = %reason, "Mission failed");
            mission.status = MissionStatus::Failed;
            true
        }
        MissionDelta::Cancelled => {
            mission.status = MissionStatus::Cancelled;
            true
        }
        MissionDelta::Reset => {
            reset(mission);
            true
        }
        MissionDelta::Replanned { sub_tasks } => {
            mission.sub_tasks = sub_tasks.clone();
            reset(mission);
            true
        }
    };

    if applied {
        mission.updated_at = Utc::now();
    } else {
        debug!(mission_id = %mission.id, delta = delta.kind(), "Delta ignored");
    }
    applied
}

fn reset(mission: &mut Mission) {
    for task in &mut mission.sub_tasks {
        task.reset();
        task.input = None;
    }
    // Inputs past the first are chained again from the new run's outputs.
    if let Some(first) = mission.sub_tasks.first_mut() {
        first.input = Some(mission.description.clone());
    }
    mission.progress = Progress {
        current: 0,
        total: mission.sub_tasks.len(),
    };
    mission.result = None;
    mission.status = MissionStatus::Running;
}

/// Validate a step index against bounds and sequential ordering.
fn step_slot(mission: &Mission, step: usize) -> Option<usize> {
    if step >= mission.sub_tasks.len() {
        warn!(mission_id = %mission.id, step, sub_tasks = mission.sub_tasks.len(), "Step index out of range");
        return None;
    }
    if let Some(blocking) = mission.sub_tasks[..step]
        .iter()
        .position(|t| !t.status.is_terminal())
    {
        warn!(mission_id = %mission.id, step, blocking, "Step would run ahead of an unfinished predecessor");
        return None;
    }
    Some(step)
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::types::NewMission;

    fn mission(n: usize) -> Mission {
        Mission::from_new(
            "wf",
            NewMission {
                leader_type: "coordinator".into(),
                leader_name: "Coordinator".into(),
                description: "d".into(),
                sub_tasks: (0..n)
                    .map(|i| SubTask::new(format!("Step {}", i + 1), "analyst", "Analyst"))
                    .collect(),
            },
        )
    }

    fn start(step: usize) -> MissionDelta {
        MissionDelta::StepStarted { step, at: Utc::now() }
    }

    fn complete(step: usize) -> MissionDelta {
        MissionDelta::StepCompleted {
            step,
            output: format!("out {step}"),
            duration_ms: 10,
            at: Utc::now(),
        }
    }

    fn assert_progress_invariant(m: &Mission) {
        assert!(m.progress.current <= m.progress.total);
        assert_eq!(m.progress.total, m.sub_tasks.len());
        if matches!(m.status, MissionStatus::Running | MissionStatus::Completed) {
            assert_eq!(m.completed_count(), m.progress.current);
        }
    }

    #[test]
    fn test_full_happy_path_keeps_invariants() {
        let mut m = mission(3);
        assert!(apply(&mut m, &MissionDelta::Started { total: 3 }));
        assert_progress_invariant(&m);
        for step in 0..3 {
            assert!(apply(&mut m, &start(step)));
            assert_progress_invariant(&m);
            assert!(apply(&mut m, &complete(step)));
            assert_progress_invariant(&m);
        }
        assert!(apply(&mut m, &MissionDelta::Completed { result: "done".into() }));
        assert_eq!(m.status, MissionStatus::Completed);
        assert_eq!(m.progress, Progress { current: 3, total: 3 });
        assert_progress_invariant(&m);
    }

    #[test]
    fn test_step_cannot_start_before_predecessor_finishes() {
        let mut m = mission(3);
        apply(&mut m, &MissionDelta::Started { total: 3 });
        assert!(!apply(&mut m, &start(1)));
        assert!(apply(&mut m, &start(0)));
        assert!(!apply(&mut m, &start(1)));
        assert_eq!(m.sub_tasks[1].status, SubTaskStatus::Pending);
    }

    #[test]
    fn test_step_error_preserved_and_mission_continues() {
        let mut m = mission(3);
        apply(&mut m, &MissionDelta::Started { total: 3 });
        apply(&mut m, &start(0));
        apply(&mut m, &complete(0));
        apply(&mut m, &start(1));
        assert!(apply(
            &mut m,
            &MissionDelta::StepFailed { step: 1, error: "rate limited".into(), at: Utc::now() }
        ));
        assert_eq!(m.status, MissionStatus::Running);

        // A late completion for the failed step must not overwrite the error.
        assert!(!apply(&mut m, &complete(1)));
        apply(&mut m, &start(2));
        apply(&mut m, &complete(2));
        apply(&mut m, &MissionDelta::Completed { result: "partial".into() });

        assert_eq!(m.status, MissionStatus::Completed);
        assert_eq!(m.sub_tasks[1].status, SubTaskStatus::Failed);
        assert_eq!(m.sub_tasks[1].output.as_deref(), Some("rate limited"));
    }

    #[test]
    fn test_out_of_range_step_ignored() {
        let mut m = mission(2);
        let before = m.clone();
        assert!(!apply(&mut m, &start(7)));
        assert_eq!(m, before);
    }

    #[test]
    fn test_every_applied_delta_bumps_updated_at() {
        let mut m = mission(1);
        m.updated_at = m.created_at - chrono::Duration::seconds(60);
        let stale = m.updated_at;
        apply(&mut m, &MissionDelta::Started { total: 1 });
        assert!(m.updated_at > stale);
    }

    #[test]
    fn test_terminal_mission_ignores_runner_deltas() {
        let mut m = mission(2);
        apply(&mut m, &MissionDelta::Started { total: 2 });
        apply(&mut m, &MissionDelta::Cancelled);
        assert!(!apply(&mut m, &start(0)));
        assert!(!apply(&mut m, &MissionDelta::Completed { result: "x".into() }));
        assert_eq!(m.status, MissionStatus::Cancelled);
    }

    #[test]
    fn test_reset_clears_execution_state() {
        let mut m = mission(2);
        apply(&mut m, &MissionDelta::Started { total: 2 });
        apply(&mut m, &start(0));
        apply(&mut m, &complete(0));
        apply(&mut m, &MissionDelta::Failed { reason: "boom".into() });

        assert!(apply(&mut m, &MissionDelta::Reset));
        assert_eq!(m.status, MissionStatus::Running);
        assert_eq!(m.progress.current, 0);
        assert!(m.result.is_none());
        assert!(m
            .sub_tasks
            .iter()
            .all(|t| t.status == SubTaskStatus::Pending && t.output.is_none()));
    }

    #[test]
    fn test_step_input_chains_previous_output() {
        let mut m = mission(2);
        apply(&mut m, &MissionDelta::Started { total: 2 });
        apply(&mut m, &start(0));
        apply(&mut m, &complete(0));
        apply(&mut m, &start(1));
        assert_eq!(m.sub_tasks[1].input.as_deref(), Some("out 0"));
    }

    #[test]
    fn test_reset_drops_chained_inputs() {
        let mut m = mission(3);
        m.sub_tasks[0].input = Some("d".into());
        apply(&mut m, &MissionDelta::Started { total: 3 });
        for step in 0..3 {
            apply(&mut m, &start(step));
            apply(&mut m, &complete(step));
        }
        apply(&mut m, &MissionDelta::Completed { result: "done".into() });
        assert_eq!(m.sub_tasks[1].input.as_deref(), Some("out 0"));
        assert_eq!(m.sub_tasks[2].input.as_deref(), Some("out 1"));

        assert!(apply(&mut m, &MissionDelta::Reset));
        assert_eq!(m.sub_tasks[0].input.as_deref(), Some("d"));
        assert!(m.sub_tasks[1..].iter().all(|t| t.input.is_none()));

        // The next run chains from its own outputs.
        apply(&mut m, &start(0));
        apply(
            &mut m,
            &MissionDelta::StepCompleted {
                step: 0,
                output: "fresh".into(),
                duration_ms: 5,
                at: Utc::now(),
            },
        );
        apply(&mut m, &start(1));
        assert_eq!(m.sub_tasks[1].input.as_deref(), Some("fresh"));
    }

    #[test]
    fn test_replanned_swaps_sub_tasks() {
        let mut m = mission(2);
        apply(&mut m, &MissionDelta::Completed { result: "r".into() });
        let fresh = vec![SubTask::new("Only step", "writer", "Writer")];
        assert!(apply(&mut m, &MissionDelta::Replanned { sub_tasks: fresh }));
        assert_eq!(m.sub_tasks.len(), 1);
        assert_eq!(m.progress, Progress { current: 0, total: 1 });
        assert_eq!(m.status, MissionStatus::Running);
    }
}
