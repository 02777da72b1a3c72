//! Pure state machine: `reduce(state, action) -> (new_state, state)`.
//!
//! No I/O. Iteration advances only on `SubmitReport`; directives write
//! into the iteration their preceding report opened. Every transition
//! that touches `active_task_id` checks it against the action's task
//! id first, raising `TaskMismatch` rather than `InvalidTransition` so
//! callers can tell "wrong workflow state" from "wrong task".

use crate::errors::{RelayError, Result};
use crate::model::{Action, Decision, RelayState, RelayStatus, ReportStatus, Role};

/// Applies `action` to `state`, returning the new state or an error.
/// On error, `state` is not considered mutated (the caller still owns
/// the original value; this function never mutates in place).
pub fn reduce(state: &RelayState, action: &Action) -> Result<RelayState> {
    match action {
        Action::StartTask {
            task_id,
            title,
            timestamp,
        } => reduce_start_task(state, task_id, title, *timestamp),
        Action::SubmitDirective {
            task_id,
            decision,
            timestamp,
        } => reduce_submit_directive(state, task_id, *decision, *timestamp),
        Action::SubmitReport {
            task_id,
            status,
            timestamp,
        } => reduce_submit_report(state, task_id, *status, *timestamp),
    }
}

fn reduce_start_task(
    state: &RelayState,
    task_id: &str,
    title: &str,
    timestamp: i64,
) -> Result<RelayState> {
    match state.status {
        RelayStatus::Idle | RelayStatus::Completed => Ok(RelayState {
            status: RelayStatus::Planning,
            active_task_id: Some(task_id.to_string()),
            active_task_title: Some(title.to_string()),
            iteration: 1,
            last_action_by: Some(Role::Architect),
            updated_at: timestamp,
        }),
        RelayStatus::Planning
        | RelayStatus::WaitingForEngineer
        | RelayStatus::WaitingForArchitect => Err(RelayError::InvalidTransition(format!(
            "cannot start a task while status is {}",
            state.status
        ))),
    }
}

fn reduce_submit_directive(
    state: &RelayState,
    task_id: &str,
    decision: Decision,
    timestamp: i64,
) -> Result<RelayState> {
    check_task_matches(state, task_id)?;
    match state.status {
        RelayStatus::Planning | RelayStatus::WaitingForArchitect => Ok(RelayState {
            status: match decision {
                Decision::Approve => RelayStatus::Completed,
                Decision::Reject => RelayStatus::WaitingForEngineer,
            },
            active_task_id: match decision {
                Decision::Approve => None,
                Decision::Reject => state.active_task_id.clone(),
            },
            active_task_title: match decision {
                Decision::Approve => None,
                Decision::Reject => state.active_task_title.clone(),
            },
            iteration: state.iteration,
            last_action_by: Some(Role::Architect),
            updated_at: timestamp,
        }),
        RelayStatus::Idle | RelayStatus::WaitingForEngineer | RelayStatus::Completed => {
            Err(RelayError::InvalidTransition(format!(
                "cannot submit a directive while status is {}",
                state.status
            )))
        }
    }
}

fn reduce_submit_report(
    state: &RelayState,
    task_id: &str,
    status: ReportStatus,
    timestamp: i64,
) -> Result<RelayState> {
    check_task_matches(state, task_id)?;
    let _ = status; // the reducer tracks workflow status, not the engineer's self-report
    match state.status {
        RelayStatus::WaitingForEngineer => Ok(RelayState {
            status: RelayStatus::WaitingForArchitect,
            active_task_id: state.active_task_id.clone(),
            active_task_title: state.active_task_title.clone(),
            iteration: state.iteration + 1,
            last_action_by: Some(Role::Engineer),
            updated_at: timestamp,
        }),
        RelayStatus::Idle
        | RelayStatus::Planning
        | RelayStatus::WaitingForArchitect
        | RelayStatus::Completed => Err(RelayError::InvalidTransition(format!(
            "cannot submit a report while status is {}",
            state.status
        ))),
    }
}

fn check_task_matches(state: &RelayState, task_id: &str) -> Result<()> {
    match &state.active_task_id {
        Some(active) if active == task_id => Ok(()),
        Some(active) => Err(RelayError::TaskMismatch {
            action_task: task_id.to_string(),
            active_task: active.clone(),
        }),
        None => Err(RelayError::InvalidTransition(
            "no active task to act on".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle() -> RelayState {
        RelayState::initial(0)
    }

    #[test]
    fn start_task_from_idle_begins_planning() {
        let next = reduce(
            &idle(),
            &Action::StartTask {
                task_id: "T1".to_string(),
                title: "Add Login".to_string(),
                timestamp: 10,
            },
        )
        .unwrap();
        assert_eq!(next.status, RelayStatus::Planning);
        assert_eq!(next.active_task_id.as_deref(), Some("T1"));
        assert_eq!(next.iteration, 1);
        assert_eq!(next.last_action_by, Some(Role::Architect));
    }

    #[test]
    fn double_start_is_rejected() {
        let planning = reduce(
            &idle(),
            &Action::StartTask {
                task_id: "T1".to_string(),
                title: "Add Login".to_string(),
                timestamp: 10,
            },
        )
        .unwrap();
        let result = reduce(
            &planning,
            &Action::StartTask {
                task_id: "T2".to_string(),
                title: "Other".to_string(),
                timestamp: 20,
            },
        );
        assert!(matches!(result, Err(RelayError::InvalidTransition(_))));
    }

    #[test]
    fn planning_reject_moves_to_waiting_for_engineer_same_iteration() {
        let planning = reduce(
            &idle(),
            &Action::StartTask {
                task_id: "T1".to_string(),
                title: "Add Login".to_string(),
                timestamp: 10,
            },
        )
        .unwrap();
        let next = reduce(
            &planning,
            &Action::SubmitDirective {
                task_id: "T1".to_string(),
                decision: Decision::Reject,
                timestamp: 20,
            },
        )
        .unwrap();
        assert_eq!(next.status, RelayStatus::WaitingForEngineer);
        assert_eq!(next.iteration, 1);
        assert_eq!(next.last_action_by, Some(Role::Architect));
    }

    #[test]
    fn planning_approve_completes_and_clears_task() {
        let planning = reduce(
            &idle(),
            &Action::StartTask {
                task_id: "T1".to_string(),
                title: "Add Login".to_string(),
                timestamp: 10,
            },
        )
        .unwrap();
        let next = reduce(
            &planning,
            &Action::SubmitDirective {
                task_id: "T1".to_string(),
                decision: Decision::Approve,
                timestamp: 20,
            },
        )
        .unwrap();
        assert_eq!(next.status, RelayStatus::Completed);
        assert!(next.active_task_id.is_none());
        assert_eq!(next.iteration, 1);
    }

    #[test]
    fn report_bumps_iteration_and_waits_for_architect() {
        let waiting_for_engineer = RelayState {
            status: RelayStatus::WaitingForEngineer,
            active_task_id: Some("T1".to_string()),
            active_task_title: Some("Add Login".to_string()),
            iteration: 1,
            last_action_by: Some(Role::Architect),
            updated_at: 20,
        };
        let next = reduce(
            &waiting_for_engineer,
            &Action::SubmitReport {
                task_id: "T1".to_string(),
                status: ReportStatus::Completed,
                timestamp: 30,
            },
        )
        .unwrap();
        assert_eq!(next.status, RelayStatus::WaitingForArchitect);
        assert_eq!(next.iteration, 2);
        assert_eq!(next.last_action_by, Some(Role::Engineer));
    }

    #[test]
    fn reject_then_retry_increments_iteration_again() {
        let waiting_for_architect = RelayState {
            status: RelayStatus::WaitingForArchitect,
            active_task_id: Some("T1".to_string()),
            active_task_title: Some("Add Login".to_string()),
            iteration: 2,
            last_action_by: Some(Role::Engineer),
            updated_at: 30,
        };
        let rejected = reduce(
            &waiting_for_architect,
            &Action::SubmitDirective {
                task_id: "T1".to_string(),
                decision: Decision::Reject,
                timestamp: 40,
            },
        )
        .unwrap();
        assert_eq!(rejected.status, RelayStatus::WaitingForEngineer);
        assert_eq!(rejected.iteration, 2);

        let reported = reduce(
            &rejected,
            &Action::SubmitReport {
                task_id: "T1".to_string(),
                status: ReportStatus::Completed,
                timestamp: 50,
            },
        )
        .unwrap();
        assert_eq!(reported.iteration, 3);
    }

    #[test]
    fn task_mismatch_is_distinguished_from_invalid_transition() {
        let waiting_for_engineer = RelayState {
            status: RelayStatus::WaitingForEngineer,
            active_task_id: Some("T1".to_string()),
            active_task_title: Some("Add Login".to_string()),
            iteration: 1,
            last_action_by: Some(Role::Architect),
            updated_at: 20,
        };
        let result = reduce(
            &waiting_for_engineer,
            &Action::SubmitReport {
                task_id: "T2".to_string(),
                status: ReportStatus::Completed,
                timestamp: 30,
            },
        );
        assert!(matches!(result, Err(RelayError::TaskMismatch { .. })));
    }

    #[test]
    fn new_task_after_completion_restarts_at_iteration_one() {
        let completed = RelayState {
            status: RelayStatus::Completed,
            active_task_id: None,
            active_task_title: None,
            iteration: 2,
            last_action_by: Some(Role::Architect),
            updated_at: 40,
        };
        let next = reduce(
            &completed,
            &Action::StartTask {
                task_id: "T2".to_string(),
                title: "Next".to_string(),
                timestamp: 50,
            },
        )
        .unwrap();
        assert_eq!(next.status, RelayStatus::Planning);
        assert_eq!(next.iteration, 1);
    }

    #[test]
    fn every_successful_transition_preserves_invariants() {
        let planning = reduce(
            &idle(),
            &Action::StartTask {
                task_id: "T1".to_string(),
                title: "Add Login".to_string(),
                timestamp: 10,
            },
        )
        .unwrap();
        assert!(planning.check_invariants().is_ok());
    }

    #[derive(Debug, Clone, Copy)]
    enum Step {
        Start,
        Approve,
        Reject,
        Report,
    }

    impl quickcheck::Arbitrary for Step {
        fn arbitrary(g: &mut quickcheck::Gen) -> Self {
            *g.choose(&[Step::Start, Step::Approve, Step::Reject, Step::Report])
                .unwrap()
        }
    }

    quickcheck::quickcheck! {
        fn iteration_never_decreases(steps: Vec<Step>) -> bool {
            let mut state = idle();
            let mut next_id = 0u32;
            let mut last_iteration = 0;
            for step in &steps {
                let task_id = state
                    .active_task_id
                    .clone()
                    .unwrap_or_else(|| format!("T{next_id}"));
                let action = match step {
                    Step::Start => {
                        next_id += 1;
                        Action::StartTask { task_id: task_id.clone(), title: "t".to_string(), timestamp: state.updated_at + 1 }
                    }
                    Step::Approve => Action::SubmitDirective { task_id, decision: Decision::Approve, timestamp: state.updated_at + 1 },
                    Step::Reject => Action::SubmitDirective { task_id, decision: Decision::Reject, timestamp: state.updated_at + 1 },
                    Step::Report => Action::SubmitReport { task_id, status: ReportStatus::Completed, timestamp: state.updated_at + 1 },
                };
                if let Ok(next) = reduce(&state, &action) {
                    if next.iteration < last_iteration {
                        return false;
                    }
                    last_iteration = next.iteration;
                    state = next;
                }
            }
            true
        }

        fn success_without_active_task_implies_start(steps: Vec<Step>) -> bool {
            let mut state = idle();
            let mut next_id = 0u32;
            for step in &steps {
                let had_no_active_task = state.active_task_id.is_none();
                let task_id = state
                    .active_task_id
                    .clone()
                    .unwrap_or_else(|| format!("T{next_id}"));
                let is_start = matches!(step, Step::Start);
                let action = match step {
                    Step::Start => {
                        next_id += 1;
                        Action::StartTask { task_id: task_id.clone(), title: "t".to_string(), timestamp: state.updated_at + 1 }
                    }
                    Step::Approve => Action::SubmitDirective { task_id, decision: Decision::Approve, timestamp: state.updated_at + 1 },
                    Step::Reject => Action::SubmitDirective { task_id, decision: Decision::Reject, timestamp: state.updated_at + 1 },
                    Step::Report => Action::SubmitReport { task_id, status: ReportStatus::Completed, timestamp: state.updated_at + 1 },
                };
                if let Ok(next) = reduce(&state, &action) {
                    if had_no_active_task && !is_start {
                        return false;
                    }
                    state = next;
                }
            }
            true
        }
    }
}
