//! The three idempotent tool operations external callers use to drive
//! the relay: `start_task`, `submit_directive`, `submit_report`. Each
//! is a single Store transaction; none retain state between calls.

use chrono::Utc;
use uuid::Uuid;

use crate::errors::{RelayError, Result};
use crate::model::{Action, Decision, ReportStatus, Role, TaskLogEntry};
use crate::path_algebra;
use crate::store::{self, Store};
use crate::validator;

/// Starts a new task, generating a fresh opaque id. Appends to the
/// task log only if the reducer actually advanced state — a rejected
/// `start_task` (e.g. a task already active) leaves no trace.
pub fn start_task(store: &Store, root: &std::path::Path, title: &str) -> Result<String> {
    let task_id = Uuid::new_v4().to_string();
    let started_at = Utc::now();
    let title = title.to_string();

    let id_for_effect = task_id.clone();
    let title_for_effect = title.clone();
    store.update_with_side_effect(
        |state| {
            crate::reducer::reduce(
                state,
                &Action::StartTask {
                    task_id: task_id.clone(),
                    title: title.clone(),
                    timestamp: now_ms(),
                },
            )
        },
        move |_new_state| {
            store::append_task_log(
                root,
                &TaskLogEntry {
                    task_id: id_for_effect.clone(),
                    title: title_for_effect.clone(),
                    started_at,
                },
            )
        },
    )?;

    Ok(task_id)
}

/// Validates `task_id`, confirms it matches the active task, then
/// writes the directive exchange and advances state in one
/// transaction (exchange-before-state, per the store's ordering rule).
pub fn submit_directive(
    store: &Store,
    root: &std::path::Path,
    task_id: &str,
    decision: Decision,
    content: &str,
) -> Result<String> {
    path_algebra::validate_task_id(task_id)?;
    validator::validate_directive(content).map_err(RelayError::ValidationError)?;

    let state = store.read_locked()?;
    if state.active_task_id.as_deref() != Some(task_id) {
        return Err(RelayError::TaskMismatch {
            action_task: task_id.to_string(),
            active_task: state.active_task_id.clone().unwrap_or_default(),
        });
    }
    let title = state.active_task_title.clone().unwrap_or_default();

    let task_id_owned = task_id.to_string();
    let content_owned = content.to_string();
    let title_for_write = title.clone();
    let next = store.update_with_exchange(
        |state| {
            crate::reducer::reduce(
                state,
                &Action::SubmitDirective {
                    task_id: task_id_owned.clone(),
                    decision,
                    timestamp: now_ms(),
                },
            )
        },
        move |next_state| {
            crate::exchange_log::write_exchange(
                root,
                task_id,
                &title_for_write,
                next_state.iteration,
                Role::Architect,
                &content_owned,
            )
        },
    )?;

    Ok(format!(
        "directive for task {task_id} recorded: {}",
        next.status
    ))
}

/// Symmetric to `submit_directive`, with `role = engineer`.
pub fn submit_report(
    store: &Store,
    root: &std::path::Path,
    task_id: &str,
    status: ReportStatus,
    content: &str,
) -> Result<String> {
    path_algebra::validate_task_id(task_id)?;
    validator::validate_report(content).map_err(RelayError::ValidationError)?;

    let state = store.read_locked()?;
    if state.active_task_id.as_deref() != Some(task_id) {
        return Err(RelayError::TaskMismatch {
            action_task: task_id.to_string(),
            active_task: state.active_task_id.clone().unwrap_or_default(),
        });
    }
    let title = state.active_task_title.clone().unwrap_or_default();

    let task_id_owned = task_id.to_string();
    let content_owned = content.to_string();
    let title_for_write = title.clone();
    let next = store.update_with_exchange(
        |state| {
            crate::reducer::reduce(
                state,
                &Action::SubmitReport {
                    task_id: task_id_owned.clone(),
                    status,
                    timestamp: now_ms(),
                },
            )
        },
        move |next_state| {
            crate::exchange_log::write_exchange(
                root,
                task_id,
                &title_for_write,
                next_state.iteration,
                Role::Engineer,
                &content_owned,
            )
        },
    )?;

    Ok(format!(
        "report for task {task_id} recorded: {}",
        next.status
    ))
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    #[serial]
    fn start_task_then_directive_then_report_then_approve() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path(), RelayConfig::default());
        store.init().unwrap();

        let task_id = start_task(&store, dir.path(), "Add Login").unwrap();

        submit_directive(
            &store,
            dir.path(),
            &task_id,
            Decision::Reject,
            "# DIRECTIVE\n## EXECUTE\nimplement login\n# VERDICT\nREJECT\n",
        )
        .unwrap();

        submit_report(
            &store,
            dir.path(),
            &task_id,
            ReportStatus::Completed,
            "# STATUS\nCOMPLETED\n## CHANGES\nadded login\n## VERIFICATION\nran tests thoroughly\n",
        )
        .unwrap();

        let ack = submit_directive(
            &store,
            dir.path(),
            &task_id,
            Decision::Approve,
            "# DIRECTIVE\n## EXECUTE\nimplement login\n# VERDICT\nAPPROVE\n",
        )
        .unwrap();
        assert!(ack.contains("completed"));

        let final_state = store.read_locked().unwrap();
        assert!(final_state.active_task_id.is_none());
    }

    #[test]
    #[serial]
    fn submit_directive_rejects_wrong_task() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path(), RelayConfig::default());
        store.init().unwrap();
        start_task(&store, dir.path(), "Add Login").unwrap();

        let result = submit_directive(
            &store,
            dir.path(),
            "not-the-active-task",
            Decision::Reject,
            "# DIRECTIVE\n## EXECUTE\nstuff\n# VERDICT\nREJECT\n",
        );
        assert!(matches!(result, Err(RelayError::TaskMismatch { .. })));
    }

    #[test]
    #[serial]
    fn submit_report_rejects_invalid_grammar() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path(), RelayConfig::default());
        store.init().unwrap();
        let task_id = start_task(&store, dir.path(), "Add Login").unwrap();
        submit_directive(
            &store,
            dir.path(),
            &task_id,
            Decision::Reject,
            "# DIRECTIVE\n## EXECUTE\nstuff\n# VERDICT\nREJECT\n",
        )
        .unwrap();

        let result = submit_report(&store, dir.path(), &task_id, ReportStatus::Completed, "nonsense");
        assert!(matches!(result, Err(RelayError::ValidationError(_))));
    }
}
