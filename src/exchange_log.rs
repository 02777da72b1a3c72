//! Persists the textual artifact of one turn. Exchange files are
//! write-once: created by a transaction, never rewritten in place,
//! only ever replaced wholesale (rename-over) or deleted as an orphan.

use std::io::Write as _;
use std::path::Path;

use crate::errors::{RelayError, Result};
use crate::model::RelayState;
use crate::path_algebra;

/// Writes `content` to `<path>.tmp`, then renames over the addressed
/// exchange path `(task_id, iteration, role)`. Creates
/// `.relay/exchanges/` if missing. Overwriting an existing file at the
/// same path is intentional: the write is idempotent by path, not
/// append-only.
pub fn write_exchange(
    root: &Path,
    task_id: &str,
    title: &str,
    iteration: u32,
    role: crate::model::Role,
    content: &str,
) -> Result<()> {
    let path = path_algebra::exchange_path(root, task_id, title, iteration, role)?;
    let dir = path
        .parent()
        .ok_or_else(|| RelayError::PathTraversal(path.display().to_string()))?;
    std::fs::create_dir_all(dir)?;

    let tmp_path = path.with_extension("md.tmp");
    {
        let mut tmp = std::fs::File::create(&tmp_path)?;
        tmp.write_all(content.as_bytes())?;
        tmp.sync_all()?;
    }
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// Returns the contents of the artifact addressed by
/// `(state.active_task_id, state.iteration, state.last_action_by)`,
/// for any state where that triple names a real artifact. Returns
/// `None` for states with no artifact yet (idle, planning).
///
/// Fails with `ExchangeMissing` if the state implies an artifact
/// exists but the file is absent — a sign of manual deletion or a
/// corrupted workspace.
pub fn latest_content(root: &Path, state: &RelayState) -> Result<Option<String>> {
    use crate::model::RelayStatus;

    if !matches!(
        state.status,
        RelayStatus::WaitingForEngineer | RelayStatus::WaitingForArchitect | RelayStatus::Completed
    ) {
        return Ok(None);
    }

    let task_id = state.active_task_id.as_deref().ok_or_else(|| {
        RelayError::ExchangeMissing {
            task_id: String::new(),
            iteration: state.iteration,
            role: "unknown".to_string(),
        }
    })?;
    let title = state.active_task_title.as_deref().unwrap_or("");
    let role = state.last_action_by.ok_or_else(|| RelayError::ExchangeMissing {
        task_id: task_id.to_string(),
        iteration: state.iteration,
        role: "unknown".to_string(),
    })?;

    let path = path_algebra::exchange_path(root, task_id, title, state.iteration, role)?;
    if !path.exists() {
        return Err(RelayError::ExchangeMissing {
            task_id: task_id.to_string(),
            iteration: state.iteration,
            role: role.to_string(),
        });
    }
    Ok(Some(std::fs::read_to_string(&path)?))
}
