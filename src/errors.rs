//! Error types for the relay coordination kernel.
//!
//! This module defines a unified error enumeration used across path
//! validation, safe I/O, the reducer, the exchange log, the store, and
//! the lock manager. It integrates with `thiserror` to provide rich
//! `Display` implementations and error source chaining where
//! applicable.
//!
//! Notes:
//! - Each variant carries contextual details via its message payload.
//! - A variant's `Display` message IS the user-visible message the CLI
//!   boundary prints on exit; nothing reformats it.

use thiserror::Error;

#[derive(Error, Debug)]
/// Unified error enumeration for the relay coordination kernel.
pub enum RelayError {
    /// Task id failed `^[A-Za-z0-9_-]{1,64}$`.
    #[error("`{0}` is not a valid task id (expected [A-Za-z0-9_-]{{1,64}})")]
    InvalidTaskId(String),

    /// Directive or report text failed the grammar check in the validator.
    #[error("validation failed: {0}")]
    ValidationError(String),

    /// Reducer pre-check failure; the action is rejected and state is unchanged.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// An action's task id did not match the active task id.
    #[error("task mismatch: action targets `{action_task}` but active task is `{active_task}`")]
    TaskMismatch {
        action_task: String,
        active_task: String,
    },

    /// Lock could not be acquired before the caller's deadline.
    #[error("could not acquire lock on `{0}` within the timeout")]
    LockBusy(String),

    /// Lock acquisition failed with a non-retryable OS error.
    #[error("lock on `{0}` failed fatally: {1}")]
    LockFatal(String, String),

    /// State says an exchange artifact exists but the file is absent.
    #[error(
        "exchange artifact for task `{task_id}` iteration {iteration} ({role}) is missing on disk; possible manual deletion or corruption"
    )]
    ExchangeMissing {
        task_id: String,
        iteration: u32,
        role: String,
    },

    /// A resolved path escaped the project root.
    #[error("path `{0}` escapes the project root")]
    PathTraversal(String),

    /// `state.json` could not be parsed, and `.bak` recovery failed or was absent.
    #[error("state document at `{0}` is corrupt and no usable backup was found")]
    CorruptState(String),

    /// No `.relay/` directory was found walking up from the starting directory.
    #[error("no `.relay/` directory found; run from inside a project with `.relay/`")]
    ProjectNotFound,

    /// I/O error from the filesystem.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error for the state document or task log.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse error for `.relay/config.toml`.
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
