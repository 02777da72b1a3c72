//! The persisted state document, the external task catalog entry, the
//! exchange artifact, and the ephemeral action enum.
//!
//! `RelayState` deliberately carries only the six fields the
//! specification's state document schema names — no header metadata,
//! no visibility, no tags. Those belong to a richer object graph that
//! is out of scope for this coordination kernel.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of the relay's single persisted document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RelayStatus {
    Idle,
    Planning,
    WaitingForEngineer,
    WaitingForArchitect,
    Completed,
}

impl RelayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayStatus::Idle => "idle",
            RelayStatus::Planning => "planning",
            RelayStatus::WaitingForEngineer => "waiting_for_engineer",
            RelayStatus::WaitingForArchitect => "waiting_for_architect",
            RelayStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for RelayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which of the two roles performed the most recently persisted action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Architect,
    Engineer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Architect => "architect",
            Role::Engineer => "engineer",
        }
    }

    /// Like `FromStr`, but infallible-friendly for filename parsing where
    /// an unrecognized role just means "not an exchange file".
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "architect" => Some(Role::Architect),
            "engineer" => Some(Role::Engineer),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::from_str_opt(s).ok_or_else(|| format!("invalid role: {s}"))
    }
}

/// The Architect's verdict on a report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Approve => write!(f, "approve"),
            Decision::Reject => write!(f, "reject"),
        }
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(Decision::Approve),
            "reject" => Ok(Decision::Reject),
            _ => Err(format!("invalid decision: {s}")),
        }
    }
}

/// The Engineer's self-reported outcome of a report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Completed,
    Failed,
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportStatus::Completed => write!(f, "completed"),
            ReportStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for ReportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(ReportStatus::Completed),
            "failed" => Ok(ReportStatus::Failed),
            _ => Err(format!("invalid report status: {s}")),
        }
    }
}

/// The persisted state document, single instance per project.
///
/// Field names are `camelCase` on the wire (§6's stable schema);
/// Rust-side fields stay `snake_case` via `#[serde(rename_all)]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RelayState {
    pub status: RelayStatus,
    pub active_task_id: Option<String>,
    pub active_task_title: Option<String>,
    pub iteration: u32,
    pub last_action_by: Option<Role>,
    pub updated_at: i64,
}

impl RelayState {
    /// The default document created on first store initialization.
    pub fn initial(now_ms: i64) -> Self {
        Self {
            status: RelayStatus::Idle,
            active_task_id: None,
            active_task_title: None,
            iteration: 0,
            last_action_by: None,
            updated_at: now_ms,
        }
    }

    /// Checks the invariants in §3. Used after every reducer transition
    /// and after loading a document from disk, so a hand-edited or
    /// partially-recovered document can never silently violate them.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.status == RelayStatus::Idle
            && (self.active_task_id.is_some() || self.iteration != 0)
        {
            return Err("idle state must have no active task and iteration 0".to_string());
        }
        if self.active_task_id.is_none()
            && !matches!(self.status, RelayStatus::Idle | RelayStatus::Completed)
        {
            return Err("no active task implies status is idle or completed".to_string());
        }
        Ok(())
    }
}

/// An externally supplied task definition. Read-only to the kernel;
/// the kernel never mutates or generates its `content`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub content: String,
}

/// One turn's textual artifact, addressed by `(task_id, iteration, role)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeArtifact {
    pub task_id: String,
    pub title: String,
    pub iteration: u32,
    pub role: Role,
    pub content: String,
}

/// One audit-log line appended to `exchanges/tasks.jsonl` by `start_task`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLogEntry {
    pub task_id: String,
    pub title: String,
    pub started_at: DateTime<Utc>,
}

/// An ephemeral action fed into the reducer. Never persisted directly;
/// its effect on `RelayState` is.
#[derive(Debug, Clone)]
pub enum Action {
    StartTask {
        task_id: String,
        title: String,
        timestamp: i64,
    },
    SubmitDirective {
        task_id: String,
        decision: Decision,
        timestamp: i64,
    },
    SubmitReport {
        task_id: String,
        status: ReportStatus,
        timestamp: i64,
    },
}

impl Action {
    pub fn task_id(&self) -> &str {
        match self {
            Action::StartTask { task_id, .. } => task_id,
            Action::SubmitDirective { task_id, .. } => task_id,
            Action::SubmitReport { task_id, .. } => task_id,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            Action::StartTask { timestamp, .. } => *timestamp,
            Action::SubmitDirective { timestamp, .. } => *timestamp,
            Action::SubmitReport { timestamp, .. } => *timestamp,
        }
    }
}
