//! Thin CLI boundary over the relay coordination kernel. Parses
//! arguments, discovers the project root, initializes the store, and
//! dispatches to the tool facade or the pulse runner. All workflow
//! logic lives in the library; this binary only prints and exits.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use relay_kernel::model::{Decision, ReportStatus, Role, Task};
use relay_kernel::runner::PulseRunner;
use relay_kernel::{facade, root, RelayConfig, RelayError, Store};

#[derive(Parser)]
#[command(name = "relay", about = "Coordinates a strict two-role Architect/Engineer task relay")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a new task; fails if one is already active.
    StartTask {
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Submit the architect's verdict on the active task.
    SubmitDirective {
        #[arg(long = "task")]
        task_id: String,
        #[arg(long)]
        decision: DecisionArg,
        #[arg(long = "content-file")]
        content_file: PathBuf,
    },
    /// Submit the engineer's report on the active task.
    SubmitReport {
        #[arg(long = "task")]
        task_id: String,
        #[arg(long)]
        status: ReportStatusArg,
        #[arg(long = "content-file")]
        content_file: PathBuf,
    },
    /// Run the pulse loop for one role until it exits.
    Pulse {
        #[arg(long)]
        role: RoleArg,
        #[arg(long = "timeout-ms")]
        timeout_ms: Option<u64>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DecisionArg {
    Approve,
    Reject,
}

impl From<DecisionArg> for Decision {
    fn from(value: DecisionArg) -> Self {
        match value {
            DecisionArg::Approve => Decision::Approve,
            DecisionArg::Reject => Decision::Reject,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ReportStatusArg {
    Completed,
    Failed,
}

impl From<ReportStatusArg> for ReportStatus {
    fn from(value: ReportStatusArg) -> Self {
        match value {
            ReportStatusArg::Completed => ReportStatus::Completed,
            ReportStatusArg::Failed => ReportStatus::Failed,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    Architect,
    Engineer,
}

impl From<RoleArg> for Role {
    fn from(value: RoleArg) -> Self {
        match value {
            RoleArg::Architect => Role::Architect,
            RoleArg::Engineer => Role::Engineer,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run() {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e}");
            if let Some(hint) = remediation_hint(&e) {
                eprintln!("hint: {hint}");
            }
            ExitCode::from(exit_code_for(&e))
        }
    }
}

fn run() -> Result<u8, RelayError> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir().map_err(RelayError::Io)?;
    let root = root::discover(&cwd)?;
    let config = RelayConfig::load(&root)?;
    let store = Store::new(&root, config);
    store.init()?;

    match cli.command {
        Command::StartTask { title, description: _ } => {
            let task_id = facade::start_task(&store, &root, &title)?;
            println!("Task {task_id} started: {title}");
            Ok(0)
        }
        Command::SubmitDirective {
            task_id,
            decision,
            content_file,
        } => {
            let content = std::fs::read_to_string(&content_file).map_err(RelayError::Io)?;
            let ack = facade::submit_directive(&store, &root, &task_id, decision.into(), &content)?;
            println!("{ack}");
            Ok(0)
        }
        Command::SubmitReport {
            task_id,
            status,
            content_file,
        } => {
            let content = std::fs::read_to_string(&content_file).map_err(RelayError::Io)?;
            let ack = facade::submit_report(&store, &root, &task_id, status.into(), &content)?;
            println!("{ack}");
            Ok(0)
        }
        Command::Pulse { role, timeout_ms: _ } => {
            let runner = PulseRunner::new(&store, &root);
            let tasks = load_task_index(&root)?;
            let code = runner.run(role.into(), tasks)?;
            Ok(code as u8)
        }
    }
}

/// Loads the externally supplied task index, if one exists at
/// `.relay/tasks.json`. Absent entirely is valid: it just means no
/// tasks have been defined yet.
fn load_task_index(root: &std::path::Path) -> Result<Vec<Task>, RelayError> {
    let path = root.join(".relay").join("tasks.json");
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&path).map_err(RelayError::Io)?;
    serde_json::from_str(&content).map_err(RelayError::Json)
}

fn exit_code_for(e: &RelayError) -> u8 {
    match e {
        RelayError::ValidationError(_)
        | RelayError::InvalidTaskId(_)
        | RelayError::InvalidTransition(_)
        | RelayError::TaskMismatch { .. } => 1,
        _ => 2,
    }
}

fn remediation_hint(e: &RelayError) -> Option<&'static str> {
    match e {
        RelayError::ProjectNotFound => Some("run from inside a project with `.relay/`"),
        RelayError::LockBusy(_) => Some("another process may be holding the lock; try again shortly"),
        RelayError::ExchangeMissing { .. } => {
            Some("the workspace may have been manually edited or corrupted")
        }
        _ => None,
    }
}
