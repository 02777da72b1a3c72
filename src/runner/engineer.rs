//! The engineer's pure decision tree. Symmetric to the architect's,
//! but the engineer never selects tasks or renders a verdict — it
//! only waits for one to become active, then writes reports.

use crate::model::{Action, RelayStatus, Role};
use crate::reducer;
use crate::runner::{templates, Effect, FsmInput};

pub fn decide(input: &FsmInput) -> Vec<Effect> {
    let Some(active_id) = &input.state.active_task_id else {
        return vec![await_architect_start()];
    };

    if !input.tasks.iter().any(|t| &t.id == active_id) {
        return vec![
            Effect::Log(format!("task `{active_id}` is not in the task index")),
            Effect::Exit(1),
        ];
    }

    match input.state.status {
        RelayStatus::Planning => vec![await_directive()],
        RelayStatus::WaitingForEngineer => decide_report(input),
        RelayStatus::WaitingForArchitect => vec![await_directive()],
        RelayStatus::Idle | RelayStatus::Completed => vec![await_architect_start()],
    }
}

fn decide_report(input: &FsmInput) -> Vec<Effect> {
    match input.report_status {
        Some(status) => {
            let next_state = match reducer::reduce(
                &input.state,
                &Action::SubmitReport {
                    task_id: input.state.active_task_id.clone().unwrap_or_default(),
                    status,
                    timestamp: now_ms(),
                },
            ) {
                Ok(state) => state,
                Err(_) => return vec![Effect::Exit(2)],
            };
            vec![Effect::PersistState(next_state), await_architect_review()]
        }
        None => {
            let template = if input.state.iteration <= 1 {
                templates::ENGINEER_FIRST.to_string()
            } else {
                format!("{}{}", templates::ENGINEER_REINFORCEMENT, templates::ENGINEER_FIRST)
            };
            vec![
                Effect::WriteFile(input.own_turn_path.clone(), template),
                Effect::PromptUser {
                    msg: format!(
                        "Write your report at {} and re-run `relay pulse --role engineer`.",
                        input.own_turn_path.display()
                    ),
                    submit_cmd: "relay pulse --role engineer".to_string(),
                    path: input.own_turn_path.clone(),
                },
                Effect::Exit(0),
            ]
        }
    }
}

fn await_architect_start() -> Effect {
    Effect::ReadState(Box::new(|state| state.active_task_id.is_some()))
}

fn await_directive() -> Effect {
    Effect::ReadState(Box::new(|state| state.last_action_by == Some(Role::Architect)))
}

fn await_architect_review() -> Effect {
    Effect::ReadState(Box::new(|state| state.last_action_by != Some(Role::Engineer)))
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
    use crate::model::{RelayState, ReportStatus, Task};
    use std::path::PathBuf;

    fn base_input() -> FsmInput {
        FsmInput {
            state: RelayState::initial(0),
            tasks: vec![Task {
                id: "T1".to_string(),
                slug: "add-login".to_string(),
                title: "Add Login".to_string(),
                content: String::new(),
            }],
            own_turn_path: PathBuf::from("/tmp/does-not-exist.md"),
            own_turn_content: None,
            directive_decision: None,
            report_status: None,
        }
    }

    #[test]
    fn no_active_task_awaits_architect() {
        let input = base_input();
        let effects = decide(&input);
        assert_eq!(effects.len(), 1);
        assert!(matches!(effects[0], Effect::ReadState(_)));
    }

    #[test]
    fn unknown_task_id_logs_and_exits() {
        let mut input = base_input();
        input.state.active_task_id = Some("unknown".to_string());
        input.state.status = RelayStatus::WaitingForEngineer;
        let effects = decide(&input);
        assert!(matches!(effects.last(), Some(Effect::Exit(1))));
    }

    #[test]
    fn no_directive_yet_awaits() {
        let mut input = base_input();
        input.state.active_task_id = Some("T1".to_string());
        input.state.active_task_title = Some("Add Login".to_string());
        input.state.status = RelayStatus::Planning;
        let effects = decide(&input);
        assert_eq!(effects.len(), 1);
        assert!(matches!(effects[0], Effect::ReadState(_)));
    }

    #[test]
    fn missing_report_prompts_and_exits() {
        let mut input = base_input();
        input.state.active_task_id = Some("T1".to_string());
        input.state.active_task_title = Some("Add Login".to_string());
        input.state.status = RelayStatus::WaitingForEngineer;
        input.state.iteration = 1;
        let effects = decide(&input);
        assert!(matches!(effects[0], Effect::WriteFile(_, _)));
        assert!(matches!(effects.last(), Some(Effect::Exit(0))));
    }

    #[test]
    fn valid_report_bumps_state_and_awaits_architect() {
        let mut input = base_input();
        input.state.active_task_id = Some("T1".to_string());
        input.state.active_task_title = Some("Add Login".to_string());
        input.state.status = RelayStatus::WaitingForEngineer;
        input.state.iteration = 1;
        input.report_status = Some(ReportStatus::Completed);

        let effects = decide(&input);
        assert!(matches!(effects[0], Effect::PersistState(_)));
        assert!(matches!(effects[1], Effect::ReadState(_)));
    }
}
