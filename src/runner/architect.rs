//! The architect's pure decision tree. Lives inside the reducer layer:
//! operates only on `FsmInput` and returns an effect sequence, never
//! touching the filesystem or the store directly.

use crate::model::{Action, Decision, RelayStatus, Role};
use crate::reducer;
use crate::runner::{templates, Effect, FsmInput};

pub fn decide(input: &FsmInput) -> Vec<Effect> {
    match input.state.status {
        RelayStatus::Idle | RelayStatus::Completed => decide_task_selection(input),
        RelayStatus::Planning | RelayStatus::WaitingForArchitect => decide_directive(input),
        RelayStatus::WaitingForEngineer => vec![await_engineer()],
    }
}

fn decide_task_selection(input: &FsmInput) -> Vec<Effect> {
    let Some(next_task) = select_next_task(input) else {
        if input.tasks.is_empty() {
            let scaffold_id = "001-setup";
            return vec![
                Effect::CreateTaskScaffold(scaffold_id.to_string()),
                Effect::PromptUser {
                    msg: "No tasks found. A scaffold has been created at \
                          .relay/exchanges/001-setup-setup.md; describe the first task there."
                        .to_string(),
                    submit_cmd: "relay start-task".to_string(),
                    path: input.own_turn_path.clone(),
                },
                Effect::Exit(0),
            ];
        }
        return vec![Effect::Log("All tasks approved!".to_string()), Effect::Exit(0)];
    };

    let timestamp = now_ms();
    let next_state = match reducer::reduce(
        &input.state,
        &Action::StartTask {
            task_id: next_task.id.clone(),
            title: next_task.title.clone(),
            timestamp,
        },
    ) {
        Ok(state) => state,
        Err(_) => return vec![Effect::Log("could not start the next task".to_string()), Effect::Exit(2)],
    };

    vec![Effect::PersistState(next_state)]
}

/// Current task if it isn't yet approved, else the next task in the
/// list, else the first task.
fn select_next_task<'a>(input: &'a FsmInput) -> Option<&'a crate::model::Task> {
    if let Some(active_id) = &input.state.active_task_id {
        if let Some(task) = input.tasks.iter().find(|t| &t.id == active_id) {
            return Some(task);
        }
    }
    input.tasks.first()
}

fn decide_directive(input: &FsmInput) -> Vec<Effect> {
    match input.directive_decision {
        Some(Decision::Approve) => {
            let next_state = match reducer::reduce(
                &input.state,
                &Action::SubmitDirective {
                    task_id: input.state.active_task_id.clone().unwrap_or_default(),
                    decision: Decision::Approve,
                    timestamp: now_ms(),
                },
            ) {
                Ok(state) => state,
                Err(_) => return vec![Effect::Exit(2)],
            };
            vec![
                Effect::PersistState(next_state),
                Effect::Log("Task approved!".to_string()),
                Effect::Exit(0),
            ]
        }
        Some(Decision::Reject) => {
            let next_state = match reducer::reduce(
                &input.state,
                &Action::SubmitDirective {
                    task_id: input.state.active_task_id.clone().unwrap_or_default(),
                    decision: Decision::Reject,
                    timestamp: now_ms(),
                },
            ) {
                Ok(state) => state,
                Err(_) => return vec![Effect::Exit(2)],
            };
            vec![Effect::PersistState(next_state), await_engineer()]
        }
        None => {
            let template = if input.state.iteration <= 1 {
                templates::ARCHITECT_FIRST.to_string()
            } else {
                format!("{}{}", templates::ARCHITECT_REINFORCEMENT, templates::ARCHITECT_FIRST)
            };
            vec![
                Effect::WriteFile(input.own_turn_path.clone(), template),
                Effect::PromptUser {
                    msg: format!(
                        "Write your directive at {} and re-run `relay pulse --role architect`.",
                        input.own_turn_path.display()
                    ),
                    submit_cmd: "relay pulse --role architect".to_string(),
                    path: input.own_turn_path.clone(),
                },
                Effect::Exit(0),
            ]
        }
    }
}

fn await_engineer() -> Effect {
    Effect::ReadState(Box::new(|state| state.last_action_by != Some(Role::Architect)))
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
    use crate::model::{RelayState, Task};
    use std::path::PathBuf;

    fn base_input() -> FsmInput {
        FsmInput {
            state: RelayState::initial(0),
            tasks: vec![],
            own_turn_path: PathBuf::from("/tmp/does-not-exist.md"),
            own_turn_content: None,
            directive_decision: None,
            report_status: None,
        }
    }

    #[test]
    fn no_tasks_scaffolds_and_exits() {
        let input = base_input();
        let effects = decide(&input);
        assert!(matches!(effects[0], Effect::CreateTaskScaffold(_)));
        assert!(matches!(effects.last(), Some(Effect::Exit(0))));
    }

    #[test]
    fn has_task_starts_it() {
        let mut input = base_input();
        input.tasks.push(Task {
            id: "T1".to_string(),
            slug: "add-login".to_string(),
            title: "Add Login".to_string(),
            content: String::new(),
        });
        let effects = decide(&input);
        assert!(matches!(effects[0], Effect::PersistState(_)));
    }

    #[test]
    fn missing_directive_prompts_and_exits() {
        let mut input = base_input();
        input.state.status = RelayStatus::Planning;
        input.state.active_task_id = Some("T1".to_string());
        input.state.active_task_title = Some("Add Login".to_string());
        input.state.iteration = 1;
        let effects = decide(&input);
        assert!(matches!(effects[0], Effect::WriteFile(_, _)));
        assert!(matches!(effects.last(), Some(Effect::Exit(0))));
    }

    #[test]
    fn valid_approve_directive_completes_task() {
        let mut input = base_input();
        input.state.status = RelayStatus::WaitingForArchitect;
        input.state.active_task_id = Some("T1".to_string());
        input.state.active_task_title = Some("Add Login".to_string());
        input.state.iteration = 2;
        input.state.last_action_by = Some(Role::Engineer);
        input.directive_decision = Some(Decision::Approve);

        let effects = decide(&input);
        assert!(matches!(effects[0], Effect::PersistState(_)));
        assert!(matches!(effects.last(), Some(Effect::Exit(0))));
    }

    #[test]
    fn valid_reject_directive_awaits_engineer() {
        let mut input = base_input();
        input.state.status = RelayStatus::Planning;
        input.state.active_task_id = Some("T1".to_string());
        input.state.active_task_title = Some("Add Login".to_string());
        input.state.iteration = 1;
        input.directive_decision = Some(Decision::Reject);

        let effects = decide(&input);
        assert!(matches!(effects[0], Effect::PersistState(_)));
        assert!(matches!(effects[1], Effect::ReadState(_)));
    }

    #[test]
    fn waiting_for_engineer_just_awaits() {
        let mut input = base_input();
        input.state.status = RelayStatus::WaitingForEngineer;
        let effects = decide(&input);
        assert_eq!(effects.len(), 1);
        assert!(matches!(effects[0], Effect::ReadState(_)));
    }
}
