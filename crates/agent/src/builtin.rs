//! Built-in control tools.
//!
//! These steer the loop itself (pausing, finishing, keeping the todo
//! ledger) and therefore get mutable access to the agent's chat and state,
//! which registry tools never see. Which of them the model is told about
//! depends on the mode; all of them stay callable.

use reagent_core::agent::{AgentMode, AgentState};
use reagent_core::chat::{Chat, Subtask, SubtaskStatus, Task, task_key};
use reagent_core::error::ToolError;
use reagent_memory::Transcript;
use reagent_mcp::McpManager;
use serde_json::{Value, json};

use crate::settings::PromptArgs;

/// What a built-in may touch.
pub struct BuiltinContext<'a> {
    pub chat: &'a mut Chat,
    pub transcript: &'a Transcript,
    pub state: &'a mut AgentState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    AddSubtasks,
    CompleteSubtasks,
    AskFollowupQuestion,
    WaitingFeedback,
    PlanModeResponse,
    EnterIdleState,
    MemoryRetrieval,
    McpServer,
}

impl Builtin {
    pub const ALL: [Builtin; 8] = [
        Builtin::AddSubtasks,
        Builtin::CompleteSubtasks,
        Builtin::AskFollowupQuestion,
        Builtin::WaitingFeedback,
        Builtin::PlanModeResponse,
        Builtin::EnterIdleState,
        Builtin::MemoryRetrieval,
        Builtin::McpServer,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::AddSubtasks => "add_subtasks",
            Builtin::CompleteSubtasks => "complete_subtasks",
            Builtin::AskFollowupQuestion => "ask_followup_question",
            Builtin::WaitingFeedback => "waiting_feedback",
            Builtin::PlanModeResponse => "plan_mode_response",
            Builtin::EnterIdleState => "enter_idle_state",
            Builtin::MemoryRetrieval => "memory_retrieval",
            Builtin::McpServer => "mcp_server",
        }
    }

    /// Whether the tool is described to the model in `mode`.
    pub fn visible(&self, mode: AgentMode, args: &PromptArgs) -> bool {
        let interactive = !args.subagent && !matches!(mode, AgentMode::Flash | AgentMode::Auto);
        match self {
            Builtin::AddSubtasks | Builtin::CompleteSubtasks => args.todolist && mode != AgentMode::Flash,
            Builtin::AskFollowupQuestion => !args.subagent && mode == AgentMode::Act,
            Builtin::WaitingFeedback | Builtin::MemoryRetrieval => interactive,
            Builtin::PlanModeResponse => interactive && mode == AgentMode::Plan,
            Builtin::EnterIdleState => true,
            Builtin::McpServer => args.mcp_server,
        }
    }

    /// Usage text for the system prompt.
    pub fn prompt(&self, mode: AgentMode) -> String {
        match self {
            Builtin::AddSubtasks => ADD_SUBTASKS_PROMPT.to_string(),
            Builtin::CompleteSubtasks => {
                let (options_param, options_usage) = if mode == AgentMode::Act {
                    (
                        "\n- options: (Required) 2-5 replies the user can pick from, as strings.",
                        ",\n    \"options\": [\"Option 1\", \"Option 2\"]",
                    )
                } else {
                    ("", "")
                };
                format!(
                    "## complete_subtasks\n\
                     Description: Mark one or more subtasks as completed and reflect on them.\n\n\
                     Parameters:\n\
                     - subtask_ids: (Required) One subtask id or an array of ids\n\
                     - status: (Optional) Completion status, defaults to true\n\
                     - reflection: (Required) Was the subtask fully done, was the tool choice optimal, what to improve (within 100 characters){options_param}\n\n\
                     Usage:\n\
                     {{{{\n  \"thinking\": \"The architecture design is done.\",\n  \"tool\": \"complete_subtasks\",\n  \"params\": {{{{\n    \"subtask_ids\": [0, 1],\n    \"status\": true,\n    \"reflection\": \"Reflection content\"{options_usage}\n  }}}}\n}}}}"
                )
            }
            Builtin::AskFollowupQuestion => ASK_FOLLOWUP_PROMPT.to_string(),
            Builtin::WaitingFeedback => WAITING_FEEDBACK_PROMPT.to_string(),
            Builtin::PlanModeResponse => PLAN_MODE_PROMPT.to_string(),
            Builtin::EnterIdleState => ENTER_IDLE_PROMPT.to_string(),
            Builtin::MemoryRetrieval => MEMORY_RETRIEVAL_PROMPT.to_string(),
            Builtin::McpServer => MCP_SERVER_PROMPT.to_string(),
        }
    }

    /// Run the tool against the agent's chat and state.
    pub async fn run(
        &self,
        params: &Value,
        ctx: &mut BuiltinContext<'_>,
        mcp: Option<&McpManager>,
    ) -> Result<Value, ToolError> {
        match self {
            Builtin::AddSubtasks => Ok(add_subtasks(params, ctx.chat)),
            Builtin::CompleteSubtasks => {
                let result = complete_subtasks(params, ctx.chat);
                if ctx.chat.mode == AgentMode::Act {
                    *ctx.state = AgentState::Pause;
                }
                Ok(result)
            }
            Builtin::AskFollowupQuestion => {
                *ctx.state = AgentState::Pause;
                Ok(json!({
                    "question": field(params, "question").cloned().unwrap_or(Value::Null),
                    "options": field(params, "options").cloned().unwrap_or(Value::Null),
                }))
            }
            Builtin::WaitingFeedback => {
                *ctx.state = AgentState::Pause;
                Ok(json!({
                    "question": "Task paused, waiting for user feedback...",
                    "options": field(params, "options").cloned().unwrap_or_else(|| json!(["Allow", "Deny"])),
                }))
            }
            Builtin::PlanModeResponse => {
                *ctx.state = AgentState::Pause;
                Ok(json!({
                    "question": field(params, "response").cloned().unwrap_or(Value::Null),
                    "options": field(params, "options").cloned().unwrap_or(Value::Null),
                }))
            }
            Builtin::EnterIdleState => {
                *ctx.state = AgentState::Final;
                Ok(field(params, "final_answer").cloned().unwrap_or(Value::Null))
            }
            Builtin::MemoryRetrieval => {
                let memory_id = field(params, "memory_id")
                    .and_then(as_index)
                    .ok_or_else(|| ToolError::InvalidArguments("memory_id must be an integer".into()))?;
                let records = ctx.transcript.by_memory_id(memory_id);
                if records.is_empty() {
                    Ok(Value::String("No memory ID found".into()))
                } else {
                    Ok(serde_json::to_value(records).unwrap_or(Value::Null))
                }
            }
            Builtin::McpServer => {
                let mcp = mcp.ok_or_else(|| ToolError::ExecutionFailed {
                    tool_name: self.name().into(),
                    reason: "MCP services are disabled".into(),
                })?;
                let name = field(params, "name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ToolError::InvalidArguments("missing MCP service name".into()))?;
                let args = field(params, "args").cloned().unwrap_or_else(|| json!({}));
                mcp.call_tool(name, args).await
            }
        }
    }
}

/// A parameter that is present and not null.
fn field<'a>(params: &'a Value, key: &str) -> Option<&'a Value> {
    params.get(key).filter(|v| !v.is_null())
}

/// Integer ids arrive as numbers or numeric strings.
fn as_index(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_list(value: Option<&Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(items)) => items.clone(),
        Some(other) => vec![other.clone()],
        None => Vec::new(),
    }
}

fn add_subtasks(params: &Value, chat: &mut Chat) -> Value {
    let Some(task) = field(params, "task").and_then(Value::as_str).filter(|t| !t.is_empty()) else {
        return json!({"status": "error", "message": "Missing task parameter!"});
    };

    let subtasks: Vec<Subtask> = as_list(field(params, "subtasks"))
        .into_iter()
        .map(|description| {
            let id = chat.vars.subtask_id;
            chat.vars.subtask_id += 1;
            Subtask {
                id,
                description: match description {
                    Value::String(s) => s,
                    other => other.to_string(),
                },
                status: SubtaskStatus::pending(),
                reflection: None,
            }
        })
        .collect();
    let added = subtasks.len();

    chat.vars
        .tasks
        .entry(task_key(task))
        .and_modify(|existing| existing.subtasks.extend(subtasks.iter().cloned()))
        .or_insert_with(|| Task {
            task: task.to_string(),
            subtasks,
        });

    json!({"status": "success", "message": format!("{added} subtasks added")})
}

fn complete_subtasks(params: &Value, chat: &mut Chat) -> Value {
    let requested = as_list(field(params, "subtask_ids"));
    let ids: Vec<u64> = requested.iter().filter_map(as_index).collect();
    let status = match field(params, "status") {
        Some(Value::Bool(done)) => SubtaskStatus::Done(*done),
        Some(Value::String(label)) => SubtaskStatus::Label(label.clone()),
        _ => SubtaskStatus::Done(true),
    };
    let reflection = field(params, "reflection").map(|r| match r {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    });

    for task in chat.vars.tasks.values_mut() {
        for subtask in task.subtasks.iter_mut().filter(|s| ids.contains(&s.id)) {
            subtask.status = status.clone();
            subtask.reflection = reflection.clone();
        }
    }

    json!({
        "status": "success",
        "message": format!("{} subtasks completed", requested.len()),
        "options": field(params, "options").cloned().unwrap_or_else(|| json!(["continue"])),
    })
}

const ADD_SUBTASKS_PROMPT: &str = r#"## add_subtasks
Description: Break the current task into subtasks and add them to the todo list, so progress stays organized and traceable.

Parameters:
- task: (Required) Description of the main task
- subtasks: (Required) One subtask description or an array of them

Usage:
{{
  "thinking": "The user wants a new project; break it down first.",
  "tool": "add_subtasks",
  "params": {{
    "task": "Create a new project",
    "subtasks": [
      "Design project architecture",
      "Create database schema",
      "Implement API endpoints"
    ]
  }}
}}"#;

const ASK_FOLLOWUP_PROMPT: &str = r#"## ask_followup_question
Description: Ask the user for information needed to continue. Use it when the request is ambiguous or details are missing, and keep the back-and-forth short.

Parameters:
- question: (Required) A clear, specific question
- options: (Optional) 2-5 replies the user can pick from, as strings

Usage:
{{
  "thinking": "[Thinking process]",
  "tool": "ask_followup_question",
  "params": {{
    "question": "[value]",
    "options": ["Option 1", "Option 2"]
  }}
}}"#;

const WAITING_FEEDBACK_PROMPT: &str = r#"## waiting_feedback
Description: Pause and wait for the user to approve or reject a system-altering operation (file changes, configuration changes and the like).

Parameters:
- options: (Optional) 2-4 choices for the user

Usage:
{{
  "thinking": "[Why confirmation is needed and what it affects]",
  "tool": "waiting_feedback",
  "params": {{
    "options": ["Allow", "Deny"]
  }}
}}"#;

const PLAN_MODE_PROMPT: &str = r#"## plan_mode_response
Description: Answer the user while planning. Only available in planning mode: ask clarifying questions, propose a plan, and refine it with the user until they switch to another mode.

Parameters:
- response: (Required) The reply to the user
- options: (Optional) 2-5 choices for the user; never offer to switch modes

Usage:
{{
  "thinking": "[Thinking process]",
  "tool": "plan_mode_response",
  "params": {{
    "response": "[value]",
    "options": ["Option 1", "Option 2"]
  }}
}}"#;

const MEMORY_RETRIEVAL_PROMPT: &str = r#"## memory_retrieval
Description: Fetch the full records of an earlier reasoning round by its memory_id (see the Memory List). Use it to review earlier analysis or check a previous tool result before repeating work.

Parameters:
- memory_id: (Required) Integer id from the Memory List

Usage:
{{
  "thinking": "Need to confirm the earlier discussion about X",
  "tool": "memory_retrieval",
  "params": {{
    "memory_id": 24
  }}
}}"#;

const ENTER_IDLE_PROMPT: &str = r#"## enter_idle_state
Description: Finish the current task and wait for further instructions. Call it once the task is complete.

Parameters:
- final_answer: (Required, Markdown format)

Usage:
{{
  "thinking": "Task completed. Key steps:\n1. Ran the analysis\n2. Validated the results",
  "tool": "enter_idle_state",
  "params": {{
    "final_answer": "[final_answer]"
  }}
}}"#;

const MCP_SERVER_PROMPT: &str = r#"## mcp_server
Description: Call an MCP (Model Context Protocol) service.

Parameters:
- name: (Required) Name of the MCP service
- args: (Required) Arguments of the service

Usage:
{{
  "thinking": "[Thinking process]",
  "tool": "mcp_server",
  "params": {{
    "name": "[value]",
    "args": {{
      "[parameter_name]": "[value]"
    }}
  }}
}}"#;

#[cfg(test)]
mod tests {
    use super::*;
    use reagent_core::message::Message;

    struct Fixture {
        chat: Chat,
        transcript: Transcript,
        state: AgentState,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                chat: Chat::new(),
                transcript: Transcript::new(),
                state: AgentState::Running,
            }
        }

        async fn run(&mut self, builtin: Builtin, params: Value) -> Result<Value, ToolError> {
            let mut ctx = BuiltinContext {
                chat: &mut self.chat,
                transcript: &self.transcript,
                state: &mut self.state,
            };
            builtin.run(&params, &mut ctx, None).await
        }
    }

    #[test]
    fn names_round_trip() {
        for builtin in Builtin::ALL {
            assert_eq!(Builtin::from_name(builtin.name()), Some(builtin));
        }
        assert_eq!(Builtin::from_name("cli_execute"), None);
    }

    #[test]
    fn visibility_follows_mode() {
        let args = PromptArgs::default();
        assert!(Builtin::AskFollowupQuestion.visible(AgentMode::Act, &args));
        assert!(!Builtin::AskFollowupQuestion.visible(AgentMode::Auto, &args));
        assert!(!Builtin::WaitingFeedback.visible(AgentMode::Auto, &args));
        assert!(!Builtin::WaitingFeedback.visible(AgentMode::Flash, &args));
        assert!(Builtin::WaitingFeedback.visible(AgentMode::Plan, &args));
        assert!(Builtin::PlanModeResponse.visible(AgentMode::Plan, &args));
        assert!(!Builtin::PlanModeResponse.visible(AgentMode::Act, &args));
        assert!(!Builtin::AddSubtasks.visible(AgentMode::Flash, &args));
        assert!(Builtin::EnterIdleState.visible(AgentMode::Flash, &args));

        let sub = PromptArgs {
            subagent: true,
            mcp_server: false,
            ..PromptArgs::default()
        };
        assert!(!Builtin::AskFollowupQuestion.visible(AgentMode::Act, &sub));
        assert!(!Builtin::McpServer.visible(AgentMode::Auto, &sub));
    }

    #[test]
    fn complete_subtasks_prompt_mentions_options_in_act_mode() {
        assert!(Builtin::CompleteSubtasks.prompt(AgentMode::Act).contains("- options:"));
        assert!(!Builtin::CompleteSubtasks.prompt(AgentMode::Auto).contains("- options:"));
    }

    #[tokio::test]
    async fn add_subtasks_allocates_ids_and_merges_by_task() {
        let mut f = Fixture::new();
        let out = f
            .run(Builtin::AddSubtasks, json!({"task": "Build", "subtasks": ["a", "b"]}))
            .await
            .unwrap();
        assert_eq!(out, json!({"status": "success", "message": "2 subtasks added"}));

        // A single string is wrapped
        f.run(Builtin::AddSubtasks, json!({"task": "Build", "subtasks": "c"}))
            .await
            .unwrap();

        let task = &f.chat.vars.tasks[&task_key("Build")];
        let ids: Vec<u64> = task.subtasks.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(task.subtasks[2].description, "c");
        assert_eq!(task.subtasks[0].status, SubtaskStatus::pending());
        assert_eq!(f.chat.vars.subtask_id, 3);
    }

    #[tokio::test]
    async fn add_subtasks_requires_task() {
        let mut f = Fixture::new();
        let out = f.run(Builtin::AddSubtasks, json!({"subtasks": ["a"]})).await.unwrap();
        assert_eq!(out["status"], "error");
        assert_eq!(out["message"], "Missing task parameter!");
        assert!(f.chat.vars.tasks.is_empty());
    }

    #[tokio::test]
    async fn complete_subtasks_marks_and_pauses_in_act_mode() {
        let mut f = Fixture::new();
        f.run(Builtin::AddSubtasks, json!({"task": "T", "subtasks": ["a", "b"]}))
            .await
            .unwrap();
        let out = f
            .run(Builtin::CompleteSubtasks, json!({"subtask_ids": "1", "reflection": "fine"}))
            .await
            .unwrap();
        assert_eq!(out["message"], "1 subtasks completed");
        assert_eq!(out["options"], json!(["continue"]));
        assert_eq!(f.state, AgentState::Pause);

        let task = &f.chat.vars.tasks[&task_key("T")];
        assert_eq!(task.subtasks[0].status, SubtaskStatus::pending());
        assert_eq!(task.subtasks[1].status, SubtaskStatus::Done(true));
        assert_eq!(task.subtasks[1].reflection.as_deref(), Some("fine"));
    }

    #[tokio::test]
    async fn complete_subtasks_keeps_running_in_auto_mode() {
        let mut f = Fixture::new();
        f.chat.mode = AgentMode::Auto;
        f.run(Builtin::CompleteSubtasks, json!({"subtask_ids": [0], "options": ["x"]}))
            .await
            .unwrap();
        assert_eq!(f.state, AgentState::Running);
    }

    #[tokio::test]
    async fn pausing_tools() {
        let mut f = Fixture::new();
        let out = f
            .run(Builtin::AskFollowupQuestion, json!({"question": "Which?", "options": ["A", "B"]}))
            .await
            .unwrap();
        assert_eq!(out, json!({"question": "Which?", "options": ["A", "B"]}));
        assert_eq!(f.state, AgentState::Pause);

        let mut f = Fixture::new();
        let out = f.run(Builtin::WaitingFeedback, Value::Null).await.unwrap();
        assert_eq!(out["question"], "Task paused, waiting for user feedback...");
        assert_eq!(out["options"], json!(["Allow", "Deny"]));

        let mut f = Fixture::new();
        let out = f
            .run(Builtin::PlanModeResponse, json!({"response": "Plan: ..."}))
            .await
            .unwrap();
        assert_eq!(out["question"], "Plan: ...");
        assert_eq!(f.state, AgentState::Pause);
    }

    #[tokio::test]
    async fn enter_idle_state_finishes() {
        let mut f = Fixture::new();
        let out = f
            .run(Builtin::EnterIdleState, json!({"final_answer": "Done."}))
            .await
            .unwrap();
        assert_eq!(out, json!("Done."));
        assert_eq!(f.state, AgentState::Final);
    }

    #[tokio::test]
    async fn memory_retrieval_by_round() {
        let mut f = Fixture::new();
        f.transcript.push(Message::user("q", 1, Some(0)));
        f.transcript.push(Message::assistant("{\"tool\":\"x\"}", 1, Some(1)));
        f.transcript.push(Message::user("obs", 1, Some(1)));

        let out = f.run(Builtin::MemoryRetrieval, json!({"memory_id": 1})).await.unwrap();
        assert_eq!(out.as_array().unwrap().len(), 2);
        assert_eq!(out[1]["content"], "obs");

        let out = f.run(Builtin::MemoryRetrieval, json!({"memory_id": "9"})).await.unwrap();
        assert_eq!(out, json!("No memory ID found"));

        assert!(f.run(Builtin::MemoryRetrieval, json!({})).await.is_err());
    }

    #[tokio::test]
    async fn mcp_server_without_manager_fails() {
        let mut f = Fixture::new();
        let err = f
            .run(Builtin::McpServer, json!({"name": "search", "args": {}}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }
}
