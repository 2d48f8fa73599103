//! Tool dispatch: one namespace over built-ins, registry tools and MCP.
//!
//! Every outcome crosses this boundary as an [`Observation`]; a failing
//! tool never fails the step. The dispatcher also decides the round's
//! success tag, which the transcript uses to collapse failed shell output.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use reagent_core::error::ToolError;
use reagent_core::event::{DomainEvent, EventBus};
use reagent_core::observation::{Observation, ToolCallRequest};
use reagent_core::tool::ToolRegistry;
use reagent_mcp::McpManager;
use reagent_memory::transcript::{SHELL_TOOL, observation_succeeded};
use serde_json::Value;
use tracing::{debug, warn};

use crate::builtin::{Builtin, BuiltinContext};

/// The result of one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub observation: Observation,
    /// Raw tool output (the error text on failure)
    pub output: Value,
    /// Success tag for the round
    pub success: bool,
}

pub struct Dispatcher {
    tools: Arc<ToolRegistry>,
    mcp: Option<Arc<McpManager>>,
    events: Arc<EventBus>,
}

impl Dispatcher {
    /// Registry tools may not shadow a built-in.
    pub fn new(tools: Arc<ToolRegistry>, events: Arc<EventBus>) -> Result<Self, ToolError> {
        if let Some(clash) = tools.names().into_iter().find(|n| Builtin::from_name(n).is_some()) {
            return Err(ToolError::DuplicateName(clash.to_string()));
        }
        Ok(Self {
            tools,
            mcp: None,
            events,
        })
    }

    pub fn with_mcp(mut self, mcp: Arc<McpManager>) -> Self {
        self.mcp = Some(mcp);
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn mcp(&self) -> Option<&Arc<McpManager>> {
        self.mcp.as_ref()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Usage texts of the registry tools.
    pub fn tool_prompts(&self) -> Vec<String> {
        self.tools.prompts()
    }

    pub fn contains(&self, name: &str) -> bool {
        Builtin::from_name(name).is_some() || self.tools.contains(name)
    }

    /// Route `request` to its implementation.
    pub async fn dispatch(
        &self,
        chat_id: &str,
        request: &ToolCallRequest,
        ctx: &mut BuiltinContext<'_>,
    ) -> Dispatched {
        let tool = request.tool.as_str();
        let started = Instant::now();

        let result = if let Some(builtin) = Builtin::from_name(tool) {
            builtin
                .run(&request.params, ctx, self.mcp.as_deref())
                .await
                .map(|output| (output, true))
        } else if let Some(handler) = self.tools.get(tool) {
            handler.execute(request.params.clone()).await.map(|result| {
                let success = if tool == SHELL_TOOL {
                    observation_succeeded(&result.output)
                } else {
                    true
                };
                (result.output, success)
            })
        } else {
            warn!(tool, "Model called an unknown tool");
            return Dispatched {
                observation: Observation::unknown_tool(tool),
                output: Value::Null,
                success: false,
            };
        };

        let dispatched = match result {
            Ok((output, success)) => Dispatched {
                observation: Observation::success(tool, output.clone()),
                output,
                success,
            },
            Err(e) => {
                let message = error_message(&e);
                warn!(tool, error = %e, "Tool failed");
                Dispatched {
                    observation: Observation::failure(tool, message.clone()),
                    output: Value::String(message),
                    success: false,
                }
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        debug!(tool, success = dispatched.success, duration_ms, "Tool dispatched");
        self.events.publish(DomainEvent::ToolExecuted {
            chat_id: chat_id.to_string(),
            tool_name: tool.to_string(),
            success: dispatched.success,
            duration_ms,
            timestamp: Utc::now(),
        });
        dispatched
    }
}

/// The text the model sees for a failed tool.
fn error_message(error: &ToolError) -> String {
    match error {
        ToolError::ExecutionFailed { reason, .. } => reason.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reagent_core::agent::AgentState;
    use reagent_core::chat::Chat;
    use reagent_core::tool::{Tool, ToolResult};
    use reagent_memory::Transcript;
    use serde_json::json;

    struct Shell;

    #[async_trait]
    impl Tool for Shell {
        fn name(&self) -> &str {
            "cli_execute"
        }
        fn description(&self) -> &str {
            "Run a shell command"
        }
        async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
            let ok = arguments["command"] != "false";
            Ok(ToolResult::json(json!({"success": ok, "stdout": "a\nb"})))
        }
    }

    struct Broken;

    #[async_trait]
    impl Tool for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        async fn execute(&self, _arguments: Value) -> Result<ToolResult, ToolError> {
            Err(ToolError::ExecutionFailed {
                tool_name: "broken".into(),
                reason: "disk full".into(),
            })
        }
    }

    struct Named(&'static str);

    #[async_trait]
    impl Tool for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "clash"
        }
        async fn execute(&self, _arguments: Value) -> Result<ToolResult, ToolError> {
            Ok(ToolResult::text("ok"))
        }
    }

    fn dispatcher() -> (Dispatcher, Arc<EventBus>) {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Shell)).unwrap();
        registry.register(Arc::new(Broken)).unwrap();
        let events = Arc::new(EventBus::new(16));
        (Dispatcher::new(Arc::new(registry), events.clone()).unwrap(), events)
    }

    async fn run(dispatcher: &Dispatcher, tool: &str, params: Value) -> (Dispatched, AgentState) {
        let mut chat = Chat::new();
        let transcript = Transcript::new();
        let mut state = AgentState::Running;
        let request = ToolCallRequest {
            thinking: "t".into(),
            tool: tool.into(),
            params,
        };
        let mut ctx = BuiltinContext {
            chat: &mut chat,
            transcript: &transcript,
            state: &mut state,
        };
        let dispatched = dispatcher.dispatch("chat-1", &request, &mut ctx).await;
        (dispatched, state)
    }

    #[tokio::test]
    async fn unknown_tool_is_an_observation() {
        let (dispatcher, _) = dispatcher();
        let (dispatched, state) = run(&dispatcher, "frobnicate", Value::Null).await;
        assert_eq!(dispatched.observation.error, "Tool does not exist.");
        assert_eq!(dispatched.observation.tool_call, "frobnicate");
        assert!(!dispatched.success);
        assert_eq!(state, AgentState::Running);
    }

    #[tokio::test]
    async fn tool_error_carries_the_message() {
        let (dispatcher, mut rx) = {
            let (d, events) = dispatcher();
            let rx = events.subscribe();
            (d, rx)
        };
        let (dispatched, _) = run(&dispatcher, "broken", json!({})).await;
        assert_eq!(
            dispatched.observation.to_value(),
            json!({"tool_call": "broken", "observation": "Tool has been executed.", "error": "disk full"})
        );
        assert!(!dispatched.success);

        match rx.recv().await.unwrap().as_ref() {
            DomainEvent::ToolExecuted { tool_name, success, chat_id, .. } => {
                assert_eq!(tool_name, "broken");
                assert_eq!(chat_id, "chat-1");
                assert!(!success);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn shell_tag_follows_output_success() {
        let (dispatcher, _) = dispatcher();
        let (ok, _) = run(&dispatcher, "cli_execute", json!({"command": "ls"})).await;
        assert!(ok.success);
        assert_eq!(ok.observation.observation["stdout"], "a\nb");

        let (failed, _) = run(&dispatcher, "cli_execute", json!({"command": "false"})).await;
        assert!(!failed.success);
        assert!(!failed.observation.is_error());
    }

    #[tokio::test]
    async fn builtins_take_precedence_and_mutate_state() {
        let (dispatcher, _) = dispatcher();
        let (dispatched, state) = run(&dispatcher, "enter_idle_state", json!({"final_answer": "bye"})).await;
        assert_eq!(state, AgentState::Final);
        assert_eq!(dispatched.output, json!("bye"));
        assert!(dispatched.success);
        assert!(dispatcher.contains("ask_followup_question"));
        assert!(dispatcher.contains("cli_execute"));
    }

    #[test]
    fn registry_may_not_shadow_builtins() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Named("enter_idle_state"))).unwrap();
        let result = Dispatcher::new(Arc::new(registry), Arc::new(EventBus::default()));
        assert!(matches!(result, Err(ToolError::DuplicateName(name)) if name == "enter_idle_state"));
    }
}
