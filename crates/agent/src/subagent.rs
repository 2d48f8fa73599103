//! Sub-agents: configured agents exposed to their parent as ordinary tools.
//!
//! A sub-agent builds its own [`ReactAgent`] on every call. Its tool
//! registry is resolved at that point too, so a cycle or an over-deep
//! nesting only surfaces when the offending call is made, and then as an
//! error observation for the caller rather than a failed startup.
//!
//! Each tool carries its lineage (the chain of sub-agent names from the
//! root). A name already in the lineage is a cycle; a lineage longer than
//! `max_agent_depth` is too deep.

use std::sync::Arc;

use async_trait::async_trait;
use reagent_config::SubAgentConfig;
use reagent_core::agent::{AgentMode, AgentState};
use reagent_core::error::ToolError;
use reagent_core::event::EventBus;
use reagent_core::observation::INTERRUPTED;
use reagent_core::stop::StopFlag;
use reagent_core::tool::{Tool, ToolRegistry, ToolResult};
use reagent_mcp::McpManager;
use reagent_providers::ModelHandle;
use reagent_tools::plugins;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::dispatcher::Dispatcher;
use crate::react::ReactAgent;
use crate::settings::{AgentSettings, PromptArgs};

const DEFAULT_QUERY_PROMPT: &str = "The task content that requires the assistant to complete.";

/// What a sub-agent needs to build its own agent at call time.
#[derive(Clone)]
pub struct SubAgentServices {
    pub handle: ModelHandle,
    pub settings: AgentSettings,
    pub agents: Arc<Vec<SubAgentConfig>>,
    pub mcp: Option<Arc<McpManager>>,
    pub events: Arc<EventBus>,
    /// Shared with the parent, so one Ctrl+C stops the whole tree
    pub stop: StopFlag,
}

impl SubAgentServices {
    fn config(&self, name: &str) -> Option<&SubAgentConfig> {
        self.agents.iter().find(|a| a.name == name)
    }
}

pub struct SubAgentTool {
    config: SubAgentConfig,
    services: SubAgentServices,
    lineage: Vec<String>,
}

impl SubAgentTool {
    pub fn new(config: SubAgentConfig, services: SubAgentServices, lineage: Vec<String>) -> Self {
        Self {
            config,
            services,
            lineage,
        }
    }

    pub fn lineage(&self) -> &[String] {
        &self.lineage
    }
}

#[async_trait]
impl Tool for SubAgentTool {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn description(&self) -> &str {
        &self.config.description
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": self.config.query_prompt.as_deref().unwrap_or(DEFAULT_QUERY_PROMPT)
                }
            },
            "required": ["query"]
        })
    }

    fn prompt(&self) -> String {
        format!(
            "## {name}\n\nDescription: {description}\n\nParameters:\n- query: (required) {query}\n\n\
             Usage:\n{{ \"thinking\": \"[Thinking process]\", \"tool\": \"{name}\", \"params\": {{ \"query\": \"[Task details]\" }} }}",
            name = self.config.name,
            description = self.config.description,
            query = self.config.query_prompt.as_deref().unwrap_or(DEFAULT_QUERY_PROMPT),
        )
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        let query = arguments
            .get("query")
            .and_then(Value::as_str)
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments(format!("{} needs a \"query\"", self.config.name)))?;

        let registry = build_registry(&self.services, &self.config.tools, &self.lineage)?;
        let mut dispatcher = Dispatcher::new(Arc::new(registry), self.services.events.clone())?;
        if self.config.mcp_server
            && let Some(mcp) = &self.services.mcp
        {
            dispatcher = dispatcher.with_mcp(mcp.clone());
        }

        let settings = AgentSettings {
            agent_prompt: self.config.agent_prompt.clone(),
            ..self.services.settings.clone()
        };
        let mut agent = ReactAgent::new(self.services.handle.clone(), dispatcher)
            .with_settings(settings)
            .with_prompt_args(PromptArgs::sub_agent(&self.config))
            .with_mode(AgentMode::Auto)
            .with_stop(self.services.stop.clone())
            .with_chat_name(self.config.name.clone());

        info!(agent = %self.config.name, depth = self.lineage.len(), "Sub-agent started");
        let outcome = agent.call_react(query).await;
        debug!(agent = %self.config.name, steps = outcome.steps, state = ?outcome.state, "Sub-agent finished");

        if outcome.output == INTERRUPTED {
            return Ok(ToolResult::text(INTERRUPTED));
        }
        if outcome.state == AgentState::Error {
            return Err(ToolError::ExecutionFailed {
                tool_name: self.config.name.clone(),
                reason: outcome.output,
            });
        }
        Ok(ToolResult::json(outcome.observation()))
    }
}

/// Resolve `names` to plugins or nested sub-agents below `lineage`.
pub fn build_registry(
    services: &SubAgentServices,
    names: &[String],
    lineage: &[String],
) -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::new();
    for name in names {
        if let Some(plugin) = plugins::build(name) {
            registry.register(plugin)?;
            continue;
        }
        let config = services
            .config(name)
            .ok_or_else(|| ToolError::NotFound(name.clone()))?;
        if lineage.contains(name) {
            let mut path = lineage.to_vec();
            path.push(name.clone());
            return Err(ToolError::Cycle(path.join(" -> ")));
        }
        let max = services.settings.max_agent_depth;
        if lineage.len() >= max {
            return Err(ToolError::DepthExceeded {
                depth: lineage.len() + 1,
                max,
            });
        }
        let mut child = lineage.to_vec();
        child.push(name.clone());
        registry.register(Arc::new(SubAgentTool::new(config.clone(), services.clone(), child)))?;
    }
    Ok(registry)
}

/// The top-level registry: every plugin, then every sub-agent.
pub fn root_registry(services: &SubAgentServices) -> Result<ToolRegistry, ToolError> {
    let mut registry = plugins::default_registry();
    for config in services.agents.iter() {
        let tool = SubAgentTool::new(config.clone(), services.clone(), vec![config.name.clone()]);
        registry.register(Arc::new(tool))?;
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use reagent_core::provider::Provider;
    use reagent_providers::RetryPolicy;

    fn agent_config(name: &str, tools: &[&str]) -> SubAgentConfig {
        SubAgentConfig {
            name: name.into(),
            description: format!("{name} agent"),
            tools: tools.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    fn services(provider: Arc<dyn Provider>, agents: Vec<SubAgentConfig>, max_depth: usize) -> SubAgentServices {
        SubAgentServices {
            handle: handle(provider),
            settings: AgentSettings {
                auto_name: false,
                retry: RetryPolicy::no_retry(),
                max_agent_depth: max_depth,
                ..AgentSettings::default()
            },
            agents: Arc::new(agents),
            mcp: None,
            events: Arc::new(EventBus::new(64)),
            stop: StopFlag::new(),
        }
    }

    #[test]
    fn prompt_describes_the_query() {
        let services = services(Arc::new(SequentialMockProvider::new(vec![])), vec![], 3);
        let mut config = agent_config("researcher", &[]);
        config.query_prompt = Some("What to research.".into());
        let tool = SubAgentTool::new(config, services, vec!["researcher".into()]);
        let prompt = tool.prompt();
        assert!(prompt.starts_with("## researcher\n\nDescription: researcher agent"));
        assert!(prompt.contains("- query: (required) What to research."));
        assert!(prompt.contains("{ \"thinking\": \"[Thinking process]\", \"tool\": \"researcher\""));
    }

    #[test]
    fn root_registry_holds_plugins_and_agents() {
        let agents = vec![agent_config("a", &[]), agent_config("b", &["a"])];
        let services = services(Arc::new(SequentialMockProvider::new(vec![])), agents, 3);
        let registry = root_registry(&services).unwrap();
        assert!(registry.contains("json_parse"));
        assert!(registry.contains("a"));
        assert!(registry.contains("b"));
    }

    #[test]
    fn cycles_and_depth_are_rejected() {
        let agents = vec![agent_config("a", &["b"]), agent_config("b", &["a"]), agent_config("c", &[])];
        let services = services(Arc::new(SequentialMockProvider::new(vec![])), agents, 2);

        let err = build_registry(&services, &["a".into()], &["a".into(), "b".into()]).unwrap_err();
        assert!(matches!(err, ToolError::Cycle(path) if path == "a -> b -> a"));

        let err = build_registry(&services, &["c".into()], &["a".into(), "b".into()]).unwrap_err();
        assert!(matches!(err, ToolError::DepthExceeded { depth: 3, max: 2 }));

        let err = build_registry(&services, &["nope".into()], &[]).unwrap_err();
        assert!(matches!(err, ToolError::NotFound(name) if name == "nope"));

        let ok = build_registry(&services, &["c".into(), "get_think".into()], &["a".into()]).unwrap();
        assert_eq!(ok.names(), vec!["c", "get_think"]);
    }

    #[tokio::test]
    async fn sub_agent_returns_its_final_answer() {
        let provider = Arc::new(SequentialMockProvider::new(vec![tool_call(
            "Found it.",
            "enter_idle_state",
            json!({"final_answer": "42"}),
        )]));
        let services = services(provider.clone(), vec![agent_config("solver", &[])], 3);
        let tool = SubAgentTool::new(agent_config("solver", &[]), services, vec!["solver".into()]);

        let result = tool.execute(json!({"query": "answer it"})).await.unwrap();
        assert_eq!(result.output, json!("42"));

        // Sub-agents run with the reduced prompt in automatic mode
        let request = &provider.requests()[0];
        assert!(!request.messages[0].content.contains("## ask_followup_question"));
        assert!(!request.messages[0].content.contains("# Operation modes"));
    }

    #[tokio::test]
    async fn nested_cycle_is_an_observation_for_the_parent() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            tool_call("Delegate.", "b", json!({"query": "go deeper"})),
            tool_call("Stop here.", "enter_idle_state", json!({"final_answer": "gave up"})),
        ]));
        let agents = vec![agent_config("a", &["b"]), agent_config("b", &["a"])];
        let services = services(provider.clone(), agents.clone(), 3);
        let tool = SubAgentTool::new(agents[0].clone(), services, vec!["a".into()]);

        // a calls b; building b's registry finds a -> b -> a
        let result = tool.execute(json!({"query": "start"})).await.unwrap();
        assert_eq!(result.output, json!("gave up"));
        let second = &provider.requests()[1];
        assert!(second.messages.iter().any(|m| m.content.contains("Sub-agent cycle detected: a -> b -> a")));
    }

    #[tokio::test]
    async fn failed_sub_agent_is_a_tool_error() {
        let provider = Arc::new(FailingProvider::new(5, "unused"));
        let services = services(provider, vec![], 3);
        let tool = SubAgentTool::new(agent_config("solver", &[]), services, vec!["solver".into()]);

        match tool.execute(json!({"query": "x"})).await {
            Err(ToolError::ExecutionFailed { tool_name, reason }) => {
                assert_eq!(tool_name, "solver");
                assert!(reason.contains("did not answer"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_query_is_invalid() {
        let services = services(Arc::new(SequentialMockProvider::new(vec![])), vec![], 3);
        let tool = SubAgentTool::new(agent_config("solver", &[]), services, vec!["solver".into()]);
        let err = tool.execute(json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn stopped_sub_agent_reports_the_interruption() {
        let provider = Arc::new(SequentialMockProvider::new(vec![]));
        let services = services(provider, vec![], 3);
        services.stop.stop();
        let tool = SubAgentTool::new(agent_config("solver", &[]), services.clone(), vec!["solver".into()]);
        let result = tool.execute(json!({"query": "x"})).await.unwrap();
        assert_eq!(result.output, json!(INTERRUPTED));
    }
}
