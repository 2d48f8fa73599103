//! Per-agent settings resolved from [`AppConfig`].

use std::path::PathBuf;
use std::time::Duration;

use reagent_config::{AppConfig, SubAgentConfig};
use reagent_providers::RetryPolicy;

/// Loop and prompt settings shared by an agent and its sub-agents.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub language: String,
    pub memory_length: usize,
    pub long_memory_length: usize,
    pub max_thinking_repetitions: usize,
    pub repetitions_delay_empty: usize,
    pub env_message: bool,
    pub tmpdir: PathBuf,
    pub system_type: String,
    pub system_platform: String,
    pub system_arch: String,
    pub extra_prompt: String,
    pub agent_prompt: Option<String>,
    pub max_step: Option<usize>,
    pub max_agent_depth: usize,
    pub auto_name: bool,
    pub retry: RetryPolicy,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl AgentSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let tool_call = &config.tool_call;
        Self {
            language: config.language.clone(),
            memory_length: config.react_memory_length(),
            long_memory_length: tool_call.long_memory_length,
            max_thinking_repetitions: tool_call.max_thinking_repetitions,
            repetitions_delay_empty: tool_call.repetitions_delay_empty,
            env_message: tool_call.env_message,
            tmpdir: tool_call.tmpdir.clone().unwrap_or_else(std::env::temp_dir),
            system_type: tool_call
                .system_type
                .clone()
                .unwrap_or_else(|| std::env::consts::FAMILY.to_string()),
            system_platform: tool_call
                .system_platform
                .clone()
                .unwrap_or_else(|| std::env::consts::OS.to_string()),
            system_arch: tool_call
                .system_arch
                .clone()
                .unwrap_or_else(|| std::env::consts::ARCH.to_string()),
            extra_prompt: tool_call.extra_prompt_text(),
            agent_prompt: tool_call.agent_prompt.clone(),
            max_step: tool_call.max_step,
            max_agent_depth: tool_call.max_agent_depth,
            auto_name: tool_call.auto_name,
            retry: RetryPolicy::new(config.retry_time, Duration::from_secs(config.retry_delay_secs)),
        }
    }
}

/// Switches that shape the system prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptArgs {
    /// Replaces the default role paragraph
    pub agent_prompt: Option<String>,
    pub mcp_server: bool,
    pub todolist: bool,
    /// Nested agents get a reduced prompt and no user-facing tools
    pub subagent: bool,
}

impl Default for PromptArgs {
    fn default() -> Self {
        Self {
            agent_prompt: None,
            mcp_server: true,
            todolist: true,
            subagent: false,
        }
    }
}

impl PromptArgs {
    /// Arguments of the top-level agent.
    pub fn main(config: &AppConfig) -> Self {
        Self {
            agent_prompt: config.tool_call.agent_prompt.clone(),
            mcp_server: config.tool_call.use_mcp,
            todolist: config.tool_call.todolist,
            subagent: false,
        }
    }

    pub fn sub_agent(config: &SubAgentConfig) -> Self {
        Self {
            agent_prompt: config.agent_prompt.clone(),
            mcp_server: config.mcp_server,
            todolist: config.todolist,
            subagent: true,
        }
    }
}
