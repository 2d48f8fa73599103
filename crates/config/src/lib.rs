//! Configuration loading, validation, and management for reagent.
//!
//! Loads configuration from `~/.reagent/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.reagent/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// LLM attempts per call before the step fails
    #[serde(default = "default_retry_time")]
    pub retry_time: u32,

    /// Fixed delay between attempts
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// HTTP timeout for one LLM request
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,

    /// Answer language injected into the environment message
    #[serde(default = "default_language")]
    pub language: String,

    /// Directory holding `history.json` and `history/<chat>.json`
    #[serde(default = "default_history_path")]
    pub history_path: PathBuf,

    /// Key into `models`
    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default = "default_version")]
    pub default_version: String,

    /// Messages kept verbatim in the prompt window
    #[serde(default = "default_memory_length")]
    pub memory_length: usize,

    /// Model parameters merged into every request body
    #[serde(default = "default_llm_params")]
    pub llm_params: Map<String, Value>,

    /// Endpoints keyed by model name
    #[serde(default = "default_models")]
    pub models: BTreeMap<String, ModelConfig>,

    #[serde(default)]
    pub tool_call: ToolCallConfig,

    /// MCP servers keyed by name
    #[serde(default)]
    pub mcp_server: BTreeMap<String, McpServerConfig>,

    /// Ordered chain-call steps
    #[serde(default)]
    pub chain_call: Vec<ChainStepConfig>,

    /// Named sub-agents exposed as tools
    #[serde(default)]
    pub sub_agents: Vec<SubAgentConfig>,
}

fn default_retry_time() -> u32 {
    3
}
fn default_retry_delay_secs() -> u64 {
    2
}
fn default_llm_timeout_secs() -> u64 {
    300
}
fn default_language() -> String {
    "English".into()
}
fn default_history_path() -> PathBuf {
    AppConfig::config_dir().join("history")
}
fn default_model() -> String {
    "openai".into()
}
fn default_version() -> String {
    "gpt-4o-mini".into()
}
fn default_memory_length() -> usize {
    10
}
fn default_llm_params() -> Map<String, Value> {
    let mut params = Map::new();
    params.insert("stream".into(), Value::Bool(true));
    params
}
fn default_models() -> BTreeMap<String, ModelConfig> {
    let mut models = BTreeMap::new();
    models.insert(
        default_model(),
        ModelConfig {
            api_url: "https://api.openai.com/v1/chat/completions".into(),
            api_key: None,
            versions: vec![ModelVersion::Name(default_version())],
        },
    );
    models
}
fn default_true() -> bool {
    true
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("retry_time", &self.retry_time)
            .field("retry_delay_secs", &self.retry_delay_secs)
            .field("llm_timeout_secs", &self.llm_timeout_secs)
            .field("language", &self.language)
            .field("history_path", &self.history_path)
            .field("default_model", &self.default_model)
            .field("default_version", &self.default_version)
            .field("memory_length", &self.memory_length)
            .field("llm_params", &self.llm_params)
            .field("models", &self.models)
            .field("tool_call", &self.tool_call)
            .field("mcp_server", &self.mcp_server)
            .field("chain_call", &self.chain_call)
            .field("sub_agents", &self.sub_agents)
            .finish()
    }
}

/// One LLM endpoint and the versions it serves.
#[derive(Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Full chat-completions URL
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default)]
    pub versions: Vec<ModelVersion>,
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("versions", &self.versions)
            .finish()
    }
}

/// A version is either a bare name or a name with its own parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelVersion {
    Name(String),
    Detailed {
        version: String,
        #[serde(default)]
        llm_params: Map<String, Value>,
    },
}

impl ModelVersion {
    pub fn name(&self) -> &str {
        match self {
            ModelVersion::Name(name) => name,
            ModelVersion::Detailed { version, .. } => version,
        }
    }

    /// Version-specific parameters, if any were given.
    pub fn llm_params(&self) -> Option<&Map<String, Value>> {
        match self {
            ModelVersion::Detailed { llm_params, .. } if !llm_params.is_empty() => Some(llm_params),
            _ => None,
        }
    }
}

/// Everything needed to address one model version.
#[derive(Clone, PartialEq)]
pub struct ResolvedModel {
    pub model: String,
    pub api_url: String,
    pub api_key: Option<String>,
    pub version: String,
    pub llm_params: Map<String, Value>,
}

impl std::fmt::Debug for ResolvedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedModel")
            .field("model", &self.model)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("version", &self.version)
            .field("llm_params", &self.llm_params)
            .finish()
    }
}

/// Settings of the ReAct loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallConfig {
    /// Messages (beyond the window) summarized into the system prompt
    #[serde(default = "default_long_memory_length")]
    pub long_memory_length: usize,

    #[serde(default = "default_max_thinking_repetitions")]
    pub max_thinking_repetitions: usize,

    /// Differing thoughts tolerated before the repetition counter clears
    #[serde(default = "default_repetitions_delay_empty")]
    pub repetitions_delay_empty: usize,

    /// MCP call timeout in seconds
    #[serde(default = "default_mcp_timeout")]
    pub mcp_timeout: u64,

    /// Append the environment message after the memory window
    #[serde(default = "default_true")]
    pub env_message: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmpdir: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_platform: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_arch: Option<String>,

    /// Extra instructions: a file path, or the text itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_prompt: Option<String>,

    /// Replaces the default agent introduction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_prompt: Option<String>,

    /// Step budget per query
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_step: Option<usize>,

    #[serde(default = "default_max_agent_depth")]
    pub max_agent_depth: usize,

    /// Overrides the top-level `memory_length` for the ReAct loop
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_length: Option<usize>,

    #[serde(default = "default_true")]
    pub todolist: bool,

    /// Connect the configured MCP servers
    #[serde(default = "default_true")]
    pub use_mcp: bool,

    /// Ask the model for a chat name after the first step
    #[serde(default = "default_true")]
    pub auto_name: bool,
}

fn default_long_memory_length() -> usize {
    30
}
fn default_max_thinking_repetitions() -> usize {
    3
}
fn default_repetitions_delay_empty() -> usize {
    2
}
fn default_mcp_timeout() -> u64 {
    600
}
fn default_max_agent_depth() -> usize {
    3
}

impl Default for ToolCallConfig {
    fn default() -> Self {
        Self {
            long_memory_length: default_long_memory_length(),
            max_thinking_repetitions: default_max_thinking_repetitions(),
            repetitions_delay_empty: default_repetitions_delay_empty(),
            mcp_timeout: default_mcp_timeout(),
            env_message: true,
            tmpdir: None,
            system_type: None,
            system_platform: None,
            system_arch: None,
            extra_prompt: None,
            agent_prompt: None,
            max_step: None,
            max_agent_depth: default_max_agent_depth(),
            memory_length: None,
            todolist: true,
            use_mcp: true,
            auto_name: true,
        }
    }
}

impl ToolCallConfig {
    /// The extra prompt text: file content when it names a file.
    pub fn extra_prompt_text(&self) -> String {
        match &self.extra_prompt {
            Some(value) => {
                let path = Path::new(value);
                if path.is_file() {
                    std::fs::read_to_string(path).unwrap_or_else(|e| {
                        tracing::warn!(path = %path.display(), error = %e, "Failed to read extra prompt");
                        String::new()
                    })
                } else {
                    value.clone()
                }
            }
            None => String::new(),
        }
    }
}

/// How to reach one MCP server.
///
/// `url` + `sse = true` selects SSE, `url` alone streamable HTTP, otherwise
/// `command` is spawned over stdio.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpServerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default)]
    pub sse: bool,

    #[serde(default)]
    pub disabled: bool,
}

/// One step of the chain-call pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainStepConfig {
    /// Model key, or `plugins` to run a static plugin
    pub model: String,

    /// Model version, or the plugin name
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_template: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_template: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,

    /// Extra entries rendered into the step's data before the call
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub input_data: BTreeMap<String, String>,

    /// Finish the pipeline after this step
    #[serde(default)]
    pub end: bool,
}

/// A named agent configuration exposed as a tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubAgentConfig {
    pub name: String,

    pub description: String,

    /// Description of the `query` parameter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_prompt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_prompt: Option<String>,

    /// Tool names (plugins or other sub-agents) this agent may call
    #[serde(default)]
    pub tools: Vec<String>,

    #[serde(default = "default_true")]
    pub todolist: bool,

    #[serde(default)]
    pub mcp_server: bool,
}

impl AppConfig {
    /// Load configuration from the default path (~/.reagent/config.toml).
    ///
    /// Environment overrides:
    /// - `REAGENT_MODEL`, `REAGENT_VERSION`
    /// - `REAGENT_API_KEY`, then `OPENAI_API_KEY`, for models without a key
    /// - `REAGENT_HISTORY_PATH`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_path(&Self::config_dir().join("config.toml"))
    }

    /// [`load_from`](Self::load_from) plus the environment overrides.
    pub fn load_path(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(model) = std::env::var("REAGENT_MODEL") {
            self.default_model = model;
        }
        if let Ok(version) = std::env::var("REAGENT_VERSION") {
            self.default_version = version;
        }
        if let Ok(path) = std::env::var("REAGENT_HISTORY_PATH") {
            self.history_path = PathBuf::from(path);
        }
        let key = std::env::var("REAGENT_API_KEY")
            .ok()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        if let Some(key) = key {
            for model in self.models.values_mut() {
                if model.api_key.is_none() {
                    model.api_key = Some(key.clone());
                }
            }
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".reagent")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry_time < 1 {
            return Err(ConfigError::ValidationError("retry_time must be at least 1".into()));
        }
        if self.memory_length < 1 {
            return Err(ConfigError::ValidationError(
                "memory_length must be at least 1".into(),
            ));
        }
        if self.tool_call.max_thinking_repetitions < 1 {
            return Err(ConfigError::ValidationError(
                "tool_call.max_thinking_repetitions must be at least 1".into(),
            ));
        }
        if self.tool_call.max_agent_depth < 1 {
            return Err(ConfigError::ValidationError(
                "tool_call.max_agent_depth must be at least 1".into(),
            ));
        }
        for (name, server) in &self.mcp_server {
            if server.url.is_none() && server.command.is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "mcp_server.{name} needs a url or a command"
                )));
            }
        }
        for (i, step) in self.chain_call.iter().enumerate() {
            if step.model.is_empty() || step.version.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "chain_call step {i} must name a model and a version"
                )));
            }
        }
        let mut names = HashSet::new();
        for agent in &self.sub_agents {
            if !names.insert(agent.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate sub-agent name: {}",
                    agent.name
                )));
            }
        }
        Ok(())
    }

    /// Memory window used by the ReAct loop.
    pub fn react_memory_length(&self) -> usize {
        self.tool_call.memory_length.unwrap_or(self.memory_length)
    }

    /// Resolve a model/version pair into its endpoint and parameters.
    ///
    /// Version-specific `llm_params` replace the top-level ones when present.
    pub fn resolve(&self, model: &str, version: &str) -> Result<ResolvedModel, ConfigError> {
        let entry = self
            .models
            .get(model)
            .ok_or_else(|| ConfigError::UnknownModel(model.to_string()))?;
        let llm_params = entry
            .versions
            .iter()
            .find(|v| v.name() == version)
            .and_then(ModelVersion::llm_params)
            .cloned()
            .unwrap_or_else(|| self.llm_params.clone());
        Ok(ResolvedModel {
            model: model.to_string(),
            api_url: entry.api_url.clone(),
            api_key: entry.api_key.clone(),
            version: version.to_string(),
            llm_params,
        })
    }

    /// Resolve the default model/version.
    pub fn resolve_default(&self) -> Result<ResolvedModel, ConfigError> {
        self.resolve(&self.default_model, &self.default_version)
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            retry_time: default_retry_time(),
            retry_delay_secs: default_retry_delay_secs(),
            llm_timeout_secs: default_llm_timeout_secs(),
            language: default_language(),
            history_path: default_history_path(),
            default_model: default_model(),
            default_version: default_version(),
            memory_length: default_memory_length(),
            llm_params: default_llm_params(),
            models: default_models(),
            tool_call: ToolCallConfig::default(),
            mcp_server: BTreeMap::new(),
            chain_call: vec![],
            sub_agents: vec![],
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Model not configured: {0}")]
    UnknownModel(String),
}
