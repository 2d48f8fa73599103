//! Connection manager for the configured MCP servers.
//!
//! The manager is constructed by the composition root and shared by every
//! agent. Connecting is lazy and happens once: the first caller of
//! [`McpManager::init`] connects all enabled servers, lists their prompts and
//! tools, and builds the consolidated prompt. Servers that fail are reported
//! on the event bus and skipped.

use anyhow::{Context, Result};
use futures::future::join_all;
use reagent_config::McpServerConfig;
use reagent_core::error::ToolError;
use reagent_core::event::{DomainEvent, EventBus};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::client::McpClient;
use crate::protocol::McpToolDefinition;
use crate::transport::{HttpTransport, McpTransport, SseTransport, StdioTransport};

/// Tools never exposed to the model.
const HIDDEN_TOOLS: &[&str] = &["execute_bash"];

/// Default `tools/call` timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Default)]
struct McpState {
    clients: HashMap<String, Arc<McpClient>>,
    /// tool name -> owning server
    tools: HashMap<String, String>,
    prompt: String,
}

pub struct McpManager {
    configs: BTreeMap<String, McpServerConfig>,
    transports: Vec<(String, Arc<dyn McpTransport>)>,
    timeout: Duration,
    events: Option<Arc<EventBus>>,
    state: OnceCell<McpState>,
}

impl McpManager {
    pub fn new(configs: BTreeMap<String, McpServerConfig>, timeout: Duration) -> Self {
        Self {
            configs,
            transports: Vec::new(),
            timeout,
            events: None,
            state: OnceCell::new(),
        }
    }

    /// A manager with no servers.
    pub fn empty() -> Self {
        Self::new(BTreeMap::new(), DEFAULT_TIMEOUT)
    }

    /// Report connection failures on `events`.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Add an already-open transport, connected during [`init`](Self::init).
    pub fn with_transport(mut self, name: impl Into<String>, transport: Arc<dyn McpTransport>) -> Self {
        self.transports.push((name.into(), transport));
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_initialized(&self) -> bool {
        self.state.initialized()
    }

    /// Connect every enabled server once; later calls are no-ops.
    pub async fn init(&self) {
        self.state().await;
    }

    async fn state(&self) -> &McpState {
        self.state.get_or_init(|| self.connect_all()).await
    }

    /// The consolidated prompt fragment for the system prompt.
    pub async fn prompt(&self) -> String {
        self.state().await.prompt.clone()
    }

    /// Names of every routable tool.
    pub async fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state().await.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of the connected servers.
    pub async fn servers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state().await.clients.keys().cloned().collect();
        names.sort();
        names
    }

    /// Forward a call to the server owning `name`, bounded by the timeout.
    ///
    /// Returns the raw `tools/call` result. Remote errors, `isError` results
    /// and timeouts all surface as [`ToolError`].
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        let state = self.state().await;
        let client = state
            .tools
            .get(name)
            .and_then(|server| state.clients.get(server))
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        debug!(server = %client.server_name(), tool = %name, "Calling MCP tool");
        let result = tokio::time::timeout(self.timeout, client.call_tool(name, arguments))
            .await
            .map_err(|_| {
                warn!(server = %client.server_name(), tool = %name, timeout_secs = self.timeout.as_secs(), "MCP tool timed out");
                ToolError::Timeout {
                    tool_name: name.to_string(),
                    timeout_secs: self.timeout.as_secs(),
                }
            })?
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: name.to_string(),
                reason: format!("{e:#}"),
            })?;

        if result.is_error {
            return Err(ToolError::ExecutionFailed {
                tool_name: name.to_string(),
                reason: result.text(),
            });
        }
        serde_json::to_value(&result).map_err(|e| ToolError::ExecutionFailed {
            tool_name: name.to_string(),
            reason: e.to_string(),
        })
    }

    /// Close every connection.
    pub async fn close(&self) {
        if let Some(state) = self.state.get() {
            for (name, client) in &state.clients {
                if let Err(e) = client.close().await {
                    debug!(server = %name, error = %e, "Failed to close MCP server");
                }
            }
        }
    }

    fn alert(&self, context: &str, message: String) {
        warn!(context, %message, "MCP failure");
        if let Some(events) = &self.events {
            events.publish(DomainEvent::alert(context, message));
        }
    }

    async fn connect_all(&self) -> McpState {
        let mut sources: Vec<(String, Source<'_>)> = Vec::new();
        for (name, config) in &self.configs {
            if config.disabled {
                debug!(server = %name, "MCP server disabled");
                continue;
            }
            sources.push((name.clone(), Source::Config(config)));
        }
        for (name, transport) in &self.transports {
            if !sources.iter().any(|(n, _)| n == name) {
                sources.push((name.clone(), Source::Open(transport.clone())));
            }
        }

        let connected = join_all(
            sources
                .into_iter()
                .map(|(name, source)| self.connect_server(name, source)),
        )
        .await;

        let mut state = McpState::default();
        let mut prompts = Vec::new();
        for (name, client, description) in connected.into_iter().flatten() {
            if let Some((prompt, tools)) = description {
                for tool in tools {
                    state.tools.insert(tool, name.clone());
                }
                prompts.push(prompt);
            }
            state.clients.insert(name, client);
        }

        state.prompt = prompts.join("\n\n---\n\n");
        info!(servers = state.clients.len(), tools = state.tools.len(), "MCP initialized");
        state
    }

    /// Open, initialize and describe one server, each phase bounded by the timeout.
    async fn connect_server(&self, name: String, source: Source<'_>) -> Option<Connected> {
        let connect = async {
            let transport = match source {
                Source::Config(config) => open_transport(&name, config).await?,
                Source::Open(transport) => transport,
            };
            McpClient::connect(transport, name.clone()).await
        };
        let client = match tokio::time::timeout(self.timeout, connect).await {
            Ok(Ok(client)) => Arc::new(client),
            Ok(Err(e)) => {
                self.alert("McpManager.connect", format!("{name}: {e:#}"));
                return None;
            }
            Err(_) => {
                self.alert(
                    "McpManager.connect",
                    format!("{name}: no answer within {}s", self.timeout.as_secs()),
                );
                return None;
            }
        };

        let description = match tokio::time::timeout(self.timeout, describe_server(&client)).await {
            Ok(Ok(description)) => description,
            Ok(Err(e)) => {
                self.alert("McpManager.prompt", format!("{name}: {e:#}"));
                None
            }
            Err(_) => {
                self.alert(
                    "McpManager.prompt",
                    format!("{name}: no tool list within {}s", self.timeout.as_secs()),
                );
                None
            }
        };
        Some((name, client, description))
    }
}

/// Where a server's transport comes from.
enum Source<'a> {
    Config(&'a McpServerConfig),
    Open(Arc<dyn McpTransport>),
}

/// A connected server: name, client and its prompt section with tool names.
type Connected = (String, Arc<McpClient>, Option<(String, Vec<String>)>);

async fn open_transport(name: &str, config: &McpServerConfig) -> Result<Arc<dyn McpTransport>> {
    if let Some(url) = &config.url {
        if config.sse {
            let transport: Arc<dyn McpTransport> = SseTransport::connect(url).await?;
            return Ok(transport);
        }
        return Ok(Arc::new(HttpTransport::new(url)?));
    }
    let command = config
        .command
        .as_deref()
        .with_context(|| format!("MCP server '{name}' has neither url nor command"))?;
    let transport: Arc<dyn McpTransport> = StdioTransport::spawn(command, &config.args, &config.env)?;
    Ok(transport)
}

/// The server's prompt section and the tools it routes, or `None` without tools.
async fn describe_server(client: &McpClient) -> Result<Option<(String, Vec<String>)>> {
    let mut description = String::new();
    if client.has_prompts() {
        let prompts = client.list_prompts().await?;
        if let Some(first) = prompts.first() {
            description = format!("\n\n{}", first.description.as_deref().unwrap_or_default());
        }
    }
    if !client.has_tools() {
        return Ok(None);
    }

    let tools: Vec<McpToolDefinition> = client
        .list_tools()
        .await?
        .into_iter()
        .filter(|t| !HIDDEN_TOOLS.contains(&t.name.as_str()))
        .collect();
    let usage = tools.iter().map(tool_prompt).collect::<Vec<_>>().join("\n\n");
    let prompt = format!(
        "## MCP server: {}{description}\n\n## Use\n\n{usage}",
        client.server_name()
    );
    Ok(Some((prompt, tools.into_iter().map(|t| t.name).collect())))
}

/// `MCP name / MCP args / MCP description` block for one tool.
pub fn tool_prompt(tool: &McpToolDefinition) -> String {
    let required: Vec<&str> = tool
        .input_schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let args = tool
        .input_schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|properties| {
            properties
                .iter()
                .map(|(key, schema)| {
                    let marker = if required.contains(&key.as_str()) { "(required) " } else { "" };
                    let text = schema
                        .get("description")
                        .or_else(|| schema.get("title"))
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    let kind = match schema.get("type") {
                        Some(Value::String(t)) => t.clone(),
                        Some(other) => other.to_string(),
                        None => "any".to_string(),
                    };
                    format!("- {key}: {marker}{text} (type: {kind})")
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();

    format!(
        "MCP name: {}\nMCP args:\n{args}\nMCP description:\n{}",
        tool.name,
        tool.description.as_deref().unwrap_or_default()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::ScriptedServer;
    use serde_json::json;

    fn files_server() -> ScriptedServer {
        ScriptedServer::new(vec![
            json!({
                "name": "read_file",
                "description": "Read a file",
                "inputSchema": {
                    "type": "object",
                    "properties": {"path": {"type": "string", "description": "File path"}},
                    "required": ["path"]
                }
            }),
            json!({"name": "execute_bash", "inputSchema": {"type": "object"}}),
        ])
    }

    #[test]
    fn tool_prompt_lists_args() {
        let tool: McpToolDefinition = serde_json::from_value(json!({
            "name": "search",
            "description": "Search docs",
            "inputSchema": {
                "properties": {
                    "limit": {"type": "integer", "title": "Limit"},
                    "query": {"type": "string", "description": "Query text"}
                },
                "required": ["query"]
            }
        }))
        .unwrap();
        assert_eq!(
            tool_prompt(&tool),
            "MCP name: search\nMCP args:\n- limit: Limit (type: integer)\n- query: (required) Query text (type: string)\nMCP description:\nSearch docs"
        );
    }

    #[tokio::test]
    async fn init_is_lazy_and_idempotent() {
        let server = Arc::new(files_server());
        let manager = McpManager::empty().with_transport("files", server.clone());
        assert!(!manager.is_initialized());

        manager.init().await;
        manager.init().await;
        assert!(manager.is_initialized());

        let initializations = server
            .methods
            .lock()
            .unwrap()
            .iter()
            .filter(|m| *m == "initialize")
            .count();
        assert_eq!(initializations, 1);
        assert_eq!(manager.tool_names().await, vec!["read_file"]);
    }

    #[tokio::test]
    async fn prompt_consolidates_servers() {
        let mut with_prompt = ScriptedServer::new(vec![json!({"name": "query_db", "inputSchema": {}})]);
        with_prompt.prompts = Some(vec![json!({"name": "db", "description": "Database helpers"})]);

        let manager = McpManager::empty()
            .with_transport("files", Arc::new(files_server()))
            .with_transport("db", Arc::new(with_prompt));
        let prompt = manager.prompt().await;

        assert!(prompt.starts_with("## MCP server: files\n\n## Use\n\nMCP name: read_file"));
        assert!(prompt.contains("- path: (required) File path (type: string)"));
        assert!(prompt.contains("\n\n---\n\n## MCP server: db\n\nDatabase helpers\n\n## Use"));
        assert!(!prompt.contains("execute_bash"));
    }

    #[tokio::test]
    async fn call_routes_to_owner() {
        let manager = McpManager::empty().with_transport("files", Arc::new(files_server()));
        let result = manager.call_tool("read_file", json!({"path": "/tmp"})).await.unwrap();
        assert_eq!(result["content"][0]["text"], "called read_file");

        assert!(matches!(
            manager.call_tool("execute_bash", json!({})).await,
            Err(ToolError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn remote_error_result_is_tool_error() {
        let server = ScriptedServer::new(vec![json!({"name": "fail", "inputSchema": {}})]);
        let manager = McpManager::empty().with_transport("broken", Arc::new(server));
        match manager.call_tool("fail", json!({})).await {
            Err(ToolError::ExecutionFailed { reason, .. }) => assert_eq!(reason, "remote failure"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn hanging_server_times_out() {
        tokio::time::pause();
        let mut server = files_server();
        server.hang_on_call = true;
        let manager = McpManager::new(BTreeMap::new(), Duration::from_secs(1))
            .with_transport("slow", Arc::new(server));
        manager.init().await;

        let started = tokio::time::Instant::now();
        let result = manager.call_tool("read_file", json!({"path": "/"})).await;
        let elapsed = started.elapsed();

        assert!(matches!(result, Err(ToolError::Timeout { timeout_secs: 1, .. })));
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn mute_server_is_skipped_after_the_timeout() {
        tokio::time::pause();
        let bus = Arc::new(EventBus::new(8));
        let mut rx = bus.subscribe();
        let mut mute = files_server();
        mute.mute = true;
        let manager = McpManager::new(BTreeMap::new(), Duration::from_secs(1))
            .with_events(Arc::clone(&bus))
            .with_transport("mute", Arc::new(mute))
            .with_transport("files", Arc::new(files_server()));

        let started = tokio::time::Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(3600),
            manager.call_tool("read_file", json!({"path": "/tmp"})),
        )
        .await
        .expect("init must not hang on a mute server")
        .unwrap();

        assert_eq!(result["content"][0]["text"], "called read_file");
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(manager.servers().await, vec!["files"]);
        match rx.try_recv().unwrap().as_ref() {
            DomainEvent::Alert { message, .. } => assert_eq!(message, "mute: no answer within 1s"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_server_is_alerted_and_skipped() {
        let bus = Arc::new(EventBus::new(8));
        let mut rx = bus.subscribe();
        let mut configs = BTreeMap::new();
        configs.insert(
            "missing".to_string(),
            McpServerConfig {
                command: Some("reagent-no-such-mcp-server".into()),
                ..Default::default()
            },
        );
        configs.insert(
            "off".to_string(),
            McpServerConfig {
                command: Some("reagent-no-such-mcp-server".into()),
                disabled: true,
                ..Default::default()
            },
        );

        let manager = McpManager::new(configs, DEFAULT_TIMEOUT)
            .with_events(Arc::clone(&bus))
            .with_transport("files", Arc::new(files_server()));
        manager.init().await;

        assert_eq!(manager.servers().await, vec!["files"]);
        match rx.try_recv().unwrap().as_ref() {
            DomainEvent::Alert { message, .. } => assert!(message.starts_with("missing:")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }
}
