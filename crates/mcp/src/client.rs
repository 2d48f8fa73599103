//! MCP client: handshake, discovery, and tool calls over any transport.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::protocol::{
    ClientInfo, InitializeParams, InitializeResult, JsonRpcRequest, MCP_PROTOCOL_VERSION,
    McpPromptDefinition, McpToolCallResult, McpToolDefinition, PromptsListResult, ToolCallParams,
    ToolsListResult,
};
use crate::transport::McpTransport;

/// A connected, initialized MCP server.
pub struct McpClient {
    transport: Arc<dyn McpTransport>,
    server_name: String,
    server_info: InitializeResult,
}

impl McpClient {
    /// Run the `initialize` handshake and announce `notifications/initialized`.
    pub async fn connect(transport: Arc<dyn McpTransport>, server_name: impl Into<String>) -> Result<Self> {
        let server_name = server_name.into();
        let params = InitializeParams {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: json!({}),
            client_info: ClientInfo {
                name: "reagent".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        let server_info: InitializeResult = request(
            transport.as_ref(),
            JsonRpcRequest::new("initialize", Some(serde_json::to_value(&params)?)),
        )
        .await
        .with_context(|| format!("MCP server '{server_name}' failed to initialize"))?;

        transport
            .notify(JsonRpcRequest::notification("notifications/initialized"))
            .await
            .context("Failed to send initialized notification")?;

        Ok(Self {
            transport,
            server_name,
            server_info,
        })
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn server_info(&self) -> &InitializeResult {
        &self.server_info
    }

    pub fn has_tools(&self) -> bool {
        self.server_info.capabilities.tools.is_some()
    }

    pub fn has_prompts(&self) -> bool {
        self.server_info.capabilities.prompts.is_some()
    }

    pub async fn list_tools(&self) -> Result<Vec<McpToolDefinition>> {
        let result: ToolsListResult =
            request(self.transport.as_ref(), JsonRpcRequest::new("tools/list", None)).await?;
        Ok(result.tools)
    }

    pub async fn list_prompts(&self) -> Result<Vec<McpPromptDefinition>> {
        let result: PromptsListResult =
            request(self.transport.as_ref(), JsonRpcRequest::new("prompts/list", None)).await?;
        Ok(result.prompts)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<McpToolCallResult> {
        let arguments = if arguments.is_null() { json!({}) } else { arguments };
        let params = ToolCallParams {
            name: name.to_string(),
            arguments: Some(arguments),
        };
        request(
            self.transport.as_ref(),
            JsonRpcRequest::new("tools/call", Some(serde_json::to_value(&params)?)),
        )
        .await
        .with_context(|| format!("Tool call '{name}' failed"))
    }

    pub async fn close(&self) -> Result<()> {
        self.transport.close().await
    }
}

async fn request<T: DeserializeOwned>(transport: &dyn McpTransport, request: JsonRpcRequest) -> Result<T> {
    let method = request.method.clone();
    let response = transport.send(request).await?;
    let result = response
        .result
        .with_context(|| format!("{method} response missing result"))?;
    serde_json::from_value(result).with_context(|| format!("Failed to parse {method} response"))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::protocol::{JsonRpcResponse, RequestId};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Answers the handshake and discovery; `tools/call` either echoes or hangs.
    /// A mute server never answers at all.
    pub(crate) struct ScriptedServer {
        pub tools: Vec<Value>,
        pub prompts: Option<Vec<Value>>,
        pub hang_on_call: bool,
        pub mute: bool,
        pub methods: Mutex<Vec<String>>,
    }

    impl ScriptedServer {
        pub(crate) fn new(tools: Vec<Value>) -> Self {
            Self {
                tools,
                prompts: None,
                hang_on_call: false,
                mute: false,
                methods: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl McpTransport for ScriptedServer {
        async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
            self.methods.lock().unwrap().push(request.method.clone());
            if self.mute {
                std::future::pending::<()>().await;
            }
            let id = RequestId::Number(1);
            let result = match request.method.as_str() {
                "initialize" => {
                    let mut capabilities = json!({"tools": {}});
                    if self.prompts.is_some() {
                        capabilities["prompts"] = json!({});
                    }
                    json!({
                        "protocolVersion": MCP_PROTOCOL_VERSION,
                        "capabilities": capabilities,
                        "serverInfo": {"name": "scripted"}
                    })
                }
                "tools/list" => json!({"tools": self.tools}),
                "prompts/list" => json!({"prompts": self.prompts.clone().unwrap_or_default()}),
                "tools/call" => {
                    if self.hang_on_call {
                        std::future::pending::<()>().await;
                    }
                    let params = request.params.unwrap_or_default();
                    if params["name"] == "fail" {
                        json!({"content": [{"type": "text", "text": "remote failure"}], "isError": true})
                    } else {
                        json!({"content": [{"type": "text", "text": format!("called {}", params["name"].as_str().unwrap_or_default())}]})
                    }
                }
                other => anyhow::bail!("unexpected method {other}"),
            };
            Ok(JsonRpcResponse::success(id, result))
        }

        async fn notify(&self, request: JsonRpcRequest) -> Result<()> {
            self.methods.lock().unwrap().push(request.method);
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn handshake_then_discovery() {
        let server = Arc::new(ScriptedServer::new(vec![json!({
            "name": "read_file",
            "inputSchema": {"type": "object"}
        })]));
        let client = McpClient::connect(server.clone(), "fs").await.unwrap();
        assert!(client.has_tools());
        assert!(!client.has_prompts());

        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools[0].name, "read_file");

        let result = client.call_tool("read_file", Value::Null).await.unwrap();
        assert_eq!(result.text(), "called read_file");

        assert_eq!(
            *server.methods.lock().unwrap(),
            vec!["initialize", "notifications/initialized", "tools/list", "tools/call"]
        );
    }
}
