//! Tool trait: the abstraction over external capabilities.
//!
//! Tools are opaque to the agent: a name, a usage text injected verbatim into
//! the system prompt, and an async `execute` that returns a JSON result or an
//! error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ToolError;

/// The result of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool reports success
    pub success: bool,

    /// Output handed back to the model as the observation
    pub output: serde_json::Value,
}

impl ToolResult {
    pub fn json(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
        }
    }

    pub fn text(output: impl Into<String>) -> Self {
        Self::json(serde_json::Value::String(output.into()))
    }
}

/// The core Tool trait.
///
/// Each external tool implements this trait. Tools are registered once in a
/// [`ToolRegistry`] and are immutable afterwards.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// A description of what this tool does.
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    /// Usage text injected into the system prompt.
    fn prompt(&self) -> String {
        let params = serde_json::to_string_pretty(&self.parameters_schema()).unwrap_or_default();
        format!(
            "## {}\n\nDescription: {}\n\nParameters:\n{}",
            self.name(),
            self.description(),
            params
        )
    }

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: serde_json::Value) -> std::result::Result<ToolResult, ToolError>;
}

/// A registry of available tools, in registration order.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Names are unique.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> std::result::Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            return Err(ToolError::DuplicateName(name));
        }
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&i| Arc::clone(&self.tools[i]))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Usage texts of every tool, in registration order.
    pub fn prompts(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.prompt()).collect()
    }

    /// A registry holding only the named tools; unknown names are skipped.
    pub fn subset(&self, names: &[String]) -> Self {
        let mut registry = Self::new();
        for tool in &self.tools {
            if names.iter().any(|n| n == tool.name()) {
                // Names are already unique here.
                let _ = registry.register(Arc::clone(tool));
            }
        }
        registry
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
