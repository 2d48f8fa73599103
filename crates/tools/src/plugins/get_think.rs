//! `get_think`: the reasoning inside a leading `<think>...</think>` block.

use async_trait::async_trait;
use reagent_core::error::ToolError;
use reagent_core::tool::{Tool, ToolResult};
use serde_json::Value;

pub struct GetThinkPlugin;

fn leading_think(input: &str) -> Option<&str> {
    let body = input.strip_prefix("<think>")?;
    let end = body.find("</think>")?;
    Some(&body[..end])
}

#[async_trait]
impl Tool for GetThinkPlugin {
    fn name(&self) -> &str {
        "get_think"
    }

    fn description(&self) -> &str {
        "Return the reasoning text of a leading <think> block."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "input": { "type": "string", "description": "Model output starting with <think>" }
            },
            "required": ["input"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        let input = arguments["input"].as_str().unwrap_or_default();
        Ok(match leading_think(input) {
            Some(think) => ToolResult::text(think),
            None => ToolResult {
                success: false,
                output: Value::Null,
            },
        })
    }
}
