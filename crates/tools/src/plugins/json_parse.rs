//! `json_parse`: parse the first `{...}` object in the input.

use async_trait::async_trait;
use reagent_core::error::ToolError;
use reagent_core::tool::{Tool, ToolResult};
use serde_json::Value;

pub struct JsonParsePlugin;

/// The shortest `{...}` span starting at the first `{`.
fn first_object(input: &str) -> Option<&str> {
    let start = input.find('{')?;
    let end = input[start..].find('}')? + start;
    Some(&input[start..=end])
}

#[async_trait]
impl Tool for JsonParsePlugin {
    fn name(&self) -> &str {
        "json_parse"
    }

    fn description(&self) -> &str {
        "Parse the first flat JSON object found in the input text."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "input": { "type": "string", "description": "Text containing a JSON object" }
            },
            "required": ["input"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        let input = arguments["input"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'input' argument".into()))?;

        match first_object(input) {
            Some(candidate) => {
                let parsed: Value = serde_json::from_str(candidate).map_err(|e| ToolError::ExecutionFailed {
                    tool_name: "json_parse".into(),
                    reason: e.to_string(),
                })?;
                Ok(ToolResult::json(parsed))
            }
            None => Ok(ToolResult {
                success: false,
                output: Value::Null,
            }),
        }
    }
}
