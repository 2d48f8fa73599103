//! The tool-call contract between the model and the dispatcher.
//!
//! The model answers every step with a `{thinking, tool, params}` object; the
//! dispatcher answers with an [`Observation`] that is fed back as the next
//! user-role message.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Text of the observation returned when the user cancels a run.
pub const INTERRUPTED: &str = "The user interrupted the task.";

/// A tool call emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    #[serde(default)]
    pub thinking: String,
    pub tool: String,
    #[serde(default)]
    pub params: Value,
}

impl ToolCallRequest {
    /// Parse the model's (already extracted) JSON text.
    ///
    /// `tool` must be a non-empty string; a missing `thinking` reads as empty.
    pub fn parse(text: &str) -> Result<Self, String> {
        let value: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
        let field = |name: &str| {
            value
                .get(name)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let tool = field("tool").ok_or_else(|| "missing \"tool\" field".to_string())?;
        let thinking = field("thinking").unwrap_or_default();
        let params = value.get("params").cloned().unwrap_or(Value::Null);
        Ok(Self {
            thinking,
            tool,
            params,
        })
    }
}

/// The structured result of one dispatch, as seen by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub tool_call: String,
    pub observation: Value,
    pub error: String,
}

impl Observation {
    /// The model's reply could not be read as a tool call.
    pub fn parse_failure(reason: &str) -> Self {
        Self {
            tool_call: String::new(),
            observation: Value::String("Tool was not executed.".into()),
            error: format!(
                "Your response is not a pure JSON text, or there is a problem with the JSON format: {reason}"
            ),
        }
    }

    pub fn unknown_tool(tool: &str) -> Self {
        Self {
            tool_call: tool.to_string(),
            observation: Value::String("Tool was not executed.".into()),
            error: "Tool does not exist.".into(),
        }
    }

    pub fn success(tool: &str, output: Value) -> Self {
        Self {
            tool_call: tool.to_string(),
            observation: output,
            error: String::new(),
        }
    }

    /// The tool ran and raised an error.
    pub fn failure(tool: &str, message: impl Into<String>) -> Self {
        Self {
            tool_call: tool.to_string(),
            observation: Value::String("Tool has been executed.".into()),
            error: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }

    pub fn to_value(&self) -> Value {
        json!({
            "tool_call": self.tool_call,
            "observation": self.observation,
            "error": self.error,
        })
    }
}

/// Options offered when the thinking-loop threshold trips.
pub const LOOP_OPTIONS: [&str; 2] = ["End Task", "Try New Approach"];

/// The payload that replaces an observation once the model is stuck.
pub fn loop_warning(repetitions: usize) -> Value {
    json!({
        "warning": format!(
            "You have been stuck in a thinking loop {repetitions} times. Try a new approach to break through, or end it directly."
        ),
        "options": LOOP_OPTIONS,
    })
}

/// Two-space indented JSON, the form observations take in the transcript.
pub fn to_pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_requires_tool() {
        let ok = ToolCallRequest::parse(
            r#"{"thinking":"look around","tool":"list","params":{"path":"/tmp"}}"#,
        )
        .unwrap();
        assert_eq!(ok.tool, "list");
        assert_eq!(ok.params["path"], "/tmp");

        let bare = ToolCallRequest::parse(r#"{"tool":"list"}"#).unwrap();
        assert_eq!(bare.thinking, "");
        assert!(ToolCallRequest::parse(r#"{"thinking":"x"}"#).is_err());
        assert!(ToolCallRequest::parse(r#"{"thinking":"x","tool":""}"#).is_err());
        assert!(ToolCallRequest::parse("not json").is_err());
    }

    #[test]
    fn missing_params_become_null() {
        let req = ToolCallRequest::parse(r#"{"thinking":"t","tool":"enter_idle_state"}"#).unwrap();
        assert!(req.params.is_null());
    }

    #[test]
    fn unknown_tool_observation() {
        let obs = Observation::unknown_tool("frobnicate");
        assert_eq!(
            obs.to_value(),
            json!({
                "tool_call": "frobnicate",
                "observation": "Tool was not executed.",
                "error": "Tool does not exist."
            })
        );
        assert!(obs.is_error());
    }

    #[test]
    fn pretty_json_uses_two_spaces() {
        let text = to_pretty_json(&Observation::success("t", json!("ok")).to_value());
        assert!(text.starts_with("{\n  \"tool_call\": \"t\""));
    }

    #[test]
    fn loop_warning_names_count() {
        let warning = loop_warning(3);
        assert!(
            warning["warning"]
                .as_str()
                .unwrap()
                .contains("stuck in a thinking loop 3 times")
        );
        assert_eq!(warning["options"], json!(["End Task", "Try New Approach"]));
    }
}
