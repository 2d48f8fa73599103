//! Agent-level streaming events.
//!
//! `AgentStreamEvent` is what a front end renders while a run is in
//! progress. Events go out on a bounded channel with `try_send`, so a slow
//! consumer loses events instead of stalling the loop.
//!
//! - `chunk`: answer delta from the model
//! - `reasoning`: reasoning delta from the model
//! - `thinking`: the `thinking` field of one ReAct step
//! - `tool_result`: a tool was dispatched
//! - `options`: the agent paused and offers replies
//! - `final`: the run finished with an answer
//! - `error`: the model could not be reached
//! - `interrupted`: the user stopped the run

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    Chunk { id: u64, content: String },

    Reasoning { id: u64, content: String },

    Thinking {
        id: u64,
        memory_id: u64,
        content: String,
    },

    ToolResult {
        id: u64,
        memory_id: u64,
        tool: String,
        success: bool,
        output: Value,
    },

    /// The agent paused with a question and suggested replies
    Options {
        id: u64,
        question: String,
        options: Vec<String>,
    },

    Final { id: u64, content: String },

    Error { id: u64, message: String },

    Interrupted { id: u64 },
}

impl AgentStreamEvent {
    /// Return the event type as a string slice.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::Reasoning { .. } => "reasoning",
            Self::Thinking { .. } => "thinking",
            Self::ToolResult { .. } => "tool_result",
            Self::Options { .. } => "options",
            Self::Final { .. } => "final",
            Self::Error { .. } => "error",
            Self::Interrupted { .. } => "interrupted",
        }
    }
}

/// Optional sender half used by the agent and the chain pipeline.
#[derive(Debug, Clone, Default)]
pub struct EventSink(Option<mpsc::Sender<AgentStreamEvent>>);

impl EventSink {
    pub fn new(sender: mpsc::Sender<AgentStreamEvent>) -> Self {
        Self(Some(sender))
    }

    pub fn none() -> Self {
        Self(None)
    }

    /// Send without waiting; a full or closed channel drops the event.
    pub fn emit(&self, event: AgentStreamEvent) {
        if let Some(sender) = &self.0
            && let Err(e) = sender.try_send(event)
        {
            trace!(error = %e, "Stream event dropped");
        }
    }
}

/// Render an `options` value as display strings.
pub fn option_labels(options: &Value) -> Vec<String> {
    match options {
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Value::String(s) => vec![s.clone()],
        _ => Vec::new(),
    }
}
