//! Chat: the unit of persistence.
//!
//! A chat is created per conversation, mutated by every step, and stored next
//! to its transcript. Its `vars` hold the todo ledger the `add_subtasks` and
//! `complete_subtasks` tools maintain.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::AgentMode;

/// Chat metadata persisted in the history index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    /// `chat-<uuid>`
    pub id: String,

    /// Display name (generated after the first step)
    #[serde(default)]
    pub name: Option<String>,

    /// System prompt of the last chain run, if any
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Highest query index used so far
    #[serde(default)]
    pub max_index: u64,

    /// Operating mode key (`auto`, `act`, `plan`, `flash`)
    #[serde(default)]
    pub mode: AgentMode,

    /// Tokens consumed
    #[serde(default)]
    pub tokens: u64,

    /// Wall-clock seconds spent
    #[serde(default)]
    pub seconds: u64,

    /// User-provided environment entries rendered into the environment message
    #[serde(default)]
    pub envs: BTreeMap<String, String>,

    /// Todo ledger and counters
    #[serde(default)]
    pub vars: ChatVars,
}

impl Chat {
    /// Create a fresh chat with a new id.
    pub fn new() -> Self {
        Self {
            id: format!("chat-{}", Uuid::new_v4()),
            name: None,
            system_prompt: None,
            max_index: 0,
            mode: AgentMode::default(),
            tokens: 0,
            seconds: 0,
            envs: BTreeMap::new(),
            vars: ChatVars::default(),
        }
    }

    /// Environment entries as `- key: value` lines.
    pub fn render_envs(&self) -> String {
        self.envs
            .iter()
            .map(|(key, value)| format!("- {key}: {value}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The todo ledger as rendered in the environment message.
    pub fn render_todolist(&self) -> String {
        self.vars
            .tasks
            .iter()
            .map(|(task_id, task)| {
                let subtasks = task
                    .subtasks
                    .iter()
                    .map(|s| {
                        format!(
                            "  - subtask id: {}, description: {}, status: {}",
                            s.id, s.description, s.status
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                format!("- {task_id}: {}:\n{subtasks}", task.task)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for Chat {
    fn default() -> Self {
        Self::new()
    }
}

/// Mutable per-chat variables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatVars {
    #[serde(default)]
    pub task_id: u64,

    /// Tasks keyed by [`task_key`]
    #[serde(default)]
    pub tasks: BTreeMap<String, Task>,

    /// Next subtask id
    #[serde(default)]
    pub subtask_id: u64,
}

/// A user-visible task broken into subtasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task: String,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: u64,
    pub description: String,
    pub status: SubtaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflection: Option<String>,
}

/// Subtask status: `"pending"` on creation, then whatever the model reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubtaskStatus {
    Done(bool),
    Label(String),
}

impl SubtaskStatus {
    pub fn pending() -> Self {
        SubtaskStatus::Label("pending".into())
    }
}

impl fmt::Display for SubtaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubtaskStatus::Done(done) => write!(f, "{done}"),
            SubtaskStatus::Label(label) => f.write_str(label),
        }
    }
}

/// Stable key for a task description.
///
/// 32-bit string hash over UTF-16 code units (`h = h * 31 + c`, wrapping),
/// rendered as the lowercase hex of its absolute value.
pub fn task_key(task: &str) -> String {
    let hash = task
        .encode_utf16()
        .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(i32::from(c)));
    format!("{:x}", i64::from(hash).abs())
}
