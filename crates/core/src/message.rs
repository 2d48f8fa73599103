//! Transcript message types.
//!
//! A [`Message`] is one entry of a chat's append-only transcript. It carries
//! bookkeeping the LLM never sees (`id`, `memory_id`, visibility flags); a
//! [`PromptMessage`] is the stripped `{role, content}` pair actually sent to
//! the model.

use serde::{Deserialize, Serialize};

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user (also carries tool observations fed back to the model)
    User,
    /// The AI assistant
    Assistant,
    /// System instructions
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// A single transcript entry.
///
/// `id` advances once per user query; `memory_id` groups every message of one
/// reasoning round. Entries are soft-deleted through `del` and only physically
/// removed by an explicit hard delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Query index this message belongs to
    #[serde(default)]
    pub id: u64,

    /// Reasoning round this message belongs to
    #[serde(default)]
    pub memory_id: Option<u64>,

    /// Whether the message is shown when a chat is reopened
    #[serde(default = "default_true")]
    pub show: bool,

    /// Whether the message was produced inside the ReAct loop
    #[serde(default = "default_true")]
    pub react: bool,

    /// Soft-deletion marker
    #[serde(default, skip_serializing_if = "is_false")]
    pub del: bool,

    /// User rating: 1 up, 0 none, -1 down
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumb: Option<i8>,
}

fn default_true() -> bool {
    true
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Message {
    /// Create a new transcript entry with default flags.
    pub fn new(role: Role, content: impl Into<String>, id: u64, memory_id: Option<u64>) -> Self {
        Self {
            role,
            content: content.into(),
            id,
            memory_id,
            show: true,
            react: true,
            del: false,
            thumb: None,
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>, id: u64, memory_id: Option<u64>) -> Self {
        Self::new(Role::User, content, id, memory_id)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>, id: u64, memory_id: Option<u64>) -> Self {
        Self::new(Role::Assistant, content, id, memory_id)
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>, id: u64) -> Self {
        let mut message = Self::new(Role::System, content, id, None);
        message.react = false;
        message
    }

    /// Mark whether this message is part of the ReAct loop.
    pub fn with_react(mut self, react: bool) -> Self {
        self.react = react;
        self
    }

    /// Mark whether this message is shown when the chat is reopened.
    pub fn with_show(mut self, show: bool) -> Self {
        self.show = show;
        self
    }
}

/// The `{role, content}` pair sent to an LLM endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

impl From<&Message> for PromptMessage {
    fn from(message: &Message) -> Self {
        Self::new(message.role, message.content.clone())
    }
}
