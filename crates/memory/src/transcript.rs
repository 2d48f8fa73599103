//! The append-only message log of one chat.
//!
//! The transcript is owned by a single agent and mutated sequentially, so it
//! is a plain value rather than a shared store. Durable copies go through a
//! [`ChatStore`](reagent_core::ChatStore).
//!
//! Soft deletion (`del`) hides a message from every window; hard deletion
//! physically removes it.

use reagent_core::message::{Message, PromptMessage, Role};
use reagent_tools::{extract_json_value, is_truthy, parse_json_content};
use serde_json::{Value, json};

/// Marker written in place of redacted content.
pub const DELETED_MARKER: &str = "[User deleted this record]";

/// The shell tool whose failures are collapsed when tagging is on.
pub const SHELL_TOOL: &str = "cli_execute";

const THINKING_KEEP_CHARS: usize = 50;

/// Answer of [`Transcript::thumb`].
#[derive(Debug, Clone, PartialEq)]
pub enum Thumb {
    /// Current rating of the query (`thumb == 0` was a lookup)
    Current(i8),
    /// Messages that were re-rated
    Updated(Vec<Message>),
}

#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    tag_success: bool,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a loaded message array.
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            tag_success: false,
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Every message, deleted ones included.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.tag_success = false;
    }

    /// Messages not soft-deleted, in order.
    pub fn visible(&self) -> Vec<&Message> {
        self.messages.iter().filter(|m| !m.del).collect()
    }

    /// Messages shown when a chat is reopened.
    pub fn shown(&self) -> Vec<&Message> {
        self.messages.iter().filter(|m| m.show).collect()
    }

    /// Tag the outcome of the latest round.
    pub fn set_tag(&mut self, success: bool) {
        self.tag_success = success;
    }

    pub fn tag_success(&self) -> bool {
        self.tag_success
    }

    /// The last `n` visible messages, in order.
    ///
    /// While the success tag is set, failed shell observations are collapsed
    /// to a short marker. The log itself is left untouched.
    pub fn window(&self, n: usize) -> Vec<Message> {
        let visible = self.visible();
        let start = visible.len().saturating_sub(n);
        visible[start..]
            .iter()
            .map(|message| {
                if self.tag_success {
                    collapse_failed_shell(message)
                } else {
                    (*message).clone()
                }
            })
            .collect()
    }

    /// Redacted records older than the window, for the `{memory_list}` prompt slot.
    ///
    /// Empty until the visible log outgrows `memory_length`; then at most
    /// `long_memory_length` records ending where the window starts.
    pub fn long_memory(&self, memory_length: usize, long_memory_length: usize) -> Vec<Value> {
        let visible = self.visible();
        let len = visible.len();
        if len <= memory_length {
            return Vec::new();
        }
        let end = len - memory_length;
        let start = end.saturating_sub(long_memory_length);
        visible[start..end]
            .iter()
            .map(|message| {
                let redacted = redact(message, message.del);
                json!({
                    "role": redacted.role,
                    "content": redacted.content,
                    "memory_id": redacted.memory_id,
                })
            })
            .collect()
    }

    /// `{role, content}` of every message in a reasoning round.
    pub fn by_memory_id(&self, memory_id: u64) -> Vec<PromptMessage> {
        self.messages
            .iter()
            .filter(|m| m.memory_id == Some(memory_id))
            .map(PromptMessage::from)
            .collect()
    }

    /// Soft- or hard-delete every message of query `id`. Returns the new length.
    pub fn toggle_message(&mut self, id: u64, del: bool, hard: bool) -> usize {
        if hard {
            self.messages.retain(|m| m.id != id);
        } else {
            for message in self.messages.iter_mut().filter(|m| m.id == id) {
                message.del = del;
            }
        }
        self.messages.len()
    }

    /// Flip `del` on a reasoning round, or remove it. Returns the new length.
    pub fn toggle_memory(&mut self, memory_id: u64, hard: bool) -> usize {
        if hard {
            self.messages.retain(|m| m.memory_id != Some(memory_id));
        } else {
            for message in self
                .messages
                .iter_mut()
                .filter(|m| m.memory_id == Some(memory_id))
            {
                message.del = !message.del;
            }
        }
        self.messages.len()
    }

    /// Rate a query: 1 up, -1 down. `0` reads the current rating instead.
    pub fn thumb(&mut self, id: u64, thumb: i8) -> Thumb {
        if thumb == 0 {
            let current = self
                .messages
                .iter()
                .find(|m| m.id == id)
                .and_then(|m| m.thumb)
                .unwrap_or(0);
            return Thumb::Current(current);
        }
        let mut updated = Vec::new();
        for message in self.messages.iter_mut().filter(|m| m.id == id) {
            message.thumb = Some(thumb);
            updated.push(message.clone());
        }
        Thumb::Updated(updated)
    }

    /// Remove the last message, or every message matching `id` or `memory_id`.
    pub fn pop(&mut self, id: Option<u64>, memory_id: Option<u64>) -> Vec<Message> {
        if id.is_none() && memory_id.is_none() {
            return self.messages.pop().into_iter().collect();
        }
        let (removed, kept): (Vec<Message>, Vec<Message>) = std::mem::take(&mut self.messages)
            .into_iter()
            .partition(|m| {
                (id.is_some() && Some(m.id) == id) || (memory_id.is_some() && m.memory_id == memory_id)
            });
        self.messages = kept;
        removed
    }

    /// Give assistant messages without a round their query index.
    pub fn backfill_memory_ids(&mut self) {
        for message in &mut self.messages {
            if message.role == Role::Assistant && message.memory_id.is_none() {
                message.memory_id = Some(message.id);
            }
        }
    }

    /// Query index following the highest one in the log.
    pub fn next_id(&self) -> u64 {
        self.messages.iter().map(|m| m.id + 1).max().unwrap_or(0)
    }

    /// Round index following the highest one in the log.
    pub fn next_memory_id(&self) -> u64 {
        self.messages
            .iter()
            .filter_map(|m| m.memory_id)
            .map(|id| id + 1)
            .max()
            .unwrap_or(0)
    }

    /// First user message and the assistant's thinking, for chat naming.
    pub fn naming_context(&self) -> (Option<&str>, String) {
        let user = self
            .messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str());
        let thinking = self
            .messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .map(|m| {
                parse_json_content(&m.content)
                    .and_then(|v| v.get("thinking").and_then(Value::as_str).map(str::to_string))
                    .unwrap_or_default()
            })
            .collect::<Vec<_>>()
            .join("===");
        (user, thinking)
    }
}

/// Strip a transcript slice down to what the model sees.
///
/// Soft-deleted messages are redacted rather than dropped.
pub fn to_prompt_messages(messages: &[Message]) -> Vec<PromptMessage> {
    messages
        .iter()
        .map(|message| {
            if message.del {
                PromptMessage::from(&redact(message, false))
            } else {
                PromptMessage::from(message)
            }
        })
        .collect()
}

/// Keep only the thinking and tool name of a record.
///
/// User observations collapse to `Assistant called {tool} tool...`; assistant
/// calls lose their `params`, and with `truncate_thinking` their thinking is
/// cut after 50 characters. Content that is not JSON is returned unchanged.
pub fn redact(message: &Message, truncate_thinking: bool) -> Message {
    let mut copy = message.clone();
    let Some(mut parsed) = parse_json_content(&copy.content) else {
        return copy;
    };

    match copy.role {
        Role::User => {
            if parsed.get("observation").is_some_and(is_truthy) {
                let tool = parsed.get("tool_call").and_then(Value::as_str).unwrap_or_default();
                copy.content = format!("Assistant called {tool} tool...{DELETED_MARKER}");
            }
        }
        Role::Assistant => {
            if let Some(object) = parsed.as_object_mut() {
                object.insert("params".into(), Value::String(DELETED_MARKER.into()));
                if truncate_thinking
                    && let Some(Value::String(thinking)) = object.get_mut("thinking")
                    && thinking.chars().count() > THINKING_KEEP_CHARS
                {
                    let kept: String = thinking.chars().take(THINKING_KEEP_CHARS).collect();
                    *thinking = format!("{kept}…{DELETED_MARKER}");
                }
                copy.content = parsed.to_string();
            }
        }
        Role::System => {}
    }
    copy
}

/// Whether a shell observation reports success.
///
/// Reads `observation.success`, else the `success` field of JSON embedded in
/// the observation text, else assumes success.
pub fn observation_succeeded(observation: &Value) -> bool {
    if let Some(success) = observation.get("success") {
        return is_truthy(success);
    }
    observation
        .as_str()
        .and_then(extract_json_value)
        .and_then(|v| v.get("success").cloned())
        .map_or(true, |v| is_truthy(&v))
}

fn collapse_failed_shell(message: &Message) -> Message {
    let mut copy = message.clone();
    if copy.role != Role::User {
        return copy;
    }
    if let Some(parsed) = parse_json_content(&copy.content)
        && parsed.get("tool_call").and_then(Value::as_str) == Some(SHELL_TOOL)
        && !observation_succeeded(parsed.get("observation").unwrap_or(&Value::Null))
    {
        copy.content = format!("Assistant called {SHELL_TOOL} tool: Error occurred!");
    }
    copy
}
