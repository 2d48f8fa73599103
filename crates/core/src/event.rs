//! Domain event system: decoupled notifications out of the agent.
//!
//! The agent, the MCP manager and the stores publish here; the CLI (or any
//! other front end) subscribes. The `Alert` variant is the alert sink for
//! failures that are reported but not fatal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

use crate::agent::AgentState;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A tool was dispatched
    ToolExecuted {
        chat_id: String,
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Agent state changed
    AgentStateChanged {
        chat_id: String,
        state: AgentState,
        timestamp: DateTime<Utc>,
    },

    /// A chat and its transcript were written to the store
    ChatPersisted {
        chat_id: String,
        messages: usize,
        timestamp: DateTime<Utc>,
    },

    ChatRenamed {
        chat_id: String,
        name: String,
        timestamp: DateTime<Utc>,
    },

    /// A non-fatal failure the user should see
    Alert {
        context: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    pub fn alert(context: impl Into<String>, message: impl Into<String>) -> Self {
        DomainEvent::Alert {
            context: context.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        if self.sender.send(Arc::new(event)).is_err() {
            trace!("Domain event published with no subscribers");
        }
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
