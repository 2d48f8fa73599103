//! # reagent core
//!
//! Domain types, traits, and error definitions for the reagent ReAct runtime.
//! This crate has no framework dependencies: it defines the chat model, the
//! tool and provider seams, and the events every other crate builds against.
//!
//! ## Layout
//!
//! - [`chat`] and [`message`]: the persisted unit (a Chat plus its transcript)
//! - [`observation`]: the `{thinking, tool, params}` request and the observation fed back
//! - [`tool`] and [`provider`]: the two external seams (tool providers, LLM endpoints)
//! - [`store`]: the persistence sink
//! - [`stop`]: cooperative cancellation shared by an agent and its sub-agents

pub mod error;
pub mod message;
pub mod chat;
pub mod observation;
pub mod provider;
pub mod tool;
pub mod store;
pub mod agent;
pub mod event;
pub mod stop;

// Re-export key types at crate root for ergonomics
pub use error::{MemoryError, ProviderError, ToolError};
pub use message::{Message, PromptMessage, Role};
pub use chat::{Chat, ChatVars, Subtask, SubtaskStatus, Task};
pub use observation::{Observation, ToolCallRequest};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk};
pub use tool::{Tool, ToolRegistry, ToolResult};
pub use store::ChatStore;
pub use agent::{AgentMode, AgentState};
pub use event::{DomainEvent, EventBus};
pub use stop::StopFlag;
