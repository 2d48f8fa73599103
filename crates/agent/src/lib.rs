//! The ReAct agent loop: Thinking → Action → Observation.
//!
//! 1. **Prompt**: system prompt for the current mode, the memory window and
//!    an environment snapshot
//! 2. **Think**: the model answers with one `{thinking, tool, params}` call
//! 3. **Act**: the dispatcher runs a built-in, a registry tool, a sub-agent
//!    or an MCP tool
//! 4. **Observe**: the result goes back as the next user message
//!
//! The loop continues until a tool pauses or finishes the run, the model
//! can not be reached, or the user stops it.

pub mod builtin;
pub mod dispatcher;
pub mod llm;
pub mod loop_guard;
pub mod naming;
pub mod prompt;
pub mod react;
pub mod settings;
pub mod stream_event;
pub mod subagent;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use builtin::{Builtin, BuiltinContext};
pub use dispatcher::{Dispatched, Dispatcher};
pub use llm::{ChatOutcome, ChatRequest, LlmClient, build_messages};
pub use loop_guard::LoopGuard;
pub use react::{ReactAgent, ReactOutcome};
pub use settings::{AgentSettings, PromptArgs};
pub use stream_event::{AgentStreamEvent, EventSink, option_labels};
pub use subagent::{SubAgentServices, SubAgentTool, build_registry, root_registry};
