//! Transcript management and chat stores for reagent.

pub mod transcript;
pub mod noop;
pub mod in_memory;
pub mod file_store;

pub use transcript::{Thumb, Transcript, redact, to_prompt_messages};
pub use noop::NoopChatStore;
pub use in_memory::InMemoryChatStore;
pub use file_store::FileChatStore;
