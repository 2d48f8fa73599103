//! ChatStore trait: the persistence sink for chats and transcripts.
//!
//! Implementations: file (JSON index + one transcript per chat), in-memory
//! (for testing), none (no-op, used by sub-agents).

use async_trait::async_trait;

use crate::chat::Chat;
use crate::error::MemoryError;
use crate::message::Message;

#[async_trait]
pub trait ChatStore: Send + Sync {
    /// The backend name (e.g., "file", "in_memory", "none").
    fn name(&self) -> &str;

    /// Upsert a chat and replace its transcript.
    async fn save(&self, chat: &Chat, messages: &[Message]) -> std::result::Result<(), MemoryError>;

    /// Load a chat and its transcript.
    async fn load(&self, id: &str) -> std::result::Result<(Chat, Vec<Message>), MemoryError>;

    /// All chats in the index, in insertion order.
    async fn list(&self) -> std::result::Result<Vec<Chat>, MemoryError>;

    /// Remove a chat and its transcript. Returns whether it existed.
    async fn delete(&self, id: &str) -> std::result::Result<bool, MemoryError>;

    /// Rename a chat in the index.
    async fn rename(&self, id: &str, name: &str) -> std::result::Result<(), MemoryError>;
}
