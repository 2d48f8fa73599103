//! No-op chat store: persists nothing. Sub-agents run with it.

use async_trait::async_trait;
use reagent_core::chat::Chat;
use reagent_core::error::MemoryError;
use reagent_core::message::Message;
use reagent_core::store::ChatStore;

/// A store that drops every write.
pub struct NoopChatStore;

#[async_trait]
impl ChatStore for NoopChatStore {
    fn name(&self) -> &str { "none" }

    async fn save(&self, _chat: &Chat, _messages: &[Message]) -> Result<(), MemoryError> {
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<(Chat, Vec<Message>), MemoryError> {
        Err(MemoryError::ChatNotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<Chat>, MemoryError> {
        Ok(Vec::new())
    }

    async fn delete(&self, _id: &str) -> Result<bool, MemoryError> {
        Ok(false)
    }

    async fn rename(&self, _id: &str, _name: &str) -> Result<(), MemoryError> {
        Ok(())
    }
}
