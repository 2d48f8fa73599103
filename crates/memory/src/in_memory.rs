//! In-memory chat store: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use reagent_core::chat::Chat;
use reagent_core::error::MemoryError;
use reagent_core::message::Message;
use reagent_core::store::ChatStore;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::transcript::Transcript;

/// Chats and transcripts kept in insertion order.
#[derive(Default)]
pub struct InMemoryChatStore {
    chats: Arc<RwLock<Vec<(Chat, Vec<Message>)>>>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored chats.
    pub async fn count(&self) -> usize {
        self.chats.read().await.len()
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn save(&self, chat: &Chat, messages: &[Message]) -> Result<(), MemoryError> {
        let mut transcript = Transcript::from_messages(messages.to_vec());
        transcript.backfill_memory_ids();
        let record = (chat.clone(), transcript.into_messages());

        let mut chats = self.chats.write().await;
        match chats.iter_mut().find(|(c, _)| c.id == chat.id) {
            Some(existing) => *existing = record,
            None => chats.push(record),
        }
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<(Chat, Vec<Message>), MemoryError> {
        self.chats
            .read()
            .await
            .iter()
            .find(|(c, _)| c.id == id)
            .cloned()
            .ok_or_else(|| MemoryError::ChatNotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<Chat>, MemoryError> {
        Ok(self.chats.read().await.iter().map(|(c, _)| c.clone()).collect())
    }

    async fn delete(&self, id: &str) -> Result<bool, MemoryError> {
        let mut chats = self.chats.write().await;
        let len_before = chats.len();
        chats.retain(|(c, _)| c.id != id);
        Ok(chats.len() < len_before)
    }

    async fn rename(&self, id: &str, name: &str) -> Result<(), MemoryError> {
        let mut chats = self.chats.write().await;
        let (chat, _) = chats
            .iter_mut()
            .find(|(c, _)| c.id == id)
            .ok_or_else(|| MemoryError::ChatNotFound(id.to_string()))?;
        chat.name = Some(name.to_string());
        Ok(())
    }
}
