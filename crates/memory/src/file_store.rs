//! File-based chat store: a JSON index plus one transcript file per chat.
//!
//! Layout under the history directory:
//!
//! - `history.json`: `{"data": [Chat, ...]}`, upserted by chat id
//! - `history/<chat id>.json`: the pretty-printed message array
//!
//! Every mutation rewrites the affected files; a mutex serializes index
//! read-modify-write cycles between concurrent agents.

use async_trait::async_trait;
use reagent_core::chat::Chat;
use reagent_core::error::MemoryError;
use reagent_core::message::Message;
use reagent_core::store::ChatStore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::transcript::Transcript;

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryIndex {
    #[serde(default)]
    data: Vec<Chat>,
}

pub struct FileChatStore {
    root: PathBuf,
    lock: Mutex<()>,
}

impl FileChatStore {
    /// Create a store rooted at `root`. Nothing is touched until the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("history.json")
    }

    fn transcript_path(&self, id: &str) -> PathBuf {
        self.root.join("history").join(format!("{id}.json"))
    }

    fn read_index(&self) -> Result<HistoryIndex, MemoryError> {
        let path = self.index_path();
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HistoryIndex::default()),
            Err(e) => return Err(MemoryError::Storage(format!("Failed to read history index: {e}"))),
        };
        if content.trim().is_empty() {
            return Ok(HistoryIndex::default());
        }
        serde_json::from_str(&content).map_err(|e| MemoryError::Corrupted {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    fn write_index(&self, index: &HistoryIndex) -> Result<(), MemoryError> {
        let content = serde_json::to_string_pretty(index)
            .map_err(|e| MemoryError::Storage(format!("Failed to serialize history index: {e}")))?;
        write_file(&self.index_path(), &content)
    }
}

fn write_file(path: &Path, content: &str) -> Result<(), MemoryError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| MemoryError::Storage(format!("Failed to create history directory: {e}")))?;
    }
    std::fs::write(path, content)
        .map_err(|e| MemoryError::Storage(format!("Failed to write {}: {e}", path.display())))
}

#[async_trait]
impl ChatStore for FileChatStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn save(&self, chat: &Chat, messages: &[Message]) -> Result<(), MemoryError> {
        let _guard = self.lock.lock().await;

        let mut index = self.read_index()?;
        match index.data.iter_mut().find(|c| c.id == chat.id) {
            Some(existing) => *existing = chat.clone(),
            None => index.data.push(chat.clone()),
        }
        self.write_index(&index)?;

        let mut transcript = Transcript::from_messages(messages.to_vec());
        transcript.backfill_memory_ids();
        let content = serde_json::to_string_pretty(transcript.messages())
            .map_err(|e| MemoryError::Storage(format!("Failed to serialize transcript: {e}")))?;
        write_file(&self.transcript_path(&chat.id), &content)?;

        debug!(chat_id = %chat.id, messages = messages.len(), "Chat saved");
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<(Chat, Vec<Message>), MemoryError> {
        let _guard = self.lock.lock().await;

        let chat = self
            .read_index()?
            .data
            .into_iter()
            .find(|c| c.id == id)
            .ok_or_else(|| MemoryError::ChatNotFound(id.to_string()))?;

        let path = self.transcript_path(id);
        let messages = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).map_err(|e| MemoryError::Corrupted {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(chat_id = %id, "Transcript file missing, starting empty");
                Vec::new()
            }
            Err(e) => return Err(MemoryError::Storage(format!("Failed to read transcript: {e}"))),
        };

        Ok((chat, messages))
    }

    async fn list(&self) -> Result<Vec<Chat>, MemoryError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_index()?.data)
    }

    async fn delete(&self, id: &str) -> Result<bool, MemoryError> {
        let _guard = self.lock.lock().await;

        let mut index = self.read_index()?;
        let len_before = index.data.len();
        index.data.retain(|c| c.id != id);
        let deleted = index.data.len() < len_before;
        if deleted {
            self.write_index(&index)?;
        }

        match std::fs::remove_file(self.transcript_path(id)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(MemoryError::Storage(format!("Failed to remove transcript: {e}"))),
        }

        Ok(deleted)
    }

    async fn rename(&self, id: &str, name: &str) -> Result<(), MemoryError> {
        let _guard = self.lock.lock().await;

        let mut index = self.read_index()?;
        let chat = index
            .data
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| MemoryError::ChatNotFound(id.to_string()))?;
        chat.name = Some(name.to_string());
        self.write_index(&index)
    }
}
