use crate::error::StoreError;
use crate::types::{now_ms, Chat};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use uuid::Uuid;

const CHATS_KEY: &str = "chats";
pub const PLACEHOLDER_CHAT_NAME: &str = "New Chat";

/// Synchronous key-value boundary the chat collection is persisted through.
/// Mirrors the original client's browser storage: plain string values, one
/// key per collection.
pub trait KvBackend: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvBackend for MemoryBackend {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().expect("kv lock poisoned").get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .expect("kv lock poisoned")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().expect("kv lock poisoned").remove(key);
        Ok(())
    }
}

/// One file per key under a data directory.
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: PathBuf) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Platform data dir, e.g. `~/.local/share/hookchat` on Linux.
    pub fn default_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hookchat")
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KvBackend for FileBackend {
    fn get(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.path_for(key)).ok()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        std::fs::write(self.path_for(key), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

/// The persisted chat collection. Every write is a read-modify-write of the
/// whole collection under one key; last write wins. That is acceptable here
/// because at most one request per chat is in flight.
pub struct ChatStore {
    backend: Box<dyn KvBackend>,
}

impl ChatStore {
    pub fn new(backend: Box<dyn KvBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryBackend::new()))
    }

    pub fn backend(&self) -> &dyn KvBackend {
        self.backend.as_ref()
    }

    /// All chats, newest first. A missing or corrupt collection degrades to
    /// an empty one rather than failing reads.
    pub fn chats(&self) -> Vec<Chat> {
        let Some(raw) = self.backend.get(CHATS_KEY) else {
            return Vec::new();
        };
        match serde_json::from_str(&raw) {
            Ok(chats) => chats,
            Err(error) => {
                tracing::error!(%error, "stored chat collection is unreadable, starting empty");
                Vec::new()
            }
        }
    }

    pub fn chat(&self, chat_id: &str) -> Option<Chat> {
        self.chats().into_iter().find(|chat| chat.id == chat_id)
    }

    pub fn create_chat(&self, agent_id: &str) -> Result<Chat, StoreError> {
        let now = now_ms();
        let chat = Chat {
            id: Uuid::new_v4().to_string(),
            name: PLACEHOLDER_CHAT_NAME.to_string(),
            agent_id: agent_id.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        let mut chats = self.chats();
        chats.insert(0, chat.clone());
        self.save(&chats)?;
        Ok(chat)
    }

    /// Apply one mutation to a chat and persist the whole collection,
    /// bumping `updated_at` so it strictly increases across writes.
    pub fn update_chat(
        &self,
        chat_id: &str,
        mutate: impl FnOnce(&mut Chat),
    ) -> Result<(), StoreError> {
        let mut chats = self.chats();
        let Some(chat) = chats.iter_mut().find(|chat| chat.id == chat_id) else {
            tracing::warn!(chat_id, "update for unknown chat ignored");
            return Ok(());
        };

        mutate(chat);
        chat.updated_at = now_ms().max(chat.updated_at + 1);
        self.save(&chats)
    }

    pub fn delete_chat(&self, chat_id: &str) -> Result<(), StoreError> {
        let mut chats = self.chats();
        chats.retain(|chat| chat.id != chat_id);
        self.save(&chats)
    }

    fn save(&self, chats: &[Chat]) -> Result<(), StoreError> {
        let raw = serde_json::to_string(chats)?;
        self.backend.set(CHATS_KEY, &raw)
    }
}
