//! Persisted conversation records.
//!
//! A `Memory` is a durable snapshot of a session's message list, created on
//! the first completed assistant turn of a session and updated in place on
//! every turn thereafter. Records are named asynchronously by a background
//! title-generation call.

use crate::conversation::message::ChatMessage;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Fallback display name for a record whose title has not been generated yet.
pub const UNNAMED_MEMORY: &str = "New conversation";

/// A persisted snapshot of a session's conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// Unique record identifier (UUID format)
    pub memory_id: String,
    /// Session this record belongs to ("main" or an assistant ID)
    pub session_id: String,
    /// Last save instant, epoch milliseconds
    pub timestamp: i64,
    /// Display name, generated in the background
    pub name: String,
    /// Whether the user pinned this record
    #[serde(default)]
    pub is_pinned: bool,
    /// The message list at last save
    pub messages: Vec<ChatMessage>,
}

impl Memory {
    /// Creates a fresh, unnamed record for a session snapshot.
    pub fn new(session_id: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            memory_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            name: UNNAMED_MEMORY.to_string(),
            is_pinned: false,
            messages,
        }
    }
}

/// An abstract repository for durable memory records.
///
/// This is the whole contract the conversation core has with local
/// persistence: a key-value store of records keyed by `memory_id`.
/// Implementations decide the storage format and location.
#[async_trait]
pub trait MemoryRepository: Send + Sync {
    /// Returns all stored records.
    async fn get_all(&self) -> Result<Vec<Memory>>;

    /// Inserts or replaces a record.
    async fn put(&self, memory: &Memory) -> Result<()>;

    /// Deletes a record. Deleting a missing record is not an error.
    async fn delete(&self, memory_id: &str) -> Result<()>;

    /// Deletes every stored record.
    async fn clear(&self) -> Result<()>;
}

/// A no-op repository for callers that do not persist anything.
pub struct NoOpMemoryRepository;

#[async_trait]
impl MemoryRepository for NoOpMemoryRepository {
    async fn get_all(&self) -> Result<Vec<Memory>> {
        Ok(vec![])
    }

    async fn put(&self, _memory: &Memory) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _memory_id: &str) -> Result<()> {
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        Ok(())
    }
}
