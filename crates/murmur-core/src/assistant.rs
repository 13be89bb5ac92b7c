//! Assistant profile domain model.
//!
//! Represents the configured AI assistants a user can converse with. Each
//! assistant carries its own system instructions and an optional model
//! override used when building provider requests.

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// A configured assistant identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantProfile {
    /// Unique identifier (UUID format)
    pub id: String,
    /// Display name of the assistant
    pub name: String,
    /// System instructions applied to every turn of this assistant's sessions
    pub instructions: String,
    /// Model override; falls back to the global default when absent
    #[serde(default)]
    pub model: Option<String>,
}

/// An abstract repository for assistant configurations.
///
/// Decouples the conversation core from where assistant profiles live
/// (settings file, embedded database, remote API).
#[async_trait::async_trait]
pub trait AssistantRepository: Send + Sync {
    /// Retrieves all assistant profiles.
    async fn get_all(&self) -> Result<Vec<AssistantProfile>>;

    /// Finds an assistant profile by its ID.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(profile))`: Assistant found
    /// - `Ok(None)`: No assistant with that ID
    /// - `Err(_)`: Error occurred during retrieval
    async fn find_by_id(&self, assistant_id: &str) -> Result<Option<AssistantProfile>>;
}
