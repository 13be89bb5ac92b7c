//! TOML-file-based MemoryRepository implementation.
//!
//! One TOML file per record under a base directory:
//!
//! ```text
//! base_dir/
//! ├── <memory-id-1>.toml
//! └── <memory-id-2>.toml
//! ```
//!
//! Writes go through a temp file and an atomic rename, so a crash mid-save
//! leaves either the old record or the new one, never a torn file.
//! Corrupt records are skipped with a warning instead of poisoning the
//! whole listing.

use anyhow::{Context, Result};
use async_trait::async_trait;
use murmur_core::memory::{Memory, MemoryRepository};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Directory-per-store TOML repository for memory records.
pub struct TomlMemoryRepository {
    base_dir: PathBuf,
}

impl TomlMemoryRepository {
    /// Creates a repository rooted at `base_dir`, creating the directory
    /// if needed.
    pub async fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir)
            .await
            .context("Failed to create memory store directory")?;
        Ok(Self { base_dir })
    }

    /// Creates a repository at the default location
    /// (`<config dir>/murmur/memories`).
    pub async fn default_location() -> Result<Self> {
        let base_dir = dirs::config_dir()
            .context("Failed to determine the user config directory")?
            .join("murmur")
            .join("memories");
        Self::new(base_dir).await
    }

    /// Returns the directory records are stored in.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn record_path(&self, memory_id: &str) -> PathBuf {
        self.base_dir.join(format!("{memory_id}.toml"))
    }

    async fn write_atomic(&self, path: &Path, contents: &str) -> Result<()> {
        let tmp_path = path.with_extension("toml.tmp");
        {
            let mut file = fs::File::create(&tmp_path)
                .await
                .context("Failed to create temp file")?;
            file.write_all(contents.as_bytes())
                .await
                .context("Failed to write record")?;
            file.sync_all().await.context("Failed to sync record")?;
        }
        fs::rename(&tmp_path, path)
            .await
            .context("Failed to move record into place")?;
        Ok(())
    }
}

#[async_trait]
impl MemoryRepository for TomlMemoryRepository {
    async fn get_all(&self) -> Result<Vec<Memory>> {
        let mut entries = fs::read_dir(&self.base_dir)
            .await
            .context("Failed to read memory store directory")?;

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .context("Failed to read directory entry")?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let contents = match fs::read_to_string(&path).await {
                Ok(contents) => contents,
                Err(err) => {
                    tracing::warn!(target: "memory_store", "unreadable record {path:?}: {err}");
                    continue;
                }
            };
            match toml::from_str::<Memory>(&contents) {
                Ok(memory) => records.push(memory),
                Err(err) => {
                    tracing::warn!(target: "memory_store", "corrupt record {path:?}: {err}");
                }
            }
        }
        Ok(records)
    }

    async fn put(&self, memory: &Memory) -> Result<()> {
        let contents =
            toml::to_string_pretty(memory).context("Failed to serialize memory record")?;
        self.write_atomic(&self.record_path(&memory.memory_id), &contents)
            .await
    }

    async fn delete(&self, memory_id: &str) -> Result<()> {
        match fs::remove_file(self.record_path(memory_id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).context("Failed to delete record"),
        }
    }

    async fn clear(&self) -> Result<()> {
        let mut entries = fs::read_dir(&self.base_dir)
            .await
            .context("Failed to read memory store directory")?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .context("Failed to read directory entry")?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("toml") {
                fs::remove_file(&path)
                    .await
                    .context("Failed to delete record")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_core::conversation::{ChatMessage, MessageRole};

    fn sample(session_id: &str) -> Memory {
        Memory::new(
            session_id,
            vec![
                ChatMessage::user("hello", Some("blob:preview".to_string())),
                ChatMessage::new(MessageRole::Assistant, "hi there"),
            ],
        )
    }

    #[tokio::test]
    async fn round_trips_records_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let repo = TomlMemoryRepository::new(dir.path()).await.unwrap();

        let record = sample("main");
        repo.put(&record).await.unwrap();

        let loaded = repo.get_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0], record);
    }

    #[tokio::test]
    async fn put_replaces_existing_record_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let repo = TomlMemoryRepository::new(dir.path()).await.unwrap();

        let mut record = sample("main");
        repo.put(&record).await.unwrap();
        record.name = "Renamed".to_string();
        record.is_pinned = true;
        repo.put(&record).await.unwrap();

        let loaded = repo.get_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "Renamed");
        assert!(loaded[0].is_pinned);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let repo = TomlMemoryRepository::new(dir.path()).await.unwrap();

        let record = sample("main");
        repo.put(&record).await.unwrap();
        repo.delete(&record.memory_id).await.unwrap();
        repo.delete(&record.memory_id).await.unwrap();

        assert!(repo.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_removes_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let repo = TomlMemoryRepository::new(dir.path()).await.unwrap();

        repo.put(&sample("main")).await.unwrap();
        repo.put(&sample("helper")).await.unwrap();
        repo.clear().await.unwrap();

        assert!(repo.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_records_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let repo = TomlMemoryRepository::new(dir.path()).await.unwrap();

        repo.put(&sample("main")).await.unwrap();
        tokio::fs::write(dir.path().join("broken.toml"), "this is { not toml")
            .await
            .unwrap();

        let loaded = repo.get_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
    }
}
