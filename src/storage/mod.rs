//! Profile storage, JSON snapshots under the profile directory
//!
//! Layout: `<data_dir>/memory.json` holds both memory partitions;
//! `<data_dir>/conversations/<name>.json` holds one transcript per saved
//! conversation. Writes go through a temp file and rename, so a crash cannot
//! leave a half-written snapshot. Missing files load as empty; corrupt files
//! load as empty with a warning rather than refusing to start.

use crate::error::Result;
use crate::memory::{MemoryPersistence, MemorySnapshot};
use crate::session::Transcript;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// File-backed storage for one user profile
pub struct ProfileStorage {
    data_dir: PathBuf,
}

impl ProfileStorage {
    /// Open (creating if needed) the profile directory
    pub async fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        tokio::fs::create_dir_all(data_dir.join("conversations")).await?;
        Ok(Self { data_dir })
    }

    fn memory_path(&self) -> PathBuf {
        self.data_dir.join("memory.json")
    }

    fn transcript_path(&self, name: &str) -> PathBuf {
        self.data_dir
            .join("conversations")
            .join(format!("{}.json", sanitize_name(name)))
    }

    /// Load the memory snapshot, or an empty one when absent/corrupt
    pub async fn load_memory(&self) -> MemorySnapshot {
        load_json(&self.memory_path()).await.unwrap_or_default()
    }

    /// Persist the memory snapshot atomically
    pub async fn save_memory(&self, snapshot: &MemorySnapshot) -> Result<()> {
        write_json(&self.memory_path(), snapshot).await
    }

    /// Load a conversation transcript by name
    pub async fn load_transcript(&self, name: &str) -> Option<Transcript> {
        load_json(&self.transcript_path(name)).await
    }

    /// Persist a conversation transcript atomically
    pub async fn save_transcript(&self, transcript: &Transcript) -> Result<()> {
        write_json(&self.transcript_path(&transcript.name), transcript).await
    }

    /// Delete a conversation transcript; deleting a missing one is not an error
    pub async fn delete_transcript(&self, name: &str) -> Result<bool> {
        match tokio::fs::remove_file(self.transcript_path(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// List saved conversations, most recently active first
    pub async fn list_transcripts(&self) -> Result<Vec<Transcript>> {
        let dir = self.data_dir.join("conversations");
        let mut transcripts = Vec::new();

        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(transcript) = load_json::<Transcript>(&path).await {
                transcripts.push(transcript);
            }
        }

        transcripts.sort_by(|a, b| {
            b.last_activity
                .cmp(&a.last_activity)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(transcripts)
    }
}

#[async_trait]
impl MemoryPersistence for ProfileStorage {
    async fn save(&self, snapshot: &MemorySnapshot) -> Result<()> {
        self.save_memory(snapshot).await
    }
}

/// Read and parse a JSON file; missing or corrupt files yield None
async fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!("Could not read {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Invalid JSON in {}: {}; treating as empty", path.display(), e);
            None
        }
    }
}

/// Serialize to a temp file and rename over the target
async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json.as_bytes()).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Keep conversation names filesystem-safe
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Category, MemoryEntryBuilder, MemoryKind, MemoryStore};
    use chrono::{Duration, Utc};

    async fn temp_storage() -> (tempfile::TempDir, ProfileStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = ProfileStorage::open(dir.path()).await.unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn test_memory_round_trip() {
        let (_dir, storage) = temp_storage().await;
        let now = Utc::now();

        let store = MemoryStore::new();
        store
            .insert(
                MemoryEntryBuilder::new(MemoryKind::Permanent)
                    .content("prefers dark mode")
                    .category(Category::Preference)
                    .build()
                    .unwrap(),
            )
            .await
            .unwrap();
        store
            .insert(
                MemoryEntryBuilder::new(MemoryKind::TimeBased)
                    .content("call mom")
                    .category(Category::Reminder)
                    .expires_at(now + Duration::hours(7) + Duration::milliseconds(123))
                    .build()
                    .unwrap(),
            )
            .await
            .unwrap();

        let saved = store.snapshot().await;
        storage.save_memory(&saved).await.unwrap();
        let loaded = storage.load_memory().await;

        assert_eq!(loaded.permanent.len(), 1);
        assert_eq!(loaded.time_based.len(), 1);
        assert_eq!(loaded.permanent[0].id, saved.permanent[0].id);
        assert_eq!(loaded.permanent[0].content, "prefers dark mode");
        // Expiry precision survives exactly
        assert_eq!(loaded.time_based[0].expires_at, saved.time_based[0].expires_at);
        assert_eq!(loaded.time_based[0].created_at, saved.time_based[0].created_at);
    }

    #[tokio::test]
    async fn test_missing_memory_loads_empty() {
        let (_dir, storage) = temp_storage().await;
        let snapshot = storage.load_memory().await;
        assert!(snapshot.permanent.is_empty());
        assert!(snapshot.time_based.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_memory_loads_empty() {
        let (_dir, storage) = temp_storage().await;
        tokio::fs::write(storage.memory_path(), b"{ not json")
            .await
            .unwrap();
        let snapshot = storage.load_memory().await;
        assert!(snapshot.permanent.is_empty());
    }

    #[tokio::test]
    async fn test_transcript_save_load_delete() {
        let (_dir, storage) = temp_storage().await;

        let mut transcript = Transcript::new("trip-planning");
        transcript.push_turn("where should I go?", "somewhere warm");
        storage.save_transcript(&transcript).await.unwrap();

        let loaded = storage.load_transcript("trip-planning").await.unwrap();
        assert_eq!(loaded.name, "trip-planning");
        assert_eq!(loaded.turns.len(), 1);
        assert_eq!(loaded.turns[0].user, "where should I go?");

        assert!(storage.delete_transcript("trip-planning").await.unwrap());
        assert!(storage.load_transcript("trip-planning").await.is_none());
        assert!(!storage.delete_transcript("trip-planning").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_sorted_by_activity() {
        let (_dir, storage) = temp_storage().await;

        let mut older = Transcript::new("older");
        older.last_activity = Utc::now() - Duration::hours(2);
        let mut newer = Transcript::new("newer");
        newer.last_activity = Utc::now();

        storage.save_transcript(&older).await.unwrap();
        storage.save_transcript(&newer).await.unwrap();

        let listed = storage.list_transcripts().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "newer");
        assert_eq!(listed[1].name, "older");
    }

    #[tokio::test]
    async fn test_name_sanitized() {
        let (_dir, storage) = temp_storage().await;
        let transcript = Transcript::new("../evil name");
        storage.save_transcript(&transcript).await.unwrap();

        // Loaded back under the same (sanitized) name key
        assert!(storage.load_transcript("../evil name").await.is_some());
        let path = storage.transcript_path("../evil name");
        assert!(!path.to_string_lossy().contains(".."));
    }
}
