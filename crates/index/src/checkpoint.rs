use crate::error::CheckpointError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Durable record of which batches have been fully committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub completed_batch_ids: BTreeSet<String>,
    pub last_updated: DateTime<Utc>,
}

impl CheckpointState {
    pub fn new() -> Self {
        Self {
            completed_batch_ids: BTreeSet::new(),
            last_updated: Utc::now(),
        }
    }
}

impl Default for CheckpointState {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the checkpoint file. Passed explicitly to the writer; there is no
/// process-wide checkpoint.
#[derive(Debug)]
pub struct CheckpointManager {
    path: PathBuf,
    state: CheckpointState,
}

impl CheckpointManager {
    /// Load the last persisted state, or start empty if there is none.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let path = path.into();

        let state = match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| CheckpointError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CheckpointState::new(),
            Err(source) => return Err(CheckpointError::Read { path, source }),
        };

        info!(
            path = %path.display(),
            completed = state.completed_batch_ids.len(),
            "Loaded checkpoint"
        );

        Ok(Self { path, state })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &CheckpointState {
        &self.state
    }

    pub fn completed_count(&self) -> usize {
        self.state.completed_batch_ids.len()
    }

    pub fn is_complete(&self, batch_id: &str) -> bool {
        self.state.completed_batch_ids.contains(batch_id)
    }

    /// Mark a batch committed and persist before returning. On a failed write
    /// the in-memory state is rolled back so it never claims more than the
    /// file does.
    pub async fn record_batch_complete(&mut self, batch_id: &str) -> Result<(), CheckpointError> {
        if !self.state.completed_batch_ids.insert(batch_id.to_string()) {
            return Ok(());
        }
        let previous = self.state.last_updated;
        self.state.last_updated = Utc::now();

        if let Err(e) = self.persist().await {
            self.state.completed_batch_ids.remove(batch_id);
            self.state.last_updated = previous;
            return Err(e);
        }

        debug!(batch_id, "Checkpointed batch");
        Ok(())
    }

    /// Forget all progress and delete the file.
    pub async fn reset(&mut self) -> Result<(), CheckpointError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(CheckpointError::Write {
                    path: self.path.clone(),
                    source,
                });
            }
        }
        self.state = CheckpointState::new();
        info!(path = %self.path.display(), "Checkpoint reset");
        Ok(())
    }

    async fn persist(&self) -> Result<(), CheckpointError> {
        let bytes = serde_json::to_vec_pretty(&self.state).map_err(|e| CheckpointError::Write {
            path: self.path.clone(),
            source: std::io::Error::other(e),
        })?;
        write_atomic(&self.path, &bytes)
            .await
            .map_err(|source| CheckpointError::Write {
                path: self.path.clone(),
                source,
            })
    }
}

/// Write to `<path>.tmp`, sync, then rename over `path`, so a crash leaves
/// either the old file or the new one, never a torn write.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let manager = CheckpointManager::load(dir.path().join("checkpoint.json")).await.unwrap();
        assert_eq!(manager.completed_count(), 0);
    }

    #[tokio::test]
    async fn test_record_persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("checkpoint.json");

        let mut manager = CheckpointManager::load(&path).await.unwrap();
        manager.record_batch_complete("entities-00000-aa").await.unwrap();
        manager.record_batch_complete("entities-00001-bb").await.unwrap();
        assert!(manager.is_complete("entities-00000-aa"));
        assert!(!path.with_extension("json.tmp").exists());

        let reloaded = CheckpointManager::load(&path).await.unwrap();
        assert_eq!(reloaded.state(), manager.state());

        let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["completed_batch_ids"].as_array().unwrap().len(), 2);
        assert!(raw["last_updated"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkpoint.json");
        std::fs::write(&path, "{\"completed_batch_ids\": [").unwrap();

        let err = CheckpointManager::load(&path).await.unwrap_err();
        assert!(matches!(err, CheckpointError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_failed_persist_rolls_back_state() {
        let dir = TempDir::new().unwrap();
        // The checkpoint path is a directory, so the final rename fails.
        let path = dir.path().join("checkpoint.json");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), "x").unwrap();

        let mut manager = CheckpointManager {
            path: path.clone(),
            state: CheckpointState::new(),
        };
        let err = manager.record_batch_complete("entities-00000-aa").await.unwrap_err();

        assert!(matches!(err, CheckpointError::Write { .. }));
        assert!(!manager.is_complete("entities-00000-aa"));
    }

    #[tokio::test]
    async fn test_reset_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkpoint.json");
        let mut manager = CheckpointManager::load(&path).await.unwrap();
        manager.record_batch_complete("b1").await.unwrap();

        manager.reset().await.unwrap();

        assert!(!path.exists());
        assert_eq!(manager.completed_count(), 0);
    }
}
