//! Filesystem-based checkpoint storage implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::store::{CheckpointID, CheckpointStore, StoredCheckpoint};

/// Filesystem implementation of CheckpointStore trait.
///
/// Stores one `checkpoint_{job_id}.json` file per job. Writes go to a
/// temporary sibling first and are renamed into place, so a crash never
/// leaves a truncated checkpoint behind.
pub struct FilesystemStore {
    dir: PathBuf,
}

impl FilesystemStore {
    /// Create a new FilesystemStore with the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Get the directory path.
    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    /// Path of the checkpoint file for `job_id` inside `dir`.
    pub fn path_for(dir: &Path, job_id: &str) -> PathBuf {
        dir.join(format!("checkpoint_{job_id}.json"))
    }
}

#[async_trait]
impl CheckpointStore for FilesystemStore {
    async fn store_checkpoint(&self, id: &CheckpointID, checkpoint_data: String) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let stored = StoredCheckpoint::new(id, checkpoint_data);
        let path = Self::path_for(&self.dir, &id.job_id);
        let tmp = path.with_extension("json.tmp");

        tokio::fs::write(&tmp, serde_json::to_string_pretty(&stored)?).await?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;

        tracing::debug!("Stored checkpoint to {}", path.display());
        Ok(())
    }

    async fn read_checkpoint(&self, id: &CheckpointID) -> Result<Option<StoredCheckpoint>> {
        let path = Self::path_for(&self.dir, &id.job_id);
        if !tokio::fs::try_exists(&path).await? {
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&path).await?;
        let stored: StoredCheckpoint = serde_json::from_str(&content)
            .with_context(|| format!("Corrupt checkpoint file {}", path.display()))?;
        Ok(Some(stored))
    }
}
