//! Per-job checkpoint manager.

use std::sync::Arc;

use crate::{store::CheckpointStore, Checkpoint, CheckpointFile, CheckpointID};

/// Saves and loads the latest checkpoint of one pipeline job.
///
/// # Example
///
/// ```rust,ignore
/// use checkpoint::{CheckpointManager, FilesystemStore};
///
/// let manager = CheckpointManager::new(Arc::new(FilesystemStore::new("/tmp/ckpt")), "j0101");
/// manager.save(&position).await?;
/// let resumed: Option<WalPosition> = manager.load().await?;
/// ```
#[derive(Clone)]
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    job_id: String,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>, job_id: impl Into<String>) -> Self {
        Self {
            store,
            job_id: job_id.into(),
        }
    }

    /// Job this manager saves checkpoints for.
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    fn id<C: Checkpoint>(&self) -> CheckpointID {
        CheckpointID {
            database_type: C::DATABASE_TYPE.to_string(),
            job_id: self.job_id.clone(),
        }
    }

    /// Save `checkpoint` as the job's latest position.
    ///
    /// This is a **SAVING** operation: once it returns `Ok`, the position
    /// survives a restart.
    pub async fn save<C: Checkpoint>(&self, checkpoint: &C) -> anyhow::Result<()> {
        let checkpoint_data = serde_json::to_string(checkpoint)?;
        self.store
            .store_checkpoint(&self.id::<C>(), checkpoint_data)
            .await?;

        tracing::debug!(
            "Saved {} checkpoint for job '{}': {}",
            C::DATABASE_TYPE,
            self.job_id,
            checkpoint.to_cli_string()
        );
        Ok(())
    }

    /// Load the job's latest checkpoint, if one was saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored checkpoint belongs to another source
    /// type or can't be deserialized into `C`.
    pub async fn load<C: Checkpoint>(&self) -> anyhow::Result<Option<C>> {
        let Some(stored) = self.store.read_checkpoint(&self.id::<C>()).await? else {
            return Ok(None);
        };
        let file = CheckpointFile::try_from(stored)?;
        Ok(Some(file.parse::<C>()?))
    }
}
