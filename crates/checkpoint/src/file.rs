//! Checkpoint file wrapper for storage-agnostic serialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Checkpoint, StoredCheckpoint};

/// Storage-agnostic checkpoint wrapper.
///
/// Wraps a source-specific checkpoint with the metadata needed to
/// validate it on load.
///
/// # File Format
///
/// ```json
/// {
///     "database_type": "postgresql-wal",
///     "job_id": "j0101",
///     "checkpoint": { "lsn": "0/16B3748" },
///     "created_at": "2024-01-01T00:00:00Z"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointFile {
    /// Source type identifier
    pub database_type: String,
    /// Job the checkpoint belongs to
    pub job_id: String,
    /// Serialized checkpoint data as JSON Value
    pub checkpoint: serde_json::Value,
    /// When the checkpoint was taken
    pub created_at: DateTime<Utc>,
}

impl CheckpointFile {
    /// Wrap a source-specific checkpoint for `job_id`.
    pub fn new<C: Checkpoint>(checkpoint: &C, job_id: &str) -> anyhow::Result<Self> {
        Ok(Self {
            database_type: C::DATABASE_TYPE.to_string(),
            job_id: job_id.to_string(),
            checkpoint: serde_json::to_value(checkpoint)?,
            created_at: Utc::now(),
        })
    }

    /// Parse checkpoint into the source-specific type.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored `database_type` doesn't match
    /// `C::DATABASE_TYPE` or the data can't be deserialized into `C`.
    pub fn parse<C: Checkpoint>(&self) -> anyhow::Result<C> {
        if self.database_type != C::DATABASE_TYPE {
            anyhow::bail!(
                "Checkpoint type mismatch: expected '{}', found '{}'",
                C::DATABASE_TYPE,
                self.database_type
            );
        }
        Ok(serde_json::from_value(self.checkpoint.clone())?)
    }

    /// Get the source type of this checkpoint.
    pub fn database_type(&self) -> &str {
        &self.database_type
    }

    /// Get the job this checkpoint belongs to.
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Get the timestamp when this checkpoint was taken.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl TryFrom<StoredCheckpoint> for CheckpointFile {
    type Error = anyhow::Error;

    fn try_from(stored: StoredCheckpoint) -> anyhow::Result<Self> {
        Ok(Self {
            checkpoint: serde_json::from_str(&stored.checkpoint_data)?,
            database_type: stored.database_type,
            job_id: stored.job_id,
            created_at: stored.created_at,
        })
    }
}
