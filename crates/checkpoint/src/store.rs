//! Checkpoint storage trait and types
//!
//! This module defines the CheckpointStore trait for backend-agnostic
//! checkpoint storage operations, plus shared types.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Checkpoint identifier for storage
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointID {
    /// Source type (e.g., "postgresql-wal")
    pub database_type: String,
    /// Pipeline job identifier
    pub job_id: String,
}

/// Checkpoint data stored in backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCheckpoint {
    /// Serialized checkpoint (JSON of the source-specific type)
    pub checkpoint_data: String,
    /// Source type for validation
    pub database_type: String,
    /// Job for validation
    pub job_id: String,
    /// Timestamp when checkpoint was created
    pub created_at: DateTime<Utc>,
}

impl StoredCheckpoint {
    pub(crate) fn new(id: &CheckpointID, checkpoint_data: String) -> Self {
        Self {
            checkpoint_data,
            database_type: id.database_type.clone(),
            job_id: id.job_id.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Trait for checkpoint storage operations.
///
/// Implementations keep only the latest checkpoint per [`CheckpointID`]:
/// storing replaces whatever was there.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Store a checkpoint, replacing the previous one for the same id.
    async fn store_checkpoint(&self, id: &CheckpointID, checkpoint_data: String) -> Result<()>;

    /// Read a checkpoint from the storage backend.
    ///
    /// Returns None if the checkpoint doesn't exist.
    async fn read_checkpoint(&self, id: &CheckpointID) -> Result<Option<StoredCheckpoint>>;
}
