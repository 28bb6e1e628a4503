//! Checkpoint storage configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::{CheckpointStore, FilesystemStore, MemoryStore};

/// Where checkpoints are kept.
///
/// ```toml
/// [checkpoint]
/// type = "filesystem"
/// dir = ".wal-ingest-checkpoints"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckpointStorage {
    /// Keep checkpoints in memory only
    Memory,
    /// Write checkpoint files under `dir`
    Filesystem { dir: PathBuf },
}

impl Default for CheckpointStorage {
    fn default() -> Self {
        Self::Filesystem {
            dir: PathBuf::from(".wal-ingest-checkpoints"),
        }
    }
}

impl CheckpointStorage {
    /// Build the store this configuration describes.
    pub fn build(&self) -> Arc<dyn CheckpointStore> {
        match self {
            CheckpointStorage::Memory => Arc::new(MemoryStore::new()),
            CheckpointStorage::Filesystem { dir } => Arc::new(FilesystemStore::new(dir.clone())),
        }
    }
}
