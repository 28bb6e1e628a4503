//! Checkpoint management for wal-ingest
//!
//! Provides storage-agnostic checkpoint handling with support for
//! source-specific checkpoint types.
//!
//! # Architecture
//!
//! This crate provides a generic checkpoint system that:
//! - Defines the `Checkpoint` trait for source-specific position types
//! - Provides `CheckpointFile` wrapper for storage-agnostic serialization
//! - Saves and loads the latest checkpoint of a job via `CheckpointManager`
//! - Supports multiple storage backends via `CheckpointStore` trait
//!
//! ## Storage Backends
//!
//! - `FilesystemStore` - One JSON file per job, replaced atomically
//! - `MemoryStore` - Process-local map, for tests and dry runs
//!
//! A job keeps exactly one checkpoint: each save replaces the previous one.

mod config;
mod file;
mod filesystem;
mod manager;
mod memory;
pub mod store;


pub use config::CheckpointStorage;
pub use file::CheckpointFile;
pub use filesystem::FilesystemStore;
pub use manager::CheckpointManager;
pub use memory::MemoryStore;
pub use store::{CheckpointID, CheckpointStore, StoredCheckpoint};

/// Trait that source-specific checkpoints must implement.
///
/// # Example
///
/// ```rust
/// use checkpoint::Checkpoint;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct OffsetCheckpoint {
///     pub offset: u64,
/// }
///
/// impl Checkpoint for OffsetCheckpoint {
///     const DATABASE_TYPE: &'static str = "offset";
///
///     fn to_cli_string(&self) -> String {
///         self.offset.to_string()
///     }
///
///     fn from_cli_string(s: &str) -> anyhow::Result<Self> {
///         Ok(Self { offset: s.parse()? })
///     }
/// }
/// ```
pub trait Checkpoint: serde::Serialize + for<'de> serde::Deserialize<'de> + Clone {
    /// Source type identifier (e.g., "postgresql-wal").
    ///
    /// Stored alongside the checkpoint and validated on load, so a job
    /// cannot resume from another source's position.
    const DATABASE_TYPE: &'static str;

    /// Convert to CLI-friendly string format.
    ///
    /// The returned string should be parseable by `from_cli_string()`.
    /// Used for `--start-from` style arguments and log output.
    fn to_cli_string(&self) -> String;

    /// Parse from CLI string format.
    fn from_cli_string(s: &str) -> anyhow::Result<Self>
    where
        Self: Sized;
}

/// Read the checkpoint file of `job_id` from a checkpoint directory.
///
/// Standalone helper for CLI scenarios where only a directory path is known.
/// Returns `None` when the job has no checkpoint yet.
pub async fn read_checkpoint_file<P: AsRef<std::path::Path>>(
    checkpoint_dir: P,
    job_id: &str,
) -> anyhow::Result<Option<CheckpointFile>> {
    let path = FilesystemStore::path_for(checkpoint_dir.as_ref(), job_id);
    if !tokio::fs::try_exists(&path).await? {
        return Ok(None);
    }

    let content = tokio::fs::read_to_string(&path).await?;
    let stored: StoredCheckpoint = serde_json::from_str(&content)?;
    Ok(Some(CheckpointFile::try_from(stored)?))
}
