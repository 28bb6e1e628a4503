//! In-memory checkpoint storage.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::store::{CheckpointID, CheckpointStore, StoredCheckpoint};

/// Process-local checkpoint store. Contents are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    checkpoints: Mutex<HashMap<CheckpointID, StoredCheckpoint>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn store_checkpoint(&self, id: &CheckpointID, checkpoint_data: String) -> Result<()> {
        let stored = StoredCheckpoint::new(id, checkpoint_data);
        self.checkpoints.lock().await.insert(id.clone(), stored);
        Ok(())
    }

    async fn read_checkpoint(&self, id: &CheckpointID) -> Result<Option<StoredCheckpoint>> {
        Ok(self.checkpoints.lock().await.get(id).cloned())
    }
}
