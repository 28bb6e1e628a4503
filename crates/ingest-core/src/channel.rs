//! Bounded pipeline channel between the ingestion worker and the applier.
//!
//! The channel is a FIFO of records with a fixed capacity counted in
//! records. `push` takes a whole batch: the batch is enqueued as one
//! uninterrupted run even when it is larger than the capacity (it is then
//! admitted in capacity-sized slices as the consumer drains), and a full
//! channel makes the producer wait instead of dropping anything.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

/// Errors returned by the pipeline channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The consumer closed the channel or was dropped
    #[error("pipeline channel is closed")]
    Closed,
}

/// Create a bounded pipeline channel holding at most `capacity` records.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn pipeline_channel<T>(capacity: usize) -> (PipelineSender<T>, PipelineReceiver<T>) {
    assert!(capacity > 0, "pipeline channel capacity must be positive");
    let (tx, rx) = mpsc::channel(capacity);
    (
        PipelineSender {
            tx,
            push_lock: Arc::new(Mutex::new(())),
            capacity,
        },
        PipelineReceiver { rx, capacity },
    )
}

/// Producer side of the pipeline channel.
pub struct PipelineSender<T> {
    tx: mpsc::Sender<T>,
    /// Serialises batch pushes so batches from different senders never interleave
    push_lock: Arc<Mutex<()>>,
    capacity: usize,
}

impl<T> Clone for PipelineSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            push_lock: Arc::clone(&self.push_lock),
            capacity: self.capacity,
        }
    }
}

impl<T> PipelineSender<T> {
    /// Push a batch of records, waiting while the channel is full.
    ///
    /// The records are delivered in order and contiguously with respect to
    /// other pushes. Returns [`ChannelError::Closed`] if the consumer went
    /// away; records already admitted before that point stay in the channel.
    pub async fn push(&self, records: Vec<T>) -> Result<(), ChannelError> {
        if records.is_empty() {
            return Ok(());
        }

        let _guard = self.push_lock.lock().await;
        let mut remaining = records.len();
        let mut records = records.into_iter();

        while remaining > 0 {
            let slice = remaining.min(self.capacity);
            let permits = self
                .tx
                .reserve_many(slice)
                .await
                .map_err(|_| ChannelError::Closed)?;
            for (permit, record) in permits.zip(records.by_ref()) {
                permit.send(record);
            }
            remaining -= slice;
        }

        Ok(())
    }

    /// Configured capacity in records.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of records currently buffered.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Whether no records are buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the consumer closed the channel.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of the pipeline channel.
pub struct PipelineReceiver<T> {
    rx: mpsc::Receiver<T>,
    capacity: usize,
}

impl<T> PipelineReceiver<T> {
    /// Receive the next record, or `None` once the channel is closed and drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Fetch up to `max` records, waiting at most `timeout` for the first one.
    ///
    /// Returns an empty vector on timeout or when the channel is closed and
    /// drained.
    pub async fn fetch(&mut self, max: usize, timeout: Duration) -> Vec<T> {
        let mut records = Vec::with_capacity(max.min(self.capacity));
        if max == 0 {
            return records;
        }
        let _ = tokio::time::timeout(timeout, self.rx.recv_many(&mut records, max)).await;
        records
    }

    /// Number of records currently buffered.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether no records are buffered.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Close the channel. Pending pushes fail; buffered records can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
