//! Reference applier writing records as JSON lines.

use anyhow::Context;
use ingest_core::PipelineReceiver;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, info};
use wal_ingest_postgresql_source::{Record, WalPosition};

const DEFAULT_FLUSH_EVERY: usize = 1000;

/// Consumes the pipeline channel, writing one JSON document per record.
///
/// After each flush the position of the last written record is published on
/// `acks`; the checkpoint persister treats it as applied.
pub struct JsonLinesApplier<W> {
    writer: W,
    acks: watch::Sender<WalPosition>,
    flush_every: usize,
}

impl<W: AsyncWrite + Unpin> JsonLinesApplier<W> {
    pub fn new(writer: W, acks: watch::Sender<WalPosition>) -> Self {
        Self {
            writer,
            acks,
            flush_every: DEFAULT_FLUSH_EVERY,
        }
    }

    pub fn with_flush_every(mut self, records: usize) -> Self {
        self.flush_every = records.max(1);
        self
    }

    /// Apply records until the channel is closed and drained.
    ///
    /// Returns the number of records written.
    pub async fn run(mut self, mut records: PipelineReceiver<Record>) -> anyhow::Result<u64> {
        let mut written = 0u64;
        let mut unflushed = 0usize;
        let mut last = None;

        while let Some(record) = records.recv().await {
            let mut line = serde_json::to_vec(&record).context("Failed to serialize record")?;
            line.push(b'\n');
            self.writer
                .write_all(&line)
                .await
                .context("Failed to write record")?;
            last = Some(record.position());
            unflushed += 1;

            if unflushed >= self.flush_every || records.is_empty() {
                written += self.flush(unflushed, last).await?;
                unflushed = 0;
            }
        }

        written += self.flush(unflushed, last).await?;
        info!("Applier finished after {written} records");
        Ok(written)
    }

    async fn flush(&mut self, count: usize, last: Option<WalPosition>) -> anyhow::Result<u64> {
        self.writer.flush().await.context("Failed to flush output")?;
        if let Some(position) = last {
            let advanced = self.acks.send_if_modified(|acked| {
                if position > *acked {
                    *acked = position;
                    true
                } else {
                    false
                }
            });
            if advanced {
                debug!("Applied through {position}");
            }
        }
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest_core::pipeline_channel;
    use wal_ingest_postgresql_source::{Lsn, PlaceholderRecord, TransactionRecord};

    fn at(lsn: u64) -> WalPosition {
        WalPosition::new(Lsn(lsn))
    }

    #[tokio::test]
    async fn test_writes_json_lines_and_acknowledges() {
        let (tx, rx) = pipeline_channel(8);
        let (acks, acked) = watch::channel(WalPosition::ZERO);
        tx.push(vec![
            Record::Placeholder(PlaceholderRecord { position: at(0x10) }),
            Record::Transaction(TransactionRecord {
                xid: Some(529),
                csn: None,
                commit_time: None,
                position: at(0x20),
            }),
        ])
        .await
        .unwrap();
        drop(tx);

        let mut output = Vec::new();
        let written = JsonLinesApplier::new(&mut output, acks)
            .run(rx)
            .await
            .unwrap();
        assert_eq!(written, 2);
        assert_eq!(*acked.borrow(), at(0x20));

        let text = String::from_utf8(output).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines[0]["type"], "placeholder");
        assert_eq!(lines[0]["position"]["lsn"], "0/10");
        assert_eq!(lines[1]["type"], "transaction");
        assert_eq!(lines[1]["xid"], 529);
    }

    #[tokio::test]
    async fn test_acknowledgement_never_moves_backwards() {
        let (tx, rx) = pipeline_channel(8);
        let (acks, acked) = watch::channel(at(0x50));
        tx.push(vec![Record::Placeholder(PlaceholderRecord { position: at(0x10) })])
            .await
            .unwrap();
        drop(tx);

        JsonLinesApplier::new(tokio::io::sink(), acks)
            .run(rx)
            .await
            .unwrap();
        assert_eq!(*acked.borrow(), at(0x50));
    }
}
