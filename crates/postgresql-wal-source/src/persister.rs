//! Checkpoint persistence.
//!
//! The persister saves positions published on a watch channel through a
//! [`CheckpointManager`] and republishes each saved position as durable. The
//! dumper only confirms durable positions to the server, so a crash never
//! loses changes that were not yet recorded.

use std::time::Duration;

use anyhow::{Context, Result};
use checkpoint::CheckpointManager;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::position::WalPosition;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Periodically saves the latest position of a job.
pub struct CheckpointPersister {
    manager: CheckpointManager,
    interval: Duration,
}

impl CheckpointPersister {
    pub fn new(manager: CheckpointManager) -> Self {
        Self {
            manager,
            interval: DEFAULT_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Start saving positions seen on `source`.
    ///
    /// The current value of `source` is taken as already durable. Returns
    /// the durable position feed and the task, which ends after a final save
    /// once `cancel` fires or every sender of `source` is gone.
    pub fn spawn(
        self,
        mut source: watch::Receiver<WalPosition>,
        cancel: CancellationToken,
    ) -> (watch::Receiver<WalPosition>, JoinHandle<Result<()>>) {
        let initial = *source.borrow_and_update();
        let (durable_tx, durable_rx) = watch::channel(initial);

        let task = tokio::spawn(async move {
            let mut saved = initial;
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let current = *source.borrow_and_update();
                if current > saved {
                    match self.manager.save(&current).await {
                        Ok(()) => {
                            saved = current;
                            durable_tx.send_replace(current);
                        }
                        Err(e) => warn!("Failed to save checkpoint {current}, retrying: {e:#}"),
                    }
                }

                if source.has_changed().is_err() {
                    debug!("Position feed closed");
                    break;
                }
            }

            let current = *source.borrow();
            if current > saved {
                self.manager
                    .save(&current)
                    .await
                    .with_context(|| format!("Failed to save final checkpoint {current}"))?;
                durable_tx.send_replace(current);
                saved = current;
            }
            info!(
                "Checkpoint persister for job '{}' stopped at {saved}",
                self.manager.job_id()
            );
            Ok(())
        });

        (durable_rx, task)
    }
}
