//! Wiring of one ingestion job.
//!
//! ```text
//! WalDumper ──records──▶ JsonLinesApplier ──acks──▶ CheckpointPersister
//!     ▲                                                    │
//!     └──────────────────── durable positions ◀────────────┘
//! ```

use std::sync::Arc;

use anyhow::Context;
use checkpoint::CheckpointManager;
use ingest_core::{pipeline_channel, DatabaseSchema, JobRateLimiter};
use tokio::io::AsyncWrite;
use tokio::sync::watch;
use tokio_postgres::NoTls;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use wal_ingest_postgresql_source::{
    load_database_schema, CheckpointPersister, WalDumper, WalEventConverter, WalPosition,
};

use crate::applier::JsonLinesApplier;
use crate::config::JobConfig;

/// Load table metadata for the job, from its schema file or from the source.
pub async fn load_metadata(config: &JobConfig) -> anyhow::Result<DatabaseSchema> {
    if let Some(path) = &config.schema_file {
        return DatabaseSchema::from_file(path)
            .with_context(|| format!("Failed to load schema file {}", path.display()));
    }

    let pg_config = config.data_source.pg_config()?;
    let (client, connection) = pg_config
        .connect(NoTls)
        .await
        .with_context(|| format!("Failed to connect to {:?}", config.data_source))?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!("PostgreSQL connection error: {e}");
        }
    });

    load_database_schema(&client, &config.schema, &config.tables).await
}

/// Run a job until `cancel` fires or the dumper fails.
///
/// Returns the last position the dumper reached.
pub async fn run_job<W>(
    config: JobConfig,
    output: W,
    cancel: CancellationToken,
) -> anyhow::Result<WalPosition>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    config.validate()?;
    let manager = CheckpointManager::new(config.checkpoint.build(), &config.job_id);
    let start = manager
        .load::<WalPosition>()
        .await
        .context("Failed to load checkpoint")?
        .unwrap_or(WalPosition::ZERO);
    info!("Job '{}' resuming from {start}", config.job_id);

    let metadata = load_metadata(&config).await?;
    let converter =
        WalEventConverter::new(Arc::new(metadata)).with_table_filter(config.tables.clone());

    let (records_tx, records_rx) = pipeline_channel(config.channel_capacity);
    let (acks_tx, acks_rx) = watch::channel(start);

    let persister_cancel = CancellationToken::new();
    let (durable, persister) = CheckpointPersister::new(manager)
        .with_interval(config.checkpoint_interval()?)
        .spawn(acks_rx, persister_cancel.clone());

    let mut dumper = WalDumper::new(
        &config.data_source,
        config.dumper_config()?,
        config.plugin.build(),
        converter,
        records_tx,
    )?
    .start_from(start)
    .with_durable_positions(durable);
    if let Some(rate_limit) = &config.rate_limit {
        let limiter = JobRateLimiter::from_config(rate_limit)?;
        info!("Rate limiting job '{}' with {}", config.job_id, limiter.algorithm());
        dumper = dumper.with_rate_limiter(Arc::new(limiter));
    }

    let handle = dumper.start();
    let applier = tokio::spawn(JsonLinesApplier::new(output, acks_tx).run(records_rx));

    let mut states = handle.states();
    tokio::select! {
        _ = cancel.cancelled() => handle.stop(),
        _ = states.wait_for(|state| !state.is_active()) => {}
    }

    let outcome = handle.wait().await;
    let applied = applier.await.context("Applier task panicked")??;
    persister_cancel.cancel();
    persister.await.context("Checkpoint persister task panicked")??;

    match outcome {
        Ok(position) => {
            info!(
                "Job '{}' stopped at {position} after applying {applied} records",
                config.job_id
            );
            Ok(position)
        }
        Err(e) => {
            warn!("Job '{}' failed after applying {applied} records", config.job_id);
            Err(e).context(format!("Job '{}' failed", config.job_id))
        }
    }
}
