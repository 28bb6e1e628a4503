//! Job-level integration test: stream, stop, resume.
//!
//! Needs docker: `cargo test --test e2e_wal_job -- --ignored`

use std::path::Path;
use std::time::Duration;

use checkpoint::CheckpointStorage;
use ingest_core::PipelineSqlOperationType;
use tokio_util::sync::CancellationToken;
use wal_ingest::{run_job, JobConfig};
use wal_ingest_postgresql_source::testing::PostgresContainer;
use wal_ingest_postgresql_source::{DataSourceConfig, Record, WalPosition};

async fn read_records(path: &Path) -> anyhow::Result<Vec<Record>> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    // A line still being written has no terminator yet
    text.split_inclusive('\n')
        .filter(|line| line.ends_with('\n'))
        .map(|line| serde_json::from_str(line).map_err(anyhow::Error::from))
        .collect()
}

async fn wait_for_records(path: &Path, count: usize) -> anyhow::Result<Vec<Record>> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    loop {
        let records = read_records(path).await?;
        if records.len() >= count {
            return Ok(records);
        }
        anyhow::ensure!(
            tokio::time::Instant::now() < deadline,
            "timed out with {} of {count} records",
            records.len()
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

fn spawn_job(
    config: JobConfig,
    output: &Path,
) -> (
    CancellationToken,
    tokio::task::JoinHandle<anyhow::Result<WalPosition>>,
) {
    let cancel = CancellationToken::new();
    let path = output.to_path_buf();
    let token = cancel.clone();
    let task = tokio::spawn(async move {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        run_job(config, file, token).await
    });
    (cancel, task)
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_job_resumes_from_checkpoint_without_replaying() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("wal_ingest=info,wal_ingest_postgresql_source=debug")
        .try_init()
        .ok();

    let container = PostgresContainer::new("wal-ingest-job-test", 15433);
    container.start()?;
    container.wait_until_ready(Duration::from_secs(60)).await?;
    let client = container.connect().await?;
    client
        .batch_execute("CREATE TABLE t_order (order_id integer PRIMARY KEY, status text)")
        .await?;

    let dir = tempfile::tempdir()?;
    let first_output = dir.path().join("first.jsonl");
    let second_output = dir.path().join("second.jsonl");

    let mut config = JobConfig::new(
        "resume",
        DataSourceConfig::standard(container.connection_string.clone()),
    );
    config.tables = vec!["t_order".to_string()];
    config.checkpoint = CheckpointStorage::Filesystem {
        dir: dir.path().join("checkpoints"),
    };
    config.checkpoint_interval = "100ms".to_string();
    let slot = config.slot_name()?;

    let (cancel, job) = spawn_job(config.clone(), &first_output);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    while client
        .query_opt("SELECT 1 FROM pg_replication_slots WHERE slot_name = $1", &[&slot])
        .await?
        .is_none()
    {
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "slot was never created");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    client
        .batch_execute("INSERT INTO t_order VALUES (1, 'PAID'), (2, 'PAID')")
        .await?;
    let first = wait_for_records(&first_output, 3).await?;
    assert_eq!(first[0].operation(), Some(PipelineSqlOperationType::Insert));
    assert_eq!(first[1].operation(), Some(PipelineSqlOperationType::Insert));
    assert!(matches!(first[2], Record::Transaction(_)));

    cancel.cancel();
    let stopped_at = job.await??;
    assert_eq!(stopped_at, first[2].position());

    client
        .batch_execute("UPDATE t_order SET status = 'SHIPPED' WHERE order_id = 2")
        .await?;

    let (cancel, job) = spawn_job(config, &second_output);
    let second = wait_for_records(&second_output, 2).await?;
    assert_eq!(second[0].operation(), Some(PipelineSqlOperationType::Update));
    assert!(second[0].position() > stopped_at);
    assert!(matches!(second[1], Record::Transaction(_)));

    // Nothing from the first run is delivered again
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(read_records(&second_output).await?.len(), 2);

    cancel.cancel();
    job.await??;
    Ok(())
}
