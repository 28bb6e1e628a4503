//! End-to-end replication against a real PostgreSQL server.
//!
//! Needs docker: `cargo test -p wal-ingest-postgresql-source -- --ignored`

use std::sync::Arc;
use std::time::Duration;

use ingest_core::{pipeline_channel, PipelineSqlOperationType, UniversalValue};
use wal_ingest_postgresql_source::testing::PostgresContainer;
use wal_ingest_postgresql_source::{
    load_database_schema, unique_slot_name, DataSourceConfig, DumperConfig, PluginKind, Record,
    WalDumper, WalEventConverter,
};

#[tokio::test]
#[ignore = "requires docker"]
async fn test_test_decoding_end_to_end() -> anyhow::Result<()> {
    let container = PostgresContainer::new("wal-ingest-live-test", 15432);
    container.start()?;
    container.wait_until_ready(Duration::from_secs(60)).await?;

    let client = container.connect().await?;
    client
        .batch_execute(
            "CREATE TABLE t_order (order_id integer PRIMARY KEY, status varchar(32), amount numeric(10,2))",
        )
        .await?;

    let schema = load_database_schema(&client, "public", &["t_order".to_string()]).await?;
    let slot = unique_slot_name("testdb", "live");
    let (tx, mut rx) = pipeline_channel(64);
    let dumper = WalDumper::new(
        &DataSourceConfig::standard(container.connection_string.clone()),
        DumperConfig::new("live", slot.clone()),
        PluginKind::TestDecoding.build(),
        WalEventConverter::new(Arc::new(schema)),
        tx,
    )?;
    let handle = dumper.start();

    // Changes made before the slot exists are not replicated
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
        .batch_execute(
            "BEGIN; \
             INSERT INTO t_order VALUES (1, 'PAID', 10.50); \
             UPDATE t_order SET status = 'SHIPPED' WHERE order_id = 1; \
             COMMIT; \
             DELETE FROM t_order WHERE order_id = 1;",
        )
        .await?;

    let mut records = Vec::new();
    while records.len() < 5 {
        let batch = rx.fetch(16, Duration::from_secs(10)).await;
        anyhow::ensure!(!batch.is_empty(), "timed out after {} records", records.len());
        records.extend(batch);
    }

    let ops: Vec<_> = records.iter().map(Record::operation).collect();
    assert_eq!(
        ops,
        vec![
            Some(PipelineSqlOperationType::Insert),
            Some(PipelineSqlOperationType::Update),
            None,
            Some(PipelineSqlOperationType::Delete),
            None,
        ]
    );
    match &records[0] {
        Record::Data(data) => {
            assert_eq!(data.table, "public.t_order");
            assert_eq!(data.column("order_id").unwrap().value, UniversalValue::Int32(1));
        }
        other => panic!("expected insert, got {other:?}"),
    }

    handle.stop();
    let position = handle.wait().await?;
    assert_eq!(position, records[4].position());
    Ok(())
}
