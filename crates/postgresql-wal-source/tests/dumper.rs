//! Lifecycle tests of the WAL dumper against scripted replication sessions.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use checkpoint::{CheckpointManager, MemoryStore};
use ingest_core::{
    pipeline_channel, ColumnDefinition, DatabaseSchema, JobRateLimiter, PipelineReceiver,
    PipelineSqlOperationType, TableDefinition, UniversalType, UniversalValue,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use wal_ingest_postgresql_source::{
    CheckpointPersister, DumperConfig, DumperState, IngestError, Lsn, PluginKind, RawMessage,
    ReconnectPolicy, Record, ReplicationSession, SessionError, SessionFactory, WalDumper,
    WalEventConverter, WalPosition,
};

fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

fn at(lsn: u64) -> WalPosition {
    WalPosition::new(Lsn(lsn))
}

#[derive(Debug, Clone)]
enum Step {
    Message(u64, &'static str),
    Fail,
}

/// Hands out one scripted session per `open`; `None` entries make the open
/// fail, and so does every open after the script runs out.
struct ScriptedFactory {
    sessions: Mutex<VecDeque<Option<Vec<Step>>>>,
    opens: Mutex<Vec<WalPosition>>,
    confirmed: Arc<Mutex<Vec<WalPosition>>>,
}

impl ScriptedFactory {
    fn new(sessions: Vec<Option<Vec<Step>>>) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(sessions.into()),
            opens: Mutex::new(Vec::new()),
            confirmed: Arc::new(Mutex::new(Vec::new())),
        })
    }

    fn opens(&self) -> Vec<WalPosition> {
        self.opens.lock().unwrap().clone()
    }

    fn confirmed(&self) -> Vec<WalPosition> {
        self.confirmed.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionFactory for ScriptedFactory {
    async fn open(
        &self,
        _slot: &str,
        start: WalPosition,
    ) -> Result<Box<dyn ReplicationSession>, SessionError> {
        self.opens.lock().unwrap().push(start);
        let next = self.sessions.lock().unwrap().pop_front();
        match next {
            Some(Some(steps)) => Ok(Box::new(ScriptedSession {
                steps: steps.into(),
                confirmed: Arc::clone(&self.confirmed),
            })),
            _ => Err(SessionError::Disconnected("connection refused".to_string())),
        }
    }
}

struct ScriptedSession {
    steps: VecDeque<Step>,
    confirmed: Arc<Mutex<Vec<WalPosition>>>,
}

#[async_trait]
impl ReplicationSession for ScriptedSession {
    async fn poll(&mut self) -> Result<Option<RawMessage>, SessionError> {
        match self.steps.pop_front() {
            Some(Step::Message(lsn, data)) => Ok(Some(RawMessage {
                position: at(lsn),
                xid: None,
                data: data.as_bytes().to_vec(),
            })),
            Some(Step::Fail) => Err(SessionError::Disconnected(
                "server closed the connection unexpectedly".to_string(),
            )),
            None => Ok(None),
        }
    }

    async fn confirm(&mut self, position: WalPosition) -> Result<(), SessionError> {
        self.confirmed.lock().unwrap().push(position);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        Ok(())
    }
}

fn schema() -> Arc<DatabaseSchema> {
    Arc::new(DatabaseSchema::new(vec![TableDefinition::new(
        "public.t_order",
        vec![
            ColumnDefinition::new("order_id", UniversalType::Int32),
            ColumnDefinition::nullable("status", UniversalType::VarChar { length: 32 }),
        ],
        vec!["order_id".to_string()],
    )]))
}

fn dumper(
    factory: &Arc<ScriptedFactory>,
    plugin: PluginKind,
    grouped: bool,
    capacity: usize,
) -> (WalDumper, PipelineReceiver<Record>) {
    init_logging();
    let (tx, rx) = pipeline_channel(capacity);
    let config = DumperConfig::new("job-1", "pipeline_test")
        .with_decode_with_tx(grouped)
        .with_reconnect(ReconnectPolicy {
            max_attempts: 5,
            backoff: Duration::from_secs(5),
            idle_backoff: Duration::from_millis(10),
        });
    let dumper = WalDumper::with_session_factory(
        factory.clone(),
        config,
        plugin.build(),
        WalEventConverter::new(schema()),
        tx,
    );
    (dumper, rx)
}

async fn recv_n(rx: &mut PipelineReceiver<Record>, n: usize) -> Vec<Record> {
    let mut records = Vec::with_capacity(n);
    while records.len() < n {
        match rx.recv().await {
            Some(record) => records.push(record),
            None => panic!("channel closed after {} records", records.len()),
        }
    }
    records
}

const BEGIN: &str = "BEGIN 10";
const COMMIT: &str = "COMMIT 10";

fn insert(order_id: u32) -> &'static str {
    match order_id {
        1 => "table public.t_order: INSERT: order_id[integer]:1 status[character varying]:'PAID'",
        2 => "table public.t_order: INSERT: order_id[integer]:2 status[character varying]:'PAID'",
        3 => "table public.t_order: INSERT: order_id[integer]:3 status[character varying]:null",
        4 => "table public.t_order: INSERT: order_id[integer]:4 status[character varying]:null",
        _ => "table public.t_order: INSERT: order_id[integer]:5 status[character varying]:null",
    }
}

fn order_id(record: &Record) -> Option<UniversalValue> {
    match record {
        Record::Data(data) => data.column("order_id").map(|c| c.value.clone()),
        _ => None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_pass_through_delivers_each_event() {
    let factory = ScriptedFactory::new(vec![Some(vec![
        Step::Message(1, BEGIN),
        Step::Message(2, insert(1)),
        Step::Message(
            3,
            "table public.t_order: UPDATE: order_id[integer]:1 status[character varying]:'SHIPPED'",
        ),
        Step::Message(4, COMMIT),
    ])]);
    let (dumper, mut rx) = dumper(&factory, PluginKind::TestDecoding, false, 16);
    let handle = dumper.start();
    assert!(handle.is_running());

    let records = recv_n(&mut rx, 3).await;
    assert_eq!(records[0].operation(), Some(PipelineSqlOperationType::Insert));
    assert_eq!(records[0].position(), at(2));
    assert_eq!(records[1].operation(), Some(PipelineSqlOperationType::Update));
    assert_eq!(records[1].position(), at(3));
    assert!(matches!(records[2], Record::Transaction(_)));
    assert_eq!(records[2].position(), at(4));

    let mut positions = handle.positions();
    positions.wait_for(|p| *p == at(4)).await.unwrap();

    handle.stop();
    handle.stop();
    assert_eq!(handle.wait().await.unwrap(), at(4));
}

#[tokio::test(start_paused = true)]
async fn test_grouped_transaction_is_pushed_as_one_batch() {
    let factory = ScriptedFactory::new(vec![Some(vec![
        Step::Message(1, "BEGIN CSN: 7 first_lsn: 0/1"),
        Step::Message(
            2,
            r#"{"table_name":"public.t_order","op_type":"INSERT","columns_name":["order_id","status"],"columns_type":["integer","character varying"],"columns_val":["1","'PAID'"],"old_keys_name":[],"old_keys_type":[],"old_keys_val":[]}"#,
        ),
        Step::Message(
            3,
            r#"{"table_name":"public.t_order","op_type":"INSERT","columns_name":["order_id","status"],"columns_type":["integer","character varying"],"columns_val":["2","null"],"old_keys_name":[],"old_keys_type":[],"old_keys_val":[]}"#,
        ),
        Step::Message(4, "commit xid: 10 CSN: 7"),
    ])]);
    let (dumper, mut rx) = dumper(&factory, PluginKind::MppdbDecoding, true, 16);
    let handle = dumper.start();

    let records = rx.fetch(16, Duration::from_secs(1)).await;
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.csn() == Some(7)));
    assert_eq!(order_id(&records[0]), Some(UniversalValue::Int32(1)));
    assert_eq!(order_id(&records[1]), Some(UniversalValue::Int32(2)));
    match &records[2] {
        Record::Transaction(tx) => {
            assert_eq!(tx.xid, Some(10));
            assert_eq!(tx.position, at(4));
        }
        other => panic!("expected commit marker, got {other:?}"),
    }

    handle.stop();
    assert_eq!(handle.wait().await.unwrap(), at(4));
}

#[tokio::test(start_paused = true)]
async fn test_recovers_after_four_failures_and_resets_counter() {
    let factory = ScriptedFactory::new(vec![
        None,
        None,
        None,
        None,
        Some(vec![Step::Message(2, insert(1))]),
    ]);
    let (dumper, mut rx) = dumper(&factory, PluginKind::TestDecoding, false, 16);
    let handle = dumper.start();

    let records = recv_n(&mut rx, 1).await;
    assert_eq!(order_id(&records[0]), Some(UniversalValue::Int32(1)));
    assert_eq!(handle.reconnect_count(), 0);
    assert_eq!(handle.state(), DumperState::Running);
    assert_eq!(factory.opens().len(), 5);

    handle.stop();
    handle.wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_five_consecutive_failures() {
    let factory = ScriptedFactory::new(vec![]);
    let (dumper, _rx) = dumper(&factory, PluginKind::TestDecoding, true, 16);
    let handle = dumper.start();
    let states = handle.states();

    let err = handle.wait().await.unwrap_err();
    assert!(matches!(
        err,
        IngestError::ReconnectExhausted { attempts: 5, .. }
    ));
    assert!(!err.is_transient());
    assert_eq!(*states.borrow(), DumperState::Failed);
    assert_eq!(factory.opens().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_session_failures_mid_stream_count_towards_bound() {
    let factory = ScriptedFactory::new(vec![
        Some(vec![Step::Fail]),
        Some(vec![Step::Fail]),
        None,
        Some(vec![Step::Fail]),
        None,
    ]);
    let (dumper, _rx) = dumper(&factory, PluginKind::TestDecoding, true, 16);
    let err = dumper.start().wait().await.unwrap_err();
    assert!(matches!(
        err,
        IngestError::ReconnectExhausted {
            attempts: 5,
            source: SessionError::Disconnected(_)
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_backoff_makes_no_further_attempts() {
    let factory = ScriptedFactory::new(vec![None, Some(vec![])]);
    let (dumper, _rx) = dumper(&factory, PluginKind::TestDecoding, true, 16);
    let handle = dumper.start();

    let mut states = handle.states();
    states
        .wait_for(|s| *s == DumperState::Reconnecting { attempt: 1 })
        .await
        .unwrap();
    assert_eq!(handle.reconnect_count(), 1);

    handle.stop();
    assert!(!handle.is_running());
    assert_eq!(handle.wait().await.unwrap(), WalPosition::ZERO);
    assert_eq!(factory.opens().len(), 1);
    assert_eq!(*states.borrow(), DumperState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_full_channel_blocks_without_dropping() {
    let factory = ScriptedFactory::new(vec![Some(
        (1..=5).map(|i| Step::Message(i + 1, insert(i as u32))).collect(),
    )]);
    let (dumper, mut rx) = dumper(&factory, PluginKind::TestDecoding, false, 2);
    let handle = dumper.start();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(rx.len(), 2);
    // The third record is waiting for room, so the position has not passed it
    assert_eq!(handle.position(), at(3));

    let records = recv_n(&mut rx, 5).await;
    let ids: Vec<_> = records.iter().map(order_id).collect();
    assert_eq!(
        ids,
        (1..=5).map(|i| Some(UniversalValue::Int32(i))).collect::<Vec<_>>()
    );

    handle.stop();
    assert_eq!(handle.wait().await.unwrap(), at(6));
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_push_is_blocked_delivers_in_flight_record_only() {
    let factory = ScriptedFactory::new(vec![Some(
        (1..=4).map(|i| Step::Message(i + 1, insert(i as u32))).collect(),
    )]);
    let (dumper, mut rx) = dumper(&factory, PluginKind::TestDecoding, false, 1);
    let handle = dumper.start();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(rx.len(), 1);
    // The second record is waiting for room
    assert_eq!(handle.position(), at(2));

    handle.stop();
    let mut ids = Vec::new();
    while let Some(record) = rx.recv().await {
        ids.push(order_id(&record));
    }
    assert_eq!(
        ids,
        vec![Some(UniversalValue::Int32(1)), Some(UniversalValue::Int32(2))]
    );
    assert_eq!(handle.wait().await.unwrap(), at(3));
}

#[tokio::test(start_paused = true)]
async fn test_decode_error_is_fatal() {
    let factory = ScriptedFactory::new(vec![Some(vec![Step::Message(
        1,
        "table public.t_order: MERGE: order_id[integer]:1",
    )])]);
    let (dumper, _rx) = dumper(&factory, PluginKind::TestDecoding, false, 16);
    let err = dumper.start().wait().await.unwrap_err();
    assert!(matches!(err, IngestError::Decode(_)));
    assert_eq!(factory.opens().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_table_is_fatal() {
    let factory = ScriptedFactory::new(vec![Some(vec![Step::Message(
        1,
        "table public.t_missing: INSERT: id[integer]:1",
    )])]);
    let (dumper, _rx) = dumper(&factory, PluginKind::TestDecoding, false, 16);
    let handle = dumper.start();
    let states = handle.states();
    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, IngestError::MetadataUnavailable { .. }));
    assert_eq!(*states.borrow(), DumperState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_closed_channel_ends_the_job() {
    let factory = ScriptedFactory::new(vec![Some(vec![Step::Message(2, insert(1))])]);
    let (dumper, rx) = dumper(&factory, PluginKind::TestDecoding, false, 16);
    drop(rx);
    let err = dumper.start().wait().await.unwrap_err();
    assert!(matches!(err, IngestError::ChannelClosed));
}

#[tokio::test(start_paused = true)]
async fn test_reopen_resumes_from_durable_position_without_duplicates() {
    let factory = ScriptedFactory::new(vec![
        Some(vec![
            Step::Message(1, BEGIN),
            Step::Message(2, insert(1)),
            Step::Message(3, COMMIT),
            Step::Message(4, "BEGIN 11"),
            Step::Message(5, insert(2)),
            Step::Message(6, "COMMIT 11"),
            Step::Fail,
        ]),
        // The server replays everything after the durable position
        Some(vec![
            Step::Message(4, "BEGIN 11"),
            Step::Message(5, insert(2)),
            Step::Message(6, "COMMIT 11"),
            Step::Message(7, "BEGIN 12"),
            Step::Message(8, insert(3)),
            Step::Message(9, "COMMIT 12"),
        ]),
    ]);
    let (durable_tx, durable_rx) = watch::channel(WalPosition::ZERO);
    let (dumper, mut rx) = dumper(&factory, PluginKind::TestDecoding, true, 16);
    let handle = dumper.with_durable_positions(durable_rx).start();

    let first = recv_n(&mut rx, 4).await;
    assert_eq!(first[1].position(), at(3));
    durable_tx.send_replace(at(3));

    let second = recv_n(&mut rx, 2).await;
    assert_eq!(order_id(&second[0]), Some(UniversalValue::Int32(3)));
    assert_eq!(second[1].position(), at(9));
    assert_eq!(factory.opens(), vec![WalPosition::ZERO, at(3)]);

    durable_tx.send_replace(at(9));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(factory.confirmed(), vec![at(9)]);
    assert!(rx.is_empty());

    handle.stop();
    assert_eq!(handle.wait().await.unwrap(), at(9));
}

#[tokio::test(start_paused = true)]
async fn test_restart_from_checkpoint_delivers_everything_after_it() {
    // A restarted job sees the slot's unconfirmed backlog again
    let factory = ScriptedFactory::new(vec![Some(vec![
        Step::Message(4, "BEGIN 11"),
        Step::Message(5, insert(2)),
        Step::Message(6, "COMMIT 11"),
    ])]);
    let (dumper, mut rx) = dumper(&factory, PluginKind::TestDecoding, true, 16);
    let handle = dumper.start_from(at(3)).start();

    let records = recv_n(&mut rx, 2).await;
    assert_eq!(order_id(&records[0]), Some(UniversalValue::Int32(2)));
    assert_eq!(factory.opens(), vec![at(3)]);

    handle.stop();
    assert_eq!(handle.wait().await.unwrap(), at(6));
}

#[tokio::test(start_paused = true)]
async fn test_acknowledged_positions_are_persisted_and_confirmed() {
    let factory = ScriptedFactory::new(vec![Some(vec![
        Step::Message(1, BEGIN),
        Step::Message(2, insert(1)),
        Step::Message(3, COMMIT),
    ])]);
    let manager = CheckpointManager::new(Arc::new(MemoryStore::new()), "job-1");
    let cancel = CancellationToken::new();
    let (ack_tx, ack_rx) = watch::channel(WalPosition::ZERO);
    let (durable, persister) = CheckpointPersister::new(manager.clone())
        .with_interval(Duration::from_millis(50))
        .spawn(ack_rx, cancel.clone());

    let (dumper, mut rx) = dumper(&factory, PluginKind::TestDecoding, true, 16);
    let handle = dumper.with_durable_positions(durable).start();

    for record in recv_n(&mut rx, 2).await {
        ack_tx.send_replace(record.position());
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(manager.load::<WalPosition>().await.unwrap(), Some(at(3)));
    assert_eq!(factory.confirmed(), vec![at(3)]);

    handle.stop();
    handle.wait().await.unwrap();
    cancel.cancel();
    persister.await.unwrap().unwrap();
}

// Uses governor's own clock, so this one runs in real time.
#[tokio::test]
async fn test_rate_limiter_paces_write_records() {
    let factory = ScriptedFactory::new(vec![Some(vec![
        Step::Message(2, insert(1)),
        Step::Message(3, insert(2)),
    ])]);
    let (dumper, mut rx) = dumper(&factory, PluginKind::TestDecoding, false, 16);
    let limiter = Arc::new(JobRateLimiter::tps(1).unwrap());
    let handle = dumper.with_rate_limiter(limiter).start();

    let started = std::time::Instant::now();
    recv_n(&mut rx, 2).await;
    assert!(started.elapsed() >= Duration::from_millis(900));

    handle.stop();
    handle.wait().await.unwrap();
}
