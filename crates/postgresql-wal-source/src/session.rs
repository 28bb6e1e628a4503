//! Replication sessions.
//!
//! A session owns one connection and reads one logical replication slot
//! through the SQL interface (`pg_logical_slot_peek_changes`). Peeking does
//! not consume anything on the server: the slot only moves when the session
//! is told that a position is durable via [`ReplicationSession::confirm`].
//! Until then a restarted job sees the same changes again.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info, warn};

use crate::decode::DecodingPlugin;
use crate::error::SessionError;
use crate::position::{Lsn, WalPosition};

/// One message read from a replication slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Position the server reported for the message
    pub position: WalPosition,
    /// Transaction the message belongs to
    pub xid: Option<u64>,
    /// Plugin output, to be interpreted by a [`DecodingPlugin`]
    pub data: Vec<u8>,
}

/// An open replication session.
#[async_trait]
pub trait ReplicationSession: Send {
    /// Next pending message, or `None` when nothing is pending right now.
    async fn poll(&mut self) -> Result<Option<RawMessage>, SessionError>;

    /// Tell the server that everything up to `position` is durably stored.
    async fn confirm(&mut self, position: WalPosition) -> Result<(), SessionError>;

    /// Release the connection.
    async fn close(&mut self) -> Result<(), SessionError>;
}

/// Opens replication sessions.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Open a session on `slot`, creating the slot if missing, and make sure
    /// it does not replay anything before `start`.
    async fn open(
        &self,
        slot: &str,
        start: WalPosition,
    ) -> Result<Box<dyn ReplicationSession>, SessionError>;
}

const DEFAULT_PAGE_SIZE: usize = 1000;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens [`PgReplicationSession`]s against a PostgreSQL or openGauss server.
pub struct PgSessionFactory {
    config: tokio_postgres::Config,
    plugin: Arc<dyn DecodingPlugin>,
    page_size: usize,
}

impl PgSessionFactory {
    pub fn new(config: tokio_postgres::Config, plugin: Arc<dyn DecodingPlugin>) -> Self {
        Self {
            config,
            plugin,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Approximate number of changes fetched per round trip.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

#[async_trait]
impl SessionFactory for PgSessionFactory {
    async fn open(
        &self,
        slot: &str,
        start: WalPosition,
    ) -> Result<Box<dyn ReplicationSession>, SessionError> {
        let (client, connection) = self
            .config
            .connect(NoTls)
            .await
            .map_err(SessionError::Connect)?;

        let connection = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL replication connection error: {e}");
            }
        });

        let options = self
            .plugin
            .slot_options()
            .into_iter()
            .flat_map(|(name, value)| [name.to_string(), value.to_string()])
            .collect();

        let mut session = PgReplicationSession {
            client: Some(client),
            connection: Some(connection),
            slot: slot.to_string(),
            options,
            page_size: self.page_size,
            log: DeliveryLog::default(),
        };
        session
            .prepare_slot(self.plugin.output_plugin(), start)
            .await?;

        Ok(Box::new(session))
    }
}

/// Session reading a slot with `pg_logical_slot_peek_changes`.
pub struct PgReplicationSession {
    client: Option<Client>,
    connection: Option<JoinHandle<()>>,
    slot: String,
    /// Plugin options, flattened into name/value pairs
    options: Vec<String>,
    page_size: usize,
    log: DeliveryLog,
}

impl PgReplicationSession {
    fn client(&self) -> Result<&Client, SessionError> {
        self.client.as_ref().ok_or(SessionError::Closed)
    }

    async fn prepare_slot(
        &mut self,
        output_plugin: &str,
        start: WalPosition,
    ) -> Result<(), SessionError> {
        let client = self.client()?;
        let rows = client
            .query(
                "SELECT plugin::text, confirmed_flush_lsn::text FROM pg_replication_slots WHERE slot_name = $1",
                &[&self.slot],
            )
            .await
            .map_err(SessionError::query("Failed to check for existing replication slot"))?;

        let current = match rows.first() {
            Some(row) => {
                let plugin: Option<String> = row
                    .try_get(0)
                    .map_err(SessionError::query("Failed to read slot plugin"))?;
                if plugin.as_deref() != Some(output_plugin) {
                    warn!(
                        "Replication slot {} uses plugin {:?}, expected {}",
                        self.slot, plugin, output_plugin
                    );
                }
                let lsn: Option<String> = row
                    .try_get(1)
                    .map_err(SessionError::query("Failed to read slot position"))?;
                parse_position(lsn.as_deref())?
            }
            None => {
                info!(
                    "Creating logical replication slot {} with plugin {}",
                    self.slot, output_plugin
                );
                let row = client
                    .query_one(
                        "SELECT lsn::text FROM pg_create_logical_replication_slot($1, $2)",
                        &[&self.slot, &output_plugin],
                    )
                    .await
                    .map_err(SessionError::query("Failed to create logical replication slot"))?;
                let lsn: Option<String> = row
                    .try_get(0)
                    .map_err(SessionError::query("Failed to read created slot position"))?;
                parse_position(lsn.as_deref())?
            }
        };

        if start > current {
            info!(
                "Advancing replication slot {} from {} to {}",
                self.slot, current, start
            );
            self.advance(start).await?;
        } else if start < current && start != WalPosition::ZERO {
            warn!(
                "Replication slot {} is already at {}, ahead of the requested start {}; \
                 changes in between were confirmed earlier and cannot be replayed",
                self.slot, current, start
            );
        } else {
            debug!("Replication slot {} ready at {}", self.slot, current);
        }
        Ok(())
    }

    async fn advance(&self, position: WalPosition) -> Result<(), SessionError> {
        self.client()?
            .execute(
                "SELECT pg_replication_slot_advance($1, $2::text::pg_lsn)",
                &[&self.slot, &position.lsn.to_string()],
            )
            .await
            .map_err(SessionError::query("Failed to advance replication slot"))?;
        Ok(())
    }
}

#[async_trait]
impl ReplicationSession for PgReplicationSession {
    async fn poll(&mut self) -> Result<Option<RawMessage>, SessionError> {
        if let Some(message) = self.log.next() {
            return Ok(Some(message));
        }

        let limit = i32::try_from(self.log.peek_limit(self.page_size)).unwrap_or(i32::MAX);
        let rows = self
            .client()?
            .query(
                "SELECT lsn::text, xid::text, data FROM pg_logical_slot_peek_changes($1, NULL, $2, VARIADIC $3::text[])",
                &[&self.slot, &limit, &self.options],
            )
            .await
            .map_err(SessionError::query("Failed to peek changes from replication slot"))?;

        let page = rows
            .iter()
            .map(row_to_message)
            .collect::<Result<Vec<_>, _>>()?;
        self.log.accept_page(page);
        Ok(self.log.next())
    }

    async fn confirm(&mut self, position: WalPosition) -> Result<(), SessionError> {
        let Some(end) = self.log.release_through(position) else {
            return Ok(());
        };
        self.advance(end).await?;
        debug!("Confirmed replication slot {} through {}", self.slot, end);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        // Dropping the client ends the connection future
        self.client.take();
        let Some(connection) = self.connection.take() else {
            return Ok(());
        };

        let abort = connection.abort_handle();
        match tokio::time::timeout(CLOSE_TIMEOUT, connection).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SessionError::Disconnected(e.to_string())),
            Err(_) => {
                abort.abort();
                Err(SessionError::Disconnected(
                    "timed out waiting for the connection to close".to_string(),
                ))
            }
        }
    }
}

impl Drop for PgReplicationSession {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.abort();
        }
    }
}

fn parse_position(lsn: Option<&str>) -> Result<WalPosition, SessionError> {
    match lsn {
        None => Ok(WalPosition::ZERO),
        Some(text) => text
            .parse::<Lsn>()
            .map(WalPosition::new)
            .map_err(|e| SessionError::Protocol(e.to_string())),
    }
}

fn row_to_message(row: &Row) -> Result<RawMessage, SessionError> {
    let lsn: String = row
        .try_get(0)
        .map_err(SessionError::query("Failed to read change position"))?;
    let xid: Option<String> = row
        .try_get(1)
        .map_err(SessionError::query("Failed to read change xid"))?;
    let data: Option<String> = row
        .try_get(2)
        .map_err(SessionError::query("Failed to read change data"))?;

    Ok(RawMessage {
        position: parse_position(Some(&lsn))?,
        xid: xid.and_then(|x| x.parse().ok()),
        data: data.unwrap_or_default().into_bytes(),
    })
}

/// Bookkeeping of what a peeking session has handed out.
///
/// Every peek returns the slot's unconfirmed changes from the beginning, so
/// the log remembers how many of them were already delivered and skips those.
/// Pages end on transaction boundaries (the server only checks its row limit
/// after a commit), so a delivered transaction is complete unless the next
/// pending message still belongs to it.
#[derive(Debug, Default)]
struct DeliveryLog {
    pending: VecDeque<RawMessage>,
    delivered: VecDeque<DeliveredTransaction>,
    /// Messages at the head of the slot that were already delivered
    consumed: usize,
}

#[derive(Debug)]
struct DeliveredTransaction {
    xid: Option<u64>,
    end: WalPosition,
    messages: usize,
}

impl DeliveryLog {
    fn peek_limit(&self, page_size: usize) -> usize {
        self.consumed + page_size
    }

    fn accept_page(&mut self, page: Vec<RawMessage>) {
        self.pending
            .extend(page.into_iter().skip(self.consumed + self.pending.len()));
    }

    fn next(&mut self) -> Option<RawMessage> {
        let message = self.pending.pop_front()?;
        self.consumed += 1;

        match self.delivered.back_mut() {
            Some(tx) if tx.xid == message.xid => {
                tx.messages += 1;
                tx.end = tx.end.max(message.position);
            }
            _ => self.delivered.push_back(DeliveredTransaction {
                xid: message.xid,
                end: message.position,
                messages: 1,
            }),
        }
        Some(message)
    }

    fn is_complete(&self, index: usize) -> bool {
        if index + 1 < self.delivered.len() {
            return true;
        }
        match (self.delivered.get(index), self.pending.front()) {
            (Some(tx), Some(next)) => tx.xid != next.xid,
            _ => true,
        }
    }

    /// Forget complete transactions ending at or before `position`.
    ///
    /// Returns the end of the last released transaction, which is how far
    /// the slot may be advanced.
    fn release_through(&mut self, position: WalPosition) -> Option<WalPosition> {
        let mut released = None;
        while let Some(tx) = self.delivered.front() {
            if tx.end > position || !self.is_complete(0) {
                break;
            }
            let tx = self.delivered.pop_front()?;
            self.consumed -= tx.messages;
            released = Some(tx.end);
        }
        released
    }
}
