//! Dumper lifecycle.
//!
//! A [`WalDumper`] owns the read loop of one job: it opens a replication
//! session at the last known position, decodes and converts every message,
//! pushes the resulting records into the pipeline channel and publishes the
//! position it reached. Session failures are retried with a fixed backoff up
//! to [`ReconnectPolicy::max_attempts`] consecutive failures; every other
//! error ends the job.
//!
//! ```text
//! Created ──start──▶ Running ◀──────────▶ Reconnecting { attempt }
//!                       │                        │
//!                     stop                  exhausted / fatal
//!                       ▼                        ▼
//!                   Stopping ──▶ Stopped       Failed
//! ```
//!
//! [`ReconnectPolicy::max_attempts`]: crate::config::ReconnectPolicy::max_attempts

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use ingest_core::{JobRateLimiter, PipelineSender};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::{DataSourceConfig, DumperConfig};
use crate::converter::WalEventConverter;
use crate::decode::DecodingPlugin;
use crate::error::IngestError;
use crate::event::WalEvent;
use crate::position::WalPosition;
use crate::record::Record;
use crate::session::{PgSessionFactory, RawMessage, ReplicationSession, SessionFactory};
use crate::transaction::TransactionBuffer;

/// Lifecycle state of a dumper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumperState {
    Created,
    Running,
    /// Waiting to reopen the session after `attempt` consecutive failures
    Reconnecting { attempt: u32 },
    Stopping,
    Stopped,
    Failed,
}

impl DumperState {
    /// Whether the read loop is live (running or about to reconnect).
    pub fn is_active(self) -> bool {
        matches!(self, DumperState::Running | DumperState::Reconnecting { .. })
    }
}

/// Reads one replication slot into a pipeline channel.
pub struct WalDumper {
    config: DumperConfig,
    plugin: Arc<dyn DecodingPlugin>,
    converter: WalEventConverter,
    channel: PipelineSender<Record>,
    sessions: Arc<dyn SessionFactory>,
    start: WalPosition,
    rate_limiter: Option<Arc<JobRateLimiter>>,
    durable: Option<watch::Receiver<WalPosition>>,
    state: Arc<watch::Sender<DumperState>>,
}

impl WalDumper {
    /// Create a dumper reading from a standard PostgreSQL/openGauss source.
    pub fn new(
        source: &DataSourceConfig,
        config: DumperConfig,
        plugin: Arc<dyn DecodingPlugin>,
        converter: WalEventConverter,
        channel: PipelineSender<Record>,
    ) -> Result<Self, IngestError> {
        let pg_config = source.pg_config()?;
        let sessions = Arc::new(PgSessionFactory::new(pg_config, Arc::clone(&plugin)));
        Ok(Self::with_session_factory(
            sessions, config, plugin, converter, channel,
        ))
    }

    /// Create a dumper opening its sessions through `sessions`.
    pub fn with_session_factory(
        sessions: Arc<dyn SessionFactory>,
        config: DumperConfig,
        plugin: Arc<dyn DecodingPlugin>,
        converter: WalEventConverter,
        channel: PipelineSender<Record>,
    ) -> Self {
        let (state, _) = watch::channel(DumperState::Created);
        Self {
            config,
            plugin,
            converter,
            channel,
            sessions,
            start: WalPosition::ZERO,
            rate_limiter: None,
            durable: None,
            state: Arc::new(state),
        }
    }

    /// Resume from a previously recorded position.
    pub fn start_from(mut self, position: WalPosition) -> Self {
        self.start = position;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<JobRateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Only confirm positions to the server once they show up on `durable`.
    ///
    /// Without a durable feed every pushed position is confirmed immediately.
    pub fn with_durable_positions(mut self, durable: watch::Receiver<WalPosition>) -> Self {
        self.durable = Some(durable);
        self
    }

    pub fn state(&self) -> DumperState {
        *self.state.borrow()
    }

    /// Spawn the read loop.
    pub fn start(self) -> DumperHandle {
        let cancel = CancellationToken::new();
        let reconnects = Arc::new(AtomicU32::new(0));
        let (positions_tx, positions) = watch::channel(self.start);
        self.state.send_replace(DumperState::Running);

        info!(
            "Starting WAL dumper for job {} on slot {} from {} ({})",
            self.config.job_id,
            self.config.slot_name,
            self.start,
            if self.config.decode_with_tx {
                "grouped by transaction"
            } else {
                "pass-through"
            }
        );

        let read_loop = ReadLoop {
            buffer: TransactionBuffer::new(self.config.decode_with_tx),
            position: self.start,
            start: self.start,
            config: self.config,
            plugin: self.plugin,
            converter: self.converter,
            channel: self.channel,
            sessions: self.sessions,
            rate_limiter: self.rate_limiter,
            durable: self.durable,
            cancel: cancel.clone(),
            state: Arc::clone(&self.state),
            reconnects: Arc::clone(&reconnects),
            positions: positions_tx,
        };

        DumperHandle {
            cancel,
            state: self.state,
            reconnects,
            positions,
            task: tokio::spawn(read_loop.run()),
        }
    }
}

/// Control surface of a running dumper.
pub struct DumperHandle {
    cancel: CancellationToken,
    state: Arc<watch::Sender<DumperState>>,
    reconnects: Arc<AtomicU32>,
    positions: watch::Receiver<WalPosition>,
    task: JoinHandle<Result<WalPosition, IngestError>>,
}

impl DumperHandle {
    /// Ask the read loop to stop. Safe to call any number of times.
    pub fn stop(&self) {
        let stopping = self.state.send_if_modified(|state| {
            if state.is_active() {
                *state = DumperState::Stopping;
                true
            } else {
                false
            }
        });
        if stopping {
            info!("Stopping WAL dumper");
        }
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.state().is_active()
    }

    pub fn state(&self) -> DumperState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn states(&self) -> watch::Receiver<DumperState> {
        self.state.subscribe()
    }

    /// Consecutive session failures since the last successful poll.
    pub fn reconnect_count(&self) -> u32 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Positions reached by the read loop, published after each push.
    pub fn positions(&self) -> watch::Receiver<WalPosition> {
        self.positions.clone()
    }

    pub fn position(&self) -> WalPosition {
        *self.positions.borrow()
    }

    /// Wait for the read loop to end.
    ///
    /// Returns the last position reached when stopped, or the error that
    /// ended the job.
    pub async fn wait(self) -> Result<WalPosition, IngestError> {
        self.task
            .await
            .map_err(|e| IngestError::Worker(e.to_string()))?
    }
}

struct ReadLoop {
    config: DumperConfig,
    plugin: Arc<dyn DecodingPlugin>,
    converter: WalEventConverter,
    channel: PipelineSender<Record>,
    sessions: Arc<dyn SessionFactory>,
    rate_limiter: Option<Arc<JobRateLimiter>>,
    durable: Option<watch::Receiver<WalPosition>>,
    buffer: TransactionBuffer,
    /// Position of the last pushed record
    position: WalPosition,
    start: WalPosition,
    cancel: CancellationToken,
    state: Arc<watch::Sender<DumperState>>,
    reconnects: Arc<AtomicU32>,
    positions: watch::Sender<WalPosition>,
}

impl ReadLoop {
    async fn run(mut self) -> Result<WalPosition, IngestError> {
        let policy = self.config.reconnect;
        let mut failures = 0u32;

        loop {
            let resume = self.resume_position();
            let opened = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                opened = self.sessions.open(&self.config.slot_name, resume) => opened,
            };

            let outcome = match opened {
                Ok(mut session) => {
                    debug!(
                        "Opened replication session on slot {} at {}",
                        self.config.slot_name, resume
                    );
                    let outcome = self.drive(session.as_mut(), &mut failures).await;
                    if let Err(e) = session.close().await {
                        warn!("Failed to close replication session: {e}");
                    }
                    outcome
                }
                Err(e) => Err(IngestError::Session(e)),
            };

            match outcome {
                Ok(()) => break,
                Err(IngestError::Session(source)) => {
                    failures += 1;
                    self.reconnects.store(failures, Ordering::Relaxed);
                    if failures >= policy.max_attempts {
                        error!(
                            "Replication session failed {failures} times in a row, giving up: {source}"
                        );
                        self.transition(DumperState::Failed);
                        return Err(IngestError::ReconnectExhausted {
                            attempts: failures,
                            source,
                        });
                    }

                    warn!(
                        "Replication session failed (attempt {}/{}): {}; reopening in {:?}",
                        failures, policy.max_attempts, source, policy.backoff
                    );
                    self.transition(DumperState::Reconnecting { attempt: failures });
                    self.buffer.reset();

                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(policy.backoff) => {}
                    }
                }
                Err(e) => {
                    error!("WAL dumper for job {} failed: {e}", self.config.job_id);
                    self.transition(DumperState::Failed);
                    return Err(e);
                }
            }
        }

        self.transition(DumperState::Stopped);
        info!(
            "WAL dumper for job {} stopped at {}",
            self.config.job_id, self.position
        );
        Ok(self.position)
    }

    /// Read one session until it fails or the dumper is stopped.
    async fn drive(
        &mut self,
        session: &mut dyn ReplicationSession,
        failures: &mut u32,
    ) -> Result<(), IngestError> {
        let mut confirmed = self.resume_position();

        loop {
            if let Some(durable) = self.durable_position() {
                if durable > confirmed {
                    session.confirm(durable).await?;
                    confirmed = durable;
                }
            }

            let polled = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                polled = session.poll() => polled?,
            };

            if *failures > 0 {
                info!("Replication session recovered after {failures} failures");
                *failures = 0;
                self.reconnects.store(0, Ordering::Relaxed);
                self.transition(DumperState::Running);
            }

            match polled {
                Some(message) => {
                    self.process(message).await?;
                    if self.durable.is_none() && self.position > confirmed {
                        session.confirm(self.position).await?;
                        confirmed = self.position;
                    }
                }
                None => {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(self.config.reconnect.idle_backoff) => {}
                    }
                }
            }
        }
    }

    async fn process(&mut self, message: RawMessage) -> Result<(), IngestError> {
        let event = self.plugin.decode(&message.data, &message.position)?;
        trace!("Decoded {} at {}", event.kind_name(), message.position);

        let Some(batch) = self.buffer.offer(event)? else {
            return Ok(());
        };
        let end = batch
            .iter()
            .map(WalEvent::position)
            .max()
            .unwrap_or(message.position);

        // A reopened session replays everything after the durable position;
        // transactions committed at or before the pushed position are already
        // in the channel.
        if self.buffer.is_grouped() && end <= self.position {
            debug!("Skipping already delivered transaction ending at {end}");
            return Ok(());
        }

        let records = batch
            .iter()
            .map(|event| self.converter.convert(event))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(limiter) = &self.rate_limiter {
            for op in records.iter().filter_map(Record::operation) {
                limiter.intercept(op, 1).await;
            }
        }

        let count = records.len();
        self.channel.push(records).await?;
        self.position = self.position.max(end);
        self.positions.send_replace(self.position);
        trace!("Pushed {count} records, position {}", self.position);
        Ok(())
    }

    fn durable_position(&self) -> Option<WalPosition> {
        self.durable.as_ref().map(|rx| *rx.borrow())
    }

    /// Where a new session starts: the last durable position when durability
    /// is tracked, otherwise the last pushed position.
    fn resume_position(&self) -> WalPosition {
        match self.durable_position() {
            Some(durable) => durable.max(self.start),
            None => self.position,
        }
    }

    fn transition(&self, next: DumperState) {
        self.state.send_if_modified(|current| {
            let keep_stopping = *current == DumperState::Stopping && next.is_active();
            if *current == next || keep_stopping {
                return false;
            }
            debug!("WAL dumper state {:?} -> {:?}", current, next);
            *current = next;
            true
        });
    }
}
