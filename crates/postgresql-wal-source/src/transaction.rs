//! Transaction grouping.
//!
//! With grouping enabled the buffer holds the events of the open transaction
//! until its commit arrives, stamps every row with the commit's CSN, and
//! releases the rows plus the commit as one batch. Without grouping, events
//! are released one by one as they arrive.
//!
//! ```text
//!        Begin              Row*             Commit
//! Idle ─────────▶ Accumulating ──▶ Accumulating ─────────▶ Idle (flush batch)
//! ```

use std::mem;

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::error::DecodeError;
use crate::event::WalEvent;
use crate::position::WalPosition;

/// Events of one open transaction.
#[derive(Debug, Default)]
pub struct TransactionGroup {
    pub xid: Option<u64>,
    pub csn: Option<u64>,
    pub events: Vec<WalEvent>,
}

#[derive(Debug)]
enum BufferState {
    Idle,
    Accumulating(TransactionGroup),
}

/// Groups events by transaction, or passes them through.
#[derive(Debug)]
pub struct TransactionBuffer {
    grouped: bool,
    state: BufferState,
}

impl TransactionBuffer {
    /// Create a buffer. `grouped` enables buffering until commit.
    pub fn new(grouped: bool) -> Self {
        Self {
            grouped,
            state: BufferState::Idle,
        }
    }

    pub fn is_grouped(&self) -> bool {
        self.grouped
    }

    /// Whether no transaction is open.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, BufferState::Idle)
    }

    /// Number of events held for the open transaction.
    pub fn pending(&self) -> usize {
        match &self.state {
            BufferState::Idle => 0,
            BufferState::Accumulating(group) => group.events.len(),
        }
    }

    /// Drop any half-received transaction.
    ///
    /// Called when the session is reopened: the new session replays the
    /// transaction from its beginning.
    pub fn reset(&mut self) {
        if let BufferState::Accumulating(group) = &self.state {
            trace!(
                "Discarding {} buffered events of transaction {:?}",
                group.events.len(),
                group.xid
            );
        }
        self.state = BufferState::Idle;
    }

    /// Feed one event.
    ///
    /// Returns the events that are ready to be converted and pushed as one
    /// batch, or `None` when the event was absorbed.
    pub fn offer(&mut self, event: WalEvent) -> Result<Option<Vec<WalEvent>>, DecodeError> {
        if !self.grouped {
            return Ok(match event {
                WalEvent::Begin { .. } => None,
                other => Some(vec![other]),
            });
        }

        match (mem::replace(&mut self.state, BufferState::Idle), event) {
            (BufferState::Idle, WalEvent::Begin { xid, csn, .. }) => {
                self.state = BufferState::Accumulating(TransactionGroup {
                    xid,
                    csn,
                    events: Vec::new(),
                });
                Ok(None)
            }
            (BufferState::Idle, WalEvent::Placeholder { position }) => {
                Ok(Some(vec![WalEvent::Placeholder { position }]))
            }
            (BufferState::Idle, event) => Err(DecodeError::OutsideTransaction {
                event: event.kind_name(),
                position: event.position(),
            }),
            (BufferState::Accumulating(group), WalEvent::Begin { position, .. }) => {
                let err = DecodeError::malformed(
                    &position,
                    format!("BEGIN while transaction {:?} is still open", group.xid),
                );
                self.state = BufferState::Accumulating(group);
                Err(err)
            }
            (
                BufferState::Accumulating(mut group),
                event @ (WalEvent::Row(_) | WalEvent::Placeholder { .. }),
            ) => {
                group.events.push(event);
                self.state = BufferState::Accumulating(group);
                Ok(None)
            }
            (
                BufferState::Accumulating(group),
                WalEvent::Commit {
                    position,
                    xid,
                    csn,
                    commit_time,
                },
            ) => Ok(Some(flush(group, position, xid, csn, commit_time))),
        }
    }
}

fn flush(
    group: TransactionGroup,
    position: WalPosition,
    xid: Option<u64>,
    csn: Option<u64>,
    commit_time: Option<DateTime<Utc>>,
) -> Vec<WalEvent> {
    let csn = csn.or(group.csn);
    let xid = xid.or(group.xid);

    let mut batch: Vec<WalEvent> = group
        .events
        .into_iter()
        .map(|event| match event {
            WalEvent::Row(mut row) => {
                row.csn = csn;
                row.xid = row.xid.or(xid);
                WalEvent::Row(row)
            }
            other => other,
        })
        .collect();

    batch.push(WalEvent::Commit {
        position,
        xid,
        csn,
        commit_time,
    });
    batch
}
