//! Decoded replication events.
//!
//! Every event carries the [`WalPosition`] the session reported for the
//! message it was decoded from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::position::WalPosition;

/// Row operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RowKind {
    Insert,
    Update,
    Delete,
}

impl RowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowKind::Insert => "INSERT",
            RowKind::Update => "UPDATE",
            RowKind::Delete => "DELETE",
        }
    }
}

/// Column value exactly as the decoding plugin printed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawValue {
    Null,
    /// Literal content with quoting removed
    Text(String),
    /// TOASTed value that was not part of the change
    UnchangedToast,
}

/// One column of a changed row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawColumn {
    pub name: String,
    /// Type name as reported by the server (e.g. `character varying`)
    pub type_name: String,
    pub value: RawValue,
}

impl RawColumn {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, value: RawValue) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            value,
        }
    }
}

/// A changed row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowEvent {
    pub position: WalPosition,
    pub kind: RowKind,
    pub schema: String,
    pub table: String,
    /// New tuple for insert/update, the deleted tuple (or its key) for delete
    pub columns: Vec<RawColumn>,
    /// Identity of the row before an update or delete, when the plugin sent one
    pub old_keys: Vec<RawColumn>,
    /// Transaction id, when known
    pub xid: Option<u64>,
    /// Commit sequence number, stamped when the transaction commits
    pub csn: Option<u64>,
}

impl RowEvent {
    /// `schema.table`, or just the table when no schema was reported.
    pub fn qualified_name(&self) -> String {
        if self.schema.is_empty() {
            self.table.clone()
        } else {
            format!("{}.{}", self.schema, self.table)
        }
    }
}

/// Replication event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalEvent {
    Begin {
        position: WalPosition,
        xid: Option<u64>,
        csn: Option<u64>,
    },
    Commit {
        position: WalPosition,
        xid: Option<u64>,
        csn: Option<u64>,
        commit_time: Option<DateTime<Utc>>,
    },
    Row(RowEvent),
    /// Recognised message without row data (e.g. `TRUNCATE`)
    Placeholder { position: WalPosition },
}

impl WalEvent {
    pub fn position(&self) -> WalPosition {
        match self {
            WalEvent::Begin { position, .. }
            | WalEvent::Commit { position, .. }
            | WalEvent::Placeholder { position } => *position,
            WalEvent::Row(row) => row.position,
        }
    }

    /// Short name for log messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            WalEvent::Begin { .. } => "BEGIN",
            WalEvent::Commit { .. } => "COMMIT",
            WalEvent::Row(row) => row.kind.as_str(),
            WalEvent::Placeholder { .. } => "PLACEHOLDER",
        }
    }
}
