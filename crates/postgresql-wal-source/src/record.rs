//! Engine-neutral records handed to the applier.

use chrono::{DateTime, Utc};
use ingest_core::{PipelineSqlOperationType, UniversalValue};
use serde::{Deserialize, Serialize};

use crate::position::WalPosition;

/// A typed column of a data record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub value: UniversalValue,
    /// Whether the column belongs to the row's unique key
    pub unique_key: bool,
}

/// A changed row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRecord {
    /// Qualified table name
    pub table: String,
    pub op: PipelineSqlOperationType,
    /// Row identity before an update, or the deleted row
    pub before: Vec<Column>,
    /// Row image after an insert or update
    pub after: Vec<Column>,
    /// Names of the columns identifying the row
    pub unique_keys: Vec<String>,
    pub xid: Option<u64>,
    pub csn: Option<u64>,
    pub position: WalPosition,
}

/// Transaction commit marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub xid: Option<u64>,
    pub csn: Option<u64>,
    pub commit_time: Option<DateTime<Utc>>,
    pub position: WalPosition,
}

/// Progress marker without data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceholderRecord {
    pub position: WalPosition,
}

/// Unit of work delivered through the pipeline channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Record {
    Data(DataRecord),
    Transaction(TransactionRecord),
    Placeholder(PlaceholderRecord),
}

impl Record {
    pub fn position(&self) -> WalPosition {
        match self {
            Record::Data(r) => r.position,
            Record::Transaction(r) => r.position,
            Record::Placeholder(r) => r.position,
        }
    }

    /// Operation type, for data records.
    pub fn operation(&self) -> Option<PipelineSqlOperationType> {
        match self {
            Record::Data(r) => Some(r.op),
            _ => None,
        }
    }

    pub fn csn(&self) -> Option<u64> {
        match self {
            Record::Data(r) => r.csn,
            Record::Transaction(r) => r.csn,
            Record::Placeholder(_) => None,
        }
    }
}

impl DataRecord {
    /// Look up a column of the after image, falling back to the before image.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.after
            .iter()
            .chain(self.before.iter())
            .find(|c| c.name == name)
    }
}
