//! Event to record conversion.
//!
//! Column literals are typed with the table definitions provided by a
//! [`MetadataLoader`]. A row whose table or column is unknown is an error,
//! never silently dropped; rows of tables outside the configured filter
//! become placeholders so the applier still sees the position advance.

use std::collections::HashSet;
use std::sync::Arc;

use ingest_core::{MetadataLoader, PipelineSqlOperationType, TableDefinition, UniversalValue};
use tracing::debug;

use crate::error::IngestError;
use crate::event::{RawColumn, RawValue, RowEvent, RowKind, WalEvent};
use crate::record::{Column, DataRecord, PlaceholderRecord, Record, TransactionRecord};

/// Converts [`WalEvent`]s into [`Record`]s.
#[derive(Clone)]
pub struct WalEventConverter {
    metadata: Arc<dyn MetadataLoader>,
    /// Tracked tables; `None` tracks every table
    table_filter: Option<HashSet<String>>,
}

impl WalEventConverter {
    pub fn new(metadata: Arc<dyn MetadataLoader>) -> Self {
        Self {
            metadata,
            table_filter: None,
        }
    }

    /// Only convert rows of `tables`. Entries may be qualified
    /// (`public.t_order`) or bare (`t_order`). An empty list tracks everything.
    pub fn with_table_filter<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tables: HashSet<String> = tables.into_iter().map(Into::into).collect();
        self.table_filter = if tables.is_empty() { None } else { Some(tables) };
        self
    }

    /// Whether rows of this table are converted rather than replaced by placeholders.
    pub fn is_tracked(&self, row: &RowEvent) -> bool {
        match &self.table_filter {
            None => true,
            Some(tables) => tables.contains(&row.table) || tables.contains(&row.qualified_name()),
        }
    }

    pub fn convert(&self, event: &WalEvent) -> Result<Record, IngestError> {
        match event {
            WalEvent::Row(row) if !self.is_tracked(row) => {
                debug!("Skipping row of untracked table {}", row.qualified_name());
                Ok(Record::Placeholder(PlaceholderRecord {
                    position: row.position,
                }))
            }
            WalEvent::Row(row) => self.convert_row(row).map(Record::Data),
            WalEvent::Begin { position, xid, csn } => Ok(Record::Transaction(TransactionRecord {
                xid: *xid,
                csn: *csn,
                commit_time: None,
                position: *position,
            })),
            WalEvent::Commit {
                position,
                xid,
                csn,
                commit_time,
            } => Ok(Record::Transaction(TransactionRecord {
                xid: *xid,
                csn: *csn,
                commit_time: *commit_time,
                position: *position,
            })),
            WalEvent::Placeholder { position } => Ok(Record::Placeholder(PlaceholderRecord {
                position: *position,
            })),
        }
    }

    fn convert_row(&self, row: &RowEvent) -> Result<DataRecord, IngestError> {
        let table_name = row.qualified_name();
        let table = self
            .metadata
            .table_definition(&table_name)
            .or_else(|| self.metadata.table_definition(&row.table))
            .ok_or_else(|| IngestError::MetadataUnavailable {
                table: table_name.clone(),
                column: None,
            })?;

        let unique_keys: Vec<String> = if row.old_keys.is_empty() {
            table.primary_key.clone()
        } else {
            row.old_keys.iter().map(|c| c.name.clone()).collect()
        };

        let columns = convert_columns(&table_name, table, &row.columns, &unique_keys)?;
        let old_keys = convert_columns(&table_name, table, &row.old_keys, &unique_keys)?;

        let (op, before, after) = match row.kind {
            RowKind::Insert => (PipelineSqlOperationType::Insert, Vec::new(), columns),
            RowKind::Update => {
                let before = if old_keys.is_empty() {
                    columns.iter().filter(|c| c.unique_key).cloned().collect()
                } else {
                    old_keys
                };
                (PipelineSqlOperationType::Update, before, columns)
            }
            RowKind::Delete => {
                let before = if old_keys.is_empty() { columns } else { old_keys };
                (PipelineSqlOperationType::Delete, before, Vec::new())
            }
        };

        Ok(DataRecord {
            table: table_name,
            op,
            before,
            after,
            unique_keys,
            xid: row.xid,
            csn: row.csn,
            position: row.position,
        })
    }
}

fn convert_columns(
    table_name: &str,
    table: &TableDefinition,
    raw: &[RawColumn],
    unique_keys: &[String],
) -> Result<Vec<Column>, IngestError> {
    raw.iter()
        .map(|column| {
            let ty = table.get_column_type(&column.name).ok_or_else(|| {
                IngestError::MetadataUnavailable {
                    table: table_name.to_string(),
                    column: Some(column.name.clone()),
                }
            })?;

            let value = match &column.value {
                RawValue::Null => UniversalValue::Null,
                RawValue::UnchangedToast => UniversalValue::Unchanged,
                RawValue::Text(text) => UniversalValue::from_pg_text(ty, text).map_err(|source| {
                    IngestError::Conversion {
                        table: table_name.to_string(),
                        column: column.name.clone(),
                        source,
                    }
                })?,
            };

            Ok(Column {
                name: column.name.clone(),
                value,
                unique_key: unique_keys.iter().any(|k| k == &column.name),
            })
        })
        .collect()
}
