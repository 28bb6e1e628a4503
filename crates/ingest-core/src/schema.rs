//! Table metadata used to interpret changed rows.
//!
//! ## Type Hierarchy
//!
//! - `ColumnDefinition` - Single column metadata
//! - `TableDefinition` - Table with columns and primary key
//! - `DatabaseSchema` - Collection of tables, usable as a [`MetadataLoader`]

use crate::types::UniversalType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Error type for schema operations.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// Error reading schema file
    #[error("Failed to read schema file: {0}")]
    IoError(#[from] std::io::Error),

    /// Error parsing schema JSON
    #[error("Failed to parse schema: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Table not found in schema
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// Column not found in table schema
    #[error("Column '{column}' not found in table '{table}'")]
    ColumnNotFound { table: String, column: String },
}

/// Column definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnDefinition {
    /// Column name
    pub name: String,

    /// Column type
    #[serde(rename = "type")]
    pub column_type: UniversalType,

    /// Whether this column is nullable
    #[serde(default)]
    pub nullable: bool,
}

impl ColumnDefinition {
    /// Create a new column definition.
    pub fn new(name: impl Into<String>, column_type: UniversalType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
        }
    }

    /// Create a new nullable column definition.
    pub fn nullable(name: impl Into<String>, column_type: UniversalType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
        }
    }
}

/// Table schema definition.
///
/// `name` is the table's qualified name as the decoder reports it
/// (`schema.table`). Primary key columns form the row identity for
/// updates and deletes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableDefinition {
    /// Qualified table name
    pub name: String,

    /// Column definitions in ordinal order
    pub columns: Vec<ColumnDefinition>,

    /// Names of the primary key columns, in key order
    #[serde(default)]
    pub primary_key: Vec<String>,
}

impl TableDefinition {
    /// Create a new table definition.
    pub fn new(
        name: impl Into<String>,
        columns: Vec<ColumnDefinition>,
        primary_key: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            columns,
            primary_key,
        }
    }

    /// Get a column by name.
    pub fn get_column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Get the type of a column by name.
    pub fn get_column_type(&self, name: &str) -> Option<&UniversalType> {
        self.get_column(name).map(|c| &c.column_type)
    }

    /// Whether `name` is part of the primary key.
    pub fn is_primary_key(&self, name: &str) -> bool {
        self.primary_key.iter().any(|pk| pk == name)
    }

    /// Get all column names.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Source of table metadata for the event converter.
///
/// Implementations must be able to answer for every table whose rows reach
/// the converter; a `None` answer is treated as a fatal metadata error.
pub trait MetadataLoader: Send + Sync {
    /// Look up the definition of a qualified table name.
    fn table_definition(&self, table: &str) -> Option<&TableDefinition>;
}

/// Database schema (collection of tables).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSchema {
    /// Table definitions
    pub tables: Vec<TableDefinition>,

    /// Cached table lookup (not serialized)
    #[serde(skip)]
    table_map: HashMap<String, usize>,
}

impl DatabaseSchema {
    /// Create a new database schema from a list of table definitions.
    pub fn new(tables: Vec<TableDefinition>) -> Self {
        let mut schema = Self {
            tables,
            table_map: HashMap::new(),
        };
        schema.build_table_map();
        schema
    }

    /// Load a schema previously written as JSON.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SchemaError> {
        let content = fs::read_to_string(path)?;
        let schema: DatabaseSchema = serde_json::from_str(&content)?;
        Ok(Self::new(schema.tables))
    }

    /// Build the internal table lookup map.
    fn build_table_map(&mut self) {
        self.table_map = self
            .tables
            .iter()
            .enumerate()
            .map(|(idx, table)| (table.name.clone(), idx))
            .collect();
    }

    /// Get a table schema by name.
    pub fn get_table(&self, name: &str) -> Option<&TableDefinition> {
        self.table_map
            .get(name)
            .and_then(|&idx| self.tables.get(idx))
    }

    /// Get the type of a column in a specific table.
    pub fn get_column_type(
        &self,
        table: &str,
        column: &str,
    ) -> Result<&UniversalType, SchemaError> {
        let table_schema = self
            .get_table(table)
            .ok_or_else(|| SchemaError::TableNotFound(table.to_string()))?;

        table_schema
            .get_column_type(column)
            .ok_or_else(|| SchemaError::ColumnNotFound {
                table: table.to_string(),
                column: column.to_string(),
            })
    }

    /// Get all table names in the schema.
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Add a table to the schema, replacing any previous definition.
    pub fn add_table(&mut self, table: TableDefinition) {
        if let Some(&idx) = self.table_map.get(&table.name) {
            self.tables[idx] = table;
            return;
        }
        let idx = self.tables.len();
        self.table_map.insert(table.name.clone(), idx);
        self.tables.push(table);
    }
}

impl MetadataLoader for DatabaseSchema {
    fn table_definition(&self, table: &str) -> Option<&TableDefinition> {
        self.get_table(table)
    }
}
