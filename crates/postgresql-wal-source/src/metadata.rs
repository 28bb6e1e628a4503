//! Table metadata loaded from the source database.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use ingest_core::{ColumnDefinition, DatabaseSchema, TableDefinition, UniversalType};
use tokio_postgres::Client;
use tracing::{debug, info};

/// Load definitions of the tables of `schema` from `information_schema`.
///
/// `tables` restricts the result; entries may be bare (`t_order`) or
/// qualified (`public.t_order`). An empty list loads every table of the
/// schema. Table names in the result are qualified.
pub async fn load_database_schema(
    client: &Client,
    schema: &str,
    tables: &[String],
) -> Result<DatabaseSchema> {
    let column_rows = client
        .query(
            "SELECT table_name::text, column_name::text, data_type::text, udt_name::text, \
                    is_nullable::text, character_maximum_length::int, \
                    numeric_precision::int, numeric_scale::int \
             FROM information_schema.columns \
             WHERE table_schema = $1 \
             ORDER BY table_name, ordinal_position",
            &[&schema],
        )
        .await
        .with_context(|| format!("Failed to read columns of schema '{schema}'"))?;

    let key_rows = client
        .query(
            "SELECT kcu.table_name::text, kcu.column_name::text \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
               ON tc.constraint_name = kcu.constraint_name \
              AND tc.table_schema = kcu.table_schema \
              AND tc.table_name = kcu.table_name \
             WHERE tc.constraint_type = 'PRIMARY KEY' AND tc.table_schema = $1 \
             ORDER BY kcu.table_name, kcu.ordinal_position",
            &[&schema],
        )
        .await
        .with_context(|| format!("Failed to read primary keys of schema '{schema}'"))?;

    let mut columns: BTreeMap<String, Vec<ColumnDefinition>> = BTreeMap::new();
    for row in &column_rows {
        let table: String = row.try_get(0)?;
        if !wants_table(tables, schema, &table) {
            continue;
        }
        let name: String = row.try_get(1)?;
        let type_name = column_type_name(
            &row.try_get::<_, String>(2)?,
            &row.try_get::<_, String>(3)?,
            row.try_get(5)?,
            row.try_get(6)?,
            row.try_get(7)?,
        );
        let column_type = UniversalType::from_pg_type_name(&type_name);
        let nullable: String = row.try_get(4)?;
        debug!("{schema}.{table}.{name}: {type_name} -> {column_type}");

        let definition = if nullable == "YES" {
            ColumnDefinition::nullable(name, column_type)
        } else {
            ColumnDefinition::new(name, column_type)
        };
        columns.entry(table).or_default().push(definition);
    }

    let mut keys: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for row in &key_rows {
        let table: String = row.try_get(0)?;
        let column: String = row.try_get(1)?;
        keys.entry(table).or_default().push(column);
    }

    let definitions: Vec<TableDefinition> = columns
        .into_iter()
        .map(|(table, columns)| {
            let primary_key = keys.remove(&table).unwrap_or_default();
            TableDefinition::new(format!("{schema}.{table}"), columns, primary_key)
        })
        .collect();

    info!(
        "Loaded metadata of {} tables from schema '{schema}'",
        definitions.len()
    );
    Ok(DatabaseSchema::new(definitions))
}

fn wants_table(tables: &[String], schema: &str, table: &str) -> bool {
    tables.is_empty()
        || tables.iter().any(|t| {
            t == table
                || t.split_once('.')
                    .is_some_and(|(s, name)| s == schema && name == table)
        })
}

/// Rebuild a type name [`UniversalType::from_pg_type_name`] understands from
/// the pieces `information_schema.columns` reports.
fn column_type_name(
    data_type: &str,
    udt_name: &str,
    char_length: Option<i32>,
    precision: Option<i32>,
    scale: Option<i32>,
) -> String {
    match (data_type, char_length, precision, scale) {
        ("ARRAY" | "USER-DEFINED", ..) => udt_name.to_string(),
        ("character varying", None, ..) => "text".to_string(),
        ("character varying" | "character", Some(len), ..) => format!("{data_type}({len})"),
        ("numeric", _, Some(p), Some(s)) => format!("numeric({p},{s})"),
        _ => data_type.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_type_name() {
        assert_eq!(column_type_name("integer", "int4", None, Some(32), Some(0)), "integer");
        assert_eq!(
            column_type_name("character varying", "varchar", Some(32), None, None),
            "character varying(32)"
        );
        assert_eq!(column_type_name("character varying", "varchar", None, None, None), "text");
        assert_eq!(column_type_name("numeric", "numeric", None, Some(10), Some(2)), "numeric(10,2)");
        assert_eq!(column_type_name("numeric", "numeric", None, None, None), "numeric");
        assert_eq!(column_type_name("ARRAY", "_int4", None, None, None), "_int4");
    }

    #[test]
    fn test_type_names_map_onto_universal_types() {
        let ty = |name: String| UniversalType::from_pg_type_name(&name);
        assert_eq!(
            ty(column_type_name("numeric", "numeric", None, Some(10), Some(2))),
            UniversalType::Decimal {
                precision: 10,
                scale: 2
            }
        );
        assert_eq!(
            ty(column_type_name("ARRAY", "_int4", None, None, None)),
            UniversalType::Array {
                element_type: Box::new(UniversalType::Int32)
            }
        );
    }

    #[test]
    fn test_wants_table() {
        let tables = vec!["t_order".to_string(), "public.t_item".to_string()];
        assert!(wants_table(&tables, "public", "t_order"));
        assert!(wants_table(&tables, "public", "t_item"));
        assert!(!wants_table(&tables, "sales", "t_item"));
        assert!(!wants_table(&tables, "public", "t_audit"));
        assert!(wants_table(&[], "public", "t_audit"));
    }
}
