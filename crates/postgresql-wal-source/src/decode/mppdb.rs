//! openGauss `mppdb_decoding` output.
//!
//! Transaction markers are text lines carrying `KEY: value` pairs, rows are
//! JSON objects:
//!
//! ```text
//! BEGIN CSN: 2014 first_lsn: 0/5F3A4C8
//! {"table_name":"public.t_order","op_type":"INSERT","columns_name":["order_id"],"columns_type":["integer"],"columns_val":["1"],"old_keys_name":[],"old_keys_type":[],"old_keys_val":[]}
//! commit xid: 15606 CSN: 2014
//! ```

use serde::Deserialize;

use super::{parse_literal, utf8, DecodingPlugin};
use crate::error::DecodeError;
use crate::event::{RawColumn, RawValue, RowEvent, RowKind, WalEvent};
use crate::position::WalPosition;

/// Decoder for the openGauss `mppdb_decoding` output plugin.
#[derive(Debug, Clone, Copy, Default)]
pub struct MppdbDecodingPlugin;

impl DecodingPlugin for MppdbDecodingPlugin {
    fn output_plugin(&self) -> &'static str {
        "mppdb_decoding"
    }

    fn slot_options(&self) -> Vec<(&'static str, &'static str)> {
        vec![("include-xids", "1"), ("skip-empty-xacts", "1")]
    }

    fn decode(&self, raw: &[u8], reference: &WalPosition) -> Result<WalEvent, DecodeError> {
        let text = utf8(raw, reference)?.trim();

        if text.starts_with('{') {
            return decode_row(text, reference);
        }

        let mut words = text.split_whitespace();
        match words.next() {
            Some("BEGIN") => {
                let (xid, csn) = scan_ids(text, reference)?;
                Ok(WalEvent::Begin {
                    position: *reference,
                    xid,
                    csn,
                })
            }
            Some("COMMIT") | Some("commit") => {
                let (xid, csn) = scan_ids(text, reference)?;
                Ok(WalEvent::Commit {
                    position: *reference,
                    xid,
                    csn,
                    commit_time: None,
                })
            }
            _ => Err(DecodeError::unrecognized(reference, text)),
        }
    }
}

/// Pick `XID: n` and `CSN: n` out of a transaction marker line.
fn scan_ids(
    text: &str,
    reference: &WalPosition,
) -> Result<(Option<u64>, Option<u64>), DecodeError> {
    let mut xid = None;
    let mut csn = None;
    let mut words = text.split_whitespace();

    while let Some(word) = words.next() {
        let slot = if word.eq_ignore_ascii_case("XID:") {
            &mut xid
        } else if word.eq_ignore_ascii_case("CSN:") {
            &mut csn
        } else {
            continue;
        };
        let value = words
            .next()
            .ok_or_else(|| DecodeError::malformed(reference, format!("{word} without a value")))?;
        *slot = Some(value.parse().map_err(|_| {
            DecodeError::malformed(reference, format!("invalid {word} value '{value}'"))
        })?);
    }

    Ok((xid, csn))
}

#[derive(Debug, Deserialize)]
struct MppdbRow {
    table_name: String,
    op_type: String,
    #[serde(default)]
    columns_name: Vec<String>,
    #[serde(default)]
    columns_type: Vec<String>,
    #[serde(default)]
    columns_val: Vec<Option<String>>,
    #[serde(default)]
    old_keys_name: Vec<String>,
    #[serde(default)]
    old_keys_type: Vec<String>,
    #[serde(default)]
    old_keys_val: Vec<Option<String>>,
}

fn decode_row(text: &str, reference: &WalPosition) -> Result<WalEvent, DecodeError> {
    let row: MppdbRow = serde_json::from_str(text)
        .map_err(|e| DecodeError::malformed(reference, format!("invalid row JSON: {e}")))?;

    let kind = match row.op_type.as_str() {
        "INSERT" => RowKind::Insert,
        "UPDATE" => RowKind::Update,
        "DELETE" => RowKind::Delete,
        other => {
            return Err(DecodeError::unrecognized(
                reference,
                &format!("op_type '{other}'"),
            ))
        }
    };

    let (schema, table) = match row.table_name.split_once('.') {
        Some((schema, table)) => (schema.to_string(), table.to_string()),
        None => (String::new(), row.table_name.clone()),
    };

    let columns = zip_columns(
        "columns",
        row.columns_name,
        row.columns_type,
        row.columns_val,
        reference,
    )?;
    let old_keys = zip_columns(
        "old_keys",
        row.old_keys_name,
        row.old_keys_type,
        row.old_keys_val,
        reference,
    )?;

    Ok(WalEvent::Row(RowEvent {
        position: *reference,
        kind,
        schema,
        table,
        columns,
        old_keys,
        xid: None,
        csn: None,
    }))
}

fn zip_columns(
    section: &str,
    names: Vec<String>,
    types: Vec<String>,
    values: Vec<Option<String>>,
    reference: &WalPosition,
) -> Result<Vec<RawColumn>, DecodeError> {
    if names.len() != types.len() || names.len() != values.len() {
        return Err(DecodeError::malformed(
            reference,
            format!(
                "{section} arrays differ in length: {} names, {} types, {} values",
                names.len(),
                types.len(),
                values.len()
            ),
        ));
    }

    Ok(names
        .into_iter()
        .zip(types)
        .zip(values)
        .map(|((name, type_name), value)| {
            let value = value.as_deref().map(parse_literal).unwrap_or(RawValue::Null);
            RawColumn::new(name, type_name, value)
        })
        .collect())
}
