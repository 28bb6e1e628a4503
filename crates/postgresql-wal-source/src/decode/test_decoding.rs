//! PostgreSQL `test_decoding` output.
//!
//! ```text
//! BEGIN 529
//! table public.t_order: INSERT: order_id[integer]:1 status[character varying]:'PAID'
//! table public.t_order: UPDATE: old-key: order_id[integer]:1 new-tuple: order_id[integer]:2 status[character varying]:'SHIPPED'
//! table public.t_order: DELETE: order_id[integer]:2
//! COMMIT 529 (at 2024-03-01 10:15:30.123456+00)
//! ```

use chrono::{DateTime, Utc};

use super::{parse_literal, utf8, DecodingPlugin};
use crate::error::DecodeError;
use crate::event::{RawColumn, RowEvent, RowKind, WalEvent};
use crate::position::WalPosition;

/// Decoder for the `test_decoding` output plugin shipped with PostgreSQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestDecodingPlugin;

impl DecodingPlugin for TestDecodingPlugin {
    fn output_plugin(&self) -> &'static str {
        "test_decoding"
    }

    fn slot_options(&self) -> Vec<(&'static str, &'static str)> {
        vec![
            ("include-xids", "1"),
            ("include-timestamp", "1"),
            ("skip-empty-xacts", "1"),
        ]
    }

    fn decode(&self, raw: &[u8], reference: &WalPosition) -> Result<WalEvent, DecodeError> {
        let text = utf8(raw, reference)?.trim_end();

        if let Some(rest) = strip_keyword(text, "BEGIN") {
            return Ok(WalEvent::Begin {
                position: *reference,
                xid: parse_xid(rest, reference)?,
                csn: None,
            });
        }
        if let Some(rest) = strip_keyword(text, "COMMIT") {
            return decode_commit(rest, reference);
        }
        if let Some(rest) = text.strip_prefix("table ") {
            return decode_table(rest, reference);
        }
        if text.starts_with("message:") {
            return Ok(WalEvent::Placeholder {
                position: *reference,
            });
        }

        Err(DecodeError::unrecognized(reference, text))
    }
}

fn strip_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(keyword)?;
    if rest.is_empty() {
        Some(rest)
    } else {
        rest.strip_prefix(' ').map(str::trim_start)
    }
}

fn parse_xid(text: &str, reference: &WalPosition) -> Result<Option<u64>, DecodeError> {
    if text.is_empty() {
        return Ok(None);
    }
    text.parse()
        .map(Some)
        .map_err(|_| DecodeError::malformed(reference, format!("invalid xid '{text}'")))
}

fn decode_commit(rest: &str, reference: &WalPosition) -> Result<WalEvent, DecodeError> {
    let (xid, at) = match rest.find("(at ") {
        Some(idx) => (rest[..idx].trim_end(), Some(&rest[idx..])),
        None => (rest, None),
    };

    let commit_time = match at {
        Some(at) => {
            let ts = at
                .strip_prefix("(at ")
                .and_then(|s| s.strip_suffix(')'))
                .ok_or_else(|| DecodeError::malformed(reference, "unterminated commit timestamp"))?;
            let parsed = DateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S%.f%#z").map_err(|e| {
                DecodeError::malformed(reference, format!("invalid commit timestamp '{ts}': {e}"))
            })?;
            Some(parsed.with_timezone(&Utc))
        }
        None => None,
    };

    Ok(WalEvent::Commit {
        position: *reference,
        xid: parse_xid(xid, reference)?,
        csn: None,
        commit_time,
    })
}

fn decode_table(rest: &str, reference: &WalPosition) -> Result<WalEvent, DecodeError> {
    let malformed = |reason: String| DecodeError::malformed(reference, reason);

    let (first, rest) =
        take_identifier(rest, &['.', ':']).ok_or_else(|| malformed("bad table name".into()))?;
    let (schema, table, rest) = match rest.strip_prefix('.') {
        Some(rest) => {
            let (table, rest) = take_identifier(rest, &[':'])
                .ok_or_else(|| malformed("bad table name".into()))?;
            (first, table, rest)
        }
        None => (String::new(), first, rest),
    };

    let rest = rest
        .strip_prefix(": ")
        .ok_or_else(|| malformed("missing ':' after table name".into()))?;
    let (action, body) = rest
        .split_once(':')
        .ok_or_else(|| malformed("missing action".into()))?;
    let body = body.trim_start();

    let (kind, columns, old_keys) = match action {
        "INSERT" => (RowKind::Insert, parse_tuple(body).map_err(malformed)?, Vec::new()),
        "UPDATE" => {
            let (old_keys, body) = match body.strip_prefix("old-key:") {
                Some(old) => {
                    let (keys, tail) = parse_columns(old).map_err(malformed)?;
                    let tail = tail
                        .strip_prefix("new-tuple:")
                        .ok_or_else(|| malformed("old-key without new-tuple".into()))?;
                    (keys, tail)
                }
                None => (Vec::new(), body),
            };
            (RowKind::Update, parse_tuple(body).map_err(malformed)?, old_keys)
        }
        "DELETE" => (RowKind::Delete, parse_tuple(body).map_err(malformed)?, Vec::new()),
        "TRUNCATE" => {
            return Ok(WalEvent::Placeholder {
                position: *reference,
            })
        }
        other => {
            return Err(DecodeError::unrecognized(
                reference,
                &format!("table action '{other}'"),
            ))
        }
    };

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

/// Parse a whole tuple, which may be `(no-tuple-data)`.
fn parse_tuple(body: &str) -> Result<Vec<RawColumn>, String> {
    let body = body.trim();
    if body == "(no-tuple-data)" {
        return Ok(Vec::new());
    }
    let (columns, tail) = parse_columns(body)?;
    if !tail.trim().is_empty() {
        return Err(format!("unexpected trailing data '{}'", preview(tail)));
    }
    Ok(columns)
}

/// Parse `name[type]:value` entries up to the end or a `new-tuple:` marker.
fn parse_columns(mut s: &str) -> Result<(Vec<RawColumn>, &str), String> {
    let mut columns = Vec::new();
    loop {
        s = s.trim_start();
        if s.is_empty() || s.starts_with("new-tuple:") {
            return Ok((columns, s));
        }

        let (name, rest) = take_identifier(s, &['['])
            .ok_or_else(|| format!("bad column name near '{}'", preview(s)))?;
        let rest = rest
            .strip_prefix('[')
            .ok_or_else(|| format!("missing type for column '{name}'"))?;
        let end = rest
            .find("]:")
            .ok_or_else(|| format!("unterminated type for column '{name}'"))?;
        let type_name = &rest[..end];
        let (literal, rest) = take_literal(&rest[end + 2..])
            .ok_or_else(|| format!("unterminated value for column '{name}'"))?;

        columns.push(RawColumn::new(name, type_name, parse_literal(literal)));
        s = rest;
    }
}

/// Take a possibly double-quoted identifier ending before one of `terminators`.
fn take_identifier<'a>(s: &'a str, terminators: &[char]) -> Option<(String, &'a str)> {
    if let Some(quoted) = s.strip_prefix('"') {
        let mut name = String::new();
        let mut chars = quoted.char_indices().peekable();
        while let Some((idx, c)) = chars.next() {
            if c != '"' {
                name.push(c);
                continue;
            }
            if matches!(chars.peek(), Some((_, '"'))) {
                chars.next();
                name.push('"');
                continue;
            }
            return Some((name, &quoted[idx + 1..]));
        }
        return None;
    }

    let end = s.find(|c| terminators.contains(&c))?;
    if end == 0 {
        return None;
    }
    Some((s[..end].to_string(), &s[end..]))
}

/// Take a quoted (`'...'` with `''` escapes) or bare literal.
fn take_literal(s: &str) -> Option<(&str, &str)> {
    if !s.starts_with('\'') {
        let end = s.find(' ').unwrap_or(s.len());
        return Some((&s[..end], &s[end..]));
    }

    let bytes = s.as_bytes();
    let mut i = 1;
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            if bytes.get(i + 1) == Some(&b'\'') {
                i += 2;
                continue;
            }
            return Some((&s[..=i], &s[i + 1..]));
        }
        i += 1;
    }
    None
}

fn preview(s: &str) -> String {
    s.chars().take(40).collect()
}
