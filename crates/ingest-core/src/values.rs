//! Engine-neutral column values.
//!
//! `UniversalValue` is what a converted row carries downstream. Logical
//! decoding plugins print column values as SQL text literals; the
//! [`UniversalValue::from_pg_text`] parser turns such a literal into a typed
//! value using the column's [`UniversalType`].

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::UniversalType;

/// Error returned when a text literal cannot be interpreted as its column type.
#[derive(Debug, thiserror::Error)]
#[error("cannot parse '{literal}' as {expected}: {reason}")]
pub struct ValueError {
    /// The literal as received from the decoder
    pub literal: String,
    /// The type the literal was parsed against
    pub expected: UniversalType,
    /// Parser message
    pub reason: String,
}

impl ValueError {
    fn new(literal: &str, expected: &UniversalType, reason: impl ToString) -> Self {
        Self {
            literal: literal.to_string(),
            expected: expected.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Typed column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum UniversalValue {
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    /// Decimal kept as its textual form to preserve precision
    Decimal {
        value: String,
        precision: u8,
        scale: u8,
    },
    Char {
        value: String,
        length: u16,
    },
    VarChar {
        value: String,
        length: u16,
    },
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    LocalDateTime(NaiveDateTime),
    ZonedDateTime(DateTime<Utc>),
    Uuid(Uuid),
    Json(Box<serde_json::Value>),
    Jsonb(Box<serde_json::Value>),
    Array {
        elements: Vec<UniversalValue>,
        element_type: Box<UniversalType>,
    },
    /// TOASTed value the source did not resend because it was not modified
    Unchanged,
}

impl UniversalValue {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Try to get this value as an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int16(i) => Some(*i as i64),
            Self::Int32(i) => Some(*i as i64),
            Self::Int64(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get this value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Char { value, .. } | Self::VarChar { value, .. } => Some(value),
            Self::Decimal { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Parse an unquoted SQL text literal as a value of type `ty`.
    ///
    /// The caller strips quoting; `text` is the literal's content, e.g.
    /// `2024-01-02 03:04:05.5+00` for a `timestamptz` or `\x0aff` for a `bytea`.
    pub fn from_pg_text(ty: &UniversalType, text: &str) -> Result<Self, ValueError> {
        match ty {
            UniversalType::Bool => match text {
                "t" | "true" | "TRUE" | "True" | "1" => Ok(Self::Bool(true)),
                "f" | "false" | "FALSE" | "False" | "0" => Ok(Self::Bool(false)),
                other => Err(ValueError::new(text, ty, format!("not a boolean: {other}"))),
            },
            UniversalType::Int16 => text.parse().map(Self::Int16).map_err(|e| ValueError::new(text, ty, e)),
            UniversalType::Int32 => text.parse().map(Self::Int32).map_err(|e| ValueError::new(text, ty, e)),
            UniversalType::Int64 => text.parse().map(Self::Int64).map_err(|e| ValueError::new(text, ty, e)),
            UniversalType::Float32 => parse_float(text)
                .map(|f| Self::Float32(f as f32))
                .map_err(|e| ValueError::new(text, ty, e)),
            UniversalType::Float64 => parse_float(text).map(Self::Float64).map_err(|e| ValueError::new(text, ty, e)),
            UniversalType::Decimal { precision, scale } => {
                let is_special = matches!(text, "NaN" | "Infinity" | "-Infinity");
                if !is_special && text.parse::<f64>().is_err() {
                    return Err(ValueError::new(text, ty, "not a decimal number"));
                }
                Ok(Self::Decimal {
                    value: text.to_string(),
                    precision: *precision,
                    scale: *scale,
                })
            }
            UniversalType::Char { length } => Ok(Self::Char {
                value: text.to_string(),
                length: *length,
            }),
            UniversalType::VarChar { length } => Ok(Self::VarChar {
                value: text.to_string(),
                length: *length,
            }),
            UniversalType::Text => Ok(Self::Text(text.to_string())),
            UniversalType::Bytes => {
                let hex_str = text
                    .strip_prefix("\\x")
                    .ok_or_else(|| ValueError::new(text, ty, "bytea literal must use hex format (\\x...)"))?;
                hex::decode(hex_str).map(Self::Bytes).map_err(|e| ValueError::new(text, ty, e))
            }
            UniversalType::Date => NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .map(Self::Date)
                .map_err(|e| ValueError::new(text, ty, e)),
            UniversalType::Time => NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
                .map(Self::Time)
                .map_err(|e| ValueError::new(text, ty, e)),
            UniversalType::LocalDateTime => parse_timestamp(text)
                .map(Self::LocalDateTime)
                .map_err(|e| ValueError::new(text, ty, e)),
            UniversalType::ZonedDateTime => parse_timestamptz(text)
                .map(Self::ZonedDateTime)
                .map_err(|e| ValueError::new(text, ty, e)),
            UniversalType::Uuid => Uuid::parse_str(text).map(Self::Uuid).map_err(|e| ValueError::new(text, ty, e)),
            UniversalType::Json => serde_json::from_str(text)
                .map(|v| Self::Json(Box::new(v)))
                .map_err(|e| ValueError::new(text, ty, e)),
            UniversalType::Jsonb => serde_json::from_str(text)
                .map(|v| Self::Jsonb(Box::new(v)))
                .map_err(|e| ValueError::new(text, ty, e)),
            UniversalType::Array { element_type } => {
                let elements = split_pg_array(text).map_err(|e| ValueError::new(text, ty, e))?;
                let elements = elements
                    .into_iter()
                    .map(|element| match element {
                        None => Ok(Self::Null),
                        Some(s) => Self::from_pg_text(element_type, &s),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::Array {
                    elements,
                    element_type: element_type.clone(),
                })
            }
        }
    }
}

fn parse_float(text: &str) -> Result<f64, std::num::ParseFloatError> {
    match text {
        "Infinity" => Ok(f64::INFINITY),
        "-Infinity" => Ok(f64::NEG_INFINITY),
        "NaN" => Ok(f64::NAN),
        other => other.parse(),
    }
}

/// Parse `YYYY-MM-DD HH:MM:SS[.ffffff]`.
fn parse_timestamp(text: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
}

/// Parse `YYYY-MM-DD HH:MM:SS[.ffffff]+HH[:MM]` into UTC.
///
/// PostgreSQL prints offsets as `+00` or `+05:30`; chrono's `%#z` accepts both.
fn parse_timestamptz(text: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::<FixedOffset>::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z")
        .or_else(|_| DateTime::<FixedOffset>::parse_from_rfc3339(text))
        .map(|dt| dt.with_timezone(&Utc))
}

/// Split a one-dimensional PostgreSQL array literal (`{1,2,NULL,"a,b"}`).
///
/// Returns `None` for unquoted `NULL` elements.
fn split_pg_array(text: &str) -> Result<Vec<Option<String>>, String> {
    let inner = text
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(|| "array literal must be enclosed in braces".to_string())?;

    let mut elements = Vec::new();
    if inner.is_empty() {
        return Ok(elements);
    }

    let mut chars = inner.chars().peekable();
    loop {
        let mut current = String::new();
        let mut quoted = false;
        if chars.peek() == Some(&'"') {
            quoted = true;
            chars.next();
            loop {
                match chars.next() {
                    Some('\\') => match chars.next() {
                        Some(c) => current.push(c),
                        None => return Err("dangling escape in array literal".to_string()),
                    },
                    Some('"') => break,
                    Some(c) => current.push(c),
                    None => return Err("unterminated quoted array element".to_string()),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                if c == '{' {
                    return Err("multi-dimensional arrays are not supported".to_string());
                }
                current.push(c);
                chars.next();
            }
        }

        if !quoted && current == "NULL" {
            elements.push(None);
        } else {
            elements.push(Some(current));
        }

        match chars.next() {
            Some(',') => continue,
            None => break,
            Some(c) => return Err(format!("unexpected '{c}' after array element")),
        }
    }

    Ok(elements)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_integers() {
        assert_eq!(
            UniversalValue::from_pg_text(&UniversalType::Int32, "42").unwrap(),
            UniversalValue::Int32(42)
        );
        assert!(UniversalValue::from_pg_text(&UniversalType::Int16, "70000").is_err());
    }

    #[test]
    fn test_parse_bool_spellings() {
        assert_eq!(
            UniversalValue::from_pg_text(&UniversalType::Bool, "t").unwrap(),
            UniversalValue::Bool(true)
        );
        assert_eq!(
            UniversalValue::from_pg_text(&UniversalType::Bool, "false").unwrap(),
            UniversalValue::Bool(false)
        );
    }

    #[test]
    fn test_parse_decimal_keeps_text() {
        let ty = UniversalType::Decimal {
            precision: 10,
            scale: 2,
        };
        assert_eq!(
            UniversalValue::from_pg_text(&ty, "12345.67").unwrap(),
            UniversalValue::Decimal {
                value: "12345.67".to_string(),
                precision: 10,
                scale: 2
            }
        );
        assert!(UniversalValue::from_pg_text(&ty, "abc").is_err());
    }

    #[test]
    fn test_parse_bytea_hex() {
        assert_eq!(
            UniversalValue::from_pg_text(&UniversalType::Bytes, "\\x0aff").unwrap(),
            UniversalValue::Bytes(vec![0x0a, 0xff])
        );
        assert!(UniversalValue::from_pg_text(&UniversalType::Bytes, "0aff").is_err());
    }

    #[test]
    fn test_parse_timestamps() {
        let local =
            UniversalValue::from_pg_text(&UniversalType::LocalDateTime, "2024-01-02 03:04:05.5")
                .unwrap();
        let expected = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_milli_opt(3, 4, 5, 500)
            .unwrap();
        assert_eq!(local, UniversalValue::LocalDateTime(expected));

        let zoned = UniversalValue::from_pg_text(
            &UniversalType::ZonedDateTime,
            "2024-01-02 05:04:05+02",
        )
        .unwrap();
        let UniversalValue::ZonedDateTime(dt) = zoned else {
            panic!("expected zoned date time");
        };
        assert_eq!(dt.to_rfc3339(), "2024-01-02T03:04:05+00:00");
    }

    #[test]
    fn test_parse_array_with_nulls_and_quotes() {
        let ty = UniversalType::Array {
            element_type: Box::new(UniversalType::Text),
        };
        let value = UniversalValue::from_pg_text(&ty, r#"{a,NULL,"b,c","NULL"}"#).unwrap();
        assert_eq!(
            value,
            UniversalValue::Array {
                elements: vec![
                    UniversalValue::Text("a".to_string()),
                    UniversalValue::Null,
                    UniversalValue::Text("b,c".to_string()),
                    UniversalValue::Text("NULL".to_string()),
                ],
                element_type: Box::new(UniversalType::Text),
            }
        );
    }

    #[test]
    fn test_parse_empty_array() {
        let ty = UniversalType::Array {
            element_type: Box::new(UniversalType::Int32),
        };
        let value = UniversalValue::from_pg_text(&ty, "{}").unwrap();
        assert_eq!(
            value,
            UniversalValue::Array {
                elements: vec![],
                element_type: Box::new(UniversalType::Int32),
            }
        );
    }

    #[test]
    fn test_parse_json() {
        let value = UniversalValue::from_pg_text(&UniversalType::Jsonb, r#"{"a": 1}"#).unwrap();
        assert_eq!(
            value,
            UniversalValue::Jsonb(Box::new(serde_json::json!({"a": 1})))
        );
    }
}
