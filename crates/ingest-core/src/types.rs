//! Universal data types for wal-ingest.
//!
//! This module defines `UniversalType`, the engine-neutral type universe that
//! column metadata is expressed in. Source-specific type names (for example the
//! names PostgreSQL and openGauss print in their logical decoding output) are
//! mapped onto it by [`UniversalType::from_pg_type_name`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Universal data type representation.
///
/// `UniversalType` represents the conceptual type of a column, not any
/// database's specific spelling of it. Values of each type are carried by
/// [`crate::UniversalValue`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UniversalType {
    /// Boolean value
    Bool,

    /// 16-bit signed integer
    Int16,

    /// 32-bit signed integer
    Int32,

    /// 64-bit signed integer
    Int64,

    /// 32-bit IEEE 754 floating point
    Float32,

    /// 64-bit IEEE 754 floating point
    Float64,

    /// Exact decimal with specified precision and scale
    Decimal {
        /// Total number of digits
        precision: u8,
        /// Number of digits after the decimal point
        scale: u8,
    },

    /// Fixed-length character string
    Char {
        /// Maximum length
        length: u16,
    },

    /// Variable-length character string with max length
    VarChar {
        /// Maximum length
        length: u16,
    },

    /// Unlimited text
    Text,

    /// Binary data
    Bytes,

    /// Date only (YYYY-MM-DD)
    Date,

    /// Time only (HH:MM:SS)
    Time,

    /// Timestamp without timezone (microsecond precision)
    LocalDateTime,

    /// Timestamp with timezone
    ZonedDateTime,

    /// UUID (128-bit)
    Uuid,

    /// JSON document
    Json,

    /// Binary JSON (PostgreSQL JSONB)
    Jsonb,

    /// Array of a specific type
    Array {
        /// Element type
        element_type: Box<UniversalType>,
    },
}

impl UniversalType {
    /// Map a PostgreSQL / openGauss type name onto the universal type.
    ///
    /// Accepts both the SQL-standard spellings printed by logical decoding
    /// (`character varying(20)`, `timestamp without time zone`) and the
    /// internal aliases (`int4`, `float8`, `_int4` for arrays). Unknown type
    /// names fall back to [`UniversalType::Text`] so user-defined types still
    /// reach the applier in their textual form.
    pub fn from_pg_type_name(name: &str) -> Self {
        let name = name.trim().to_ascii_lowercase();

        if let Some(element) = name.strip_suffix("[]") {
            return Self::Array {
                element_type: Box::new(Self::from_pg_type_name(element)),
            };
        }
        if let Some(element) = name.strip_prefix('_') {
            return Self::Array {
                element_type: Box::new(Self::from_pg_type_name(element)),
            };
        }

        let (base, modifiers) = split_type_modifiers(&name);

        match base.as_str() {
            "boolean" | "bool" => Self::Bool,
            "smallint" | "int2" | "smallserial" => Self::Int16,
            "integer" | "int" | "int4" | "serial" => Self::Int32,
            "bigint" | "int8" | "bigserial" | "oid" => Self::Int64,
            "real" | "float4" => Self::Float32,
            "double precision" | "float8" => Self::Float64,
            "numeric" | "decimal" => {
                let precision = modifiers.first().copied().unwrap_or(38).min(u8::MAX as u32);
                let scale = modifiers.get(1).copied().unwrap_or(10).min(u8::MAX as u32);
                Self::Decimal {
                    precision: precision as u8,
                    scale: scale as u8,
                }
            }
            "character varying" | "varchar" | "nvarchar2" | "varchar2" => Self::VarChar {
                length: modifiers.first().copied().unwrap_or(255).min(u16::MAX as u32) as u16,
            },
            "character" | "char" | "bpchar" => Self::Char {
                length: modifiers.first().copied().unwrap_or(1).min(u16::MAX as u32) as u16,
            },
            "text" | "name" | "clob" => Self::Text,
            "bytea" | "blob" | "raw" => Self::Bytes,
            "date" => Self::Date,
            "time" | "time without time zone" => Self::Time,
            "timestamp" | "timestamp without time zone" | "smalldatetime" => Self::LocalDateTime,
            "timestamptz" | "timestamp with time zone" => Self::ZonedDateTime,
            "uuid" => Self::Uuid,
            "json" => Self::Json,
            "jsonb" => Self::Jsonb,
            _ => Self::Text,
        }
    }
}

/// Split `numeric(10,2)` into `("numeric", [10, 2])` and
/// `timestamp(6) with time zone` into `("timestamp with time zone", [6])`.
fn split_type_modifiers(name: &str) -> (String, Vec<u32>) {
    let (Some(open), Some(close)) = (name.find('('), name.find(')')) else {
        return (name.to_string(), Vec::new());
    };
    if close < open {
        return (name.to_string(), Vec::new());
    }
    let modifiers = name[open + 1..close]
        .split(',')
        .filter_map(|m| m.trim().parse::<u32>().ok())
        .collect();
    let base = format!("{} {}", name[..open].trim_end(), name[close + 1..].trim_start());
    (base.trim().to_string(), modifiers)
}

impl fmt::Display for UniversalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => f.write_str("bool"),
            Self::Int16 => f.write_str("small_int"),
            Self::Int32 => f.write_str("int"),
            Self::Int64 => f.write_str("big_int"),
            Self::Float32 => f.write_str("float"),
            Self::Float64 => f.write_str("double"),
            Self::Decimal { precision, scale } => write!(f, "decimal({precision},{scale})"),
            Self::Char { length } => write!(f, "char({length})"),
            Self::VarChar { length } => write!(f, "var_char({length})"),
            Self::Text => f.write_str("text"),
            Self::Bytes => f.write_str("bytes"),
            Self::Date => f.write_str("date"),
            Self::Time => f.write_str("time"),
            Self::LocalDateTime => f.write_str("local_date_time"),
            Self::ZonedDateTime => f.write_str("zoned_date_time"),
            Self::Uuid => f.write_str("uuid"),
            Self::Json => f.write_str("json"),
            Self::Jsonb => f.write_str("jsonb"),
            Self::Array { element_type } => write!(f, "array<{element_type}>"),
        }
    }
}
