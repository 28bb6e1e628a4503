//! Decoding plugins.
//!
//! A decoding plugin turns one message read from a logical replication slot
//! into one [`WalEvent`]. Plugins are stateless; the session tells them
//! nothing but the raw bytes and the position the server reported.
//!
//! - [`TestDecodingPlugin`] - PostgreSQL's `test_decoding` text output
//! - [`MppdbDecodingPlugin`] - openGauss `mppdb_decoding` output

mod mppdb;
mod test_decoding;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::event::{RawValue, WalEvent};
use crate::position::WalPosition;

pub use mppdb::MppdbDecodingPlugin;
pub use test_decoding::TestDecodingPlugin;

/// Turns raw slot messages into events.
pub trait DecodingPlugin: Send + Sync {
    /// Server-side output plugin the slot is created with.
    fn output_plugin(&self) -> &'static str;

    /// Options passed to `pg_logical_slot_peek_changes`, as name/value pairs.
    fn slot_options(&self) -> Vec<(&'static str, &'static str)>;

    /// Decode one message observed at `reference`.
    fn decode(&self, raw: &[u8], reference: &WalPosition) -> Result<WalEvent, DecodeError>;
}

/// Plugin selection as it appears in job configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    #[default]
    TestDecoding,
    MppdbDecoding,
}

impl PluginKind {
    pub fn build(self) -> Arc<dyn DecodingPlugin> {
        match self {
            PluginKind::TestDecoding => Arc::new(TestDecodingPlugin),
            PluginKind::MppdbDecoding => Arc::new(MppdbDecodingPlugin),
        }
    }
}

impl std::str::FromStr for PluginKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "test_decoding" => Ok(PluginKind::TestDecoding),
            "mppdb_decoding" => Ok(PluginKind::MppdbDecoding),
            other => Err(format!(
                "unknown decoding plugin '{other}' (expected test_decoding or mppdb_decoding)"
            )),
        }
    }
}

fn utf8<'a>(raw: &'a [u8], reference: &WalPosition) -> Result<&'a str, DecodeError> {
    std::str::from_utf8(raw).map_err(|source| DecodeError::Utf8 {
        position: *reference,
        source,
    })
}

/// Interpret a SQL literal as printed by the decoding plugins.
///
/// `null` is SQL NULL, `'...'` is a quoted literal with `''` escapes, and
/// anything else is taken verbatim.
fn parse_literal(literal: &str) -> RawValue {
    match literal {
        "null" => RawValue::Null,
        "unchanged-toast-datum" => RawValue::UnchangedToast,
        quoted if quoted.len() >= 2 && quoted.starts_with('\'') && quoted.ends_with('\'') => {
            RawValue::Text(quoted[1..quoted.len() - 1].replace("''", "'"))
        }
        bare => RawValue::Text(bare.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_literal() {
        assert_eq!(parse_literal("null"), RawValue::Null);
        assert_eq!(parse_literal("42"), RawValue::Text("42".into()));
        assert_eq!(parse_literal("'it''s'"), RawValue::Text("it's".into()));
        assert_eq!(parse_literal("''"), RawValue::Text(String::new()));
        assert_eq!(parse_literal("'null'"), RawValue::Text("null".into()));
        assert_eq!(parse_literal("unchanged-toast-datum"), RawValue::UnchangedToast);
    }

    #[test]
    fn test_plugin_kind_from_str() {
        assert_eq!("mppdb_decoding".parse::<PluginKind>().unwrap(), PluginKind::MppdbDecoding);
        assert_eq!(
            "test_decoding".parse::<PluginKind>().unwrap().build().output_plugin(),
            "test_decoding"
        );
        assert!("wal2json".parse::<PluginKind>().is_err());
    }
}
