//! Error types for WAL ingestion.

use ingest_core::{ChannelError, RateLimitError, ValueError};

use crate::position::WalPosition;

/// A replication message could not be decoded.
///
/// Decode errors are fatal: resuming from the same position would decode the
/// same bytes again.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("message at {position} is not valid UTF-8: {source}")]
    Utf8 {
        position: WalPosition,
        #[source]
        source: std::str::Utf8Error,
    },

    #[error("unrecognised message at {position}: {message}")]
    Unrecognized {
        position: WalPosition,
        message: String,
    },

    #[error("malformed message at {position}: {reason}")]
    Malformed {
        position: WalPosition,
        reason: String,
    },

    #[error("{event} at {position} arrived outside a transaction")]
    OutsideTransaction {
        event: &'static str,
        position: WalPosition,
    },
}

impl DecodeError {
    pub(crate) fn malformed(position: &WalPosition, reason: impl Into<String>) -> Self {
        Self::Malformed {
            position: *position,
            reason: reason.into(),
        }
    }

    pub(crate) fn unrecognized(position: &WalPosition, message: &str) -> Self {
        Self::Unrecognized {
            position: *position,
            message: message.chars().take(200).collect(),
        }
    }
}

/// Failure of the replication connection or one of its queries.
///
/// Session errors are transient: the dumper closes the session and reopens
/// it, up to its reconnect bound.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to connect: {0}")]
    Connect(#[source] tokio_postgres::Error),

    #[error("{context}: {source}")]
    Query {
        context: &'static str,
        #[source]
        source: tokio_postgres::Error,
    },

    #[error("unexpected server response: {0}")]
    Protocol(String),

    #[error("connection lost: {0}")]
    Disconnected(String),

    #[error("session is closed")]
    Closed,
}

impl SessionError {
    pub(crate) fn query(context: &'static str) -> impl FnOnce(tokio_postgres::Error) -> Self {
        move |source| Self::Query { context, source }
    }
}

/// Error type for the ingestion engine.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("replication session failed: {0}")]
    Session(#[from] SessionError),

    #[error("giving up after {attempts} consecutive session failures: {source}")]
    ReconnectExhausted {
        attempts: u32,
        #[source]
        source: SessionError,
    },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("metadata unavailable for {}", describe_target(.table, .column))]
    MetadataUnavailable {
        table: String,
        column: Option<String>,
    },

    #[error("cannot convert {table}.{column}: {source}")]
    Conversion {
        table: String,
        column: String,
        #[source]
        source: ValueError,
    },

    #[error("unsupported data source configuration: {0}")]
    UnsupportedConfiguration(String),

    #[error("pipeline channel closed by the consumer")]
    ChannelClosed,

    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    #[error("dumper task failed: {0}")]
    Worker(String),
}

impl IngestError {
    /// Whether the error is recovered by reopening the session.
    pub fn is_transient(&self) -> bool {
        matches!(self, IngestError::Session(_))
    }
}

impl From<ChannelError> for IngestError {
    fn from(_: ChannelError) -> Self {
        IngestError::ChannelClosed
    }
}

fn describe_target(table: &str, column: &Option<String>) -> String {
    match column {
        Some(column) => format!("column '{column}' of table '{table}'"),
        None => format!("table '{table}'"),
    }
}
