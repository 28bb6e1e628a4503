//! Incremental ingestion from PostgreSQL and openGauss logical decoding
//!
//! This library reads a logical replication slot through the SQL interface,
//! decodes the output of the `test_decoding` or `mppdb_decoding` plugin into
//! [`WalEvent`]s, optionally groups them by transaction, converts them into
//! typed [`Record`]s and pushes them through a bounded pipeline channel.
//!
//! ```text
//! WalDumper ── SessionFactory::open ──▶ ReplicationSession::poll
//!     │                                        │ RawMessage
//!     │                              DecodingPlugin::decode
//!     │                                        │ WalEvent
//!     │                              TransactionBuffer::offer
//!     │                                        │ Vec<WalEvent>
//!     │                            WalEventConverter::convert
//!     │                                        │ Vec<Record>
//!     └──── position ◀──────────── PipelineSender::push
//! ```
//!
//! The reached position is published on a watch channel; a
//! [`CheckpointPersister`] saves it and feeds durable positions back so the
//! slot is only advanced past changes that survive a restart.

mod config;
mod converter;
pub mod decode;
mod dumper;
mod error;
mod event;
mod metadata;
mod persister;
mod position;
mod record;
mod session;
mod slot;
mod transaction;

// Make testing module available for integration tests
#[doc(hidden)]
pub mod testing;

pub use config::{redact_connection_string, DataSourceConfig, DumperConfig, ReconnectPolicy};
pub use converter::WalEventConverter;
pub use decode::{DecodingPlugin, MppdbDecodingPlugin, PluginKind, TestDecodingPlugin};
pub use dumper::{DumperHandle, DumperState, WalDumper};
pub use error::{DecodeError, IngestError, SessionError};
pub use event::{RawColumn, RawValue, RowEvent, RowKind, WalEvent};
pub use metadata::load_database_schema;
pub use persister::CheckpointPersister;
pub use position::{Lsn, LsnParseError, WalPosition};
pub use record::{Column, DataRecord, PlaceholderRecord, Record, TransactionRecord};
pub use session::{
    PgReplicationSession, PgSessionFactory, RawMessage, ReplicationSession, SessionFactory,
};
pub use slot::unique_slot_name;
pub use transaction::{TransactionBuffer, TransactionGroup};
