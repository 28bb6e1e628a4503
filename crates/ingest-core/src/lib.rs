//! Core types for the wal-ingest engine.
//!
//! This crate provides the source-independent building blocks:
//!
//! - [`UniversalType`] / [`UniversalValue`] - engine-neutral column types and values
//! - [`TableDefinition`] / [`DatabaseSchema`] - table metadata and the [`MetadataLoader`] seam
//! - [`pipeline_channel`] - the bounded, backpressured hand-off to the applier
//! - [`JobRateLimiter`] - QPS/TPS throttling for pipeline jobs
//!
//! # Architecture
//!
//! ```text
//! ingest-core (this crate)
//!    │
//!    └─── wal-ingest-postgresql-source  (decoders, converter, session, dumper)
//!            │
//!            └─── wal-ingest            (CLI, applier, checkpoint persistence)
//! ```

pub mod channel;
pub mod ratelimit;
pub mod schema;
pub mod types;
pub mod values;

// Re-exports for convenience
pub use channel::{pipeline_channel, ChannelError, PipelineReceiver, PipelineSender};
pub use ratelimit::{JobRateLimiter, PipelineSqlOperationType, RateLimitConfig, RateLimitError};
pub use schema::{ColumnDefinition, DatabaseSchema, MetadataLoader, SchemaError, TableDefinition};
pub use types::UniversalType;
pub use values::{UniversalValue, ValueError};
