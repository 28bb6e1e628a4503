//! wal-ingest
//!
//! Incremental ingestion from PostgreSQL and openGauss logical replication
//! slots into a bounded pipeline, with resumable checkpoints.
//!
//! # Crates
//!
//! - `ingest_core` - Typed values, table metadata, the pipeline channel and job rate limiting
//! - `checkpoint` - Per-job checkpoint stores
//! - `wal_ingest_postgresql_source` - Decoding plugins, transaction grouping and the dumper lifecycle
//!
//! # CLI Usage
//!
//! ```bash
//! # Run a job described by a TOML file, writing records to stdout
//! wal-ingest run --config job.toml
//!
//! # Run a job from flags, writing records to a file
//! wal-ingest run --connection-string "host=localhost user=repl dbname=shop" \
//!   --job-id j0101 --tables t_order,t_order_item --output changes.jsonl
//!
//! # Show the saved position of a job
//! wal-ingest checkpoint show --job-id j0101
//!
//! # Print the replication slot name of a job
//! wal-ingest slot-name --database shop --job-id j0101
//! ```

pub mod applier;
pub mod config;
pub mod job;

pub use applier::JsonLinesApplier;
pub use config::{parse_duration, JobConfig};
pub use job::{load_metadata, run_job};
