//! Job rate limiting.
//!
//! Two algorithms are available, both token buckets built on `governor`:
//!
//! - `QPS` throttles select-type operations (queries per second)
//! - `TPS` throttles insert/update/delete operations (rows per second)
//!
//! An algorithm ignores operation types it does not govern, so a single
//! limiter can be consulted for every record.

use std::fmt;
use std::num::NonZeroU32;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Kind of operation a record represents, for rate limiting purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PipelineSqlOperationType {
    Insert,
    Update,
    Delete,
    Select,
}

impl PipelineSqlOperationType {
    fn is_write(self) -> bool {
        !matches!(self, Self::Select)
    }
}

/// Error type for rate limiter initialisation.
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// Limit is zero or negative
    #[error("{algorithm} rate limit must be a positive integer, got {value}")]
    InvalidLimit {
        algorithm: &'static str,
        value: i64,
    },
}

/// Rate limit configuration as it appears in job files.
///
/// ```toml
/// [rate_limit]
/// type = "TPS"
/// tps = 2000
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum RateLimitConfig {
    Qps { qps: i64 },
    Tps { tps: i64 },
}

/// Rate limiter applied to a pipeline job.
pub struct JobRateLimiter {
    algorithm: &'static str,
    governs_writes: bool,
    burst: NonZeroU32,
    limiter: DefaultDirectRateLimiter,
}

impl fmt::Debug for JobRateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRateLimiter")
            .field("algorithm", &self.algorithm)
            .field("per_second", &self.burst)
            .finish()
    }
}

impl JobRateLimiter {
    /// Limit select-type operations to `qps` per second.
    pub fn qps(qps: i64) -> Result<Self, RateLimitError> {
        Self::build("QPS", qps, false)
    }

    /// Limit insert/update/delete operations to `tps` per second.
    pub fn tps(tps: i64) -> Result<Self, RateLimitError> {
        Self::build("TPS", tps, true)
    }

    /// Build a limiter from its job-file configuration.
    pub fn from_config(config: &RateLimitConfig) -> Result<Self, RateLimitError> {
        match config {
            RateLimitConfig::Qps { qps } => Self::qps(*qps),
            RateLimitConfig::Tps { tps } => Self::tps(*tps),
        }
    }

    fn build(
        algorithm: &'static str,
        value: i64,
        governs_writes: bool,
    ) -> Result<Self, RateLimitError> {
        let burst = u32::try_from(value)
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or(RateLimitError::InvalidLimit { algorithm, value })?;

        Ok(Self {
            algorithm,
            governs_writes,
            burst,
            limiter: RateLimiter::direct(Quota::per_second(burst)),
        })
    }

    /// Algorithm name (`QPS` or `TPS`).
    pub fn algorithm(&self) -> &'static str {
        self.algorithm
    }

    /// Wait until `factor` operations of type `op` may proceed.
    ///
    /// Returns immediately for operation types this algorithm does not govern.
    pub async fn intercept(&self, op: PipelineSqlOperationType, factor: u32) {
        if op.is_write() != self.governs_writes {
            return;
        }

        let mut remaining = factor;
        while remaining > 0 {
            let cells = remaining.min(self.burst.get());
            let Some(n) = NonZeroU32::new(cells) else {
                return;
            };
            if let Err(e) = self.limiter.until_n_ready(n).await {
                warn!("{} rate limiter rejected {} cells: {}", self.algorithm, cells, e);
                return;
            }
            remaining -= cells;
        }
    }
}
