//! Replication positions.
//!
//! A position is a PostgreSQL log sequence number. It is displayed and parsed
//! in the server's `X/Y` form (high and low 32 bits in hex), which is also how
//! it is stored in checkpoint files, so a checkpoint can be pasted straight
//! into `pg_replication_slot_advance`.

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Error returned when a string is not a valid `X/Y` LSN.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid LSN '{0}': expected a position like '0/16B3748'")]
pub struct LsnParseError(String);

/// PostgreSQL log sequence number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Lsn(pub u64);

impl Lsn {
    pub const ZERO: Lsn = Lsn(0);
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
    }
}

impl FromStr for Lsn {
    type Err = LsnParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LsnParseError(s.to_string());
        let (hi, lo) = s.trim().split_once('/').ok_or_else(invalid)?;
        let hi = u32::from_str_radix(hi, 16).map_err(|_| invalid())?;
        let lo = u32::from_str_radix(lo, 16).map_err(|_| invalid())?;
        Ok(Lsn(((hi as u64) << 32) | lo as u64))
    }
}

impl TryFrom<String> for Lsn {
    type Error = LsnParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Lsn> for String {
    fn from(lsn: Lsn) -> Self {
        lsn.to_string()
    }
}

/// Position in the replication stream, used as the resume checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WalPosition {
    pub lsn: Lsn,
}

impl WalPosition {
    /// Position of a fresh slot.
    pub const ZERO: WalPosition = WalPosition { lsn: Lsn::ZERO };

    pub fn new(lsn: Lsn) -> Self {
        Self { lsn }
    }
}

impl From<Lsn> for WalPosition {
    fn from(lsn: Lsn) -> Self {
        Self::new(lsn)
    }
}

impl FromStr for WalPosition {
    type Err = LsnParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self::new)
    }
}

impl fmt::Display for WalPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.lsn.fmt(f)
    }
}

impl checkpoint::Checkpoint for WalPosition {
    const DATABASE_TYPE: &'static str = "postgresql-wal";

    fn to_cli_string(&self) -> String {
        self.lsn.to_string()
    }

    fn from_cli_string(s: &str) -> Result<Self> {
        Ok(s.parse()?)
    }
}
