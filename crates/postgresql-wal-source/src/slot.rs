//! Replication slot naming.

use sha2::{Digest, Sha256};

const SLOT_PREFIX: &str = "pipeline_";

/// Deterministic slot name for a job on a database.
///
/// The name stays well under PostgreSQL's 63 character identifier limit and
/// only contains characters valid in an unquoted slot name.
pub fn unique_slot_name(database: &str, job_id: &str) -> String {
    let digest = Sha256::digest(format!("{database}_{job_id}").as_bytes());
    let hex = hex::encode(digest);
    format!("{SLOT_PREFIX}{}", &hex[..32])
}
