//! Duration parsing utilities.

use std::time::Duration;

use anyhow::Context;

/// Parse a duration string like "1h", "30m", "300s", "250ms" or "300".
///
/// Plain numbers are seconds.
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("Empty duration string");
    }

    let (number, unit) = [("ms", 1), ("h", 3_600_000), ("m", 60_000), ("s", 1000)]
        .into_iter()
        .find_map(|(suffix, millis)| s.strip_suffix(suffix).map(|n| (n, millis)))
        .unwrap_or((s, 1000));

    let value: u64 = number
        .trim()
        .parse()
        .with_context(|| format!("Invalid duration value: {s}"))?;
    let millis = value
        .checked_mul(unit)
        .with_context(|| format!("Duration out of range: {s}"))?;
    Ok(Duration::from_millis(millis))
}
