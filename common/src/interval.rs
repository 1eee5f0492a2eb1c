use anyhow::{anyhow, Result};
use std::time::Duration;

/// Parse a human interval such as `500ms`, `2s`, `1m` or `1h`.
/// A bare number is taken as milliseconds. Zero is rejected.
pub fn parse_interval(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(anyhow!("Empty interval"));
    }

    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    if num.is_empty() {
        return Err(anyhow!("Interval must start with a number: {}", s));
    }
    let n: u64 = num.parse()?;
    if n == 0 {
        return Err(anyhow!("Interval must be greater than zero: {}", s));
    }

    let too_large = || anyhow!("Interval too large: {}", s);
    match unit.trim() {
        "" | "ms" => Ok(Duration::from_millis(n)),
        "s" => Ok(Duration::from_secs(n)),
        "m" => n.checked_mul(60).map(Duration::from_secs).ok_or_else(too_large),
        "h" => n.checked_mul(3600).map(Duration::from_secs).ok_or_else(too_large),
        other => Err(anyhow!("Unknown unit: {}", other)),
    }
}
