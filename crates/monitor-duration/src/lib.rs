//! Cadence parsing for the monitoring agent.
//!
//! The configuration store (spec §4.3) stores cadences as plain decimal
//! nanosecond strings (`timings.default = 1000000000`) rather than
//! human-readable durations, but CLI flags and defaults are easier to read
//! as `"1s"` / `"200ms"`. This crate bridges both representations.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CadenceError {
    #[error("invalid cadence `{0}`: not a plain integer nanosecond count or humantime duration")]
    Invalid(String),
}

/// Parses a cadence value as it may appear in `mf_config.ini`: either a bare
/// integer (nanoseconds, the wire format the reference agent uses) or a
/// humantime string (`"200ms"`, `"1s"`) for operator ergonomics.
pub fn parse_cadence_ns(raw: &str) -> Result<u64, CadenceError> {
    let trimmed = raw.trim();
    if let Ok(ns) = trimmed.parse::<u64>() {
        return Ok(ns);
    }
    humantime::parse_duration(trimmed)
        .map(|d| d.as_nanos() as u64)
        .map_err(|_| CadenceError::Invalid(raw.to_string()))
}

/// Parses a plain integer seconds value (used for `timings.update_configuration`),
/// also accepting a humantime string for the same ergonomic reason.
pub fn parse_seconds(raw: &str) -> Result<u64, CadenceError> {
    let trimmed = raw.trim();
    if let Ok(secs) = trimmed.parse::<u64>() {
        return Ok(secs);
    }
    humantime::parse_duration(trimmed)
        .map(|d| d.as_secs())
        .map_err(|_| CadenceError::Invalid(raw.to_string()))
}

/// Converts a nanosecond cadence into a `Duration` for use with `thread::sleep`.
pub fn cadence_to_duration(cadence_ns: u64) -> Duration {
    Duration::from_nanos(cadence_ns)
}

/// Formats a `Duration` back into the plain-nanosecond wire format.
pub fn duration_to_cadence_ns(d: Duration) -> u64 {
    d.as_nanos() as u64
}
