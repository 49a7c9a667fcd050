//! Timestamp normalization (C1).
//!
//! Converts any numeric/string/large-int time value into minute-floored epoch
//! milliseconds. The only heuristic that matters: below 10^12 a numeric value is
//! assumed to be seconds, at or above it's assumed to be milliseconds already.

use crate::error::CoreError;
use chrono::DateTime;

/// Threshold below which a bare numeric value is treated as epoch seconds
/// rather than epoch milliseconds.
const SECONDS_THRESHOLD: i64 = 1_000_000_000_000;

/// One minute in milliseconds.
pub const MINUTE_MS: i64 = 60_000;

/// Any shape a timestamp can arrive in off the wire.
#[derive(Debug, Clone)]
pub enum RawTimestamp {
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<i64> for RawTimestamp {
    fn from(v: i64) -> Self {
        RawTimestamp::Int(v)
    }
}

impl From<u64> for RawTimestamp {
    fn from(v: u64) -> Self {
        RawTimestamp::Int(v as i64)
    }
}

impl From<f64> for RawTimestamp {
    fn from(v: f64) -> Self {
        RawTimestamp::Float(v)
    }
}

impl From<&str> for RawTimestamp {
    fn from(v: &str) -> Self {
        RawTimestamp::Str(v.to_string())
    }
}

impl From<String> for RawTimestamp {
    fn from(v: String) -> Self {
        RawTimestamp::Str(v)
    }
}

/// Normalize any raw timestamp value into epoch milliseconds.
///
/// Strings are parsed first as ISO-8601, falling back to numeric parsing. Numeric
/// values (however they arrived) are scaled to milliseconds using the
/// seconds-vs-milliseconds heuristic. Callers are responsible for flooring the
/// result to a minute boundary via [`floor_to_minute`] where that invariant
/// applies; this function never floors implicitly, since not every caller wants a
/// minute grid (e.g. sub-minute trade/liquidation event timestamps).
pub fn normalize_timestamp(raw: impl Into<RawTimestamp>) -> Result<i64, CoreError> {
    match raw.into() {
        RawTimestamp::Int(v) => Ok(scale_to_millis(v as f64)),
        RawTimestamp::Float(v) => {
            if !v.is_finite() {
                return Err(CoreError::BadTimestamp(format!("non-finite: {v}")));
            }
            Ok(scale_to_millis(v))
        }
        RawTimestamp::Str(s) => parse_string_timestamp(&s),
    }
}

fn scale_to_millis(v: f64) -> i64 {
    if v.abs() < SECONDS_THRESHOLD as f64 {
        (v * 1000.0).round() as i64
    } else {
        v.round() as i64
    }
}

fn parse_string_timestamp(s: &str) -> Result<i64, CoreError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(CoreError::BadTimestamp("empty timestamp string".into()));
    }

    // Try ISO-8601 first.
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.timestamp_millis());
    }

    // Fall back to plain numeric (possibly fractional) string.
    if let Ok(v) = trimmed.parse::<f64>() {
        if !v.is_finite() {
            return Err(CoreError::BadTimestamp(format!("non-finite: {trimmed}")));
        }
        return Ok(scale_to_millis(v));
    }

    Err(CoreError::BadTimestamp(format!(
        "unparseable timestamp: {trimmed}"
    )))
}

/// Floor an epoch-millisecond timestamp down to the nearest minute boundary.
pub fn floor_to_minute(ts_ms: i64) -> i64 {
    ts_ms.div_euclid(MINUTE_MS) * MINUTE_MS
}

/// Check the minute-grid invariant.
pub fn is_minute_aligned(ts_ms: i64) -> bool {
    ts_ms.rem_euclid(MINUTE_MS) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_are_scaled_to_millis() {
        assert_eq!(normalize_timestamp(1_700_000_000i64).unwrap(), 1_700_000_000_000);
    }

    #[test]
    fn millis_pass_through() {
        assert_eq!(
            normalize_timestamp(1_700_000_000_123i64).unwrap(),
            1_700_000_000_123
        );
    }

    #[test]
    fn float_seconds_are_scaled() {
        assert_eq!(
            normalize_timestamp(1_700_000_000.5f64).unwrap(),
            1_700_000_000_500
        );
    }

    #[test]
    fn numeric_string_is_parsed() {
        assert_eq!(
            normalize_timestamp("1700000000000").unwrap(),
            1_700_000_000_000
        );
    }

    #[test]
    fn iso8601_string_is_parsed() {
        let ms = normalize_timestamp("2023-11-14T22:13:20+00:00").unwrap();
        assert_eq!(ms, 1_700_000_000_000);
    }

    #[test]
    fn garbage_string_is_rejected() {
        assert!(normalize_timestamp("not-a-timestamp").is_err());
    }

    #[test]
    fn nan_is_rejected() {
        assert!(normalize_timestamp(f64::NAN).is_err());
    }

    #[test]
    fn floor_to_minute_rounds_down() {
        assert_eq!(floor_to_minute(179_999), 120_000);
        assert_eq!(floor_to_minute(180_000), 180_000);
    }

    #[test]
    fn minute_grid_invariant() {
        assert!(is_minute_aligned(180_000));
        assert!(!is_minute_aligned(180_001));
    }
}
