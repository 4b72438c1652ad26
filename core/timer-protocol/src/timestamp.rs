//! Flexible instant reader.
//!
//! Producers disagree on how to put an instant on the wire. The push service
//! sends RFC 3339 strings or `{seconds, nanoseconds}` objects, the host
//! platform sends floating-point epoch offsets, and at least one historical
//! writer leaked reference-date offsets (seconds since 2001-01-01) into fields
//! that every reader treats as Unix seconds.
//!
//! [`read_instant`] accepts all of them and repairs the reference-date leak.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Seconds between the Unix epoch and the 2001-01-01 reference date.
///
/// Checked against the calendar in tests; see `reference_delta_matches_calendar`.
pub const REFERENCE_EPOCH_DELTA_SECS: i64 = 978_307_200;

/// Instants before 2000-01-01 are not plausible for a live timer.
pub const PLAUSIBLE_FLOOR_SECS: i64 = 946_684_800;

/// Numeric offsets at or above this are milliseconds, not seconds.
const MILLIS_THRESHOLD: f64 = 1e12;

/// An instant read from the wire, with a note on whether it was repaired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadInstant {
    pub at: DateTime<Utc>,
    /// True when the reference-date correction was applied.
    pub corrected: bool,
}

/// Reads an instant from any supported wire encoding.
pub fn read_instant(value: &Value) -> Result<ReadInstant, String> {
    let raw = match value {
        Value::String(text) => parse_text(text)?,
        Value::Number(number) => {
            let offset = number
                .as_f64()
                .ok_or_else(|| format!("number {} is not representable", number))?;
            from_epoch_offset(offset)?
        }
        Value::Object(map) => {
            let seconds = ["seconds", "_seconds"]
                .iter()
                .find_map(|key| map.get(*key))
                .and_then(Value::as_f64)
                .ok_or_else(|| "instant object has no seconds".to_string())?;
            let nanos = ["nanoseconds", "_nanoseconds"]
                .iter()
                .find_map(|key| map.get(*key))
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            from_epoch_offset(seconds + nanos / 1e9)?
        }
        other => return Err(format!("unsupported instant encoding: {}", type_name(other))),
    };
    repair(raw)
}

/// Serde adapter for fields that carry an instant in any supported encoding.
pub fn deserialize_flexible<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    read_instant(&value)
        .map(|read| read.at)
        .map_err(serde::de::Error::custom)
}

/// Returns the reference date (2001-01-01T00:00:00Z) derived from the calendar.
pub fn reference_date() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(2001, 1, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .unwrap_or(DateTime::UNIX_EPOCH)
}

fn parse_text(text: &str) -> Result<DateTime<Utc>, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err("empty instant string".to_string());
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    // ISO-8601 without an offset is read as UTC.
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(offset) = trimmed.parse::<f64>() {
        return from_epoch_offset(offset);
    }
    Err(format!("unrecognized instant string `{}`", trimmed))
}

fn from_epoch_offset(offset: f64) -> Result<DateTime<Utc>, String> {
    if !offset.is_finite() {
        return Err("epoch offset is not finite".to_string());
    }
    let millis = if offset.abs() >= MILLIS_THRESHOLD {
        offset.round()
    } else {
        (offset * 1000.0).round()
    };
    if millis.abs() > i64::MAX as f64 {
        return Err(format!("epoch offset {} out of range", offset));
    }
    DateTime::from_timestamp_millis(millis as i64)
        .ok_or_else(|| format!("epoch offset {} out of range", offset))
}

fn repair(at: DateTime<Utc>) -> Result<ReadInstant, String> {
    if at.timestamp() >= PLAUSIBLE_FLOOR_SECS {
        return Ok(ReadInstant {
            at,
            corrected: false,
        });
    }
    let shifted = at
        .checked_add_signed(chrono::Duration::seconds(REFERENCE_EPOCH_DELTA_SECS))
        .filter(|shifted| shifted.timestamp() >= PLAUSIBLE_FLOOR_SECS)
        .ok_or_else(|| format!("instant {} is outside the plausible range", at.to_rfc3339()))?;
    Ok(ReadInstant {
        at: shifted,
        corrected: true,
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
