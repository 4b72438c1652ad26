//! Multi-generation decoding for [`TimerState`] payloads.
//!
//! Three producers write timer state (the main process, the push service, and
//! older app builds), and they have never agreed on a single shape. Decoding is
//! an ordered list of strategies followed by a strategy that cannot fail:
//!
//! 1. [`Generation::Current`]: `startedAt`, optional `pausedAt`, `duration`,
//!    `label`, `mode` (each field read independently)
//! 2. [`Generation::Legacy`]: `startTime`, `endTime`, `isPaused`,
//!    optional `lastUpdateTime`
//! 3. [`Generation::Emergency`]: a placeholder state anchored at `now`
//!
//! The rendering surface must always have something to paint, so
//! [`decode_timer_state`] never returns an error. What went wrong travels in
//! [`Decoded::error`] and [`Decoded::diagnostics`] instead.

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};

use crate::state::{TimerMode, TimerState, EMERGENCY_DURATION_SECS, PLACEHOLDER_LABEL};
use crate::timestamp::read_instant;

/// How far in the future `startedAt` may sit before it is treated as bogus.
pub const CLOCK_SKEW_TOLERANCE_SECS: i64 = 5;

/// Longest plan we accept from the wire (one year).
pub const MAX_DURATION_SECS: f64 = 365.0 * 24.0 * 3600.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    NotJson(String),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("payload matches no known timer state generation")]
    UnknownShape,

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` is not a valid instant: {details}")]
    BadInstant { field: &'static str, details: String },

    #[error("field `{field}` is invalid: {details}")]
    BadField { field: &'static str, details: String },

    #[error("unknown timer mode `{0}`")]
    UnknownMode(String),
}

/// Which strategy produced a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Generation {
    Current,
    Legacy,
    Emergency,
}

impl Generation {
    pub fn as_str(self) -> &'static str {
        match self {
            Generation::Current => "current",
            Generation::Legacy => "legacy",
            Generation::Emergency => "emergency",
        }
    }
}

/// Repairs applied while decoding. Each one is worth a log line, none is fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    ReferenceEpochCorrected { field: &'static str },
    PausedAtUnreadable,
    PausedWithoutTimestamp,
    MissingEndTime,
    StartClampedToNow,
    PauseClampedToStart,
    DurationClamped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub state: TimerState,
    pub generation: Generation,
    /// The first strategy failure, or why nothing matched when the emergency
    /// state was used. `None` when a strategy applied cleanly.
    pub error: Option<DecodeError>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Decoded {
    pub fn is_emergency(&self) -> bool {
        self.generation == Generation::Emergency
    }
}

enum Outcome {
    NotApplicable,
    Failed(DecodeError),
}

type Strategy = fn(&Map<String, Value>, DateTime<Utc>, &mut Vec<Diagnostic>) -> Result<TimerState, Outcome>;

/// Strategies in priority order. The emergency state follows implicitly.
const STRATEGIES: &[(Generation, Strategy)] = &[
    (Generation::Current, decode_current),
    (Generation::Legacy, decode_legacy),
];

/// Decodes raw bytes. Never fails; see the module docs.
pub fn decode_timer_state(bytes: &[u8], now: DateTime<Utc>) -> Decoded {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(value) => decode_timer_value(&value, now),
        Err(err) => emergency(now, DecodeError::NotJson(err.to_string())),
    }
}

/// Decodes an already-parsed JSON value. Never fails.
pub fn decode_timer_value(value: &Value, now: DateTime<Utc>) -> Decoded {
    let Some(map) = value.as_object() else {
        return emergency(now, DecodeError::NotAnObject);
    };

    let mut first_error = None;
    for (generation, strategy) in STRATEGIES {
        let mut diagnostics = Vec::new();
        match strategy(map, now, &mut diagnostics) {
            Ok(state) => {
                let state = enforce_invariants(state, now, &mut diagnostics);
                return Decoded {
                    state,
                    generation: *generation,
                    error: first_error,
                    diagnostics,
                };
            }
            Err(Outcome::NotApplicable) => {}
            Err(Outcome::Failed(err)) => {
                first_error.get_or_insert(err);
            }
        }
    }

    emergency(now, first_error.unwrap_or(DecodeError::UnknownShape))
}

fn emergency(now: DateTime<Utc>, error: DecodeError) -> Decoded {
    Decoded {
        state: TimerState::emergency(now),
        generation: Generation::Emergency,
        error: Some(error),
        diagnostics: Vec::new(),
    }
}

fn decode_current(
    map: &Map<String, Value>,
    _now: DateTime<Utc>,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<TimerState, Outcome> {
    let Some(started_raw) = map.get("startedAt") else {
        return Err(Outcome::NotApplicable);
    };
    let started_at = instant_field(started_raw, "startedAt", diagnostics).map_err(Outcome::Failed)?;

    let paused_at = match field(map, &["pausedAt"]) {
        None => None,
        Some(raw) => match instant_field(raw, "pausedAt", diagnostics) {
            Ok(at) => Some(at),
            Err(_) => {
                diagnostics.push(Diagnostic::PausedAtUnreadable);
                None
            }
        },
    };

    let duration = field(map, &["duration"])
        .ok_or(Outcome::Failed(DecodeError::MissingField("duration")))
        .and_then(|raw| duration_field(raw, "duration").map_err(Outcome::Failed))?;
    let label = field(map, &["label", "methodName"])
        .ok_or(Outcome::Failed(DecodeError::MissingField("label")))
        .and_then(|raw| string_field(raw, "label").map_err(Outcome::Failed))?;
    let mode = field(map, &["mode", "sessionType"])
        .ok_or(Outcome::Failed(DecodeError::MissingField("mode")))
        .and_then(|raw| mode_field(raw).map_err(Outcome::Failed))?;

    let completed = field(map, &["completed", "isCompleted"])
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let completion_note = field(map, &["completionNote", "completionMessage"])
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(TimerState {
        started_at,
        paused_at,
        duration: if mode.has_fixed_duration() {
            duration
        } else {
            Duration::zero()
        },
        label,
        mode,
        completed,
        completion_note,
    })
}

fn decode_legacy(
    map: &Map<String, Value>,
    now: DateTime<Utc>,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<TimerState, Outcome> {
    let (Some(start_raw), Some(paused_raw)) = (map.get("startTime"), map.get("isPaused")) else {
        return Err(Outcome::NotApplicable);
    };

    let started_at = instant_field(start_raw, "startTime", diagnostics).map_err(Outcome::Failed)?;
    let is_paused = paused_raw.as_bool().ok_or_else(|| {
        Outcome::Failed(DecodeError::BadField {
            field: "isPaused",
            details: "expected a boolean".to_string(),
        })
    })?;

    let mode = match field(map, &["mode", "sessionType"]) {
        Some(raw) => mode_field(raw).map_err(Outcome::Failed)?,
        None => TimerMode::Countdown,
    };
    let label = match field(map, &["label", "methodName"]) {
        Some(raw) => string_field(raw, "label").map_err(Outcome::Failed)?,
        None => PLACEHOLDER_LABEL.to_string(),
    };

    let duration = if !mode.has_fixed_duration() {
        Duration::zero()
    } else {
        match map.get("endTime") {
            Some(end_raw) => {
                let end = instant_field(end_raw, "endTime", diagnostics).map_err(Outcome::Failed)?;
                let span = (end - started_at).max(Duration::zero());
                if span > max_duration() {
                    return Err(Outcome::Failed(DecodeError::BadField {
                        field: "endTime",
                        details: format!("{} seconds after startTime is out of range", span.num_seconds()),
                    }));
                }
                span
            }
            None => {
                diagnostics.push(Diagnostic::MissingEndTime);
                Duration::seconds(EMERGENCY_DURATION_SECS)
            }
        }
    };

    let paused_at = if is_paused {
        match map.get("lastUpdateTime").map(|raw| instant_field(raw, "lastUpdateTime", diagnostics)) {
            Some(Ok(at)) => Some(at),
            _ => {
                diagnostics.push(Diagnostic::PausedWithoutTimestamp);
                Some(now)
            }
        }
    } else {
        None
    };

    Ok(TimerState {
        started_at,
        paused_at,
        duration,
        label,
        mode,
        completed: field(map, &["completed", "isCompleted"])
            .and_then(Value::as_bool)
            .unwrap_or(false),
        completion_note: field(map, &["completionNote", "completionMessage"])
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

/// Holds the model invariants no matter which producer wrote the payload.
fn enforce_invariants(
    mut state: TimerState,
    now: DateTime<Utc>,
    diagnostics: &mut Vec<Diagnostic>,
) -> TimerState {
    if state.started_at > now + Duration::seconds(CLOCK_SKEW_TOLERANCE_SECS) {
        diagnostics.push(Diagnostic::StartClampedToNow);
        state.started_at = now;
    }
    if state.duration > max_duration() {
        diagnostics.push(Diagnostic::DurationClamped);
        state.duration = max_duration();
    }
    if let Some(paused_at) = state.paused_at {
        if paused_at < state.started_at {
            diagnostics.push(Diagnostic::PauseClampedToStart);
            state.paused_at = Some(state.started_at);
        }
    }
    state
}

fn max_duration() -> Duration {
    Duration::seconds(MAX_DURATION_SECS as i64)
}

fn field<'a>(map: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .find_map(|name| map.get(*name))
        .filter(|value| !value.is_null())
}

fn instant_field(
    raw: &Value,
    name: &'static str,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<DateTime<Utc>, DecodeError> {
    let read = read_instant(raw).map_err(|details| DecodeError::BadInstant {
        field: name,
        details,
    })?;
    if read.corrected {
        diagnostics.push(Diagnostic::ReferenceEpochCorrected { field: name });
    }
    Ok(read.at)
}

fn duration_field(raw: &Value, name: &'static str) -> Result<Duration, DecodeError> {
    let secs = match raw {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| DecodeError::BadField {
        field: name,
        details: "expected seconds as a number".to_string(),
    })?;

    if !secs.is_finite() || !(0.0..=MAX_DURATION_SECS).contains(&secs) {
        return Err(DecodeError::BadField {
            field: name,
            details: format!("{} seconds is out of range", secs),
        });
    }
    Ok(Duration::milliseconds((secs * 1000.0).round() as i64))
}

fn string_field(raw: &Value, name: &'static str) -> Result<String, DecodeError> {
    raw.as_str()
        .map(str::to_string)
        .ok_or_else(|| DecodeError::BadField {
            field: name,
            details: "expected a string".to_string(),
        })
}

fn mode_field(raw: &Value) -> Result<TimerMode, DecodeError> {
    let text = raw.as_str().ok_or_else(|| DecodeError::BadField {
        field: "mode",
        details: "expected a string".to_string(),
    })?;
    TimerMode::parse(text).ok_or_else(|| DecodeError::UnknownMode(text.to_string()))
}
