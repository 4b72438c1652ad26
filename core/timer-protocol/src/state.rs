//! The authoritative timer record and its current-generation encoding.
//!
//! # Wire Format
//!
//! ```json
//! {
//!   "startedAt": "2025-07-17T12:00:00.000Z",
//!   "pausedAt": "2025-07-17T12:01:00.000Z",
//!   "duration": 300.0,
//!   "label": "Session A",
//!   "mode": "countdown",
//!   "completed": false,
//!   "startTime": "2025-07-17T12:00:00.000Z",
//!   "endTime": "2025-07-17T12:05:00.000Z",
//!   "isPaused": true,
//!   "lastUpdateTime": "2025-07-17T12:01:00.000Z"
//! }
//! ```
//!
//! The trailing four fields are mirrors for readers that predate `startedAt`.
//! Nothing in this workspace reads them back except the legacy decode path.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// Placeholder label for states synthesized without one.
pub const PLACEHOLDER_LABEL: &str = "Timer";

/// Duration used when no trustworthy duration can be recovered (5 minutes).
pub const EMERGENCY_DURATION_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerMode {
    Countdown,
    Countup,
    Interval,
    Completed,
}

impl TimerMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TimerMode::Countdown => "countdown",
            TimerMode::Countup => "countup",
            TimerMode::Interval => "interval",
            TimerMode::Completed => "completed",
        }
    }

    /// Lenient parse used by decoders; producers have spelled these several ways.
    pub fn parse(raw: &str) -> Option<Self> {
        let folded: String = raw
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .flat_map(char::to_lowercase)
            .collect();
        match folded.as_str() {
            "countdown" => Some(TimerMode::Countdown),
            "countup" | "stopwatch" => Some(TimerMode::Countup),
            "interval" => Some(TimerMode::Interval),
            "completed" => Some(TimerMode::Completed),
            _ => None,
        }
    }

    /// Modes whose `duration` is a real plan rather than an unused zero.
    pub fn has_fixed_duration(self) -> bool {
        matches!(self, TimerMode::Countdown | TimerMode::Interval)
    }
}

impl std::fmt::Display for TimerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A timer's identity-free state: anchors, plan, and display metadata.
///
/// `paused_at` present means paused; absent means running. Elapsed time is
/// always derived, never stored, so pausing and resuming only ever move the
/// two anchors.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerState {
    pub started_at: DateTime<Utc>,
    pub paused_at: Option<DateTime<Utc>>,
    pub duration: Duration,
    pub label: String,
    pub mode: TimerMode,
    pub completed: bool,
    pub completion_note: Option<String>,
}

impl TimerState {
    /// A fresh, running timer anchored at `now`.
    pub fn new(label: impl Into<String>, duration: Duration, mode: TimerMode, now: DateTime<Utc>) -> Self {
        let duration = if mode.has_fixed_duration() {
            duration.max(Duration::zero())
        } else {
            Duration::zero()
        };
        TimerState {
            started_at: now,
            paused_at: None,
            duration,
            label: label.into(),
            mode,
            completed: false,
            completion_note: None,
        }
    }

    /// The recoverable "wrong but alive" state used when nothing decodes.
    pub fn emergency(now: DateTime<Utc>) -> Self {
        TimerState::new(
            PLACEHOLDER_LABEL,
            Duration::seconds(EMERGENCY_DURATION_SECS),
            TimerMode::Countdown,
            now,
        )
    }

    pub fn is_running(&self) -> bool {
        self.paused_at.is_none()
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// Planned end instant, ignoring pauses still in progress. Saturates at
    /// the latest representable instant.
    pub fn planned_end(&self) -> DateTime<Utc> {
        self.started_at
            .checked_add_signed(self.duration)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Encodes the current generation plus legacy mirror fields.
    pub fn to_wire(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

pub(crate) fn format_instant(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn duration_secs(duration: Duration) -> f64 {
    duration.num_milliseconds() as f64 / 1000.0
}

impl Serialize for TimerState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let started = format_instant(self.started_at);
        let paused = self.paused_at.map(format_instant);

        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("startedAt", &started)?;
        if let Some(paused) = &paused {
            map.serialize_entry("pausedAt", paused)?;
        }
        map.serialize_entry("duration", &duration_secs(self.duration))?;
        map.serialize_entry("label", &self.label)?;
        map.serialize_entry("mode", &self.mode)?;
        map.serialize_entry("completed", &self.completed)?;
        if let Some(note) = &self.completion_note {
            map.serialize_entry("completionNote", note)?;
        }

        map.serialize_entry("startTime", &started)?;
        map.serialize_entry("endTime", &format_instant(self.planned_end()))?;
        map.serialize_entry("isPaused", &self.is_paused())?;
        if let Some(paused) = &paused {
            map.serialize_entry("lastUpdateTime", paused)?;
        }
        map.end()
    }
}
