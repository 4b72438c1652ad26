//! Synchronization tuning loaded from `ambient-timer.toml` in the container.
//!
//! Every field has a default, so a missing file and an empty file behave the
//! same. A malformed file is an error; callers decide whether to fall back.

use std::path::Path;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use timer_protocol::DEFAULT_TIMER_KIND;

use crate::error::{Result, TimerError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// How often the main process polls the relay and checks for completion.
    pub poll_interval_ms: u64,
    /// Clock drift tolerated before `update` re-anchors a running timer.
    pub drift_tolerance_ms: i64,
    /// Minimum staleness horizon handed to the host surface.
    pub horizon_secs: i64,
    /// Relay actions older than this are discarded.
    pub max_action_age_secs: i64,
    /// Timer kind owned by this controller.
    pub timer_kind: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            poll_interval_ms: 300,
            drift_tolerance_ms: 1000,
            horizon_secs: 8 * 3600,
            max_action_age_secs: 10,
            timer_kind: DEFAULT_TIMER_KIND.to_string(),
        }
    }
}

/// Longest staleness horizon a config may request (7 days).
pub const MAX_HORIZON_SECS: i64 = 7 * 24 * 3600;
/// Longest relay action age a config may request (1 hour).
pub const MAX_ACTION_AGE_SECS: i64 = 3600;
const MAX_DRIFT_TOLERANCE_MS: i64 = 3600 * 1000;
const MAX_POLL_INTERVAL_MS: u64 = 60 * 1000;

impl SyncConfig {
    /// Loads from `path`, returning defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs_err::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(TimerError::io("reading config", err)),
        };
        let config: SyncConfig = toml::from_str(&content).map_err(|err| TimerError::ConfigMalformed {
            path: path.to_path_buf(),
            details: err.to_string(),
        })?;
        config.validate(path)?;
        Ok(config)
    }

    /// [`SyncConfig::load`], downgrading any failure to defaults with a warning.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "Falling back to default sync config");
            Self::default()
        })
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let malformed = |details: &str| TimerError::ConfigMalformed {
            path: path.to_path_buf(),
            details: details.to_string(),
        };
        if !(1..=MAX_POLL_INTERVAL_MS).contains(&self.poll_interval_ms) {
            return Err(malformed("poll_interval_ms must be between 1 and 60000"));
        }
        if !(0..=MAX_DRIFT_TOLERANCE_MS).contains(&self.drift_tolerance_ms) {
            return Err(malformed("drift_tolerance_ms must be between 0 and 3600000"));
        }
        if !(1..=MAX_HORIZON_SECS).contains(&self.horizon_secs) {
            return Err(malformed("horizon_secs must be between 1 and 604800"));
        }
        if !(1..=MAX_ACTION_AGE_SECS).contains(&self.max_action_age_secs) {
            return Err(malformed("max_action_age_secs must be between 1 and 3600"));
        }
        if self.timer_kind.trim().is_empty() {
            return Err(malformed("timer_kind must not be empty"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> StdDuration {
        StdDuration::from_millis(self.poll_interval_ms)
    }

    pub fn drift_tolerance(&self) -> Duration {
        Duration::milliseconds(self.drift_tolerance_ms.clamp(0, MAX_DRIFT_TOLERANCE_MS))
    }

    pub fn horizon(&self) -> Duration {
        Duration::seconds(self.horizon_secs.clamp(1, MAX_HORIZON_SECS))
    }

    pub fn max_action_age(&self) -> Duration {
        Duration::seconds(self.max_action_age_secs.clamp(1, MAX_ACTION_AGE_SECS))
    }
}
