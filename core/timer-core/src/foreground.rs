//! The foreground timer service the controller can mirror.
//!
//! When a session's source of truth lives in some other component, the
//! controller reads it through [`ForegroundTimerService`] and reconciles via
//! `SyncController::mirror`.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForegroundPhase {
    Running,
    Paused,
    Stopped,
}

pub trait ForegroundTimerService {
    fn current_elapsed_time(&self) -> Duration;
    fn timer_state(&self) -> ForegroundPhase;
    fn start_time(&self) -> Option<DateTime<Utc>>;
    /// Zero for count-up sessions.
    fn total_duration(&self) -> Duration;
    fn current_method_id(&self) -> Option<String>;
    fn current_method_name(&self) -> Option<String>;
}

/// A point-in-time reading of a foreground service, as sent over the daemon
/// socket.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForegroundSnapshot {
    /// Seconds.
    pub elapsed: f64,
    pub state: ForegroundPhase,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    /// Seconds; zero or absent for count-up.
    #[serde(default)]
    pub total_duration: f64,
    #[serde(default)]
    pub method_id: Option<String>,
    #[serde(default)]
    pub method_name: Option<String>,
}

fn seconds(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::milliseconds((value.min(timer_protocol::decode::MAX_DURATION_SECS) * 1000.0).round() as i64)
    } else {
        Duration::zero()
    }
}

impl ForegroundTimerService for ForegroundSnapshot {
    fn current_elapsed_time(&self) -> Duration {
        seconds(self.elapsed)
    }

    fn timer_state(&self) -> ForegroundPhase {
        self.state
    }

    fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    fn total_duration(&self) -> Duration {
        seconds(self.total_duration)
    }

    fn current_method_id(&self) -> Option<String> {
        self.method_id.clone()
    }

    fn current_method_name(&self) -> Option<String> {
        self.method_name.clone()
    }
}
