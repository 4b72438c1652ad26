//! Relay actions: user intents written by the extension, consumed by the main
//! process.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::timestamp::deserialize_flexible;

/// Timer kind owned by the main process. Actions for other kinds are dropped.
pub const DEFAULT_TIMER_KIND: &str = "main";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Pause,
    Resume,
    Stop,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Pause => "pause",
            ActionKind::Resume => "resume",
            ActionKind::Stop => "stop",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pause" => Ok(ActionKind::Pause),
            "resume" => Ok(ActionKind::Resume),
            "stop" => Ok(ActionKind::Stop),
            other => Err(format!("unknown action `{}`", other)),
        }
    }
}

/// One pending user intent. The relay holds at most one at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayAction {
    #[serde(rename = "action")]
    pub kind: ActionKind,
    #[serde(rename = "activityId", default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
    #[serde(rename = "timerType", default = "default_timer_kind")]
    pub timer_kind: String,
    #[serde(rename = "timestamp", deserialize_with = "deserialize_flexible")]
    pub issued_at: DateTime<Utc>,
}

fn default_timer_kind() -> String {
    DEFAULT_TIMER_KIND.to_string()
}

impl RelayAction {
    pub fn new(kind: ActionKind, activity_id: Option<String>, issued_at: DateTime<Utc>) -> Self {
        RelayAction {
            kind,
            activity_id,
            timer_kind: default_timer_kind(),
            issued_at,
        }
    }

    /// How long ago the action was issued. Negative when the writer's clock
    /// ran ahead of ours.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.issued_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn decodes_minimal_action_with_default_kind() {
        let action: RelayAction =
            serde_json::from_value(json!({"action": "pause", "timestamp": 1_752_753_600.25})).unwrap();
        assert_eq!(action.kind, ActionKind::Pause);
        assert_eq!(action.timer_kind, DEFAULT_TIMER_KIND);
        assert_eq!(action.activity_id, None);
        assert_eq!(action.issued_at.timestamp_millis(), 1_752_753_600_250);
    }

    #[test]
    fn encodes_wire_names() {
        let issued = Utc.timestamp_opt(1_752_753_600, 0).single().unwrap();
        let action = RelayAction::new(ActionKind::Stop, Some("act-1".into()), issued);
        let wire = serde_json::to_value(&action).unwrap();
        assert_eq!(wire["action"], "stop");
        assert_eq!(wire["activityId"], "act-1");
        assert_eq!(wire["timerType"], "main");
        assert!(wire["timestamp"].is_string());
    }

    #[test]
    fn rejects_unknown_action() {
        let result = serde_json::from_value::<RelayAction>(json!({"action": "skip", "timestamp": 1}));
        assert!(result.is_err());
        assert!("skip".parse::<ActionKind>().is_err());
        assert_eq!("Resume".parse::<ActionKind>(), Ok(ActionKind::Resume));
    }

    #[test]
    fn age_is_measured_from_issue_time() {
        let issued = Utc.timestamp_opt(1_752_753_600, 0).single().unwrap();
        let action = RelayAction::new(ActionKind::Resume, None, issued);
        assert_eq!(action.age(issued + Duration::seconds(7)), Duration::seconds(7));
    }
}
