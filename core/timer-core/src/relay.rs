//! One-way action relay from the extension to the main process.
//!
//! The extension may not mutate timer state, so it records what the user asked
//! for in a single-slot file and the main process applies it on its next poll.
//! Last request wins; there is no queue.
//!
//! Consumption deletes before acting. If the delete fails the action is still
//! returned: applying a stop twice is harmless, losing one is not.

use chrono::{DateTime, Duration, Utc};
use timer_protocol::{ActionKind, RelayAction};

use crate::store::SharedStore;

/// What woke the main process up to look at the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollTrigger {
    Foreground,
    Tick,
    Observation,
}

impl PollTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            PollTrigger::Foreground => "foreground",
            PollTrigger::Tick => "tick",
            PollTrigger::Observation => "observation",
        }
    }
}

/// Whether a consumed action should be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Apply,
    Stale { age_ms: i64 },
    ForeignKind { kind: String },
    ForeignActivity { wanted: String },
}

/// Checks a consumed action against the controller that will apply it.
///
/// An action without an activity id targets whatever is current. An action
/// naming an activity while nothing is registered is foreign too, which turns
/// a late stop for an ended timer into a no-op.
pub fn vet(
    action: &RelayAction,
    now: DateTime<Utc>,
    max_age: Duration,
    timer_kind: &str,
    current_activity: Option<&str>,
) -> Verdict {
    let age = action.age(now);
    if age > max_age {
        return Verdict::Stale {
            age_ms: age.num_milliseconds(),
        };
    }
    if action.timer_kind != timer_kind {
        return Verdict::ForeignKind {
            kind: action.timer_kind.clone(),
        };
    }
    match (&action.activity_id, current_activity) {
        (Some(wanted), Some(current)) if wanted != current => Verdict::ForeignActivity {
            wanted: wanted.clone(),
        },
        (Some(wanted), None) => Verdict::ForeignActivity {
            wanted: wanted.clone(),
        },
        _ => Verdict::Apply,
    }
}

#[derive(Debug, Clone)]
pub struct ActionRelay {
    store: SharedStore,
}

impl ActionRelay {
    pub fn new(store: SharedStore) -> Self {
        ActionRelay { store }
    }

    /// Records an intent, overwriting any unconsumed one.
    pub fn request_action(&self, kind: ActionKind, activity_id: Option<&str>, timer_kind: &str) -> bool {
        let action = RelayAction {
            kind,
            activity_id: activity_id.map(str::to_string),
            timer_kind: timer_kind.to_string(),
            issued_at: self.store.clock().now(),
        };
        let written = self.store.write_action(&action);
        if written {
            tracing::info!(action = %kind, activity_id = ?activity_id, timer_kind, "Relay action recorded");
        }
        written
    }

    /// The pending action without consuming it.
    pub fn peek(&self) -> Option<RelayAction> {
        self.store.read_action()
    }

    /// Reads and deletes the pending action.
    pub fn consume(&self) -> Option<RelayAction> {
        let action = match self.store.try_read_action() {
            Ok(action) => action?,
            Err(err) => {
                tracing::warn!(error = %err, "Discarding unreadable relay action");
                if let Err(err) = self.store.try_clear_action() {
                    tracing::debug!(error = %err, "Failed to clear unreadable relay action");
                }
                return None;
            }
        };
        if let Err(err) = self.store.try_clear_action() {
            tracing::warn!(
                error = %err,
                action = %action.kind,
                "Failed to delete consumed relay action; applying anyway"
            );
        }
        Some(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::ContainerPaths;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_opt(1_752_753_600, 0).single().unwrap()
    }

    fn relay_in(root: &std::path::Path) -> (ActionRelay, ManualClock) {
        let clock = ManualClock::new(t0());
        let store = SharedStore::new(ContainerPaths::with_root(root.to_path_buf()), Arc::new(clock.clone()));
        (ActionRelay::new(store), clock)
    }

    #[test]
    fn consume_reads_then_deletes() {
        let temp = tempfile::tempdir().unwrap();
        let (relay, _clock) = relay_in(temp.path());

        assert!(relay.request_action(ActionKind::Stop, Some("A1"), "main"));
        assert_eq!(relay.peek().map(|action| action.kind), Some(ActionKind::Stop));

        let action = relay.consume().unwrap();
        assert_eq!(action.kind, ActionKind::Stop);
        assert_eq!(action.activity_id.as_deref(), Some("A1"));
        assert_eq!(action.issued_at, t0());
        assert_eq!(relay.consume(), None);
    }

    #[test]
    fn unreadable_action_is_cleared() {
        let temp = tempfile::tempdir().unwrap();
        let (relay, _clock) = relay_in(temp.path());
        std::fs::write(temp.path().join("timer-action.json"), "{\"action\":\"skip\"}").unwrap();

        assert_eq!(relay.consume(), None);
        assert!(!temp.path().join("timer-action.json").exists());
    }

    #[test]
    fn request_fails_without_container() {
        let temp = tempfile::tempdir().unwrap();
        let (relay, _clock) = relay_in(&temp.path().join("missing"));
        assert!(!relay.request_action(ActionKind::Pause, None, "main"));
        assert_eq!(relay.consume(), None);
    }

    #[test]
    fn vet_rejects_stale_foreign_and_mismatched_actions() {
        let max_age = Duration::seconds(10);
        let action = RelayAction::new(ActionKind::Pause, Some("A1".into()), t0());

        assert_eq!(vet(&action, t0() + Duration::seconds(3), max_age, "main", Some("A1")), Verdict::Apply);
        assert_eq!(
            vet(&action, t0() + Duration::seconds(11), max_age, "main", Some("A1")),
            Verdict::Stale { age_ms: 11_000 }
        );
        assert!(matches!(
            vet(&action, t0(), max_age, "quick", Some("A1")),
            Verdict::ForeignKind { .. }
        ));
        assert!(matches!(
            vet(&action, t0(), max_age, "main", Some("B2")),
            Verdict::ForeignActivity { .. }
        ));
        assert!(matches!(
            vet(&action, t0(), max_age, "main", None),
            Verdict::ForeignActivity { .. }
        ));

        let untargeted = RelayAction::new(ActionKind::Stop, None, t0());
        assert_eq!(vet(&untargeted, t0(), max_age, "main", None), Verdict::Apply);
    }
}
