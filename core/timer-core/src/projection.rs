//! Pure projections over [`TimerState`] and "now".
//!
//! Both processes call these, so the numbers the extension paints and the
//! numbers the main process acts on never disagree. Nothing here touches the
//! filesystem or the clock.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use timer_protocol::{ActionKind, RelayAction, TimerMode, TimerState};

use crate::store::TimerRecord;

/// Default window for [`horizon`] (8 hours).
pub const DEFAULT_HORIZON_SECS: i64 = 8 * 3600;

pub const RELEVANCE_RUNNING: u8 = 100;
pub const RELEVANCE_PAUSED: u8 = 50;

pub const COMPLETION_NOTE: &str = "Timer completed!";

/// Time accumulated so far, excluding pauses. Never negative.
pub fn elapsed(state: &TimerState, now: DateTime<Utc>) -> Duration {
    let until = state.paused_at.unwrap_or(now);
    (until - state.started_at).max(Duration::zero())
}

/// Time left on a countdown or interval, clamped to `[0, duration]`.
/// `None` for modes without a planned duration.
pub fn remaining(state: &TimerState, now: DateTime<Utc>) -> Option<Duration> {
    if !state.mode.has_fixed_duration() {
        return None;
    }
    Some((state.duration - elapsed(state, now)).clamp(Duration::zero(), state.duration.max(Duration::zero())))
}

pub fn is_running(state: &TimerState) -> bool {
    state.is_running()
}

/// Staleness horizon handed to the host surface.
///
/// Far enough out that the host never marks the surface stale and re-invokes
/// the extension just because a short window lapsed. A running countdown that
/// ends beyond the window pushes the horizon out to its end.
pub fn horizon(state: &TimerState, now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    let floor = now.checked_add_signed(window).unwrap_or(DateTime::<Utc>::MAX_UTC);
    match end_time(state) {
        Some(end) if end > floor => end,
        _ => floor,
    }
}

/// Display priority: paused timers matter less to keep fresh.
pub fn relevance(state: &TimerState) -> u8 {
    if state.is_running() {
        RELEVANCE_RUNNING
    } else {
        RELEVANCE_PAUSED
    }
}

/// Fraction of the plan completed, in `[0, 1]`. Always 0 for count-up.
pub fn progress(state: &TimerState, now: DateTime<Utc>) -> f64 {
    if !state.mode.has_fixed_duration() {
        return 0.0;
    }
    let total = state.duration.num_milliseconds();
    if total <= 0 {
        return 1.0;
    }
    (elapsed(state, now).num_milliseconds() as f64 / total as f64).clamp(0.0, 1.0)
}

/// Wall-clock instant a running countdown reaches zero. `None` while paused
/// or for modes without a plan.
pub fn end_time(state: &TimerState) -> Option<DateTime<Utc>> {
    (state.mode.has_fixed_duration() && state.is_running()).then(|| state.planned_end())
}

/// True once a countdown or interval has nothing left.
pub fn is_finished(state: &TimerState, now: DateTime<Utc>) -> bool {
    remaining(state, now).is_some_and(|left| left <= Duration::zero())
}

/// `m:ss` under an hour, `h:mm:ss` from there. Negative input reads as zero.
pub fn format_clock(duration: Duration) -> String {
    let total = duration.num_seconds().max(0);
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

/// The state the extension should show while `action` is still pending.
///
/// Uses the same anchor arithmetic the main process will apply, so when the
/// confirmed state lands the display barely moves. `None` means "show
/// nothing" (a pending stop).
pub fn optimistic(state: &TimerState, action: &RelayAction) -> Option<TimerState> {
    let mut next = state.clone();
    match action.kind {
        ActionKind::Stop => return None,
        ActionKind::Pause => {
            if next.is_running() {
                next.paused_at = Some(action.issued_at.max(next.started_at));
            }
        }
        ActionKind::Resume => {
            if let Some(paused_at) = next.paused_at.take() {
                let delta = (action.issued_at - paused_at).max(Duration::zero());
                next.started_at += delta;
            }
        }
    }
    Some(next)
}

/// What the extension paints.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SurfaceView {
    /// Nothing to display: no record, a pending stop, or an unreadable store.
    Empty,
    Timer(TimerView),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimerView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
    pub label: String,
    pub mode: TimerMode,
    pub running: bool,
    /// Remaining time for countdowns, elapsed time otherwise.
    pub clock: String,
    pub elapsed_secs: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_secs: Option<i64>,
    pub progress: f64,
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Set while an unconsumed relay action is reflected in this view.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<ActionKind>,
}

impl SurfaceView {
    /// Projects the published record, overlaying `pending` when it targets
    /// this activity and was issued after the record was written. An action
    /// older than the record has already been applied (or dropped) by the
    /// main process, so the record wins.
    pub fn project(record: Option<&TimerRecord>, pending: Option<&RelayAction>, now: DateTime<Utc>) -> Self {
        let Some(record) = record else {
            return SurfaceView::Empty;
        };

        let overlay = pending.filter(|action| {
            action.timer_kind == record.timer_kind
                && action.issued_at >= record.updated_at
                && match (&action.activity_id, &record.activity_id) {
                    (Some(wanted), Some(current)) => wanted == current,
                    (None, _) => true,
                    (Some(_), None) => false,
                }
        });

        let state = match overlay {
            Some(action) => match optimistic(&record.state, action) {
                Some(state) => state,
                None => return SurfaceView::Empty,
            },
            None => record.state.clone(),
        };

        let so_far = elapsed(&state, now);
        let left = remaining(&state, now);
        let completed = state.completed || state.mode == TimerMode::Completed;
        let clock = if completed {
            format_clock(Duration::zero())
        } else {
            format_clock(left.unwrap_or(so_far))
        };
        let note = if completed {
            Some(state.completion_note.clone().unwrap_or_else(|| COMPLETION_NOTE.to_string()))
        } else {
            None
        };

        SurfaceView::Timer(TimerView {
            activity_id: record.activity_id.clone(),
            running: state.is_running() && !completed,
            clock,
            elapsed_secs: so_far.num_seconds(),
            remaining_secs: left.map(|left| left.num_seconds()),
            progress: progress(&state, now),
            completed,
            note,
            pending: overlay.map(|action| action.kind),
            label: state.label,
            mode: state.mode,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_opt(1_752_753_600, 0).single().unwrap()
    }

    fn secs(n: i64) -> Duration {
        Duration::seconds(n)
    }

    fn countdown(duration: i64) -> TimerState {
        TimerState::new("Session A", secs(duration), TimerMode::Countdown, t0())
    }

    #[test]
    fn elapsed_and_remaining_track_running_countdown() {
        let state = countdown(300);
        assert_eq!(elapsed(&state, t0() + secs(60)), secs(60));
        assert_eq!(remaining(&state, t0() + secs(60)), Some(secs(240)));
        assert_eq!(remaining(&state, t0() + secs(900)), Some(Duration::zero()));
        assert!(is_finished(&state, t0() + secs(300)));
        assert!(!is_finished(&state, t0() + secs(299)));
    }

    #[test]
    fn elapsed_freezes_while_paused() {
        let mut state = countdown(300);
        state.paused_at = Some(t0() + secs(60));
        assert_eq!(elapsed(&state, t0() + secs(600)), secs(60));
        assert_eq!(remaining(&state, t0() + secs(600)), Some(secs(240)));
        assert_eq!(end_time(&state), None);
    }

    #[test]
    fn elapsed_is_never_negative() {
        let state = countdown(300);
        assert_eq!(elapsed(&state, t0() - secs(30)), Duration::zero());
        assert_eq!(remaining(&state, t0() - secs(30)), Some(secs(300)));
    }

    #[test]
    fn countup_has_no_remaining() {
        let state = TimerState::new("Walk", secs(0), TimerMode::Countup, t0());
        assert_eq!(remaining(&state, t0() + secs(10)), None);
        assert_eq!(progress(&state, t0() + secs(10)), 0.0);
        assert!(!is_finished(&state, t0() + secs(10_000)));
    }

    #[test]
    fn horizon_is_hours_out_and_covers_long_countdowns() {
        let short = countdown(300);
        assert_eq!(horizon(&short, t0(), secs(DEFAULT_HORIZON_SECS)), t0() + Duration::hours(8));

        let long = countdown(10 * 3600);
        assert_eq!(horizon(&long, t0(), secs(DEFAULT_HORIZON_SECS)), t0() + Duration::hours(10));
    }

    #[test]
    fn horizon_saturates_near_the_end_of_time() {
        let mut state = countdown(30 * 86_400);
        state.started_at = DateTime::<Utc>::MAX_UTC - Duration::days(1);
        let now = DateTime::<Utc>::MAX_UTC - Duration::hours(1);

        assert_eq!(end_time(&state), Some(DateTime::<Utc>::MAX_UTC));
        assert_eq!(horizon(&state, now, secs(DEFAULT_HORIZON_SECS)), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn relevance_drops_when_paused() {
        let mut state = countdown(300);
        assert_eq!(relevance(&state), RELEVANCE_RUNNING);
        state.paused_at = Some(t0());
        assert_eq!(relevance(&state), RELEVANCE_PAUSED);
    }

    #[test]
    fn progress_is_bounded() {
        let state = countdown(200);
        assert_eq!(progress(&state, t0() + secs(50)), 0.25);
        assert_eq!(progress(&state, t0() + secs(5000)), 1.0);
        assert_eq!(progress(&countdown(0), t0()), 1.0);
    }

    #[test]
    fn format_clock_switches_to_hours() {
        assert_eq!(format_clock(secs(0)), "0:00");
        assert_eq!(format_clock(secs(65)), "1:05");
        assert_eq!(format_clock(secs(3599)), "59:59");
        assert_eq!(format_clock(secs(3600)), "1:00:00");
        assert_eq!(format_clock(secs(36_061)), "10:01:01");
        assert_eq!(format_clock(secs(-5)), "0:00");
    }

    #[test]
    fn optimistic_pause_then_resume_matches_anchor_rule() {
        let state = countdown(300);
        let pause = RelayAction::new(ActionKind::Pause, None, t0() + secs(60));
        let paused = optimistic(&state, &pause).unwrap();
        assert_eq!(paused.paused_at, Some(t0() + secs(60)));

        let resume = RelayAction::new(ActionKind::Resume, None, t0() + secs(600));
        let resumed = optimistic(&paused, &resume).unwrap();
        assert!(resumed.is_running());
        assert_eq!(elapsed(&resumed, t0() + secs(600)), secs(60));

        let stop = RelayAction::new(ActionKind::Stop, None, t0());
        assert_eq!(optimistic(&state, &stop), None);
    }

    #[test]
    fn surface_view_overlays_only_fresh_matching_actions() {
        let record = TimerRecord::new(Some("A1".into()), "main", countdown(300), t0());
        let now = t0() + secs(60);

        let fresh = RelayAction::new(ActionKind::Pause, Some("A1".into()), t0() + secs(30));
        match SurfaceView::project(Some(&record), Some(&fresh), now) {
            SurfaceView::Timer(view) => {
                assert_eq!(view.pending, Some(ActionKind::Pause));
                assert!(!view.running);
                assert_eq!(view.clock, "4:30");
            }
            SurfaceView::Empty => panic!("expected a timer view"),
        }

        let other = RelayAction::new(ActionKind::Stop, Some("B2".into()), t0() + secs(30));
        match SurfaceView::project(Some(&record), Some(&other), now) {
            SurfaceView::Timer(view) => {
                assert_eq!(view.pending, None);
                assert_eq!(view.clock, "4:00");
            }
            SurfaceView::Empty => panic!("foreign action must not hide the timer"),
        }

        let stale = RelayAction::new(ActionKind::Stop, Some("A1".into()), t0() - secs(5));
        assert!(matches!(
            SurfaceView::project(Some(&record), Some(&stale), now),
            SurfaceView::Timer(_)
        ));

        let stop = RelayAction::new(ActionKind::Stop, Some("A1".into()), t0() + secs(1));
        assert_eq!(SurfaceView::project(Some(&record), Some(&stop), now), SurfaceView::Empty);
        assert_eq!(SurfaceView::project(None, None, now), SurfaceView::Empty);
    }

    #[test]
    fn surface_view_shows_completion_note() {
        let mut state = countdown(60);
        state.completed = true;
        let record = TimerRecord::new(None, "main", state, t0());
        match SurfaceView::project(Some(&record), None, t0() + secs(61)) {
            SurfaceView::Timer(view) => {
                assert!(view.completed);
                assert!(!view.running);
                assert_eq!(view.note.as_deref(), Some(COMPLETION_NOTE));
                assert_eq!(view.clock, "0:00");
            }
            SurfaceView::Empty => panic!("expected a timer view"),
        }
    }
}
