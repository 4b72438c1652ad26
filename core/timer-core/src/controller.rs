//! The synchronization controller: sole owner of the authoritative timer in
//! the main process.
//!
//! # Phases
//!
//! ```text
//! Idle ──start──▶ Running ◀──resume── Paused
//!                   │  └────pause────▶  │
//!                   ├──stop──▶ Ended ◀──┘ (stop from either)
//!                   └──tick (countdown done)──▶ Completed
//! ```
//!
//! Relay actions, pushes, and `update` from a foreground authority all drive
//! the same transitions; they are trigger sources, not separate machines.
//!
//! # Publishing
//!
//! Every change is published twice: to the host surface (with a staleness
//! horizon and relevance score) and to the shared store for the extension.
//! Host failures are logged and never abort a transition. On stop and
//! completion the store is cleared as the very last step, so a racing
//! extension read cannot resurrect the timer.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use timer_protocol::{decode_timer_state, ActionKind, Generation, TimerMode, TimerState, PLACEHOLDER_LABEL};

use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::error::{Result, TimerError};
use crate::foreground::{ForegroundPhase, ForegroundTimerService};
use crate::host::{ActivityAttributes, ActivityHandle, Dismissal, SurfaceContent, SurfaceHost};
use crate::projection::{self, COMPLETION_NOTE};
use crate::relay::{vet, ActionRelay, PollTrigger, Verdict};
use crate::store::{SharedStore, TimerRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Running,
    Paused,
    Ended,
    Completed,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Running => "running",
            Phase::Paused => "paused",
            Phase::Ended => "ended",
            Phase::Completed => "completed",
        }
    }

    /// Running or paused.
    pub fn is_active(self) -> bool {
        matches!(self, Phase::Running | Phase::Paused)
    }
}

/// What a `tick` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TickReport {
    pub applied: Option<ActionKind>,
    pub completed: bool,
}

/// Read-only view of the controller for status queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerSnapshot {
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<TimerState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_secs: Option<f64>,
}

pub struct SyncController {
    store: SharedStore,
    relay: ActionRelay,
    host: Box<dyn SurfaceHost>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    phase: Phase,
    state: Option<TimerState>,
    activity: Option<ActivityHandle>,
}

impl SyncController {
    pub fn new(store: SharedStore, host: Box<dyn SurfaceHost>, clock: Arc<dyn Clock>, config: SyncConfig) -> Self {
        SyncController {
            relay: ActionRelay::new(store.clone()),
            store,
            host,
            clock,
            config,
            phase: Phase::Idle,
            state: None,
            activity: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> Option<&TimerState> {
        self.state.as_ref()
    }

    pub fn activity_id(&self) -> Option<&str> {
        self.activity.as_ref().map(ActivityHandle::id)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        let now = self.clock.now();
        ControllerSnapshot {
            phase: self.phase,
            activity_id: self.activity_id().map(str::to_string),
            state: self.state.clone(),
            elapsed_secs: self.state.as_ref().map(|state| secs_f64(projection::elapsed(state, now))),
            remaining_secs: self
                .state
                .as_ref()
                .and_then(|state| projection::remaining(state, now))
                .map(secs_f64),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Transitions
    // ─────────────────────────────────────────────────────────────────────

    /// Starts a fresh timer, replacing anything currently shown.
    pub fn start(&mut self, label: &str, duration: Duration, mode: TimerMode) -> Result<()> {
        self.begin(label, label, duration, mode)
    }

    fn begin(&mut self, label: &str, method_id: &str, duration: Duration, mode: TimerMode) -> Result<()> {
        let now = self.clock.now();
        self.end_all_activities();
        if !self.relay_slot_cleared() {
            tracing::debug!("Leftover relay action could not be cleared before start");
        }

        let state = TimerState::new(label, duration, mode, now);
        self.activity = self.register(method_id, &state, now);
        self.state = Some(state);
        self.phase = Phase::Running;
        self.write_record(now);

        tracing::info!(
            label,
            mode = %mode,
            duration_secs = duration.num_seconds(),
            activity_id = ?self.activity_id(),
            "Timer started"
        );
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        self.require(Phase::Running, "pause")?;
        let now = self.clock.now();
        if let Some(state) = self.state.as_mut() {
            state.paused_at = Some(now);
        }
        self.phase = Phase::Paused;
        self.publish(now);
        tracing::info!(activity_id = ?self.activity_id(), "Timer paused");
        Ok(())
    }

    /// Excises the pause from the anchor, so elapsed time carries over.
    pub fn resume(&mut self) -> Result<()> {
        self.require(Phase::Paused, "resume")?;
        let now = self.clock.now();
        if let Some(state) = self.state.as_mut() {
            resume_anchor(state, now);
        }
        self.phase = Phase::Running;
        self.publish(now);
        tracing::info!(activity_id = ?self.activity_id(), "Timer resumed");
        Ok(())
    }

    /// Reconciles with an external authority's elapsed time and run state.
    ///
    /// Returns whether anything was republished.
    pub fn update(&mut self, elapsed: Duration, is_running: bool, is_paused: bool) -> Result<bool> {
        if !is_running && !is_paused {
            if self.phase.is_active() {
                self.stop()?;
                return Ok(true);
            }
            return Ok(false);
        }
        if !self.phase.is_active() {
            tracing::debug!(phase = self.phase.as_str(), "Update ignored without an active timer");
            return Ok(false);
        }

        let now = self.clock.now();
        let elapsed = elapsed.max(Duration::zero());
        let tolerance = self.config.drift_tolerance();
        let phase = self.phase;
        let Some(state) = self.state.as_mut() else {
            return Ok(false);
        };

        let next_phase = match (phase, is_paused) {
            (Phase::Paused, true) => return Ok(false),
            (Phase::Running, true) => {
                state.paused_at = Some(now);
                state.started_at = now - elapsed;
                Phase::Paused
            }
            (Phase::Paused, false) => {
                resume_anchor(state, now);
                if drift(state, now, elapsed) > tolerance {
                    state.started_at = now - elapsed;
                }
                Phase::Running
            }
            _ => {
                if drift(state, now, elapsed) <= tolerance {
                    return Ok(false);
                }
                state.started_at = now - elapsed;
                Phase::Running
            }
        };

        self.phase = next_phase;
        self.publish(now);
        tracing::debug!(
            phase = next_phase.as_str(),
            elapsed_ms = elapsed.num_milliseconds(),
            "Timer reconciled with external authority"
        );
        Ok(true)
    }

    /// Mirrors a foreground timer service, starting or stopping as needed.
    pub fn mirror(&mut self, service: &dyn ForegroundTimerService) -> Result<bool> {
        let phase = service.timer_state();
        let elapsed = service.current_elapsed_time();
        if phase == ForegroundPhase::Stopped {
            return self.update(elapsed, false, false);
        }

        if !self.phase.is_active() {
            let label = service
                .current_method_name()
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| PLACEHOLDER_LABEL.to_string());
            let method_id = service.current_method_id().unwrap_or_else(|| label.clone());
            let total = service.total_duration();
            let mode = if total > Duration::zero() {
                TimerMode::Countdown
            } else {
                TimerMode::Countup
            };
            tracing::debug!(start_time = ?service.start_time(), "Mirroring a foreground session");
            self.begin(&label, &method_id, total, mode)?;
        }

        self.update(elapsed, phase == ForegroundPhase::Running, phase == ForegroundPhase::Paused)
            .map(|_| true)
    }

    /// Ends the timer. Accepted from any phase; a no-op when nothing is active.
    pub fn stop(&mut self) -> Result<()> {
        if !self.phase.is_active() {
            tracing::debug!(phase = self.phase.as_str(), "Stop ignored, no active timer");
            return Ok(());
        }
        let now = self.clock.now();
        let final_content = self.state.as_ref().map(|state| self.content_for(state, now));
        if let Some(activity) = self.activity.take() {
            self.end_activity(&activity, final_content.as_ref(), Dismissal::Immediate);
        }
        self.relay_slot_cleared();
        self.state = None;
        self.phase = Phase::Ended;
        self.store.clear();
        tracing::info!("Timer stopped");
        Ok(())
    }

    fn complete(&mut self, now: DateTime<Utc>) {
        let Some(mut state) = self.state.take() else {
            return;
        };
        state.completed = true;
        state
            .completion_note
            .get_or_insert_with(|| COMPLETION_NOTE.to_string());
        let final_content = self.content_for(&state, now);
        if let Some(activity) = self.activity.take() {
            self.end_activity(&activity, Some(&final_content), Dismissal::Default);
        }
        self.relay_slot_cleared();
        self.phase = Phase::Completed;
        self.store.clear();
        tracing::info!(label = %state.label, "Timer completed");
    }

    /// Applies a pushed timer state document.
    ///
    /// Pushes go through the same decode chain as every other reader. While a
    /// timer is active an emergency decode is ignored: the current state is a
    /// better live timer than the placeholder. With nothing active the push
    /// starts a new activity.
    pub fn apply_push(&mut self, payload: &[u8]) -> Result<Generation> {
        let now = self.clock.now();
        let decoded = decode_timer_state(payload, now);
        if let Some(err) = &decoded.error {
            tracing::warn!(generation = decoded.generation.as_str(), error = %err, "Push payload needed fallback decoding");
        }
        for diagnostic in &decoded.diagnostics {
            tracing::debug!(?diagnostic, "Push payload repaired");
        }

        if self.phase.is_active() && decoded.is_emergency() {
            tracing::warn!("Ignoring undecodable push while a timer is active");
            return Ok(decoded.generation);
        }

        let state = decoded.state;
        if state.completed || state.mode == TimerMode::Completed {
            if self.phase.is_active() {
                self.state = Some(state);
                self.complete(now);
            }
            return Ok(decoded.generation);
        }

        if !self.phase.is_active() {
            self.end_all_activities();
            self.relay_slot_cleared();
            self.activity = self.register(&state.label, &state, now);
            tracing::info!(activity_id = ?self.activity_id(), label = %state.label, "Timer started from push");
        }
        self.phase = if state.is_running() {
            Phase::Running
        } else {
            Phase::Paused
        };
        self.state = Some(state);
        self.publish(now);
        Ok(decoded.generation)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Relay & tick
    // ─────────────────────────────────────────────────────────────────────

    /// Consumes and applies a pending relay action. Returns what was applied.
    pub fn poll_relay(&mut self, trigger: PollTrigger) -> Result<Option<ActionKind>> {
        let Some(action) = self.relay.consume() else {
            return Ok(None);
        };
        let now = self.clock.now();
        let verdict = vet(
            &action,
            now,
            self.config.max_action_age(),
            &self.config.timer_kind,
            self.activity_id(),
        );
        if verdict != Verdict::Apply {
            tracing::info!(
                action = %action.kind,
                trigger = trigger.as_str(),
                ?verdict,
                "Relay action dropped"
            );
            return Ok(None);
        }

        tracing::info!(action = %action.kind, trigger = trigger.as_str(), "Applying relay action");
        match (action.kind, self.phase) {
            (ActionKind::Stop, _) => self.stop()?,
            (ActionKind::Pause, Phase::Running) => self.pause()?,
            (ActionKind::Resume, Phase::Paused) => self.resume()?,
            (kind, phase) => {
                tracing::info!(action = %kind, phase = phase.as_str(), "Relay action is a no-op in this phase");
                return Ok(None);
            }
        }
        Ok(Some(action.kind))
    }

    /// Periodic work: relay poll, then natural completion.
    pub fn tick(&mut self) -> Result<TickReport> {
        let applied = self.poll_relay(PollTrigger::Tick)?;
        let now = self.clock.now();
        let finished = self.phase == Phase::Running
            && self
                .state
                .as_ref()
                .is_some_and(|state| projection::is_finished(state, now));
        if finished {
            self.complete(now);
        }
        Ok(TickReport {
            applied,
            completed: finished,
        })
    }

    /// Explicit end of the process-scoped controller.
    pub fn teardown(&mut self) {
        if self.phase.is_active() {
            let now = self.clock.now();
            let final_content = self.state.as_ref().map(|state| self.content_for(state, now));
            if let Some(activity) = self.activity.take() {
                self.end_activity(&activity, final_content.as_ref(), Dismissal::Default);
            }
            self.store.clear();
            tracing::info!("Controller torn down with an active timer");
        }
        self.state = None;
        self.phase = Phase::Ended;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Publishing
    // ─────────────────────────────────────────────────────────────────────

    fn require(&self, expected: Phase, action: &'static str) -> Result<()> {
        if self.phase == expected && self.state.is_some() {
            Ok(())
        } else {
            Err(TimerError::InvalidTransition {
                from: self.phase.as_str(),
                action,
            })
        }
    }

    fn content_for(&self, state: &TimerState, now: DateTime<Utc>) -> SurfaceContent {
        SurfaceContent {
            state: state.clone(),
            stale_after: projection::horizon(state, now, self.config.horizon()),
            relevance: projection::relevance(state),
        }
    }

    fn register(&mut self, method_id: &str, state: &TimerState, now: DateTime<Utc>) -> Option<ActivityHandle> {
        let attributes = ActivityAttributes {
            method_id: method_id.to_string(),
            timer_kind: self.config.timer_kind.clone(),
        };
        let content = self.content_for(state, now);
        match self.host.register(&attributes, &content) {
            Ok(handle) => Some(handle),
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    method_id,
                    timer_kind = %attributes.timer_kind,
                    "Ambient surface registration refused; continuing without it"
                );
                None
            }
        }
    }

    fn publish(&mut self, now: DateTime<Utc>) {
        let Some(state) = self.state.as_ref() else {
            return;
        };
        let content = self.content_for(state, now);
        if let Some(activity) = &self.activity {
            if let Err(err) = self.host.update(activity, &content) {
                tracing::warn!(error = %err, activity_id = %activity, "Ambient surface update failed");
            }
        }
        self.write_record(now);
    }

    fn write_record(&self, now: DateTime<Utc>) {
        let Some(state) = self.state.clone() else {
            return;
        };
        let record = TimerRecord::new(
            self.activity_id().map(str::to_string),
            self.config.timer_kind.clone(),
            state,
            now,
        );
        if !self.store.put(&record) {
            tracing::warn!("Timer record not published; extension will show stale state");
        }
    }

    fn end_activity(&mut self, activity: &ActivityHandle, content: Option<&SurfaceContent>, dismissal: Dismissal) {
        if let Err(err) = self.host.end(activity, content, dismissal) {
            tracing::warn!(error = %err, activity_id = %activity, "Ending ambient surface failed");
        }
    }

    /// At most one ambient timer: ends ours and any the host still shows.
    fn end_all_activities(&mut self) {
        if let Some(activity) = self.activity.take() {
            self.end_activity(&activity, None, Dismissal::Immediate);
        }
        for leftover in self.host.active() {
            tracing::info!(activity_id = %leftover, "Ending leftover ambient surface");
            self.end_activity(&leftover, None, Dismissal::Immediate);
        }
    }

    fn relay_slot_cleared(&self) -> bool {
        self.store.clear_action()
    }
}

fn resume_anchor(state: &mut TimerState, now: DateTime<Utc>) {
    if let Some(paused_at) = state.paused_at.take() {
        let delta = (now - paused_at).max(Duration::zero());
        state.started_at += delta;
    }
}

fn drift(state: &TimerState, now: DateTime<Utc>, authority: Duration) -> Duration {
    (projection::elapsed(state, now) - authority).abs()
}

fn secs_f64(duration: Duration) -> f64 {
    duration.num_milliseconds() as f64 / 1000.0
}
