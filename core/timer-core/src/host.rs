//! Host surface registration: the collaborator that actually shows the
//! ambient timer.
//!
//! The controller only talks to [`SurfaceHost`]. [`FileSurfaceHost`] is the
//! bridge used by the daemon: it keeps the registrations in `surface.json`
//! in the shared container, where a renderer picks them up. Tests use
//! `RecordingHost` (feature `test-helpers`).

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use timer_protocol::TimerState;
use ulid::Ulid;

use crate::clock::Clock;
use crate::error::HostError;
use crate::storage::ContainerPaths;
use crate::store::{read_optional, write_atomic};

/// Static attributes fixed for the lifetime of an activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityAttributes {
    #[serde(rename = "methodId")]
    pub method_id: String,
    /// Routes relay actions to the controller owning this kind.
    #[serde(rename = "timerType")]
    pub timer_kind: String,
}

/// Everything the host needs to paint one frame of the surface.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceContent {
    pub state: TimerState,
    pub stale_after: DateTime<Utc>,
    pub relevance: u8,
}

/// Opaque token the host issued for a registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActivityHandle(String);

impl ActivityHandle {
    pub fn new(id: impl Into<String>) -> Self {
        ActivityHandle(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ActivityHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dismissal {
    /// Remove the surface now (user stop).
    Immediate,
    /// Let the host keep the final frame up for its usual grace period.
    Default,
}

pub trait SurfaceHost: Send {
    fn register(
        &mut self,
        attributes: &ActivityAttributes,
        content: &SurfaceContent,
    ) -> Result<ActivityHandle, HostError>;

    fn update(&mut self, activity: &ActivityHandle, content: &SurfaceContent) -> Result<(), HostError>;

    fn end(
        &mut self,
        activity: &ActivityHandle,
        final_content: Option<&SurfaceContent>,
        dismissal: Dismissal,
    ) -> Result<(), HostError>;

    /// Registrations the host still shows, including ones this process did
    /// not create (left over from a crash).
    fn active(&self) -> Vec<ActivityHandle>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// File bridge
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize, Deserialize)]
struct SurfaceFile {
    /// `false` when the user turned ambient surfaces off.
    #[serde(default = "enabled_by_default")]
    enabled: bool,
    #[serde(default)]
    activities: BTreeMap<String, Registration>,
}

fn enabled_by_default() -> bool {
    true
}

impl Default for SurfaceFile {
    fn default() -> Self {
        SurfaceFile {
            enabled: true,
            activities: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Registration {
    attributes: ActivityAttributes,
    content: Value,
    #[serde(rename = "staleAfter")]
    stale_after: String,
    relevance: u8,
    #[serde(rename = "registeredAt")]
    registered_at: String,
    #[serde(rename = "endedAt", default, skip_serializing_if = "Option::is_none")]
    ended_at: Option<String>,
}

impl Registration {
    fn apply(&mut self, content: &SurfaceContent) {
        self.content = content.state.to_wire();
        self.stale_after = format_instant(content.stale_after);
        self.relevance = content.relevance;
    }
}

fn format_instant(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// How long a default-dismissed registration keeps its final frame.
pub const ENDED_RETENTION_SECS: i64 = 4 * 3600;

/// Drops default-dismissed registrations whose final frame has expired.
/// An unreadable `endedAt` counts as expired.
fn prune_ended(file: &mut SurfaceFile, now: DateTime<Utc>) {
    let cutoff = now - Duration::seconds(ENDED_RETENTION_SECS);
    file.activities.retain(|id, registration| {
        let Some(ended_at) = registration.ended_at.as_deref() else {
            return true;
        };
        let keep = DateTime::parse_from_rfc3339(ended_at)
            .map(|at| at.with_timezone(&Utc) > cutoff)
            .unwrap_or(false);
        if !keep {
            tracing::debug!(activity_id = %id, "Pruning ended surface registration");
        }
        keep
    });
}

/// Keeps surface registrations in `surface.json`.
///
/// Immediate dismissal deletes the registration. Default dismissal keeps the
/// final frame with an `endedAt` mark so the renderer can fade it out; those
/// entries are pruned after [`ENDED_RETENTION_SECS`].
#[derive(Clone)]
pub struct FileSurfaceHost {
    paths: ContainerPaths,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for FileSurfaceHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSurfaceHost")
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}

impl FileSurfaceHost {
    pub fn new(paths: ContainerPaths, clock: Arc<dyn Clock>) -> Self {
        FileSurfaceHost { paths, clock }
    }

    fn load(&self) -> Result<SurfaceFile, HostError> {
        if !self.paths.exists() {
            return Err(HostError::Unsupported);
        }
        let bytes = read_optional(&self.paths.surface_file()).map_err(bridge_io)?;
        match bytes {
            None => Ok(SurfaceFile::default()),
            Some(bytes) => Ok(serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                tracing::warn!(error = %err, "Surface file is corrupt, starting fresh");
                SurfaceFile::default()
            })),
        }
    }

    fn save(&self, file: &SurfaceFile) -> Result<(), HostError> {
        let bytes = serde_json::to_vec_pretty(file).map_err(|err| HostError::Io {
            context: "encoding surface file".to_string(),
            source: err.into(),
        })?;
        write_atomic(&self.paths.surface_file(), &bytes).map_err(bridge_io)
    }
}

fn bridge_io(err: crate::error::TimerError) -> HostError {
    match err {
        crate::error::TimerError::Io { context, source } => HostError::Io { context, source },
        other => HostError::Io {
            context: other.to_string(),
            source: std::io::Error::other("surface bridge failure"),
        },
    }
}

impl SurfaceHost for FileSurfaceHost {
    fn register(
        &mut self,
        attributes: &ActivityAttributes,
        content: &SurfaceContent,
    ) -> Result<ActivityHandle, HostError> {
        let mut file = self.load()?;
        if !file.enabled {
            return Err(HostError::NotAuthorized);
        }
        let now = self.clock.now();
        prune_ended(&mut file, now);
        let id = Ulid::new().to_string();
        let mut registration = Registration {
            attributes: attributes.clone(),
            content: Value::Null,
            stale_after: String::new(),
            relevance: 0,
            registered_at: format_instant(now),
            ended_at: None,
        };
        registration.apply(content);
        file.activities.insert(id.clone(), registration);
        self.save(&file)?;
        Ok(ActivityHandle(id))
    }

    fn update(&mut self, activity: &ActivityHandle, content: &SurfaceContent) -> Result<(), HostError> {
        let mut file = self.load()?;
        let Some(registration) = file.activities.get_mut(activity.id()) else {
            tracing::debug!(activity_id = %activity, "Update for unknown activity ignored");
            return Ok(());
        };
        registration.apply(content);
        self.save(&file)
    }

    fn end(
        &mut self,
        activity: &ActivityHandle,
        final_content: Option<&SurfaceContent>,
        dismissal: Dismissal,
    ) -> Result<(), HostError> {
        let mut file = self.load()?;
        let now = self.clock.now();
        match dismissal {
            Dismissal::Immediate => {
                file.activities.remove(activity.id());
            }
            Dismissal::Default => {
                if let Some(registration) = file.activities.get_mut(activity.id()) {
                    if let Some(content) = final_content {
                        registration.apply(content);
                    }
                    registration.ended_at = Some(format_instant(now));
                }
            }
        }
        prune_ended(&mut file, now);
        self.save(&file)
    }

    fn active(&self) -> Vec<ActivityHandle> {
        match self.load() {
            Ok(file) => file
                .activities
                .into_iter()
                .filter(|(_, registration)| registration.ended_at.is_none())
                .map(|(id, _)| ActivityHandle(id))
                .collect(),
            Err(err) => {
                tracing::debug!(error = %err, "Surface registrations unavailable");
                Vec::new()
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Recording host (tests)
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(any(test, feature = "test-helpers"))]
pub use recording::{HostCall, RecordingHost};

#[cfg(any(test, feature = "test-helpers"))]
mod recording {
    use std::sync::{Arc, Mutex, MutexGuard};

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub enum HostCall {
        Register {
            id: String,
            attributes: ActivityAttributes,
            content: SurfaceContent,
        },
        Update {
            id: String,
            content: SurfaceContent,
        },
        End {
            id: String,
            content: Option<SurfaceContent>,
            dismissal: Dismissal,
        },
    }

    #[derive(Default)]
    struct Inner {
        calls: Vec<HostCall>,
        active: Vec<ActivityHandle>,
        next_id: u32,
        refusal: Option<fn() -> HostError>,
        fail_updates: bool,
    }

    /// In-memory host that records every call. Clones share the same log.
    #[derive(Clone, Default)]
    pub struct RecordingHost {
        inner: Arc<Mutex<Inner>>,
    }

    impl RecordingHost {
        pub fn new() -> Self {
            Self::default()
        }

        fn lock(&self) -> MutexGuard<'_, Inner> {
            self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
        }

        /// Makes every later `register` fail with `refusal()`.
        pub fn refuse_registration(&self, refusal: fn() -> HostError) {
            self.lock().refusal = Some(refusal);
        }

        pub fn fail_updates(&self, fail: bool) {
            self.lock().fail_updates = fail;
        }

        /// Pretends a registration survived from an earlier process.
        pub fn adopt(&self, id: &str) {
            self.lock().active.push(ActivityHandle::new(id));
        }

        pub fn calls(&self) -> Vec<HostCall> {
            self.lock().calls.clone()
        }

        pub fn active_ids(&self) -> Vec<String> {
            self.lock().active.iter().map(|handle| handle.id().to_string()).collect()
        }

        pub fn last_content(&self) -> Option<SurfaceContent> {
            self.lock().calls.iter().rev().find_map(|call| match call {
                HostCall::Register { content, .. } | HostCall::Update { content, .. } => Some(content.clone()),
                HostCall::End { content, .. } => content.clone(),
            })
        }
    }

    impl SurfaceHost for RecordingHost {
        fn register(
            &mut self,
            attributes: &ActivityAttributes,
            content: &SurfaceContent,
        ) -> Result<ActivityHandle, HostError> {
            let mut inner = self.lock();
            if let Some(refusal) = inner.refusal {
                return Err(refusal());
            }
            inner.next_id += 1;
            let handle = ActivityHandle::new(format!("activity-{}", inner.next_id));
            inner.active.push(handle.clone());
            inner.calls.push(HostCall::Register {
                id: handle.id().to_string(),
                attributes: attributes.clone(),
                content: content.clone(),
            });
            Ok(handle)
        }

        fn update(&mut self, activity: &ActivityHandle, content: &SurfaceContent) -> Result<(), HostError> {
            let mut inner = self.lock();
            if inner.fail_updates {
                return Err(HostError::Background);
            }
            inner.calls.push(HostCall::Update {
                id: activity.id().to_string(),
                content: content.clone(),
            });
            Ok(())
        }

        fn end(
            &mut self,
            activity: &ActivityHandle,
            final_content: Option<&SurfaceContent>,
            dismissal: Dismissal,
        ) -> Result<(), HostError> {
            let mut inner = self.lock();
            inner.active.retain(|handle| handle != activity);
            inner.calls.push(HostCall::End {
                id: activity.id().to_string(),
                content: final_content.cloned(),
                dismissal,
            });
            Ok(())
        }

        fn active(&self) -> Vec<ActivityHandle> {
            self.lock().active.clone()
        }
    }
}
