//! File-backed shared store in the app-group container.
//!
//! Two files, two writers:
//!
//! - `timer-state.json`: the current [`TimerRecord`], written only by the main
//!   process and read by everyone.
//! - `timer-action.json`: the single-slot relay, written by the extension and
//!   consumed by the main process.
//!
//! # File Format
//!
//! ```json
//! {
//!   "version": 1,
//!   "activityId": "01J3...",
//!   "timerType": "main",
//!   "state": { ... TimerState wire fields ... },
//!   "updatedAt": "2025-07-17T12:00:00.000Z"
//! }
//! ```
//!
//! A bare timer state document (no envelope) is also accepted, since older
//! builds wrote the state directly.
//!
//! # Failure Handling
//!
//! The plain methods fail closed: a missing container, an empty file, corrupt
//! JSON, or an unknown version all read as `None`, and failed writes return
//! `false`, each with a warning. The `try_*` variants carry the cause for
//! callers that need it.
//!
//! # Atomic Writes
//!
//! Uses temp file + rename in the container directory, so a concurrent reader
//! sees either the old record or the new one, never a prefix.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use timer_protocol::{decode_timer_value, read_instant, RelayAction, TimerState, DEFAULT_TIMER_KIND};

use crate::clock::Clock;
use crate::error::{Result, TimerError};
use crate::storage::ContainerPaths;

/// Envelope version. Files with any other version read as absent.
pub const RECORD_VERSION: u32 = 1;

/// What the main process publishes for the extension to paint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimerRecord {
    pub version: u32,
    /// `None` when the host refused the surface; the session still runs.
    #[serde(rename = "activityId", skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
    #[serde(rename = "timerType")]
    pub timer_kind: String,
    pub state: TimerState,
    #[serde(rename = "updatedAt", serialize_with = "serialize_instant")]
    pub updated_at: DateTime<Utc>,
}

impl TimerRecord {
    pub fn new(
        activity_id: Option<String>,
        timer_kind: impl Into<String>,
        state: TimerState,
        updated_at: DateTime<Utc>,
    ) -> Self {
        TimerRecord {
            version: RECORD_VERSION,
            activity_id,
            timer_kind: timer_kind.into(),
            state,
            updated_at,
        }
    }
}

fn serialize_instant<S: serde::Serializer>(at: &DateTime<Utc>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
}

/// Lenient read-side shape; the state itself goes through the decode chain.
#[derive(Debug, Deserialize)]
struct RawRecord {
    version: u32,
    #[serde(rename = "activityId", default)]
    activity_id: Option<String>,
    #[serde(rename = "timerType", default)]
    timer_kind: Option<String>,
    state: Value,
    #[serde(rename = "updatedAt", default)]
    updated_at: Option<Value>,
}

#[derive(Clone)]
pub struct SharedStore {
    paths: ContainerPaths,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SharedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStore").field("paths", &self.paths).finish()
    }
}

impl SharedStore {
    pub fn new(paths: ContainerPaths, clock: Arc<dyn Clock>) -> Self {
        SharedStore { paths, clock }
    }

    pub fn paths(&self) -> &ContainerPaths {
        &self.paths
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // ─────────────────────────────────────────────────────────────────────
    // Timer record
    // ─────────────────────────────────────────────────────────────────────

    pub fn put(&self, record: &TimerRecord) -> bool {
        self.try_put(record)
            .map_err(|err| tracing::warn!(error = %err, "Failed to write timer record"))
            .is_ok()
    }

    pub fn get(&self) -> Option<TimerRecord> {
        self.try_get()
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "Failed to read timer record");
                None
            })
    }

    pub fn clear(&self) -> bool {
        self.try_clear()
            .map_err(|err| tracing::warn!(error = %err, "Failed to clear timer record"))
            .is_ok()
    }

    pub fn try_put(&self, record: &TimerRecord) -> Result<()> {
        self.ensure_container()?;
        let bytes = serde_json::to_vec_pretty(record).map_err(|err| TimerError::json("encoding timer record", err))?;
        write_atomic(&self.paths.state_file(), &bytes)
    }

    pub fn try_get(&self) -> Result<Option<TimerRecord>> {
        self.ensure_container()?;
        let Some(bytes) = read_optional(&self.paths.state_file())? else {
            return Ok(None);
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            tracing::warn!("Empty timer record file, treating as absent");
            return Ok(None);
        }
        let value: Value =
            serde_json::from_slice(&bytes).map_err(|err| TimerError::json("parsing timer record", err))?;
        Ok(self.record_from_value(value))
    }

    pub fn try_clear(&self) -> Result<()> {
        self.ensure_container()?;
        remove_if_present(&self.paths.state_file())
    }

    fn record_from_value(&self, value: Value) -> Option<TimerRecord> {
        let now = self.clock.now();
        let (activity_id, timer_kind, state_value, updated_at) = if value.get("state").is_some() {
            let raw: RawRecord = match serde_json::from_value(value) {
                Ok(raw) => raw,
                Err(err) => {
                    tracing::warn!(error = %err, "Timer record envelope is malformed");
                    return None;
                }
            };
            if raw.version != RECORD_VERSION {
                tracing::warn!(
                    version = raw.version,
                    expected = RECORD_VERSION,
                    "Unsupported timer record version, treating as absent"
                );
                return None;
            }
            let updated_at = raw
                .updated_at
                .as_ref()
                .and_then(|raw| read_instant(raw).ok())
                .map(|read| read.at);
            (raw.activity_id, raw.timer_kind, raw.state, updated_at)
        } else {
            (None, None, value, None)
        };

        let decoded = decode_timer_value(&state_value, now);
        if let Some(err) = &decoded.error {
            tracing::warn!(
                generation = decoded.generation.as_str(),
                error = %err,
                "Timer record state needed fallback decoding"
            );
        }
        for diagnostic in &decoded.diagnostics {
            tracing::debug!(?diagnostic, "Timer record decode repair");
        }

        Some(TimerRecord {
            version: RECORD_VERSION,
            activity_id,
            timer_kind: timer_kind.unwrap_or_else(|| DEFAULT_TIMER_KIND.to_string()),
            state: decoded.state,
            updated_at: updated_at.unwrap_or(now),
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Relay slot
    // ─────────────────────────────────────────────────────────────────────

    pub fn write_action(&self, action: &RelayAction) -> bool {
        self.try_write_action(action)
            .map_err(|err| tracing::warn!(error = %err, "Failed to write relay action"))
            .is_ok()
    }

    pub fn read_action(&self) -> Option<RelayAction> {
        self.try_read_action().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "Failed to read relay action");
            None
        })
    }

    pub fn clear_action(&self) -> bool {
        self.try_clear_action()
            .map_err(|err| tracing::warn!(error = %err, "Failed to clear relay action"))
            .is_ok()
    }

    pub fn try_write_action(&self, action: &RelayAction) -> Result<()> {
        self.ensure_container()?;
        let bytes = serde_json::to_vec(action).map_err(|err| TimerError::json("encoding relay action", err))?;
        write_atomic(&self.paths.action_file(), &bytes)
    }

    pub fn try_read_action(&self) -> Result<Option<RelayAction>> {
        self.ensure_container()?;
        let Some(bytes) = read_optional(&self.paths.action_file())? else {
            return Ok(None);
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|err| TimerError::json("parsing relay action", err))
    }

    pub fn try_clear_action(&self) -> Result<()> {
        self.ensure_container()?;
        remove_if_present(&self.paths.action_file())
    }

    fn ensure_container(&self) -> Result<()> {
        if self.paths.exists() {
            Ok(())
        } else {
            Err(TimerError::ContainerUnavailable(self.paths.root().to_path_buf()))
        }
    }
}

/// Writes `bytes` to `path` via a sibling temp file and rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| TimerError::ContainerUnavailable(path.to_path_buf()))?;
    let mut temp_file = NamedTempFile::new_in(parent).map_err(|err| TimerError::io("creating temp file", err))?;
    temp_file
        .write_all(bytes)
        .map_err(|err| TimerError::io("writing temp file", err))?;
    temp_file
        .flush()
        .map_err(|err| TimerError::io("flushing temp file", err))?;
    temp_file
        .persist(path)
        .map_err(|err| TimerError::io(format!("replacing {}", path.display()), err.error))?;
    Ok(())
}

pub(crate) fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs_err::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(TimerError::io("reading shared file", err)),
    }
}

pub(crate) fn remove_if_present(path: &Path) -> Result<()> {
    match fs_err::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(TimerError::io("removing shared file", err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use timer_protocol::{ActionKind, TimerMode};

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_opt(1_752_753_600, 0).single().unwrap()
    }

    fn store_in(root: &Path) -> SharedStore {
        SharedStore::new(
            ContainerPaths::with_root(root.to_path_buf()),
            Arc::new(ManualClock::new(t0())),
        )
    }

    fn sample_record() -> TimerRecord {
        let state = TimerState::new("Session A", Duration::seconds(300), TimerMode::Countdown, t0());
        TimerRecord::new(Some("01J3ACTIVITY".into()), "main", state, t0())
    }

    #[test]
    fn put_get_clear_cycle() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(temp.path());

        assert_eq!(store.get(), None);
        assert!(store.put(&sample_record()));
        assert_eq!(store.get(), Some(sample_record()));
        assert!(store.clear());
        assert_eq!(store.get(), None);
        assert!(store.clear(), "clearing an absent record succeeds");
    }

    #[test]
    fn missing_container_fails_closed() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(&temp.path().join("not-provisioned"));

        assert!(!store.put(&sample_record()));
        assert_eq!(store.get(), None);
        assert!(!store.clear());
        assert!(!store.write_action(&RelayAction::new(ActionKind::Pause, None, t0())));
        assert_eq!(store.read_action(), None);
        assert!(!store.clear_action());
        assert!(matches!(store.try_get(), Err(TimerError::ContainerUnavailable(_))));
        assert!(!temp.path().join("not-provisioned").exists(), "store never provisions");
    }

    #[test]
    fn corrupt_and_empty_files_read_as_absent() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(temp.path());

        std::fs::write(store.paths().state_file(), "").unwrap();
        assert_eq!(store.get(), None);

        std::fs::write(store.paths().state_file(), "{\"version\": 1, \"state\": ").unwrap();
        assert_eq!(store.get(), None);

        std::fs::write(store.paths().action_file(), "not json").unwrap();
        assert_eq!(store.read_action(), None);
        assert!(store.try_read_action().is_err());
    }

    #[test]
    fn unsupported_version_reads_as_absent() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(temp.path());
        let mut raw = serde_json::to_value(sample_record()).unwrap();
        raw["version"] = json!(7);
        std::fs::write(store.paths().state_file(), raw.to_string()).unwrap();
        assert_eq!(store.get(), None);
    }

    #[test]
    fn bare_legacy_state_is_accepted() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(temp.path());
        let legacy = json!({
            "startTime": 1_752_753_600,
            "endTime": 1_752_754_200,
            "isPaused": false
        });
        std::fs::write(store.paths().state_file(), legacy.to_string()).unwrap();

        let record = store.get().unwrap();
        assert_eq!(record.activity_id, None);
        assert_eq!(record.timer_kind, DEFAULT_TIMER_KIND);
        assert_eq!(record.state.duration, Duration::seconds(600));
    }

    #[test]
    fn garbage_state_inside_envelope_uses_emergency_state() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(temp.path());
        let raw = json!({"version": 1, "activityId": "A1", "state": "???"});
        std::fs::write(store.paths().state_file(), raw.to_string()).unwrap();

        let record = store.get().unwrap();
        assert_eq!(record.activity_id.as_deref(), Some("A1"));
        assert_eq!(record.state, TimerState::emergency(t0()));
    }

    #[test]
    fn action_slot_is_last_writer_wins() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(temp.path());

        assert!(store.write_action(&RelayAction::new(ActionKind::Pause, Some("A1".into()), t0())));
        assert!(store.write_action(&RelayAction::new(ActionKind::Resume, Some("A1".into()), t0())));
        assert_eq!(store.read_action().map(|action| action.kind), Some(ActionKind::Resume));
        assert!(store.clear_action());
        assert_eq!(store.read_action(), None);
    }

    #[test]
    fn writes_leave_no_temp_files_behind() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(temp.path());
        for _ in 0..5 {
            assert!(store.put(&sample_record()));
        }
        let names: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("timer-state.json")]);
    }
}
