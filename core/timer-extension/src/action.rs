use std::sync::Arc;
use timer_core::{ActionRelay, ContainerPaths, SharedStore, SystemClock};
use timer_protocol::ActionKind;

/// Records `kind` in the relay slot. The target defaults to the activity in
/// the published record, so the main process can reject stale taps.
pub fn run(
    paths: Option<&ContainerPaths>,
    kind: ActionKind,
    activity_id: Option<&str>,
    timer_kind: &str,
) -> Result<(), String> {
    let paths = paths.ok_or_else(|| "No shared container configured".to_string())?;
    request(paths, kind, activity_id, timer_kind)
}

pub fn request(
    paths: &ContainerPaths,
    kind: ActionKind,
    activity_id: Option<&str>,
    timer_kind: &str,
) -> Result<(), String> {
    let store = SharedStore::new(paths.clone(), Arc::new(SystemClock));
    let published = match activity_id {
        Some(_) => None,
        None => store.get().and_then(|record| record.activity_id),
    };
    let target = activity_id.or(published.as_deref());

    if ActionRelay::new(store).request_action(kind, target, timer_kind) {
        Ok(())
    } else {
        Err(format!(
            "Failed to record {} action in {}",
            kind,
            paths.root().display()
        ))
    }
}
