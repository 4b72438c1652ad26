//! Paints the surface from the shared store.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use timer_core::{ActionRelay, ContainerPaths, SharedStore, SurfaceView, SystemClock};

pub fn run(paths: Option<&ContainerPaths>, json: bool) {
    let view = match paths {
        Some(paths) => current_view(paths, Utc::now()),
        None => {
            tracing::warn!("No shared container configured; rendering empty view");
            SurfaceView::Empty
        }
    };
    println!("{}", format_view(&view, json));
}

pub fn current_view(paths: &ContainerPaths, now: DateTime<Utc>) -> SurfaceView {
    let store = SharedStore::new(paths.clone(), Arc::new(SystemClock));
    let record = store.get();
    let pending = ActionRelay::new(store).peek();
    let view = SurfaceView::project(record.as_ref(), pending.as_ref(), now);
    tracing::debug!(
        has_record = record.is_some(),
        pending = ?pending.as_ref().map(|action| action.kind),
        "Rendered surface view"
    );
    view
}

pub fn format_view(view: &SurfaceView, json: bool) -> String {
    if json {
        return serde_json::to_string(view).unwrap_or_else(|_| "{\"kind\":\"empty\"}".to_string());
    }
    match view {
        SurfaceView::Empty => String::new(),
        SurfaceView::Timer(timer) => {
            let status = if timer.completed {
                timer.note.clone().unwrap_or_default()
            } else if timer.running {
                String::new()
            } else {
                "paused".to_string()
            };
            let mut line = format!("{} {}", timer.label, timer.clock);
            if !status.is_empty() {
                line.push_str(&format!(" ({})", status));
            }
            if timer.pending.is_some() {
                line.push_str(" …");
            }
            line
        }
    }
}
