//! File logging for the extension.
//!
//! Stdout is the render output, so logs go to `<container>/logs/extension.log`.
//! Without a container they fall back to stderr at `warn`.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use timer_core::ContainerPaths;

const DEBUG_ENV: &str = "AMBIENT_TIMER_DEBUG_LOG";

/// Installs the subscriber. Hold the guard until exit or buffered lines are lost.
pub fn init(paths: Option<&ContainerPaths>) -> Option<WorkerGuard> {
    let filter = filter("info");

    let logs_dir = paths.filter(|paths| paths.exists()).map(ContainerPaths::logs_dir);
    let Some(logs_dir) = logs_dir.filter(|dir| fs_err::create_dir_all(dir).is_ok()) else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter_or(filter, "warn"))
            .with_writer(std::io::stderr)
            .try_init();
        return None;
    };

    let appender = tracing_appender::rolling::never(logs_dir, "extension.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init();
    Some(guard)
}

fn debug_enabled() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false)
}

fn filter(default: &str) -> EnvFilter {
    if debug_enabled() {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
    }
}

/// Keeps an explicit `RUST_LOG`/debug override, otherwise uses `fallback`.
fn filter_or(current: EnvFilter, fallback: &str) -> EnvFilter {
    if debug_enabled() || std::env::var_os("RUST_LOG").is_some() {
        current
    } else {
        EnvFilter::new(fallback)
    }
}
