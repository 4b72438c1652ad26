//! Error types for timer-core operations.

use std::path::PathBuf;

/// Why the host refused or failed a surface operation.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("ambient surfaces are disabled by the user")]
    NotAuthorized,

    #[error("ambient surfaces are not supported on this host")]
    Unsupported,

    #[error("surface requests are not allowed while in the background")]
    Background,

    #[error("surface bridge I/O failed: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// All errors that can occur in timer-core operations.
#[derive(Debug, thiserror::Error)]
pub enum TimerError {
    // ─────────────────────────────────────────────────────────────────────
    // Storage Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("shared container not available at {0}")]
    ContainerUnavailable(PathBuf),

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Controller Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("cannot {action} while {from}")]
    InvalidTransition { from: &'static str, action: &'static str },

    #[error("surface host error: {0}")]
    Host(#[from] HostError),
}

impl TimerError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        TimerError::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        TimerError::Json {
            context: context.into(),
            source,
        }
    }

    /// Short machine-readable code for IPC error responses.
    pub fn code(&self) -> &'static str {
        match self {
            TimerError::ContainerUnavailable(_) => "container_unavailable",
            TimerError::Io { .. } => "io_error",
            TimerError::Json { .. } => "json_error",
            TimerError::ConfigMalformed { .. } => "config_malformed",
            TimerError::InvalidTransition { .. } => "invalid_transition",
            TimerError::Host(_) => "host_error",
        }
    }
}

/// Convenience type alias for Results using TimerError.
pub type Result<T> = std::result::Result<T, TimerError>;

impl From<TimerError> for String {
    fn from(err: TimerError) -> String {
        err.to_string()
    }
}
