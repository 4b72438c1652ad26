//! Wire types shared by the ambient timer processes.
//!
//! The main process, the rendering extension, and the push path all read and
//! write the same small JSON documents without ever talking to each other
//! directly. Keeping every shape in one crate prevents schema drift between
//! them. The daemon control envelope lives here too so clients can build
//! valid requests.

pub mod action;
pub mod decode;
pub mod state;
pub mod timestamp;

pub use action::{ActionKind, RelayAction, DEFAULT_TIMER_KIND};
pub use decode::{decode_timer_state, decode_timer_value, DecodeError, Decoded, Diagnostic, Generation};
pub use state::{TimerMode, TimerState, EMERGENCY_DURATION_SECS, PLACEHOLDER_LABEL};
pub use timestamp::{read_instant, ReadInstant, REFERENCE_EPOCH_DELTA_SECS};

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB

/// Longest label accepted over the control socket.
pub const MAX_LABEL_CHARS: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    Start,
    Pause,
    Resume,
    Stop,
    Update,
    Push,
    GetState,
    Foreground,
    Shutdown,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(method: Method, params: Option<Value>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            method,
            id: None,
            params,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartParams {
    pub label: String,
    /// Planned duration in seconds. Ignored for count-up timers.
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub mode: Option<String>,
}

impl StartParams {
    pub fn mode(&self) -> TimerMode {
        self.mode
            .as_deref()
            .and_then(TimerMode::parse)
            .unwrap_or(TimerMode::Countdown)
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_string(&self.label, "label")?;
        if self.label.chars().count() > MAX_LABEL_CHARS {
            return Err(ErrorInfo::new(
                "invalid_label",
                format!("label must be {} characters or fewer", MAX_LABEL_CHARS),
            ));
        }
        require_seconds(self.duration, "duration")?;
        if let Some(mode) = &self.mode {
            if TimerMode::parse(mode).is_none() {
                return Err(ErrorInfo::new(
                    "invalid_mode",
                    format!("unknown timer mode `{}`", mode),
                ));
            }
        }
        if self.mode().has_fixed_duration() && self.duration <= 0.0 {
            return Err(ErrorInfo::new(
                "invalid_duration",
                "duration must be positive for countdown and interval timers",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateParams {
    /// Elapsed seconds as reported by the foreground authority.
    pub elapsed: f64,
    pub is_running: bool,
    pub is_paused: bool,
}

impl UpdateParams {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_seconds(self.elapsed, "elapsed")?;
        if self.is_running && self.is_paused {
            return Err(ErrorInfo::new(
                "invalid_params",
                "is_running and is_paused are mutually exclusive",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PushParams {
    /// A timer state document, or a string carrying its raw bytes.
    pub payload: Value,
}

impl PushParams {
    /// Raw bytes to hand to the decoder. Strings pass through verbatim so a
    /// push relay can forward bodies it never parsed.
    pub fn payload_bytes(&self) -> Vec<u8> {
        match &self.payload {
            Value::String(raw) => raw.clone().into_bytes(),
            other => other.to_string().into_bytes(),
        }
    }
}

pub fn parse_start(params: Value) -> Result<StartParams, ErrorInfo> {
    let parsed: StartParams = parse_params(params, "start")?;
    parsed.validate()?;
    Ok(parsed)
}

pub fn parse_update(params: Value) -> Result<UpdateParams, ErrorInfo> {
    let parsed: UpdateParams = parse_params(params, "update")?;
    parsed.validate()?;
    Ok(parsed)
}

pub fn parse_push(params: Value) -> Result<PushParams, ErrorInfo> {
    parse_params(params, "push")
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Value, method: &str) -> Result<T, ErrorInfo> {
    serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("{} payload is invalid: {}", method, err),
        )
    })
}

fn require_string(value: &str, field: &str) -> Result<(), ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        ));
    }
    Ok(())
}

fn require_seconds(value: f64, field: &str) -> Result<(), ErrorInfo> {
    if !value.is_finite() || !(0.0..=decode::MAX_DURATION_SECS).contains(&value) {
        return Err(ErrorInfo::new(
            "invalid_duration",
            format!("{} must be a non-negative number of seconds", field),
        ));
    }
    Ok(())
}
