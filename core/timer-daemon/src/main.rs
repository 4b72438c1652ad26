//! Ambient timer daemon entrypoint.
//!
//! The daemon is the main process: the only writer of the timer record. It
//! serves a small control socket inside the shared container and polls the
//! relay slot on a fixed cadence so actions taken in the rendering extension
//! land even when nobody is talking to the socket.

use fs_err as fs;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration as StdDuration;

use chrono::Duration;
use clap::Parser;
use serde_json::Value;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use timer_core::{
    ContainerPaths, FileSurfaceHost, ForegroundSnapshot, PollTrigger, SharedStore, SyncConfig,
    SyncController, SystemClock, TimerError,
};
use timer_protocol::{
    parse_push, parse_start, parse_update, ErrorInfo, Method, Request, Response,
    MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};

mod state;

use state::SharedController;

const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;
const DEBUG_LOG_ENV: &str = "AMBIENT_TIMER_DEBUG_LOG";

#[derive(Parser, Debug)]
#[command(name = "timer-daemon", version, about = "Owns the ambient timer and serves its control socket")]
struct Cli {
    /// Shared container directory (defaults to $AMBIENT_TIMER_CONTAINER or ~/.ambient-timer/group)
    #[arg(long)]
    container: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    init_logging();

    let paths = match cli.container.map(ContainerPaths::with_root).or_else(ContainerPaths::from_env) {
        Some(paths) => paths,
        None => {
            error!("Failed to resolve shared container: no override and no home directory");
            std::process::exit(1);
        }
    };

    if let Err(err) = paths.provision() {
        error!(error = %err, path = %paths.root().display(), "Failed to provision shared container");
        std::process::exit(1);
    }

    let socket_path = paths.socket_file();
    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    let config = SyncConfig::load_or_default(&paths.config_file());
    info!(
        path = %socket_path.display(),
        poll_interval_ms = config.poll_interval_ms,
        timer_kind = %config.timer_kind,
        "Ambient timer daemon started"
    );

    let clock = Arc::new(SystemClock);
    let store = SharedStore::new(paths.clone(), clock.clone());
    let host = Box::new(FileSurfaceHost::new(paths.clone(), clock.clone()));
    let poll_interval = config.poll_interval();
    let shared = Arc::new(SharedController::new(SyncController::new(store, host, clock, config)));

    spawn_ticker(Arc::clone(&shared), poll_interval);

    let paths = Arc::new(paths);
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let shared = Arc::clone(&shared);
                let paths = Arc::clone(&paths);
                thread::spawn(move || handle_connection(stream, &shared, &paths));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

fn spawn_ticker(shared: Arc<SharedController>, interval: StdDuration) {
    thread::spawn(move || loop {
        thread::sleep(interval);
        match shared.tick() {
            Ok(report) => {
                if report.applied.is_some() || report.completed {
                    tracing::debug!(applied = ?report.applied, completed = report.completed, "Tick");
                }
            }
            Err(err) => warn!(error = %err, "Periodic tick failed"),
        }
    });
}

fn init_logging() {
    let debug_enabled = env::var(DEBUG_LOG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, shared: &SharedController, paths: &ContainerPaths) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let shutdown = request.method == Method::Shutdown && request.protocol_version == PROTOCOL_VERSION;
    let response = handle_request(request, shared, paths);
    let _ = write_response(&mut stream, response);

    if shutdown {
        let _ = remove_existing_socket(&paths.socket_file());
        info!("Ambient timer daemon stopped");
        std::process::exit(0);
    }
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(StdDuration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    let request_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, shared: &SharedController, paths: &ContainerPaths) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    let id = request.id;
    if request.method == Method::Shutdown {
        shared.teardown();
        return snapshot_response(id, &shared.lock());
    }
    let mut controller = shared.lock();

    let outcome: Result<(), Response> = match request.method {
        Method::GetHealth => {
            let config = controller.config();
            return Response::ok(
                id,
                serde_json::json!({
                    "status": "ok",
                    "pid": std::process::id(),
                    "version": env!("CARGO_PKG_VERSION"),
                    "protocol_version": PROTOCOL_VERSION,
                    "poll_interval_ms": config.poll_interval_ms,
                    "timer_kind": config.timer_kind,
                    "container": paths.root().display().to_string(),
                }),
            );
        }
        Method::GetState => Ok(()),
        Method::Start => match require_params(request.params, "start").and_then(parse_start) {
            Ok(params) => controller
                .start(&params.label, seconds(params.duration), params.mode())
                .map_err(|err| timer_error(id.clone(), err)),
            Err(err) => Err(Response::error_with_info(id.clone(), err)),
        },
        Method::Pause => controller.pause().map_err(|err| timer_error(id.clone(), err)),
        Method::Resume => controller.resume().map_err(|err| timer_error(id.clone(), err)),
        Method::Stop => controller.stop().map_err(|err| timer_error(id.clone(), err)),
        Method::Update => match require_params(request.params, "update").and_then(parse_update) {
            Ok(params) => controller
                .update(seconds(params.elapsed), params.is_running, params.is_paused)
                .map(|_| ())
                .map_err(|err| timer_error(id.clone(), err)),
            Err(err) => Err(Response::error_with_info(id.clone(), err)),
        },
        Method::Push => match require_params(request.params, "push").and_then(parse_push) {
            Ok(params) => controller
                .apply_push(&params.payload_bytes())
                .map(|generation| {
                    tracing::debug!(generation = generation.as_str(), "Push applied");
                })
                .map_err(|err| timer_error(id.clone(), err)),
            Err(err) => Err(Response::error_with_info(id.clone(), err)),
        },
        Method::Foreground => {
            let mirrored = match request.params {
                Some(params) => match serde_json::from_value::<ForegroundSnapshot>(params) {
                    Ok(snapshot) => controller.mirror(&snapshot).map(|_| ()),
                    Err(err) => {
                        return Response::error(
                            id,
                            "invalid_params",
                            format!("foreground payload is invalid: {}", err),
                        )
                    }
                },
                None => Ok(()),
            };
            mirrored
                .and_then(|_| controller.poll_relay(PollTrigger::Foreground).map(|_| ()))
                .map_err(|err| timer_error(id.clone(), err))
        }
        Method::Shutdown => Ok(()),
    };

    if let Err(response) = outcome {
        return response;
    }

    if !matches!(request.method, Method::GetState | Method::Foreground) {
        if let Err(err) = controller.poll_relay(PollTrigger::Observation) {
            warn!(error = %err, "Relay poll after control request failed");
        }
    }

    snapshot_response(id, &controller)
}

fn snapshot_response(id: Option<String>, controller: &SyncController) -> Response {
    match serde_json::to_value(controller.snapshot()) {
        Ok(value) => Response::ok(id, value),
        Err(err) => Response::error(
            id,
            "serialization_error",
            format!("Failed to serialize timer snapshot: {}", err),
        ),
    }
}

fn require_params(params: Option<Value>, method: &str) -> Result<Value, ErrorInfo> {
    params.ok_or_else(|| ErrorInfo::new("invalid_params", format!("{} payload is required", method)))
}

fn timer_error(id: Option<String>, err: TimerError) -> Response {
    Response::error(id, err.code(), err.to_string())
}

fn seconds(value: f64) -> Duration {
    Duration::milliseconds((value * 1000.0).round() as i64)
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
