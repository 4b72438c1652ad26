use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tempfile::TempDir;
use timer_core::{ActionRelay, ContainerPaths, SharedStore, SystemClock};
use timer_protocol::{ActionKind, Method, Request, Response, DEFAULT_TIMER_KIND};

struct DaemonGuard {
    child: Child,
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn spawn_daemon(home: &Path, container: &Path) -> DaemonGuard {
    let child = Command::new(env!("CARGO_BIN_EXE_timer-daemon"))
        .env("HOME", home)
        .env("AMBIENT_TIMER_CONTAINER", container)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn timer-daemon");
    DaemonGuard { child }
}

fn container_dir(home: &Path) -> PathBuf {
    home.join("group")
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if path.exists() {
            return;
        }
        sleep(Duration::from_millis(25));
    }
    panic!("Timed out waiting for daemon socket at {}", path.display());
}

fn send_request(socket: &Path, method: Method, params: Option<Value>) -> Response {
    let request = Request::new(method, params);
    send_raw(socket, &serde_json::to_vec(&request).expect("Failed to serialize request"))
}

fn send_raw(socket: &Path, body: &[u8]) -> Response {
    let mut stream = UnixStream::connect(socket).expect("Failed to connect to daemon socket");
    stream.write_all(body).expect("Failed to write request");
    stream.write_all(b"\n").expect("Failed to write request");
    stream.flush().ok();
    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Response {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).expect("Failed to read response");
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if chunk[..n].contains(&b'\n') {
            break;
        }
    }

    let response_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    serde_json::from_slice(response_bytes).expect("Failed to parse response JSON")
}

fn data_str<'a>(response: &'a Response, key: &str) -> Option<&'a str> {
    response.data.as_ref().and_then(|data| data.get(key)).and_then(Value::as_str)
}

fn wait_for_phase(socket: &Path, phase: &str, timeout: Duration) -> Response {
    let deadline = Instant::now() + timeout;
    loop {
        let response = send_request(socket, Method::GetState, None);
        if data_str(&response, "phase") == Some(phase) || Instant::now() >= deadline {
            return response;
        }
        sleep(Duration::from_millis(50));
    }
}

#[test]
fn test_health_start_pause_and_state() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    let container = container_dir(home.path());
    let _guard = spawn_daemon(home.path(), &container);
    let socket = container.join("daemon.sock");
    wait_for_socket(&socket, Duration::from_secs(2));

    let health = send_request(&socket, Method::GetHealth, None);
    assert!(health.ok, "health response was not ok");
    assert_eq!(data_str(&health, "status"), Some("ok"));
    assert_eq!(data_str(&health, "timer_kind"), Some(DEFAULT_TIMER_KIND));

    let idle = send_request(&socket, Method::GetState, None);
    assert_eq!(data_str(&idle, "phase"), Some("idle"));

    let started = send_request(
        &socket,
        Method::Start,
        Some(json!({"label": "Session A", "duration": 300})),
    );
    assert!(started.ok, "start failed: {:?}", started.error);
    assert_eq!(data_str(&started, "phase"), Some("running"));
    assert!(data_str(&started, "activity_id").is_some());
    assert!(container.join("timer-state.json").exists());

    let paused = send_request(&socket, Method::Pause, None);
    assert!(paused.ok);
    assert_eq!(data_str(&paused, "phase"), Some("paused"));

    let again = send_request(&socket, Method::Pause, None);
    assert!(!again.ok);
    assert_eq!(again.error.map(|err| err.code), Some("invalid_transition".to_string()));

    let resumed = send_request(&socket, Method::Resume, None);
    assert_eq!(data_str(&resumed, "phase"), Some("running"));
}

#[test]
fn test_relayed_stop_is_applied_by_ticker() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    let container = container_dir(home.path());
    let _guard = spawn_daemon(home.path(), &container);
    let socket = container.join("daemon.sock");
    wait_for_socket(&socket, Duration::from_secs(2));

    let started = send_request(
        &socket,
        Method::Start,
        Some(json!({"label": "Session A", "duration": 300})),
    );
    let activity_id = data_str(&started, "activity_id").expect("activity id").to_string();

    let store = SharedStore::new(ContainerPaths::with_root(container.clone()), Arc::new(SystemClock));
    let relay = ActionRelay::new(store);
    assert!(relay.request_action(ActionKind::Stop, Some(&activity_id), DEFAULT_TIMER_KIND));

    let state = wait_for_phase(&socket, "ended", Duration::from_secs(3));
    assert_eq!(data_str(&state, "phase"), Some("ended"));
    assert!(!container.join("timer-action.json").exists());
    assert!(!container.join("timer-state.json").exists());
}

#[test]
fn test_stop_is_idempotent_and_bad_requests_are_rejected() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    let container = container_dir(home.path());
    let _guard = spawn_daemon(home.path(), &container);
    let socket = container.join("daemon.sock");
    wait_for_socket(&socket, Duration::from_secs(2));

    let first = send_request(&socket, Method::Stop, None);
    assert!(first.ok);
    let second = send_request(&socket, Method::Stop, None);
    assert!(second.ok);

    let garbage = send_raw(&socket, b"{not json");
    assert!(!garbage.ok);
    assert_eq!(garbage.error.map(|err| err.code), Some("invalid_json".to_string()));

    let mismatch = send_raw(
        &socket,
        br#"{"protocol_version": 99, "method": "get_state"}"#,
    );
    assert_eq!(mismatch.error.map(|err| err.code), Some("protocol_mismatch".to_string()));

    let missing = send_request(&socket, Method::Start, None);
    assert_eq!(missing.error.map(|err| err.code), Some("invalid_params".to_string()));

    let invalid = send_request(&socket, Method::Start, Some(json!({"label": "", "duration": 60})));
    assert_eq!(invalid.error.map(|err| err.code), Some("missing_field".to_string()));
}

#[test]
fn test_push_and_foreground_paths() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    let container = container_dir(home.path());
    let _guard = spawn_daemon(home.path(), &container);
    let socket = container.join("daemon.sock");
    wait_for_socket(&socket, Duration::from_secs(2));

    let started_at = chrono::Utc::now().timestamp() - 30;
    let pushed = send_request(
        &socket,
        Method::Push,
        Some(json!({"payload": {
            "label": "Pushed",
            "startedAt": started_at,
            "duration": 600,
            "mode": "countdown",
        }})),
    );
    assert!(pushed.ok, "push failed: {:?}", pushed.error);
    assert_eq!(data_str(&pushed, "phase"), Some("running"));

    let foreground = send_request(
        &socket,
        Method::Foreground,
        Some(json!({"elapsed": 45, "state": "paused", "total_duration": 600})),
    );
    assert!(foreground.ok, "foreground failed: {:?}", foreground.error);
    assert_eq!(data_str(&foreground, "phase"), Some("paused"));

    let rejected = send_request(&socket, Method::Foreground, Some(json!({"state": "dancing"})));
    assert_eq!(rejected.error.map(|err| err.code), Some("invalid_params".to_string()));
}

#[test]
fn test_shutdown_tears_down_and_exits() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    let container = container_dir(home.path());
    let mut guard = spawn_daemon(home.path(), &container);
    let socket = container.join("daemon.sock");
    wait_for_socket(&socket, Duration::from_secs(2));

    send_request(&socket, Method::Start, Some(json!({"label": "Session A", "duration": 60})));
    let response = send_request(&socket, Method::Shutdown, None);
    assert!(response.ok);
    assert_eq!(data_str(&response, "phase"), Some("ended"));

    let deadline = Instant::now() + Duration::from_secs(2);
    let status = loop {
        if let Some(status) = guard.child.try_wait().expect("wait on daemon") {
            break status;
        }
        assert!(Instant::now() < deadline, "daemon did not exit after shutdown");
        sleep(Duration::from_millis(25));
    };
    assert!(status.success());
    assert!(!socket.exists());
    assert!(!container.join("timer-state.json").exists());
}
