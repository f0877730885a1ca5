//! Supervisor lifecycle tests with real child processes
//!
//! A scripted loopback `/health` endpoint controls how many probes fail
//! before the backend counts as up; timings are shrunk so the full poll
//! budget runs in milliseconds. Child processes are stock shell utilities.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;

use machsight_core::{
    BackendCommand, BackendSupervisor, Error, Startup, SupervisorEvent, SupervisorState, Timings,
};

/// Health endpoint that starts answering 200 from the `healthy_from`-th hit.
struct HealthScript {
    hits: AtomicU32,
    healthy_from: u32,
}

async fn health(State(script): State<Arc<HealthScript>>) -> Response {
    let hit = script.hits.fetch_add(1, Ordering::SeqCst) + 1;
    if hit < script.healthy_from {
        StatusCode::SERVICE_UNAVAILABLE.into_response()
    } else {
        Json(json!({
            "status": "healthy",
            "timestamp": "2024-03-01T08:00:00",
            "db_stats": {}
        }))
        .into_response()
    }
}

async fn start_health_server(healthy_from: u32) -> (Arc<HealthScript>, String) {
    let script = Arc::new(HealthScript {
        hits: AtomicU32::new(0),
        healthy_from,
    });
    let app = Router::new()
        .route("/health", get(health))
        .with_state(script.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (script, base_url)
}

/// Fast timings so the whole poll budget elapses in well under a second.
fn test_timings() -> Timings {
    Timings {
        probe_timeout: Duration::from_millis(250),
        poll_interval: Duration::from_millis(5),
        max_poll_attempts: 60,
        progress_every: 5,
        terminate_wait: Duration::from_secs(3),
        kill_wait: Duration::from_secs(1),
    }
}

fn long_running_child() -> BackendCommand {
    BackendCommand {
        program: PathBuf::from("sleep"),
        args: vec!["60".to_string()],
        working_dir: std::env::temp_dir(),
    }
}

fn drain(rx: &mut UnboundedReceiver<SupervisorEvent>) -> Vec<SupervisorEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_precheck_attaches_to_running_backend() {
    let (script, base_url) = start_health_server(1).await;
    let mut supervisor =
        BackendSupervisor::new(&base_url, long_running_child(), test_timings()).unwrap();
    let mut events = supervisor.subscribe();

    let startup = supervisor.ensure_running().await.unwrap();

    assert_eq!(startup, Startup::AlreadyRunning);
    assert_eq!(supervisor.state(), SupervisorState::Ready);
    assert!(!supervisor.has_child());
    // Exactly the one pre-check probe hit the server.
    assert_eq!(script.hits.load(Ordering::SeqCst), 1);

    let events = drain(&mut events);
    assert!(matches!(events[0], SupervisorEvent::PreChecking));
    assert!(events
        .iter()
        .any(|e| matches!(e, SupervisorEvent::AlreadyRunning)));
}

#[tokio::test]
async fn test_polling_stops_at_first_success() {
    // Pre-check fails (hit 1), polls fail twice (hits 2-3), succeed on hit 4.
    let (script, base_url) = start_health_server(4).await;
    let mut supervisor =
        BackendSupervisor::new(&base_url, long_running_child(), test_timings()).unwrap();
    let mut events = supervisor.subscribe();

    let startup = supervisor.ensure_running().await.unwrap();

    assert_eq!(startup, Startup::Spawned { attempts: 3 });
    assert_eq!(supervisor.state(), SupervisorState::Ready);
    assert!(supervisor.has_child());
    // No probe after the successful one.
    assert_eq!(script.hits.load(Ordering::SeqCst), 4);

    let events = drain(&mut events);
    assert!(events.iter().any(|e| matches!(e, SupervisorEvent::Spawned { .. })));
    assert!(events.iter().any(|e| matches!(e, SupervisorEvent::Ready { .. })));

    supervisor.shutdown().await;
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
    assert!(!supervisor.has_child());
}

#[tokio::test]
async fn test_polling_exhaustion_reports_timeout() {
    let (script, base_url) = start_health_server(u32::MAX).await;
    let mut supervisor =
        BackendSupervisor::new(&base_url, long_running_child(), test_timings()).unwrap();
    let mut events = supervisor.subscribe();

    let err = supervisor.ensure_running().await.unwrap_err();

    // A timeout, not a connection error, and it names its bound.
    match &err {
        Error::HealthCheckTimeout { attempts, .. } => assert_eq!(*attempts, 60),
        other => panic!("expected HealthCheckTimeout, got {:?}", other),
    }
    assert!(err.is_fatal_startup());
    assert_eq!(supervisor.state(), SupervisorState::TimedOut);

    // Pre-check plus the full poll budget, then polling stopped.
    assert_eq!(script.hits.load(Ordering::SeqCst), 61);

    // A progress notice every 5th attempt.
    let progress = drain(&mut events)
        .iter()
        .filter(|e| matches!(e, SupervisorEvent::WaitingForBackend { .. }))
        .count();
    assert_eq!(progress, 12);

    // The child is still held and gets cleaned up by shutdown.
    assert!(supervisor.has_child());
    supervisor.shutdown().await;
    assert!(!supervisor.has_child());
}

#[tokio::test]
async fn test_child_exit_during_polling_is_spawn_failure() {
    let (_script, base_url) = start_health_server(u32::MAX).await;
    let command = BackendCommand {
        program: PathBuf::from("true"),
        args: Vec::new(),
        working_dir: std::env::temp_dir(),
    };
    let mut supervisor = BackendSupervisor::new(&base_url, command, test_timings()).unwrap();

    let err = supervisor.ensure_running().await.unwrap_err();

    match err {
        Error::ProcessStart(message) => assert!(message.contains("exited")),
        other => panic!("expected ProcessStart, got {:?}", other),
    }
    assert_eq!(supervisor.state(), SupervisorState::SpawnFailed);
}

#[tokio::test]
async fn test_missing_executable_is_spawn_failure() {
    // Nothing listens on the probe port either, so the pre-check fails fast.
    let command = BackendCommand {
        program: PathBuf::from("/nonexistent/machsight-backend"),
        args: Vec::new(),
        working_dir: std::env::temp_dir(),
    };
    let mut supervisor =
        BackendSupervisor::new("http://127.0.0.1:9", command, test_timings()).unwrap();
    let mut events = supervisor.subscribe();

    let err = supervisor.ensure_running().await.unwrap_err();

    assert!(matches!(err, Error::ProcessStart(_)));
    assert!(err.is_fatal_startup());
    assert_eq!(supervisor.state(), SupervisorState::SpawnFailed);
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, SupervisorEvent::SpawnFailed(_))));
}

#[tokio::test]
async fn test_graceful_shutdown_of_cooperative_child() {
    let (_script, base_url) = start_health_server(2).await;
    let mut supervisor =
        BackendSupervisor::new(&base_url, long_running_child(), test_timings()).unwrap();

    supervisor.ensure_running().await.unwrap();
    assert!(supervisor.has_child());

    let started = Instant::now();
    supervisor.shutdown().await;

    // sleep dies on SIGTERM; no need for the forced-kill path.
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
    assert!(!supervisor.has_child());
}

#[tokio::test]
async fn test_forced_kill_after_ignored_terminate() {
    let (_script, base_url) = start_health_server(2).await;
    let command = BackendCommand {
        program: PathBuf::from("sh"),
        args: vec![
            "-c".to_string(),
            "trap '' TERM; while :; do sleep 0.2; done".to_string(),
        ],
        working_dir: std::env::temp_dir(),
    };
    let mut timings = test_timings();
    timings.terminate_wait = Duration::from_millis(300);
    timings.kill_wait = Duration::from_secs(2);

    let mut supervisor = BackendSupervisor::new(&base_url, command, timings).unwrap();
    supervisor.ensure_running().await.unwrap();

    let started = Instant::now();
    supervisor.shutdown().await;
    let elapsed = started.elapsed();

    // The grace period elapsed in full before the kill landed.
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_secs(3));
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
    assert!(!supervisor.has_child());
}
