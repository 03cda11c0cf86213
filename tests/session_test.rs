//! Player Session Tests
//!
//! Runs real child processes (`sh` scripts standing in for mpv) against a
//! fake mpv IPC server on a Unix socket. Covers launch, reply correlation,
//! the single-fire exit signal, teardown, and progress tracking.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use kitsunari::stream::ipc::IpcEndpoint;
use kitsunari::stream::{
    ExitReason, LaunchRequest, PlayerConfig, PlayerError, PlayerSession, ProgressTick,
    ProgressTracker, SessionState,
};

const STREAM_URL: &str = "https://cdn.example/ep1.m3u8";

// =============================================================================
// Helpers
// =============================================================================

/// A player config that runs `script` under `sh` instead of mpv
fn fake_player(script: &str, ipc_dir: &Path) -> PlayerConfig {
    PlayerConfig {
        binary: "sh".to_string(),
        launcher_args: vec!["-c".into(), script.into(), "fake-mpv".into()],
        fullscreen: false,
        ipc_dir: ipc_dir.to_path_buf(),
        connect_timeout: Duration::from_secs(2),
        connect_interval: Duration::from_millis(20),
        query_timeout: Duration::from_millis(500),
        grace_period: Duration::from_millis(300),
        ..PlayerConfig::default()
    }
}

/// Launch the fake player and accept its control connection.
///
/// The socket is bound only after launch started, since launch clears any
/// stale file at the endpoint path first.
async fn launch_with_ipc(config: &PlayerConfig, path: &Path) -> (PlayerSession, UnixStream) {
    let endpoint = IpcEndpoint::new(path.to_path_buf());
    let server = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let listener = UnixListener::bind(path).unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        stream
    };

    let (session, stream) = tokio::join!(
        PlayerSession::launch_at(config, endpoint, LaunchRequest::new(STREAM_URL)),
        server
    );
    (session.unwrap(), stream)
}

/// Fake mpv: answers property queries and forwards pushed events
struct FakeMpv {
    events: mpsc::UnboundedSender<Value>,
    _task: JoinHandle<()>,
}

fn serve(stream: UnixStream, position: f64, duration: Option<f64>) -> FakeMpv {
    let (events, mut rx) = mpsc::unbounded_channel::<Value>();
    let task = tokio::spawn(async move {
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        loop {
            let out = tokio::select! {
                line = lines.next_line() => {
                    let Ok(Some(line)) = line else { break };
                    let request: Value = serde_json::from_str(&line).unwrap();
                    let id = request["request_id"].clone();
                    match request["command"][1].as_str() {
                        Some("time-pos") => json!({"data": position, "error": "success", "request_id": id}),
                        Some("duration") => match duration {
                            Some(d) => json!({"data": d, "error": "success", "request_id": id}),
                            None => json!({"data": null, "error": "property unavailable", "request_id": id}),
                        },
                        _ => json!({"error": "success", "request_id": id}),
                    }
                }
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            if write.write_all(format!("{}\n", out).as_bytes()).await.is_err() {
                break;
            }
        }
    });
    FakeMpv {
        events,
        _task: task,
    }
}

fn socket_in(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("mpv.sock")
}

// =============================================================================
// Launch Tests
// =============================================================================

/// Test: A missing player binary is reported as not found and leaves no socket
#[tokio::test]
async fn test_launch_missing_binary() {
    let dir = tempfile::tempdir().unwrap();
    let config = PlayerConfig {
        binary: "kitsunari-no-such-player".to_string(),
        ipc_dir: dir.path().to_path_buf(),
        ..PlayerConfig::default()
    };

    let result = PlayerSession::launch(&config, LaunchRequest::new(STREAM_URL)).await;

    match result {
        Err(PlayerError::NotFound(name)) => assert_eq!(name, "kitsunari-no-such-player"),
        other => panic!("Expected NotFound, got {:?}", other),
    }
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

/// Test: Launch removes a stale socket file left by a crashed run
#[tokio::test]
async fn test_launch_clears_stale_socket() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_in(&dir);
    std::fs::write(&path, b"stale").unwrap();

    let config = fake_player("exec sleep 30", dir.path());
    let (session, _stream) = launch_with_ipc(&config, &path).await;

    assert!(session.has_channel());
    assert_eq!(session.state(), SessionState::Connected);
    session.terminate().await;
}

/// Test: Without a control channel the session degrades but still tracks the process
#[tokio::test]
async fn test_no_channel_degraded_mode() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fake_player("sleep 0.3", dir.path());
    config.connect_timeout = Duration::from_millis(100);

    let session = PlayerSession::launch(&config, LaunchRequest::new(STREAM_URL).starting_at(42))
        .await
        .unwrap();

    assert!(!session.has_channel());
    assert!(matches!(
        session.query_state().await,
        Err(PlayerError::ChannelUnavailable)
    ));
    assert!(session.elapsed_estimate() >= 42);

    let reason = tokio::time::timeout(Duration::from_secs(5), session.exited())
        .await
        .unwrap();
    assert_eq!(reason, ExitReason::ProcessExited(Some(0)));
    assert!(!session.is_running());
}

// =============================================================================
// Query Tests
// =============================================================================

/// Test: Replies are matched by request_id even when they arrive out of order
/// with events in between
#[tokio::test]
async fn test_query_state_correlates_out_of_order_replies() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_in(&dir);
    let config = fake_player("exec sleep 30", dir.path());
    let (session, stream) = launch_with_ipc(&config, &path).await;

    let server = tokio::spawn(async move {
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        let mut requests = Vec::new();
        while requests.len() < 2 {
            let line = lines.next_line().await.unwrap().unwrap();
            let request: Value = serde_json::from_str(&line).unwrap();
            requests.push((
                request["request_id"].as_u64().unwrap(),
                request["command"][1].as_str().unwrap().to_string(),
            ));
        }

        write
            .write_all(b"{\"event\":\"playback-restart\"}\n")
            .await
            .unwrap();
        for (id, property) in requests.iter().rev() {
            let data = if property == "time-pos" { 312.5 } else { 1420.0 };
            let reply = json!({"data": data, "error": "success", "request_id": id});
            write
                .write_all(format!("{}\n", reply).as_bytes())
                .await
                .unwrap();
        }
        (lines, write)
    });

    let snapshot = session.query_state().await.unwrap();
    let _keep_open = server.await.unwrap();

    assert_eq!(snapshot.position, Some(312.5));
    assert_eq!(snapshot.duration, Some(1420.0));
    assert_eq!(session.last_known(), snapshot);
    assert_eq!(session.state(), SessionState::Playing);

    session.terminate().await;
}

/// Test: An error reply leaves that value unknown
#[tokio::test]
async fn test_query_state_error_reply() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_in(&dir);
    let config = fake_player("exec sleep 30", dir.path());
    let (session, stream) = launch_with_ipc(&config, &path).await;
    let _mpv = serve(stream, 12.0, None);

    let snapshot = session.query_state().await.unwrap();
    assert_eq!(snapshot.position, Some(12.0));
    assert_eq!(snapshot.duration, None);

    let tick = ProgressTick::from_snapshot(snapshot).unwrap();
    assert!(tick.estimated);
    assert_eq!(tick.duration_seconds, 12 + 300);

    session.terminate().await;
}

// =============================================================================
// Exit and Teardown Tests
// =============================================================================

/// Test: The exit signal fires exactly once when end-file is followed by process exit
#[tokio::test]
async fn test_exit_fires_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_in(&dir);
    let config = fake_player("sleep 0.5", dir.path());
    let (session, stream) = launch_with_ipc(&config, &path).await;
    let mpv = serve(stream, 0.0, None);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = calls.clone();
        session.on_exit(move |reason| {
            calls.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(reason);
        });
    }

    mpv.events
        .send(json!({"event": "end-file", "reason": "eof"}))
        .unwrap();

    let reason = tokio::time::timeout(Duration::from_secs(5), session.exited())
        .await
        .unwrap();
    assert_eq!(reason, ExitReason::EndOfMedia);

    // Let the process exit too; the second trigger must be ignored
    tokio::time::sleep(Duration::from_millis(800)).await;

    assert_eq!(rx.recv().await, Some(ExitReason::EndOfMedia));
    assert!(rx.recv().now_or_never().flatten().is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(session.exit_reason(), Some(ExitReason::EndOfMedia));
    assert_eq!(session.state(), SessionState::Exited);
}

/// Test: Callbacks registered after exit still run, immediately
#[tokio::test]
async fn test_on_exit_after_exit() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fake_player("exit 3", dir.path());
    config.connect_timeout = Duration::from_millis(100);

    let session = PlayerSession::launch(&config, LaunchRequest::new(STREAM_URL))
        .await
        .unwrap();
    session.exited().await;

    let (tx, rx) = tokio::sync::oneshot::channel();
    session.on_exit(move |reason| {
        let _ = tx.send(reason);
    });
    let reason = tokio::time::timeout(Duration::from_secs(1), rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reason, ExitReason::ProcessExited(Some(3)));
}

/// Test: A player that ignores quit and SIGTERM is force-killed and the socket released
#[tokio::test]
async fn test_terminate_force_kill_releases_socket() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_in(&dir);
    let config = fake_player("trap '' TERM; exec sleep 30", dir.path());
    let (session, _stream) = launch_with_ipc(&config, &path).await;
    assert!(path.exists());

    let started = std::time::Instant::now();
    session.terminate().await;

    assert!(!path.exists());
    assert!(!session.is_running());
    assert!(matches!(
        session.exit_reason(),
        Some(ExitReason::ProcessExited(_))
    ));
    // Grace period plus kill, not the full 30 s sleep
    assert!(started.elapsed() < Duration::from_secs(5));

    // Repeated teardown is harmless
    session.terminate().await;
}

/// Test: Dropping a session releases its socket
#[tokio::test]
async fn test_drop_releases_socket() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_in(&dir);
    let config = fake_player("exec sleep 30", dir.path());
    let (session, _stream) = launch_with_ipc(&config, &path).await;

    assert!(path.exists());
    drop(session);
    assert!(!path.exists());
}

// =============================================================================
// Tracker Tests
// =============================================================================

/// Test: The tracker ticks while playing and stops on its own at exit
#[tokio::test]
async fn test_tracker_ticks_until_exit() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_in(&dir);
    let config = fake_player("exec sleep 30", dir.path());
    let (session, stream) = launch_with_ipc(&config, &path).await;
    let mpv = serve(stream, 600.0, Some(1440.0));
    let session = Arc::new(session);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let tracker = ProgressTracker::start(session.clone(), Duration::from_millis(50), move |tick| {
        let _ = tx.send(tick);
    });

    for _ in 0..2 {
        let tick = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tick.position_seconds, 600);
        assert_eq!(tick.duration_seconds, 1440);
        assert!(!tick.estimated);
    }

    mpv.events.send(json!({"event": "end-file"})).unwrap();
    session.exited().await;

    tokio::time::timeout(Duration::from_secs(2), async {
        while !tracker.is_finished() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    tracker.stop().await;

    let final_tick = ProgressTick::final_for(&session);
    assert_eq!(final_tick.position_seconds, 600);
    assert_eq!(final_tick.duration_seconds, 1440);

    session.terminate().await;
}

/// Test: Without a channel the tracker falls back to wall-clock estimates
#[tokio::test]
async fn test_tracker_estimates_without_channel() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fake_player("exec sleep 30", dir.path());
    config.connect_timeout = Duration::from_millis(50);

    let session = PlayerSession::launch(&config, LaunchRequest::new(STREAM_URL).starting_at(100))
        .await
        .unwrap();
    let session = Arc::new(session);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let tracker = ProgressTracker::start(session.clone(), Duration::from_millis(50), move |tick| {
        let _ = tx.send(tick);
    });

    let tick = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(tick.estimated);
    assert!(tick.position_seconds >= 100);
    assert_eq!(tick.duration_seconds, tick.position_seconds + 300);

    tracker.stop().await;
    session.terminate().await;
    tokio_test::assert_ok!(tokio::time::timeout(Duration::from_secs(1), session.exited()).await);
}
