//! Integration tests for the presence client.
//!
//! Each test runs a fake host service on a Unix socket inside a temp dir and
//! drives a real `PresenceClient` against it through `LocalConnector`.

#![cfg(unix)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use presence_ipc::activity::Activity;
use presence_ipc::events::names;
use presence_ipc::ipc::framing::{encode, Frame, OpCode};
use presence_ipc::{ClientConfig, ClientHandle, ConnectionState, IpcError, IpcEvent, PresenceClient, ReconnectPolicy};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

const TIMEOUT: Duration = Duration::from_secs(5);
const CLOSE_DELAY_MS: u64 = 30_000;
const ERROR_DELAY_MS: u64 = 60_000;

/// Fake host service listening in a temp dir.
struct MockHost {
    _dir: TempDir,
    path: PathBuf,
    listener: UnixListener,
}

impl MockHost {
    fn bind() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("discord-ipc-0");
        let listener = UnixListener::bind(&path).unwrap();
        Self {
            _dir: dir,
            path,
            listener,
        }
    }

    async fn accept(&self) -> UnixStream {
        let (stream, _) = tokio::time::timeout(TIMEOUT, self.listener.accept())
            .await
            .expect("Timed out waiting for client connection")
            .unwrap();
        stream
    }
}

fn config_for(path: PathBuf) -> ClientConfig {
    ClientConfig {
        client_id: "test-client".to_string(),
        ipc_path: Some(path),
        reconnect: ReconnectPolicy {
            close_delay_ms: CLOSE_DELAY_MS,
            error_delay_ms: ERROR_DELAY_MS,
            jitter_ms: 0,
        },
        handshake_timeout: Duration::from_secs(5),
    }
}

async fn read_frame(stream: &mut UnixStream) -> Frame {
    let mut header = [0u8; 8];
    tokio::time::timeout(TIMEOUT, stream.read_exact(&mut header))
        .await
        .expect("Timed out waiting for frame header")
        .unwrap();
    let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.unwrap();

    let mut bytes = header.to_vec();
    bytes.extend_from_slice(&payload);
    Frame::decode(&bytes)
}

async fn send(stream: &mut UnixStream, op: OpCode, body: Value) {
    stream.write_all(&encode(op, &body)).await.unwrap();
}

async fn ready_frame(stream: &mut UnixStream) {
    send(
        stream,
        OpCode::Frame,
        json!({"cmd": "DISPATCH", "evt": "READY", "data": {"v": 1, "user": {"id": "1"}}}),
    )
    .await;
}

async fn wait_for_state(
    handle: &ClientHandle,
    predicate: impl FnMut(&ConnectionState) -> bool,
) -> ConnectionState {
    let mut rx = handle.watch_state();
    let state = tokio::time::timeout(TIMEOUT, rx.wait_for(predicate))
        .await
        .expect("Timed out waiting for connection state")
        .unwrap()
        .clone();
    state
}

async fn stop(handle: &ClientHandle, task: tokio::task::JoinHandle<()>) {
    handle.stop();
    tokio::time::timeout(TIMEOUT, task)
        .await
        .expect("Client did not stop")
        .unwrap();
    assert_eq!(handle.state(), ConnectionState::Stopped);
}

/// Forward every named event into a channel for ordered assertions.
fn record(handle: &ClientHandle, events: &[&str]) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    for name in events {
        let tx = tx.clone();
        handle.on(name, move |event: &IpcEvent| -> anyhow::Result<()> {
            tx.send(event.name().to_string())?;
            Ok(())
        });
    }
    rx
}

async fn next_name(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(TIMEOUT, rx.recv())
        .await
        .expect("Timed out waiting for event")
        .unwrap()
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn test_handshake_is_first_frame() {
    let host = MockHost::bind();
    let client = PresenceClient::new(config_for(host.path.clone()));
    let handle = client.handle();
    let task = client.connect();

    let mut stream = host.accept().await;
    let handshake = read_frame(&mut stream).await;

    assert_eq!(handshake.opcode(), Some(OpCode::Handshake));
    assert_eq!(handshake.json, Some(json!({"v": 1, "client_id": "test-client"})));

    stop(&handle, task).await;
}

#[tokio::test]
async fn test_ready_event_and_state() {
    let host = MockHost::bind();
    let client = PresenceClient::new(config_for(host.path.clone()));
    let handle = client.handle();
    let mut events = record(&handle, &[names::CONNECT, names::READY]);
    let task = client.connect();

    let mut stream = host.accept().await;
    read_frame(&mut stream).await;
    assert_eq!(next_name(&mut events).await, names::CONNECT);

    ready_frame(&mut stream).await;
    assert_eq!(next_name(&mut events).await, names::READY);
    wait_for_state(&handle, |s| *s == ConnectionState::Ready).await;

    stop(&handle, task).await;
}

// ============================================================================
// Activity updates
// ============================================================================

#[tokio::test]
async fn test_set_activity_after_ready_is_transmitted() {
    let host = MockHost::bind();
    let client = PresenceClient::new(config_for(host.path.clone()));
    let handle = client.handle();

    let sender = handle.clone();
    handle.once(names::READY, move |_| -> anyhow::Result<()> {
        sender.set_activity(Some(Activity {
            name: Some("TIDAL".to_string()),
            details: Some("Browsing TIDAL".to_string()),
            ..Activity::default()
        }));
        Ok(())
    });
    let task = client.connect();

    let mut stream = host.accept().await;
    read_frame(&mut stream).await;
    ready_frame(&mut stream).await;

    let command = read_frame(&mut stream).await;
    assert_eq!(command.opcode(), Some(OpCode::Frame));
    let body = command.json.unwrap();
    assert_eq!(body["cmd"], "SET_ACTIVITY");
    assert_eq!(body["args"]["pid"], std::process::id());
    assert_eq!(
        body["args"]["activity"],
        json!({"name": "TIDAL", "details": "Browsing TIDAL"})
    );
    assert!(body["nonce"].is_string());

    stop(&handle, task).await;
}

#[tokio::test]
async fn test_set_activity_before_ready_is_dropped() {
    let host = MockHost::bind();
    let client = PresenceClient::new(config_for(host.path.clone()));
    let handle = client.handle();

    let sender = handle.clone();
    handle.once(names::READY, move |_| -> anyhow::Result<()> {
        sender.clear_activity();
        Ok(())
    });
    let task = client.connect();

    let mut stream = host.accept().await;
    read_frame(&mut stream).await;
    wait_for_state(&handle, |s| *s == ConnectionState::Handshaking).await;

    // Sent while handshaking: must never reach the socket
    handle.set_activity(Some(Activity {
        name: Some("early".to_string()),
        ..Activity::default()
    }));
    tokio::time::sleep(Duration::from_millis(100)).await;

    ready_frame(&mut stream).await;

    let command = read_frame(&mut stream).await;
    let body = command.json.unwrap();
    assert_eq!(body["cmd"], "SET_ACTIVITY");
    assert!(body["args"]["activity"].is_null(), "early activity leaked: {body}");

    stop(&handle, task).await;
}

#[tokio::test]
async fn test_stop_flushes_queued_clear() {
    let host = MockHost::bind();
    let client = PresenceClient::new(config_for(host.path.clone()));
    let handle = client.handle();
    let task = client.connect();

    let mut stream = host.accept().await;
    read_frame(&mut stream).await;
    ready_frame(&mut stream).await;
    wait_for_state(&handle, |s| *s == ConnectionState::Ready).await;

    handle.clear_activity();
    stop(&handle, task).await;

    let command = read_frame(&mut stream).await;
    assert!(command.json.unwrap()["args"]["activity"].is_null());
}

// ============================================================================
// Dispatch ordering
// ============================================================================

#[tokio::test]
async fn test_frame_publishes_message_cmd_then_evt() {
    let host = MockHost::bind();
    let client = PresenceClient::new(config_for(host.path.clone()));
    let handle = client.handle();
    let mut events = record(
        &handle,
        &[names::MESSAGE, "DISPATCH", names::READY, "ACTIVITY_JOIN"],
    );
    let task = client.connect();

    let mut stream = host.accept().await;
    read_frame(&mut stream).await;

    // Both frames in a single write
    let mut bytes = encode(OpCode::Frame, &json!({"cmd": "DISPATCH", "evt": "READY"}));
    bytes.extend(encode(OpCode::Frame, &json!({"cmd": "DISPATCH", "evt": "ACTIVITY_JOIN"})));
    stream.write_all(&bytes).await.unwrap();

    // Each frame: raw message, then its cmd, then its evt
    let mut seen = Vec::new();
    for _ in 0..6 {
        seen.push(next_name(&mut events).await);
    }
    assert_eq!(
        seen,
        vec![
            names::MESSAGE,
            "DISPATCH",
            names::READY,
            names::MESSAGE,
            "DISPATCH",
            "ACTIVITY_JOIN",
        ]
    );

    stop(&handle, task).await;
}

// ============================================================================
// Reconnection
// ============================================================================

#[tokio::test]
async fn test_connect_failure_schedules_error_delay() {
    let dir = tempfile::tempdir().unwrap();
    let client = PresenceClient::new(config_for(dir.path().join("no-host")));
    let handle = client.handle();

    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    handle.on(names::ERROR, move |event| -> anyhow::Result<()> {
        if let IpcEvent::Error(err) = event {
            sink.lock().unwrap().push(err.clone());
        }
        Ok(())
    });
    let task = client.connect();

    let state = wait_for_state(&handle, |s| matches!(s, ConnectionState::Reconnecting { .. })).await;
    assert_eq!(
        state,
        ConnectionState::Reconnecting {
            attempt: 1,
            delay: Duration::from_millis(ERROR_DELAY_MS),
        }
    );

    let errors = errors.lock().unwrap().clone();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], IpcError::ConnectFailed { .. }));

    // Stop cuts the long backoff short
    stop(&handle, task).await;
}

#[tokio::test]
async fn test_clean_close_schedules_close_delay() {
    let host = MockHost::bind();
    let client = PresenceClient::new(config_for(host.path.clone()));
    let handle = client.handle();
    let mut events = record(&handle, &[names::END, names::ERROR]);
    let task = client.connect();

    let mut stream = host.accept().await;
    read_frame(&mut stream).await;
    ready_frame(&mut stream).await;
    wait_for_state(&handle, |s| *s == ConnectionState::Ready).await;
    drop(stream);

    assert_eq!(next_name(&mut events).await, names::END);
    let state = wait_for_state(&handle, |s| matches!(s, ConnectionState::Reconnecting { .. })).await;
    assert_eq!(
        state,
        ConnectionState::Reconnecting {
            attempt: 1,
            delay: Duration::from_millis(CLOSE_DELAY_MS),
        }
    );
    assert!(events.try_recv().is_err(), "clean close also raised an error");

    stop(&handle, task).await;
}

#[tokio::test]
async fn test_handshake_timeout_is_an_error() {
    let host = MockHost::bind();
    let mut config = config_for(host.path.clone());
    config.handshake_timeout = Duration::from_millis(200);
    let client = PresenceClient::new(config);
    let handle = client.handle();

    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    handle.on(names::ERROR, move |event| -> anyhow::Result<()> {
        if let IpcEvent::Error(err) = event {
            sink.lock().unwrap().push(err.clone());
        }
        Ok(())
    });
    let task = client.connect();

    // Accept and read the handshake, then stay silent
    let mut stream = host.accept().await;
    read_frame(&mut stream).await;

    let state = wait_for_state(&handle, |s| matches!(s, ConnectionState::Reconnecting { .. })).await;
    assert_eq!(
        state,
        ConnectionState::Reconnecting {
            attempt: 1,
            delay: Duration::from_millis(ERROR_DELAY_MS),
        }
    );
    assert_eq!(
        *errors.lock().unwrap(),
        vec![IpcError::HandshakeTimeout(Duration::from_millis(200))]
    );

    stop(&handle, task).await;
}

#[tokio::test]
async fn test_reconnect_keeps_listeners() {
    let host = MockHost::bind();
    let mut config = config_for(host.path.clone());
    config.reconnect.close_delay_ms = 20;
    let client = PresenceClient::new(config);
    let handle = client.handle();
    let mut events = record(&handle, &[names::READY]);
    let task = client.connect();

    for _ in 0..2 {
        let mut stream = host.accept().await;
        let handshake = read_frame(&mut stream).await;
        assert_eq!(handshake.opcode(), Some(OpCode::Handshake));
        ready_frame(&mut stream).await;
        assert_eq!(next_name(&mut events).await, names::READY);
        drop(stream);
    }

    stop(&handle, task).await;
}
