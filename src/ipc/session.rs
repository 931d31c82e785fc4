//! Per-connection protocol state machine.
//!
//! A [`Session`] is pure state: it never touches the socket itself. The
//! client feeds it socket lifecycle callbacks and inbound frames, and writes
//! whatever encoded frames it hands back.
//!
//! ```text
//! Disconnected ─► Connecting ─► HandshakeSent ─► Ready ─► Closed
//!        │              │              │            │
//!        └──────────────┴──────────────┴────────────┴──► Errored
//! ```
//!
//! `Closed` and `Errored` are terminal. A new session is built for every
//! connection attempt.

use std::path::PathBuf;

use serde_json::{json, Value};

use super::framing::{encode, encode_raw, Frame, OpCode};
use super::IpcError;
use crate::constants::PROTOCOL_VERSION;

/// Event name the host uses to acknowledge the handshake.
pub const READY: &str = "READY";

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, nothing attempted yet.
    Disconnected,
    /// Socket connect in flight.
    Connecting,
    /// Handshake written, waiting for `READY`.
    HandshakeSent,
    /// Host acknowledged; commands may be sent.
    Ready,
    /// Socket closed without a fault.
    Closed,
    /// Socket or protocol fault.
    Errored,
}

impl SessionState {
    /// Returns `true` for `Closed` and `Errored`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
    }
}

/// What the client should do after an inbound frame.
#[derive(Debug, Default, PartialEq)]
pub struct FrameOutcome {
    /// This frame completed the handshake.
    pub became_ready: bool,
    /// Encoded frame to write back (PONG).
    pub reply: Option<Vec<u8>>,
    /// Host asked to close; the session is now `Errored`.
    pub host_closed: Option<IpcError>,
}

/// One connection attempt's protocol state.
#[derive(Debug)]
pub struct Session {
    state: SessionState,
    client_id: String,
    socket_path: PathBuf,
}

impl Session {
    /// Create a session for the given application client id and socket.
    pub fn new(client_id: impl Into<String>, socket_path: impl Into<PathBuf>) -> Self {
        Self {
            state: SessionState::Disconnected,
            client_id: client_id.into(),
            socket_path: socket_path.into(),
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns `true` once the host acknowledged the handshake.
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// `Disconnected -> Connecting`.
    ///
    /// Returns `false` if the session was already used.
    pub fn begin_connect(&mut self) -> bool {
        if self.state != SessionState::Disconnected {
            return false;
        }
        self.state = SessionState::Connecting;
        true
    }

    /// `Connecting -> HandshakeSent`, returning the HANDSHAKE frame to write.
    pub fn on_connected(&mut self) -> Option<Vec<u8>> {
        if self.state != SessionState::Connecting {
            return None;
        }
        self.state = SessionState::HandshakeSent;
        log::debug!(
            "[Session] Sending handshake for client {} on {}",
            self.client_id,
            self.socket_path.display()
        );
        Some(encode(OpCode::Handshake, &self.handshake_payload()))
    }

    /// Handshake body: protocol version and client id.
    pub fn handshake_payload(&self) -> Value {
        json!({
            "v": PROTOCOL_VERSION,
            "client_id": self.client_id,
        })
    }

    /// Apply an inbound frame.
    ///
    /// Frames that arrive after the session ended are ignored.
    pub fn on_frame(&mut self, frame: &Frame) -> FrameOutcome {
        let mut outcome = FrameOutcome::default();
        if self.state.is_terminal() {
            return outcome;
        }

        match frame.opcode() {
            Some(OpCode::Ping) => {
                outcome.reply = Some(encode_raw(OpCode::Pong.into(), &frame.payload));
            }
            Some(OpCode::Close) => {
                let err = IpcError::HostClosed {
                    code: frame.json.as_ref().and_then(|j| j.get("code")).and_then(Value::as_i64),
                    message: frame.json_str("message").unwrap_or_default().to_string(),
                };
                self.state = SessionState::Errored;
                outcome.host_closed = Some(err);
            }
            _ => {
                let acknowledges = frame.cmd() == Some(READY) || frame.evt() == Some(READY);
                if acknowledges && self.state == SessionState::HandshakeSent {
                    log::info!("[Session] Handshake acknowledged");
                    self.state = SessionState::Ready;
                    outcome.became_ready = true;
                }
            }
        }

        outcome
    }

    /// Encode a command frame. Returns `None` unless the session is `Ready`.
    pub fn command_frame(&self, body: &Value) -> Option<Vec<u8>> {
        self.is_ready().then(|| encode(OpCode::Frame, body))
    }

    /// Any non-terminal state `-> Errored`.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::Errored;
        }
    }

    /// Any non-terminal state `-> Closed`.
    pub fn close(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::Closed;
        }
    }
}
