//! Local socket IPC with the presence host service.
//!
//! The host service listens on a Unix domain socket (or a named pipe on
//! Windows). This module owns everything between raw socket bytes and
//! session-level decisions; event fan-out and retries live above it in
//! [`crate::client`].
//!
//! # Architecture
//!
//! ```text
//! PresenceClient task                        Host service
//! ┌────────────────────┐                    ┌──────────────┐
//! │ Session            │                    │              │
//! │  state machine     │                    │              │
//! │ Transport          │◄──────────────────►│  socket      │
//! │  read/write tasks  │  frames over       │              │
//! │  FrameDecoder      │  local socket      │              │
//! └─────────┬──────────┘                    └──────────────┘
//!           │ IpcEvent
//!           ▼
//!      EventRegistry listeners
//! ```
//!
//! # Wire Protocol
//!
//! `[u32 LE opcode][u32 LE length][JSON payload]`
//!
//! See [`framing`] for the codec.

pub mod framing;
pub mod path;
pub mod session;
pub mod transport;

use std::path::PathBuf;
use std::time::Duration;

/// Faults raised by the IPC layer.
///
/// All of these end the current session. None of them are fatal to the
/// client: the supervisor schedules another attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpcError {
    /// Could not open the socket (host not running, permission denied).
    ConnectFailed {
        /// Socket path that was tried.
        path: PathBuf,
        /// OS-level reason.
        reason: String,
    },
    /// Read or write failed on an established connection.
    Io(String),
    /// Peer declared a frame larger than the protocol limit.
    FrameTooLarge(String),
    /// No `READY` arrived within the handshake deadline.
    HandshakeTimeout(Duration),
    /// Host sent a CLOSE frame.
    HostClosed {
        /// Close code from the host, if present.
        code: Option<i64>,
        /// Human-readable reason from the host.
        message: String,
    },
}

impl std::fmt::Display for IpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectFailed { path, reason } => {
                write!(f, "Connect to {} failed: {reason}", path.display())
            }
            Self::Io(msg) => write!(f, "Socket I/O error: {msg}"),
            Self::FrameTooLarge(msg) => write!(f, "Corrupt frame stream: {msg}"),
            Self::HandshakeTimeout(after) => {
                write!(f, "No READY from host within {}ms", after.as_millis())
            }
            Self::HostClosed { code, message } => match code {
                Some(code) => write!(f, "Host closed connection ({code}): {message}"),
                None => write!(f, "Host closed connection: {message}"),
            },
        }
    }
}

impl std::error::Error for IpcError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IpcError::ConnectFailed {
            path: PathBuf::from("/run/user/1000/discord-ipc-0"),
            reason: "No such file or directory".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Connect to /run/user/1000/discord-ipc-0 failed: No such file or directory"
        );

        let err = IpcError::HandshakeTimeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "No READY from host within 1500ms");

        let err = IpcError::HostClosed {
            code: Some(4000),
            message: "Invalid Client ID".to_string(),
        };
        assert_eq!(err.to_string(), "Host closed connection (4000): Invalid Client ID");
    }
}
