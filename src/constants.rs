//! Application-wide constants for presence-ipc.
//!
//! This module centralizes protocol limits and the default timing policy.
//! Timing values here are only defaults; the reconnect delays and handshake
//! timeout can be changed through [`crate::config::Config`].
//!
//! # Categories
//!
//! - **Protocol**: Wire-level identifiers and limits
//! - **Timeouts**: Handshake deadline
//! - **Reconnection**: Delays between connection attempts

use std::time::Duration;

// ============================================================================
// Protocol
// ============================================================================

/// Handshake protocol version sent in the `v` field.
pub const PROTOCOL_VERSION: u32 = 1;

/// Well-known name of the host service's socket (pipe index 0).
pub const IPC_SOCKET_NAME: &str = "discord-ipc-0";

/// Maximum frame payload size (16 MB).
///
/// Headers declaring more than this are treated as a corrupt stream.
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Socket read buffer size.
pub const READ_BUFFER_SIZE: usize = 64 * 1024;

// ============================================================================
// Timeouts
// ============================================================================

/// How long to wait for `READY` after sending the handshake.
///
/// The host service answers within milliseconds when healthy. Past this
/// deadline the session is failed and retried like any transport fault.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a stopping client waits for queued frames to reach the socket.
pub const STOP_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// Reconnection
// ============================================================================

/// Delay before reconnecting after the host closed the socket cleanly.
pub const CLOSE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Delay before reconnecting after a transport fault.
///
/// Longer than [`CLOSE_RETRY_DELAY`] so an absent host service is not
/// hammered with connect attempts.
pub const ERROR_RETRY_DELAY: Duration = Duration::from_secs(10);
