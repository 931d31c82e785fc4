//! Reconnection policy and observable connection state.
//!
//! The client retries forever: a clean close waits the short delay, a fault
//! waits the long one so an absent host service is not hot-looped. The loop
//! that applies this policy lives in [`crate::client`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{CLOSE_RETRY_DELAY, ERROR_RETRY_DELAY};
use crate::ipc::IpcError;

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Socket closed without a fault.
    Closed,
    /// Transport or protocol fault.
    Errored(IpcError),
    /// Caller asked the client to stop.
    Stopped,
}

/// Connection state as seen by collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Client created, not started.
    #[default]
    Disconnected,
    /// Opening the socket.
    Connecting,
    /// Handshake sent, waiting for `READY`.
    Handshaking,
    /// Host acknowledged; activity updates are transmitted.
    Ready,
    /// Waiting before the next attempt.
    Reconnecting {
        /// Consecutive unsuccessful sessions so far.
        attempt: u32,
        /// Delay before the next attempt.
        delay: Duration,
    },
    /// Client stopped; no further attempts.
    Stopped,
}

/// Delays between connection attempts.
///
/// Stored in config as milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Delay after a clean close, in milliseconds.
    pub close_delay_ms: u64,
    /// Delay after a fault, in milliseconds.
    pub error_delay_ms: u64,
    /// Upper bound of random extra delay, in milliseconds. Zero disables jitter.
    pub jitter_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            close_delay_ms: CLOSE_RETRY_DELAY.as_millis() as u64,
            error_delay_ms: ERROR_RETRY_DELAY.as_millis() as u64,
            jitter_ms: 0,
        }
    }
}

impl ReconnectPolicy {
    /// Base delay for the way a session ended, without jitter.
    ///
    /// Returns `None` for [`SessionEnd::Stopped`].
    pub fn base_delay(&self, end: &SessionEnd) -> Option<Duration> {
        match end {
            SessionEnd::Closed => Some(Duration::from_millis(self.close_delay_ms)),
            SessionEnd::Errored(_) => Some(Duration::from_millis(self.error_delay_ms)),
            SessionEnd::Stopped => None,
        }
    }

    /// Delay before the next attempt, including jitter.
    pub fn delay_after(&self, end: &SessionEnd) -> Option<Duration> {
        let base = self.base_delay(end)?;
        if self.jitter_ms == 0 {
            return Some(base);
        }
        let jitter = rand::random::<u64>() % (self.jitter_ms + 1);
        Some(base + Duration::from_millis(jitter))
    }
}
