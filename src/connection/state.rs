//! Connection State
//!
//! Observable status of the persistent connection and the close codes that
//! drive its transitions.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Opening a socket, or waiting to reopen one
    Connecting,
    /// Socket open; messages flow immediately
    Connected,
    /// Closed normally or by `disconnect()`
    Disconnected,
    /// Gave up; only a manual `connect()` leaves this state
    Errored,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// Snapshot handed to state listeners and returned by `state()`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Reset to 0 on every successful open
    pub reconnect_attempts: u32,
    pub last_error: Option<String>,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            reconnect_attempts: 0,
            last_error: None,
        }
    }
}

/// WebSocket close codes with special meaning to the client
pub mod close_code {
    /// Orderly shutdown; never reconnects
    pub const NORMAL: u16 = 1000;
    /// Connection lost without a close frame
    pub const ABNORMAL: u16 = 1006;
    pub const POLICY_VIOLATION: u16 = 1008;
    /// Missing or invalid token
    pub const UNAUTHORIZED: u16 = 4001;
    pub const FORBIDDEN: u16 = 4003;
    /// Sent by the client when an unanswered ping marks the socket dead
    pub const HEARTBEAT_TIMEOUT: u16 = 4000;

    /// Codes that mean retrying with the same credentials is pointless
    pub fn is_auth_failure(code: u16) -> bool {
        matches!(code, POLICY_VIOLATION | UNAUTHORIZED | FORBIDDEN)
    }
}
