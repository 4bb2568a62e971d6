//! Transport error types

use std::time::Duration;
use thiserror::Error;

/// Socket-level send or open failure
#[derive(Error, Debug)]
pub enum TransportError {
    /// No open socket to write to
    #[error("WebSocket not connected")]
    NotConnected,

    /// Socket writer has gone away
    #[error("WebSocket closed while sending")]
    SocketClosed,

    #[error("WebSocket connection failed: {0}")]
    Connect(String),

    #[error("WebSocket connection timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid WebSocket URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

impl TransportError {
    /// Whether reopening the socket could succeed without configuration changes
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::InvalidUrl(_) | TransportError::Encode(_))
    }
}
