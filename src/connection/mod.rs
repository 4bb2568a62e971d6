//! Persistent Connection
//!
//! WebSocket lifecycle for the chat transport.
//!
//! ## States
//!
//! ```text
//! Disconnected --connect()--> Connecting --open--> Connected
//!      ^                        ^    |                 |
//!      |                        |    +--timeout/error--+--close(other)--> Connecting (backoff)
//!      +-- close(1000) / disconnect()                  |
//!                                                      +--close(auth) / attempts exhausted--> Errored
//! ```
//!
//! Messages sent while not connected are queued and flushed in order on the
//! next successful open.

mod backoff;
mod client;
mod error;
mod heartbeat;
mod socket;
mod state;

#[cfg(test)]
pub(crate) mod mock;

pub use backoff::Backoff;
pub use client::{ConnectionClient, ConnectionSettings, StateListener};
pub use error::TransportError;
pub use socket::{
    Connector, OutboundFrame, SocketEvent, SocketHandle, WsConnector, CLOSE_GRACE,
};
pub use state::{close_code, ConnectionState, ConnectionStatus};
