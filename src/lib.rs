//! # chatline
//!
//! Real-time chat transport with automatic HTTP fallback.
//!
//! ## Features
//!
//! - **Persistent connection**: WebSocket with capped exponential reconnect,
//!   heartbeats, and an ordered queue for messages sent while offline
//! - **Validated messages**: every inbound and outbound message is checked
//!   against its kind's structure before anyone sees it
//! - **Outbound gating**: duplicate question suppression and a sliding-window
//!   rate limit
//! - **HTTP fallback**: questions go to the REST endpoint when the socket is
//!   down, and the answers arrive in the same message stream
//!
//! ## Modules
//!
//! - [`protocol`]: Message model and validator
//! - [`dispatch`]: Listener registry, deduplication and rate limiting
//! - [`connection`]: WebSocket state machine
//! - [`fallback`]: HTTP fallback coordinator
//! - [`session`]: One user's transport stack wired together
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chatline::{ChatSession, Config, MessageKind, StaticToken};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> chatline::Result<()> {
//!     let config = Config::load_default();
//!     let session = ChatSession::new(&config, Arc::new(StaticToken::new("secret")))?;
//!
//!     session.subscribe(MessageKind::Response, |message| {
//!         println!("{}", message.payload()["response"]);
//!     });
//!
//!     session.connect();
//!     session.send_question("What changed last week?", None, Some("user-1")).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod fallback;
pub mod protocol;
pub mod session;

// Re-export top-level types for convenience
pub use auth::{StaticToken, TokenSource};

pub use config::{generate_default_config, Config, ConfigError, LoggingConfig};

pub use connection::{
    close_code, ConnectionClient, ConnectionSettings, ConnectionState, ConnectionStatus,
    Connector, TransportError, WsConnector,
};

pub use dispatch::{Dispatcher, DispatcherSettings, ListenerId, RateLimiter, SendOutcome, Topic};

pub use error::{Error, Result};

pub use fallback::{
    FallbackCoordinator, FallbackError, FallbackSettings, FallbackState, HttpError, QuestionApi,
    RestClient, Route,
};

pub use protocol::{Frame, Message, MessageKind, ValidationError, ValidationReport};

pub use session::ChatSession;
