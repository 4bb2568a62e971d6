//! Crate-level error type

use thiserror::Error;

use crate::config::ConfigError;
use crate::connection::TransportError;
use crate::fallback::{FallbackError, HttpError};
use crate::protocol::ValidationError;

/// Any error surfaced by the public API
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Socket open or send failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Http(#[from] HttpError),

    /// HTTP fallback gave up
    #[error(transparent)]
    Fallback(#[from] FallbackError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions_keep_messages() {
        let err: Error = FallbackError::MissingUserId.into();
        assert_eq!(err.to_string(), "User ID is required for HTTP fallback");

        let err: Error = TransportError::NotConnected.into();
        assert!(matches!(err, Error::Transport(_)));
    }
}
