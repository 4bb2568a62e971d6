//! Fallback error types

use thiserror::Error;

use super::http::HttpError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FallbackError {
    #[error("User ID is required for HTTP fallback")]
    MissingUserId,

    /// The server refused the request; not retried
    #[error("{0}")]
    ClientRequest(HttpError),

    #[error("HTTP fallback failed after {attempts} attempts: {last}")]
    ExhaustedRetries { attempts: u32, last: HttpError },
}

impl FallbackError {
    /// The last HTTP failure behind this error, if any
    pub fn http_error(&self) -> Option<&HttpError> {
        match self {
            FallbackError::MissingUserId => None,
            FallbackError::ClientRequest(e) => Some(e),
            FallbackError::ExhaustedRetries { last, .. } => Some(last),
        }
    }
}
