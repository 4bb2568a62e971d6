//! HTTP Fallback
//!
//! When the WebSocket is down, questions go to the REST endpoint instead and
//! the answers are fed back into the same message stream.

mod coordinator;
mod error;
mod http;

use std::time::Duration;

pub use coordinator::{
    ErrorListener, FallbackCoordinator, FallbackState, FallbackUsedListener, LiveTransport, Route,
};
pub use error::FallbackError;
pub use http::{AskRequest, AskResponse, HttpError, QuestionApi, RestClient};

#[derive(Debug, Clone)]
pub struct FallbackSettings {
    /// REST API root, e.g. `http://localhost:8000`
    pub base_url: String,
    pub question_path: String,
    /// Total attempts per question, including the first
    pub max_retries: u32,
    /// Base of the linear retry delay
    pub retry_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            question_path: "/api/v1/questions".to_string(),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
        }
    }
}
