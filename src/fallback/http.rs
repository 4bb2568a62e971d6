//! Question REST Client
//!
//! One-shot HTTP path for questions when the WebSocket is unavailable.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::FallbackSettings;
use crate::auth::TokenSource;
use crate::protocol::ResponsePayload;

/// Body of the question endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AskRequest {
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Answer returned by the question endpoint
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskResponse {
    pub conversation_id: String,
    pub response: String,
    #[serde(default)]
    pub confidence_score: Option<f64>,
    #[serde(default)]
    pub processing_time: Option<f64>,
    #[serde(default)]
    pub retrieved_documents: Option<Vec<Value>>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl From<AskResponse> for ResponsePayload {
    fn from(answer: AskResponse) -> Self {
        ResponsePayload {
            conversation_id: answer.conversation_id,
            response: answer.response,
            confidence_score: answer.confidence_score,
            processing_time: answer.processing_time,
            retrieved_documents: answer.retrieved_documents,
        }
    }
}

/// Classified failure of one HTTP request
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HttpError {
    #[error("Not authorized (HTTP {status})")]
    Auth { status: u16 },

    #[error("Request rejected (HTTP {status}): {message}")]
    Validation { status: u16, message: String },

    #[error("Rate limited by server")]
    RateLimit { retry_after: Option<Duration> },

    #[error("Server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Invalid response body: {0}")]
    Decode(String),
}

impl HttpError {
    /// Errors caused by the request itself; retrying cannot help
    pub fn is_client_error(&self) -> bool {
        matches!(self, HttpError::Auth { .. } | HttpError::Validation { .. })
    }

    /// Server-requested wait before the next attempt
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            HttpError::RateLimit { retry_after } => *retry_after,
            _ => None,
        }
    }

    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            HttpError::Timeout
        } else if e.is_decode() {
            HttpError::Decode(e.to_string())
        } else {
            HttpError::Network(e.to_string())
        }
    }
}

/// The HTTP question endpoint
#[async_trait]
pub trait QuestionApi: Send + Sync {
    /// Make exactly one attempt; retrying is the caller's decision
    async fn ask(&self, request: &AskRequest) -> Result<AskResponse, HttpError>;
}

/// `reqwest` implementation of [`QuestionApi`]
pub struct RestClient {
    client: Client,
    url: String,
    tokens: Arc<dyn TokenSource>,
}

impl RestClient {
    pub fn new(settings: &FallbackSettings, tokens: Arc<dyn TokenSource>) -> Result<Self, HttpError> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| HttpError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: format!(
                "{}{}",
                settings.base_url.trim_end_matches('/'),
                settings.question_path
            ),
            tokens,
        })
    }

    /// Full URL of the question endpoint
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn classify(&self, response: Response) -> HttpError {
        let status = response.status();
        let code = status.as_u16();

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                if status == StatusCode::UNAUTHORIZED {
                    self.tokens.on_unauthorized();
                }
                HttpError::Auth { status: code }
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(Duration::from_secs);
                HttpError::RateLimit { retry_after }
            }
            s if s.is_server_error() => HttpError::Server {
                status: code,
                message: response.text().await.unwrap_or_default(),
            },
            _ => HttpError::Validation {
                status: code,
                message: response.text().await.unwrap_or_default(),
            },
        }
    }
}

#[async_trait]
impl QuestionApi for RestClient {
    async fn ask(&self, request: &AskRequest) -> Result<AskResponse, HttpError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let mut builder = self
            .client
            .post(&self.url)
            .header("X-Request-Id", &request_id)
            .json(request);
        if let Some(token) = self.tokens.token() {
            builder = builder.bearer_auth(token);
        }

        tracing::debug!(url = %self.url, request_id = %request_id, "POST question");
        let response = builder.send().await.map_err(HttpError::from_reqwest)?;

        if !response.status().is_success() {
            let error = self.classify(response).await;
            tracing::debug!(request_id = %request_id, error = %error, "Question request failed");
            return Err(error);
        }

        response
            .json::<AskResponse>()
            .await
            .map_err(|e| HttpError::Decode(e.to_string()))
    }
}
