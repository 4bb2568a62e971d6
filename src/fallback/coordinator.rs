//! Fallback Coordinator
//!
//! Single entry point for sending questions. Uses the WebSocket while it is
//! usable and degrades to the HTTP endpoint otherwise, so callers see the
//! same `response` messages either way.

use parking_lot::Mutex;
use std::sync::Arc;

use super::error::FallbackError;
use super::http::{AskRequest, AskResponse, QuestionApi};
use super::FallbackSettings;
use crate::connection::{ConnectionClient, TransportError};
use crate::dispatch::{invoke_guarded, ListenerId, ListenerRegistry, MessageSink, SendOutcome};
use crate::protocol::{validate, Message, ResponsePayload};

/// Callback receiving HTTP fallback failures
pub type ErrorListener = dyn Fn(&FallbackError) + Send + Sync;

/// Callback receiving the reason the live connection was bypassed
pub type FallbackUsedListener = dyn Fn(&str) + Send + Sync;

/// The live path as seen by the coordinator
pub trait LiveTransport: Send + Sync {
    /// Gate and transmit a question immediately, without queueing
    fn send_question(&self, message: &Message) -> Result<SendOutcome, TransportError>;
}

impl LiveTransport for ConnectionClient {
    fn send_question(&self, message: &Message) -> Result<SendOutcome, TransportError> {
        ConnectionClient::send_question(self, message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FallbackState {
    pub web_socket_available: bool,
    /// Set after a live send failed; cleared when the socket reconnects
    pub fallback_forced: bool,
}

impl FallbackState {
    pub fn should_use_fallback(&self) -> bool {
        !self.web_socket_available || self.fallback_forced
    }
}

/// How a question left the client
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Transmitted over the WebSocket; the answer arrives as a live message
    Live,
    /// Answered over HTTP; the answer was delivered to the message sink
    Http,
    /// Not sent: duplicate, rate limited, or invalid
    Suppressed(SendOutcome),
}

pub struct FallbackCoordinator {
    settings: FallbackSettings,
    api: Arc<dyn QuestionApi>,
    sink: Arc<dyn MessageSink>,
    live: Option<Arc<dyn LiveTransport>>,
    state: Mutex<FallbackState>,
    error_listeners: Mutex<ListenerRegistry<(), ErrorListener>>,
    fallback_listeners: Mutex<ListenerRegistry<(), FallbackUsedListener>>,
}

impl FallbackCoordinator {
    /// Coordinator with no live transport; every question goes over HTTP
    pub fn new(
        settings: FallbackSettings,
        api: Arc<dyn QuestionApi>,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        Self {
            settings,
            api,
            sink,
            live: None,
            state: Mutex::new(FallbackState::default()),
            error_listeners: Mutex::new(ListenerRegistry::new()),
            fallback_listeners: Mutex::new(ListenerRegistry::new()),
        }
    }

    pub fn with_live_transport(mut self, live: Arc<dyn LiveTransport>) -> Self {
        self.live = Some(live);
        self
    }

    pub fn state(&self) -> FallbackState {
        *self.state.lock()
    }

    pub fn should_use_fallback(&self) -> bool {
        self.state.lock().should_use_fallback()
    }

    /// Record WebSocket availability; becoming available clears a forced fallback
    pub fn on_websocket_status_change(&self, connected: bool) {
        let mut state = self.state.lock();
        state.web_socket_available = connected;
        if connected {
            state.fallback_forced = false;
        }
        tracing::debug!(connected, forced = state.fallback_forced, "WebSocket availability changed");
    }

    pub fn on_error<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&FallbackError) + Send + Sync + 'static,
    {
        self.error_listeners.lock().register((), Arc::new(listener))
    }

    pub fn remove_error_listener(&self, id: ListenerId) -> bool {
        self.error_listeners.lock().unregister(id)
    }

    pub fn on_fallback_used<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.fallback_listeners.lock().register((), Arc::new(listener))
    }

    pub fn remove_fallback_listener(&self, id: ListenerId) -> bool {
        self.fallback_listeners.lock().unregister(id)
    }

    /// Send a question over whichever transport is usable
    ///
    /// HTTP failures are returned and also reported to `on_error` listeners.
    /// A successful HTTP answer is delivered to the sink as a `response`.
    pub async fn send_question(
        &self,
        question: &str,
        conversation_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Route, FallbackError> {
        let message = Message::question(question, conversation_id);

        if !self.should_use_fallback() {
            if let Some(live) = &self.live {
                match live.send_question(&message) {
                    Ok(SendOutcome::Sent) => return Ok(Route::Live),
                    Ok(outcome) => return Ok(Route::Suppressed(outcome)),
                    Err(e) => {
                        tracing::warn!(error = %e, "WebSocket send failed, using HTTP fallback");
                        self.state.lock().fallback_forced = true;
                        self.notify_fallback_used(&e.to_string());
                    }
                }
            }
        }

        let report = validate(&message);
        if !report.is_valid() {
            return Ok(Route::Suppressed(SendOutcome::Invalid(report)));
        }

        let result = match user_id.map(str::trim).filter(|u| !u.is_empty()) {
            Some(user_id) => {
                let request = AskRequest {
                    question: question.to_string(),
                    conversation_id: conversation_id.map(str::to_string),
                    user_id: Some(user_id.to_string()),
                };
                self.ask_with_retry(&request).await
            }
            None => Err(FallbackError::MissingUserId),
        };

        match result {
            Ok(answer) => {
                self.sink
                    .deliver(Message::response(&ResponsePayload::from(answer)));
                Ok(Route::Http)
            }
            Err(e) => {
                tracing::error!(error = %e, "HTTP fallback failed");
                self.notify_error(&e);
                Err(e)
            }
        }
    }

    /// Linear backoff: the n-th retry waits `retry_delay * n`
    async fn ask_with_retry(&self, request: &AskRequest) -> Result<AskResponse, FallbackError> {
        let max_attempts = self.settings.max_retries.max(1);
        let mut attempt = 0u32;

        loop {
            let error = match self.api.ask(request).await {
                Ok(answer) => {
                    tracing::info!(attempt = attempt + 1, "Question answered over HTTP");
                    return Ok(answer);
                }
                Err(e) => e,
            };

            if error.is_client_error() {
                return Err(FallbackError::ClientRequest(error));
            }

            attempt += 1;
            if attempt >= max_attempts {
                return Err(FallbackError::ExhaustedRetries {
                    attempts: attempt,
                    last: error,
                });
            }

            let linear = self.settings.retry_delay * attempt;
            let delay = error.retry_after().map_or(linear, |wait| wait.max(linear));
            tracing::warn!(
                attempt,
                max = max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "HTTP fallback attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn notify_error(&self, error: &FallbackError) {
        let listeners = self.error_listeners.lock().listeners_for(&());
        for listener in listeners {
            invoke_guarded("fallback_error", || listener(error));
        }
    }

    fn notify_fallback_used(&self, reason: &str) {
        let listeners = self.fallback_listeners.lock().listeners_for(&());
        for listener in listeners {
            invoke_guarded("fallback_used", || listener(reason));
        }
    }
}
