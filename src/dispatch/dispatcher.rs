//! Message Dispatcher
//!
//! Fans validated inbound messages out to listeners and gates outbound sends
//! through duplicate suppression and rate limiting.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use super::dedup::{Signature, SignatureSet};
use super::rate_limiter::RateLimiter;
use super::registry::{invoke_guarded, ListenerId, ListenerRegistry};
use crate::protocol::{validate, validate_frame, Frame, Message, MessageKind, ValidationReport};

/// Callback receiving dispatched messages
pub type MessageListener = dyn Fn(&Message) + Send + Sync;

/// Callback receiving the wait time after a rate-limited send
pub type RateLimitListener = dyn Fn(Duration) + Send + Sync;

/// Subscription key: one message kind, or every kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Kind(MessageKind),
    All,
}

impl From<MessageKind> for Topic {
    fn from(kind: MessageKind) -> Self {
        Topic::Kind(kind)
    }
}

/// Anything that accepts normalized inbound messages
pub trait MessageSink: Send + Sync {
    fn deliver(&self, message: Message);
}

/// Configuration for outbound gating
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    /// Questions admitted per window
    pub rate_limit_max_messages: usize,
    /// Sliding window length
    pub rate_limit_window: Duration,
    /// How often the sent-signature set is cleared
    pub dedup_clear_interval: Duration,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            rate_limit_max_messages: 10,
            rate_limit_window: Duration::from_secs(60),
            dedup_clear_interval: Duration::from_secs(300),
        }
    }
}

/// Result of [`Dispatcher::send_message`]
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Handed to the transport
    Sent,
    /// Same question was already sent in this dedup interval
    Duplicate,
    /// Rate limit reached; a slot frees up after `retry_after`
    RateLimited { retry_after: Duration },
    /// Message failed validation and was not transmitted
    Invalid(ValidationReport),
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent)
    }
}

pub struct Dispatcher {
    listeners: Mutex<ListenerRegistry<Topic, MessageListener>>,
    rate_limit_listeners: Mutex<ListenerRegistry<(), RateLimitListener>>,
    limiter: Mutex<RateLimiter>,
    signatures: Mutex<SignatureSet>,
}

impl Dispatcher {
    pub fn new(settings: DispatcherSettings) -> Self {
        Self {
            listeners: Mutex::new(ListenerRegistry::new()),
            rate_limit_listeners: Mutex::new(ListenerRegistry::new()),
            limiter: Mutex::new(RateLimiter::new(
                settings.rate_limit_max_messages,
                settings.rate_limit_window,
            )),
            signatures: Mutex::new(SignatureSet::new(settings.dedup_clear_interval)),
        }
    }

    /// Register a listener for one kind or for [`Topic::All`]
    pub fn subscribe<F>(&self, topic: impl Into<Topic>, listener: F) -> ListenerId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.listeners.lock().register(topic.into(), Arc::new(listener))
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.lock().unregister(id)
    }

    /// Register a callback invoked whenever a question is rate limited
    pub fn on_rate_limited<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.rate_limit_listeners.lock().register((), Arc::new(listener))
    }

    pub fn remove_rate_limit_listener(&self, id: ListenerId) -> bool {
        self.rate_limit_listeners.lock().unregister(id)
    }

    /// Validate and distribute a frame received from the socket
    pub fn dispatch_frame(&self, frame: Frame) {
        let report = validate_frame(&frame);
        if !report.is_valid() {
            self.reject(&frame.kind, &report);
            return;
        }

        match Message::try_from(frame) {
            Ok(message) => self.emit(&message),
            Err(e) => {
                let report = ValidationReport::from_errors(e.errors);
                self.reject("unknown", &report);
            }
        }
    }

    /// Validate and distribute an already constructed message
    pub fn handle_message(&self, message: &Message) {
        let report = validate(message);
        if report.is_valid() {
            self.emit(message);
        } else {
            self.reject(message.kind().as_str(), &report);
        }
    }

    /// Gate and transmit an outbound message
    ///
    /// `question` messages go through duplicate suppression and the rate
    /// limiter; every other kind skips both. Errors from `transmit` are
    /// returned unchanged; the message then counts neither against the rate
    /// limit nor as a duplicate.
    pub fn send_message<F, E>(&self, message: &Message, transmit: F) -> Result<SendOutcome, E>
    where
        F: FnOnce(&Message) -> Result<(), E>,
    {
        if let Err(outcome) = self.admit(message) {
            self.report_refusal(&outcome);
            return Ok(outcome);
        }

        if let Err(e) = transmit(message) {
            self.forget(message);
            return Err(e);
        }

        self.record_sent(message);
        Ok(SendOutcome::Sent)
    }

    /// Run the outbound gate without transmitting or notifying anyone
    ///
    /// An admitted question is marked as sent for duplicate suppression; the
    /// caller must follow up with [`Dispatcher::record_sent`] or
    /// [`Dispatcher::forget`].
    pub(crate) fn admit(&self, message: &Message) -> Result<(), SendOutcome> {
        if message.kind() == MessageKind::Question {
            if !self.signatures.lock().insert(signature_of(message)) {
                tracing::debug!("Duplicate question suppressed");
                return Err(SendOutcome::Duplicate);
            }

            let denied = {
                let mut limiter = self.limiter.lock();
                if limiter.can_send() {
                    None
                } else {
                    Some(limiter.time_until_next_slot())
                }
            };
            if let Some(retry_after) = denied {
                tracing::warn!(
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Question rate limit exceeded"
                );
                return Err(SendOutcome::RateLimited { retry_after });
            }
        }

        let report = validate(message);
        if !report.is_valid() {
            tracing::warn!(
                kind = %message.kind(),
                errors = ?report.errors,
                "Refusing to send invalid message"
            );
            self.forget(message);
            return Err(SendOutcome::Invalid(report));
        }
        Ok(())
    }

    /// Count a transmitted question against the rate limit
    pub(crate) fn record_sent(&self, message: &Message) {
        if message.kind() == MessageKind::Question {
            self.limiter.lock().record_sent();
        }
    }

    /// Drop the duplicate mark of a question that never reached the wire
    pub(crate) fn forget(&self, message: &Message) {
        if message.kind() == MessageKind::Question {
            self.signatures.lock().remove(&signature_of(message));
        }
    }

    /// Tell rate-limit listeners about a refused send
    ///
    /// Must be called with no connection lock held.
    pub(crate) fn report_refusal(&self, outcome: &SendOutcome) {
        if let SendOutcome::RateLimited { retry_after } = outcome {
            self.notify_rate_limited(*retry_after);
        }
    }

    /// Deliver the synthesized validation error for a refused outbound message
    pub(crate) fn report_invalid(&self, message: &Message, report: &ValidationReport) {
        self.reject(message.kind().as_str(), report);
    }

    /// Questions that may still be sent in the current window
    pub fn remaining_questions(&self) -> usize {
        self.limiter.lock().remaining()
    }

    /// Wait before the next question can be admitted
    pub fn time_until_next_slot(&self) -> Duration {
        self.limiter.lock().time_until_next_slot()
    }

    /// Forget all sent signatures immediately
    pub fn clear_signatures(&self) {
        self.signatures.lock().clear();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    fn emit(&self, message: &Message) {
        let (by_kind, wildcard) = {
            let registry = self.listeners.lock();
            (
                registry.listeners_for(&Topic::Kind(message.kind())),
                registry.listeners_for(&Topic::All),
            )
        };

        tracing::trace!(
            kind = %message.kind(),
            listeners = by_kind.len() + wildcard.len(),
            "Dispatching message"
        );

        for listener in by_kind.iter().chain(wildcard.iter()) {
            invoke_guarded("message", || listener(message));
        }
    }

    /// Deliver a synthesized error to error listeners only
    fn reject(&self, kind: &str, report: &ValidationReport) {
        tracing::warn!(kind = %kind, errors = ?report.errors, "Dropping invalid message");

        let error = Message::validation_failure(report);
        let listeners = self
            .listeners
            .lock()
            .listeners_for(&Topic::Kind(MessageKind::Error));
        for listener in &listeners {
            invoke_guarded("message", || listener(&error));
        }
    }

    fn notify_rate_limited(&self, retry_after: Duration) {
        let listeners = self.rate_limit_listeners.lock().listeners_for(&());
        for listener in &listeners {
            invoke_guarded("rate_limit", || listener(retry_after));
        }
    }
}

fn signature_of(message: &Message) -> Signature {
    Signature::new(
        message.question_text().unwrap_or_default(),
        message.conversation_id(),
    )
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DispatcherSettings::default())
    }
}

impl MessageSink for Dispatcher {
    fn deliver(&self, message: Message) {
        self.handle_message(&message);
    }
}
