//! Connection Client
//!
//! Owns one persistent connection: opening it, reopening it with backoff,
//! keeping it alive with heartbeats, and queueing messages while it is down.
//!
//! Every socket is tagged with the epoch that was current when it was
//! opened. Callbacks from a socket whose epoch has been superseded, by a
//! reconnect or by [`ConnectionClient::disconnect`], are discarded.

use parking_lot::Mutex;
use reqwest::Url;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::backoff::Backoff;
use super::error::TransportError;
use super::heartbeat::{run_heartbeat, Beat};
use super::socket::{Connector, OutboundFrame, SocketEvent, SocketHandle};
use super::state::{close_code, ConnectionState, ConnectionStatus};
use crate::dispatch::{
    invoke_guarded, Dispatcher, ListenerId, ListenerRegistry, SendOutcome, Topic,
};
use crate::protocol::{validate, Frame, Message, PING, PONG};

/// Callback receiving every connection state change
pub type StateListener = dyn Fn(&ConnectionState) + Send + Sync;

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// WebSocket endpoint
    pub url: String,
    /// Query parameter carrying the auth token
    pub token_param: String,
    /// How long a handshake may take before it is abandoned and retried
    pub connect_timeout: Duration,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub heartbeat_interval: Duration,
    /// Close the socket when a ping is still unanswered at the next beat
    pub require_pong: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8000/ws/chat".to_string(),
            token_param: "token".to_string(),
            connect_timeout: Duration::from_secs(10),
            max_reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
            require_pong: false,
        }
    }
}

/// Handle to the persistent connection
///
/// Cheap to clone; all clones drive the same connection. Methods that open
/// sockets or arm timers must be called inside a Tokio runtime.
#[derive(Clone)]
pub struct ConnectionClient {
    shared: Arc<Shared>,
}

struct Shared {
    settings: ConnectionSettings,
    backoff: Backoff,
    connector: Arc<dyn Connector>,
    dispatcher: Arc<Dispatcher>,
    inner: Mutex<Inner>,
    state_listeners: Mutex<ListenerRegistry<(), StateListener>>,
}

#[derive(Default)]
struct Inner {
    state: ConnectionState,
    epoch: u64,
    token: Option<String>,
    outgoing: Option<mpsc::UnboundedSender<OutboundFrame>>,
    pending: VecDeque<Message>,
    socket_task: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
    next_reconnect_delay: Option<Duration>,
    heartbeat: Option<JoinHandle<()>>,
    awaiting_pong: bool,
}

impl ConnectionClient {
    pub fn new(
        settings: ConnectionSettings,
        connector: Arc<dyn Connector>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        let backoff = Backoff::new(settings.reconnect_base_delay, settings.reconnect_max_delay);
        Self {
            shared: Arc::new(Shared {
                settings,
                backoff,
                connector,
                dispatcher,
                inner: Mutex::new(Inner::default()),
                state_listeners: Mutex::new(ListenerRegistry::new()),
            }),
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.shared.dispatcher
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.shared.settings
    }

    /// Open the connection
    ///
    /// Does nothing while already connecting or connected. A `None` token
    /// reuses the token from the previous call.
    pub fn connect(&self, token: Option<String>) {
        let shared = &self.shared;
        shared.update(|inner| {
            if matches!(
                inner.state.status,
                ConnectionStatus::Connecting | ConnectionStatus::Connected
            ) {
                tracing::debug!(status = %inner.state.status, "connect() ignored");
                return;
            }
            if token.is_some() {
                inner.token = token;
            }
            shared.open_socket(inner);
        });
    }

    /// Close the connection and cancel every pending timer
    ///
    /// Idempotent. Callbacks from the closed socket become no-ops.
    pub fn disconnect(&self) {
        self.shared.update(|inner| {
            inner.epoch += 1;
            if let Some(timer) = inner.reconnect_timer.take() {
                timer.abort();
            }
            inner.next_reconnect_delay = None;
            Shared::stop_heartbeat(inner);
            if let Some(task) = inner.socket_task.take() {
                task.abort();
            }
            if let Some(tx) = inner.outgoing.take() {
                let _ = tx.send(OutboundFrame::Close {
                    code: close_code::NORMAL,
                    reason: "Client disconnect".to_string(),
                });
            }
            inner.state.status = ConnectionStatus::Disconnected;
            tracing::info!(epoch = inner.epoch, "WebSocket disconnected");
        });
    }

    /// Transmit now if connected, otherwise queue until the next open
    ///
    /// An invalid message is neither sent nor queued; error listeners get a
    /// synthesized `error` message instead. Questions pass duplicate
    /// suppression and the rate limit when they reach the wire, so queued
    /// questions are gated at flush time.
    pub fn send(&self, message: Message) {
        let dispatcher = &self.shared.dispatcher;
        let report = validate(&message);
        if !report.is_valid() {
            dispatcher.report_invalid(&message, &report);
            return;
        }

        let refused = {
            let mut inner = self.shared.inner.lock();
            let outgoing = match inner.state.status {
                ConnectionStatus::Connected => inner.outgoing.as_ref(),
                _ => None,
            };
            match transmit_gated(dispatcher, outgoing, &message) {
                Transmit::Sent | Transmit::Dropped => None,
                Transmit::Refused(outcome) => Some(outcome),
                Transmit::Unavailable => {
                    inner.pending.push_back(message);
                    tracing::debug!(pending = inner.pending.len(), "Message queued until connected");
                    None
                }
            }
        };

        if let Some(outcome) = refused {
            dispatcher.report_refusal(&outcome);
        }
    }

    /// Transmit now or fail; never queues
    pub fn try_transmit(&self, message: &Message) -> Result<(), TransportError> {
        let inner = self.shared.inner.lock();
        if inner.state.status != ConnectionStatus::Connected {
            return Err(TransportError::NotConnected);
        }
        let tx = inner.outgoing.as_ref().ok_or(TransportError::NotConnected)?;
        tx.send(OutboundFrame::Text(encode(message)?))
            .map_err(|_| TransportError::SocketClosed)
    }

    /// Send a question through duplicate suppression and rate limiting
    pub fn send_question(&self, message: &Message) -> Result<SendOutcome, TransportError> {
        self.shared
            .dispatcher
            .send_message(message, |m| self.try_transmit(m))
    }

    pub fn subscribe<F>(&self, topic: impl Into<Topic>, listener: F) -> ListenerId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.shared.dispatcher.subscribe(topic, listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.shared.dispatcher.unsubscribe(id)
    }

    /// Observe state changes, delivered in order of occurrence
    pub fn subscribe_to_state<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        self.shared
            .state_listeners
            .lock()
            .register((), Arc::new(listener))
    }

    pub fn unsubscribe_from_state(&self, id: ListenerId) -> bool {
        self.shared.state_listeners.lock().unregister(id)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state.clone()
    }

    pub fn epoch(&self) -> u64 {
        self.shared.inner.lock().epoch
    }

    /// Messages waiting for the next open
    pub fn pending_len(&self) -> usize {
        self.shared.inner.lock().pending.len()
    }

    /// Delay of the armed reconnect timer, if any
    pub fn next_reconnect_delay(&self) -> Option<Duration> {
        self.shared.inner.lock().next_reconnect_delay
    }
}

impl Shared {
    /// Mutate the inner state, then notify state listeners outside the lock
    fn update<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let (result, changed) = {
            let mut inner = self.inner.lock();
            let before = inner.state.clone();
            let result = f(&mut inner);
            let changed = (inner.state != before).then(|| inner.state.clone());
            (result, changed)
        };
        if let Some(state) = changed {
            self.notify_state(&state);
        }
        result
    }

    fn notify_state(&self, state: &ConnectionState) {
        let listeners = self.state_listeners.lock().listeners_for(&());
        for listener in listeners {
            invoke_guarded("connection_state", || listener(state));
        }
    }

    /// Mint a new epoch and start opening a socket for it
    fn open_socket(self: &Arc<Self>, inner: &mut Inner) {
        inner.epoch += 1;
        inner.state.status = ConnectionStatus::Connecting;
        inner.outgoing = None;
        inner.awaiting_pong = false;
        Self::stop_heartbeat(inner);
        if let Some(task) = inner.socket_task.take() {
            task.abort();
        }

        let epoch = inner.epoch;
        let token = inner.token.clone();
        tracing::info!(
            epoch,
            attempt = inner.state.reconnect_attempts,
            url = %self.settings.url,
            "Opening WebSocket"
        );
        let shared = Arc::clone(self);
        inner.socket_task = Some(tokio::spawn(async move {
            shared.run_socket(epoch, token).await;
        }));
    }

    async fn run_socket(self: Arc<Self>, epoch: u64, token: Option<String>) {
        let url = match self.endpoint_url(token.as_deref()) {
            Ok(url) => url,
            Err(e) => {
                self.handle_failure(epoch, e);
                return;
            }
        };

        let timeout = self.settings.connect_timeout;
        let handle = match tokio::time::timeout(timeout, self.connector.open(&url)).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                self.handle_failure(epoch, e);
                return;
            }
            Err(_) => {
                self.handle_failure(epoch, TransportError::Timeout(timeout));
                return;
            }
        };

        let SocketHandle {
            outgoing,
            mut incoming,
        } = handle;
        if !self.handle_open(epoch, outgoing) {
            return;
        }

        while let Some(event) = incoming.recv().await {
            match event {
                SocketEvent::Text(text) => self.handle_text(epoch, &text),
                SocketEvent::Closed { code, reason } => {
                    self.handle_close(epoch, code, &reason);
                    return;
                }
                SocketEvent::Error(e) => {
                    self.handle_failure(epoch, TransportError::Connect(e));
                    return;
                }
            }
        }
        self.handle_close(epoch, close_code::ABNORMAL, "socket stream ended");
    }

    fn endpoint_url(&self, token: Option<&str>) -> Result<String, TransportError> {
        let mut url = Url::parse(&self.settings.url)
            .map_err(|e| TransportError::InvalidUrl(format!("{}: {}", self.settings.url, e)))?;
        if let Some(token) = token {
            url.query_pairs_mut()
                .append_pair(&self.settings.token_param, token);
        }
        Ok(url.to_string())
    }

    /// Returns false when the socket belongs to a superseded epoch
    fn handle_open(
        self: &Arc<Self>,
        epoch: u64,
        outgoing: mpsc::UnboundedSender<OutboundFrame>,
    ) -> bool {
        let refused = self.update(|inner| {
            if inner.epoch != epoch {
                tracing::debug!(epoch, current = inner.epoch, "Discarding stale socket");
                return None;
            }

            inner.state.status = ConnectionStatus::Connected;
            inner.state.reconnect_attempts = 0;
            inner.state.last_error = None;
            inner.next_reconnect_delay = None;
            inner.awaiting_pong = false;

            let mut flushed = 0usize;
            let mut refused = Vec::new();
            while let Some(message) = inner.pending.pop_front() {
                match transmit_gated(&self.dispatcher, Some(&outgoing), &message) {
                    Transmit::Sent => flushed += 1,
                    Transmit::Dropped => {}
                    Transmit::Refused(outcome) => {
                        tracing::debug!(kind = %message.kind(), ?outcome, "Queued message refused");
                        refused.push(outcome);
                    }
                    Transmit::Unavailable => {
                        inner.pending.push_front(message);
                        break;
                    }
                }
            }

            inner.outgoing = Some(outgoing);
            self.start_heartbeat(inner, epoch);
            tracing::info!(epoch, flushed, refused = refused.len(), "WebSocket connected");
            Some(refused)
        });

        match refused {
            Some(refused) => {
                for outcome in &refused {
                    self.dispatcher.report_refusal(outcome);
                }
                true
            }
            None => false,
        }
    }

    fn handle_text(self: &Arc<Self>, epoch: u64, text: &str) {
        let frame = match Frame::from_json(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed WebSocket frame");
                return;
            }
        };

        {
            let mut inner = self.inner.lock();
            if inner.epoch != epoch {
                tracing::trace!(epoch, current = inner.epoch, "Ignoring frame from stale socket");
                return;
            }
            match frame.kind.as_str() {
                PONG => {
                    inner.awaiting_pong = false;
                    return;
                }
                PING => {
                    if let (Some(tx), Ok(text)) = (&inner.outgoing, Frame::pong().to_json()) {
                        let _ = tx.send(OutboundFrame::Text(text));
                    }
                    return;
                }
                _ => {}
            }
        }

        self.dispatcher.dispatch_frame(frame);
    }

    fn handle_close(self: &Arc<Self>, epoch: u64, code: u16, reason: &str) {
        self.update(|inner| {
            if inner.epoch != epoch {
                return;
            }
            Self::release_socket(inner);

            if code == close_code::NORMAL {
                inner.state.status = ConnectionStatus::Disconnected;
                tracing::info!(epoch, "WebSocket closed normally");
            } else if close_code::is_auth_failure(code) {
                inner.state.status = ConnectionStatus::Errored;
                inner.state.last_error =
                    Some(format!("Authentication failed (code {}): {}", code, reason));
                tracing::error!(epoch, code, reason, "WebSocket rejected credentials");
            } else {
                tracing::warn!(epoch, code, reason, "WebSocket closed unexpectedly");
                let message = if reason.is_empty() {
                    format!("Connection closed (code {})", code)
                } else {
                    format!("Connection closed (code {}): {}", code, reason)
                };
                self.schedule_reconnect(inner, message);
            }
        });
    }

    fn handle_failure(self: &Arc<Self>, epoch: u64, error: TransportError) {
        self.update(|inner| {
            if inner.epoch != epoch {
                return;
            }
            Self::release_socket(inner);

            if error.is_retryable() {
                tracing::warn!(epoch, error = %error, "WebSocket failed");
                self.schedule_reconnect(inner, error.to_string());
            } else {
                tracing::error!(epoch, error = %error, "WebSocket failed permanently");
                inner.state.status = ConnectionStatus::Errored;
                inner.state.last_error = Some(error.to_string());
            }
        });
    }

    /// Arm the reconnect timer, or give up once attempts are exhausted
    fn schedule_reconnect(self: &Arc<Self>, inner: &mut Inner, reason: String) {
        if inner.reconnect_timer.is_some() {
            return;
        }

        let max = self.settings.max_reconnect_attempts;
        if inner.state.reconnect_attempts >= max {
            inner.state.status = ConnectionStatus::Errored;
            inner.state.last_error = Some(format!(
                "Max reconnection attempts ({}) reached: {}",
                max, reason
            ));
            inner.next_reconnect_delay = None;
            tracing::error!(attempts = max, "Giving up on WebSocket");
            return;
        }

        inner.state.reconnect_attempts += 1;
        let attempt = inner.state.reconnect_attempts;
        let delay = self.backoff.delay(attempt);
        inner.state.status = ConnectionStatus::Connecting;
        inner.state.last_error = Some(reason);
        inner.next_reconnect_delay = Some(delay);

        let epoch = inner.epoch;
        tracing::info!(
            attempt,
            max,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );
        let shared = Arc::clone(self);
        inner.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.fire_reconnect(epoch);
        }));
    }

    fn fire_reconnect(self: &Arc<Self>, epoch: u64) {
        self.update(|inner| {
            if inner.epoch != epoch {
                return;
            }
            inner.reconnect_timer = None;
            inner.next_reconnect_delay = None;
            self.open_socket(inner);
        });
    }

    fn start_heartbeat(self: &Arc<Self>, inner: &mut Inner, epoch: u64) {
        Self::stop_heartbeat(inner);
        let period = self.settings.heartbeat_interval;
        let shared = Arc::clone(self);
        inner.heartbeat = Some(tokio::spawn(async move {
            run_heartbeat(period, || shared.heartbeat_tick(epoch)).await;
        }));
    }

    fn heartbeat_tick(self: &Arc<Self>, epoch: u64) -> Beat {
        let dead = {
            let mut inner = self.inner.lock();
            if inner.epoch != epoch || inner.state.status != ConnectionStatus::Connected {
                return Beat::Stop;
            }

            if self.settings.require_pong && inner.awaiting_pong {
                // This task is the heartbeat; detach rather than abort it
                inner.heartbeat = None;
                if let Some(task) = inner.socket_task.take() {
                    task.abort();
                }
                if let Some(tx) = inner.outgoing.take() {
                    let _ = tx.send(OutboundFrame::Close {
                        code: close_code::HEARTBEAT_TIMEOUT,
                        reason: "Heartbeat timeout".to_string(),
                    });
                }
                true
            } else {
                if let (Some(tx), Ok(text)) = (&inner.outgoing, Frame::ping().to_json()) {
                    let _ = tx.send(OutboundFrame::Text(text));
                }
                inner.awaiting_pong = true;
                false
            }
        };

        if dead {
            tracing::warn!(epoch, "No pong since last heartbeat, closing socket");
            self.handle_close(epoch, close_code::HEARTBEAT_TIMEOUT, "Heartbeat timeout");
            Beat::Stop
        } else {
            Beat::Continue
        }
    }

    fn stop_heartbeat(inner: &mut Inner) {
        if let Some(task) = inner.heartbeat.take() {
            task.abort();
        }
        inner.awaiting_pong = false;
    }

    /// Forget the socket of the current epoch after it has ended
    fn release_socket(inner: &mut Inner) {
        inner.outgoing = None;
        inner.socket_task = None;
        Self::stop_heartbeat(inner);
    }
}

fn encode(message: &Message) -> Result<String, TransportError> {
    Ok(message.to_frame().to_json()?)
}

/// Result of one gated write to the socket
enum Transmit {
    Sent,
    /// Refused by the outbound gate; not sent and not queued
    Refused(SendOutcome),
    /// Could not be encoded
    Dropped,
    /// No writable socket; the caller keeps the message
    Unavailable,
}

/// Gate `message` through the dispatcher and write it to `outgoing`
///
/// Never notifies listeners, so it is safe under the connection lock.
fn transmit_gated(
    dispatcher: &Dispatcher,
    outgoing: Option<&mpsc::UnboundedSender<OutboundFrame>>,
    message: &Message,
) -> Transmit {
    let Some(tx) = outgoing else {
        return Transmit::Unavailable;
    };
    if let Err(outcome) = dispatcher.admit(message) {
        return Transmit::Refused(outcome);
    }

    let text = match encode(message) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, kind = %message.kind(), "Dropping unencodable message");
            dispatcher.forget(message);
            return Transmit::Dropped;
        }
    };
    if tx.send(OutboundFrame::Text(text)).is_err() {
        dispatcher.forget(message);
        return Transmit::Unavailable;
    }
    dispatcher.record_sent(message);
    Transmit::Sent
}
