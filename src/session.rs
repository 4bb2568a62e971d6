//! Chat Session
//!
//! Context object owning one user's transport stack: the dispatcher, the
//! persistent connection and the fallback coordinator. The application
//! creates one per session and hands it (or an `Arc` of it) to consumers.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::TokenSource;
use crate::config::Config;
use crate::connection::{
    ConnectionClient, ConnectionSettings, ConnectionState, Connector, WsConnector,
};
use crate::dispatch::{Dispatcher, DispatcherSettings, ListenerId, Topic};
use crate::error::Result;
use crate::fallback::{
    FallbackCoordinator, FallbackError, FallbackSettings, FallbackState, QuestionApi, RestClient,
    Route,
};
use crate::protocol::Message;

pub struct ChatSession {
    dispatcher: Arc<Dispatcher>,
    connection: ConnectionClient,
    coordinator: Arc<FallbackCoordinator>,
    tokens: Arc<dyn TokenSource>,
    availability: ListenerId,
}

impl ChatSession {
    /// Session over a real WebSocket and the REST fallback endpoint
    pub fn new(config: &Config, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        let api = RestClient::new(&config.fallback_settings(), Arc::clone(&tokens))?;
        Ok(Self::with_parts(
            config.connection_settings(),
            config.dispatcher_settings(),
            config.fallback_settings(),
            Arc::new(WsConnector::new()),
            Arc::new(api),
            tokens,
        ))
    }

    /// Session over caller-supplied transports
    pub fn with_parts(
        connection: ConnectionSettings,
        dispatch: DispatcherSettings,
        fallback: FallbackSettings,
        connector: Arc<dyn Connector>,
        api: Arc<dyn QuestionApi>,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(dispatch));
        let connection = ConnectionClient::new(connection, connector, Arc::clone(&dispatcher));
        let coordinator = Arc::new(
            FallbackCoordinator::new(fallback, api, dispatcher.clone())
                .with_live_transport(Arc::new(connection.clone())),
        );

        // Weak: the coordinator already holds the connection
        let weak = Arc::downgrade(&coordinator);
        let availability = connection.subscribe_to_state(move |state| {
            if let Some(coordinator) = weak.upgrade() {
                coordinator.on_websocket_status_change(state.is_connected());
            }
        });

        Self {
            dispatcher,
            connection,
            coordinator,
            tokens,
            availability,
        }
    }

    /// Open the WebSocket with the current token
    pub fn connect(&self) {
        self.connection.connect(self.tokens.token());
    }

    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    /// Send any message over the WebSocket, queueing while disconnected
    ///
    /// Goes through the same validation and question gating as `send_question`.
    pub fn send(&self, message: Message) {
        self.connection.send(message);
    }

    /// Ask a question over whichever transport is usable
    pub async fn send_question(
        &self,
        question: &str,
        conversation_id: Option<&str>,
        user_id: Option<&str>,
    ) -> std::result::Result<Route, FallbackError> {
        self.coordinator
            .send_question(question, conversation_id, user_id)
            .await
    }

    pub fn subscribe<F>(&self, topic: impl Into<Topic>, listener: F) -> ListenerId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(topic, listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.dispatcher.unsubscribe(id)
    }

    pub fn subscribe_to_state<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        self.connection.subscribe_to_state(listener)
    }

    pub fn unsubscribe_from_state(&self, id: ListenerId) -> bool {
        self.connection.unsubscribe_from_state(id)
    }

    /// Override the availability normally pushed from connection state
    pub fn on_websocket_status_change(&self, connected: bool) {
        self.coordinator.on_websocket_status_change(connected);
    }

    pub fn on_fallback_used<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.coordinator.on_fallback_used(listener)
    }

    pub fn on_error<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&FallbackError) + Send + Sync + 'static,
    {
        self.coordinator.on_error(listener)
    }

    pub fn on_rate_limited<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.dispatcher.on_rate_limited(listener)
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn fallback_state(&self) -> FallbackState {
        self.coordinator.state()
    }

    pub fn connection(&self) -> &ConnectionClient {
        &self.connection
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.connection.unsubscribe_from_state(self.availability);
        self.connection.disconnect();
    }
}
