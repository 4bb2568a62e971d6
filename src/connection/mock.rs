//! In-memory connector for tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::client::ConnectionSettings;
use super::error::TransportError;
use super::socket::{Connector, OutboundFrame, SocketEvent, SocketHandle};
use crate::protocol::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MockMode {
    /// Open succeeds and a [`MockServer`] is handed to the test
    Accept,
    /// Open fails immediately
    Refuse,
    /// Open never completes
    Hang,
}

/// Server side of one accepted mock socket
pub(crate) struct MockServer {
    pub url: String,
    pub from_client: mpsc::UnboundedReceiver<OutboundFrame>,
    pub to_client: mpsc::UnboundedSender<SocketEvent>,
}

impl MockServer {
    pub fn send_text(&self, text: &str) {
        let _ = self.to_client.send(SocketEvent::Text(text.to_string()));
    }

    pub fn send_frame(&self, frame: &Frame) {
        self.send_text(&frame.to_json().unwrap());
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.to_client.send(SocketEvent::Closed {
            code,
            reason: reason.to_string(),
        });
    }

    /// Next text frame from the client, parsed
    pub async fn next_text(&mut self) -> Frame {
        match self.from_client.recv().await {
            Some(OutboundFrame::Text(text)) => Frame::from_json(&text).unwrap(),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    pub fn try_next(&mut self) -> Option<OutboundFrame> {
        self.from_client.try_recv().ok()
    }
}

pub(crate) struct MockConnector {
    mode: Mutex<MockMode>,
    urls: Mutex<Vec<String>>,
    servers: mpsc::UnboundedSender<MockServer>,
}

impl MockConnector {
    pub fn set_mode(&self, mode: MockMode) {
        *self.mode.lock() = mode;
    }

    /// Number of open attempts so far
    pub fn opened(&self) -> usize {
        self.urls.lock().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, url: &str) -> Result<SocketHandle, TransportError> {
        self.urls.lock().push(url.to_string());
        let mode = *self.mode.lock();

        match mode {
            MockMode::Refuse => Err(TransportError::Connect("connection refused".to_string())),
            MockMode::Hang => std::future::pending().await,
            MockMode::Accept => {
                let (out_tx, out_rx) = mpsc::unbounded_channel();
                let (in_tx, in_rx) = mpsc::unbounded_channel();
                let _ = self.servers.send(MockServer {
                    url: url.to_string(),
                    from_client: out_rx,
                    to_client: in_tx,
                });
                Ok(SocketHandle {
                    outgoing: out_tx,
                    incoming: in_rx,
                })
            }
        }
    }
}

pub(crate) fn mock_connector() -> (Arc<MockConnector>, mpsc::UnboundedReceiver<MockServer>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let connector = Arc::new(MockConnector {
        mode: Mutex::new(MockMode::Accept),
        urls: Mutex::new(Vec::new()),
        servers: tx,
    });
    (connector, rx)
}

/// Settings with a heartbeat too slow to interfere with a test
pub(crate) fn test_settings() -> ConnectionSettings {
    ConnectionSettings {
        url: "ws://chat.test/ws".to_string(),
        heartbeat_interval: Duration::from_secs(3600),
        ..ConnectionSettings::default()
    }
}

/// Poll `cond` in 1ms steps of (possibly paused) time
pub(crate) async fn eventually(cond: impl Fn() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not met within 200ms");
}
