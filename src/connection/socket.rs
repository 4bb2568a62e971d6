//! Socket Transport
//!
//! The [`Connector`] seam between the state machine and a physical socket.
//! An open socket is a pair of channels: frames to write, and events read.
//! [`WsConnector`] implements it over `tokio-tungstenite`.

use async_trait::async_trait;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::error::TransportError;
use super::state::close_code;

/// Status code reported when the peer closes without a close frame payload
const NO_STATUS: u16 = 1005;

/// How long a released socket waits for the peer's half of the close handshake
pub const CLOSE_GRACE: Duration = Duration::from_secs(2);

type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Frame written to the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Close { code: u16, reason: String },
}

/// Event read from the socket
///
/// `Closed` and `Error` are terminal: nothing follows them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Text(String),
    Closed { code: u16, reason: String },
    Error(String),
}

/// An open socket
pub struct SocketHandle {
    pub outgoing: mpsc::UnboundedSender<OutboundFrame>,
    pub incoming: mpsc::UnboundedReceiver<SocketEvent>,
}

/// Opens physical sockets for the connection state machine
#[async_trait]
pub trait Connector: Send + Sync {
    /// Complete the handshake with `url`
    ///
    /// Resolves once the socket is open; the caller applies its own timeout.
    async fn open(&self, url: &str) -> Result<SocketHandle, TransportError>;
}

/// WebSocket connector backed by `tokio-tungstenite`
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &str) -> Result<SocketHandle, TransportError> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let (mut sink, mut stream) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<OutboundFrame>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<SocketEvent>();

        // Writer: forward frames until a close is requested or the sender is dropped
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let result = match frame {
                    OutboundFrame::Text(text) => sink.send(WsMessage::Text(text)).await,
                    OutboundFrame::Close { code, reason } => {
                        let close = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        let _ = time::timeout(CLOSE_GRACE, sink.send(WsMessage::Close(Some(close))))
                            .await;
                        return;
                    }
                };
                if let Err(e) = result {
                    tracing::debug!(error = %e, "WebSocket write failed");
                    return;
                }
            }
            let _ = time::timeout(CLOSE_GRACE, sink.close()).await;
        });

        // Reader: translate tungstenite messages into socket events until the
        // client lets go of the socket
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    next = stream.next() => Some(next),
                    _ = in_tx.closed() => None,
                };
                let Some(next) = next else {
                    await_close_reply(&mut stream).await;
                    return;
                };

                match next {
                    Some(Ok(WsMessage::Text(text))) => {
                        if in_tx.send(SocketEvent::Text(text)).is_err() {
                            return;
                        }
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        tracing::debug!(bytes = data.len(), "Ignoring binary WebSocket frame");
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.into_owned()))
                            .unwrap_or((NO_STATUS, String::new()));
                        let _ = in_tx.send(SocketEvent::Closed { code, reason });
                        return;
                    }
                    // Protocol-level ping/pong is answered by tungstenite itself
                    Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => {}
                    Some(Err(e)) => {
                        let _ = in_tx.send(SocketEvent::Error(e.to_string()));
                        return;
                    }
                    None => {
                        let _ = in_tx.send(SocketEvent::Closed {
                            code: close_code::ABNORMAL,
                            reason: "connection dropped".to_string(),
                        });
                        return;
                    }
                }
            }
        });

        Ok(SocketHandle {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}

/// Read until the peer answers our close frame, or give up after [`CLOSE_GRACE`]
///
/// Returning drops this half of the stream; once the writer is gone too the
/// TCP connection is closed, whether or not the peer ever replied.
async fn await_close_reply(stream: &mut WsStream) {
    let drained = time::timeout(CLOSE_GRACE, async {
        while let Some(Ok(msg)) = stream.next().await {
            if msg.is_close() {
                break;
            }
        }
    })
    .await;
    if drained.is_err() {
        tracing::debug!("Peer never finished the close handshake; dropping socket");
    }
}
