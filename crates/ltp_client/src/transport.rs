//! Transport adapter — a thin seam over the bidirectional text stream.
//!
//! The state machine owns all scheduling and cancellation; a transport only
//! opens connections, sends text frames, and yields received text frames
//! until the peer goes away. The default implementation speaks WebSocket via
//! tokio-tungstenite; tests substitute a scripted in-memory transport.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Send failed: {0}")]
    Send(String),
}

/// Outbound half of an open connection.
#[async_trait]
pub trait TransportSink: Send {
    async fn send(&mut self, text: String) -> Result<(), TransportError>;
    async fn close(&mut self);
}

/// Inbound half of an open connection. `recv` yields text frames and returns
/// `None` once the connection is closed (locally or by the peer).
#[async_trait]
pub trait TransportStream: Send {
    async fn recv(&mut self) -> Option<String>;
}

pub struct TransportPair {
    pub sink: Box<dyn TransportSink>,
    pub stream: Box<dyn TransportStream>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, url: &str, subprotocols: &[&str]) -> Result<TransportPair, TransportError>;
}

// ── Default WebSocket transport ──────────────────────────────────────────────

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, url: &str, subprotocols: &[&str]) -> Result<TransportPair, TransportError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        if !subprotocols.is_empty() {
            let value = HeaderValue::from_str(&subprotocols.join(", "))
                .map_err(|e| TransportError::Connect(e.to_string()))?;
            request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
        }

        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (sink, stream) = stream.split();

        Ok(TransportPair {
            sink: Box::new(WsSink { inner: sink }),
            stream: Box::new(WsReader { inner: stream }),
        })
    }
}

struct WsSink {
    inner: SplitSink<WsStream, Message>,
}

#[async_trait]
impl TransportSink for WsSink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.inner
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(err) = self.inner.send(Message::Close(None)).await {
            debug!(error = %err, "websocket close frame not delivered");
        }
    }
}

struct WsReader {
    inner: SplitStream<WsStream>,
}

#[async_trait]
impl TransportStream for WsReader {
    async fn recv(&mut self) -> Option<String> {
        while let Some(frame) = self.inner.next().await {
            match frame {
                Ok(Message::Text(text)) => return Some(text),
                Ok(Message::Close(_)) => return None,
                // Binary, ping, and pong frames are not part of the protocol.
                Ok(_) => continue,
                Err(err) => {
                    warn!(error = %err, "websocket receive failed, treating as closed");
                    return None;
                }
            }
        }
        None
    }
}
