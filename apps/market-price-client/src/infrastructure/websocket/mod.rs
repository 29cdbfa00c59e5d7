//! WebSocket Transport
//!
//! `Transport` adapter over tokio-tungstenite. Each open connection gets a
//! reader task that forwards text frames into the connection's inbound
//! channel; the channel ends when the server closes, the socket errors, or
//! the connection is closed locally.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::{SEC_WEBSOCKET_PROTOCOL, USER_AGENT};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{Connection, FrameWriter, OpenRequest, Transport, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Inbound frames buffered per connection before the reader waits.
pub const DEFAULT_INBOUND_CAPACITY: usize = 256;

/// Plain `ws://` transport.
#[derive(Debug, Clone)]
pub struct WsTransport {
    inbound_capacity: usize,
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl WsTransport {
    /// Create a transport with the default inbound buffer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
        }
    }

    /// Override the inbound buffer size.
    #[must_use]
    pub const fn with_inbound_capacity(mut self, capacity: usize) -> Self {
        self.inbound_capacity = capacity;
        self
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, request: &OpenRequest) -> Result<Connection, TransportError> {
        let url = request.url();
        let mut client_request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::ConnectFailed(format!("invalid url {url}: {e}")))?;

        let headers = client_request.headers_mut();
        headers.insert(SEC_WEBSOCKET_PROTOCOL, header_value(&request.subprotocol)?);
        headers.insert(USER_AGENT, header_value(&request.user_agent)?);

        let (stream, response) = tokio_tungstenite::connect_async(client_request)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        tracing::debug!(url = %url, status = %response.status(), "WebSocket handshake complete");

        let (sink, source) = stream.split();
        let (inbound_tx, inbound_rx) = mpsc::channel(self.inbound_capacity.max(1));
        let cancel = CancellationToken::new();
        tokio::spawn(read_frames(source, inbound_tx, cancel.clone()));

        Ok(Connection {
            endpoint: request.endpoint.clone(),
            writer: Box::new(WsWriter {
                sink,
                cancel,
                closed: false,
            }),
            inbound: inbound_rx,
        })
    }
}

fn header_value(value: &str) -> Result<HeaderValue, TransportError> {
    HeaderValue::from_str(value)
        .map_err(|e| TransportError::ConnectFailed(format!("invalid header value {value:?}: {e}")))
}

/// Forward text frames until the socket ends or `cancel` fires.
async fn read_frames(
    mut source: SplitStream<WsStream>,
    inbound_tx: mpsc::Sender<String>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            frame = source.next() => frame,
        };

        let text = match frame {
            Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping non-UTF-8 binary frame");
                    continue;
                }
            },
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(frame = ?frame, "Server sent close frame");
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "WebSocket read error");
                break;
            }
            None => {
                tracing::info!("WebSocket stream ended");
                break;
            }
        };

        if inbound_tx.send(text).await.is_err() {
            break;
        }
    }
}

struct WsWriter {
    sink: SplitSink<WsStream, Message>,
    cancel: CancellationToken,
    closed: bool,
}

#[async_trait]
impl FrameWriter for WsWriter {
    async fn send(&mut self, payload: &str) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::NotOpen);
        }
        self.sink
            .send(Message::Text(payload.into()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cancel.cancel();
        if let Err(e) = self.sink.close().await {
            tracing::debug!(error = %e, "error closing WebSocket");
        }
    }
}
