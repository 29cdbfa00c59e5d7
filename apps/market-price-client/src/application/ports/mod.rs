//! Port Interfaces
//!
//! Defines the transport contract the session driver depends on,
//! following the Hexagonal Architecture pattern. Infrastructure adapters
//! (the WebSocket transport, in-memory test transports) implement it.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Transport`: opens a full-duplex message channel to an address
//! - `FrameWriter`: the sending half of an open connection
//!
//! Inbound frames arrive on the `Connection`'s typed channel; the channel
//! ending means the remote side closed.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::session::Endpoint;

/// Errors raised by transport adapters.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Handshake or dial failure.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// Frame could not be written.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Write attempted on a closed connection.
    #[error("connection is not open")]
    NotOpen,
}

/// Parameters for opening a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    /// Server to dial.
    pub endpoint: Endpoint,
    /// Subprotocol identifier offered in the handshake.
    pub subprotocol: String,
    /// Value of the `User-Agent` header.
    pub user_agent: String,
}

impl OpenRequest {
    /// Full address of the streaming service.
    #[must_use]
    pub fn url(&self) -> String {
        self.endpoint.websocket_url()
    }
}

/// Sending half of an open connection.
#[async_trait]
pub trait FrameWriter: Send {
    /// Write one text frame.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::NotOpen` after `close`, or
    /// `TransportError::SendFailed` if the write fails.
    async fn send(&mut self, payload: &str) -> Result<(), TransportError>;

    /// Close the connection. Idempotent.
    async fn close(&mut self);
}

/// An open connection: a writer plus the inbound frame channel.
pub struct Connection {
    /// Server this connection is attached to.
    pub endpoint: Endpoint,
    /// Outbound side.
    pub writer: Box<dyn FrameWriter>,
    /// Inbound text frames; `None` from `recv` signals remote close.
    pub inbound: mpsc::Receiver<String>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// Opens connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection and complete its handshake.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ConnectFailed` if the server cannot be
    /// reached or rejects the handshake.
    async fn open(&self, request: &OpenRequest) -> Result<Connection, TransportError>;
}
