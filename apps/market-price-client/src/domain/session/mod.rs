//! Session Types
//!
//! Identity, endpoint and lifecycle state of a streaming price session,
//! plus the error taxonomy shared by every layer that drives a session.
//!
//! # Lifecycle
//!
//! ```text
//! Connecting ─► AwaitingLoginForSelection ─┬─► Redirecting ─► AwaitingLoginForStream ─┐
//!                                          │                                          ▼
//!                                          └────────────────────────────────────► Subscribing ─► Streaming
//!
//! any state ─► Closed (stop request, remote close)
//! any state ─► Failed (unrecoverable protocol or transport error)
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Endpoint
// =============================================================================

/// Path of the streaming service on every server in the cluster.
pub const WEBSOCKET_PATH: &str = "/WebSocket";

/// A server address. Immutable once chosen.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    host: String,
    port: String,
}

impl Endpoint {
    /// Create an endpoint from a host and port.
    #[must_use]
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
        }
    }

    /// Host name or address.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port, kept as configured.
    #[must_use]
    pub fn port(&self) -> &str {
        &self.port
    }

    /// WebSocket URL of the streaming service on this endpoint.
    #[must_use]
    pub fn websocket_url(&self) -> String {
        format!("ws://{}:{}{WEBSOCKET_PATH}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// =============================================================================
// Identity
// =============================================================================

/// Who the session logs in as. Immutable for the session lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// User name sent as the login key name.
    pub user: String,
    /// Application id assigned by the market data administrator.
    pub application_id: String,
    /// Resolvable address of the originating host.
    pub position: String,
}

impl Identity {
    /// Create an identity.
    #[must_use]
    pub fn new(
        user: impl Into<String>,
        application_id: impl Into<String>,
        position: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            application_id: application_id.into(),
            position: position.into(),
        }
    }
}

// =============================================================================
// Session State
// =============================================================================

/// Current lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SessionState {
    /// Opening the first connection.
    #[default]
    Connecting,
    /// Login sent on the first connection, waiting for the response
    /// carrying the cluster's connection config.
    AwaitingLoginForSelection,
    /// Swapping the connection for the least-loaded server.
    Redirecting,
    /// Login sent on the redirected connection.
    AwaitingLoginForStream,
    /// Market price request sent, waiting for the first image.
    Subscribing,
    /// Steady state.
    Streaming,
    /// Ended cleanly.
    Closed,
    /// Ended on an unrecoverable error.
    Failed,
}

impl SessionState {
    /// `Closed` and `Failed` accept no further sends or inbound events.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// States in which a login response is outstanding.
    #[must_use]
    pub const fn is_awaiting_login(&self) -> bool {
        matches!(
            self,
            Self::AwaitingLoginForSelection | Self::AwaitingLoginForStream
        )
    }

    /// States that belong to the request/response handshake.
    #[must_use]
    pub const fn is_handshake(&self) -> bool {
        matches!(
            self,
            Self::Connecting
                | Self::AwaitingLoginForSelection
                | Self::Redirecting
                | Self::AwaitingLoginForStream
        )
    }

    /// Stable numeric code, used for the state gauge.
    #[must_use]
    pub const fn code(&self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::AwaitingLoginForSelection => 1,
            Self::Redirecting => 2,
            Self::AwaitingLoginForStream => 3,
            Self::Subscribing => 4,
            Self::Streaming => 5,
            Self::Closed => 6,
            Self::Failed => 7,
        }
    }

    /// State name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::AwaitingLoginForSelection => "awaiting_login_for_selection",
            Self::Redirecting => "redirecting",
            Self::AwaitingLoginForStream => "awaiting_login_for_stream",
            Self::Subscribing => "subscribing",
            Self::Streaming => "streaming",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Classification of session errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A connection could not be opened.
    ConnectFailed,
    /// A frame could not be sent.
    SendFailed,
    /// A frame could not be decoded or was structurally invalid.
    Malformed,
    /// The login response did not arrive in time.
    Timeout,
    /// The server closed the connection.
    RemoteClosed,
    /// The session was stopped by its owner.
    Cancelled,
    /// The server refused the login.
    LoginRejected,
}

/// Errors that end or interrupt a session.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// Opening a connection failed.
    #[error("connect to {endpoint} failed: {reason}")]
    ConnectFailed {
        /// Endpoint that was dialled.
        endpoint: Endpoint,
        /// Transport failure description.
        reason: String,
    },

    /// Sending a frame failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Decode failure or structurally invalid message.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// No login response within the bound.
    #[error("no login response within {0:?}")]
    Timeout(Duration),

    /// Server closed the connection.
    #[error("connection closed by remote")]
    RemoteClosed,

    /// Stop requested.
    #[error("session cancelled")]
    Cancelled,

    /// Login refused by the server.
    #[error("login rejected: {0}")]
    LoginRejected(String),
}

impl SessionError {
    /// Error classification.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectFailed { .. } => ErrorKind::ConnectFailed,
            Self::SendFailed(_) => ErrorKind::SendFailed,
            Self::Malformed(_) => ErrorKind::Malformed,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::RemoteClosed => ErrorKind::RemoteClosed,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::LoginRejected(_) => ErrorKind::LoginRejected,
        }
    }
}

// =============================================================================
// Termination
// =============================================================================

/// How a session ended. Delivered exactly once, after teardown.
#[derive(Debug, Clone)]
pub struct Termination {
    /// State the session was in when the terminating condition occurred.
    pub state: SessionState,
    /// Terminal state reached: `Closed` or `Failed`.
    pub outcome: SessionState,
    /// Triggering condition.
    pub cause: SessionError,
}

impl Termination {
    /// Clean end (stop request or remote close).
    #[must_use]
    pub const fn closed(state: SessionState, cause: SessionError) -> Self {
        Self {
            state,
            outcome: SessionState::Closed,
            cause,
        }
    }

    /// Failure.
    #[must_use]
    pub const fn failed(state: SessionState, cause: SessionError) -> Self {
        Self {
            state,
            outcome: SessionState::Failed,
            cause,
        }
    }

    /// Whether the session ended in `Failed`.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self.outcome, SessionState::Failed)
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "session {} while {}: {}",
            self.outcome, self.state, self.cause
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_websocket_url() {
        let endpoint = Endpoint::new("192.168.27.15", "15000");
        assert_eq!(endpoint.websocket_url(), "ws://192.168.27.15:15000/WebSocket");
        assert_eq!(endpoint.to_string(), "192.168.27.15:15000");
    }

    #[test]
    fn terminal_states() {
        assert!(SessionState::Closed.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(!SessionState::Streaming.is_terminal());
        assert!(!SessionState::Connecting.is_terminal());
    }

    #[test]
    fn handshake_states() {
        assert!(SessionState::Connecting.is_handshake());
        assert!(SessionState::Redirecting.is_handshake());
        assert!(SessionState::AwaitingLoginForStream.is_awaiting_login());
        assert!(!SessionState::Subscribing.is_handshake());
        assert!(!SessionState::Streaming.is_awaiting_login());
    }

    #[test]
    fn error_kinds() {
        let connect = SessionError::ConnectFailed {
            endpoint: Endpoint::new("h1", "15000"),
            reason: "refused".to_string(),
        };
        assert_eq!(connect.kind(), ErrorKind::ConnectFailed);
        assert!(connect.to_string().contains("h1:15000"));
        assert_eq!(
            SessionError::Timeout(Duration::from_secs(5)).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(SessionError::RemoteClosed.kind(), ErrorKind::RemoteClosed);
    }

    #[test]
    fn termination_display_names_state_and_cause() {
        let termination =
            Termination::failed(SessionState::AwaitingLoginForSelection, SessionError::Cancelled);
        assert!(termination.is_failure());
        let text = termination.to_string();
        assert!(text.contains("failed"));
        assert!(text.contains("awaiting_login_for_selection"));
    }
}
