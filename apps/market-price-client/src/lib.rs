#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Market Price Client - Streaming Quote Subscriber
//!
//! A WebSocket client for a JSON market data service. It logs in, moves
//! to the least-loaded server advertised in the login response, subscribes
//! to one instrument and streams its prices, answering server pings.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Session types and selection logic
//!   - `session`: Endpoint, identity, lifecycle state, errors
//!   - `selection`: Least-load server choice
//!
//! - **Application**: Port definitions
//!   - `ports`: Transport and frame writer interfaces
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `protocol`: Messages, codec, state machine, session driver
//!   - `websocket`: tokio-tungstenite transport
//!   - `config`: Environment and command-line configuration
//!   - `metrics`, `telemetry`: Prometheus and tracing setup
//!
//! # Session Flow
//!
//! ```text
//! connect ─► login ─► login refresh ─► (redirect ─► login ─► login refresh)
//!                                              │
//!                                              ▼
//!                        market price request ─► refresh/update stream
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core session types with no I/O.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::selection::{ServerEntry, least_loaded};
pub use domain::session::{
    Endpoint, ErrorKind, Identity, SessionError, SessionState, Termination,
};

// Ports
pub use application::ports::{Connection, FrameWriter, OpenRequest, Transport, TransportError};

// Protocol
pub use infrastructure::protocol::{
    PriceUpdate, PriceUpdateKind, SessionConfig, SessionDriver, SessionEvent, SessionHandle,
    SessionMachine, SessionStatus,
};

// Transport
pub use infrastructure::websocket::WsTransport;

// Config
pub use infrastructure::config::{ClientConfig, ConfigError, ConfigOverrides};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
