//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, the streaming protocol, and the
//! ambient configuration, logging and metrics setup.

/// Streaming protocol: messages, codec, state machine and driver.
pub mod protocol;

/// WebSocket transport adapter.
pub mod websocket;

/// Configuration loading.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing subscriber and OpenTelemetry setup.
pub mod telemetry;
