//! Prometheus Metrics Module
//!
//! Exposes session metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Messages**: Counts of frames sent and messages received by type
//! - **Session**: Current lifecycle state, redirects
//! - **Errors**: Malformed frames dropped, events dropped for a slow consumer
//!
//! # Integration
//!
//! When a metrics port is configured the exporter serves `/metrics` on
//! it. Without an installed recorder every call here is a no-op.

use std::net::{Ipv4Addr, SocketAddr};

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::domain::session::SessionState;

/// Install the Prometheus exporter listening on `port`.
///
/// A `port` of `0` leaves metrics disabled. Must be called from within a
/// tokio runtime.
///
/// # Errors
///
/// Returns an error if the recorder is already installed or the listener
/// cannot be set up.
pub fn init_metrics(port: u16) -> Result<(), BuildError> {
    if port == 0 {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
        .install()?;

    register_metrics();
    tracing::info!(port, "Prometheus exporter listening");
    Ok(())
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "market_price_messages_sent_total",
        "Total messages sent to the server by type"
    );
    describe_counter!(
        "market_price_messages_received_total",
        "Total messages received from the server by type"
    );
    describe_counter!(
        "market_price_malformed_frames_total",
        "Total inbound frames dropped because they could not be decoded"
    );
    describe_counter!(
        "market_price_redirects_total",
        "Total redirects to a less loaded server"
    );
    describe_counter!(
        "market_price_price_updates_total",
        "Total price updates produced for the consumer"
    );
    describe_counter!(
        "market_price_events_dropped_total",
        "Total session events dropped because the consumer channel was full"
    );
    describe_gauge!(
        "market_price_session_state",
        "Current session state code (0 connecting .. 5 streaming, 6 closed, 7 failed)"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a message sent to the server.
pub fn record_message_sent(kind: &'static str) {
    counter!("market_price_messages_sent_total", "message_type" => kind).increment(1);
}

/// Record a message received from the server.
pub fn record_message_received(kind: &'static str) {
    counter!("market_price_messages_received_total", "message_type" => kind).increment(1);
}

/// Record a dropped inbound frame.
pub fn record_malformed_frame() {
    counter!("market_price_malformed_frames_total").increment(1);
}

/// Record a redirect.
pub fn record_redirect() {
    counter!("market_price_redirects_total").increment(1);
}

/// Record a price update.
pub fn record_price_update() {
    counter!("market_price_price_updates_total").increment(1);
}

/// Record an event the consumer had no room for.
pub fn record_event_dropped(event: &'static str) {
    counter!("market_price_events_dropped_total", "event" => event).increment(1);
}

/// Publish the current session state.
pub fn set_session_state(state: SessionState) {
    gauge!("market_price_session_state").set(f64::from(state.code()));
}

// =============================================================================
// Tests
// =============================================================================
