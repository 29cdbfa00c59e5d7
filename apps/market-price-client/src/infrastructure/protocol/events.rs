//! Session Events
//!
//! Everything the session reports to its consumer travels over one typed
//! channel of `SessionEvent`s, in the order it happened. When the channel
//! is full, events other than the final pair are dropped and counted; the
//! session never waits on a slow consumer.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};

use crate::domain::session::{SessionError, SessionState, Termination};

use super::messages::StatusMessage;

/// Which message produced a price update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceUpdateKind {
    /// Full image.
    Refresh,
    /// Incremental change.
    Update,
}

/// Price data for the subscribed instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceUpdate {
    /// Stream id the data arrived on.
    pub stream_id: Option<i64>,
    /// Instrument name.
    pub instrument: String,
    /// Image or change.
    pub kind: PriceUpdateKind,
    /// Raw field values keyed by field name.
    pub fields: Map<String, Value>,
    /// Local receive time.
    pub received_at: DateTime<Utc>,
}

impl PriceUpdate {
    /// Numeric field as an exact decimal.
    ///
    /// Accepts JSON numbers and numeric strings; returns `None` for
    /// missing, blank or non-numeric values.
    #[must_use]
    pub fn decimal(&self, field: &str) -> Option<Decimal> {
        let text = match self.fields.get(field)? {
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.trim().to_string(),
            _ => return None,
        };
        Decimal::from_str(&text)
            .or_else(|_| Decimal::from_scientific(&text))
            .ok()
    }

    /// String field.
    #[must_use]
    pub fn text(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }
}

/// Events emitted by a session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Lifecycle transition.
    StateChanged {
        /// Previous state.
        from: SessionState,
        /// New state.
        to: SessionState,
    },
    /// Price data.
    PriceUpdate(PriceUpdate),
    /// Stream status that did not end the session. A closed market price
    /// stream leaves the session open; stopping is up to the consumer.
    Status(StatusMessage),
    /// A send outside the handshake failed; the session keeps running.
    SendFailed {
        /// State at the time of the send.
        state: SessionState,
        /// Failure.
        error: SessionError,
    },
    /// Final event: the session has ended and its connection is closed.
    Terminated(Termination),
}

impl SessionEvent {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "state_changed",
            Self::PriceUpdate(_) => "price_update",
            Self::Status(_) => "status",
            Self::SendFailed { .. } => "send_failed",
            Self::Terminated(_) => "terminated",
        }
    }
}
