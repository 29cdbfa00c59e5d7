//! Session State Machine
//!
//! Drives the protocol lifecycle of one session without doing any I/O.
//! Each input (connection opened, message received, timeout, stop, remote
//! close) updates the state and returns the `Action`s the driver must
//! carry out, in order.
//!
//! # Handshake
//!
//! 1. Connection opened: send login, wait for the login refresh
//! 2. Login refresh: pick the least-loaded server from its connection
//!    config; redirect there, or subscribe right away if the current
//!    server is the pick (or nothing was advertised)
//! 3. After a redirect: send login again, subscribe on its refresh
//! 4. First refresh on the item stream: streaming

use std::time::Duration;

use chrono::Utc;

use crate::domain::session::{Endpoint, Identity, SessionError, SessionState, Termination};

use super::events::{PriceUpdate, PriceUpdateKind, SessionEvent};
use super::messages::{
    FIRST_ITEM_STREAM_ID, InboundMessage, ItemMessage, LoginRequest, MarketPriceRequest,
    OutboundMessage, PongMessage, StatusMessage,
};
use super::selector::select_least_loaded;

/// Work the driver must perform after a transition.
#[derive(Debug, Clone)]
pub enum Action {
    /// Send a message on the current connection.
    Send(OutboundMessage),
    /// Close the current connection and open one to this endpoint.
    Redirect(Endpoint),
    /// Deliver an event to the consumer.
    Emit(SessionEvent),
    /// Tear down and report the end of the session.
    Terminate(Termination),
}

/// Protocol state machine for one session.
///
/// # Example
///
/// ```ignore
/// let mut machine = SessionMachine::new(identity, Endpoint::new("ads1", "15000"), "EUR=");
///
/// // Connection opened
/// let actions = machine.on_connected(); // [Send(Login)]
///
/// // Login refresh advertising a less loaded server
/// let actions = machine.on_message(login_refresh); // [Redirect(ads2:15000)]
/// ```
#[derive(Debug)]
pub struct SessionMachine {
    identity: Identity,
    instrument: String,
    endpoint: Endpoint,
    state: SessionState,
    next_stream_id: i64,
    item_stream_id: Option<i64>,
    item_stream_closed: bool,
}

impl SessionMachine {
    /// Create a machine in `Connecting` for `endpoint`.
    #[must_use]
    pub fn new(identity: Identity, endpoint: Endpoint, instrument: impl Into<String>) -> Self {
        Self {
            identity,
            instrument: instrument.into(),
            endpoint,
            state: SessionState::Connecting,
            next_stream_id: FIRST_ITEM_STREAM_ID,
            item_stream_id: None,
            item_stream_closed: false,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Endpoint of the current (or pending) connection.
    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Subscribed instrument.
    #[must_use]
    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    /// Stream id of the market price request, once sent.
    #[must_use]
    pub const fn item_stream_id(&self) -> Option<i64> {
        self.item_stream_id
    }

    /// Whether the server closed the market price stream. The session
    /// stays open; no further prices arrive on it.
    #[must_use]
    pub const fn item_stream_closed(&self) -> bool {
        self.item_stream_closed
    }

    /// The connection for the current endpoint is open.
    pub fn on_connected(&mut self) -> Vec<Action> {
        let next = match self.state {
            SessionState::Connecting => SessionState::AwaitingLoginForSelection,
            SessionState::Redirecting => SessionState::AwaitingLoginForStream,
            state => {
                tracing::warn!(%state, "connection opened in unexpected state");
                return Vec::new();
            }
        };
        self.state = next;
        vec![Action::Send(OutboundMessage::Login(LoginRequest::new(
            &self.identity,
        )))]
    }

    /// A decoded inbound message, in arrival order.
    pub fn on_message(&mut self, message: InboundMessage) -> Vec<Action> {
        if self.state.is_terminal() {
            return Vec::new();
        }

        match message {
            InboundMessage::Ping => vec![Action::Send(OutboundMessage::Pong(
                PongMessage::default(),
            ))],
            InboundMessage::Refresh(refresh) => self.on_refresh(refresh),
            InboundMessage::Update(update) => self.on_update(update),
            InboundMessage::Status(status) => self.on_status(status),
            InboundMessage::Other => {
                tracing::debug!(state = %self.state, "ignoring unhandled message type");
                Vec::new()
            }
        }
    }

    fn on_refresh(&mut self, refresh: ItemMessage) -> Vec<Action> {
        match self.state {
            SessionState::AwaitingLoginForSelection if refresh.is_login() => {
                self.select_server(&refresh)
            }
            SessionState::AwaitingLoginForStream if refresh.is_login() => self.subscribe(),
            SessionState::Subscribing => {
                self.state = SessionState::Streaming;
                if refresh.is_login() {
                    Vec::new()
                } else {
                    vec![self.price_update(refresh, PriceUpdateKind::Refresh)]
                }
            }
            SessionState::Streaming if !refresh.is_login() => {
                vec![self.price_update(refresh, PriceUpdateKind::Refresh)]
            }
            state => {
                tracing::debug!(
                    %state,
                    login = refresh.is_login(),
                    "ignoring refresh"
                );
                Vec::new()
            }
        }
    }

    fn on_update(&mut self, update: ItemMessage) -> Vec<Action> {
        if self.state == SessionState::Streaming && !update.is_login() {
            vec![self.price_update(update, PriceUpdateKind::Update)]
        } else {
            tracing::debug!(state = %self.state, "ignoring update");
            Vec::new()
        }
    }

    fn on_status(&mut self, status: StatusMessage) -> Vec<Action> {
        if status.closes_login() {
            let cause = SessionError::LoginRejected(status.reason());
            return self.fail(cause).map(Action::Terminate).into_iter().collect();
        }
        if status.closes_stream() && status.id.is_some() && status.id == self.item_stream_id {
            tracing::warn!(
                state = %self.state,
                instrument = %self.instrument,
                reason = %status.reason(),
                "market price stream closed by server"
            );
            self.item_stream_closed = true;
        }
        vec![Action::Emit(SessionEvent::Status(status))]
    }

    fn select_server(&mut self, refresh: &ItemMessage) -> Vec<Action> {
        match select_least_loaded(refresh, self.endpoint.port()) {
            Ok(Some(target)) if target.host() != self.endpoint.host() => {
                tracing::info!(from = %self.endpoint, to = %target, "redirecting to least-loaded server");
                self.state = SessionState::Redirecting;
                self.endpoint = target.clone();
                vec![Action::Redirect(target)]
            }
            Ok(pick) => {
                tracing::info!(
                    endpoint = %self.endpoint,
                    advertised = pick.is_some(),
                    "staying on current server"
                );
                self.subscribe()
            }
            Err(e) => {
                tracing::warn!(error = %e, "unusable connection config in login response");
                self.fail(e.into()).map(Action::Terminate).into_iter().collect()
            }
        }
    }

    fn subscribe(&mut self) -> Vec<Action> {
        let id = self.next_stream_id;
        self.next_stream_id += 1;
        self.item_stream_id = Some(id);
        self.state = SessionState::Subscribing;
        vec![Action::Send(OutboundMessage::MarketPrice(
            MarketPriceRequest::new(id, self.instrument.clone()),
        ))]
    }

    fn price_update(&self, item: ItemMessage, kind: PriceUpdateKind) -> Action {
        let instrument = item
            .name()
            .map_or_else(|| self.instrument.clone(), str::to_string);
        Action::Emit(SessionEvent::PriceUpdate(PriceUpdate {
            stream_id: item.id,
            instrument,
            kind,
            fields: item.fields.unwrap_or_default(),
            received_at: Utc::now(),
        }))
    }

    /// Opening a connection failed.
    pub fn on_connect_failed(&mut self, reason: impl Into<String>) -> Option<Termination> {
        let cause = SessionError::ConnectFailed {
            endpoint: self.endpoint.clone(),
            reason: reason.into(),
        };
        self.fail(cause)
    }

    /// No login response arrived within `after`.
    pub fn on_timeout(&mut self, after: Duration) -> Option<Termination> {
        self.fail(SessionError::Timeout(after))
    }

    /// The server closed the connection.
    pub fn on_remote_closed(&mut self) -> Option<Termination> {
        if self.state.is_handshake() {
            self.fail(SessionError::RemoteClosed)
        } else {
            self.close(SessionError::RemoteClosed)
        }
    }

    /// The owner asked the session to stop.
    pub fn on_cancelled(&mut self) -> Option<Termination> {
        self.close(SessionError::Cancelled)
    }

    /// Enter `Failed`. Returns `None` if already terminal.
    pub fn fail(&mut self, cause: SessionError) -> Option<Termination> {
        self.terminate(SessionState::Failed, cause)
    }

    /// Enter `Closed`. Returns `None` if already terminal.
    pub fn close(&mut self, cause: SessionError) -> Option<Termination> {
        self.terminate(SessionState::Closed, cause)
    }

    fn terminate(&mut self, outcome: SessionState, cause: SessionError) -> Option<Termination> {
        if self.state.is_terminal() {
            return None;
        }
        let termination = Termination {
            state: self.state,
            outcome,
            cause,
        };
        self.state = outcome;
        Some(termination)
    }
}
