//! Session Driver
//!
//! Owns the single open `Connection` of a session and feeds the
//! `SessionMachine` one inbound message at a time.
//!
//! The login/redirect handshake runs on the caller's task inside
//! [`SessionDriver::start`]; once the market price request is out, the
//! session moves into a spawned pump task that consumes the same inbound
//! channel until stopped or the connection ends. Because one task owns
//! both the machine and the connection, transitions never overlap and a
//! redirect swaps the connection before any further frame is read.
//!
//! Events are queued without waiting, so a consumer that falls behind
//! never delays a `Pong` or a stop request.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{Connection, OpenRequest, Transport};
use crate::domain::session::{Endpoint, Identity, SessionError, SessionState, Termination};
use crate::infrastructure::metrics;

use super::codec::JsonCodec;
use super::events::SessionEvent;
use super::machine::{Action, SessionMachine};
use super::messages::OutboundMessage;

// =============================================================================
// Constants
// =============================================================================

/// WebSocket subprotocol spoken by the server.
pub const SUBPROTOCOL: &str = "tr_json2";

/// Default bound on the wait for a login response.
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Tracing target of the sent/received wire log.
pub const WIRE_LOG_TARGET: &str = "market_price_client::wire";

// =============================================================================
// Configuration
// =============================================================================

/// Everything a session needs to run.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// First server to dial.
    pub endpoint: Endpoint,
    /// Login identity.
    pub identity: Identity,
    /// Instrument to subscribe to.
    pub instrument: String,
    /// Bound on each login response wait.
    pub login_timeout: Duration,
    /// Subprotocol offered in the handshake.
    pub subprotocol: String,
    /// `User-Agent` header value.
    pub user_agent: String,
}

impl SessionConfig {
    /// Create a configuration with default timeout, subprotocol and agent.
    #[must_use]
    pub fn new(endpoint: Endpoint, identity: Identity, instrument: impl Into<String>) -> Self {
        Self {
            endpoint,
            identity,
            instrument: instrument.into(),
            login_timeout: DEFAULT_LOGIN_TIMEOUT,
            subprotocol: SUBPROTOCOL.to_string(),
            user_agent: default_user_agent(),
        }
    }

    /// Override the login timeout.
    #[must_use]
    pub const fn with_login_timeout(mut self, login_timeout: Duration) -> Self {
        self.login_timeout = login_timeout;
        self
    }
}

fn default_user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

// =============================================================================
// Status Snapshot
// =============================================================================

/// Observable session status, updated on every transition.
#[derive(Debug)]
pub struct SessionStatus {
    state: RwLock<SessionState>,
    frames_received: AtomicU64,
    messages_sent: AtomicU64,
    events_dropped: AtomicU64,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStatus {
    /// Status of a session that has not connected yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(SessionState::Connecting),
            frames_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Inbound frames seen, including dropped ones.
    #[must_use]
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Messages written successfully.
    #[must_use]
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    /// Events dropped because the consumer channel was full.
    #[must_use]
    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
        metrics::set_session_state(state);
    }

    fn record_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dropped(&self) -> u64 {
        self.events_dropped.fetch_add(1, Ordering::Relaxed) + 1
    }
}

// =============================================================================
// Session Handle
// =============================================================================

/// Handle to a streaming session running on its pump task.
#[derive(Debug)]
pub struct SessionHandle {
    cancel: CancellationToken,
    status: Arc<SessionStatus>,
    task: JoinHandle<Termination>,
}

impl SessionHandle {
    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.status.state()
    }

    /// Shared status snapshot.
    #[must_use]
    pub fn status(&self) -> Arc<SessionStatus> {
        Arc::clone(&self.status)
    }

    /// Ask the session to stop without waiting for it.
    pub fn request_stop(&self) {
        self.cancel.cancel();
    }

    /// Stop the session and wait for teardown.
    pub async fn stop(self) -> Termination {
        self.cancel.cancel();
        self.join().await
    }

    /// Wait for the session to end on its own.
    pub async fn join(self) -> Termination {
        match self.task.await {
            Ok(termination) => termination,
            Err(e) => {
                tracing::error!(error = %e, "session pump task aborted");
                Termination::failed(self.status.state(), SessionError::Cancelled)
            }
        }
    }
}

// =============================================================================
// Session Driver
// =============================================================================

/// Machine plus the connection it talks over.
struct Session {
    machine: SessionMachine,
    link: Option<Connection>,
    generation: u64,
    login_deadline: Option<Instant>,
}

enum Inbound {
    Frame(String),
    Closed,
    Cancelled,
    TimedOut,
}

/// Runs one session against a transport.
pub struct SessionDriver {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    codec: JsonCodec,
    event_tx: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
    status: Arc<SessionStatus>,
}

impl SessionDriver {
    /// Create a driver. Events go to `event_tx`; cancelling `cancel`
    /// stops the session.
    #[must_use]
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        event_tx: mpsc::Sender<SessionEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            transport,
            codec: JsonCodec::new(),
            event_tx,
            cancel,
            status: Arc::new(SessionStatus::new()),
        }
    }

    /// Shared status snapshot.
    #[must_use]
    pub fn status(&self) -> Arc<SessionStatus> {
        Arc::clone(&self.status)
    }

    /// Connect, log in, follow a redirect if advised, subscribe, then hand
    /// the session to a background pump.
    ///
    /// On failure the connection is closed and `Terminated` is emitted
    /// before this returns.
    ///
    /// # Errors
    ///
    /// Returns the condition that ended the handshake: connect failure,
    /// send failure, login timeout or rejection, malformed login
    /// response, remote close or cancellation.
    pub async fn start(self) -> Result<SessionHandle, SessionError> {
        let mut session = Session {
            machine: SessionMachine::new(
                self.config.identity.clone(),
                self.config.endpoint.clone(),
                self.config.instrument.clone(),
            ),
            link: None,
            generation: 0,
            login_deadline: None,
        };
        self.status.set_state(SessionState::Connecting);

        if let Err(termination) = self.handshake(&mut session).await {
            let cause = termination.cause.clone();
            self.finish(&mut session, termination).await;
            return Err(cause);
        }

        let cancel = self.cancel.clone();
        let status = Arc::clone(&self.status);
        let task = tokio::spawn(self.pump(session));

        Ok(SessionHandle {
            cancel,
            status,
            task,
        })
    }

    async fn handshake(&self, session: &mut Session) -> Result<(), Termination> {
        let actions = self.connect(session).await?;
        self.apply(session, actions).await?;
        while session.machine.state().is_handshake() {
            self.step(session).await?;
        }
        Ok(())
    }

    async fn pump(self, mut session: Session) -> Termination {
        tracing::debug!("session pump started");
        let termination = loop {
            if let Err(termination) = self.step(&mut session).await {
                break termination;
            }
        };
        self.finish(&mut session, termination.clone()).await;
        termination
    }

    /// Wait for and process one inbound frame.
    async fn step(&self, session: &mut Session) -> Result<(), Termination> {
        match self.next_inbound(session).await {
            Inbound::Frame(text) => self.on_frame(session, &text).await,
            Inbound::Closed => {
                tracing::info!("WebSocket closed");
                Err(ended(session.machine.on_remote_closed(), &session.machine))
            }
            Inbound::Cancelled => {
                tracing::info!("session cancelled");
                Err(ended(session.machine.on_cancelled(), &session.machine))
            }
            Inbound::TimedOut => {
                tracing::warn!(
                    timeout_ms = self.config.login_timeout.as_millis(),
                    "login response timed out"
                );
                Err(ended(
                    session.machine.on_timeout(self.config.login_timeout),
                    &session.machine,
                ))
            }
        }
    }

    async fn next_inbound(&self, session: &mut Session) -> Inbound {
        let deadline = session
            .login_deadline
            .filter(|_| session.machine.state().is_awaiting_login());
        let Some(link) = session.link.as_mut() else {
            return Inbound::Closed;
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Inbound::Cancelled,
            inbound = recv_until(&mut link.inbound, deadline) => inbound,
        }
    }

    async fn on_frame(&self, session: &mut Session, text: &str) -> Result<(), Termination> {
        self.status.record_received();

        let value = match self.codec.parse(text) {
            Ok(value) => value,
            Err(e) => {
                tracing::info!(target: WIRE_LOG_TARGET, "RECEIVED:\n{text}");
                tracing::warn!(error = %e, "dropping undecodable frame");
                metrics::record_malformed_frame();
                return Ok(());
            }
        };
        let rendered = self
            .codec
            .render_value(&value)
            .unwrap_or_else(|| text.to_string());
        tracing::info!(target: WIRE_LOG_TARGET, "RECEIVED:\n{rendered}");

        let messages = match self.codec.decode_value(value) {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed frame");
                metrics::record_malformed_frame();
                return Ok(());
            }
        };

        let generation = session.generation;
        for message in messages {
            if self.cancel.is_cancelled() || session.generation != generation {
                break;
            }
            metrics::record_message_received(message.kind());
            let before = session.machine.state();
            let actions = session.machine.on_message(message);
            self.observe(before, session.machine.state());
            self.apply(session, actions).await?;
        }
        Ok(())
    }

    async fn apply(&self, session: &mut Session, actions: Vec<Action>) -> Result<(), Termination> {
        let mut pending = VecDeque::from(actions);
        while let Some(action) = pending.pop_front() {
            match action {
                Action::Send(message) => self.send(session, &message).await?,
                Action::Redirect(endpoint) => {
                    metrics::record_redirect();
                    tracing::info!(endpoint = %endpoint, "Reconnecting to selected server");
                    self.close_link(session).await;
                    let follow_up = self.connect(session).await?;
                    for action in follow_up.into_iter().rev() {
                        pending.push_front(action);
                    }
                }
                Action::Emit(event) => {
                    if matches!(event, SessionEvent::PriceUpdate(_)) {
                        metrics::record_price_update();
                    }
                    self.emit(event);
                }
                Action::Terminate(termination) => return Err(termination),
            }
        }
        Ok(())
    }

    /// Open a connection to the machine's current endpoint and return the
    /// actions its `on_connected` produced.
    async fn connect(&self, session: &mut Session) -> Result<Vec<Action>, Termination> {
        let request = OpenRequest {
            endpoint: session.machine.endpoint().clone(),
            subprotocol: self.config.subprotocol.clone(),
            user_agent: self.config.user_agent.clone(),
        };
        tracing::info!(url = %request.url(), "Connecting to WebSocket");

        let opened = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                return Err(ended(session.machine.on_cancelled(), &session.machine));
            }
            opened = self.transport.open(&request) => opened,
        };

        match opened {
            Ok(connection) => {
                tracing::info!(endpoint = %connection.endpoint, "WebSocket successfully connected");
                session.link = Some(connection);
                session.generation += 1;
                session.login_deadline = Some(Instant::now() + self.config.login_timeout);

                let before = session.machine.state();
                let actions = session.machine.on_connected();
                self.observe(before, session.machine.state());
                Ok(actions)
            }
            Err(e) => {
                tracing::error!(url = %request.url(), error = %e, "WebSocket connection failed");
                Err(ended(
                    session.machine.on_connect_failed(e.to_string()),
                    &session.machine,
                ))
            }
        }
    }

    async fn send(&self, session: &mut Session, message: &OutboundMessage) -> Result<(), Termination> {
        if self.cancel.is_cancelled() {
            tracing::debug!(message_type = message.kind(), "not sending after cancellation");
            return Ok(());
        }

        let state = session.machine.state();
        let result = match (self.codec.encode(message), session.link.as_mut()) {
            (Ok(text), Some(link)) => {
                tracing::info!(target: WIRE_LOG_TARGET, "SENT:\n{}", self.codec.render(&text));
                link.writer
                    .send(&text)
                    .await
                    .map_err(|e| SessionError::SendFailed(e.to_string()))
            }
            (Err(e), _) => Err(SessionError::from(e)),
            (Ok(_), None) => Err(SessionError::SendFailed("no open connection".to_string())),
        };

        match result {
            Ok(()) => {
                self.status.record_sent();
                metrics::record_message_sent(message.kind());
                Ok(())
            }
            // Login and subscription are handshake steps; nothing useful
            // can follow if they are lost.
            Err(error) if !matches!(message, OutboundMessage::Pong(_)) => {
                tracing::error!(message_type = message.kind(), error = %error, "send failed");
                Err(ended(session.machine.fail(error), &session.machine))
            }
            Err(error) => {
                tracing::warn!(message_type = message.kind(), error = %error, "send failed");
                self.emit(SessionEvent::SendFailed { state, error });
                Ok(())
            }
        }
    }

    async fn close_link(&self, session: &mut Session) {
        if let Some(mut link) = session.link.take() {
            tracing::debug!(endpoint = %link.endpoint, "closing connection");
            link.writer.close().await;
            link.inbound.close();
        }
        session.login_deadline = None;
    }

    fn observe(&self, from: SessionState, to: SessionState) {
        if from == to || to.is_terminal() {
            return;
        }
        self.status.set_state(to);
        tracing::info!(%from, %to, "session state changed");
        self.emit(SessionEvent::StateChanged { from, to });
    }

    /// Tear down, then report. The connection is closed before the
    /// consumer sees `Terminated`.
    async fn finish(&self, session: &mut Session, termination: Termination) {
        self.close_link(session).await;
        self.status.set_state(termination.outcome);

        if termination.is_failure() {
            tracing::error!(
                state = %termination.state,
                error = %termination.cause,
                "session failed"
            );
        } else {
            tracing::info!(
                state = %termination.state,
                reason = %termination.cause,
                "session closed"
            );
        }

        self.report_end([
            SessionEvent::StateChanged {
                from: termination.state,
                to: termination.outcome,
            },
            SessionEvent::Terminated(termination),
        ]);
    }

    /// Queue an event without waiting. A full channel drops it.
    fn emit(&self, event: SessionEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                let dropped = self.status.record_dropped();
                metrics::record_event_dropped(event.name());
                if dropped == 1 {
                    tracing::warn!(event = event.name(), "event channel full, dropping events");
                } else {
                    tracing::debug!(event = event.name(), dropped, "event dropped");
                }
            }
            Err(TrySendError::Closed(_)) => tracing::trace!("event receiver dropped"),
        }
    }

    /// Queue the final events. They are never dropped: if the consumer
    /// has no room, a detached task delivers them once it does.
    fn report_end(&self, events: [SessionEvent; 2]) {
        let mut pending = VecDeque::from(events);
        while let Some(event) = pending.pop_front() {
            match self.event_tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    pending.push_front(event);
                    let rest = std::mem::take(&mut pending);
                    let tx = self.event_tx.clone();
                    tracing::debug!(queued = rest.len(), "event channel full, deferring final events");
                    tokio::spawn(async move {
                        for event in rest {
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                    });
                    return;
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::trace!("event receiver dropped");
                    return;
                }
            }
        }
    }
}

async fn recv_until(inbound: &mut mpsc::Receiver<String>, deadline: Option<Instant>) -> Inbound {
    let frame = match deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, inbound.recv()).await {
            Ok(frame) => frame,
            Err(_) => return Inbound::TimedOut,
        },
        None => inbound.recv().await,
    };
    frame.map_or(Inbound::Closed, Inbound::Frame)
}

/// The machine returns `None` only when already terminal; report that as
/// a plain close so every exit path carries a termination.
fn ended(termination: Option<Termination>, machine: &SessionMachine) -> Termination {
    termination.unwrap_or_else(|| Termination::closed(machine.state(), SessionError::Cancelled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::TransportError;

    #[test]
    fn default_config_values() {
        let config = SessionConfig::new(
            Endpoint::new("192.168.27.15", "15000"),
            Identity::new("root", "256", "127.0.0.1"),
            "EUR=",
        );
        assert_eq!(config.login_timeout, DEFAULT_LOGIN_TIMEOUT);
        assert_eq!(config.subprotocol, "tr_json2");
        assert!(config.user_agent.starts_with("market-price-client/"));
    }

    #[test]
    fn login_timeout_override() {
        let config = SessionConfig::new(
            Endpoint::new("h", "1"),
            Identity::new("u", "1", "p"),
            "EUR=",
        )
        .with_login_timeout(Duration::from_millis(250));
        assert_eq!(config.login_timeout, Duration::from_millis(250));
    }

    #[test]
    fn status_starts_connecting() {
        let status = SessionStatus::new();
        assert_eq!(status.state(), SessionState::Connecting);
        assert_eq!(status.frames_received(), 0);
        assert_eq!(status.messages_sent(), 0);
        assert_eq!(status.events_dropped(), 0);
    }

    struct Unreachable;

    #[async_trait::async_trait]
    impl Transport for Unreachable {
        async fn open(&self, _request: &OpenRequest) -> Result<Connection, TransportError> {
            Err(TransportError::ConnectFailed("unreachable".to_string()))
        }
    }

    fn driver_with_capacity(capacity: usize) -> (SessionDriver, mpsc::Receiver<SessionEvent>) {
        let (event_tx, events) = mpsc::channel(capacity);
        let config = SessionConfig::new(
            Endpoint::new("h1", "15000"),
            Identity::new("root", "256", "10.0.0.7"),
            "EUR=",
        );
        let driver = SessionDriver::new(
            config,
            Arc::new(Unreachable),
            event_tx,
            CancellationToken::new(),
        );
        (driver, events)
    }

    #[tokio::test]
    async fn full_channel_drops_events_but_keeps_final_ones() {
        let (driver, mut events) = driver_with_capacity(1);
        let status = driver.status();

        driver.emit(SessionEvent::StateChanged {
            from: SessionState::Connecting,
            to: SessionState::AwaitingLoginForSelection,
        });
        driver.emit(SessionEvent::StateChanged {
            from: SessionState::AwaitingLoginForSelection,
            to: SessionState::Subscribing,
        });
        assert_eq!(status.events_dropped(), 1);

        driver.report_end([
            SessionEvent::StateChanged {
                from: SessionState::Subscribing,
                to: SessionState::Closed,
            },
            SessionEvent::Terminated(Termination::closed(
                SessionState::Subscribing,
                SessionError::Cancelled,
            )),
        ]);
        drop(driver);

        let mut received = Vec::new();
        while let Some(event) = events.recv().await {
            received.push(event);
        }
        assert_eq!(received.len(), 3);
        assert!(matches!(
            received[1],
            SessionEvent::StateChanged { to: SessionState::Closed, .. }
        ));
        assert!(matches!(received.last(), Some(SessionEvent::Terminated(_))));
        assert_eq!(status.events_dropped(), 1);
    }

    #[tokio::test]
    async fn recv_until_reports_close_and_timeout() {
        let (tx, mut rx) = mpsc::channel::<String>(1);
        drop(tx);
        assert!(matches!(recv_until(&mut rx, None).await, Inbound::Closed));

        let (_tx, mut rx) = mpsc::channel::<String>(1);
        let deadline = Instant::now() + Duration::from_millis(10);
        assert!(matches!(
            recv_until(&mut rx, Some(deadline)).await,
            Inbound::TimedOut
        ));
    }
}
