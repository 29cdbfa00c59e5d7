//! Market Price Client Binary
//!
//! Connects, logs in, moves to the least-loaded server and streams prices
//! for one instrument until interrupted.
//!
//! # Usage
//!
//! ```bash
//! market-price-client --hostname 10.0.0.5 --port 15000 --instrument 'EUR='
//! ```
//!
//! # Environment Variables
//!
//! - `MARKET_PRICE_HOSTNAME`: First server to dial (default: 192.168.27.15)
//! - `MARKET_PRICE_PORT`: Server port (default: 15000)
//! - `MARKET_PRICE_USER`: Login user (default: root)
//! - `MARKET_PRICE_APP_ID`: Application id (default: 256)
//! - `MARKET_PRICE_POSITION`: Reported position (default: local address)
//! - `MARKET_PRICE_INSTRUMENT`: Instrument (default: EUR=)
//! - `MARKET_PRICE_LOGIN_TIMEOUT_SECS`: Login response bound (default: 5)
//! - `MARKET_PRICE_EVENT_CAPACITY`: Event channel size (default: 1024)
//! - `MARKET_PRICE_METRICS_PORT`: Prometheus port, 0 disables (default: 0)
//! - `OTEL_ENABLED`: Export traces over OTLP (default: false)
//! - `RUST_LOG`: Log filter (default: market_price_client=info)
//!
//! Command-line flags override the environment.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use market_price_client::infrastructure::telemetry;
use market_price_client::{
    ClientConfig, ConfigOverrides, ErrorKind, PriceUpdateKind, SessionDriver, SessionEvent,
    WsTransport, init_metrics,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Streams market prices for one instrument.
#[derive(Debug, Parser)]
#[command(name = "market-price-client", version, about)]
struct Cli {
    /// Hostname of the first server to connect to.
    #[arg(long)]
    hostname: Option<String>,

    /// Port of the streaming service.
    #[arg(long)]
    port: Option<String>,

    /// Application id.
    #[arg(long = "app_id")]
    app_id: Option<String>,

    /// Login user name.
    #[arg(long)]
    user: Option<String>,

    /// Position reported at login.
    #[arg(long)]
    position: Option<String>,

    /// Instrument to subscribe to.
    #[arg(long)]
    instrument: Option<String>,
}

impl From<Cli> for ConfigOverrides {
    fn from(cli: Cli) -> Self {
        Self {
            hostname: cli.hostname,
            port: cli.port,
            app_id: cli.app_id,
            user: cli.user,
            position: cli.position,
            instrument: cli.instrument,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting Market Price Client");

    let config = ClientConfig::from_env()?.with_overrides(cli.into())?;
    log_config(&config);

    init_metrics(config.metrics_port).context("failed to start metrics exporter")?;

    let shutdown_token = CancellationToken::new();
    let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(config.event_capacity);

    let driver = SessionDriver::new(
        config.session_config(),
        Arc::new(WsTransport::new()),
        event_tx,
        shutdown_token.clone(),
    );

    let event_handle = tokio::spawn(handle_session_events(event_rx));
    let signal_handle = tokio::spawn(await_shutdown(shutdown_token.clone()));

    let outcome = match driver.start().await {
        Ok(session) => {
            tracing::info!(state = %session.state(), "Streaming started");
            let termination = session.join().await;
            if termination.is_failure() {
                Err(termination.cause)
            } else {
                Ok(())
            }
        }
        Err(cause) => Err(cause),
    };

    signal_handle.abort();
    if let Err(e) = event_handle.await {
        tracing::warn!(error = %e, "event handler task failed");
    }

    match outcome {
        Ok(()) => {
            tracing::info!("Market Price Client stopped");
            Ok(())
        }
        Err(cause) if cause.kind() == ErrorKind::Cancelled => {
            tracing::info!("Market Price Client stopped before streaming");
            Ok(())
        }
        Err(cause) => Err(anyhow::Error::new(cause).context("session failed")),
    }
}

/// Log everything the session reports until it terminates.
async fn handle_session_events(mut rx: mpsc::Receiver<SessionEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            SessionEvent::PriceUpdate(update) => {
                let kind = match update.kind {
                    PriceUpdateKind::Refresh => "refresh",
                    PriceUpdateKind::Update => "update",
                };
                tracing::info!(
                    instrument = %update.instrument,
                    kind,
                    bid = ?update.decimal("BID"),
                    ask = ?update.decimal("ASK"),
                    fields = update.fields.len(),
                    "Price update"
                );
            }
            SessionEvent::StateChanged { from, to } => {
                tracing::debug!(%from, %to, "Session state changed");
            }
            SessionEvent::Status(status) => {
                tracing::warn!(
                    stream_id = ?status.id,
                    reason = %status.reason(),
                    "Stream status"
                );
            }
            SessionEvent::SendFailed { state, error } => {
                tracing::warn!(%state, error = %error, "Send failed");
            }
            SessionEvent::Terminated(termination) => {
                tracing::info!(%termination, "Session terminated");
                break;
            }
        }
    }
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ClientConfig) {
    tracing::info!(
        hostname = %config.hostname,
        port = %config.port,
        user = %config.user,
        app_id = %config.app_id,
        position = %config.position,
        instrument = %config.instrument,
        "Configuration loaded"
    );
    tracing::debug!(
        login_timeout_ms = config.login_timeout.as_millis(),
        event_capacity = config.event_capacity,
        metrics_port = config.metrics_port,
        url = %config.endpoint().websocket_url(),
        "Session settings"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, stopping session");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, stopping session");
        }
    }

    shutdown_token.cancel();
}
