//! Client Configuration Settings
//!
//! Configuration types for the market price client, loaded from
//! environment variables and overridden by command-line flags.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::time::Duration;

use crate::domain::session::{Endpoint, Identity};
use crate::infrastructure::protocol::SessionConfig;

/// Default server host.
pub const DEFAULT_HOSTNAME: &str = "192.168.27.15";
/// Default server port.
pub const DEFAULT_PORT: &str = "15000";
/// Default login user.
pub const DEFAULT_USER: &str = "root";
/// Default application id.
pub const DEFAULT_APP_ID: &str = "256";
/// Default instrument.
pub const DEFAULT_INSTRUMENT: &str = "EUR=";

/// Values supplied on the command line. `None` keeps the environment value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    /// Server host.
    pub hostname: Option<String>,
    /// Server port.
    pub port: Option<String>,
    /// Application id.
    pub app_id: Option<String>,
    /// Login user.
    pub user: Option<String>,
    /// Position reported at login.
    pub position: Option<String>,
    /// Instrument to subscribe to.
    pub instrument: Option<String>,
}

/// Complete client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Server host for the first connection.
    pub hostname: String,
    /// Server port, kept across redirects.
    pub port: String,
    /// Login user.
    pub user: String,
    /// Application id.
    pub app_id: String,
    /// Position reported at login.
    pub position: String,
    /// Instrument to subscribe to.
    pub instrument: String,
    /// Bound on each login response wait.
    pub login_timeout: Duration,
    /// Capacity of the session event channel.
    pub event_capacity: usize,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

impl ClientConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a required value is set but empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a required value is set but empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let position = lookup("MARKET_PRICE_POSITION")
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(local_position);

        let config = Self {
            hostname: text("MARKET_PRICE_HOSTNAME", DEFAULT_HOSTNAME),
            port: text("MARKET_PRICE_PORT", DEFAULT_PORT),
            user: text("MARKET_PRICE_USER", DEFAULT_USER),
            app_id: text("MARKET_PRICE_APP_ID", DEFAULT_APP_ID),
            position,
            instrument: text("MARKET_PRICE_INSTRUMENT", DEFAULT_INSTRUMENT),
            login_timeout: parse_duration_secs(
                lookup("MARKET_PRICE_LOGIN_TIMEOUT_SECS"),
                Duration::from_secs(5),
            ),
            event_capacity: parse_or(lookup("MARKET_PRICE_EVENT_CAPACITY"), 1024_usize).max(1),
            metrics_port: parse_or(lookup("MARKET_PRICE_METRICS_PORT"), 0_u16),
        };
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if an override leaves a required value empty.
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        let ConfigOverrides {
            hostname,
            port,
            app_id,
            user,
            position,
            instrument,
        } = overrides;

        if let Some(hostname) = hostname {
            self.hostname = hostname;
        }
        if let Some(port) = port {
            self.port = port;
        }
        if let Some(app_id) = app_id {
            self.app_id = app_id;
        }
        if let Some(user) = user {
            self.user = user;
        }
        if let Some(position) = position {
            self.position = position;
        }
        if let Some(instrument) = instrument {
            self.instrument = instrument;
        }

        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("hostname", &self.hostname),
            ("port", &self.port),
            ("user", &self.user),
            ("instrument", &self.instrument),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::EmptyValue(key.to_string()));
            }
        }
        Ok(())
    }

    /// First server to dial.
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.hostname.clone(), self.port.clone())
    }

    /// Login identity.
    #[must_use]
    pub fn identity(&self) -> Identity {
        Identity::new(
            self.user.clone(),
            self.app_id.clone(),
            self.position.clone(),
        )
    }

    /// Session settings derived from this configuration.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new(self.endpoint(), self.identity(), self.instrument.clone())
            .with_login_timeout(self.login_timeout)
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Value is present but empty.
    #[error("configuration value {0} cannot be empty")]
    EmptyValue(String),
}

/// Address of the local interface that routes outward, or loopback.
///
/// Connecting a UDP socket only selects a route; no packet is sent.
#[must_use]
pub fn local_position() -> String {
    let route_lookup = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(192, 0, 2, 1), 9))?;
        Ok(socket.local_addr()?.ip())
    };

    match route_lookup() {
        Ok(ip) if !ip.is_unspecified() => ip.to_string(),
        _ => Ipv4Addr::LOCALHOST.to_string(),
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn parse_duration_secs(value: Option<String>, default: Duration) -> Duration {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}
