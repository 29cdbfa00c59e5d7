//! Server Selector
//!
//! Reads the connection config out of a login refresh and picks the
//! least-loaded server. The redirect keeps the originally configured port.

use thiserror::Error;

use crate::domain::selection::{ServerEntry, least_loaded};
use crate::domain::session::{Endpoint, SessionError};

use super::messages::{ConnectionConfig, ItemMessage};

/// Key of the connection config inside the login refresh elements.
pub const CONNECTION_CONFIG_KEY: &str = "ConnectionConfig";

/// Selection errors.
#[derive(Debug, Error)]
pub enum SelectionError {
    /// `ConnectionConfig` present but not shaped as expected.
    #[error("malformed connection config: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl From<SelectionError> for SessionError {
    fn from(err: SelectionError) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// Servers advertised by a login refresh.
///
/// Returns `Ok(None)` when the refresh carries no `ConnectionConfig`.
///
/// # Errors
///
/// Returns `SelectionError::Malformed` if `ConnectionConfig` is present
/// but lacks `Data.Entries`, or an entry lacks `Hostname` or a
/// non-negative integer `LoadFactor`.
pub fn advertised_servers(
    response: &ItemMessage,
) -> Result<Option<Vec<ServerEntry>>, SelectionError> {
    let Some(raw) = response
        .elements
        .as_ref()
        .and_then(|elements| elements.get(CONNECTION_CONFIG_KEY))
    else {
        return Ok(None);
    };

    let config: ConnectionConfig = serde_json::from_value(raw.clone())?;
    Ok(Some(
        config
            .data
            .entries
            .into_iter()
            .map(|entry| entry.elements)
            .collect(),
    ))
}

/// Choose the least-loaded server from a login refresh.
///
/// Returns `Ok(None)` ("keep the current endpoint") when there is no
/// connection config or its entry list is empty. Otherwise returns the
/// winning hostname paired with `port`.
///
/// # Errors
///
/// See [`advertised_servers`].
pub fn select_least_loaded(
    response: &ItemMessage,
    port: &str,
) -> Result<Option<Endpoint>, SelectionError> {
    let Some(servers) = advertised_servers(response)? else {
        return Ok(None);
    };

    Ok(least_loaded(&servers).map(|entry| Endpoint::new(entry.hostname.clone(), port)))
}
