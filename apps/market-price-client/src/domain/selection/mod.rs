//! Least-Load Server Selection
//!
//! Servers in a cluster report a load factor in the login response.
//! Lower is preferred; among equal minima the first one listed wins so
//! that the choice is stable for identical input.

use serde::{Deserialize, Serialize};

/// One server advertised in a connection config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerEntry {
    /// Host name clients should connect to.
    pub hostname: String,
    /// Current utilisation; lower is better.
    pub load_factor: u64,
}

impl ServerEntry {
    /// Create an entry.
    #[must_use]
    pub fn new(hostname: impl Into<String>, load_factor: u64) -> Self {
        Self {
            hostname: hostname.into(),
            load_factor,
        }
    }
}

/// Return the entry with the strictly smallest load factor.
///
/// Scans once; an entry replaces the current pick only when its load
/// factor is strictly lower, so ties keep the earliest entry.
#[must_use]
pub fn least_loaded(entries: &[ServerEntry]) -> Option<&ServerEntry> {
    let mut best: Option<&ServerEntry> = None;
    for entry in entries {
        match best {
            Some(current) if entry.load_factor >= current.load_factor => {}
            _ => best = Some(entry),
        }
    }
    best
}
