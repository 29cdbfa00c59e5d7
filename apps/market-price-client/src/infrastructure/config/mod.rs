//! Configuration Module
//!
//! Configuration loading for the market price client.

mod settings;

pub use settings::{
    ClientConfig, ConfigError, ConfigOverrides, DEFAULT_APP_ID, DEFAULT_HOSTNAME,
    DEFAULT_INSTRUMENT, DEFAULT_PORT, DEFAULT_USER, local_position,
};
