//! Application Layer - Port definitions.
//!
//! This layer contains the port interfaces that define how the session
//! interacts with external systems.

/// Port interfaces for external systems (transport).
pub mod ports;
