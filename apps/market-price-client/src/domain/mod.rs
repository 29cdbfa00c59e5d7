//! Domain Layer - Core session types and selection logic.
//!
//! This layer contains the session lifecycle types and the least-load
//! selection algorithm with no I/O. All types here are pure Rust with
//! serialization support.

/// Session identity, endpoint, lifecycle state and error taxonomy.
pub mod session;

/// Least-load server selection.
pub mod selection;
