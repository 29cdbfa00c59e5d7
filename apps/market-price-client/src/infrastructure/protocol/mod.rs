//! Streaming Protocol
//!
//! JSON message types, the frame codec, server selection, the session
//! state machine and the driver that runs it over a transport.
//!
//! # Session Flow
//!
//! 1. Connect and send a login request asking for the connection config
//! 2. Pick the least-loaded server from the login refresh
//! 3. Redirect there and log in again (skipped if already there)
//! 4. Send the market price request
//! 5. Deliver refreshes and updates, answering every `Ping` with a `Pong`

pub mod codec;
pub mod driver;
pub mod events;
pub mod machine;
pub mod messages;
pub mod selector;

pub use codec::{CodecError, JsonCodec};
pub use driver::{
    DEFAULT_LOGIN_TIMEOUT, SUBPROTOCOL, SessionConfig, SessionDriver, SessionHandle,
    SessionStatus, WIRE_LOG_TARGET,
};
pub use events::{PriceUpdate, PriceUpdateKind, SessionEvent};
pub use machine::{Action, SessionMachine};
pub use messages::{InboundMessage, OutboundMessage, StatusMessage};
pub use selector::{SelectionError, select_least_loaded};
