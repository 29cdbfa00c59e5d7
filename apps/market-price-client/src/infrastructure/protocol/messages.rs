//! Streaming Protocol Message Types
//!
//! Wire format types for the JSON streaming protocol (subprotocol
//! `tr_json2`). Keys are PascalCase on the wire; every frame from the
//! server is a JSON array of message objects discriminated by `Type`.
//!
//! # Message Types
//!
//! ## Outbound
//! - `LoginRequest`: opens the Login stream, asks for the connection config
//! - `MarketPriceRequest`: opens an item stream for one instrument
//! - `PongMessage`: keep-alive answer
//!
//! ## Inbound
//! - `Refresh`: full image; on the Login domain it confirms the login
//! - `Update`: incremental change to an item stream
//! - `Status`: stream state change (closed, suspect, ...)
//! - `Ping`: keep-alive check from the server

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::session::Identity;

/// Domain name of the login stream.
pub const LOGIN_DOMAIN: &str = "Login";

/// Stream id used by the login request.
pub const LOGIN_STREAM_ID: i64 = 1;

/// First stream id handed out to item requests.
pub const FIRST_ITEM_STREAM_ID: i64 = LOGIN_STREAM_ID + 1;

// =============================================================================
// Outbound Messages
// =============================================================================

/// Login request.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "Domain": "Login",
///   "ID": 1,
///   "Key": {
///     "Elements": {"ApplicationId": "256", "DownloadConnectionConfig": 1, "Position": "10.0.0.7"},
///     "Name": "root"
///   }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoginRequest {
    /// Stream id.
    #[serde(rename = "ID")]
    pub id: i64,

    /// Always `Login`.
    pub domain: String,

    /// User and login attributes.
    pub key: LoginKey,
}

/// Key of a login request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoginKey {
    /// User name.
    pub name: String,

    /// Login attributes.
    pub elements: LoginElements,
}

/// Attributes of a login request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoginElements {
    /// Application id.
    pub application_id: String,

    /// Originating host address.
    pub position: String,

    /// `1` asks the server to include the cluster's connection config in
    /// the login refresh.
    pub download_connection_config: u8,
}

impl LoginRequest {
    /// Build the login request for an identity.
    #[must_use]
    pub fn new(identity: &Identity) -> Self {
        Self {
            id: LOGIN_STREAM_ID,
            domain: LOGIN_DOMAIN.to_string(),
            key: LoginKey {
                name: identity.user.clone(),
                elements: LoginElements {
                    application_id: identity.application_id.clone(),
                    position: identity.position.clone(),
                    download_connection_config: 1,
                },
            },
        }
    }
}

/// Market price item request.
///
/// # Wire Format (JSON)
/// ```json
/// {"ID": 2, "Key": {"Name": "EUR="}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MarketPriceRequest {
    /// Stream id, unique within the session.
    #[serde(rename = "ID")]
    pub id: i64,

    /// Instrument.
    pub key: ItemKey,
}

/// Key naming a single instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ItemKey {
    /// Instrument name (RIC).
    pub name: String,
}

impl MarketPriceRequest {
    /// Request `instrument` on stream `id`.
    #[must_use]
    pub fn new(id: i64, instrument: impl Into<String>) -> Self {
        Self {
            id,
            key: ItemKey {
                name: instrument.into(),
            },
        }
    }
}

/// Keep-alive answer: `{"Type": "Pong"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PongMessage {
    /// Always `Pong`.
    #[serde(rename = "Type")]
    pub msg_type: String,
}

impl Default for PongMessage {
    fn default() -> Self {
        Self {
            msg_type: "Pong".to_string(),
        }
    }
}

/// Any message the client sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    /// Login request.
    Login(LoginRequest),
    /// Item request.
    MarketPrice(MarketPriceRequest),
    /// Keep-alive answer.
    Pong(PongMessage),
}

impl OutboundMessage {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Login(_) => "login",
            Self::MarketPrice(_) => "market_price",
            Self::Pong(_) => "pong",
        }
    }
}

// =============================================================================
// Inbound Messages
// =============================================================================

/// Any message the server sends, discriminated by `Type`.
///
/// Types this client does not act on decode to `Other`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Type")]
pub enum InboundMessage {
    /// Full image.
    Refresh(ItemMessage),
    /// Incremental change.
    Update(ItemMessage),
    /// Stream state change.
    Status(StatusMessage),
    /// Keep-alive check.
    Ping,
    /// Anything else.
    #[serde(other)]
    Other,
}

impl InboundMessage {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Refresh(_) => "refresh",
            Self::Update(_) => "update",
            Self::Status(_) => "status",
            Self::Ping => "ping",
            Self::Other => "other",
        }
    }

    /// Whether this is a Refresh on the Login domain.
    #[must_use]
    pub fn is_login_refresh(&self) -> bool {
        matches!(self, Self::Refresh(msg) if msg.is_login())
    }
}

/// Refresh or Update payload.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "Type": "Refresh",
///   "ID": 2,
///   "Key": {"Name": "EUR=", "Service": "ELEKTRON_DD"},
///   "Fields": {"BID": 1.0845, "ASK": 1.0847, "DSPLY_NAME": "EURO"}
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ItemMessage {
    /// Stream id.
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// Message domain; absent means MarketPrice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// Item key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<MessageKey>,

    /// Domain-specific elements; the login refresh carries
    /// `ConnectionConfig` here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elements: Option<Map<String, Value>>,

    /// Price fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Map<String, Value>>,

    /// Stream state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StreamState>,
}

impl ItemMessage {
    /// Whether this message belongs to the Login domain.
    #[must_use]
    pub fn is_login(&self) -> bool {
        self.domain.as_deref() == Some(LOGIN_DOMAIN)
    }

    /// Instrument name from the key, if present.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.key.as_ref().and_then(|k| k.name.as_deref())
    }
}

/// Key echoed by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MessageKey {
    /// Item or user name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Service the item comes from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,

    /// Key attributes (login only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elements: Option<Map<String, Value>>,
}

/// Stream state block.
///
/// # Wire Format (JSON)
/// ```json
/// {"Stream": "Closed", "Data": "Suspect", "Code": "NotEntitled", "Text": "..."}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StreamState {
    /// `Open`, `NonStreaming`, `Closed`, `ClosedRecover`, ...
    #[serde(default)]
    pub stream: String,

    /// `Ok`, `Suspect`, `NoChange`.
    #[serde(default)]
    pub data: String,

    /// Reason code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Human readable text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl StreamState {
    /// Whether the stream is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.stream.starts_with("Closed")
    }
}

/// Status message.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "Type": "Status",
///   "ID": 1,
///   "Domain": "Login",
///   "State": {"Stream": "Closed", "Data": "Suspect", "Text": "Login denied"}
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusMessage {
    /// Stream id.
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// Message domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// Item key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<MessageKey>,

    /// New stream state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StreamState>,
}

impl StatusMessage {
    /// Whether this status closes the login stream.
    #[must_use]
    pub fn closes_login(&self) -> bool {
        self.domain.as_deref() == Some(LOGIN_DOMAIN)
            && self.state.as_ref().is_some_and(StreamState::is_closed)
    }

    /// Whether this status closes its stream, whatever the domain.
    #[must_use]
    pub fn closes_stream(&self) -> bool {
        self.state.as_ref().is_some_and(StreamState::is_closed)
    }

    /// Text describing the state, if any.
    #[must_use]
    pub fn reason(&self) -> String {
        self.state
            .as_ref()
            .and_then(|s| s.text.clone().or_else(|| s.code.clone()))
            .unwrap_or_else(|| "stream closed".to_string())
    }
}

// =============================================================================
// Connection Config (Login refresh payload)
// =============================================================================

/// `Elements.ConnectionConfig` of a login refresh.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "Type": "Vector",
///   "Data": {
///     "Entries": [
///       {"Elements": {"Hostname": "ads2", "LoadFactor": 1}}
///     ]
///   }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConnectionConfig {
    /// Vector payload.
    pub data: ConnectionConfigData,
}

/// Body of a connection config vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConnectionConfigData {
    /// Advertised servers.
    pub entries: Vec<ConnectionConfigEntry>,
}

/// One vector entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConnectionConfigEntry {
    /// Server attributes.
    pub elements: crate::domain::selection::ServerEntry,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn identity() -> Identity {
        Identity::new("root", "256", "10.0.0.7")
    }

    #[test]
    fn login_request_wire_shape() {
        let value = serde_json::to_value(LoginRequest::new(&identity())).unwrap();
        assert_eq!(
            value,
            json!({
                "ID": 1,
                "Domain": "Login",
                "Key": {
                    "Name": "root",
                    "Elements": {
                        "ApplicationId": "256",
                        "Position": "10.0.0.7",
                        "DownloadConnectionConfig": 1
                    }
                }
            })
        );
    }

    #[test]
    fn market_price_request_wire_shape() {
        let value = serde_json::to_value(MarketPriceRequest::new(2, "EUR=")).unwrap();
        assert_eq!(value, json!({"ID": 2, "Key": {"Name": "EUR="}}));
    }

    #[test]
    fn pong_wire_shape() {
        let value = serde_json::to_value(OutboundMessage::Pong(PongMessage::default())).unwrap();
        assert_eq!(value, json!({"Type": "Pong"}));
    }

    #[test]
    fn outbound_kinds() {
        assert_eq!(OutboundMessage::Pong(PongMessage::default()).kind(), "pong");
        assert_eq!(
            OutboundMessage::MarketPrice(MarketPriceRequest::new(2, "EUR=")).kind(),
            "market_price"
        );
    }

    #[test]
    fn login_refresh_is_detected() {
        let msg: InboundMessage = serde_json::from_value(json!({
            "Type": "Refresh",
            "ID": 1,
            "Domain": "Login",
            "Key": {"Name": "root"},
            "State": {"Stream": "Open", "Data": "Ok"}
        }))
        .unwrap();
        assert!(msg.is_login_refresh());
        assert_eq!(msg.kind(), "refresh");
    }

    #[test]
    fn item_refresh_is_not_login() {
        let msg: InboundMessage = serde_json::from_value(json!({
            "Type": "Refresh",
            "ID": 2,
            "Key": {"Name": "EUR=", "Service": "ELEKTRON_DD"},
            "Fields": {"BID": 1.0845}
        }))
        .unwrap();
        assert!(!msg.is_login_refresh());
        let InboundMessage::Refresh(item) = msg else {
            panic!("expected refresh");
        };
        assert_eq!(item.name(), Some("EUR="));
    }

    #[test]
    fn unknown_type_is_other() {
        let msg: InboundMessage =
            serde_json::from_value(json!({"Type": "Error", "Text": "bad request"})).unwrap();
        assert_eq!(msg, InboundMessage::Other);
    }

    #[test]
    fn login_status_closed() {
        let status = StatusMessage {
            id: Some(1),
            domain: Some(LOGIN_DOMAIN.to_string()),
            key: None,
            state: Some(StreamState {
                stream: "Closed".to_string(),
                data: "Suspect".to_string(),
                code: Some("NotEntitled".to_string()),
                text: Some("Login denied".to_string()),
            }),
        };
        assert!(status.closes_login());
        assert_eq!(status.reason(), "Login denied");
    }

    #[test]
    fn item_status_does_not_close_login() {
        let status = StatusMessage {
            id: Some(2),
            domain: None,
            key: None,
            state: Some(StreamState {
                stream: "Closed".to_string(),
                ..StreamState::default()
            }),
        };
        assert!(!status.closes_login());
        assert!(status.closes_stream());
        assert_eq!(status.reason(), "stream closed");
    }
}
