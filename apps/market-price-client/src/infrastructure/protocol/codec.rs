//! Stream Codec Module
//!
//! JSON encoding and decoding for the streaming protocol.
//!
//! Outbound messages are encoded canonically: keys sorted, no
//! insignificant whitespace, so the same message always produces the same
//! bytes. Inbound frames are JSON arrays of independent messages; a bare
//! object is accepted as a batch of one.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::domain::session::SessionError;
use crate::infrastructure::protocol::messages::InboundMessage;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame held an empty array.
    #[error("empty message batch")]
    EmptyBatch,

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

impl From<CodecError> for SessionError {
    fn from(err: CodecError) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// JSON codec for the streaming protocol.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame into its messages, in frame order.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not JSON, is an empty array, is
    /// neither an array nor an object, or any element lacks a valid `Type`.
    pub fn decode(&self, text: &str) -> Result<Vec<InboundMessage>, CodecError> {
        self.decode_value(self.parse(text)?)
    }

    /// Parse a text frame into a JSON tree without interpreting it.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not valid JSON.
    pub fn parse(&self, text: &str) -> Result<Value, CodecError> {
        Ok(serde_json::from_str(text.trim())?)
    }

    /// Interpret a parsed frame as a batch of messages.
    ///
    /// # Errors
    ///
    /// See [`JsonCodec::decode`].
    pub fn decode_value(&self, value: Value) -> Result<Vec<InboundMessage>, CodecError> {
        match value {
            Value::Array(items) => {
                if items.is_empty() {
                    return Err(CodecError::EmptyBatch);
                }
                items
                    .into_iter()
                    .map(|item| self.decode_message(item))
                    .collect()
            }
            Value::Object(_) => Ok(vec![self.decode_message(value)?]),
            other => Err(CodecError::InvalidFormat(format!(
                "expected JSON array or object, got: {}",
                truncate(&other.to_string(), 50)
            ))),
        }
    }

    fn decode_message(&self, value: Value) -> Result<InboundMessage, CodecError> {
        if !value.get("Type").is_some_and(Value::is_string) {
            return Err(CodecError::InvalidFormat(format!(
                "message without Type: {}",
                truncate(&value.to_string(), 50)
            )));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Encode a value canonically (sorted keys, compact).
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode<T: serde::Serialize>(&self, value: &T) -> Result<String, CodecError> {
        let tree = canonicalize(serde_json::to_value(value)?);
        Ok(serde_json::to_string(&tree)?)
    }

    /// Pretty rendering used by the wire log: sorted keys, two-space
    /// indent. Falls back to the raw text when it is not JSON.
    #[must_use]
    pub fn render(&self, text: &str) -> String {
        self.parse(text)
            .ok()
            .and_then(|value| self.render_value(&value))
            .unwrap_or_else(|| text.to_string())
    }

    /// Pretty rendering of an already parsed tree.
    #[must_use]
    pub fn render_value(&self, value: &Value) -> Option<String> {
        serde_json::to_string_pretty(&canonicalize(value.clone())).ok()
    }
}

/// Rebuild every object with its keys in sorted order. `Map` keeps
/// insertion order when serde_json's `preserve_order` feature is enabled
/// anywhere in the build.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::Identity;
    use crate::infrastructure::protocol::messages::{
        ItemMessage, LoginRequest, MarketPriceRequest, MessageKey, OutboundMessage, PongMessage,
        StatusMessage, StreamState,
    };
    use test_case::test_case;

    #[test]
    fn decode_batch_keeps_order() {
        let codec = JsonCodec::new();
        let text = r#"[
            {"Type": "Refresh", "ID": 1, "Domain": "Login"},
            {"Type": "Ping"},
            {"Type": "Update", "ID": 2, "Fields": {"BID": 1.1}}
        ]"#;

        let messages = codec.decode(text).unwrap();
        let kinds: Vec<_> = messages.iter().map(InboundMessage::kind).collect();
        assert_eq!(kinds, vec!["refresh", "ping", "update"]);
        assert!(messages[0].is_login_refresh());
    }

    #[test]
    fn decode_single_object() {
        let codec = JsonCodec::new();
        let messages = codec.decode(r#"{"Type": "Ping"}"#).unwrap();
        assert_eq!(messages, vec![InboundMessage::Ping]);
    }

    #[test_case("[]" ; "empty batch")]
    #[test_case("" ; "empty frame")]
    #[test_case("not json" ; "garbage")]
    #[test_case("42" ; "scalar")]
    #[test_case(r#"[{"ID": 2}]"# ; "missing type")]
    #[test_case(r#"[{"Type": 7}]"# ; "non string type")]
    #[test_case(r#"[{"Type": "Ping"}, {"Fields": {}}]"# ; "one bad element poisons batch")]
    #[test_case(r#"[{"Type": "Refresh", "ID": "two"}]"# ; "bad field type")]
    fn decode_rejects(text: &str) {
        assert!(JsonCodec::new().decode(text).is_err());
    }

    #[test_case(r#"[{"Type": "Pong"}]"# ; "pong")]
    #[test_case(r#"[{"Type": "Error", "Text": "x"}]"# ; "error")]
    #[test_case(r#"[{"Type": "Ack", "ID": 3}]"# ; "ack")]
    fn decode_unknown_types_as_other(text: &str) {
        let messages = JsonCodec::new().decode(text).unwrap();
        assert_eq!(messages, vec![InboundMessage::Other]);
    }

    #[test]
    fn encode_sorts_keys() {
        let codec = JsonCodec::new();
        let text = codec
            .encode(&MarketPriceRequest::new(2, "EUR="))
            .unwrap();
        assert_eq!(text, r#"{"ID":2,"Key":{"Name":"EUR="}}"#);

        let login = codec
            .encode(&LoginRequest::new(&Identity::new("root", "256", "10.0.0.7")))
            .unwrap();
        assert_eq!(
            login,
            r#"{"Domain":"Login","ID":1,"Key":{"Elements":{"ApplicationId":"256","DownloadConnectionConfig":1,"Position":"10.0.0.7"},"Name":"root"}}"#
        );
    }

    #[test]
    fn encode_is_deterministic() {
        let codec = JsonCodec::new();
        let pong = OutboundMessage::Pong(PongMessage::default());
        assert_eq!(codec.encode(&pong).unwrap(), codec.encode(&pong).unwrap());
        assert_eq!(codec.encode(&pong).unwrap(), r#"{"Type":"Pong"}"#);
    }

    #[test]
    fn inbound_round_trip() {
        let codec = JsonCodec::new();
        let mut fields = serde_json::Map::new();
        fields.insert("BID".to_string(), serde_json::json!(1.0845));
        fields.insert("DSPLY_NAME".to_string(), serde_json::json!("EURO"));

        let originals = vec![
            InboundMessage::Ping,
            InboundMessage::Refresh(ItemMessage {
                id: Some(2),
                key: Some(MessageKey {
                    name: Some("EUR=".to_string()),
                    ..MessageKey::default()
                }),
                fields: Some(fields.clone()),
                ..ItemMessage::default()
            }),
            InboundMessage::Update(ItemMessage {
                id: Some(2),
                fields: Some(fields),
                ..ItemMessage::default()
            }),
            InboundMessage::Status(StatusMessage {
                id: Some(1),
                domain: Some("Login".to_string()),
                key: None,
                state: Some(StreamState {
                    stream: "Closed".to_string(),
                    data: "Suspect".to_string(),
                    code: None,
                    text: Some("denied".to_string()),
                }),
            }),
        ];

        for original in originals {
            let text = codec.encode(&original).unwrap();
            let decoded = codec.decode(&text).unwrap();
            assert_eq!(decoded, vec![original]);
        }
    }

    #[test]
    fn outbound_round_trip() {
        let codec = JsonCodec::new();
        let originals = vec![
            OutboundMessage::Login(LoginRequest::new(&Identity::new("u", "1", "p"))),
            OutboundMessage::MarketPrice(MarketPriceRequest::new(7, "JPY=")),
            OutboundMessage::Pong(PongMessage::default()),
        ];
        for original in originals {
            let text = codec.encode(&original).unwrap();
            let decoded: OutboundMessage = serde_json::from_str(&text).unwrap();
            assert_eq!(decoded, original);
        }
    }

    #[test]
    fn render_is_sorted_and_indented() {
        let codec = JsonCodec::new();
        let rendered = codec.render(r#"{"Type":"Pong","A":1}"#);
        assert_eq!(rendered, "{\n  \"A\": 1,\n  \"Type\": \"Pong\"\n}");
    }

    #[test]
    fn render_falls_back_to_raw() {
        assert_eq!(JsonCodec::new().render("<html>"), "<html>");
    }
}
