//! JSON control messages exchanged with the relay.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StegchatError;
use crate::result::Result;

/// First application message of every session: `{"channel": <name>}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeMessage {
    pub channel: String,
}

impl HandshakeMessage {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| StegchatError::ProtocolViolation(e.to_string()))
    }

    /// Parses and checks the message, an empty channel name is refused.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let msg: Self = parse_object(bytes, "handshake")?;
        if msg.channel.is_empty() {
            return Err(StegchatError::ProtocolViolation(
                "handshake names no channel".to_string(),
            ));
        }
        Ok(msg)
    }
}

/// Everything a channel said during one routing pass: `{"messages": [...]}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub messages: Vec<String>,
}

impl BroadcastMessage {
    pub fn new(messages: Vec<String>) -> Self {
        Self { messages }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| StegchatError::ProtocolViolation(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        parse_object(bytes, "broadcast")
    }
}

/// serde reads structs from JSON arrays as well, the wire format only knows objects
fn parse_object<M: DeserializeOwned>(bytes: &[u8], kind: &str) -> Result<M> {
    let invalid = |e: serde_json::Error| {
        StegchatError::ProtocolViolation(format!("invalid {kind} message: {e}"))
    };
    match serde_json::from_slice::<Value>(bytes).map_err(invalid)? {
        value @ Value::Object(_) => serde_json::from_value(value).map_err(invalid),
        _ => Err(StegchatError::ProtocolViolation(format!(
            "{kind} message is not a JSON object"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_use_the_documented_wire_shape() {
        assert_eq!(
            HandshakeMessage::new("alpha").to_bytes().unwrap(),
            br#"{"channel":"alpha"}"#
        );
        assert_eq!(
            BroadcastMessage::new(vec!["hello".into(), "world".into()])
                .to_bytes()
                .unwrap(),
            br#"{"messages":["hello","world"]}"#
        );
    }

    #[test]
    fn should_parse_handshakes_from_other_clients() {
        let msg = HandshakeMessage::from_bytes(br#"{ "channel": "alpha", "nick": "ignored" }"#).unwrap();

        assert_eq!(msg, HandshakeMessage::new("alpha"));
    }

    #[test]
    fn should_reject_malformed_handshakes() {
        let cases: [&[u8]; 4] = [
            b"not json",
            br#"{"chan":"alpha"}"#,
            br#"{"channel":""}"#,
            br#"["alpha"]"#,
        ];
        for raw in cases {
            assert!(
                matches!(
                    HandshakeMessage::from_bytes(raw),
                    Err(StegchatError::ProtocolViolation(_))
                ),
                "accepted {}",
                String::from_utf8_lossy(raw)
            );
        }
    }

    #[test]
    fn should_parse_broadcasts() {
        let msg = BroadcastMessage::from_bytes(br#"{"messages":["a","b"]}"#).unwrap();
        assert_eq!(msg.messages, vec!["a", "b"]);

        assert!(BroadcastMessage::from_bytes(b"{}").is_err());
    }

    #[test]
    fn should_reject_broadcasts_that_are_not_objects() {
        let cases: [&[u8]; 3] = [br#"[["x"]]"#, br#""messages""#, b"null"];
        for raw in cases {
            assert!(
                matches!(
                    BroadcastMessage::from_bytes(raw),
                    Err(StegchatError::ProtocolViolation(_))
                ),
                "accepted {}",
                String::from_utf8_lossy(raw)
            );
        }
    }
}
