//! Opaque JSON payload passed through the relay unmodified.

use std::sync::Arc;

use serde::de::IgnoredAny;

use crate::errors::FrameError;

/// One inbound message, shared by every recipient of a broadcast.
///
/// The text is checked to be a single JSON value and then kept verbatim;
/// the relay never looks inside it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayMessage {
    payload: Arc<String>,
}

impl RelayMessage {
    /// Validate a text frame as JSON without building a value tree.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let _: IgnoredAny = serde_json::from_str(text)?;
        Ok(Self {
            payload: Arc::new(text.to_owned()),
        })
    }

    /// Encode a JSON value as a message.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, FrameError> {
        Ok(Self {
            payload: Arc::new(serde_json::to_string(value)?),
        })
    }

    /// Shared handle to the payload text, for enqueueing.
    pub fn payload(&self) -> Arc<String> {
        Arc::clone(&self.payload)
    }

    /// Payload text.
    pub fn as_str(&self) -> &str {
        &self.payload
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty (never true for a parsed message).
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_is_kept_verbatim() {
        // Whitespace and key order survive untouched
        let text = r#"{ "type" : "ping",  "a":1 }"#;
        let msg = RelayMessage::parse(text).unwrap();
        assert_eq!(msg.as_str(), text);
        assert_eq!(msg.len(), text.len());
    }

    #[test]
    fn any_json_value_is_accepted() {
        for text in ["[1,2,3]", "\"slide\"", "42", "null", "true"] {
            assert!(RelayMessage::parse(text).is_ok(), "{text} should parse");
        }
    }

    #[test]
    fn malformed_json_is_rejected() {
        for text in ["", "{", "{\"x\":}", "ping", "{} {}"] {
            let err = RelayMessage::parse(text).unwrap_err();
            assert!(matches!(err, FrameError::InvalidJson(_)), "{text}");
        }
    }

    #[test]
    fn payload_is_shared_not_copied() {
        let msg = RelayMessage::parse(r#"{"x":1}"#).unwrap();
        let a = msg.payload();
        let b = msg.payload();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn from_value_round_trips_content() {
        let value = serde_json::json!({"type": "slide", "index": 3});
        let msg = RelayMessage::from_value(&value).unwrap();
        let back: serde_json::Value = serde_json::from_str(msg.as_str()).unwrap();
        assert_eq!(back, value);
        assert!(!msg.is_empty());
    }
}
