//! Client stream envelopes.
//!
//! Each frame is one UTF-8 JSON object with at minimum a `type` string and
//! an optional `payload` object. The gateway accepts both the nested form
//! `{type, payload: {k: v}}` and the legacy flat form `{type, k: v}`;
//! unknown fields are ignored. Writers emit the nested form.

use serde_json::{Map, Value};
use zeus_core::{Result, ZeusError};

/// A parsed, normalized client frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// The `type` discriminator.
    pub kind: String,
    /// Payload fields, regardless of which form the sender used.
    pub payload: Map<String, Value>,
}

impl Envelope {
    /// Parse one text frame into a normalized envelope.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ZeusError::malformed(format!("invalid JSON: {e}")))?;

        let obj = value
            .as_object()
            .ok_or_else(|| ZeusError::malformed("frame must be a JSON object"))?;

        let kind = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ZeusError::missing_field("type"))?
            .to_string();

        let payload = match obj.get("payload") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => {
                // Legacy flat form: every top-level field but `type` is payload.
                let mut map = Map::new();
                for (k, v) in obj {
                    if k != "type" && k != "payload" {
                        map.insert(k.clone(), v.clone());
                    }
                }
                map
            }
            Some(other) => {
                return Err(ZeusError::malformed(format!(
                    "payload must be an object, got {other}"
                )))
            }
        };

        Ok(Self { kind, payload })
    }

    /// Build an envelope programmatically (nested form).
    pub fn new(kind: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Render the nested wire form `{type, payload}`.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "type": self.kind,
            "payload": Value::Object(self.payload.clone()),
        })
    }

    /// Render the nested wire form as a text frame.
    pub fn to_frame(&self) -> String {
        self.to_value().to_string()
    }

    /// Fetch an optional string payload field.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Fetch a required string payload field.
    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.get_str(key)
            .ok_or_else(|| ZeusError::missing_field(key))
    }

    /// Fetch an optional unsigned integer payload field.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.payload.get(key).and_then(Value::as_u64)
    }

    /// Fetch an optional boolean payload field.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.payload.get(key).and_then(Value::as_bool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_form() {
        let env = Envelope::parse(r#"{"type":"spawn","payload":{"provider":"gemini"}}"#).unwrap();
        assert_eq!(env.kind, "spawn");
        assert_eq!(env.get_str("provider"), Some("gemini"));
    }

    #[test]
    fn test_parse_legacy_flat_form() {
        let env = Envelope::parse(r#"{"type":"spawn","provider":"gemini","port":4005}"#).unwrap();
        assert_eq!(env.kind, "spawn");
        assert_eq!(env.get_str("provider"), Some("gemini"));
        assert_eq!(env.get_u64("port"), Some(4005));
    }

    #[test]
    fn test_nested_wins_over_flat() {
        // When a payload object is present, stray top-level keys are ignored.
        let env = Envelope::parse(
            r#"{"type":"spawn","provider":"stray","payload":{"provider":"gemini"}}"#,
        )
        .unwrap();
        assert_eq!(env.get_str("provider"), Some("gemini"));
    }

    #[test]
    fn test_missing_type() {
        let err = Envelope::parse(r#"{"payload":{}}"#).unwrap_err();
        assert!(err.to_string().contains("type"));
    }

    #[test]
    fn test_invalid_json() {
        assert!(Envelope::parse("not json").is_err());
        assert!(Envelope::parse("[1,2,3]").is_err());
    }

    #[test]
    fn test_non_object_payload_rejected() {
        assert!(Envelope::parse(r#"{"type":"ping","payload":42}"#).is_err());
    }

    #[test]
    fn test_round_trip_nested() {
        let env = Envelope::parse(r#"{"type":"chat","text":"hi"}"#).unwrap();
        let v = env.to_value();
        assert_eq!(v["type"], "chat");
        assert_eq!(v["payload"]["text"], "hi");
    }

    #[test]
    fn test_require_str_missing() {
        let env = Envelope::parse(r#"{"type":"chat"}"#).unwrap();
        let err = env.require_str("provider").unwrap_err();
        assert!(err.to_string().contains("provider"));
    }
}
