use crate::error::{ErrorKind, NetError, NetResult};
use serde_json::{Map, Value};
use std::convert::TryFrom;

/// Identifier for the semantic kind of a message. Defined entirely by the
/// application; the runtime only uses it to look up a handler.
pub type CommandId = u32;

/// Identifier assigned by the server to a connected worker, monotonically
/// increasing from zero and never reused for the lifetime of the server.
pub type ClientId = u32;

/// Identifier for an application-defined set of clients.
pub type GroupId = u32;

const COMMAND_FIELD: &str = "command";

/// A command-tagged JSON message: a required command-id used for dispatch,
/// plus an opaque payload of command-specific fields. On the wire these are
/// merged into a single flat JSON object, e.g. `{"command":42,"text":"hi"}`.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonMessage {
    pub command: CommandId,
    pub fields: Value,
}

impl JsonMessage {
    pub fn new(command: CommandId, fields: Value) -> JsonMessage {
        JsonMessage { command, fields }
    }

    /// Convenience constructor for a message with no extra fields.
    pub fn bare(command: CommandId) -> JsonMessage {
        JsonMessage { command, fields: Value::Object(Map::new()) }
    }
}

/// Anything that can be framed over a [`crate::link::Link`]. Applications may
/// implement this on their own message type; [`JsonMessage`] is provided as a
/// ready-made implementation for the common case.
pub trait Protocol: Sized {
    fn command(&self) -> CommandId;
    fn encode(&self) -> NetResult<String>;
    fn decode(text: &str) -> NetResult<Self>;
}

impl Protocol for JsonMessage {
    fn command(&self) -> CommandId {
        self.command
    }

    fn encode(&self) -> NetResult<String> {
        let mut object = match &self.fields {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("payload".to_string(), other.clone());
                map
            }
        };
        object.insert(COMMAND_FIELD.to_string(), Value::from(self.command));
        let text = serde_json::to_string(&Value::Object(object))?;
        if text.len() > u16::MAX as usize {
            return Err(NetError::new(
                ErrorKind::PayloadTooLarge,
                format!("encoded message is {} bytes, limit is {}", text.len(), u16::MAX),
            ));
        }
        Ok(text)
    }

    fn decode(text: &str) -> NetResult<JsonMessage> {
        let value: Value = serde_json::from_str(text)?;
        let mut object = match value {
            Value::Object(map) => map,
            _ => return Err(NetError::new(ErrorKind::Decode, "message is not a JSON object")),
        };
        let command = object
            .remove(COMMAND_FIELD)
            .and_then(|v| v.as_u64())
            .ok_or_else(|| NetError::new(ErrorKind::Decode, "message is missing a numeric \"command\" field"))?;
        let command = CommandId::try_from(command)
            .map_err(|_| NetError::new(ErrorKind::Decode, "command id out of range"))?;
        Ok(JsonMessage { command, fields: Value::Object(object) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trip_preserves_command_and_fields() {
        let msg = JsonMessage::new(42, json!({ "text": "ping" }));
        let encoded = msg.encode().unwrap();
        let decoded = JsonMessage::decode(&encoded).unwrap();
        assert_eq!(decoded.command, 42);
        assert_eq!(decoded.fields["text"], "ping");
    }

    #[test]
    fn bare_message_encodes_to_just_the_command() {
        let msg = JsonMessage::bare(7);
        let encoded = msg.encode().unwrap();
        let decoded = JsonMessage::decode(&encoded).unwrap();
        assert_eq!(decoded.command, 7);
        assert_eq!(decoded.fields, json!({}));
    }

    #[test]
    fn decode_rejects_missing_command() {
        let err = JsonMessage::decode(r#"{"text":"hi"}"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Decode);
    }

    #[test]
    fn decode_rejects_non_object() {
        let err = JsonMessage::decode("42").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Decode);
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let huge = "x".repeat(u16::MAX as usize + 1);
        let msg = JsonMessage::new(1, json!({ "text": huge }));
        let err = msg.encode().unwrap_err();
        assert_eq!(err.kind, ErrorKind::PayloadTooLarge);
    }
}
