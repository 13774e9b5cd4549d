//! WebSocket message types: envelope, commands, and events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::domain::GatewayEvent;

/// Top-level WebSocket message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsMessage {
    /// Client-provided ID for commands; server-generated for events.
    #[serde(default)]
    pub id: String,
    /// Message type discriminator.
    #[serde(rename = "type")]
    pub msg_type: WsMessageType,
    /// ISO-8601 timestamp.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Variant-specific payload.
    #[serde(default)]
    pub payload: Value,
}

/// Discriminator for WebSocket message types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WsMessageType {
    /// Client → Server command.
    Command,
    /// Server → Client response to a command.
    Response,
    /// Server → Client broadcast event.
    Event,
    /// Server → Client error.
    Error,
}

/// Payload of a `command` message: one backend call.
#[derive(Debug, Clone, Deserialize)]
pub struct WsCommand {
    /// Backend endpoint, e.g. `objects/subscribe`.
    pub method: String,
    /// Request parameters.
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl WsMessage {
    /// Builds the successful reply to command `id`.
    #[must_use]
    pub fn response(id: String, result: Value) -> Self {
        Self {
            id,
            msg_type: WsMessageType::Response,
            timestamp: Utc::now(),
            payload: json!({ "result": result }),
        }
    }

    /// Builds an error reply to command `id`.
    #[must_use]
    pub fn error(id: String, code: u16, message: &str) -> Self {
        Self {
            id,
            msg_type: WsMessageType::Error,
            timestamp: Utc::now(),
            payload: json!({ "code": code, "message": message }),
        }
    }

    /// Wraps a bus event for delivery to clients.
    ///
    /// # Errors
    ///
    /// Returns the serialization error if the event cannot be encoded.
    pub fn event(event: &GatewayEvent) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            msg_type: WsMessageType::Event,
            timestamp: Utc::now(),
            payload: json!({
                "event": event.name(),
                "data": serde_json::to_value(event)?,
            }),
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn command_without_timestamp_parses() {
        let text = r#"{"id":"7","type":"command","payload":{"method":"objects/list"}}"#;
        let Ok(msg) = serde_json::from_str::<WsMessage>(text) else {
            panic!("command should parse");
        };
        assert_eq!(msg.msg_type, WsMessageType::Command);
        let Ok(command) = serde_json::from_value::<WsCommand>(msg.payload) else {
            panic!("payload should parse");
        };
        assert_eq!(command.method, "objects/list");
        assert!(command.params.is_empty());
    }

    #[test]
    fn events_carry_their_name() {
        let Ok(msg) = WsMessage::event(&GatewayEvent::klippy_ready()) else {
            panic!("event should encode");
        };
        assert_eq!(msg.msg_type, WsMessageType::Event);
        assert_eq!(msg.payload.get("event"), Some(&json!("server:klippy_ready")));
        assert_eq!(
            msg.payload.get("data").and_then(|d| d.get("event_type")),
            Some(&json!("klippy_ready"))
        );
    }
}
