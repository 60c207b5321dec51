//! WebSocket control messages exchanged between relay and subscribers.
//!
//! Broadcast events are forwarded as-is and have no envelope; only the
//! relay's own control traffic is typed here.

use serde::{Deserialize, Serialize};

use crate::domain::ClientId;

/// Server → client control message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once, right after the connection is registered.
    ConnectionEstablished {
        /// Identifier assigned to this connection.
        #[serde(rename = "clientId")]
        client_id: ClientId,
        /// Milliseconds since the Unix epoch.
        timestamp: i64,
    },
}

impl ServerMessage {
    /// Builds the welcome message for `client_id`, stamped now.
    #[must_use]
    pub fn established(client_id: ClientId) -> Self {
        Self::ConnectionEstablished {
            client_id,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Client → server control message.
///
/// Anything that does not parse as one of these is treated as plain
/// activity.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Application-level probe acknowledgment.
    Pong,
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn established_wire_shape() {
        let id = ClientId::new();
        let Ok(value) = serde_json::to_value(ServerMessage::established(id)) else {
            panic!("serialization failed");
        };
        assert_eq!(value["type"], "connection_established");
        assert_eq!(value["clientId"], id.to_string());
        assert!(value["timestamp"].as_i64().is_some_and(|ts| ts > 0));
    }

    #[test]
    fn pong_parses_with_extra_fields() {
        let parsed = serde_json::from_str::<ClientMessage>(r#"{"type":"pong","ts":1}"#);
        assert!(matches!(parsed, Ok(ClientMessage::Pong)));
    }

    #[test]
    fn other_messages_do_not_parse_as_control() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"hello"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>("[]").is_err());
    }
}
