/// Typed events carried by the realtime channel
use crate::chat_types::{Conversation, Message};
use crate::error::{Result, SyncError};
use serde_json::Value;
use std::fmt;

/// Control signals sent to the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    JoinGroup { conversation_id: String },
    LeaveGroup { conversation_id: String },
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::JoinGroup { .. } => "join_group",
            OutboundEvent::LeaveGroup { .. } => "leave_group",
        }
    }

    pub fn conversation_id(&self) -> &str {
        match self {
            OutboundEvent::JoinGroup { conversation_id }
            | OutboundEvent::LeaveGroup { conversation_id } => conversation_id,
        }
    }

    /// The server keys conversations as `groupId`
    pub fn payload(&self) -> Value {
        serde_json::json!({ "groupId": self.conversation_id() })
    }
}

impl fmt::Display for OutboundEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.conversation_id())
    }
}

/// Names of inbound events a handler can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboundEventKind {
    NewMessage,
    GroupNewMessage,
}

impl InboundEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InboundEventKind::NewMessage => "new_message",
            InboundEventKind::GroupNewMessage => "group_new_message",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "new_message" => Some(InboundEventKind::NewMessage),
            "group_new_message" => Some(InboundEventKind::GroupNewMessage),
            _ => None,
        }
    }
}

/// Data signals pushed by the server
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// A message in a joined conversation
    NewMessage(Message),
    /// Activity on a conversation, possibly not the selected one
    GroupNewMessage(Conversation),
}

impl InboundEvent {
    pub fn kind(&self) -> InboundEventKind {
        match self {
            InboundEvent::NewMessage(_) => InboundEventKind::NewMessage,
            InboundEvent::GroupNewMessage(_) => InboundEventKind::GroupNewMessage,
        }
    }

    /// Decode a named event. `Ok(None)` for names this client does not handle.
    pub fn decode(name: &str, payload: Value) -> Result<Option<Self>> {
        let Some(kind) = InboundEventKind::from_name(name) else {
            return Ok(None);
        };
        let event = match kind {
            InboundEventKind::NewMessage => InboundEvent::NewMessage(
                serde_json::from_value(payload)
                    .map_err(|e| SyncError::Protocol(format!("Invalid {} payload: {}", name, e)))?,
            ),
            InboundEventKind::GroupNewMessage => InboundEvent::GroupNewMessage(
                serde_json::from_value(payload)
                    .map_err(|e| SyncError::Protocol(format!("Invalid {} payload: {}", name, e)))?,
            ),
        };
        Ok(Some(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outbound_payload_uses_group_id() {
        let event = OutboundEvent::LeaveGroup {
            conversation_id: "g1".to_string(),
        };
        assert_eq!(event.name(), "leave_group");
        assert_eq!(event.payload(), json!({ "groupId": "g1" }));
    }

    #[test]
    fn test_decode_group_new_message() {
        let event = InboundEvent::decode(
            "group_new_message",
            json!({ "id": "g2", "name": "ops", "type": "group" }),
        )
        .unwrap()
        .unwrap();
        assert_eq!(event.kind(), InboundEventKind::GroupNewMessage);
    }

    #[test]
    fn test_decode_unknown_and_malformed() {
        assert!(InboundEvent::decode("typing", json!({})).unwrap().is_none());
        assert!(InboundEvent::decode("new_message", json!({ "id": 1 })).is_err());
    }
}
