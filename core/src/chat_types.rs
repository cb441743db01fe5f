/// Shared types for the chat layer
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

/// Prefix of locally generated message ids (optimistic echoes)
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Whether a conversation is one-to-one or a named group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversationKind {
    Direct,
    Group,
}

impl ConversationKind {
    /// Value sent in create-conversation requests
    pub fn as_wire(&self) -> &'static str {
        match self {
            ConversationKind::Direct => "personal",
            ConversationKind::Group => "group",
        }
    }

    /// Parse the server's spelling. The backend has used both names and
    /// numeric codes ("1" = group, "2" = personal); anything else is a group.
    pub fn from_wire(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "personal" | "direct" | "2" => ConversationKind::Direct,
            _ => ConversationKind::Group,
        }
    }
}

impl fmt::Display for ConversationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationKind::Direct => write!(f, "Personal"),
            ConversationKind::Group => write!(f, "Group"),
        }
    }
}

impl Serialize for ConversationKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_wire())
    }
}

impl<'de> Deserialize<'de> for ConversationKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(match value {
            serde_json::Value::String(s) => ConversationKind::from_wire(&s),
            serde_json::Value::Number(n) => ConversationKind::from_wire(&n.to_string()),
            _ => ConversationKind::Group,
        })
    }
}

/// One entry of the conversation list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: ConversationKind,
    /// Denormalized preview of the last message (may lag)
    #[serde(rename = "lastMessage", default, skip_serializing_if = "Option::is_none")]
    pub last_message_preview: Option<String>,
    #[serde(rename = "lastMessageTime", default, skip_serializing_if = "Option::is_none")]
    pub last_message_time: Option<String>,
}

fn default_kind() -> ConversationKind {
    ConversationKind::Group
}

impl Conversation {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: ConversationKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            last_message_preview: None,
            last_message_time: None,
        }
    }
}

/// A chat message, either server-confirmed or an optimistic local echo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    /// Absent on some push payloads; stamped with the active conversation on ingest
    #[serde(rename = "groupId", default, skip_serializing_if = "String::is_empty")]
    pub conversation_id: String,
    #[serde(rename = "userId")]
    pub author_id: String,
    #[serde(rename = "username")]
    pub author_display_name: String,
    #[serde(rename = "content")]
    pub body: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "isRead", default)]
    pub is_read: bool,
    /// False only for local echoes awaiting confirmation
    #[serde(skip, default = "confirmed")]
    pub delivered: bool,
}

fn confirmed() -> bool {
    true
}

impl Message {
    /// Build an optimistic echo authored by `author`, stamped with the client clock
    pub fn local_echo(conversation_id: &str, author: &UserProfile, body: &str) -> Self {
        Self {
            id: format!("{}{}", LOCAL_ID_PREFIX, Uuid::new_v4()),
            conversation_id: conversation_id.to_string(),
            author_id: author.user_id.clone(),
            author_display_name: author.username.clone(),
            body: body.to_string(),
            created_at: Utc::now(),
            is_read: false,
            delivered: false,
        }
    }

    pub fn is_local_echo(&self) -> bool {
        self.id.starts_with(LOCAL_ID_PREFIX)
    }
}

/// A user that can be added to a new conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Friend {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "username")]
    pub display_name: String,
}

/// The signed-in user's profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub username: String,
}

/// Change notifications for whatever presentation layer sits on top
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncUpdate {
    /// The conversation list was replaced, grew or was reordered
    ConversationsChanged { has_more: bool },
    /// The active conversation changed
    ActiveConversationChanged { conversation_id: String },
    /// The message buffer of the active conversation changed
    MessagesChanged { conversation_id: String },
    /// The friend search results changed
    FriendsChanged { has_more: bool },
    /// A recoverable, user-facing notice (validation or failed operation)
    Notice { message: String },
    /// The realtime transport dropped; pushes are missing until restored
    ChannelLost,
    /// Reconnected, resubscribed and rejoined the active conversation
    ChannelRestored,
    /// The session ended; the controller stopped
    SessionEnded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_decodes_server_payload() {
        let raw = r#"{
            "id": "m1",
            "content": "hello",
            "userId": "u1",
            "username": "alice",
            "createdAt": "2024-03-01T10:00:00.000Z",
            "isRead": false
        }"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.body, "hello");
        assert_eq!(msg.author_display_name, "alice");
        assert!(msg.conversation_id.is_empty());
        assert!(msg.delivered);
        assert!(!msg.is_local_echo());
    }

    #[test]
    fn test_conversation_kind_spellings() {
        let group: Conversation =
            serde_json::from_str(r#"{"id":"c1","name":"team","type":"1"}"#).unwrap();
        let direct: Conversation =
            serde_json::from_str(r#"{"id":"c2","name":"bob","type":"personal"}"#).unwrap();
        let numeric: Conversation =
            serde_json::from_str(r#"{"id":"c3","name":"bob","type":2}"#).unwrap();
        assert_eq!(group.kind, ConversationKind::Group);
        assert_eq!(direct.kind, ConversationKind::Direct);
        assert_eq!(numeric.kind, ConversationKind::Direct);
        assert_eq!(serde_json::to_value(direct.kind).unwrap(), "personal");
    }

    #[test]
    fn test_local_echo_is_undelivered() {
        let me = UserProfile {
            user_id: "u1".to_string(),
            username: "alice".to_string(),
        };
        let echo = Message::local_echo("c1", &me, "hi");
        assert!(echo.is_local_echo());
        assert!(!echo.delivered);
        assert_eq!(echo.conversation_id, "c1");
        assert_eq!(echo.author_id, "u1");
    }
}
