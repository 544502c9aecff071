use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of payload carried in [`Message::content`].
///
/// For `Image` and `File` the content is an object-storage key, not text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::File => "file",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Denormalized display info for the sender of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_picture_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub sender_id: String,
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Author>,
}

/// Prefix of ids given to messages that exist only locally until the server confirms them.
pub const OPTIMISTIC_ID_PREFIX: &str = "temp-";

impl Message {
    /// Builds a placeholder for a message the current user is sending.
    pub fn optimistic(
        conversation_id: String,
        sender_id: String,
        content: String,
        message_type: MessageType,
    ) -> Self {
        Self {
            id: format!("{OPTIMISTIC_ID_PREFIX}{}", uuid::Uuid::new_v4()),
            conversation_id,
            sender_id,
            content,
            message_type,
            created_at: Utc::now(),
            updated_at: None,
            is_edited: false,
            edited_at: None,
            is_deleted: false,
            deleted_at: None,
            author: None,
        }
    }

    pub fn is_optimistic(&self) -> bool {
        self.id.starts_with(OPTIMISTIC_ID_PREFIX)
    }

    /// Short single-line preview used in notifications.
    pub fn preview(&self, max_chars: usize) -> String {
        match self.message_type {
            MessageType::Image => "sent an image".to_string(),
            MessageType::File => "sent a file".to_string(),
            MessageType::Text => {
                let t = self.content.trim();
                if t.chars().count() > max_chars {
                    format!("{}…", t.chars().take(max_chars).collect::<String>())
                } else {
                    t.to_string()
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConversationType {
    #[default]
    Direct,
    Group,
    Community,
    Event,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joined_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_read_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unread_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: ConversationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unread_count: u32,
}

/// The logged-in user the session belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CurrentUser {
    pub id: String,
    pub name: String,
}

impl CurrentUser {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into() }
    }
}

/// Request body for `POST /conversations/{id}/messages`.
#[derive(Debug, Clone, Serialize)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
}

/// Request body for `POST /conversations`.
///
/// Direct and group chats list their participants; community and event chats are
/// attached to the owning entity instead.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateConversationRequest {
    #[serde(rename = "type")]
    pub kind: ConversationType,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub participant_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub community_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl CreateConversationRequest {
    pub fn direct(participant_id: impl Into<String>) -> Self {
        Self::with_participants(ConversationType::Direct, vec![participant_id.into()])
    }

    pub fn group(name: impl Into<String>, participant_ids: Vec<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::with_participants(ConversationType::Group, participant_ids)
        }
    }

    fn with_participants(kind: ConversationType, participant_ids: Vec<String>) -> Self {
        Self {
            kind,
            participant_ids,
            community_id: None,
            event_id: None,
            name: None,
            description: None,
        }
    }
}

/// Request body for `PATCH /messages/{id}`.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateMessageRequest {
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_decodes_with_defaults() {
        let json = r#"{
            "id": "m1",
            "sender_id": "u1",
            "content": "hi",
            "created_at": "2024-05-01T10:00:00Z"
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.message_type, MessageType::Text);
        assert!(!msg.is_deleted);
        assert!(msg.author.is_none());
        assert!(msg.conversation_id.is_empty());
    }

    #[test]
    fn conversation_type_uses_type_key() {
        let json = r#"{
            "id": "c1",
            "type": "group",
            "created_at": "2024-05-01T10:00:00Z",
            "updated_at": "2024-05-01T10:00:00Z",
            "unread_count": 3
        }"#;
        let conv: Conversation = serde_json::from_str(json).unwrap();
        assert_eq!(conv.kind, ConversationType::Group);
        assert_eq!(conv.unread_count, 3);
    }

    #[test]
    fn optimistic_messages_are_marked() {
        let msg = Message::optimistic("c1".into(), "u1".into(), "hello".into(), MessageType::Text);
        assert!(msg.is_optimistic());
        assert_eq!(msg.conversation_id, "c1");
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let mut msg = Message::optimistic("c1".into(), "u1".into(), "héllo wörld".into(), MessageType::Text);
        assert_eq!(msg.preview(5), "héllo…");
        msg.message_type = MessageType::Image;
        assert_eq!(msg.preview(5), "sent an image");
    }

    #[test]
    fn message_type_displays_lowercase() {
        assert_eq!(MessageType::Image.to_string(), "image");
        assert_eq!(serde_json::to_string(&MessageType::File).unwrap(), r#""file""#);
    }

    #[test]
    fn create_request_omits_unused_fields() {
        let body = serde_json::to_value(CreateConversationRequest::direct("u2")).unwrap();
        assert_eq!(body, serde_json::json!({ "type": "direct", "participant_ids": ["u2"] }));

        let event = CreateConversationRequest {
            event_id: Some("e1".into()),
            ..CreateConversationRequest::with_participants(ConversationType::Event, Vec::new())
        };
        assert_eq!(
            serde_json::to_value(event).unwrap(),
            serde_json::json!({ "type": "event", "event_id": "e1" })
        );
    }
}
