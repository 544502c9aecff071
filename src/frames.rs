//! Wire frames exchanged over the realtime socket.
//!
//! Every text frame is a JSON object discriminated by its `type` field. Inbound frames
//! decode into [`InboundFrame`]; a `type` this client does not know yet decodes to
//! [`InboundFrame::Unknown`] so that callers still match exhaustively.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Result;
use crate::models::{Author, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    pub fn is_online(&self) -> bool {
        matches!(self, PresenceStatus::Online)
    }
}

/// Server → client frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    NewMessage {
        conversation_id: String,
        sender_id: String,
        message: Message,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        author: Option<Author>,
    },
    UserStatus {
        user_id: String,
        status: PresenceStatus,
    },
    TypingEvent {
        conversation_id: String,
        user_id: String,
        is_typing: bool,
    },
    /// A participant marked the conversation as read.
    MessagesRead {
        conversation_id: String,
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        read_at: Option<DateTime<Utc>>,
    },
    NewComment {
        comment: Value,
    },
    NewPost {
        post: Value,
    },
    PostUpdated {
        post: Value,
    },
    PostDeleted {
        post_id: String,
    },
    NewReaction {
        reaction: Value,
    },
    #[serde(other)]
    Unknown,
}

impl InboundFrame {
    /// Wire name of the frame, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundFrame::NewMessage { .. } => "new_message",
            InboundFrame::UserStatus { .. } => "user_status",
            InboundFrame::TypingEvent { .. } => "typing_event",
            InboundFrame::MessagesRead { .. } => "messages_read",
            InboundFrame::NewComment { .. } => "new_comment",
            InboundFrame::NewPost { .. } => "new_post",
            InboundFrame::PostUpdated { .. } => "post_updated",
            InboundFrame::PostDeleted { .. } => "post_deleted",
            InboundFrame::NewReaction { .. } => "new_reaction",
            InboundFrame::Unknown => "unknown",
        }
    }
}

/// Decodes one text frame. Malformed JSON and missing fields are
/// [`RealtimeError::Decode`](crate::errors::RealtimeError::Decode).
pub fn decode(raw: &str) -> Result<InboundFrame> {
    Ok(serde_json::from_str(raw)?)
}

/// Client → server frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    TypingEvent {
        conversation_id: String,
        user_id: String,
        is_typing: bool,
    },
}

impl OutboundFrame {
    pub fn typing(
        conversation_id: impl Into<String>,
        user_id: impl Into<String>,
        is_typing: bool,
    ) -> Self {
        OutboundFrame::TypingEvent {
            conversation_id: conversation_id.into(),
            user_id: user_id.into(),
            is_typing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RealtimeError;
    use crate::models::MessageType;
    use serde_json::json;

    #[test]
    fn decodes_new_message() {
        let raw = json!({
            "type": "new_message",
            "conversation_id": "c1",
            "sender_id": "u2",
            "message": {
                "id": "m1",
                "sender_id": "u2",
                "content": "object/key.png",
                "message_type": "image",
                "created_at": "2024-05-01T10:00:00Z",
                "is_deleted": false,
                "author": { "id": "u2", "name": "Linh" }
            },
            "author": { "name": "Linh" }
        })
        .to_string();

        match decode(&raw).unwrap() {
            InboundFrame::NewMessage { conversation_id, sender_id, message, author } => {
                assert_eq!(conversation_id, "c1");
                assert_eq!(sender_id, "u2");
                assert_eq!(message.message_type, MessageType::Image);
                assert_eq!(author.map(|a| a.name).as_deref(), Some("Linh"));
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn user_status_ignores_extra_fields() {
        let raw = r#"{"type":"user_status","user_id":"u1","status":"offline","timestamp":"2024-05-01T10:00:00Z"}"#;
        assert_eq!(
            decode(raw).unwrap(),
            InboundFrame::UserStatus { user_id: "u1".into(), status: PresenceStatus::Offline }
        );
    }

    #[test]
    fn unknown_type_is_explicit_variant() {
        let frame = decode(r#"{"type":"unknown_future_type","foo":"bar"}"#).unwrap();
        assert_eq!(frame, InboundFrame::Unknown);
        assert_eq!(frame.kind(), "unknown");
    }

    #[test]
    fn malformed_frames_fail_to_decode() {
        assert!(matches!(decode("not json"), Err(RealtimeError::Decode(_))));
        assert!(decode(r#"{"conversation_id":"c1"}"#).is_err());
        assert!(decode(r#"{"type":"typing_event","conversation_id":"c1"}"#).is_err());
        assert!(decode(r#"{"type":"user_status","user_id":"u1","status":"away"}"#).is_err());
    }

    #[test]
    fn feed_payloads_are_kept_verbatim() {
        let raw = r#"{"type":"new_reaction","reaction":{"post_id":"p1","kind":"like","n":[1,2]}}"#;
        match decode(raw).unwrap() {
            InboundFrame::NewReaction { reaction } => {
                assert_eq!(reaction, json!({"post_id":"p1","kind":"like","n":[1,2]}));
            }
            other => panic!("unexpected frame {other:?}"),
        }
        assert_eq!(
            decode(r#"{"type":"post_deleted","post_id":"p9"}"#).unwrap(),
            InboundFrame::PostDeleted { post_id: "p9".into() }
        );
    }

    #[test]
    fn typing_frame_wire_shape() {
        let frame = OutboundFrame::typing("c1", "u1", true);
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"type":"typing_event","conversation_id":"c1","user_id":"u1","is_typing":true})
        );
    }
}
