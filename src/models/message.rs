use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const PENDING_PREFIX: &str = "temp-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Local user message shown before the backend has confirmed it.
    pub fn pending(conversation_id: &str, content: &str) -> Self {
        Self {
            id: format!("{}{}", PENDING_PREFIX, Uuid::new_v4()),
            conversation_id: conversation_id.to_string(),
            role: Role::User,
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.id.starts_with(PENDING_PREFIX)
    }
}

/// Row payload for inserting a message; id and timestamp are assigned remotely.
#[derive(Debug, Clone, Serialize)]
pub struct NewMessage {
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
}

impl NewMessage {
    pub fn new(conversation_id: &str, role: Role, content: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_wire_format() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
        let role: Role = serde_json::from_str("\"user\"").unwrap();
        assert_eq!(role, Role::User);
        assert_eq!(Role::from_str("system"), None);
    }

    #[test]
    fn test_pending_message() {
        let msg = Message::pending("c1", "Hello");
        assert!(msg.is_pending());
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.conversation_id, "c1");

        let other = Message::pending("c1", "Hello");
        assert_ne!(msg.id, other.id);
    }

    #[test]
    fn test_message_row_decoding() {
        let json = r#"{
            "id": "8b1f",
            "conversation_id": "c1",
            "role": "assistant",
            "content": "Hi there",
            "created_at": "2026-03-01T10:00:00.123456+00:00"
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.role, Role::Assistant);
        assert!(!msg.is_pending());
    }
}
