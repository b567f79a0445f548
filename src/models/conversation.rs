use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Title every conversation starts with until it is renamed or auto-titled.
pub const DEFAULT_TITLE: &str = "New conversation";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn has_default_title(&self) -> bool {
        self.title == DEFAULT_TITLE
    }
}

/// Partial update applied to a conversation row. `updated_at` is always set.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationPatch {
    pub fn touch(now: DateTime<Utc>) -> Self {
        Self {
            title: None,
            updated_at: now,
        }
    }

    pub fn retitle(title: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            title: Some(title.into()),
            updated_at: now,
        }
    }
}
