use chrono::{DateTime, TimeZone};

use crate::models::Conversation;
use crate::services::conversation::group_by_recency;
use crate::store::ChatState;

// --- SidebarItem: section headers vs conversation rows ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SidebarItem {
    Header(&'static str), // "Today", "Yesterday", etc.
    Conversation {
        conversation: Conversation,
        active: bool,
    },
}

/// Flattened sidebar contents: a header before each non-empty recency section.
#[derive(Debug, Clone, Default)]
pub struct SidebarView {
    pub items: Vec<SidebarItem>,
}

impl SidebarView {
    pub fn from_state<Tz: TimeZone>(state: &ChatState, now: &DateTime<Tz>) -> Self {
        let active = state.active_conversation_id.as_deref();
        let mut items = Vec::new();
        for (group, conversations) in group_by_recency(&state.conversations, now) {
            items.push(SidebarItem::Header(group.label()));
            items.extend(conversations.into_iter().map(|conversation| {
                let active = active == Some(conversation.id.as_str());
                SidebarItem::Conversation {
                    conversation,
                    active,
                }
            }));
        }
        Self { items }
    }

    /// Conversation rows in display order.
    pub fn conversations(&self) -> impl Iterator<Item = &Conversation> {
        self.items.iter().filter_map(|item| match item {
            SidebarItem::Conversation { conversation, .. } => Some(conversation),
            SidebarItem::Header(_) => None,
        })
    }
}

/// In-place title editing for one sidebar row.
#[derive(Debug, Clone)]
pub struct RenameDraft {
    original: String,
    pub text: String,
}

impl RenameDraft {
    pub fn begin(conversation: &Conversation) -> Self {
        Self {
            original: conversation.title.clone(),
            text: conversation.title.clone(),
        }
    }

    /// The title to submit, if the edit produced a real change.
    pub fn commit(self) -> Option<String> {
        let title = self.text.trim();
        if title.is_empty() || title == self.original {
            return None;
        }
        Some(title.to_string())
    }
}
