use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use crate::models::{ConversationPatch, Message, NewMessage, Role};
use crate::providers::{AiResponder, HistoryEntry, ReplyRequest, ResponderError};
use crate::services::conversation::auto_title;
use crate::services::remote::{RemoteStore, StoreError};

pub const DEFAULT_HISTORY_LIMIT: usize = 10;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("AI error: {0}")]
    Responder(#[from] ResponderError),
}

/// Runs the send transaction: persist the user message, ask the responder,
/// persist the reply and bump the conversation.
pub struct ChatService {
    store: Arc<dyn RemoteStore>,
    responder: Arc<dyn AiResponder>,
    history_limit: usize,
}

impl ChatService {
    pub fn new(store: Arc<dyn RemoteStore>, responder: Arc<dyn AiResponder>) -> Self {
        Self {
            store,
            responder,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Recent messages in chronological order, including the one just stored.
    async fn history(&self, conversation_id: &str) -> Result<Vec<HistoryEntry>, StoreError> {
        let mut recent = self
            .store
            .recent_messages(conversation_id, self.history_limit)
            .await?;
        recent.reverse();
        Ok(recent.iter().map(HistoryEntry::from).collect())
    }

    pub async fn send(&self, conversation_id: &str, content: &str) -> Result<Message, ChatError> {
        self.store
            .insert_message(&NewMessage::new(conversation_id, Role::User, content))
            .await?;

        let history = self.history(conversation_id).await?;
        tracing::debug!(
            "Requesting reply for {} with {} history entries",
            conversation_id,
            history.len()
        );

        let reply = self
            .responder
            .reply(ReplyRequest {
                message: content.to_string(),
                history,
            })
            .await?;

        let assistant = self
            .store
            .insert_message(&NewMessage::new(conversation_id, Role::Assistant, &reply))
            .await?;

        // The reply is already stored; a failed title bump is not worth failing the send.
        if let Err(e) = self.bump_conversation(conversation_id, content).await {
            tracing::warn!("Failed to update conversation {}: {}", conversation_id, e);
        }

        Ok(assistant)
    }

    async fn bump_conversation(&self, conversation_id: &str, content: &str) -> Result<(), StoreError> {
        let conversation = self.store.get_conversation(conversation_id).await?;
        let now = Utc::now();
        let patch = if conversation.has_default_title() {
            ConversationPatch::retitle(auto_title(content), now)
        } else {
            ConversationPatch::touch(now)
        };
        self.store.update_conversation(conversation_id, &patch).await?;
        Ok(())
    }
}
