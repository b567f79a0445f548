use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Conversation, ConversationPatch, Message, NewMessage};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        StoreError::Database(format!("Database task failed: {}", e))
    }
}

/// Row-level access to the hosted `conversations` and `messages` collections.
///
/// Deleting a conversation removes its messages as well.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// All conversations owned by `user_id`, most recently updated first.
    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, StoreError>;

    async fn get_conversation(&self, id: &str) -> Result<Conversation, StoreError>;

    async fn insert_conversation(
        &self,
        user_id: &str,
        title: &str,
    ) -> Result<Conversation, StoreError>;

    async fn update_conversation(
        &self,
        id: &str,
        patch: &ConversationPatch,
    ) -> Result<Conversation, StoreError>;

    async fn delete_conversation(&self, id: &str) -> Result<(), StoreError>;

    /// Messages of a conversation, oldest first.
    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError>;

    /// The newest `limit` messages of a conversation, newest first.
    async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;

    async fn insert_message(&self, message: &NewMessage) -> Result<Message, StoreError>;
}
