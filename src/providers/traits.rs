use async_trait::async_trait;

use super::types::{ReplyRequest, ResponderError};

/// Produces the assistant's reply for one outgoing user message.
#[async_trait]
pub trait AiResponder: Send + Sync {
    async fn reply(&self, request: ReplyRequest) -> Result<String, ResponderError>;
}
