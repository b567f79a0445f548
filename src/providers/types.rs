use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Message, Role};

/// Reply used when the webhook answers successfully but carries no text.
pub const FALLBACK_REPLY: &str = "Sorry, I couldn't generate a response.";

#[derive(Debug, Error)]
pub enum ResponderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request failed: HTTP {status}")]
    RequestFailed { status: u16 },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("No webhook URL configured")]
    NotConfigured,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl From<&Message> for HistoryEntry {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role,
            content: msg.content.clone(),
        }
    }
}

/// Body posted to the webhook for each outgoing user message.
#[derive(Debug, Clone, Serialize)]
pub struct ReplyRequest {
    pub message: String,
    pub history: Vec<HistoryEntry>,
}

/// Extract the reply text from a webhook response body. The text may sit
/// under `output` or `response`; empty or non-string values are skipped.
pub fn reply_text(body: &serde_json::Value) -> String {
    ["output", "response"]
        .iter()
        .filter_map(|key| body.get(key).and_then(|v| v.as_str()))
        .find(|text| !text.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| FALLBACK_REPLY.to_string())
}
