use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::traits::AiResponder;
use super::types::{reply_text, ReplyRequest, ResponderError};
use crate::http;

/// Posts each message with its history to a fixed webhook URL and waits for a
/// single JSON reply.
pub struct WebhookResponder {
    client: Client,
    url: Option<String>,
}

impl WebhookResponder {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ResponderError> {
        Self::build(Some(url.into()), timeout)
    }

    /// A responder without a target; every reply fails with `NotConfigured`.
    pub fn disabled(timeout: Duration) -> Result<Self, ResponderError> {
        Self::build(None, timeout)
    }

    fn build(url: Option<String>, timeout: Duration) -> Result<Self, ResponderError> {
        let client = http::client(timeout).map_err(|e| ResponderError::Network(e.to_string()))?;
        Ok(Self { client, url })
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }

    fn parse_reply(body: &str) -> Result<String, ResponderError> {
        let parsed: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| ResponderError::InvalidResponse(e.to_string()))?;
        Ok(reply_text(&parsed))
    }
}

#[async_trait]
impl AiResponder for WebhookResponder {
    async fn reply(&self, request: ReplyRequest) -> Result<String, ResponderError> {
        let url = self.url.as_deref().ok_or(ResponderError::NotConfigured)?;
        tracing::debug!(
            "Posting message to webhook with {} history entries",
            request.history.len()
        );

        let response = self
            .client
            .post(url)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| ResponderError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResponderError::RequestFailed {
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| ResponderError::Network(e.to_string()))?;

        Self::parse_reply(&body)
    }
}
