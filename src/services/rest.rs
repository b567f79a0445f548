use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::http;
use crate::models::{Conversation, ConversationPatch, Message, NewMessage};
use crate::services::auth::AuthProvider;
use crate::services::remote::{RemoteStore, StoreError};

const CONVERSATIONS: &str = "conversations";
const MESSAGES: &str = "messages";

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// Row API client for a PostgREST-style backend under `<backend>/rest/v1`.
///
/// Requests carry the signed-in user's access token so row-level policies
/// apply; the anon key is used before sign-in. A request refused with 401 is
/// retried once after the auth provider renews the session.
pub struct RestStore {
    client: Client,
    base_url: String,
    anon_key: String,
    auth: Arc<dyn AuthProvider>,
}

impl RestStore {
    pub fn new(
        backend_url: &str,
        anon_key: &str,
        auth: Arc<dyn AuthProvider>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = http::client(timeout).map_err(|e| StoreError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: format!("{}/rest/v1", backend_url.trim_end_matches('/')),
            anon_key: anon_key.to_string(),
            auth,
        })
    }

    /// Build a table URL with PostgREST query parameters (`id=eq.x`, `order=...`).
    fn table_url(&self, table: &str, params: &[(&str, String)]) -> Result<Url, StoreError> {
        let mut url = Url::parse(&format!("{}/{}", self.base_url, table))
            .map_err(|e| StoreError::Network(format!("Invalid backend URL: {}", e)))?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn authorize(&self, req: RequestBuilder, token: Option<&str>) -> RequestBuilder {
        let bearer = token.unwrap_or(&self.anon_key);
        req.header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", bearer))
    }

    async fn dispatch(
        &self,
        req: RequestBuilder,
        token: Option<&str>,
    ) -> Result<Response, StoreError> {
        self.authorize(req, token)
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, StoreError> {
        let token = self.auth.fresh_access_token().await;
        let retry = req.try_clone();
        let response = self.dispatch(req, token.as_deref()).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            if let (Some(token), Some(retry)) = (token.as_deref(), retry) {
                match self.auth.renew_after_rejection(token).await {
                    Ok(true) => {
                        tracing::debug!("Retrying request with a renewed session");
                        let renewed = self.auth.access_token();
                        let response = self.dispatch(retry, renewed.as_deref()).await?;
                        return Self::check(response).await;
                    }
                    Ok(false) => {}
                    Err(e) => tracing::warn!("Could not renew session: {}", e),
                }
            }
        }

        Self::check(response).await
    }

    async fn check(response: Response) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or_else(|| "Request failed".to_string());
        Err(StoreError::Status {
            status: status.as_u16(),
            message,
        })
    }

    async fn rows<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<Vec<T>, StoreError> {
        self.send(req)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::InvalidResponse(e.to_string()))
    }

    async fn single<T: DeserializeOwned>(
        &self,
        req: RequestBuilder,
        entity: &'static str,
        id: &str,
    ) -> Result<T, StoreError> {
        self.rows(req)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound {
                entity,
                id: id.to_string(),
            })
    }

    fn eq(value: &str) -> String {
        format!("eq.{}", value)
    }
}

#[async_trait]
impl RemoteStore for RestStore {
    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, StoreError> {
        let url = self.table_url(
            CONVERSATIONS,
            &[
                ("select", "*".to_string()),
                ("user_id", Self::eq(user_id)),
                ("order", "updated_at.desc".to_string()),
            ],
        )?;
        self.rows(self.client.get(url)).await
    }

    async fn get_conversation(&self, id: &str) -> Result<Conversation, StoreError> {
        let url = self.table_url(
            CONVERSATIONS,
            &[("select", "*".to_string()), ("id", Self::eq(id))],
        )?;
        self.single(self.client.get(url), "conversation", id).await
    }

    async fn insert_conversation(
        &self,
        user_id: &str,
        title: &str,
    ) -> Result<Conversation, StoreError> {
        let url = self.table_url(CONVERSATIONS, &[])?;
        let req = self
            .client
            .post(url)
            .header("Prefer", "return=representation")
            .json(&json!({ "user_id": user_id, "title": title }));
        self.single(req, "conversation", user_id).await
    }

    async fn update_conversation(
        &self,
        id: &str,
        patch: &ConversationPatch,
    ) -> Result<Conversation, StoreError> {
        let url = self.table_url(CONVERSATIONS, &[("id", Self::eq(id))])?;
        let req = self
            .client
            .patch(url)
            .header("Prefer", "return=representation")
            .json(patch);
        self.single(req, "conversation", id).await
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), StoreError> {
        let url = self.table_url(CONVERSATIONS, &[("id", Self::eq(id))])?;
        self.send(self.client.delete(url)).await?;
        Ok(())
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError> {
        let url = self.table_url(
            MESSAGES,
            &[
                ("select", "*".to_string()),
                ("conversation_id", Self::eq(conversation_id)),
                ("order", "created_at.asc".to_string()),
            ],
        )?;
        self.rows(self.client.get(url)).await
    }

    async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let url = self.table_url(
            MESSAGES,
            &[
                ("select", "*".to_string()),
                ("conversation_id", Self::eq(conversation_id)),
                ("order", "created_at.desc".to_string()),
                ("limit", limit.to_string()),
            ],
        )?;
        self.rows(self.client.get(url)).await
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<Message, StoreError> {
        let url = self.table_url(MESSAGES, &[])?;
        let req = self
            .client
            .post(url)
            .header("Prefer", "return=representation")
            .json(message);
        self.single(req, "message", &message.conversation_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::scripted::ScriptedServer;
    use crate::services::auth::MemoryAuth;
    use crate::services::gotrue::GoTrueAuth;

    fn store() -> RestStore {
        RestStore::new(
            "https://db.example.com/",
            "anon-key",
            Arc::new(MemoryAuth::new()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_table_url_with_filters() {
        let url = store()
            .table_url(
                MESSAGES,
                &[
                    ("conversation_id", RestStore::eq("c 1")),
                    ("order", "created_at.desc".to_string()),
                    ("limit", 10.to_string()),
                ],
            )
            .unwrap();
        assert_eq!(url.path(), "/rest/v1/messages");

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("conversation_id".to_string(), "eq.c 1".to_string()),
                ("order".to_string(), "created_at.desc".to_string()),
                ("limit".to_string(), "10".to_string()),
            ]
        );
    }

    #[test]
    fn test_table_url_without_filters() {
        let url = store().table_url(CONVERSATIONS, &[]).unwrap();
        assert_eq!(url.as_str(), "https://db.example.com/rest/v1/conversations");
    }

    #[test]
    fn test_patch_body_omits_missing_title() {
        let now = chrono::Utc::now();
        let body = serde_json::to_value(ConversationPatch::touch(now)).unwrap();
        assert!(body.get("title").is_none());
        assert!(body.get("updated_at").is_some());

        let body = serde_json::to_value(ConversationPatch::retitle("Trip", now)).unwrap();
        assert_eq!(body["title"], "Trip");
    }

    #[tokio::test]
    async fn test_error_status_carries_backend_message() {
        let server = ScriptedServer::start(vec![(
            403,
            r#"{"code": "42501", "message": "new row violates row-level security policy"}"#,
        )])
        .await;
        let store = RestStore::new(
            &server.url,
            "anon-key",
            Arc::new(MemoryAuth::new()),
            Duration::from_secs(5),
        )
        .unwrap();

        let err = store.insert_conversation("u1", "New").await.unwrap_err();
        match err {
            StoreError::Status { status, message } => {
                assert_eq!(status, 403);
                assert_eq!(message, "new row violates row-level security policy");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let sent = &server.requests()[0];
        assert_eq!(sent.request_line, "POST /rest/v1/conversations HTTP/1.1");
        assert_eq!(sent.header("prefer"), Some("return=representation"));
        assert_eq!(sent.header("authorization"), Some("Bearer anon-key"));
        assert_eq!(sent.json()["title"], "New");
    }

    #[tokio::test]
    async fn test_non_json_error_body() {
        let server = ScriptedServer::start(vec![(502, "<html>Bad gateway</html>")]).await;
        let store = RestStore::new(
            &server.url,
            "anon-key",
            Arc::new(MemoryAuth::new()),
            Duration::from_secs(5),
        )
        .unwrap();

        let err = store.list_messages("c1").await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Status { status: 502, ref message } if message == "Request failed"
        ));
    }

    #[tokio::test]
    async fn test_unauthorized_request_is_retried_after_refresh() {
        let sign_in = r#"{"access_token": "old", "refresh_token": "r1", "expires_in": 3600,
            "user": {"id": "u1", "email": "ada@example.com"}}"#;
        let refreshed = r#"{"access_token": "new", "refresh_token": "r2", "expires_in": 3600,
            "user": {"id": "u1", "email": "ada@example.com"}}"#;
        let server = ScriptedServer::start(vec![
            (200, sign_in),
            (401, r#"{"message": "JWT expired"}"#),
            (200, refreshed),
            (200, "[]"),
        ])
        .await;

        let auth =
            Arc::new(GoTrueAuth::new(&server.url, "anon-key", Duration::from_secs(5)).unwrap());
        auth.sign_in("ada@example.com", "secret1").await.unwrap();
        let store = RestStore::new(&server.url, "anon-key", auth.clone(), Duration::from_secs(5))
            .unwrap();

        let conversations = store.list_conversations("u1").await.unwrap();
        assert!(conversations.is_empty());

        let requests = server.requests();
        assert_eq!(requests.len(), 4);
        assert_eq!(requests[1].header("authorization"), Some("Bearer old"));
        assert!(requests[2].request_line.contains("grant_type=refresh_token"));
        assert_eq!(requests[3].header("authorization"), Some("Bearer new"));
        assert!(requests[3].request_line.starts_with("GET /rest/v1/conversations?"));
    }

    #[tokio::test]
    async fn test_unauthorized_without_session_is_not_retried() {
        let server = ScriptedServer::start(vec![(401, r#"{"message": "JWT expired"}"#)]).await;
        let store = RestStore::new(
            &server.url,
            "anon-key",
            Arc::new(MemoryAuth::new()),
            Duration::from_secs(5),
        )
        .unwrap();

        let err = store.get_conversation("c1").await.unwrap_err();
        assert!(matches!(err, StoreError::Status { status: 401, .. }));
        assert_eq!(server.requests().len(), 1);
    }
}
