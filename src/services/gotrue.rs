use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;
use url::Url;

use crate::http;
use crate::models::{Session, User};
use crate::services::auth::{AuthError, AuthEvent, AuthProvider, SessionState};
use crate::services::events::Subscription;

// --- Wire types ---

#[derive(Debug, Deserialize)]
struct UserMetadata {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RemoteUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: Option<UserMetadata>,
}

impl From<RemoteUser> for User {
    fn from(remote: RemoteUser) -> Self {
        let name = remote.user_metadata.and_then(|m| m.name);
        User::normalized(&remote.id, remote.email.as_deref(), name.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    /// Lifetime in seconds.
    #[serde(default)]
    expires_in: Option<i64>,
    /// Unix timestamp; preferred over `expires_in` when present.
    #[serde(default)]
    expires_at: Option<i64>,
    user: RemoteUser,
}

fn expiry(expires_at: Option<i64>, expires_in: Option<i64>) -> Option<DateTime<Utc>> {
    expires_at
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .or_else(|| expires_in.map(|secs| Utc::now() + chrono::Duration::seconds(secs)))
}

/// Sign-up answers with a full session when confirmation is disabled, or
/// with the bare user when an e-mail confirmation is pending.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(TokenResponse),
    User(RemoteUser),
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default, alias = "error_description", alias = "msg")]
    message: Option<String>,
}

/// Client for a GoTrue-style auth API under `<backend>/auth/v1`.
pub struct GoTrueAuth {
    client: Client,
    base_url: String,
    anon_key: String,
    state: SessionState,
    /// Serializes refreshes so a rotating refresh token is spent once.
    refresh_lock: AsyncMutex<()>,
}

impl GoTrueAuth {
    pub fn new(backend_url: &str, anon_key: &str, timeout: Duration) -> Result<Self, AuthError> {
        let client = http::client(timeout).map_err(|e| AuthError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: format!("{}/auth/v1", backend_url.trim_end_matches('/')),
            anon_key: anon_key.to_string(),
            state: SessionState::default(),
            refresh_lock: AsyncMutex::new(()),
        })
    }

    /// Store the session from a token grant and return its user.
    fn install(&self, token: TokenResponse) -> User {
        let user: User = token.user.into();
        self.state.set(Some(Session {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: expiry(token.expires_at, token.expires_in),
            user: user.clone(),
        }));
        user
    }

    async fn grant(&self, req: RequestBuilder) -> Result<TokenResponse, AuthError> {
        let response = self
            .with_keys(req, None)
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))
    }

    /// Exchange the refresh token for a new session. A refresh token the
    /// server refuses ends the local session; network failures keep it.
    /// Callers hold `refresh_lock`.
    async fn refresh_session(&self, refresh_token: &str) -> Result<String, AuthError> {
        let req = self
            .client
            .post(self.endpoint("token"))
            .query(&[("grant_type", "refresh_token")])
            .json(&json!({ "refresh_token": refresh_token }));

        match self.grant(req).await {
            Ok(token) => {
                let access_token = token.access_token.clone();
                self.install(token);
                tracing::debug!("Session refreshed");
                Ok(access_token)
            }
            Err(e @ (AuthError::Rejected { .. } | AuthError::InvalidCredentials)) => {
                tracing::warn!("Refresh token rejected, ending session: {}", e);
                self.state.set(None);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn with_keys(&self, req: RequestBuilder, token: Option<&str>) -> RequestBuilder {
        let bearer = token.unwrap_or(&self.anon_key);
        req.header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", bearer))
    }

    async fn check(response: Response) -> Result<Response, AuthError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or_else(|| "Request failed".to_string());

        if status == StatusCode::BAD_REQUEST && message.to_lowercase().contains("invalid login") {
            return Err(AuthError::InvalidCredentials);
        }
        Err(AuthError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    async fn fetch_user(&self, token: &str) -> Result<User, AuthError> {
        let response = self
            .with_keys(self.client.get(self.endpoint("user")), Some(token))
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;
        let remote: RemoteUser = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        Ok(remote.into())
    }

    /// Install the session carried by a password-recovery redirect link.
    pub async fn restore_from_link(&self, link: &str) -> Result<User, AuthError> {
        let tokens = parse_recovery_fragment(link)?;
        let user = self
            .fetch_user(&tokens.access_token)
            .await
            .map_err(|e| match e {
                AuthError::Rejected { status: 401, .. } | AuthError::Rejected { status: 403, .. } => {
                    AuthError::InvalidRecoveryLink
                }
                other => other,
            })?;

        self.state.set(Some(Session {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at: expiry(None, tokens.expires_in),
            user: user.clone(),
        }));
        Ok(user)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct RecoveryTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
}

/// Read the tokens from a `#...&type=recovery` redirect fragment.
pub fn parse_recovery_fragment(link: &str) -> Result<RecoveryTokens, AuthError> {
    let url = Url::parse(link).map_err(|_| AuthError::InvalidRecoveryLink)?;
    let fragment = url.fragment().ok_or(AuthError::InvalidRecoveryLink)?;

    let mut kind = None;
    let mut access_token = None;
    let mut refresh_token = None;
    let mut expires_in = None;
    for (key, value) in url::form_urlencoded::parse(fragment.as_bytes()) {
        match key.as_ref() {
            "type" => kind = Some(value.into_owned()),
            "access_token" => access_token = Some(value.into_owned()),
            "refresh_token" => refresh_token = Some(value.into_owned()),
            "expires_in" => expires_in = value.parse().ok(),
            _ => {}
        }
    }

    match (kind.as_deref(), access_token) {
        (Some("recovery"), Some(access_token)) if !access_token.is_empty() => Ok(RecoveryTokens {
            access_token,
            refresh_token,
            expires_in,
        }),
        _ => Err(AuthError::InvalidRecoveryLink),
    }
}

#[async_trait]
impl AuthProvider for GoTrueAuth {
    async fn sign_in(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let req = self
            .client
            .post(self.endpoint("token"))
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email, "password": password }));

        let token = self.grant(req).await?;
        Ok(self.install(token))
    }

    async fn sign_up(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<Option<User>, AuthError> {
        let req = self.client.post(self.endpoint("signup")).json(&json!({
            "email": email,
            "password": password,
            "data": { "name": name },
        }));

        let response = self
            .with_keys(req, None)
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let body: SignUpResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;

        match body {
            SignUpResponse::Session(token) => Ok(Some(self.install(token))),
            SignUpResponse::User(_) => Ok(None),
        }
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let Some(session) = self.state.get() else {
            return Ok(());
        };

        let result = self
            .with_keys(
                self.client.post(self.endpoint("logout")),
                Some(&session.access_token),
            )
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()));

        // The local session ends regardless of what the server answered.
        self.state.set(None);

        Self::check(result?).await.map(|_| ())
    }

    async fn request_password_reset(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> Result<(), AuthError> {
        let mut req = self
            .client
            .post(self.endpoint("recover"))
            .json(&json!({ "email": email }));
        if let Some(target) = redirect_to {
            req = req.query(&[("redirect_to", target)]);
        }

        let response = self
            .with_keys(req, None)
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;
        Self::check(response).await.map(|_| ())
    }

    async fn update_password(&self, new_password: &str) -> Result<(), AuthError> {
        let session = self.state.get().ok_or(AuthError::NotSignedIn)?;
        let req = self
            .client
            .put(self.endpoint("user"))
            .json(&json!({ "password": new_password }));

        let response = self
            .with_keys(req, Some(&session.access_token))
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;
        Self::check(response).await.map(|_| ())
    }

    async fn current_session(&self) -> Result<Option<Session>, AuthError> {
        Ok(self.state.get())
    }

    fn access_token(&self) -> Option<String> {
        self.state.get().map(|s| s.access_token)
    }

    async fn fresh_access_token(&self) -> Option<String> {
        let session = self.state.get()?;
        if !session.expires_soon(Utc::now()) || !session.can_refresh() {
            return Some(session.access_token);
        }

        let _guard = self.refresh_lock.lock().await;
        // Another caller may have refreshed while we waited.
        let session = self.state.get()?;
        if !session.expires_soon(Utc::now()) {
            return Some(session.access_token);
        }
        let Some(refresh_token) = session.refresh_token else {
            return Some(session.access_token);
        };

        match self.refresh_session(&refresh_token).await {
            Ok(token) => Some(token),
            Err(e) => {
                tracing::warn!("Session refresh failed: {}", e);
                self.access_token()
            }
        }
    }

    async fn renew_after_rejection(&self, token: &str) -> Result<bool, AuthError> {
        let _guard = self.refresh_lock.lock().await;
        let Some(session) = self.state.get() else {
            return Ok(false);
        };
        if session.access_token != token {
            return Ok(true);
        }
        let Some(refresh_token) = session.refresh_token.as_deref() else {
            return Ok(false);
        };
        self.refresh_session(refresh_token).await?;
        Ok(true)
    }

    fn subscribe(&self, handler: Box<dyn Fn(&AuthEvent) + Send + Sync>) -> Subscription {
        self.state.subscribe(handler)
    }
}
