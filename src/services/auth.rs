use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Session, User};
use crate::services::events::{EventHub, Subscription};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Not signed in")]
    NotSignedIn,

    #[error("This password reset link is invalid or has expired")]
    InvalidRecoveryLink,

    #[error("{0}")]
    Validation(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Session changes as seen by subscribers: the signed-in user, or `None`.
pub type AuthEvent = Option<User>;

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<User, AuthError>;

    /// Register an account. Returns the user when the provider signs them in
    /// right away, `None` when e-mail confirmation is pending.
    async fn sign_up(&self, name: &str, email: &str, password: &str)
        -> Result<Option<User>, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;

    async fn request_password_reset(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> Result<(), AuthError>;

    async fn update_password(&self, new_password: &str) -> Result<(), AuthError>;

    async fn current_session(&self) -> Result<Option<Session>, AuthError>;

    /// Bearer token for row-level requests, if a session is active.
    fn access_token(&self) -> Option<String>;

    /// Like `access_token`, but renews a session that is about to expire first.
    async fn fresh_access_token(&self) -> Option<String> {
        self.access_token()
    }

    /// The backend refused `token`. Returns whether a newer token is now
    /// available to retry with.
    async fn renew_after_rejection(&self, token: &str) -> Result<bool, AuthError> {
        let _ = token;
        Ok(false)
    }

    /// Notify `handler` on every session transition.
    fn subscribe(&self, handler: Box<dyn Fn(&AuthEvent) + Send + Sync>) -> Subscription;
}

/// Shared session slot that only reports real transitions to subscribers.
#[derive(Clone, Default)]
pub struct SessionState {
    session: Arc<Mutex<Option<Session>>>,
    events: EventHub<AuthEvent>,
}

impl SessionState {
    pub fn get(&self) -> Option<Session> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the session; emits only when the signed-in user id changes.
    pub fn set(&self, session: Option<Session>) {
        let (changed, event) = {
            let mut slot = self.session.lock().unwrap_or_else(PoisonError::into_inner);
            let before = slot.as_ref().map(|s| s.user.id.clone());
            let after = session.as_ref().map(|s| s.user.id.clone());
            let event = session.as_ref().map(|s| s.user.clone());
            *slot = session;
            (before != after, event)
        };
        if changed {
            tracing::info!(signed_in = event.is_some(), "Session changed");
            self.events.emit(&event);
        }
    }

    pub fn subscribe(&self, handler: Box<dyn Fn(&AuthEvent) + Send + Sync>) -> Subscription {
        self.events.subscribe(handler)
    }
}

struct LocalAccount {
    user: User,
    password: String,
}

/// In-process accounts for offline runs and tests.
#[derive(Clone, Default)]
pub struct MemoryAuth {
    accounts: Arc<Mutex<HashMap<String, LocalAccount>>>,
    state: SessionState,
}

impl MemoryAuth {
    pub fn new() -> Self {
        Self::default()
    }

    fn accounts(&self) -> std::sync::MutexGuard<'_, HashMap<String, LocalAccount>> {
        self.accounts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_session(user: User) -> Session {
        Session {
            access_token: Uuid::new_v4().to_string(),
            refresh_token: None,
            expires_at: None,
            user,
        }
    }
}

#[async_trait]
impl AuthProvider for MemoryAuth {
    async fn sign_in(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let user = {
            let accounts = self.accounts();
            match accounts.get(&email.to_lowercase()) {
                Some(account) if account.password == password => account.user.clone(),
                _ => return Err(AuthError::InvalidCredentials),
            }
        };
        self.state.set(Some(Self::open_session(user.clone())));
        Ok(user)
    }

    async fn sign_up(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<Option<User>, AuthError> {
        let key = email.to_lowercase();
        let user = {
            let mut accounts = self.accounts();
            if accounts.contains_key(&key) {
                return Err(AuthError::Rejected {
                    status: 422,
                    message: "User already registered".to_string(),
                });
            }
            let user = User::normalized(&Uuid::new_v4().to_string(), Some(email), Some(name));
            accounts.insert(
                key,
                LocalAccount {
                    user: user.clone(),
                    password: password.to_string(),
                },
            );
            user
        };
        self.state.set(Some(Self::open_session(user.clone())));
        Ok(Some(user))
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.state.set(None);
        Ok(())
    }

    async fn request_password_reset(
        &self,
        email: &str,
        _redirect_to: Option<&str>,
    ) -> Result<(), AuthError> {
        tracing::debug!("Password reset requested for {}", email);
        Ok(())
    }

    async fn update_password(&self, new_password: &str) -> Result<(), AuthError> {
        let session = self.state.get().ok_or(AuthError::NotSignedIn)?;
        let mut accounts = self.accounts();
        let account = accounts
            .get_mut(&session.user.email.to_lowercase())
            .ok_or(AuthError::NotSignedIn)?;
        account.password = new_password.to_string();
        Ok(())
    }

    async fn current_session(&self) -> Result<Option<Session>, AuthError> {
        Ok(self.state.get())
    }

    fn access_token(&self) -> Option<String> {
        self.state.get().map(|s| s.access_token)
    }

    fn subscribe(&self, handler: Box<dyn Fn(&AuthEvent) + Send + Sync>) -> Subscription {
        self.state.subscribe(handler)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_sign_up_then_sign_in() {
        let auth = MemoryAuth::new();
        let user = auth
            .sign_up("Ada", "ada@example.com", "secret1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.name, "Ada");
        assert!(auth.access_token().is_some());

        auth.sign_out().await.unwrap();
        assert!(auth.current_session().await.unwrap().is_none());

        assert!(matches!(
            auth.sign_in("ada@example.com", "wrong").await,
            Err(AuthError::InvalidCredentials)
        ));
        let again = auth.sign_in("ADA@example.com", "secret1").await.unwrap();
        assert_eq!(again.id, user.id);
    }

    #[tokio::test]
    async fn test_events_fire_once_per_transition() {
        let auth = MemoryAuth::new();
        let signed_in = Arc::new(AtomicUsize::new(0));
        let signed_out = Arc::new(AtomicUsize::new(0));

        let (i, o) = (signed_in.clone(), signed_out.clone());
        let _sub = auth.subscribe(Box::new(move |event| {
            let counter = if event.is_some() { &i } else { &o };
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        auth.sign_up("Ada", "ada@example.com", "secret1").await.unwrap();
        // Same user again is not a transition.
        auth.sign_in("ada@example.com", "secret1").await.unwrap();
        auth.sign_out().await.unwrap();
        auth.sign_out().await.unwrap();

        assert_eq!(signed_in.load(Ordering::SeqCst), 1);
        assert_eq!(signed_out.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_update_password_requires_session() {
        let auth = MemoryAuth::new();
        assert!(matches!(
            auth.update_password("newpass").await,
            Err(AuthError::NotSignedIn)
        ));

        auth.sign_up("Ada", "ada@example.com", "secret1").await.unwrap();
        auth.update_password("newpass").await.unwrap();
        auth.sign_out().await.unwrap();
        assert!(auth.sign_in("ada@example.com", "newpass").await.is_ok());
    }
}
