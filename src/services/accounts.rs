use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::models::User;
use crate::services::auth::AuthProvider;

pub const MIN_PASSWORD_LEN: usize = 6;
const RESET_PATH: &str = "/reset-password";

/// Form-level account flows layered over the auth provider.
pub struct AccountService {
    auth: Arc<dyn AuthProvider>,
    site_url: String,
}

impl AccountService {
    pub fn new(auth: Arc<dyn AuthProvider>, site_url: &str) -> Self {
        Self {
            auth,
            site_url: site_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<User> {
        self.auth
            .sign_in(email.trim(), password)
            .await
            .context("Login failed")
    }

    /// Returns the user when signed in right away, `None` when the account
    /// still needs e-mail confirmation.
    pub async fn sign_up(
        &self,
        name: &str,
        email: &str,
        password: &str,
        confirm_password: &str,
    ) -> Result<Option<User>> {
        if password != confirm_password {
            bail!("Passwords don't match");
        }

        self.auth
            .sign_up(name.trim(), email.trim(), password)
            .await
            .context("Signup failed")
    }

    pub async fn request_password_reset(&self, email: &str) -> Result<()> {
        let redirect = self.reset_redirect();
        self.auth
            .request_password_reset(email.trim(), Some(&redirect))
            .await
            .context("Failed to send reset link")
    }

    pub async fn reset_password(&self, password: &str, confirm_password: &str) -> Result<()> {
        if password != confirm_password {
            bail!("Passwords do not match");
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            bail!("Password must be at least {} characters", MIN_PASSWORD_LEN);
        }

        self.auth
            .update_password(password)
            .await
            .context("Failed to update password")
    }

    pub fn reset_redirect(&self) -> String {
        format!("{}{}", self.site_url, RESET_PATH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::auth::MemoryAuth;

    fn service() -> (AccountService, Arc<MemoryAuth>) {
        let auth = Arc::new(MemoryAuth::new());
        (AccountService::new(auth.clone(), "https://chat.example.com/"), auth)
    }

    #[tokio::test]
    async fn test_sign_up_requires_matching_passwords() {
        let (accounts, auth) = service();
        let err = accounts
            .sign_up("Ada", "ada@example.com", "secret1", "secret2")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Passwords don't match");
        assert!(auth.access_token().is_none());

        let user = accounts
            .sign_up("Ada", " ada@example.com ", "secret1", "secret1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.email, "ada@example.com");
    }

    #[tokio::test]
    async fn test_reset_password_rules() {
        let (accounts, _) = service();
        accounts
            .sign_up("Ada", "ada@example.com", "secret1", "secret1")
            .await
            .unwrap();

        let err = accounts.reset_password("abc", "abd").await.unwrap_err();
        assert_eq!(err.to_string(), "Passwords do not match");

        let err = accounts.reset_password("abc", "abc").await.unwrap_err();
        assert_eq!(err.to_string(), "Password must be at least 6 characters");

        accounts.reset_password("longer1", "longer1").await.unwrap();
    }

    #[tokio::test]
    async fn test_sign_in_failure_has_context() {
        let (accounts, _) = service();
        let err = accounts.sign_in("nobody@example.com", "pw").await.unwrap_err();
        assert_eq!(err.to_string(), "Login failed");
        assert_eq!(err.root_cause().to_string(), "Invalid email or password");
    }

    #[test]
    fn test_reset_redirect() {
        let (accounts, _) = service();
        assert_eq!(
            accounts.reset_redirect(),
            "https://chat.example.com/reset-password"
        );
    }
}
