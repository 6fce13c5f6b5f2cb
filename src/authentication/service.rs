use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{debug, info};

use super::{Authenticated, check_health, issue};
use crate::accounts::SecretHasher;
use crate::accounts::secrets::normalize_email;
use crate::error::AuthError;
use crate::store::{AccountStore, Session, SessionStore, Stores};
use crate::tokens::{AccessClaims, RefreshClaims, Tokenizer};

/// Password authentication and the session acknowledgement ledger.
pub struct AuthenticationService {
    accounts: Arc<dyn AccountStore>,
    sessions: Arc<dyn SessionStore>,
    tokenizer: Arc<Tokenizer>,
    hasher: SecretHasher,
}

impl AuthenticationService {
    #[must_use]
    pub fn new(stores: &Stores, tokenizer: Arc<Tokenizer>, hasher: SecretHasher) -> Self {
        Self {
            accounts: stores.accounts.clone(),
            sessions: stores.sessions.clone(),
            tokenizer,
            hasher,
        }
    }

    /// Check the password and mint a token pair.
    ///
    /// # Errors
    ///
    /// `AuthenticationFailed` for an unknown email or wrong password; the
    /// lifecycle gate errors for unhealthy accounts.
    pub async fn authenticate(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Authenticated, AuthError> {
        let email = normalize_email(email);
        let Some(account) = self.accounts.read(&email).await? else {
            debug!("authentication for unknown account");
            // Same hashing cost as a wrong password.
            let _ = self.hasher.verify_absent(password.expose_secret());
            return Err(AuthError::AuthenticationFailed);
        };
        check_health(&account)?;

        if !self
            .hasher
            .verify(password.expose_secret(), &account.password_hash)
        {
            debug!("password mismatch");
            return Err(AuthError::AuthenticationFailed);
        }

        issue(&self.tokenizer, &account).await
    }

    /// Record that `client_id` holds `tokens`. Both tokens must have been
    /// validated for `email` by the caller.
    ///
    /// # Errors
    ///
    /// `Storage` if the ledger cannot be written.
    pub async fn acknowledge(
        &self,
        tokens: &Authenticated,
        email: &str,
        client_id: &str,
    ) -> Result<(), AuthError> {
        let now = Utc::now();
        self.sessions
            .upsert(&Session {
                email: normalize_email(email),
                client_id: client_id.to_string(),
                access_token: tokens.access_token.clone(),
                refresh_token: tokens.refresh_token.clone(),
                created_at: now,
                modified_at: now,
            })
            .await?;
        info!(client_id, "session acknowledged");
        Ok(())
    }

    /// Exchange a refresh token for a new pair. The account is read again so
    /// role and lifecycle changes apply.
    ///
    /// # Errors
    ///
    /// `InvalidToken` for a bad refresh token, `AuthenticationFailed` if the
    /// account no longer exists, lifecycle gate errors otherwise.
    pub async fn renew(&self, email: &str, refresh_token: &str) -> Result<Authenticated, AuthError> {
        let email = normalize_email(email);
        let claims = self
            .tokenizer
            .validate_refresh_token(&email, refresh_token)
            .await?;
        let Some(account) = self.accounts.read(&claims.sub).await? else {
            return Err(AuthError::AuthenticationFailed);
        };
        check_health(&account)?;
        issue(&self.tokenizer, &account).await
    }

    /// Remove the session record for `(email, client_id)`. Issued tokens stay
    /// valid until they expire.
    ///
    /// # Errors
    ///
    /// `Storage` if the ledger cannot be written.
    pub async fn revoke(&self, email: &str, client_id: &str) -> Result<(), AuthError> {
        let removed = self
            .sessions
            .delete(&normalize_email(email), client_id)
            .await?;
        info!(client_id, removed, "session revoked");
        Ok(())
    }

    /// # Errors
    ///
    /// `NotFound` if no session is recorded.
    pub async fn session(&self, email: &str, client_id: &str) -> Result<Session, AuthError> {
        let email = normalize_email(email);
        self.sessions
            .read(&email, client_id)
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("session {email}/{client_id}")))
    }

    /// # Errors
    ///
    /// `InvalidToken` on any validation failure.
    pub async fn validate_access_token(
        &self,
        email: &str,
        token: &str,
    ) -> Result<AccessClaims, AuthError> {
        self.tokenizer
            .validate_access_token(&normalize_email(email), token)
            .await
    }

    /// # Errors
    ///
    /// `InvalidToken` on any validation failure.
    pub async fn validate_refresh_token(
        &self,
        email: &str,
        token: &str,
    ) -> Result<RefreshClaims, AuthError> {
        self.tokenizer
            .validate_refresh_token(&normalize_email(email), token)
            .await
    }
}
