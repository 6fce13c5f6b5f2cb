//! Emailed one-time logon codes.
//!
//! A request stores the argon2 hash of a fresh six digit code with an expiry
//! and emails the plaintext. At most one code is outstanding per email; a new
//! request replaces it. A code is consumed by deleting the exact hash that was
//! verified, so two concurrent logins with the same code cannot both succeed.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{Authenticated, check_health, issue};
use crate::accounts::SecretHasher;
use crate::accounts::secrets::{generate_logon_code, normalize_email};
use crate::email::Mailer;
use crate::error::AuthError;
use crate::store::{AccountStore, LogonCode, LogonCodeStore, Stores};
use crate::tokens::Tokenizer;

pub const DEFAULT_LOGON_CODE_TTL_MINUTES: i64 = 10;

pub struct LogonCodeService {
    codes: Arc<dyn LogonCodeStore>,
    accounts: Arc<dyn AccountStore>,
    tokenizer: Arc<Tokenizer>,
    mailer: Arc<Mailer>,
    hasher: SecretHasher,
    ttl: Duration,
}

impl LogonCodeService {
    #[must_use]
    pub fn new(
        stores: &Stores,
        tokenizer: Arc<Tokenizer>,
        mailer: Arc<Mailer>,
        hasher: SecretHasher,
    ) -> Self {
        Self {
            codes: stores.logon_codes.clone(),
            accounts: stores.accounts.clone(),
            tokenizer,
            mailer,
            hasher,
            ttl: Duration::minutes(DEFAULT_LOGON_CODE_TTL_MINUTES),
        }
    }

    #[must_use]
    pub fn with_ttl_minutes(mut self, minutes: i64) -> Self {
        self.ttl = Duration::minutes(minutes);
        self
    }

    /// Email a fresh code, replacing any outstanding one.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown account, `Delivery` if the email fails.
    pub async fn request(&self, email: &str) -> Result<(), AuthError> {
        let email = normalize_email(email);
        if self.accounts.read(&email).await?.is_none() {
            return Err(AuthError::NotFound(format!("account {email}")));
        }

        let code = generate_logon_code();
        let code_hash = self.hasher.hash(&code).map_err(AuthError::Internal)?;
        let now = Utc::now();
        self.codes
            .upsert(&LogonCode {
                email: email.clone(),
                code_hash,
                expires_at: now + self.ttl,
                created_at: now,
            })
            .await?;
        info!("logon code issued");

        self.mailer.send_logon_code(&email, &code).await
    }

    /// Exchange a code for a token pair, consuming it.
    ///
    /// # Errors
    ///
    /// `AuthenticationFailed` if no code is outstanding, the code is wrong,
    /// expired or already used; lifecycle gate errors for unhealthy accounts.
    pub async fn authenticate(&self, email: &str, code: &str) -> Result<Authenticated, AuthError> {
        let email = normalize_email(email);
        let Some(stored) = self.codes.read(&email).await? else {
            debug!("no outstanding logon code");
            return Err(AuthError::AuthenticationFailed);
        };
        if Utc::now() >= stored.expires_at {
            debug!("logon code expired");
            return Err(AuthError::AuthenticationFailed);
        }
        if !self.hasher.verify(code, &stored.code_hash) {
            debug!("logon code mismatch");
            return Err(AuthError::AuthenticationFailed);
        }

        let Some(account) = self.accounts.read(&email).await? else {
            return Err(AuthError::AuthenticationFailed);
        };
        check_health(&account)?;

        match self.codes.delete(&email, &stored.code_hash).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("logon code already consumed");
                return Err(AuthError::AuthenticationFailed);
            }
            Err(err) => warn!(error = %err, "failed to delete logon code"),
        }

        issue(&self.tokenizer, &account).await
    }
}
