//! Access and refresh token minting and validation.

use chrono::Utc;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::Arc;
use tracing::debug;
use utoipa::ToSchema;
use uuid::Uuid;

use super::manager::SigningKeyManager;
use crate::error::AuthError;
use crate::jwt::{self, Header, TokenError};

pub const DEFAULT_ISSUER: &str = "bulwark-auth";
pub const DEFAULT_ACCESS_TTL_SECONDS: i64 = 60 * 60;
pub const DEFAULT_REFRESH_TTL_SECONDS: i64 = 24 * 60 * 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenUse {
    Access,
    Refresh,
}

impl TokenUse {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

#[derive(Clone, Debug)]
pub struct TokenizerConfig {
    issuer: String,
    audience: String,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
}

impl TokenizerConfig {
    /// `audience` is the domain the tokens are issued for.
    #[must_use]
    pub fn new(audience: impl Into<String>) -> Self {
        Self {
            issuer: DEFAULT_ISSUER.to_string(),
            audience: audience.into(),
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    #[must_use]
    pub const fn with_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub const fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    #[must_use]
    pub const fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    #[must_use]
    pub const fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl_seconds
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AccessClaims {
    pub sub: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub nbf: i64,
    pub iat: i64,
    pub jti: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub nbf: i64,
    pub iat: i64,
    pub jti: String,
}

/// Registered claims shared by both token kinds.
#[derive(Deserialize)]
struct Registered {
    sub: String,
    iss: String,
    aud: String,
    exp: i64,
    nbf: i64,
}

pub struct Tokenizer {
    config: TokenizerConfig,
    keys: Arc<SigningKeyManager>,
}

impl Tokenizer {
    #[must_use]
    pub fn new(config: TokenizerConfig, keys: Arc<SigningKeyManager>) -> Self {
        Self { config, keys }
    }

    #[must_use]
    pub const fn config(&self) -> &TokenizerConfig {
        &self.config
    }

    /// Mint an access token carrying `roles`, signed with the latest key.
    ///
    /// # Errors
    ///
    /// Returns `NoKeyAvailable` if no key exists, `Storage` if the key store
    /// is unreachable, or `Signing` if encoding fails.
    pub async fn create_access_token(
        &self,
        subject: &str,
        roles: &[String],
    ) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = AccessClaims {
            sub: subject.to_string(),
            roles: roles.to_vec(),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            exp: now + self.config.access_ttl_seconds,
            nbf: now,
            iat: now,
            jti: Uuid::new_v4().to_string(),
        };
        self.sign(TokenUse::Access, &claims).await
    }

    /// Mint a refresh token. It carries no roles.
    ///
    /// # Errors
    ///
    /// Same as [`Tokenizer::create_access_token`].
    pub async fn create_refresh_token(&self, subject: &str) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = RefreshClaims {
            sub: subject.to_string(),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            exp: now + self.config.refresh_ttl_seconds,
            nbf: now,
            iat: now,
            jti: Uuid::new_v4().to_string(),
        };
        self.sign(TokenUse::Refresh, &claims).await
    }

    /// Validate an access token issued to `subject`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` for any format, algorithm, subject, key,
    /// signature, issuer, audience or time-window failure, and `Storage` if the
    /// key store cannot be reached.
    pub async fn validate_access_token(
        &self,
        subject: &str,
        token: &str,
    ) -> Result<AccessClaims, AuthError> {
        self.validate_at(subject, token, TokenUse::Access, Utc::now().timestamp())
            .await
    }

    /// Validate a refresh token issued to `subject`.
    ///
    /// # Errors
    ///
    /// Same as [`Tokenizer::validate_access_token`].
    pub async fn validate_refresh_token(
        &self,
        subject: &str,
        token: &str,
    ) -> Result<RefreshClaims, AuthError> {
        self.validate_at(subject, token, TokenUse::Refresh, Utc::now().timestamp())
            .await
    }

    async fn sign<T: Serialize + Sync>(
        &self,
        token_use: TokenUse,
        claims: &T,
    ) -> Result<String, AuthError> {
        let key = self.keys.active_key().await?;
        let header = Header::rs256(&key.key_id, token_use.as_str());
        jwt::sign(&header, claims, &key.signing)
            .map_err(|err| AuthError::Signing(anyhow::Error::new(err)))
    }

    async fn validate_at<T: DeserializeOwned>(
        &self,
        subject: &str,
        token: &str,
        expected_use: TokenUse,
        now: i64,
    ) -> Result<T, AuthError> {
        let result = self.check(subject, token, expected_use, now).await;
        if let Err(AuthError::InvalidToken(cause)) = &result {
            debug!(token_use = expected_use.as_str(), %cause, "token rejected");
        }
        result
    }

    async fn check<T: DeserializeOwned>(
        &self,
        subject: &str,
        token: &str,
        expected_use: TokenUse,
        now: i64,
    ) -> Result<T, AuthError> {
        let parts = jwt::split(token)?;

        let actual_use = parts.header.token_use.as_deref().unwrap_or_default();
        if actual_use != expected_use.as_str() {
            return Err(TokenError::UseMismatch {
                expected: expected_use.as_str().to_string(),
                actual: actual_use.to_string(),
            }
            .into());
        }

        let registered: Registered = parts.claims()?;
        if registered.sub != subject {
            return Err(TokenError::TokenSubjectMismatch.into());
        }

        let key_id = parts.header.kid.as_deref().ok_or(TokenError::MissingKid)?;
        let key = self
            .keys
            .verification_key(key_id)
            .await?
            .ok_or_else(|| TokenError::UnknownKid(key_id.to_string()))?;
        parts.verify(&key.verifying)?;

        if registered.iss != self.config.issuer {
            return Err(TokenError::InvalidIssuer.into());
        }
        if registered.aud != self.config.audience {
            return Err(TokenError::InvalidAudience.into());
        }
        if now < registered.nbf {
            return Err(TokenError::NotYetValid.into());
        }
        if now >= registered.exp {
            return Err(TokenError::Expired.into());
        }

        Ok(parts.claims()?)
    }
}
