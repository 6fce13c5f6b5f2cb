//! Persistence contracts for accounts, keys, codes, sessions and reset tokens.
//!
//! Absence is `Ok(None)` (or `Ok(false)` for mutations that matched nothing);
//! `Err` is reserved for uniqueness violations and backend failures. Services
//! convert these into [`crate::AuthError`] at their boundary.
//!
//! Two backends implement every contract: [`PgStore`] for PostgreSQL and
//! [`MemoryStore`] for tests and local development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use utoipa::ToSchema;

use crate::tokens::SigningKey;

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} already exists")]
    Duplicate(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SocialProvider {
    pub name: String,
    pub social_id: String,
}

#[derive(Clone, Debug)]
pub struct AccountRecord {
    pub email: String,
    pub password_hash: String,
    pub is_verified: bool,
    pub is_enabled: bool,
    pub is_deleted: bool,
    pub verification_token_hash: Option<Vec<u8>>,
    pub roles: Vec<String>,
    pub social_providers: Vec<SocialProvider>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Fields required to insert an account; it starts unverified and disabled.
#[derive(Clone, Debug)]
pub struct NewAccount {
    pub email: String,
    pub password_hash: String,
    pub verification_token_hash: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct LogonCode {
    pub email: String,
    pub code_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub email: String,
    pub client_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct ForgotToken {
    pub email: String,
    pub token_hash: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert a new account. Fails with `Duplicate` if the email is taken.
    async fn create(&self, account: NewAccount) -> Result<(), StoreError>;

    async fn read(&self, email: &str) -> Result<Option<AccountRecord>, StoreError>;

    /// Mark verified and enabled if `token_hash` matches the outstanding
    /// verification token, clearing it. Returns `false` when nothing matched.
    async fn verify(&self, email: &str, token_hash: &[u8]) -> Result<bool, StoreError>;

    async fn set_verification_token(
        &self,
        email: &str,
        token_hash: &[u8],
    ) -> Result<bool, StoreError>;

    async fn update_password(&self, email: &str, password_hash: &str)
    -> Result<bool, StoreError>;

    /// Move the account to `new_email`, mark it unverified and store a new
    /// verification token.
    async fn update_email(
        &self,
        email: &str,
        new_email: &str,
        token_hash: &[u8],
    ) -> Result<bool, StoreError>;

    /// Soft delete.
    async fn delete(&self, email: &str) -> Result<bool, StoreError>;

    async fn set_enabled(&self, email: &str, enabled: bool) -> Result<bool, StoreError>;

    async fn set_roles(&self, email: &str, roles: &[String]) -> Result<bool, StoreError>;

    /// Append the provider identity unless the same (name, id) pair is
    /// already linked.
    async fn link_social(&self, email: &str, provider: &SocialProvider)
    -> Result<(), StoreError>;
}

#[async_trait]
pub trait SigningKeyStore: Send + Sync {
    async fn insert(&self, key: &SigningKey) -> Result<(), StoreError>;

    /// Insert `key` only if the store holds no key at all. Concurrent callers
    /// see exactly one `true`.
    async fn insert_first(&self, key: &SigningKey) -> Result<bool, StoreError>;

    /// The most recently created key.
    async fn latest(&self) -> Result<Option<SigningKey>, StoreError>;

    async fn get(&self, key_id: &str) -> Result<Option<SigningKey>, StoreError>;

    async fn all(&self) -> Result<Vec<SigningKey>, StoreError>;
}

#[async_trait]
pub trait LogonCodeStore: Send + Sync {
    /// Replace any outstanding code for the email.
    async fn upsert(&self, code: &LogonCode) -> Result<(), StoreError>;

    async fn read(&self, email: &str) -> Result<Option<LogonCode>, StoreError>;

    /// Delete the record only if it still holds `code_hash`.
    async fn delete(&self, email: &str, code_hash: &str) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create or overwrite the session for `(email, client_id)`.
    async fn upsert(&self, session: &Session) -> Result<(), StoreError>;

    async fn read(&self, email: &str, client_id: &str) -> Result<Option<Session>, StoreError>;

    async fn delete(&self, email: &str, client_id: &str) -> Result<bool, StoreError>;

    async fn delete_all(&self, email: &str) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait ForgotStore: Send + Sync {
    /// Create or replace the reset token for the email.
    async fn upsert(&self, email: &str, token_hash: &[u8]) -> Result<(), StoreError>;
}

/// Backend reachability, reported by the health endpoint.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Starts scoped transactions for multi-step mutations.
#[async_trait]
pub trait TransactionManager: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn ResetTransaction>, StoreError>;
}

/// Password reset unit of work. Nothing is visible to other callers until
/// `commit`; dropping without committing discards every change.
#[async_trait]
pub trait ResetTransaction: Send {
    /// Read and lock the reset token for the email.
    async fn read_forgot(&mut self, email: &str) -> Result<Option<ForgotToken>, StoreError>;

    async fn update_password(
        &mut self,
        email: &str,
        password_hash: &str,
    ) -> Result<bool, StoreError>;

    async fn delete_forgot(&mut self, email: &str) -> Result<bool, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Every contract a backend must satisfy, bundled for service construction.
#[derive(Clone)]
pub struct Stores {
    pub accounts: Arc<dyn AccountStore>,
    pub signing_keys: Arc<dyn SigningKeyStore>,
    pub logon_codes: Arc<dyn LogonCodeStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub forgot: Arc<dyn ForgotStore>,
    pub transactions: Arc<dyn TransactionManager>,
    pub health: Arc<dyn HealthCheck>,
}

impl Stores {
    /// Share one backend across every contract.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: AccountStore
            + SigningKeyStore
            + LogonCodeStore
            + SessionStore
            + ForgotStore
            + TransactionManager
            + HealthCheck
            + 'static,
    {
        Self {
            accounts: backend.clone(),
            signing_keys: backend.clone(),
            logon_codes: backend.clone(),
            sessions: backend.clone(),
            forgot: backend.clone(),
            transactions: backend.clone(),
            health: backend,
        }
    }
}
