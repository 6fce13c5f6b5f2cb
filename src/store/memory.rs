//! In-process backend. All collections live behind one async mutex so a
//! transaction can hold the lock and publish a staged copy on commit.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{
    AccountRecord, AccountStore, ForgotStore, ForgotToken, HealthCheck, LogonCode, LogonCodeStore,
    NewAccount, ResetTransaction, Session, SessionStore, SigningKeyStore, SocialProvider, StoreError,
    TransactionManager,
};
use crate::tokens::SigningKey;

#[derive(Clone, Debug, Default)]
struct MemoryState {
    accounts: HashMap<String, AccountRecord>,
    // Insertion order breaks ties on `created_at`.
    signing_keys: Vec<SigningKey>,
    logon_codes: HashMap<String, LogonCode>,
    sessions: HashMap<(String, String), Session>,
    forgot_tokens: HashMap<String, ForgotToken>,
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn verify_account(state: &mut MemoryState, email: &str, token_hash: &[u8]) -> bool {
    match state.accounts.get_mut(email) {
        Some(account)
            if !account.is_deleted
                && account.verification_token_hash.as_deref() == Some(token_hash) =>
        {
            account.is_verified = true;
            account.is_enabled = true;
            account.verification_token_hash = None;
            account.modified_at = Utc::now();
            true
        }
        _ => false,
    }
}

fn update_account<F>(state: &mut MemoryState, email: &str, apply: F) -> bool
where
    F: FnOnce(&mut AccountRecord),
{
    state.accounts.get_mut(email).is_some_and(|account| {
        apply(account);
        account.modified_at = Utc::now();
        true
    })
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn create(&self, account: NewAccount) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.accounts.contains_key(&account.email) {
            return Err(StoreError::Duplicate(format!("account {}", account.email)));
        }
        let now = Utc::now();
        state.accounts.insert(
            account.email.clone(),
            AccountRecord {
                email: account.email,
                password_hash: account.password_hash,
                is_verified: false,
                is_enabled: false,
                is_deleted: false,
                verification_token_hash: Some(account.verification_token_hash),
                roles: Vec::new(),
                social_providers: Vec::new(),
                created_at: now,
                modified_at: now,
            },
        );
        Ok(())
    }

    async fn read(&self, email: &str) -> Result<Option<AccountRecord>, StoreError> {
        Ok(self.state.lock().await.accounts.get(email).cloned())
    }

    async fn verify(&self, email: &str, token_hash: &[u8]) -> Result<bool, StoreError> {
        Ok(verify_account(&mut *self.state.lock().await, email, token_hash))
    }

    async fn set_verification_token(
        &self,
        email: &str,
        token_hash: &[u8],
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        Ok(update_account(&mut state, email, |account| {
            account.verification_token_hash = Some(token_hash.to_vec());
        }))
    }

    async fn update_password(
        &self,
        email: &str,
        password_hash: &str,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        Ok(update_account(&mut state, email, |account| {
            account.password_hash = password_hash.to_string();
        }))
    }

    async fn update_email(
        &self,
        email: &str,
        new_email: &str,
        token_hash: &[u8],
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        if email != new_email && state.accounts.contains_key(new_email) {
            return Err(StoreError::Duplicate(format!("account {new_email}")));
        }
        let Some(mut account) = state.accounts.remove(email) else {
            return Ok(false);
        };
        account.email = new_email.to_string();
        account.is_verified = false;
        account.verification_token_hash = Some(token_hash.to_vec());
        account.modified_at = Utc::now();
        state.accounts.insert(new_email.to_string(), account);
        Ok(true)
    }

    async fn delete(&self, email: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        Ok(update_account(&mut state, email, |account| {
            account.is_deleted = true;
        }))
    }

    async fn set_enabled(&self, email: &str, enabled: bool) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        Ok(update_account(&mut state, email, |account| {
            account.is_enabled = enabled;
        }))
    }

    async fn set_roles(&self, email: &str, roles: &[String]) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        Ok(update_account(&mut state, email, |account| {
            account.roles = roles.to_vec();
        }))
    }

    async fn link_social(
        &self,
        email: &str,
        provider: &SocialProvider,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        update_account(&mut state, email, |account| {
            if !account.social_providers.contains(provider) {
                account.social_providers.push(provider.clone());
            }
        });
        Ok(())
    }
}

#[async_trait]
impl SigningKeyStore for MemoryStore {
    async fn insert(&self, key: &SigningKey) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.signing_keys.iter().any(|k| k.key_id == key.key_id) {
            return Err(StoreError::Duplicate(format!("signing key {}", key.key_id)));
        }
        state.signing_keys.push(key.clone());
        Ok(())
    }

    async fn insert_first(&self, key: &SigningKey) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        if !state.signing_keys.is_empty() {
            return Ok(false);
        }
        state.signing_keys.push(key.clone());
        Ok(true)
    }

    async fn latest(&self) -> Result<Option<SigningKey>, StoreError> {
        let state = self.state.lock().await;
        // max_by_key returns the last maximum, so later inserts win ties.
        Ok(state
            .signing_keys
            .iter()
            .max_by_key(|k| k.created_at)
            .cloned())
    }

    async fn get(&self, key_id: &str) -> Result<Option<SigningKey>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .signing_keys
            .iter()
            .find(|k| k.key_id == key_id)
            .cloned())
    }

    async fn all(&self) -> Result<Vec<SigningKey>, StoreError> {
        Ok(self.state.lock().await.signing_keys.clone())
    }
}

#[async_trait]
impl LogonCodeStore for MemoryStore {
    async fn upsert(&self, code: &LogonCode) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.logon_codes.insert(code.email.clone(), code.clone());
        Ok(())
    }

    async fn read(&self, email: &str) -> Result<Option<LogonCode>, StoreError> {
        Ok(self.state.lock().await.logon_codes.get(email).cloned())
    }

    async fn delete(&self, email: &str, code_hash: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        if state
            .logon_codes
            .get(email)
            .is_some_and(|code| code.code_hash == code_hash)
        {
            state.logon_codes.remove(email);
            return Ok(true);
        }
        Ok(false)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn upsert(&self, session: &Session) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let key = (session.email.clone(), session.client_id.clone());
        let created_at = state
            .sessions
            .get(&key)
            .map_or(session.created_at, |existing| existing.created_at);
        state.sessions.insert(
            key,
            Session {
                created_at,
                ..session.clone()
            },
        );
        Ok(())
    }

    async fn read(&self, email: &str, client_id: &str) -> Result<Option<Session>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .sessions
            .get(&(email.to_string(), client_id.to_string()))
            .cloned())
    }

    async fn delete(&self, email: &str, client_id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        Ok(state
            .sessions
            .remove(&(email.to_string(), client_id.to_string()))
            .is_some())
    }

    async fn delete_all(&self, email: &str) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.sessions.len();
        state.sessions.retain(|(owner, _), _| owner != email);
        Ok(u64::try_from(before - state.sessions.len()).unwrap_or(u64::MAX))
    }
}

#[async_trait]
impl ForgotStore for MemoryStore {
    async fn upsert(&self, email: &str, token_hash: &[u8]) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.forgot_tokens.insert(
            email.to_string(),
            ForgotToken {
                email: email.to_string(),
                token_hash: token_hash.to_vec(),
                created_at: Utc::now(),
            },
        );
        Ok(())
    }
}

/// Holds the state lock for its whole life; other callers wait until it is
/// committed or dropped.
struct MemoryResetTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

#[async_trait]
impl HealthCheck for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl TransactionManager for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn ResetTransaction>, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryResetTransaction { guard, staged }))
    }
}

#[async_trait]
impl ResetTransaction for MemoryResetTransaction {
    async fn read_forgot(&mut self, email: &str) -> Result<Option<ForgotToken>, StoreError> {
        Ok(self.staged.forgot_tokens.get(email).cloned())
    }

    async fn update_password(
        &mut self,
        email: &str,
        password_hash: &str,
    ) -> Result<bool, StoreError> {
        Ok(update_account(&mut self.staged, email, |account| {
            account.password_hash = password_hash.to_string();
        }))
    }

    async fn delete_forgot(&mut self, email: &str) -> Result<bool, StoreError> {
        Ok(self.staged.forgot_tokens.remove(email).is_some())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let Self { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
