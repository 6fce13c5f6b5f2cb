//! In-memory service graph shared by unit tests.

#![allow(clippy::unwrap_used)]

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use secrecy::SecretString;
use std::sync::Arc;

use crate::accounts::{AccountService, SecretHasher};
use crate::authentication::social::{SocialBridge, SocialIdentity, SocialProviders, SocialValidator};
use crate::authentication::{AuthenticationService, LogonCodeService};
use crate::email::{Mailer, RecordingEmailSender, test_links};
use crate::store::{MemoryStore, Stores};
use crate::tokens::{SigningKeyManager, Tokenizer, TokenizerConfig};

pub(crate) fn password(value: &str) -> SecretString {
    SecretString::from(value.to_string())
}

pub(crate) fn fast_hasher() -> SecretHasher {
    SecretHasher::with_params(8, 1, 1).unwrap()
}

/// Accepts assertions of the form `provider_user_id|email`.
pub(crate) struct StubValidator {
    name: String,
}

impl StubValidator {
    pub(crate) fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl SocialValidator for StubValidator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn validate(&self, assertion: &str) -> Result<SocialIdentity> {
        let (id, email) = assertion
            .split_once('|')
            .ok_or_else(|| anyhow!("malformed assertion"))?;
        Ok(SocialIdentity {
            provider: self.name.clone(),
            provider_user_id: id.to_string(),
            email: Some(email.to_string()),
        })
    }
}

pub(crate) struct Harness {
    pub(crate) stores: Stores,
    pub(crate) tokenizer: Arc<Tokenizer>,
    pub(crate) mail: Arc<RecordingEmailSender>,
    pub(crate) mailer: Arc<Mailer>,
    pub(crate) hasher: SecretHasher,
    pub(crate) accounts: Arc<AccountService>,
    pub(crate) auth: Arc<AuthenticationService>,
    pub(crate) codes: Arc<LogonCodeService>,
    pub(crate) social: Arc<SocialBridge>,
}

impl Harness {
    pub(crate) async fn new() -> Result<Self> {
        let stores = Stores::from_backend(Arc::new(MemoryStore::new()));
        let keys = Arc::new(SigningKeyManager::new(stores.signing_keys.clone()).with_key_bits(1024));
        keys.initialize().await?;
        let tokenizer = Arc::new(Tokenizer::new(
            TokenizerConfig::new("bulwark.test"),
            keys.clone(),
        ));
        let mail = Arc::new(RecordingEmailSender::default());
        let mailer = Arc::new(Mailer::new(test_links(), mail.clone()));
        let hasher = fast_hasher();

        let accounts = Arc::new(AccountService::new(
            &stores,
            tokenizer.clone(),
            mailer.clone(),
            hasher.clone(),
        ));
        let auth = Arc::new(AuthenticationService::new(
            &stores,
            tokenizer.clone(),
            hasher.clone(),
        ));
        let codes = Arc::new(LogonCodeService::new(
            &stores,
            tokenizer.clone(),
            mailer.clone(),
            hasher.clone(),
        ));
        let providers = SocialProviders::builder()
            .register(Arc::new(StubValidator::named("stub")))
            .build();
        let social = Arc::new(SocialBridge::new(
            providers,
            &stores,
            accounts.clone(),
            tokenizer.clone(),
        ));

        Ok(Self {
            stores,
            tokenizer,
            mail,
            mailer,
            hasher,
            accounts,
            auth,
            codes,
            social,
        })
    }

    /// Register and verify an account through the public flow.
    pub(crate) async fn verified_account(&self, email: &str, secret: &str) -> Result<()> {
        self.accounts.create(email, &password(secret)).await?;
        let token = self
            .mail
            .last_field(email, "token")
            .await
            .ok_or_else(|| anyhow!("no verification email for {email}"))?;
        self.accounts.verify(email, &token).await?;
        Ok(())
    }
}
