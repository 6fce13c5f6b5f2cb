//! Federated sign-in.
//!
//! A provider's identity assertion is checked by the [`SocialValidator`]
//! registered under the provider's name. The registry is fixed once built.
//! A first sign-in provisions an unverified local account and fails with
//! `AccountNotVerified`; later sign-ins link the provider identity and issue
//! tokens without running the lifecycle gate used by password logins.

use async_trait::async_trait;
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::{Authenticated, issue};
use crate::accounts::AccountService;
use crate::accounts::secrets::{generate_token, normalize_email};
use crate::error::AuthError;
use crate::store::{AccountStore, SocialProvider, Stores};
use crate::tokens::Tokenizer;

mod google;

pub use google::{GOOGLE_ISSUERS, GOOGLE_JWKS_URL, GOOGLE_PROVIDER, GoogleValidator};

/// The identity a provider vouches for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SocialIdentity {
    pub provider: String,
    pub provider_user_id: String,
    pub email: Option<String>,
}

/// Verifies identity assertions for one provider: signature, issuer,
/// audience and expiry.
#[async_trait]
pub trait SocialValidator: Send + Sync {
    fn name(&self) -> &str;

    /// # Errors
    ///
    /// Returns an error if the assertion cannot be trusted.
    async fn validate(&self, assertion: &str) -> anyhow::Result<SocialIdentity>;
}

/// Immutable provider name to validator registry.
#[derive(Clone, Default)]
pub struct SocialProviders {
    validators: HashMap<String, Arc<dyn SocialValidator>>,
}

impl SocialProviders {
    #[must_use]
    pub fn builder() -> SocialProvidersBuilder {
        SocialProvidersBuilder::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn SocialValidator>> {
        self.validators.get(name)
    }

    /// Registered provider names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.validators.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[derive(Default)]
pub struct SocialProvidersBuilder {
    validators: HashMap<String, Arc<dyn SocialValidator>>,
}

impl SocialProvidersBuilder {
    /// Register `validator` under its name, replacing any earlier one.
    #[must_use]
    pub fn register(mut self, validator: Arc<dyn SocialValidator>) -> Self {
        self.validators
            .insert(validator.name().to_string(), validator);
        self
    }

    #[must_use]
    pub fn build(self) -> SocialProviders {
        SocialProviders {
            validators: self.validators,
        }
    }
}

pub struct SocialBridge {
    providers: SocialProviders,
    accounts: Arc<dyn AccountStore>,
    registration: Arc<AccountService>,
    tokenizer: Arc<Tokenizer>,
}

impl SocialBridge {
    #[must_use]
    pub fn new(
        providers: SocialProviders,
        stores: &Stores,
        registration: Arc<AccountService>,
        tokenizer: Arc<Tokenizer>,
    ) -> Self {
        Self {
            providers,
            accounts: stores.accounts.clone(),
            registration,
            tokenizer,
        }
    }

    #[must_use]
    pub const fn providers(&self) -> &SocialProviders {
        &self.providers
    }

    /// Sign in with a provider assertion.
    ///
    /// # Errors
    ///
    /// `UnsupportedProvider` for an unregistered provider, `InvalidSocialToken`
    /// if the validator rejects the assertion or it carries no email, and
    /// `AccountNotVerified` after provisioning a new account.
    pub async fn authenticate(
        &self,
        assertion: &str,
        provider: &str,
    ) -> Result<Authenticated, AuthError> {
        let validator = self
            .providers
            .get(provider)
            .ok_or_else(|| AuthError::UnsupportedProvider(provider.to_string()))?;
        let identity = validator
            .validate(assertion)
            .await
            .map_err(AuthError::InvalidSocialToken)?;

        let email = identity
            .email
            .as_deref()
            .map(normalize_email)
            .filter(|email| !email.is_empty())
            .ok_or_else(|| {
                AuthError::InvalidSocialToken(anyhow::anyhow!(
                    "{provider} assertion carries no email"
                ))
            })?;

        let Some(account) = self.accounts.read(&email).await? else {
            return self.provision(&email, provider).await;
        };

        self.accounts
            .link_social(
                &account.email,
                &SocialProvider {
                    name: identity.provider.clone(),
                    social_id: identity.provider_user_id.clone(),
                },
            )
            .await?;
        debug!(provider, "social identity linked");

        issue(&self.tokenizer, &account).await
    }

    async fn provision(&self, email: &str, provider: &str) -> Result<Authenticated, AuthError> {
        // Nobody knows this password; the account signs in through the
        // provider or a password reset.
        let password = SecretString::from(generate_token().map_err(AuthError::Internal)?);
        match self.registration.create(email, &password).await {
            Ok(()) | Err(AuthError::Duplicate(_)) => {}
            Err(err) => return Err(err),
        }
        info!(provider, "account provisioned from social sign-in");
        Err(AuthError::AccountNotVerified(email.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::{Harness, StubValidator, password};
    use anyhow::Result;

    #[tokio::test]
    async fn unknown_provider_is_unsupported() -> Result<()> {
        let h = Harness::new().await?;
        let result = h.social.authenticate("id|a@x.com", "myspace").await;
        assert!(matches!(result, Err(AuthError::UnsupportedProvider(p)) if p == "myspace"));
        Ok(())
    }

    #[tokio::test]
    async fn rejected_assertion_and_missing_email_fail() -> Result<()> {
        let h = Harness::new().await?;
        let rejected = h.social.authenticate("garbage", "stub").await;
        assert!(matches!(rejected, Err(AuthError::InvalidSocialToken(_))));
        let no_email = h.social.authenticate("id|", "stub").await;
        assert!(matches!(no_email, Err(AuthError::InvalidSocialToken(_))));
        Ok(())
    }

    #[tokio::test]
    async fn first_sign_in_provisions_unverified_account() -> Result<()> {
        let h = Harness::new().await?;
        let result = h.social.authenticate("g-1|New@x.com", "stub").await;
        assert!(matches!(result, Err(AuthError::AccountNotVerified(e)) if e == "new@x.com"));

        let account = h.accounts.read("new@x.com").await?;
        assert!(!account.is_verified);
        assert!(h.mail.last_field("new@x.com", "token").await.is_some());

        // The account exists now, so the next sign-in links and issues
        // tokens even though it is unverified.
        let again = h.social.authenticate("g-1|new@x.com", "stub").await;
        assert!(again.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn existing_account_is_linked_once() -> Result<()> {
        let h = Harness::new().await?;
        h.verified_account("a@x.com", "pw").await?;

        let tokens = h.social.authenticate("g-1|a@x.com", "stub").await?;
        h.social.authenticate("g-1|a@x.com", "stub").await?;
        assert!(
            h.auth
                .validate_access_token("a@x.com", &tokens.access_token)
                .await
                .is_ok()
        );

        let account = h.accounts.read("a@x.com").await?;
        assert_eq!(
            account.social_providers,
            vec![SocialProvider {
                name: "stub".to_string(),
                social_id: "g-1".to_string(),
            }]
        );
        Ok(())
    }

    #[tokio::test]
    async fn linked_path_skips_lifecycle_gate() -> Result<()> {
        let h = Harness::new().await?;
        h.verified_account("a@x.com", "pw").await?;
        h.accounts.set_enabled("a@x.com", false).await?;

        assert!(matches!(
            h.auth.authenticate("a@x.com", &password("pw")).await,
            Err(AuthError::AccountDisabled(_))
        ));
        assert!(h.social.authenticate("g-1|a@x.com", "stub").await.is_ok());
        Ok(())
    }

    #[test]
    fn registry_replaces_same_name() {
        let providers = SocialProviders::builder()
            .register(Arc::new(StubValidator::named("b")))
            .register(Arc::new(StubValidator::named("a")))
            .register(Arc::new(StubValidator::named("a")))
            .build();
        assert_eq!(providers.names(), vec!["a", "b"]);
        assert!(providers.get("c").is_none());
    }
}
