use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::Account;
use super::secrets::{
    SecretHasher, generate_token, hash_token, normalize_email, valid_email,
};
use crate::email::Mailer;
use crate::error::AuthError;
use crate::store::{
    AccountStore, ForgotStore, NewAccount, SessionStore, Stores, TransactionManager,
};
use crate::tokens::Tokenizer;

/// Whether a resend produced a new verification email.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResendOutcome {
    Sent,
    /// The account is unknown, deleted or already verified.
    Skipped,
}

/// Account lifecycle: registration, verification, password and email changes.
pub struct AccountService {
    accounts: Arc<dyn AccountStore>,
    sessions: Arc<dyn SessionStore>,
    forgot: Arc<dyn ForgotStore>,
    transactions: Arc<dyn TransactionManager>,
    tokenizer: Arc<Tokenizer>,
    mailer: Arc<Mailer>,
    hasher: SecretHasher,
}

impl AccountService {
    #[must_use]
    pub fn new(
        stores: &Stores,
        tokenizer: Arc<Tokenizer>,
        mailer: Arc<Mailer>,
        hasher: SecretHasher,
    ) -> Self {
        Self {
            accounts: stores.accounts.clone(),
            sessions: stores.sessions.clone(),
            forgot: stores.forgot.clone(),
            transactions: stores.transactions.clone(),
            tokenizer,
            mailer,
            hasher,
        }
    }

    /// Register an unverified account and email its verification link.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a malformed email or empty password, `Duplicate` if
    /// the email is taken, `Delivery` if the email cannot be sent.
    pub async fn create(&self, email: &str, password: &SecretString) -> Result<(), AuthError> {
        let email = checked_email(email)?;
        let password_hash = self.hash_password(password)?;
        let token = generate_token().map_err(AuthError::Internal)?;

        self.accounts
            .create(NewAccount {
                email: email.clone(),
                password_hash,
                verification_token_hash: hash_token(&token),
            })
            .await?;
        info!("account created");

        self.mailer.send_verification(&email, &token).await
    }

    /// Consume the emailed verification token. The account becomes verified
    /// and enabled.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown email, `VerificationFailed` if the token does
    /// not match the outstanding one.
    pub async fn verify(&self, email: &str, token: &str) -> Result<(), AuthError> {
        let email = normalize_email(email);
        if self.accounts.read(&email).await?.is_none() {
            return Err(account_not_found(&email));
        }
        if !self.accounts.verify(&email, &hash_token(token)).await? {
            return Err(AuthError::VerificationFailed(
                "verification token does not match".to_string(),
            ));
        }
        info!("account verified");
        Ok(())
    }

    /// Issue and email a fresh verification token, replacing the previous one.
    ///
    /// # Errors
    ///
    /// `Storage` or `Delivery` on collaborator failures.
    pub async fn resend(&self, email: &str) -> Result<ResendOutcome, AuthError> {
        let email = normalize_email(email);
        let pending = self
            .accounts
            .read(&email)
            .await?
            .is_some_and(|account| !account.is_verified && !account.is_deleted);
        if !pending {
            debug!("verification resend skipped");
            return Ok(ResendOutcome::Skipped);
        }

        let token = generate_token().map_err(AuthError::Internal)?;
        self.accounts
            .set_verification_token(&email, &hash_token(&token))
            .await?;
        self.mailer.send_verification(&email, &token).await?;
        Ok(ResendOutcome::Sent)
    }

    /// Start a password reset. Unknown and deleted accounts are ignored so the
    /// response does not reveal which emails are registered.
    ///
    /// # Errors
    ///
    /// `Storage` or `Delivery` on collaborator failures.
    pub async fn forgot(&self, email: &str) -> Result<(), AuthError> {
        let email = normalize_email(email);
        let active = self
            .accounts
            .read(&email)
            .await?
            .is_some_and(|account| !account.is_deleted);
        if !active {
            debug!("password reset request ignored");
            return Ok(());
        }

        let token = generate_token().map_err(AuthError::Internal)?;
        self.forgot.upsert(&email, &hash_token(&token)).await?;
        self.mailer.send_forgot_password(&email, &token).await
    }

    /// Complete a password reset in one transaction: check the reset token,
    /// store the new password hash and consume the token.
    ///
    /// # Errors
    ///
    /// `NotFound` if no reset is outstanding or the account vanished,
    /// `VerificationFailed` if the token does not match. Nothing is written
    /// on any failure.
    pub async fn forgot_password(
        &self,
        email: &str,
        new_password: &SecretString,
        token: &str,
    ) -> Result<(), AuthError> {
        let email = normalize_email(email);
        let password_hash = self.hash_password(new_password)?;

        let mut tx = self.transactions.begin().await?;
        let Some(forgot) = tx.read_forgot(&email).await? else {
            let _ = tx.rollback().await;
            return Err(AuthError::NotFound(format!("password reset for {email}")));
        };
        if forgot.token_hash != hash_token(token) {
            let _ = tx.rollback().await;
            return Err(AuthError::VerificationFailed(
                "reset token does not match".to_string(),
            ));
        }
        if !tx.update_password(&email, &password_hash).await? {
            let _ = tx.rollback().await;
            return Err(account_not_found(&email));
        }
        tx.delete_forgot(&email).await?;
        tx.commit().await?;

        info!("password reset completed");
        Ok(())
    }

    /// Change the password of the account the access token was issued to.
    ///
    /// # Errors
    ///
    /// `InvalidToken` if the token is not a valid access token for `email`,
    /// `NotFound` if the account is gone.
    pub async fn update_password(
        &self,
        email: &str,
        new_password: &SecretString,
        access_token: &str,
    ) -> Result<(), AuthError> {
        let email = normalize_email(email);
        self.tokenizer
            .validate_access_token(&email, access_token)
            .await?;
        let password_hash = self.hash_password(new_password)?;
        if !self.accounts.update_password(&email, &password_hash).await? {
            return Err(account_not_found(&email));
        }
        info!("password changed");
        Ok(())
    }

    /// Soft delete the account and drop its sessions.
    ///
    /// # Errors
    ///
    /// `InvalidToken` if the token is not a valid access token for `email`.
    pub async fn delete(&self, email: &str, access_token: &str) -> Result<(), AuthError> {
        let email = normalize_email(email);
        self.tokenizer
            .validate_access_token(&email, access_token)
            .await?;
        if !self.accounts.delete(&email).await? {
            return Err(account_not_found(&email));
        }
        let dropped = self.sessions.delete_all(&email).await?;
        info!(sessions = dropped, "account deleted");
        Ok(())
    }

    /// Move the account to `new_email`. The account must verify the new
    /// address before it can authenticate again.
    ///
    /// # Errors
    ///
    /// `InvalidToken` if the token is not a valid access token for `email`,
    /// `Duplicate` if `new_email` is taken.
    pub async fn update_email(
        &self,
        email: &str,
        new_email: &str,
        access_token: &str,
    ) -> Result<(), AuthError> {
        let email = normalize_email(email);
        self.tokenizer
            .validate_access_token(&email, access_token)
            .await?;
        let new_email = checked_email(new_email)?;
        if new_email == email {
            return Err(AuthError::InvalidInput(
                "new email must differ from the current one".to_string(),
            ));
        }

        let token = generate_token().map_err(AuthError::Internal)?;
        if !self
            .accounts
            .update_email(&email, &new_email, &hash_token(&token))
            .await?
        {
            return Err(account_not_found(&email));
        }
        if let Err(err) = self.sessions.delete_all(&email).await {
            warn!(error = %err, "failed to drop sessions after email change");
        }
        info!("account email changed");

        self.mailer.send_verification(&new_email, &token).await
    }

    /// # Errors
    ///
    /// `NotFound` for an unknown email.
    pub async fn read(&self, email: &str) -> Result<Account, AuthError> {
        let email = normalize_email(email);
        self.accounts
            .read(&email)
            .await?
            .map(Account::from)
            .ok_or_else(|| account_not_found(&email))
    }

    /// Enable or disable an account. Disabled accounts cannot authenticate.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown email.
    pub async fn set_enabled(&self, email: &str, enabled: bool) -> Result<(), AuthError> {
        let email = normalize_email(email);
        if !self.accounts.set_enabled(&email, enabled).await? {
            return Err(account_not_found(&email));
        }
        info!(enabled, "account availability changed");
        Ok(())
    }

    /// Replace the roles embedded in future access tokens.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown email.
    pub async fn assign_roles(&self, email: &str, roles: &[String]) -> Result<(), AuthError> {
        let email = normalize_email(email);
        if !self.accounts.set_roles(&email, roles).await? {
            return Err(account_not_found(&email));
        }
        Ok(())
    }

    fn hash_password(&self, password: &SecretString) -> Result<String, AuthError> {
        let password = password.expose_secret();
        if password.is_empty() {
            return Err(AuthError::InvalidInput("password is required".to_string()));
        }
        self.hasher.hash(password).map_err(AuthError::Internal)
    }
}

fn checked_email(email: &str) -> Result<String, AuthError> {
    let email = normalize_email(email);
    if valid_email(&email) {
        Ok(email)
    } else {
        Err(AuthError::InvalidInput("invalid email".to_string()))
    }
}

fn account_not_found(email: &str) -> AuthError {
    AuthError::NotFound(format!("account {email}"))
}
