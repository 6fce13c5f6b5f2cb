use crate::jwt::TokenError;
use crate::store::StoreError;
use thiserror::Error;

/// Failures surfaced by the account, token and authentication services.
///
/// Lifecycle gates (`AccountDeleted`, `AccountNotVerified`, `AccountDisabled`)
/// are distinguishable because they are not secrets. Credential mismatches
/// always collapse to `AuthenticationFailed`.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} already exists")]
    Duplicate(String),
    #[error("verification failed: {0}")]
    VerificationFailed(String),
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("account {0} is deleted")]
    AccountDeleted(String),
    #[error("account {0} is not verified")]
    AccountNotVerified(String),
    #[error("account {0} is disabled")]
    AccountDisabled(String),
    #[error("no signing key available")]
    NoKeyAvailable,
    #[error("invalid token")]
    InvalidToken(#[source] TokenError),
    #[error("unsupported social provider: {0}")]
    UnsupportedProvider(String),
    #[error("invalid social token")]
    InvalidSocialToken(#[source] anyhow::Error),
    #[error("{0}")]
    InvalidInput(String),
    #[error("signing failed")]
    Signing(#[source] anyhow::Error),
    #[error("internal error")]
    Internal(#[source] anyhow::Error),
    #[error("email delivery failed")]
    Delivery(#[source] anyhow::Error),
    #[error("storage unavailable")]
    Storage(#[source] anyhow::Error),
}

impl AuthError {
    /// Whether the same request may succeed later. Credential and lifecycle
    /// failures are terminal for the presented credential.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Delivery(_))
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(what) => Self::Duplicate(what),
            StoreError::Backend(err) => Self::Storage(err),
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        Self::InvalidToken(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::error::Error as _;

    #[test]
    fn only_backend_failures_are_retryable() {
        assert!(AuthError::Storage(anyhow!("db down")).is_retryable());
        assert!(AuthError::Delivery(anyhow!("smtp down")).is_retryable());
        assert!(!AuthError::AuthenticationFailed.is_retryable());
        assert!(!AuthError::AccountDisabled("a@x.com".into()).is_retryable());
        assert!(!AuthError::InvalidToken(TokenError::Expired).is_retryable());
    }

    #[test]
    fn invalid_token_hides_cause_in_display() {
        let err = AuthError::from(TokenError::TokenSubjectMismatch);
        assert_eq!(err.to_string(), "invalid token");
        assert_eq!(
            err.source().map(ToString::to_string),
            Some("token subject mismatch".to_string())
        );
    }

    #[test]
    fn store_errors_map_to_taxonomy() {
        let dup = AuthError::from(StoreError::Duplicate("account a@x.com".into()));
        assert!(matches!(dup, AuthError::Duplicate(what) if what == "account a@x.com"));
        let backend = AuthError::from(StoreError::Backend(anyhow!("timeout")));
        assert!(backend.is_retryable());
    }
}
