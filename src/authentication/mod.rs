//! Credential verification and token issuance.
//!
//! Three login paths end in the same place: password ([`AuthenticationService`]),
//! emailed one-time code ([`LogonCodeService`]) and federated identity
//! ([`social::SocialBridge`]). Each mints an access and refresh token pair with
//! the account's current roles.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AuthError;
use crate::store::AccountRecord;
use crate::tokens::Tokenizer;

mod logon_code;
mod service;
pub mod social;

pub use logon_code::{DEFAULT_LOGON_CODE_TTL_MINUTES, LogonCodeService};
pub use service::AuthenticationService;

/// A freshly issued token pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Authenticated {
    pub access_token: String,
    pub refresh_token: String,
}

/// Lifecycle gate applied before any token is issued. Deletion is reported
/// before verification, verification before availability.
///
/// # Errors
///
/// `AccountDeleted`, `AccountNotVerified` or `AccountDisabled`.
pub fn check_health(account: &AccountRecord) -> Result<(), AuthError> {
    if account.is_deleted {
        return Err(AuthError::AccountDeleted(account.email.clone()));
    }
    if !account.is_verified {
        return Err(AuthError::AccountNotVerified(account.email.clone()));
    }
    if !account.is_enabled {
        return Err(AuthError::AccountDisabled(account.email.clone()));
    }
    Ok(())
}

pub(crate) async fn issue(
    tokenizer: &Tokenizer,
    account: &AccountRecord,
) -> Result<Authenticated, AuthError> {
    let access_token = tokenizer
        .create_access_token(&account.email, &account.roles)
        .await?;
    let refresh_token = tokenizer.create_refresh_token(&account.email).await?;
    Ok(Authenticated {
        access_token,
        refresh_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn account(deleted: bool, verified: bool, enabled: bool) -> AccountRecord {
        AccountRecord {
            email: "a@x.com".to_string(),
            password_hash: String::new(),
            is_verified: verified,
            is_enabled: enabled,
            is_deleted: deleted,
            verification_token_hash: None,
            roles: Vec::new(),
            social_providers: Vec::new(),
            created_at: Utc::now(),
            modified_at: Utc::now(),
        }
    }

    #[test]
    fn health_gate_order() {
        assert!(matches!(
            check_health(&account(true, false, false)),
            Err(AuthError::AccountDeleted(_))
        ));
        assert!(matches!(
            check_health(&account(true, true, true)),
            Err(AuthError::AccountDeleted(_))
        ));
        assert!(matches!(
            check_health(&account(false, false, false)),
            Err(AuthError::AccountNotVerified(_))
        ));
        assert!(matches!(
            check_health(&account(false, true, false)),
            Err(AuthError::AccountDisabled(_))
        ));
        assert!(check_health(&account(false, true, true)).is_ok());
    }
}
