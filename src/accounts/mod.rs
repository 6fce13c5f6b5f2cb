//! Account registration and lifecycle.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::store::{AccountRecord, SocialProvider};

pub mod secrets;
mod service;

pub use secrets::SecretHasher;
pub use service::{AccountService, ResendOutcome};

/// Account state without credentials or pending tokens.
#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub email: String,
    pub is_verified: bool,
    pub is_enabled: bool,
    pub is_deleted: bool,
    pub roles: Vec<String>,
    pub social_providers: Vec<SocialProvider>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl From<AccountRecord> for Account {
    fn from(record: AccountRecord) -> Self {
        Self {
            email: record.email,
            is_verified: record.is_verified,
            is_enabled: record.is_enabled,
            is_deleted: record.is_deleted,
            roles: record.roles,
            social_providers: record.social_providers,
            created: record.created_at,
            modified: record.modified_at,
        }
    }
}
