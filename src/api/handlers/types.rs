//! Request bodies for the account and authentication endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct CreateAccountRequest {
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyAccountRequest {
    pub email: String,
    pub token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub token: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DeleteAccountRequest {
    pub email: String,
    pub access_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub email: String,
    pub new_password: String,
    pub access_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEmailRequest {
    pub email: String,
    pub new_email: String,
    pub access_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AuthenticateRequest {
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgeRequest {
    pub email: String,
    pub client_id: String,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RenewRequest {
    pub email: String,
    pub refresh_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RevokeRequest {
    pub email: String,
    pub client_id: String,
    pub access_token: String,
}

/// `clientId` is accepted for compatibility; validation does not use it.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ValidateTokenRequest {
    pub email: String,
    #[serde(default)]
    pub client_id: Option<String>,
    pub token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LogonCodeRequest {
    pub email: String,
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SocialRequest {
    /// Identity assertion issued by the provider (an ID token for Google).
    pub id: String,
    pub provider: String,
}
