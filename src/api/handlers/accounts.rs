//! Account lifecycle endpoints.

use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::StatusCode,
};
use secrecy::SecretString;
use std::sync::Arc;

use super::types::{
    ChangeEmailRequest, ChangePasswordRequest, CreateAccountRequest, DeleteAccountRequest,
    EmailRequest, ResetPasswordRequest, VerifyAccountRequest,
};
use crate::accounts::AccountService;
use crate::api::problem::Problem;

/// Register an account and send its verification email.
#[utoipa::path(
    post,
    path = "/api/accounts",
    request_body = CreateAccountRequest,
    responses(
        (status = 201, description = "Account created"),
        (status = 400, description = "Invalid email or password", body = Problem),
        (status = 409, description = "Email already registered", body = Problem)
    ),
    tag = "accounts"
)]
pub async fn create(
    accounts: Extension<Arc<AccountService>>,
    payload: Result<Json<CreateAccountRequest>, JsonRejection>,
) -> Result<StatusCode, Problem> {
    let Json(request) = payload?;
    accounts
        .create(&request.email, &SecretString::from(request.password))
        .await?;
    Ok(StatusCode::CREATED)
}

#[utoipa::path(
    post,
    path = "/api/accounts/verify",
    request_body = VerifyAccountRequest,
    responses(
        (status = 204, description = "Account verified"),
        (status = 400, description = "Token does not match", body = Problem),
        (status = 404, description = "Unknown account", body = Problem)
    ),
    tag = "accounts"
)]
pub async fn verify(
    accounts: Extension<Arc<AccountService>>,
    payload: Result<Json<VerifyAccountRequest>, JsonRejection>,
) -> Result<StatusCode, Problem> {
    let Json(request) = payload?;
    accounts.verify(&request.email, &request.token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Resend the verification email (always 204 to avoid account enumeration).
#[utoipa::path(
    post,
    path = "/api/accounts/resend",
    request_body = EmailRequest,
    responses(
        (status = 204, description = "Resend accepted")
    ),
    tag = "accounts"
)]
pub async fn resend(
    accounts: Extension<Arc<AccountService>>,
    payload: Result<Json<EmailRequest>, JsonRejection>,
) -> Result<StatusCode, Problem> {
    let Json(request) = payload?;
    accounts.resend(&request.email).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Email a password reset link (always 204 to avoid account enumeration).
#[utoipa::path(
    post,
    path = "/api/accounts/forgot",
    request_body = EmailRequest,
    responses(
        (status = 204, description = "Reset requested")
    ),
    tag = "accounts"
)]
pub async fn forgot(
    accounts: Extension<Arc<AccountService>>,
    payload: Result<Json<EmailRequest>, JsonRejection>,
) -> Result<StatusCode, Problem> {
    let Json(request) = payload?;
    accounts.forgot(&request.email).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/accounts/reset",
    request_body = ResetPasswordRequest,
    responses(
        (status = 204, description = "Password reset"),
        (status = 400, description = "Token does not match", body = Problem),
        (status = 404, description = "No reset outstanding", body = Problem)
    ),
    tag = "accounts"
)]
pub async fn reset(
    accounts: Extension<Arc<AccountService>>,
    payload: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> Result<StatusCode, Problem> {
    let Json(request) = payload?;
    accounts
        .forgot_password(
            &request.email,
            &SecretString::from(request.password),
            &request.token,
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    put,
    path = "/api/accounts/delete",
    request_body = DeleteAccountRequest,
    responses(
        (status = 204, description = "Account deleted"),
        (status = 400, description = "Invalid access token", body = Problem)
    ),
    tag = "accounts"
)]
pub async fn delete(
    accounts: Extension<Arc<AccountService>>,
    payload: Result<Json<DeleteAccountRequest>, JsonRejection>,
) -> Result<StatusCode, Problem> {
    let Json(request) = payload?;
    accounts
        .delete(&request.email, &request.access_token)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    put,
    path = "/api/accounts/password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 204, description = "Password changed"),
        (status = 400, description = "Invalid access token or password", body = Problem)
    ),
    tag = "accounts"
)]
pub async fn change_password(
    accounts: Extension<Arc<AccountService>>,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<StatusCode, Problem> {
    let Json(request) = payload?;
    accounts
        .update_password(
            &request.email,
            &SecretString::from(request.new_password),
            &request.access_token,
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Move the account to a new email; it must be verified again.
#[utoipa::path(
    put,
    path = "/api/accounts/email",
    request_body = ChangeEmailRequest,
    responses(
        (status = 204, description = "Email changed, verification sent"),
        (status = 400, description = "Invalid access token or email", body = Problem),
        (status = 409, description = "New email already registered", body = Problem)
    ),
    tag = "accounts"
)]
pub async fn change_email(
    accounts: Extension<Arc<AccountService>>,
    payload: Result<Json<ChangeEmailRequest>, JsonRejection>,
) -> Result<StatusCode, Problem> {
    let Json(request) = payload?;
    accounts
        .update_email(&request.email, &request.new_email, &request.access_token)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
