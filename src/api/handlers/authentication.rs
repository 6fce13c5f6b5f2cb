//! Password authentication, session ledger and token validation endpoints.

use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::StatusCode,
};
use secrecy::SecretString;
use std::sync::Arc;

use super::types::{
    AcknowledgeRequest, AuthenticateRequest, RenewRequest, RevokeRequest, ValidateTokenRequest,
};
use crate::api::problem::Problem;
use crate::authentication::{Authenticated, AuthenticationService};
use crate::tokens::AccessClaims;

#[utoipa::path(
    post,
    path = "/api/authenticate",
    request_body = AuthenticateRequest,
    responses(
        (status = 200, description = "Token pair issued", body = Authenticated),
        (status = 400, description = "Authentication failed or account unhealthy", body = Problem)
    ),
    tag = "authentication"
)]
pub async fn authenticate(
    auth: Extension<Arc<AuthenticationService>>,
    payload: Result<Json<AuthenticateRequest>, JsonRejection>,
) -> Result<Json<Authenticated>, Problem> {
    let Json(request) = payload?;
    let tokens = auth
        .authenticate(&request.email, &SecretString::from(request.password))
        .await?;
    Ok(Json(tokens))
}

/// Record the session for a client after validating both tokens.
#[utoipa::path(
    post,
    path = "/api/authenticate/ack",
    request_body = AcknowledgeRequest,
    responses(
        (status = 201, description = "Session recorded"),
        (status = 400, description = "Invalid token", body = Problem)
    ),
    tag = "authentication"
)]
pub async fn acknowledge(
    auth: Extension<Arc<AuthenticationService>>,
    payload: Result<Json<AcknowledgeRequest>, JsonRejection>,
) -> Result<StatusCode, Problem> {
    let Json(request) = payload?;
    auth.validate_access_token(&request.email, &request.access_token)
        .await?;
    auth.validate_refresh_token(&request.email, &request.refresh_token)
        .await?;

    let tokens = Authenticated {
        access_token: request.access_token,
        refresh_token: request.refresh_token,
    };
    auth.acknowledge(&tokens, &request.email, &request.client_id)
        .await?;
    Ok(StatusCode::CREATED)
}

#[utoipa::path(
    post,
    path = "/api/authenticate/renew",
    request_body = RenewRequest,
    responses(
        (status = 200, description = "New token pair issued", body = Authenticated),
        (status = 400, description = "Invalid refresh token or account unhealthy", body = Problem)
    ),
    tag = "authentication"
)]
pub async fn renew(
    auth: Extension<Arc<AuthenticationService>>,
    payload: Result<Json<RenewRequest>, JsonRejection>,
) -> Result<Json<Authenticated>, Problem> {
    let Json(request) = payload?;
    let tokens = auth.renew(&request.email, &request.refresh_token).await?;
    Ok(Json(tokens))
}

/// Forget the session recorded for a client. Issued tokens remain valid until
/// they expire.
#[utoipa::path(
    delete,
    path = "/api/authenticate/revoke",
    request_body = RevokeRequest,
    responses(
        (status = 204, description = "Session removed"),
        (status = 400, description = "Invalid access token", body = Problem)
    ),
    tag = "authentication"
)]
pub async fn revoke(
    auth: Extension<Arc<AuthenticationService>>,
    payload: Result<Json<RevokeRequest>, JsonRejection>,
) -> Result<StatusCode, Problem> {
    let Json(request) = payload?;
    auth.validate_access_token(&request.email, &request.access_token)
        .await?;
    auth.revoke(&request.email, &request.client_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/authenticate/token/validate",
    request_body = ValidateTokenRequest,
    responses(
        (status = 200, description = "Token is valid", body = AccessClaims),
        (status = 400, description = "Invalid token", body = Problem)
    ),
    tag = "authentication"
)]
pub async fn validate(
    auth: Extension<Arc<AuthenticationService>>,
    payload: Result<Json<ValidateTokenRequest>, JsonRejection>,
) -> Result<Json<AccessClaims>, Problem> {
    let Json(request) = payload?;
    let claims = auth
        .validate_access_token(&request.email, &request.token)
        .await?;
    Ok(Json(claims))
}
