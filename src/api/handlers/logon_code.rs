use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::StatusCode,
};
use std::sync::Arc;

use super::types::{EmailRequest, LogonCodeRequest};
use crate::api::problem::Problem;
use crate::authentication::{Authenticated, LogonCodeService};

/// Email a one-time logon code.
#[utoipa::path(
    post,
    path = "/api/authenticate/logon/request",
    request_body = EmailRequest,
    responses(
        (status = 204, description = "Code sent"),
        (status = 404, description = "Unknown account", body = Problem)
    ),
    tag = "authentication"
)]
pub async fn request_code(
    codes: Extension<Arc<LogonCodeService>>,
    payload: Result<Json<EmailRequest>, JsonRejection>,
) -> Result<StatusCode, Problem> {
    let Json(request) = payload?;
    codes.request(&request.email).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/authenticate/code",
    request_body = LogonCodeRequest,
    responses(
        (status = 200, description = "Token pair issued", body = Authenticated),
        (status = 400, description = "Code invalid, expired or used", body = Problem)
    ),
    tag = "authentication"
)]
pub async fn authenticate_code(
    codes: Extension<Arc<LogonCodeService>>,
    payload: Result<Json<LogonCodeRequest>, JsonRejection>,
) -> Result<Json<Authenticated>, Problem> {
    let Json(request) = payload?;
    let tokens = codes.authenticate(&request.email, &request.code).await?;
    Ok(Json(tokens))
}
