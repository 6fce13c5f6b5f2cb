use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
};
use std::sync::Arc;

use super::types::SocialRequest;
use crate::api::problem::Problem;
use crate::authentication::Authenticated;
use crate::authentication::social::SocialBridge;

/// Sign in with an identity assertion from a registered provider.
#[utoipa::path(
    post,
    path = "/api/authenticate/social",
    request_body = SocialRequest,
    responses(
        (status = 200, description = "Token pair issued", body = Authenticated),
        (status = 400, description = "Unsupported provider, rejected assertion or new unverified account", body = Problem)
    ),
    tag = "authentication"
)]
pub async fn authenticate_social(
    social: Extension<Arc<SocialBridge>>,
    payload: Result<Json<SocialRequest>, JsonRejection>,
) -> Result<Json<Authenticated>, Problem> {
    let Json(request) = payload?;
    let tokens = social.authenticate(&request.id, &request.provider).await?;
    Ok(Json(tokens))
}
