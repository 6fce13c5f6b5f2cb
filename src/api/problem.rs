//! RFC 7807 problem responses.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

use crate::error::AuthError;

pub const PROBLEM_TYPE: &str = "https://latebit.io/bulwark/errors/";
pub const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Problem {
    #[must_use]
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            problem_type: PROBLEM_TYPE.to_string(),
            title: title(status).to_string(),
            status: status.as_u16(),
            detail: Some(detail.into()),
        }
    }

    #[must_use]
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

fn title(status: StatusCode) -> &'static str {
    match status {
        StatusCode::BAD_REQUEST => "Bad Request",
        StatusCode::NOT_FOUND => "Not Found",
        StatusCode::CONFLICT => "Conflict",
        StatusCode::INTERNAL_SERVER_ERROR => "Internal Error",
        other => other.canonical_reason().unwrap_or("Error"),
    }
}

impl From<AuthError> for Problem {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, err.to_string()),
            AuthError::Duplicate(_) => Self::new(StatusCode::CONFLICT, err.to_string()),
            AuthError::Storage(_)
            | AuthError::Delivery(_)
            | AuthError::Signing(_)
            | AuthError::Internal(_)
            | AuthError::NoKeyAvailable => {
                error!(error = ?err, "request failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            _ => Self::bad_request(err.to_string()),
        }
    }
}

impl From<JsonRejection> for Problem {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for Problem {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            [(CONTENT_TYPE, PROBLEM_CONTENT_TYPE)],
            Json(self),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::TokenError;
    use anyhow::anyhow;

    #[test]
    fn taxonomy_maps_to_status() {
        let cases = [
            (AuthError::NotFound("account a@x.com".into()), 404),
            (AuthError::Duplicate("account a@x.com".into()), 409),
            (AuthError::AuthenticationFailed, 400),
            (AuthError::AccountDeleted("a@x.com".into()), 400),
            (AuthError::InvalidToken(TokenError::Expired), 400),
            (AuthError::UnsupportedProvider("x".into()), 400),
            (AuthError::Storage(anyhow!("down")), 500),
            (AuthError::NoKeyAvailable, 500),
        ];
        for (err, status) in cases {
            assert_eq!(Problem::from(err).status, status);
        }
    }

    #[test]
    fn server_errors_hide_the_cause() {
        let problem = Problem::from(AuthError::Storage(anyhow!("password=hunter2")));
        assert_eq!(problem.title, "Internal Error");
        assert_eq!(problem.detail.as_deref(), Some("storage unavailable"));
    }

    #[test]
    fn serializes_type_field() -> anyhow::Result<()> {
        let problem = Problem::from(AuthError::AuthenticationFailed);
        let value = serde_json::to_value(&problem)?;
        assert_eq!(value["type"], PROBLEM_TYPE);
        assert_eq!(value["title"], "Bad Request");
        assert_eq!(value["status"], 400);
        assert_eq!(value["detail"], "authentication failed");
        Ok(())
    }
}
