//! Handler tests through the full router.

#![allow(clippy::unwrap_used)]

use anyhow::Result;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header::CONTENT_TYPE},
};
use serde_json::{Value, json};
use tower::ServiceExt;

use crate::api::problem::{PROBLEM_CONTENT_TYPE, PROBLEM_TYPE};
use crate::api::{Services, app};
use crate::testing::Harness;

fn router(h: &Harness) -> Router {
    app(
        &Services {
            accounts: h.accounts.clone(),
            authentication: h.auth.clone(),
            logon_codes: h.codes.clone(),
            social: h.social.clone(),
            health: h.stores.health.clone(),
        },
        None,
    )
}

async fn call(router: &Router, method: Method, uri: &str, body: &Value) -> Result<(StatusCode, Value)> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(body)?))?;
    let response = router.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, value))
}

async fn post(router: &Router, uri: &str, body: &Value) -> Result<(StatusCode, Value)> {
    call(router, Method::POST, uri, body).await
}

#[tokio::test]
async fn health_reports_database_and_x_app() -> Result<()> {
    let h = Harness::new().await?;
    let request = Request::builder().uri("/health").body(Body::empty())?;
    let response = router(&h).oneshot(request).await?;

    assert_eq!(response.status(), StatusCode::OK);
    let x_app = response.headers().get("X-App").unwrap().to_str()?;
    assert!(x_app.starts_with(env!("CARGO_PKG_NAME")));
    assert!(response.headers().contains_key("x-request-id"));

    let body = to_bytes(response.into_body(), usize::MAX).await?;
    let health: Value = serde_json::from_slice(&body)?;
    assert_eq!(health["database"], "ok");
    assert_eq!(health["version"], env!("CARGO_PKG_VERSION"));
    Ok(())
}

#[tokio::test]
async fn password_flow_over_http() -> Result<()> {
    let h = Harness::new().await?;
    let app = router(&h);

    let (status, _) = post(&app, "/api/accounts", &json!({"email": "a@x.com", "password": "pw"})).await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, problem) = post(&app, "/api/authenticate", &json!({"email": "a@x.com", "password": "pw"})).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(problem["detail"], "account a@x.com is not verified");

    let token = h.mail.last_field("a@x.com", "token").await.unwrap();
    let (status, _) = post(&app, "/api/accounts/verify", &json!({"email": "a@x.com", "token": token})).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, tokens) = post(&app, "/api/authenticate", &json!({"email": "a@x.com", "password": "pw"})).await?;
    assert_eq!(status, StatusCode::OK);
    let access = tokens["accessToken"].as_str().unwrap().to_string();
    let refresh = tokens["refreshToken"].as_str().unwrap().to_string();

    let (status, claims) = post(
        &app,
        "/api/authenticate/token/validate",
        &json!({"email": "a@x.com", "clientId": "web", "token": access}),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(claims["sub"], "a@x.com");

    let (status, _) = post(
        &app,
        "/api/authenticate/ack",
        &json!({"email": "a@x.com", "clientId": "web", "accessToken": access, "refreshToken": refresh}),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, renewed) = post(
        &app,
        "/api/authenticate/renew",
        &json!({"email": "a@x.com", "refreshToken": refresh}),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert!(renewed["accessToken"].is_string());

    let (status, _) = call(
        &app,
        Method::DELETE,
        "/api/authenticate/revoke",
        &json!({"email": "a@x.com", "clientId": "web", "accessToken": access}),
    )
    .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(h.auth.session("a@x.com", "web").await.is_err());
    Ok(())
}

#[tokio::test]
async fn errors_are_problem_details() -> Result<()> {
    let h = Harness::new().await?;
    h.verified_account("a@x.com", "pw").await?;
    let app = router(&h);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/accounts")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&json!({"email": "a@x.com", "password": "pw"}))?))?;
    let response = app.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(
        response.headers().get(CONTENT_TYPE).unwrap(),
        PROBLEM_CONTENT_TYPE
    );
    let body = to_bytes(response.into_body(), usize::MAX).await?;
    let problem: Value = serde_json::from_slice(&body)?;
    assert_eq!(problem["type"], PROBLEM_TYPE);
    assert_eq!(problem["title"], "Conflict");
    assert_eq!(problem["status"], 409);

    let (status, problem) = post(&app, "/api/accounts/verify", &json!({"email": "ghost@x.com", "token": "t"})).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(problem["title"], "Not Found");

    let (status, problem) = post(&app, "/api/authenticate", &json!({"email": "a@x.com", "password": "bad"})).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(problem["detail"], "authentication failed");

    let (status, problem) = post(
        &app,
        "/api/authenticate/token/validate",
        &json!({"email": "a@x.com", "token": "not.a.token"}),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(problem["detail"], "invalid token");
    Ok(())
}

#[tokio::test]
async fn malformed_bodies_are_bad_requests() -> Result<()> {
    let h = Harness::new().await?;
    let app = router(&h);

    let (status, problem) = post(&app, "/api/authenticate", &json!({"email": "a@x.com"})).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(problem["type"], PROBLEM_TYPE);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/accounts")
        .body(Body::empty())?;
    let response = app.oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn logon_code_over_http() -> Result<()> {
    let h = Harness::new().await?;
    h.verified_account("a@x.com", "pw").await?;
    let app = router(&h);

    let (status, _) = post(&app, "/api/authenticate/logon/request", &json!({"email": "a@x.com"})).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let code = h.mail.last_field("a@x.com", "code").await.unwrap();

    let (status, tokens) = post(&app, "/api/authenticate/code", &json!({"email": "a@x.com", "code": code})).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(tokens["refreshToken"].is_string());

    let (status, _) = post(&app, "/api/authenticate/logon/request", &json!({"email": "ghost@x.com"})).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn social_over_http() -> Result<()> {
    let h = Harness::new().await?;
    let app = router(&h);

    let (status, problem) = post(&app, "/api/authenticate/social", &json!({"id": "g|a@x.com", "provider": "nope"})).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(problem["detail"], "unsupported social provider: nope");

    let (status, problem) = post(&app, "/api/authenticate/social", &json!({"id": "g|a@x.com", "provider": "stub"})).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(problem["detail"], "account a@x.com is not verified");
    Ok(())
}

#[tokio::test]
async fn account_changes_over_http() -> Result<()> {
    let h = Harness::new().await?;
    h.verified_account("a@x.com", "pw").await?;
    let app = router(&h);
    let tokens = h.auth.authenticate("a@x.com", &crate::testing::password("pw")).await?;

    let (status, _) = call(
        &app,
        Method::PUT,
        "/api/accounts/password",
        &json!({"email": "a@x.com", "newPassword": "pw2", "accessToken": tokens.access_token}),
    )
    .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = post(&app, "/api/accounts/forgot", &json!({"email": "a@x.com"})).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let token = h.mail.last_field("a@x.com", "token").await.unwrap();
    let (status, _) = post(
        &app,
        "/api/accounts/reset",
        &json!({"email": "a@x.com", "token": token, "password": "pw3"}),
    )
    .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = post(&app, "/api/accounts/resend", &json!({"email": "ghost@x.com"})).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = call(
        &app,
        Method::PUT,
        "/api/accounts/email",
        &json!({"email": "a@x.com", "newEmail": "b@x.com", "accessToken": tokens.access_token}),
    )
    .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = call(
        &app,
        Method::PUT,
        "/api/accounts/delete",
        &json!({"email": "b@x.com", "accessToken": tokens.access_token}),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}
