//! HTTP adapter: routes, middleware and the server loop.

use anyhow::{Context, Result, anyhow};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{
        HeaderName, HeaderValue, Method, Request,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::options,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;

use crate::accounts::AccountService;
use crate::authentication::social::SocialBridge;
use crate::authentication::{AuthenticationService, LogonCodeService};
use crate::store::HealthCheck;

pub mod handlers;
pub mod problem;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;

pub use openapi::openapi;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Everything the handlers reach through request extensions.
#[derive(Clone)]
pub struct Services {
    pub accounts: Arc<AccountService>,
    pub authentication: Arc<AuthenticationService>,
    pub logon_codes: Arc<LogonCodeService>,
    pub social: Arc<SocialBridge>,
    pub health: Arc<dyn HealthCheck>,
}

/// Attach middleware and services to the documented routes.
#[must_use]
pub fn app(services: &Services, cors: Option<CorsLayer>) -> Router {
    let (router, _openapi) = router().split_for_parts();
    let app = router
        .route("/health", options(handlers::health::health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(services.accounts.clone()))
                .layer(Extension(services.authentication.clone()))
                .layer(Extension(services.logon_codes.clone()))
                .layer(Extension(services.social.clone()))
                .layer(Extension(services.health.clone())),
        );

    match cors {
        Some(cors) => app.layer(cors),
        None => app,
    }
}

/// Serve `app` until ctrl-c.
///
/// # Errors
///
/// Returns an error if the port cannot be bound or the server fails.
pub async fn serve(port: u16, app: Router) -> Result<()> {
    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

/// CORS for the configured browser origins; `None` when no origin is allowed.
///
/// # Errors
///
/// Returns an error if an origin is not a URL with a host.
pub fn cors_layer(allowed_origins: &[String]) -> Result<Option<CorsLayer>> {
    if allowed_origins.is_empty() {
        return Ok(None);
    }
    let origins = allowed_origins
        .iter()
        .map(|origin| origin_header(origin))
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(
        CorsLayer::new()
            .allow_headers([CONTENT_TYPE, AUTHORIZATION])
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_origin(AllowOrigin::list(origins)),
    ))
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn origin_header(origin: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(origin).with_context(|| format!("Invalid allowed origin: {origin}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Allowed origin must include a valid host: {origin}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build origin header")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_header_drops_path() -> Result<()> {
        let value = origin_header("https://app.bulwark.dev:8443/login")?;
        assert_eq!(value, "https://app.bulwark.dev:8443");
        Ok(())
    }

    #[test]
    fn cors_is_optional() -> Result<()> {
        assert!(cors_layer(&[])?.is_none());
        assert!(cors_layer(&["https://app.bulwark.dev".to_string()])?.is_some());
        assert!(cors_layer(&["not a url".to_string()]).is_err());
        Ok(())
    }
}
