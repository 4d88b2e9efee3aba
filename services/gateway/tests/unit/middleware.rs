//! Middleware unit tests, each stage mounted on a stub route

use axum::{
    Extension, Router,
    body::Body,
    http::{Request, StatusCode},
    middleware,
    routing::get,
};
use rstest::*;
use std::sync::Arc;
use tower::ServiceExt;

use clinical_gateway::{
    config::AuthConfig,
    middleware::{
        AuthState, RequestContext, auth_middleware, create_cors_layer, request_id_middleware,
        require_admin,
    },
    token::{Role, TokenService},
    utils::TrustedProxies,
};

use crate::common::{TEST_ORIGIN, TEST_SECRET, body_json, from_peer, test_config};

#[fixture]
fn tokens() -> Arc<TokenService> {
    Arc::new(TokenService::new(&AuthConfig {
        jwt_secret: TEST_SECRET.to_string(),
        ..AuthConfig::default()
    }))
}

/// Echo what the pipeline attached to the request
async fn whoami(Extension(ctx): Extension<RequestContext>) -> String {
    format!(
        "{}|{}",
        ctx.request_id,
        ctx.caller.map_or_else(|| "-".to_string(), |c| c.user_id)
    )
}

fn protected(tokens: Arc<TokenService>) -> Router {
    Router::new()
        .route("/admin", get(whoami).route_layer(middleware::from_fn(require_admin)))
        .route("/me", get(whoami))
        .route_layer(middleware::from_fn_with_state(AuthState { tokens }, auth_middleware))
        .layer(middleware::from_fn_with_state(
            TrustedProxies::default(),
            request_id_middleware,
        ))
}

async fn call(app: Router, request: Request<Body>) -> axum::response::Response {
    app.oneshot(request).await.unwrap()
}

#[rstest]
#[tokio::test]
async fn test_request_id_is_generated_and_echoed(tokens: Arc<TokenService>) {
    let token = tokens.issue("u-1", "u1@clinic.local", Role::Patient).unwrap();
    let response = call(
        protected(tokens),
        Request::get("/me")
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let request_id = response.headers()["x-request-id"].to_str().unwrap().to_string();
    assert_eq!(request_id.len(), 36);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body, format!("{request_id}|u-1"));
}

#[rstest]
#[case("trace-abc-123", true)]
#[case("has spaces", false)]
#[tokio::test]
async fn test_inbound_request_id_reused_only_when_safe(
    tokens: Arc<TokenService>,
    #[case] inbound: &str,
    #[case] reused: bool,
) {
    let response = call(
        protected(tokens),
        Request::get("/me")
            .header("x-request-id", inbound)
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    // Rejected by auth, but still correlated
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()["x-request-id"] == inbound, reused);
}

/// Echo the client address the pipeline settled on
async fn client_ip(Extension(ctx): Extension<RequestContext>) -> String {
    ctx.client_ip
}

#[rstest]
#[case("192.0.2.10:4000", "192.0.2.10")]
#[case("10.0.0.1:4000", "203.0.113.7")]
#[tokio::test]
async fn test_forwarded_for_only_honored_from_trusted_proxy(
    #[case] peer: &str,
    #[case] expected: &str,
) {
    let proxies = TrustedProxies::new(["10.0.0.1".parse().unwrap()]);
    let app = Router::new()
        .route("/ip", get(client_ip))
        .layer(middleware::from_fn_with_state(proxies, request_id_middleware));

    let request = Request::get("/ip")
        .header("x-forwarded-for", "203.0.113.7")
        .body(Body::empty())
        .unwrap();
    let response = call(app, from_peer(request, peer)).await;

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body, expected);
}

#[rstest]
#[case(None, "authorization header is required")]
#[case(Some("Basic dXNlcjpwYXNz"), "invalid token")]
#[case(Some("Bearer not.a.token"), "invalid token")]
#[tokio::test]
async fn test_auth_rejections(
    tokens: Arc<TokenService>,
    #[case] authorization: Option<&str>,
    #[case] message: &str,
) {
    let mut request = Request::get("/me");
    if let Some(authorization) = authorization {
        request = request.header("authorization", authorization);
    }
    let response = call(protected(tokens), request.body(Body::empty()).unwrap()).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], message);
}

#[rstest]
#[case(Role::Patient, StatusCode::FORBIDDEN)]
#[case(Role::Doctor, StatusCode::FORBIDDEN)]
#[case(Role::Admin, StatusCode::OK)]
#[tokio::test]
async fn test_admin_gate(
    tokens: Arc<TokenService>,
    #[case] role: Role,
    #[case] expected: StatusCode,
) {
    let token = tokens.issue("u-1", "u1@clinic.local", role).unwrap();
    let response = call(
        protected(tokens),
        Request::get("/admin")
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), expected);
}

#[tokio::test]
async fn test_cors_allows_configured_origin_only() {
    let config = test_config("http://backend", "http://ai");
    let app = Router::new()
        .route("/ping", get(|| async { "pong" }))
        .layer(create_cors_layer(&config));

    let allowed = call(
        app.clone(),
        Request::get("/ping").header("origin", TEST_ORIGIN).body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(allowed.headers()["access-control-allow-origin"], TEST_ORIGIN);
    assert_eq!(allowed.headers()["access-control-allow-credentials"], "true");

    let denied = call(
        app,
        Request::get("/ping")
            .header("origin", "https://evil.example")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert!(denied.headers().get("access-control-allow-origin").is_none());
}

#[tokio::test]
async fn test_wildcard_origin_drops_credentials() {
    let mut config = test_config("http://backend", "http://ai");
    config.cors.allowed_origins = vec!["*".to_string()];
    let app = Router::new()
        .route("/ping", get(|| async { "pong" }))
        .layer(create_cors_layer(&config));

    let response = call(
        app,
        Request::get("/ping").header("origin", "https://any.example").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    assert!(response.headers().get("access-control-allow-credentials").is_none());
}
