//! Forwarder unit tests against a mock upstream

use assert_matches::assert_matches;
use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use std::time::Duration;
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use clinical_gateway::{
    config::UpstreamConfig,
    forwarder::{ForwardContext, ForwardError, Forwarder, GATEWAY_HEADER, Upstream},
    middleware::CallerIdentity,
    token::Role,
};

use crate::common::DEAD_UPSTREAM;

fn context(method: Method, path: &str, query: Option<&str>, body: &str) -> ForwardContext {
    let mut headers = HeaderMap::new();
    headers.insert("content-type", HeaderValue::from_static("application/json"));
    headers.insert("x-user-id", HeaderValue::from_static("spoofed"));
    headers.insert("connection", HeaderValue::from_static("keep-alive"));

    ForwardContext {
        method,
        path: path.to_string(),
        query: query.map(String::from),
        headers,
        body: Bytes::from(body.to_string()),
        caller: Some(CallerIdentity {
            user_id: "u-42".to_string(),
            email: "u42@clinic.local".to_string(),
            role: Role::Doctor,
        }),
        request_id: "req-123".to_string(),
        client_ip: "203.0.113.9".to_string(),
    }
}

fn forwarder() -> Forwarder {
    Forwarder::new(&UpstreamConfig {
        timeout_seconds: 2,
        connect_timeout_seconds: 1,
        ..UpstreamConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_forward_preserves_method_query_body_and_sets_identity() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/patients"))
        .and(query_param("source", "intake"))
        .and(header("x-user-id", "u-42"))
        .and(header("x-user-role", "doctor"))
        .and(header("x-request-id", "req-123"))
        .and(header("x-forwarded-for", "203.0.113.9"))
        .and(body_string(r#"{"name":"Ada"}"#))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("content-type", "application/json")
                .set_body_string(r#"{"id":"p-1"}"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let upstream = Upstream::new("backend", &server.uri());
    let ctx = context(Method::POST, "/api/v1/patients", Some("source=intake"), r#"{"name":"Ada"}"#);
    let response = forwarder().forward(&ctx, &upstream, "/patients").await.unwrap();

    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.body, Bytes::from_static(br#"{"id":"p-1"}"#));
    assert_eq!(response.headers.get("content-type").unwrap(), "application/json");
}

#[tokio::test]
async fn test_upstream_errors_are_relayed_not_mapped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/patients/missing"))
        .respond_with(
            ResponseTemplate::new(404).set_body_string(r#"{"error":"patient not found"}"#),
        )
        .mount(&server)
        .await;

    let upstream = Upstream::new("backend", &server.uri());
    let ctx = context(Method::GET, "/api/v1/patients/missing", None, "");
    let response = forwarder()
        .forward(&ctx, &upstream, "/patients/missing")
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert!(!response.is_success());
}

#[tokio::test]
async fn test_proxy_strips_prefix_and_tags_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/reports/daily"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let upstream = Upstream::new("backend", &server.uri());
    let ctx = context(Method::GET, "/backend/reports/daily", None, "");
    let response = forwarder().proxy(&ctx, &upstream, "/backend").await.unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.headers.get(GATEWAY_HEADER).unwrap(), "clinical-gateway");
    assert_eq!(response.headers.get("access-control-allow-origin").unwrap(), "*");
}

#[tokio::test]
async fn test_unreachable_upstream_is_unavailable() {
    let upstream = Upstream::new("backend", DEAD_UPSTREAM);
    let ctx = context(Method::GET, "/api/v1/patients", None, "");

    assert_matches!(
        forwarder().forward(&ctx, &upstream, "/patients").await,
        Err(ForwardError::Unavailable(_))
    );
}

#[tokio::test]
async fn test_slow_upstream_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let upstream = Upstream::new("backend", &server.uri());
    let ctx = context(Method::GET, "/api/v1/patients", None, "");

    assert_matches!(
        forwarder().forward(&ctx, &upstream, "/patients").await,
        Err(ForwardError::Timeout(_))
    );
}

#[tokio::test]
async fn test_probe_reports_health() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let timeout = Duration::from_secs(1);
    assert!(forwarder().probe(&Upstream::new("backend", &server.uri()), timeout).await);
    assert!(!forwarder().probe(&Upstream::new("backend", DEAD_UPSTREAM), timeout).await);
}
