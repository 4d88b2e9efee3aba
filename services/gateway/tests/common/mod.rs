//! Fixtures shared by the unit and integration suites

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    extract::ConnectInfo,
    http::{Request, Response},
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use clinical_gateway::{
    AppState, GatewayConfig,
    config::{AccountConfig, StoreConfig},
    router,
    store::{Counter, MemoryStore, SharedStore, StoreError},
    token::Role,
};

pub const TEST_SECRET: &str = "test-jwt-secret-key-for-testing-only";
pub const TEST_ORIGIN: &str = "http://localhost:3000";

/// Address nothing listens on, for upstream failure paths
pub const DEAD_UPSTREAM: &str = "http://127.0.0.1:1";

/// Configuration pointing both upstreams at the given URLs
pub fn test_config(backend_url: &str, ai_url: &str) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    config.server.compression = false;
    config.server.environment = "test".to_string();
    config.services.backend_url = backend_url.to_string();
    config.services.ai_service_url = ai_url.to_string();
    config.upstream.timeout_seconds = 5;
    config.upstream.connect_timeout_seconds = 1;
    config.upstream.health_timeout_seconds = 1;
    config.store = StoreConfig {
        url: "memory://".to_string(),
        operation_timeout_ms: 100,
    };
    config.auth.jwt_secret = TEST_SECRET.to_string();
    config.auth.token_expiry_seconds = 3600;
    config.auth.accounts.push(AccountConfig {
        user_id: "admin-1".to_string(),
        email: "admin@clinic.local".to_string(),
        password: "admin-password".to_string(),
        name: "Admin".to_string(),
        role: Role::Admin,
    });
    config.cors.allowed_origins = vec![TEST_ORIGIN.to_string()];
    config
}

/// State over a fresh in-memory store; the store handle is returned for inspection
pub fn memory_state(config: GatewayConfig) -> (AppState, Arc<MemoryStore>) {
    let memory = Arc::new(MemoryStore::new());
    let store: Arc<dyn SharedStore> = memory.clone();
    let state = AppState::new(config, store).expect("state should build");
    (state, memory)
}

pub fn failing_state(config: GatewayConfig) -> AppState {
    AppState::new(config, Arc::new(FailingStore)).expect("state should build")
}

pub fn app(state: &AppState) -> Router {
    router(state.clone())
}

/// Attach the TCP peer address the server would have seen
pub fn from_peer(mut request: Request<Body>, peer: &str) -> Request<Body> {
    let addr: SocketAddr = peer.parse().expect("peer should be a socket address");
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

/// `Authorization` value for a freshly issued access token
pub fn bearer(state: &AppState, user_id: &str, role: Role) -> String {
    let token = state
        .tokens
        .issue(user_id, &format!("{user_id}@clinic.local"), role)
        .expect("token should sign");
    format!("Bearer {token}")
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone()
        .oneshot(request)
        .await
        .expect("router is infallible")
}

pub fn get(uri: &str, authorization: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("authorization", authorization)
        .body(Body::empty())
        .expect("request should build")
}

pub fn json_request(
    method: &str,
    uri: &str,
    authorization: Option<&str>,
    body: &Value,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(authorization) = authorization {
        builder = builder.header("authorization", authorization);
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should read");
    serde_json::from_slice(&bytes).expect("body should be JSON")
}

/// Store whose every operation fails, as when Redis is down
#[derive(Debug, Default)]
pub struct FailingStore;

#[async_trait]
impl SharedStore for FailingStore {
    async fn increment(&self, _key: &str, _window: Duration) -> Result<Counter, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn delete(&self, _key: &str) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn delete_by_prefix(&self, _prefix: &str) -> Result<u64, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Err(StoreError::Timeout(Duration::from_millis(100)))
    }

    fn backend(&self) -> &'static str {
        "failing"
    }
}
