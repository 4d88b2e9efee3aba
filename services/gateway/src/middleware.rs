//! Middleware for request correlation, authentication, rate limiting and logging
//!
//! Stage order, outermost first: request id, logging, panic recovery, CORS,
//! then per route: bearer authentication, rate limiting, role checks.

use axum::{
    Json,
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::{HeaderName, HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, Any as AnyOrigin, CorsLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::metrics::get_metrics;
use crate::models::ErrorResponse;
use crate::rate_limiter::{RateDecision, RateLimiter};
use crate::token::{AccessClaims, AuthError, Role, TokenService};
use crate::utils::{REQUEST_ID_HEADER, TrustedProxies, get_client_ip, is_valid_request_id};

/// Authenticated caller, taken from a validated access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: String,
    pub email: String,
    pub role: Role,
}

impl From<AccessClaims> for CallerIdentity {
    fn from(claims: AccessClaims) -> Self {
        Self {
            user_id: claims.sub,
            email: claims.email,
            role: claims.role,
        }
    }
}

/// Per-request context carried in request extensions
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub client_ip: String,
    /// Set once the bearer token has been accepted
    pub caller: Option<CallerIdentity>,
}

impl RequestContext {
    /// Context with a freshly generated request id
    #[must_use]
    pub fn new(client_ip: String) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            client_ip,
            caller: None,
        }
    }

    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.caller.as_ref().map(|c| c.user_id.as_str())
    }
}

/// Authentication middleware state
#[derive(Clone)]
pub struct AuthState {
    pub tokens: Arc<TokenService>,
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("tokens", &"Arc<TokenService>")
            .finish()
    }
}

/// Rate limiting middleware state
#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: Arc<RateLimiter>,
}

impl std::fmt::Debug for RateLimitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitState")
            .field("limiter", &"Arc<RateLimiter>")
            .finish()
    }
}

fn request_context(request: &Request) -> RequestContext {
    request.extensions().get::<RequestContext>().cloned().unwrap_or_else(|| {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        RequestContext::new(get_client_ip(request.headers(), peer, &TrustedProxies::default()))
    })
}

/// Assign the request id and client address; echo the id on the response
pub async fn request_id_middleware(
    State(proxies): State<TrustedProxies>,
    mut request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client_ip = get_client_ip(request.headers(), peer, &proxies);

    let mut ctx = RequestContext::new(client_ip);
    if let Some(inbound) = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|id| is_valid_request_id(id))
    {
        ctx.request_id = inbound.to_string();
    }

    let request_id = ctx.request_id.clone();
    request.extensions_mut().insert(ctx);

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Route template a request was dispatched to, e.g. `/api/v1/patients/:id`
#[derive(Debug, Clone)]
pub struct MatchedRoute(pub String);

/// Copy the matched route template onto the response for the outer logger
pub async fn matched_route_middleware(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| MatchedRoute(p.as_str().to_string()));

    let mut response = next.run(request).await;
    if let Some(route) = route {
        response.extensions_mut().insert(route);
    }
    response
}

/// Request logging middleware
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let ctx = request_context(&request);

    get_metrics().request_started();
    let response = next.run(request).await;
    get_metrics().request_finished();

    let duration = start.elapsed();
    let status = response.status();
    let user_id = response
        .extensions()
        .get::<CallerIdentity>()
        .map_or("-", |caller| caller.user_id.as_str());
    let route = response
        .extensions()
        .get::<MatchedRoute>()
        .map_or("unmatched", |r| r.0.as_str());

    get_metrics().record_http_request(
        method.as_str(),
        route,
        status.as_u16(),
        duration.as_secs_f64(),
    );

    macro_rules! log_request {
        ($level:ident) => {
            $level!(
                method = %method,
                uri = %uri.path(),
                status = status.as_u16(),
                duration_ms = duration.as_millis(),
                client_ip = %ctx.client_ip,
                request_id = %ctx.request_id,
                user_id = %user_id,
                "Request processed"
            )
        };
    }

    if status.is_server_error() {
        log_request!(error);
    } else if status.is_client_error() {
        log_request!(warn);
    } else {
        log_request!(info);
    }

    response
}

/// Turn a caught panic into a 500 envelope
pub fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic payload");
    error!(panic = %detail, "Handler panicked");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("internal server error")),
    )
        .into_response()
}

/// Authentication middleware
pub async fn auth_middleware(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let ctx = request_context(&request);

    let claims = match bearer_token(&request).and_then(|token| auth_state.tokens.validate(&token)) {
        Ok(claims) => claims,
        Err(kind) => {
            warn!(
                reason = kind.kind(),
                client_ip = %ctx.client_ip,
                request_id = %ctx.request_id,
                path = %request.uri().path(),
                "Authentication rejected"
            );
            get_metrics().record_auth_failure(kind.kind());
            return Err(GatewayError::Auth(kind));
        }
    };

    let caller = CallerIdentity::from(claims);
    request.extensions_mut().insert(RequestContext {
        caller: Some(caller.clone()),
        ..ctx
    });

    let mut response = next.run(request).await;
    response.extensions_mut().insert(caller);
    Ok(response)
}

/// Bearer token from the `Authorization` header
fn bearer_token(request: &Request) -> Result<String, AuthError> {
    if !request.headers().contains_key(header::AUTHORIZATION) {
        return Err(AuthError::Missing);
    }
    request
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .map(|auth| auth.token().to_string())
        .ok_or(AuthError::Malformed)
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(rate_limit_state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let ctx = request_context(&request);
    let path = request.uri().path().to_string();

    match rate_limit_state.limiter.check_request(&ctx, &path).await {
        RateDecision::Allow { .. } => Ok(next.run(request).await),
        RateDecision::Reject { retry_after } => {
            warn!(
                client_ip = %ctx.client_ip,
                user_id = ctx.user_id().unwrap_or("-"),
                path = %path,
                retry_after,
                "Rate limit exceeded"
            );
            Err(GatewayError::RateLimited { retry_after })
        }
    }
}

/// Admit only callers holding the admin role
pub async fn require_admin(request: Request, next: Next) -> Result<Response, GatewayError> {
    let ctx = request_context(&request);
    match ctx.caller.as_ref().map(|c| c.role) {
        Some(Role::Admin) => Ok(next.run(request).await),
        role => {
            warn!(
                user_id = ctx.user_id().unwrap_or("-"),
                role = ?role,
                path = %request.uri().path(),
                "Admin route denied"
            );
            Err(GatewayError::Forbidden("admin role required".to_string()))
        }
    }
}

/// CORS layer factory
pub fn create_cors_layer(config: &GatewayConfig) -> CorsLayer {
    let mut cors = CorsLayer::new()
        .max_age(std::time::Duration::from_secs(config.cors.max_age_seconds))
        .expose_headers([header::CONTENT_LENGTH, HeaderName::from_static(REQUEST_ID_HEADER)]);

    // Wildcard origins cannot be combined with credentials
    if config.cors.allowed_origins.iter().any(|o| o == "*") {
        cors = cors.allow_origin(AnyOrigin).allow_credentials(false);
    } else {
        let origins: Vec<HeaderValue> = config
            .cors
            .allowed_origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok())
            .collect();
        cors = cors
            .allow_origin(AllowOrigin::list(origins))
            .allow_credentials(config.cors.allow_credentials);
    }

    let methods: Result<Vec<Method>, _> = config
        .cors
        .allowed_methods
        .iter()
        .map(|method| method.parse())
        .collect();
    if let Ok(methods) = methods {
        cors = cors.allow_methods(methods);
    }

    let headers: Result<Vec<HeaderName>, _> = config
        .cors
        .allowed_headers
        .iter()
        .map(|header| header.parse())
        .collect();
    if let Ok(headers) = headers {
        cors = cors.allow_headers(headers);
    }

    cors
}
