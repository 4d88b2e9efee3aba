//! API handlers for the gateway's route groups
//!
//! Reads consult the response cache before forwarding; writes forward and,
//! on success, invalidate the cache families they affect.

pub mod admin;
pub mod ai;
pub mod auth;
pub mod clinical;
pub mod health;
pub mod insurance;
pub mod passthrough;
pub mod patients;

use axum::{
    extract::{Query, rejection::QueryRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use rustc_hash::FxHashMap;
use std::time::Duration;
use tracing::debug;

use crate::cache::{CACHE_STATUS_HEADER, CachedResponse, Invalidation};
use crate::error::GatewayError;
use crate::forwarder::{ForwardContext, Upstream, UpstreamResponse};
use crate::server::AppState;

pub type QueryParams = FxHashMap<String, String>;

/// Unwrap query parameters, turning a malformed query string into a 400
pub(crate) fn query_params(
    query: Result<Query<QueryParams>, QueryRejection>,
) -> Result<QueryParams, GatewayError> {
    query
        .map(|Query(params)| params)
        .map_err(|e| GatewayError::Validation(e.body_text()))
}

/// Write bodies must at least be a JSON object
pub(crate) fn require_json_object(ctx: &ForwardContext) -> Result<(), GatewayError> {
    match serde_json::from_slice::<serde_json::Value>(&ctx.body) {
        Ok(serde_json::Value::Object(_)) => Ok(()),
        Ok(_) => Err(GatewayError::Validation(
            "request body must be a JSON object".to_string(),
        )),
        Err(e) => Err(GatewayError::Validation(format!("invalid JSON body: {e}"))),
    }
}

/// Forward, mapping transport failures to a 502 that carries the request id
pub(crate) async fn forward(
    state: &AppState,
    ctx: &ForwardContext,
    upstream: &Upstream,
    path: &str,
) -> Result<UpstreamResponse, GatewayError> {
    state
        .forwarder
        .forward(ctx, upstream, path)
        .await
        .map_err(|source| GatewayError::Upstream {
            request_id: ctx.request_id.clone(),
            source,
        })
}

/// Serve from cache, or forward and cache a 200 answer under `key`
pub(crate) async fn cached_forward(
    state: &AppState,
    ctx: &ForwardContext,
    upstream: &Upstream,
    path: &str,
    key: &str,
    ttl: Duration,
) -> Result<Response, GatewayError> {
    if let Some(response) = state
        .cache
        .get::<CachedResponse>(key)
        .await
        .and_then(CachedResponse::into_response)
    {
        debug!(request_id = %ctx.request_id, key = %key, "Cache hit");
        return Ok(response);
    }

    // Ask for an identity body so cached bytes replay without `Content-Encoding`;
    // the compression layer encodes per client on the way out
    let mut identity = ctx.clone();
    identity.headers.remove(header::ACCEPT_ENCODING);

    let upstream_response = forward(state, &identity, upstream, path).await?;
    if upstream_response.status == StatusCode::OK
        && !upstream_response.headers.contains_key(header::CONTENT_ENCODING)
    {
        state
            .cache
            .set(key, &CachedResponse::from_upstream(&upstream_response), ttl)
            .await;
    }

    let mut response = upstream_response.into_response();
    if state.cache.is_enabled() {
        response
            .headers_mut()
            .insert(CACHE_STATUS_HEADER, HeaderValue::from_static("MISS"));
    }
    Ok(response)
}

/// Forward a write and drop the affected cache entries if it succeeded
pub(crate) async fn forward_and_invalidate(
    state: &AppState,
    ctx: &ForwardContext,
    upstream: &Upstream,
    path: &str,
    plan: &Invalidation,
) -> Result<Response, GatewayError> {
    let upstream_response = forward(state, ctx, upstream, path).await?;
    if upstream_response.is_success() && !plan.is_empty() {
        state.cache.invalidate(plan).await;
    }
    Ok(upstream_response.into_response())
}
