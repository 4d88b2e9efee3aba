//! Wildcard reverse-proxy routes
//!
//! `/backend/*path` and `/ai/*path` reach the matching upstream with the
//! route prefix stripped. They sit behind authentication and rate limiting
//! like every other non-public route. A successful write through `/backend`
//! drops the same cache families the typed routes would.

use axum::{
    extract::State,
    http::Method,
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::cache::Invalidation;
use crate::error::GatewayError;
use crate::forwarder::ForwardContext;
use crate::handlers::patients::{
    RESOURCE as PATIENTS, collection_invalidation, patient_invalidation, records_invalidation,
};
use crate::server::AppState;

pub const BACKEND_PREFIX: &str = "/backend";
pub const AI_PREFIX: &str = "/ai";

/// ANY /backend/*path
pub async fn proxy_backend(
    State(state): State<AppState>,
    ctx: ForwardContext,
) -> Result<Response, GatewayError> {
    proxy(&state, &ctx, BACKEND_PREFIX, false).await
}

/// ANY /ai/*path
pub async fn proxy_ai(
    State(state): State<AppState>,
    ctx: ForwardContext,
) -> Result<Response, GatewayError> {
    proxy(&state, &ctx, AI_PREFIX, true).await
}

/// Cache families a write to backend `path` may have changed
#[must_use]
pub fn backend_write_invalidation(path: &str) -> Invalidation {
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    match (segments.next(), segments.next()) {
        (Some(PATIENTS), None) => collection_invalidation(),
        (Some(PATIENTS), Some(id)) => patient_invalidation(id),
        (Some("clinical"), Some("notes")) => records_invalidation(),
        _ => Invalidation::new(),
    }
}

fn is_write(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

async fn proxy(
    state: &AppState,
    ctx: &ForwardContext,
    prefix: &str,
    to_ai: bool,
) -> Result<Response, GatewayError> {
    let upstream = if to_ai { &state.ai } else { &state.backend };
    let response = state
        .forwarder
        .proxy(ctx, upstream, prefix)
        .await
        .map_err(|source| GatewayError::Upstream {
            request_id: ctx.request_id.clone(),
            source,
        })?;

    if !to_ai && is_write(&ctx.method) && response.is_success() {
        let path = ctx.path.strip_prefix(prefix).unwrap_or(&ctx.path);
        let plan = backend_write_invalidation(path);
        if !plan.is_empty() {
            let removed = state.cache.invalidate(&plan).await;
            debug!(
                request_id = %ctx.request_id,
                path = %path,
                removed,
                "Passthrough write invalidated cache"
            );
        }
    }

    Ok(response.into_response())
}
