//! Admin handlers (admin role only)

use axum::{
    Json,
    extract::State,
    http::Method,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::{info, warn};

use super::forward;
use crate::error::GatewayError;
use crate::forwarder::ForwardContext;
use crate::metrics::get_metrics;
use crate::rate_limiter::RateLimitStats;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct GatewayStats {
    pub version: String,
    pub environment: String,
    pub uptime_seconds: u64,
    pub store_backend: &'static str,
    pub store_reachable: bool,
    pub cache_enabled: bool,
    pub rate_limiting: RateLimitStats,
}

#[derive(Debug, Serialize)]
pub struct SystemStatsResponse {
    pub gateway: GatewayStats,
    /// Backend statistics, `null` when the backend could not be reached
    pub backend: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct CacheClearResponse {
    pub cleared: u64,
}

/// GET /api/v1/admin/users
pub async fn list_users(
    State(state): State<AppState>,
    ctx: ForwardContext,
) -> Result<Response, GatewayError> {
    Ok(forward(&state, &ctx, &state.backend, "/admin/users")
        .await?
        .into_response())
}

/// GET /api/v1/admin/system/stats
pub async fn system_stats(
    State(state): State<AppState>,
    ctx: ForwardContext,
) -> Json<SystemStatsResponse> {
    let gateway = GatewayStats {
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: state.config.server.environment.clone(),
        uptime_seconds: get_metrics().uptime_seconds(),
        store_backend: state.store.backend(),
        store_reachable: state.store.ping().await.is_ok(),
        cache_enabled: state.cache.is_enabled(),
        rate_limiting: state.limiter.stats(),
    };

    let stats_ctx = ForwardContext {
        method: Method::GET,
        query: None,
        ..ctx
    };
    let backend = match forward(&state, &stats_ctx, &state.backend, "/admin/stats").await {
        Ok(response) if response.is_success() => serde_json::from_slice(&response.body).ok(),
        Ok(response) => {
            warn!(status = %response.status, "Backend stats request rejected");
            None
        }
        Err(e) => {
            warn!(error = %e, "Backend stats unavailable");
            None
        }
    };

    Json(SystemStatsResponse { gateway, backend })
}

/// POST /api/v1/admin/system/cache/clear
pub async fn clear_cache(
    State(state): State<AppState>,
    ctx: ForwardContext,
) -> Json<CacheClearResponse> {
    let cleared = state.cache.delete_by_prefix("").await;
    info!(
        request_id = %ctx.request_id,
        user_id = ctx.caller.as_ref().map_or("-", |c| c.user_id.as_str()),
        cleared,
        "Response cache cleared"
    );
    Json(CacheClearResponse { cleared })
}
