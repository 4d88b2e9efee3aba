//! Health check and monitoring handlers

use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use rustc_hash::FxHashMap;
use std::time::Duration;
use tracing::warn;

use crate::forwarder::GATEWAY_NAME;
use crate::metrics::get_metrics;
use crate::models::HealthCheckResponse;
use crate::server::AppState;

fn health_response(
    state: &AppState,
    status: &str,
    dependencies: FxHashMap<String, bool>,
) -> HealthCheckResponse {
    HealthCheckResponse {
        status: status.to_string(),
        service: GATEWAY_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: state.config.server.environment.clone(),
        dependencies,
        uptime_seconds: get_metrics().uptime_seconds(),
    }
}

/// GET /api/health - liveness, no dependency checks
pub async fn health_check(State(state): State<AppState>) -> Json<HealthCheckResponse> {
    Json(health_response(&state, "healthy", FxHashMap::default()))
}

/// GET /api/health/ready - store ping and upstream `/health` probes
///
/// Answers 503 with `degraded` when any dependency is unreachable.
pub async fn readiness_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<HealthCheckResponse>) {
    let probe_timeout = Duration::from_secs(state.config.upstream.health_timeout_seconds.max(1));

    let (store_ok, backend_ok, ai_ok) = tokio::join!(
        state.store.ping(),
        state.forwarder.probe(&state.backend, probe_timeout),
        state.forwarder.probe(&state.ai, probe_timeout),
    );
    if let Err(e) = &store_ok {
        warn!(error = %e, "Readiness: shared store unreachable");
    }

    let mut dependencies = FxHashMap::default();
    dependencies.insert("store".to_string(), store_ok.is_ok());
    dependencies.insert(state.backend.name.clone(), backend_ok);
    dependencies.insert(state.ai.name.clone(), ai_ok);

    if dependencies.values().all(|ok| *ok) {
        (StatusCode::OK, Json(health_response(&state, "healthy", dependencies)))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(health_response(&state, "degraded", dependencies)),
        )
    }
}

/// Prometheus metrics endpoint
pub async fn metrics(State(state): State<AppState>) -> Response {
    get_metrics().update_system_metrics();

    match &state.prometheus {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}
