//! Insurance handlers

use axum::{
    extract::State,
    response::{IntoResponse, Response},
};

use super::{ai, forward, require_json_object};
use crate::error::GatewayError;
use crate::forwarder::ForwardContext;
use crate::server::AppState;

/// GET /api/v1/insurance/coverage
pub async fn get_coverage(
    State(state): State<AppState>,
    ctx: ForwardContext,
) -> Result<Response, GatewayError> {
    Ok(forward(&state, &ctx, &state.backend, "/insurance/coverage")
        .await?
        .into_response())
}

/// POST /api/v1/insurance/estimate
pub async fn estimate_cost(
    State(state): State<AppState>,
    ctx: ForwardContext,
) -> Result<Response, GatewayError> {
    require_json_object(&ctx)?;
    Ok(forward(&state, &ctx, &state.backend, "/insurance/estimate")
        .await?
        .into_response())
}

/// POST /api/v1/insurance/documents/upload
///
/// Documents go to the inference service for extraction; the body may be
/// multipart or JSON and is relayed untouched.
pub async fn upload_document(
    State(state): State<AppState>,
    ctx: ForwardContext,
) -> Result<Response, GatewayError> {
    ai::process_insurance_document(&state, &ctx).await
}
