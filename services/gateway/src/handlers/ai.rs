//! Inference service handlers
//!
//! Each gateway route maps onto one inference endpoint; requests and
//! responses pass through untouched.

use axum::{
    extract::State,
    response::{IntoResponse, Response},
};

use super::forward;
use crate::error::GatewayError;
use crate::forwarder::ForwardContext;
use crate::server::AppState;

pub const TEXT_GENERATE_PATH: &str = "/api/v1/text/generate";
pub const CLINICAL_SUMMARY_PATH: &str = "/api/v1/clinical/summary";
pub const EXPLAIN_TERM_PATH: &str = "/api/v1/explain/term";
pub const INSURANCE_DOCUMENT_PATH: &str = "/api/v1/insurance/document";

async fn relay(
    state: &AppState,
    ctx: &ForwardContext,
    path: &str,
) -> Result<Response, GatewayError> {
    if ctx.body.is_empty() {
        return Err(GatewayError::Validation("request body is required".to_string()));
    }
    Ok(forward(state, ctx, &state.ai, path).await?.into_response())
}

/// POST /api/v1/ai/analyze/text
pub async fn analyze_text(
    State(state): State<AppState>,
    ctx: ForwardContext,
) -> Result<Response, GatewayError> {
    relay(&state, &ctx, TEXT_GENERATE_PATH).await
}

/// POST /api/v1/ai/analyze/clinical
pub async fn analyze_clinical(
    State(state): State<AppState>,
    ctx: ForwardContext,
) -> Result<Response, GatewayError> {
    relay(&state, &ctx, CLINICAL_SUMMARY_PATH).await
}

/// POST /api/v1/ai/explain/term
pub async fn explain_term(
    State(state): State<AppState>,
    ctx: ForwardContext,
) -> Result<Response, GatewayError> {
    relay(&state, &ctx, EXPLAIN_TERM_PATH).await
}

/// POST /api/v1/ai/summarize/note
pub async fn summarize_note(
    State(state): State<AppState>,
    ctx: ForwardContext,
) -> Result<Response, GatewayError> {
    relay(&state, &ctx, CLINICAL_SUMMARY_PATH).await
}

/// Document analysis, used by the insurance upload route
pub(crate) async fn process_insurance_document(
    state: &AppState,
    ctx: &ForwardContext,
) -> Result<Response, GatewayError> {
    relay(state, ctx, INSURANCE_DOCUMENT_PATH).await
}
