//! Clinical note handlers

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
};

use super::{forward, forward_and_invalidate, require_json_object};
use crate::error::GatewayError;
use crate::forwarder::ForwardContext;
use crate::handlers::patients::records_invalidation;
use crate::server::AppState;

/// POST /api/v1/clinical/notes
///
/// A new note changes some patient's record listing; the note body is opaque
/// here, so every cached record listing is dropped.
pub async fn create_note(
    State(state): State<AppState>,
    ctx: ForwardContext,
) -> Result<Response, GatewayError> {
    require_json_object(&ctx)?;
    let plan = records_invalidation();
    forward_and_invalidate(&state, &ctx, &state.backend, "/clinical/notes", &plan).await
}

/// GET /api/v1/clinical/notes/:id
pub async fn get_note(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ctx: ForwardContext,
) -> Result<Response, GatewayError> {
    if id.trim().is_empty() {
        return Err(GatewayError::Validation("note id is required".to_string()));
    }
    let response = forward(&state, &ctx, &state.backend, &format!("/clinical/notes/{id}")).await?;
    Ok(response.into_response())
}
