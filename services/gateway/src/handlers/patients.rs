//! Patient handlers

use axum::{
    extract::{Path, Query, State, rejection::QueryRejection},
    response::Response,
};
use std::collections::BTreeMap;
use std::time::Duration;

use super::{QueryParams, cached_forward, forward_and_invalidate, query_params, require_json_object};
use crate::cache::{CacheKey, Invalidation};
use crate::error::GatewayError;
use crate::forwarder::ForwardContext;
use crate::models::PaginationQuery;
use crate::server::AppState;
use crate::token::Role;
use crate::utils::encode_query;

pub const RESOURCE: &str = "patients";

/// Minimum length of a search term
const MIN_SEARCH_LENGTH: usize = 2;

/// Every cache family derived from the patient collection
#[must_use]
pub fn collection_invalidation() -> Invalidation {
    Invalidation::new()
        .prefix(CacheKey::family_prefix(RESOURCE, "list"))
        .prefix(CacheKey::family_prefix(RESOURCE, "search"))
}

/// Collection families plus the entries of one patient
#[must_use]
pub fn patient_invalidation(id: &str) -> Invalidation {
    collection_invalidation()
        .key(CacheKey::new(RESOURCE, "detail").segment(id).build())
        .prefix(format!("{}{id}:", CacheKey::family_prefix(RESOURCE, "records")))
}

/// Every cached record listing, for writes that may touch any patient's records
#[must_use]
pub fn records_invalidation() -> Invalidation {
    Invalidation::new().prefix(CacheKey::family_prefix(RESOURCE, "records"))
}

/// Client parameters with pagination normalized and empty values dropped
///
/// Both the cache key and the query sent upstream are rendered from this, so
/// one cache entry always corresponds to exactly one upstream query.
fn listing_params(params: &QueryParams) -> Result<BTreeMap<String, String>, GatewayError> {
    let pagination = PaginationQuery {
        page: params.get("page").cloned(),
        per_page: params.get("per_page").cloned(),
        sort_by: params.get("sort_by").cloned(),
        sort_order: params.get("sort_order").cloned(),
    }
    .normalize()
    .map_err(GatewayError::Validation)?;

    let mut listing: BTreeMap<String, String> = params
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    listing.extend(pagination.as_pairs().map(|(k, v)| (k.to_string(), v)));
    Ok(listing)
}

/// Cache key for a listing family, and the canonical query to forward
fn listing(
    family: &str,
    params: &QueryParams,
    ctx: &mut ForwardContext,
) -> Result<CacheKey, GatewayError> {
    let listing = listing_params(params)?;
    ctx.query = Some(encode_query(&listing));
    Ok(CacheKey::new(RESOURCE, family).params(listing))
}

fn validate_id(id: &str) -> Result<(), GatewayError> {
    if id.trim().is_empty() {
        return Err(GatewayError::Validation("patient id is required".to_string()));
    }
    Ok(())
}

fn ttl(seconds: u64) -> Duration {
    Duration::from_secs(seconds)
}

/// GET /api/v1/patients
pub async fn list_patients(
    State(state): State<AppState>,
    query: Result<Query<QueryParams>, QueryRejection>,
    mut ctx: ForwardContext,
) -> Result<Response, GatewayError> {
    let params = query_params(query)?;
    let key = listing("list", &params, &mut ctx)?.build();
    let ttl = ttl(state.config.cache.list_ttl_seconds);
    cached_forward(&state, &ctx, &state.backend, "/patients", &key, ttl).await
}

/// GET /api/v1/patients/search
pub async fn search_patients(
    State(state): State<AppState>,
    query: Result<Query<QueryParams>, QueryRejection>,
    mut ctx: ForwardContext,
) -> Result<Response, GatewayError> {
    let mut params = query_params(query)?;
    let term = params.get("q").map(|q| q.trim().to_lowercase()).unwrap_or_default();
    if term.is_empty() {
        return Err(GatewayError::Validation("search query is required".to_string()));
    }
    if term.chars().count() < MIN_SEARCH_LENGTH {
        return Err(GatewayError::Validation(format!(
            "search query must be at least {MIN_SEARCH_LENGTH} characters"
        )));
    }
    params.insert("q".to_string(), term);

    let key = listing("search", &params, &mut ctx)?.build();
    let ttl = ttl(state.config.cache.search_ttl_seconds);
    cached_forward(&state, &ctx, &state.backend, "/patients/search", &key, ttl).await
}

/// GET /api/v1/patients/:id
pub async fn get_patient(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ctx: ForwardContext,
) -> Result<Response, GatewayError> {
    validate_id(&id)?;
    let key = CacheKey::new(RESOURCE, "detail").segment(id.as_str()).build();
    let ttl = ttl(state.config.cache.detail_ttl_seconds);
    cached_forward(&state, &ctx, &state.backend, &format!("/patients/{id}"), &key, ttl).await
}

/// GET /api/v1/patients/:id/records
///
/// Patients may only read their own records; doctors and admins read any.
pub async fn get_patient_records(
    State(state): State<AppState>,
    Path(id): Path<String>,
    query: Result<Query<QueryParams>, QueryRejection>,
    mut ctx: ForwardContext,
) -> Result<Response, GatewayError> {
    validate_id(&id)?;
    let may_read = ctx
        .caller
        .as_ref()
        .is_some_and(|caller| caller.role != Role::Patient || caller.user_id == id);
    if !may_read {
        return Err(GatewayError::Forbidden(
            "insufficient permissions to view patient records".to_string(),
        ));
    }

    let params = query_params(query)?;
    let key = listing("records", &params, &mut ctx)?
        .segment(id.as_str())
        .build();
    let ttl = ttl(state.config.cache.records_ttl_seconds);
    let path = format!("/patients/{id}/records");
    cached_forward(&state, &ctx, &state.backend, &path, &key, ttl).await
}

/// POST /api/v1/patients
pub async fn create_patient(
    State(state): State<AppState>,
    ctx: ForwardContext,
) -> Result<Response, GatewayError> {
    require_json_object(&ctx)?;
    forward_and_invalidate(&state, &ctx, &state.backend, "/patients", &collection_invalidation())
        .await
}

/// PUT /api/v1/patients/:id
pub async fn update_patient(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ctx: ForwardContext,
) -> Result<Response, GatewayError> {
    validate_id(&id)?;
    require_json_object(&ctx)?;
    let path = format!("/patients/{id}");
    forward_and_invalidate(&state, &ctx, &state.backend, &path, &patient_invalidation(&id)).await
}

/// DELETE /api/v1/patients/:id
pub async fn delete_patient(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ctx: ForwardContext,
) -> Result<Response, GatewayError> {
    validate_id(&id)?;
    let path = format!("/patients/{id}");
    forward_and_invalidate(&state, &ctx, &state.backend, &path, &patient_invalidation(&id)).await
}
