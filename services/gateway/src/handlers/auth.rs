//! Authentication handlers
//!
//! Login checks the configured accounts and issues an access/refresh token
//! pair; refresh exchanges a refresh token for a new access token;
//! registration is validated here and owned by the backend.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    response::{IntoResponse, Response},
};
use tracing::{error, info, warn};

use super::forward;
use crate::config::AccountConfig;
use crate::error::GatewayError;
use crate::forwarder::ForwardContext;
use crate::metrics::get_metrics;
use crate::models::{
    LoginRequest, LoginResponse, RefreshRequest, RefreshResponse, RegisterRequest, UserInfo,
};
use crate::server::AppState;
use crate::token::{AuthError, Role};

const TOKEN_TYPE: &str = "Bearer";

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, GatewayError> {
    body.map(|Json(value)| value)
        .map_err(|e| GatewayError::Validation(e.body_text()))
}

/// Compare without short-circuiting on the first differing byte
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn find_account<'a>(accounts: &'a [AccountConfig], email: &str) -> Option<&'a AccountConfig> {
    accounts
        .iter()
        .find(|account| account.email.eq_ignore_ascii_case(email.trim()))
}

fn token_failure(e: &jsonwebtoken::errors::Error) -> GatewayError {
    error!("Failed to sign token: {}", e);
    GatewayError::Internal("token signing failed".to_string())
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, GatewayError> {
    let request = json_body(body)?;
    if request.email.trim().is_empty() || request.password.is_empty() {
        return Err(GatewayError::Validation(
            "email and password are required".to_string(),
        ));
    }

    let Some(account) = find_account(&state.config.auth.accounts, &request.email)
        .filter(|account| {
            constant_time_eq(account.password.as_bytes(), request.password.as_bytes())
        })
    else {
        warn!(email = %request.email, "Login rejected");
        get_metrics().record_auth_failure("invalid_credentials");
        return Err(GatewayError::InvalidCredentials);
    };

    let access_token = state
        .tokens
        .issue(&account.user_id, &account.email, account.role)
        .map_err(|e| token_failure(&e))?;
    let refresh_token = state
        .tokens
        .issue_refresh(&account.email)
        .map_err(|e| token_failure(&e))?;
    get_metrics().record_token_issued("access");
    get_metrics().record_token_issued("refresh");

    info!(user_id = %account.user_id, role = %account.role, "Login successful");
    Ok(Json(LoginResponse {
        access_token,
        refresh_token,
        token_type: TOKEN_TYPE.to_string(),
        expires_in: state.tokens.access_ttl_seconds(),
        user: UserInfo {
            id: account.user_id.clone(),
            email: account.email.clone(),
            name: account.name.clone(),
            role: account.role,
        },
    }))
}

/// POST /api/auth/refresh
///
/// Only a new access token is returned; the refresh token stays valid until
/// its own expiry. Subjects without a configured account refresh as patients.
pub async fn refresh(
    State(state): State<AppState>,
    body: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<RefreshResponse>, GatewayError> {
    let request = json_body(body)?;
    if request.refresh_token.trim().is_empty() {
        return Err(GatewayError::Auth(AuthError::Missing));
    }

    let email = state
        .tokens
        .validate_refresh(request.refresh_token.trim())
        .inspect_err(|kind| {
            warn!(reason = kind.kind(), "Refresh token rejected");
            get_metrics().record_auth_failure(kind.kind());
        })?;

    let (user_id, role) = match find_account(&state.config.auth.accounts, &email) {
        Some(account) => (account.user_id.clone(), account.role),
        None => (email.clone(), Role::Patient),
    };

    let access_token = state
        .tokens
        .issue(&user_id, &email, role)
        .map_err(|e| token_failure(&e))?;
    get_metrics().record_token_issued("access");

    Ok(Json(RefreshResponse {
        access_token,
        token_type: TOKEN_TYPE.to_string(),
        expires_in: state.tokens.access_ttl_seconds(),
    }))
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    ctx: ForwardContext,
) -> Result<Response, GatewayError> {
    let request: RegisterRequest = serde_json::from_slice(&ctx.body)
        .map_err(|e| GatewayError::Validation(format!("invalid registration payload: {e}")))?;
    request.validate().map_err(GatewayError::Validation)?;

    info!(email = %request.email, "Forwarding registration");
    Ok(forward(&state, &ctx, &state.backend, "/auth/register")
        .await?
        .into_response())
}
