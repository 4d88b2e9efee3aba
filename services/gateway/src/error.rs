//! Gateway error type and its HTTP rendering

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use crate::forwarder::ForwardError;
use crate::models::ErrorResponse;
use crate::token::AuthError;

/// Every failure a request can end in
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("rate limit exceeded, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("route not found")]
    NotFound,

    #[error("upstream request {request_id} failed: {source}")]
    Upstream {
        request_id: String,
        #[source]
        source: ForwardError,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Auth(_) | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing envelope; internal detail never leaves the process
    #[must_use]
    pub fn envelope(&self) -> ErrorResponse {
        match self {
            Self::Auth(kind) => ErrorResponse::new(kind.client_message()),
            Self::InvalidCredentials => ErrorResponse::new("invalid credentials"),
            Self::RateLimited { retry_after } => ErrorResponse {
                retry_after: Some(*retry_after),
                ..ErrorResponse::new("rate limit exceeded")
            },
            Self::Forbidden(details) => {
                ErrorResponse::new("insufficient permissions").with_details(details.clone())
            }
            Self::Validation(details) => {
                ErrorResponse::new("invalid request").with_details(details.clone())
            }
            Self::NotFound => ErrorResponse::new("route not found"),
            Self::Upstream { request_id, .. } => ErrorResponse {
                request_id: Some(request_id.clone()),
                ..ErrorResponse::new("upstream service unavailable")
            },
            Self::Internal(_) => ErrorResponse::new("internal server error"),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match &self {
            Self::Upstream { request_id, source } => {
                error!(request_id = %request_id, error = %source, "Upstream call failed");
            }
            Self::Internal(message) => error!("Internal gateway error: {}", message),
            _ => {}
        }

        let status = self.status();
        let mut response = (status, Json(self.envelope())).into_response();
        if let Self::RateLimited { retry_after } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        }
        response
    }
}
