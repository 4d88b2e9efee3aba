//! REST API models and request/response types

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::token::Role;

/// Authentication models
#[derive(Deserialize)]
pub struct LoginRequest {
    /// Account email
    pub email: String,
    /// Plain-text password, checked against the configured accounts
    pub password: String,
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    /// Bearer access token
    pub access_token: String,
    /// Refresh token for obtaining new access tokens
    pub refresh_token: String,
    /// Always `Bearer`
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    pub user: UserInfo,
}

/// Public view of an authenticated account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshRequest {
    /// Refresh token to exchange for a new access token
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Registration payload. Validated here, then handed to the backend as-is.
#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    #[serde(default)]
    pub role: Option<Role>,
}

impl std::fmt::Debug for RegisterRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("email", &self.email)
            .field("name", &self.name)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

/// Minimum accepted password length at registration
pub const MIN_PASSWORD_LENGTH: usize = 8;

impl RegisterRequest {
    /// Shape checks only; the backend owns account rules
    pub fn validate(&self) -> Result<(), String> {
        let email = self.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err("a valid email is required".to_string());
        }
        if self.password.len() < MIN_PASSWORD_LENGTH {
            return Err(format!(
                "password must be at least {MIN_PASSWORD_LENGTH} characters"
            ));
        }
        if self.name.trim().is_empty() {
            return Err("name is required".to_string());
        }
        if self.role == Some(Role::Admin) {
            return Err("admin accounts cannot be self-registered".to_string());
        }
        Ok(())
    }
}

/// Error envelope returned for every gateway-generated failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Client-safe error message
    pub error: String,
    /// Additional detail, when safe to disclose
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Seconds until the rate limit window resets (429 only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    /// Correlation id for upstream failures (502 only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ErrorResponse {
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
            retry_after: None,
            request_id: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    /// `healthy` or `degraded`
    pub status: String,
    pub service: String,
    pub version: String,
    pub environment: String,
    /// Dependency reachability, present on readiness checks
    #[serde(default, skip_serializing_if = "FxHashMap::is_empty")]
    pub dependencies: FxHashMap<String, bool>,
    /// Service uptime in seconds
    pub uptime_seconds: u64,
}

/// Maximum page size accepted on list endpoints
pub const MAX_PER_PAGE: u32 = 100;
pub const DEFAULT_PER_PAGE: u32 = 20;
pub const DEFAULT_SORT_BY: &str = "created_at";

/// Raw pagination query; numbers stay strings so bad input is a 400, not a silent default
#[derive(Debug, Default, Deserialize)]
pub struct PaginationQuery {
    pub page: Option<String>,
    pub per_page: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

/// Normalized pagination parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
    pub sort_by: String,
    pub sort_order: String,
}

impl PaginationQuery {
    /// Reject non-numeric values, clamp the rest into range
    pub fn normalize(&self) -> Result<Pagination, String> {
        let page = parse_number("page", self.page.as_deref())?.unwrap_or(1).max(1);
        let per_page = match parse_number("per_page", self.per_page.as_deref())? {
            Some(n) if (1..=MAX_PER_PAGE).contains(&n) => n,
            _ => DEFAULT_PER_PAGE,
        };
        let sort_by = self
            .sort_by
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SORT_BY)
            .to_string();
        let sort_order = match self.sort_order.as_deref().map(str::to_ascii_lowercase) {
            Some(order) if order == "asc" => "asc",
            _ => "desc",
        }
        .to_string();

        Ok(Pagination {
            page,
            per_page,
            sort_by,
            sort_order,
        })
    }
}

fn parse_number(name: &str, value: Option<&str>) -> Result<Option<u32>, String> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .parse::<i64>()
            .map(|n| Some(u32::try_from(n.max(0)).unwrap_or(u32::MAX)))
            .map_err(|_| format!("{name} must be a number")),
    }
}

impl Pagination {
    /// Parameters as cache-key pairs
    #[must_use]
    pub fn as_pairs(&self) -> [(&'static str, String); 4] {
        [
            ("page", self.page.to_string()),
            ("per_page", self.per_page.to_string()),
            ("sort_by", self.sort_by.clone()),
            ("sort_order", self.sort_order.clone()),
        ]
    }
}
