//! Configuration for the API Gateway
//!
//! Loaded from an optional TOML file layered with `GATEWAY_*` environment
//! variables, e.g. `GATEWAY_AUTH__JWT_SECRET` or
//! `GATEWAY_CORS__ALLOWED_ORIGINS=https://a.example,https://b.example`.

use anyhow::{Result, bail};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::token::Role;
use crate::utils::TrustedProxies;

/// Signing secret shipped in the default configuration; never use it in production.
pub const DEFAULT_JWT_SECRET: &str = "change-me-in-production";

/// API Gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Upstream service base URLs
    pub services: ServiceEndpoints,
    /// Upstream connection pool and timeouts
    pub upstream: UpstreamConfig,
    /// Shared counter/cache store
    pub store: StoreConfig,
    /// Authentication configuration
    pub auth: AuthConfig,
    /// Rate limiting configuration
    pub rate_limiting: RateLimitConfig,
    /// Response cache configuration
    pub cache: CacheConfig,
    /// CORS configuration
    pub cors: CorsConfig,
    /// Monitoring configuration
    pub monitoring: MonitoringConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Overall request timeout in seconds
    pub timeout_seconds: u64,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
    /// Enable response compression
    pub compression: bool,
    /// Deployment environment name, reported by the health endpoint
    pub environment: String,
    /// Peers allowed to report the client address via `X-Forwarded-For`
    pub trusted_proxies: Vec<IpAddr>,
}

/// Upstream service endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceEndpoints {
    /// Domain backend (patients, clinical notes, insurance)
    pub backend_url: String,
    /// Inference backend (text and document analysis)
    pub ai_service_url: String,
}

/// Upstream HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Overall timeout for one upstream call
    pub timeout_seconds: u64,
    /// TCP connect timeout
    pub connect_timeout_seconds: u64,
    /// Idle pooled connections kept per upstream host
    pub max_idle_per_host: usize,
    /// How long an idle pooled connection is kept
    pub idle_timeout_seconds: u64,
    /// Timeout for readiness probes against upstream `/health`
    pub health_timeout_seconds: u64,
}

/// Shared counter/cache store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// `redis://...` connection string, or `memory://` for an in-process store
    pub url: String,
    /// Deadline for a single store operation in milliseconds
    pub operation_timeout_ms: u64,
}

/// A login account known to the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub user_id: String,
    pub email: String,
    pub password: String,
    pub name: String,
    pub role: Role,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret for access tokens; refresh tokens derive their own from it
    pub jwt_secret: String,
    /// Access token lifetime in seconds
    pub token_expiry_seconds: u64,
    /// Refresh token lifetime in seconds
    pub refresh_token_expiry_seconds: u64,
    /// Accounts accepted by the login endpoint
    pub accounts: Vec<AccountConfig>,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    pub enabled: bool,
    /// Requests allowed per identity per window
    pub requests_per_minute: u32,
    /// Burst capacity of the local fallback bucket
    pub burst_size: u32,
    /// Window length in seconds
    pub window_seconds: u64,
    /// Rate limits per endpoint path prefix
    pub endpoint_limits: FxHashMap<String, EndpointRateLimit>,
}

/// Per-endpoint rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointRateLimit {
    /// Requests per window for this endpoint
    pub requests_per_minute: u32,
    /// Burst capacity for this endpoint
    pub burst_size: u32,
}

/// Response cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable response caching on read routes
    pub enabled: bool,
    /// TTL of single-resource views
    pub detail_ttl_seconds: u64,
    /// TTL of paginated list views
    pub list_ttl_seconds: u64,
    /// TTL of search results
    pub search_ttl_seconds: u64,
    /// TTL of patient record listings
    pub records_ttl_seconds: u64,
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Enable CORS
    pub enabled: bool,
    /// Allowed origins
    pub allowed_origins: Vec<String>,
    /// Allowed methods
    pub allowed_methods: Vec<String>,
    /// Allowed headers
    pub allowed_headers: Vec<String>,
    /// Allow credentials
    pub allow_credentials: bool,
    /// Max age for preflight requests
    pub max_age_seconds: u64,
}

/// Monitoring and metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Enable Prometheus metrics
    pub metrics_enabled: bool,
    /// Metrics endpoint path
    pub metrics_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            timeout_seconds: 60,
            max_body_size: 10 * 1024 * 1024, // 10MB, document uploads
            compression: true,
            environment: "development".to_string(),
            trusted_proxies: Vec::new(),
        }
    }
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        Self {
            backend_url: "http://backend:8081".to_string(),
            ai_service_url: "http://ai-service:8000".to_string(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            connect_timeout_seconds: 5,
            max_idle_per_host: 20,
            idle_timeout_seconds: 90,
            health_timeout_seconds: 2,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://redis:6379".to_string(),
            operation_timeout_ms: 500,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            token_expiry_seconds: 86400,             // 24 hours
            refresh_token_expiry_seconds: 86400 * 7, // 7 days
            accounts: vec![AccountConfig {
                user_id: "demo-user-123".to_string(),
                email: "demo@clinic.local".to_string(),
                password: "password123".to_string(),
                name: "Demo User".to_string(),
                role: Role::Patient,
            }],
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 60,
            burst_size: 10,
            window_seconds: 60,
            endpoint_limits: FxHashMap::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            detail_ttl_seconds: 300,
            list_ttl_seconds: 60,
            search_ttl_seconds: 60,
            records_ttl_seconds: 120,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:8080".to_string(),
            ],
            allowed_methods: vec![
                "GET".to_string(),
                "POST".to_string(),
                "PUT".to_string(),
                "PATCH".to_string(),
                "DELETE".to_string(),
                "OPTIONS".to_string(),
            ],
            allowed_headers: vec![
                "Origin".to_string(),
                "Content-Type".to_string(),
                "Authorization".to_string(),
                "X-Request-ID".to_string(),
            ],
            allow_credentials: true,
            max_age_seconds: 12 * 3600,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            metrics_path: "/metrics".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from file (optional) and environment
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("GATEWAY")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("cors.allowed_origins")
                    .with_list_parse_key("cors.allowed_methods")
                    .with_list_parse_key("cors.allowed_headers")
                    .with_list_parse_key("server.trusted_proxies")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the gateway cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.is_empty() {
            bail!("auth.jwt_secret must not be empty");
        }
        if self.auth.token_expiry_seconds == 0 || self.auth.refresh_token_expiry_seconds == 0 {
            bail!("token lifetimes must be greater than zero");
        }
        if self.rate_limiting.requests_per_minute == 0 || self.rate_limiting.window_seconds == 0 {
            bail!("rate_limiting.requests_per_minute and window_seconds must be greater than zero");
        }
        for (name, url) in [
            ("services.backend_url", &self.services.backend_url),
            ("services.ai_service_url", &self.services.ai_service_url),
        ] {
            if reqwest::Url::parse(url).is_err() {
                bail!("{name} is not a valid URL: {url}");
            }
        }
        if self.upstream.timeout_seconds == 0 {
            bail!("upstream.timeout_seconds must be greater than zero");
        }
        Ok(())
    }

    /// Get server address
    #[must_use]
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    #[must_use]
    pub fn trusted_proxies(&self) -> TrustedProxies {
        TrustedProxies::new(self.server.trusted_proxies.iter().copied())
    }

    /// Whether the signing secret is still the shipped default
    #[must_use]
    pub fn uses_default_secret(&self) -> bool {
        self.auth.jwt_secret == DEFAULT_JWT_SECRET
    }
}
