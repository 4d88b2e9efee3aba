//! Clinical API Gateway
//!
//! Single public entry point in front of the clinical backend and the AI
//! service. Features:
//! - Bearer token authentication with access/refresh token pairs
//! - Fixed-window rate limiting over a shared store, with local fallback
//! - Response caching with prefix invalidation on writes
//! - Request forwarding with caller identity injection
//! - Request correlation, structured logging and Prometheus metrics

#![allow(missing_docs)]

use anyhow::Result;

pub mod cache;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod rate_limiter;
pub mod server;
pub mod store;
pub mod token;
pub mod utils;

pub use config::{
    AuthConfig, CacheConfig, CorsConfig, GatewayConfig, RateLimitConfig, ServerConfig,
    ServiceEndpoints, StoreConfig,
};
pub use error::GatewayError;
pub use server::{AppState, GatewayServer, router, with_gateway_layers};

/// Start the API Gateway server
pub async fn start_server(config: GatewayConfig) -> Result<()> {
    let server = GatewayServer::new(config).await?;
    server.start().await
}
