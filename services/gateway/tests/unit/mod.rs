//! Unit tests module organization

pub mod cache;
pub mod forwarder;
pub mod middleware;
pub mod models;
pub mod rate_limiter;
pub mod token;
