//! Rate limiter unit tests

use assert_matches::assert_matches;
use rstest::*;
use rustc_hash::FxHashMap;
use std::sync::Arc;

use clinical_gateway::{
    config::{EndpointRateLimit, RateLimitConfig},
    middleware::{CallerIdentity, RequestContext},
    rate_limiter::{RateDecision, RateLimit, RateLimitKey, RateLimiter},
    store::{MemoryStore, SharedStore},
    token::Role,
};

use crate::common::FailingStore;

#[fixture]
fn basic_rate_limit_config() -> RateLimitConfig {
    RateLimitConfig {
        enabled: true,
        requests_per_minute: 5,
        burst_size: 2,
        window_seconds: 60,
        endpoint_limits: FxHashMap::default(),
    }
}

#[fixture]
fn endpoint_rate_limit_config() -> RateLimitConfig {
    let mut endpoint_limits = FxHashMap::default();
    endpoint_limits.insert(
        "/api/auth".to_string(),
        EndpointRateLimit {
            requests_per_minute: 10,
            burst_size: 2,
        },
    );
    endpoint_limits.insert(
        "/api/auth/login".to_string(),
        EndpointRateLimit {
            requests_per_minute: 2,
            burst_size: 1,
        },
    );

    RateLimitConfig {
        enabled: true,
        requests_per_minute: 100,
        burst_size: 10,
        window_seconds: 60,
        endpoint_limits,
    }
}

fn memory_limiter(config: RateLimitConfig) -> RateLimiter {
    RateLimiter::new(config, Arc::new(MemoryStore::new()))
}

fn anonymous(ip: &str) -> RequestContext {
    RequestContext::new(ip.to_string())
}

fn authenticated(ip: &str, user_id: &str) -> RequestContext {
    RequestContext {
        caller: Some(CallerIdentity {
            user_id: user_id.to_string(),
            email: format!("{user_id}@clinic.local"),
            role: Role::Patient,
        }),
        ..RequestContext::new(ip.to_string())
    }
}

#[rstest]
#[tokio::test]
async fn test_fixed_window_allows_exactly_the_limit(basic_rate_limit_config: RateLimitConfig) {
    let limiter = memory_limiter(basic_rate_limit_config);
    let key = RateLimitKey::Ip("10.0.0.1".to_string());
    let limit = limiter.default_limit();

    for expected_remaining in (0..5).rev() {
        assert_eq!(
            limiter.check(&key, limit).await,
            RateDecision::Allow {
                remaining: Some(expected_remaining)
            }
        );
    }

    assert_matches!(
        limiter.check(&key, limit).await,
        RateDecision::Reject { retry_after } if (59..=60).contains(&retry_after)
    );
}

#[rstest]
#[tokio::test]
async fn test_keys_are_independent(basic_rate_limit_config: RateLimitConfig) {
    let limiter = memory_limiter(basic_rate_limit_config);
    let limit = RateLimit {
        requests: 1,
        burst: 1,
    };

    let first = RateLimitKey::Ip("10.0.0.1".to_string());
    let second = RateLimitKey::Ip("10.0.0.2".to_string());
    assert!(limiter.check(&first, limit).await.is_allowed());
    assert!(!limiter.check(&first, limit).await.is_allowed());
    assert!(limiter.check(&second, limit).await.is_allowed());
}

#[rstest]
#[tokio::test]
async fn test_authenticated_callers_are_keyed_by_user(basic_rate_limit_config: RateLimitConfig) {
    let limiter = memory_limiter(basic_rate_limit_config);

    // Same user from two addresses shares one budget
    for i in 0..5 {
        let ip = format!("10.0.0.{i}");
        assert!(
            limiter
                .check_request(&authenticated(&ip, "u-1"), "/api/v1/patients")
                .await
                .is_allowed()
        );
    }
    assert!(!limiter
        .check_request(&authenticated("10.0.0.99", "u-1"), "/api/v1/patients")
        .await
        .is_allowed());

    // Anonymous traffic from one of those addresses is untouched
    assert!(limiter.check_request(&anonymous("10.0.0.1"), "/api/v1/patients").await.is_allowed());
}

#[rstest]
#[tokio::test]
async fn test_longest_endpoint_prefix_wins(endpoint_rate_limit_config: RateLimitConfig) {
    let limiter = memory_limiter(endpoint_rate_limit_config);
    let ctx = anonymous("10.0.0.1");

    assert!(limiter.check_request(&ctx, "/api/auth/login").await.is_allowed());
    assert!(limiter.check_request(&ctx, "/api/auth/login").await.is_allowed());
    assert_matches!(
        limiter.check_request(&ctx, "/api/auth/login").await,
        RateDecision::Reject { .. }
    );

    // The broader /api/auth budget is a separate counter
    assert!(limiter.check_request(&ctx, "/api/auth/refresh").await.is_allowed());
}

#[rstest]
#[tokio::test]
async fn test_disabled_limiter_never_rejects(mut basic_rate_limit_config: RateLimitConfig) {
    basic_rate_limit_config.enabled = false;
    let limiter = memory_limiter(basic_rate_limit_config);
    let ctx = anonymous("10.0.0.1");

    for _ in 0..50 {
        assert_eq!(
            limiter.check_request(&ctx, "/api/v1/patients").await,
            RateDecision::Allow { remaining: None }
        );
    }
}

#[rstest]
#[tokio::test]
async fn test_store_outage_falls_back_to_local_buckets(basic_rate_limit_config: RateLimitConfig) {
    let store: Arc<dyn SharedStore> = Arc::new(FailingStore);
    let limiter = RateLimiter::new(basic_rate_limit_config, store);
    let ctx = anonymous("10.0.0.1");

    // Burst of two passes, the third arrives before the bucket refills
    assert!(limiter.check_request(&ctx, "/api/v1/patients").await.is_allowed());
    assert!(limiter.check_request(&ctx, "/api/v1/patients").await.is_allowed());
    assert_matches!(
        limiter.check_request(&ctx, "/api/v1/patients").await,
        RateDecision::Reject { retry_after } if retry_after >= 1
    );

    let stats = limiter.stats();
    assert_eq!(stats.backend, "failing");
    assert_eq!(stats.local_buckets, 1);
    assert_eq!(stats.fallback_activations, 3);
}

#[rstest]
fn test_stats_reflect_configuration(endpoint_rate_limit_config: RateLimitConfig) {
    let limiter = memory_limiter(endpoint_rate_limit_config);
    let stats = limiter.stats();

    assert!(stats.enabled);
    assert_eq!(stats.backend, "memory");
    assert_eq!(stats.requests_per_window, 100);
    assert_eq!(stats.window_seconds, 60);
    assert_eq!(stats.endpoint_overrides, 2);
    assert_eq!(stats.local_buckets, 0);
    assert_eq!(limiter.cleanup_local_buckets(), 0);
}
