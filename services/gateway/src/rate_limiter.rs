//! Rate limiting backed by the shared store
//!
//! Counters are fixed-window and live in the shared store so every gateway
//! instance enforces the same budget. When the store cannot be reached the
//! same key is checked against a process-local token bucket instead; limits
//! are then enforced per instance until the store returns.

use governor::{
    Quota, RateLimiter as GovernorRateLimiter,
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
};
use nonzero_ext::nonzero;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::metrics::get_metrics;
use crate::middleware::RequestContext;
use crate::store::SharedStore;

// Safe constants for fallback values
const DEFAULT_REQUESTS_PER_WINDOW: NonZeroU32 = nonzero!(60u32);
const DEFAULT_BURST_SIZE: NonZeroU32 = nonzero!(10u32);

/// Local buckets kept before the oldest are dropped
const MAX_LOCAL_BUCKETS: usize = 10_000;

type LocalBucket = GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// What a counter is keyed on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateLimitKey {
    Ip(String),
    User(String),
    IpEndpoint { endpoint: String, ip: String },
}

impl RateLimitKey {
    /// Scope label for logs and metrics
    #[must_use]
    pub const fn scope(&self) -> &'static str {
        match self {
            Self::Ip(_) => "ip",
            Self::User(_) => "user",
            Self::IpEndpoint { .. } => "ip+endpoint",
        }
    }

    /// Key of the counter in the shared store
    #[must_use]
    pub fn storage_key(&self) -> String {
        match self {
            Self::Ip(ip) => format!("rl:ip:{ip}"),
            Self::User(id) => format!("rl:user:{id}"),
            Self::IpEndpoint { endpoint, ip } => format!("rl:ip+endpoint:{endpoint}:{ip}"),
        }
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// Requests allowed per window, plus the local fallback burst
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub requests: u32,
    pub burst: u32,
}

/// Outcome of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// `remaining` is `None` when the local fallback or a disabled limiter decided
    Allow { remaining: Option<u64> },
    /// Seconds until the window resets, at least 1
    Reject { retry_after: u64 },
}

impl RateDecision {
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }
}

/// Rate limiter for the API Gateway
pub struct RateLimiter {
    store: Arc<dyn SharedStore>,
    /// Fallback buckets keyed by counter key
    local_buckets: Mutex<FxHashMap<String, LocalBucket>>,
    fallback_activations: AtomicU64,
    window: Duration,
    config: RateLimitConfig,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("backend", &self.store.backend())
            .field("window", &self.window)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Create a new rate limiter
    #[must_use]
    pub fn new(config: RateLimitConfig, store: Arc<dyn SharedStore>) -> Self {
        Self {
            store,
            local_buckets: Mutex::new(FxHashMap::default()),
            fallback_activations: AtomicU64::new(0),
            window: Duration::from_secs(config.window_seconds.max(1)),
            config,
        }
    }

    /// The identity-wide limit from configuration
    #[must_use]
    pub fn default_limit(&self) -> RateLimit {
        RateLimit {
            requests: self.config.requests_per_minute,
            burst: self.config.burst_size,
        }
    }

    /// Count one request against `key`
    pub async fn check(&self, key: &RateLimitKey, limit: RateLimit) -> RateDecision {
        if !self.config.enabled {
            return RateDecision::Allow { remaining: None };
        }

        let storage_key = key.storage_key();
        match self.store.increment(&storage_key, self.window).await {
            Ok(counter) => {
                let allowed = u64::from(limit.requests);
                if counter.count > allowed {
                    let retry_after = counter.ttl_seconds.clamp(1, self.window.as_secs());
                    debug!(
                        key = %storage_key,
                        count = counter.count,
                        retry_after,
                        "Rate limit exceeded"
                    );
                    RateDecision::Reject { retry_after }
                } else {
                    RateDecision::Allow {
                        remaining: Some(allowed - counter.count),
                    }
                }
            }
            Err(e) => {
                warn!(
                    key = %storage_key,
                    error = %e,
                    "Shared store unavailable, falling back to local rate limiting"
                );
                self.fallback_activations.fetch_add(1, Ordering::Relaxed);
                get_metrics().record_rate_limit_fallback(key.scope());
                self.check_local(&storage_key, limit)
            }
        }
    }

    /// Check the caller's identity budget, then any per-endpoint budget for `path`
    pub async fn check_request(&self, ctx: &RequestContext, path: &str) -> RateDecision {
        let identity = match &ctx.caller {
            Some(caller) => RateLimitKey::User(caller.user_id.clone()),
            None => RateLimitKey::Ip(ctx.client_ip.clone()),
        };

        let decision = self.check(&identity, self.default_limit()).await;
        if let RateDecision::Reject { .. } = decision {
            get_metrics().record_rate_limit_exceeded(identity.scope());
            return decision;
        }

        let Some((endpoint, limit)) = self.find_endpoint_config(path) else {
            return decision;
        };
        let key = RateLimitKey::IpEndpoint {
            endpoint: endpoint.to_string(),
            ip: ctx.client_ip.clone(),
        };
        let endpoint_decision = self.check(&key, limit).await;
        if let RateDecision::Reject { .. } = endpoint_decision {
            get_metrics().record_rate_limit_exceeded(key.scope());
            return endpoint_decision;
        }

        match (decision, endpoint_decision) {
            (
                RateDecision::Allow { remaining: Some(a) },
                RateDecision::Allow { remaining: Some(b) },
            ) => RateDecision::Allow {
                remaining: Some(a.min(b)),
            },
            _ => RateDecision::Allow { remaining: None },
        }
    }

    /// Evaluate `key` against its process-local bucket
    fn check_local(&self, storage_key: &str, limit: RateLimit) -> RateDecision {
        let mut buckets = self.local_buckets.lock();
        let bucket = buckets
            .entry(storage_key.to_string())
            .or_insert_with(|| GovernorRateLimiter::direct(self.local_quota(limit)));

        match bucket.check() {
            Ok(()) => RateDecision::Allow { remaining: None },
            Err(not_until) => {
                let wait = not_until.wait_time_from(DefaultClock::default().now());
                let retry_after = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
                RateDecision::Reject {
                    retry_after: retry_after.max(1),
                }
            }
        }
    }

    /// `limit.requests` per window, with `limit.burst` available at once
    fn local_quota(&self, limit: RateLimit) -> Quota {
        let requests = NonZeroU32::new(limit.requests).unwrap_or(DEFAULT_REQUESTS_PER_WINDOW);
        let burst = NonZeroU32::new(limit.burst).unwrap_or(DEFAULT_BURST_SIZE);
        Quota::with_period(self.window / requests.get())
            .unwrap_or_else(|| Quota::per_minute(requests))
            .allow_burst(burst)
    }

    /// Find the endpoint override for a path; the longest matching prefix wins
    fn find_endpoint_config(&self, path: &str) -> Option<(&str, RateLimit)> {
        self.config
            .endpoint_limits
            .iter()
            .filter(|(pattern, _)| path.starts_with(pattern.as_str()))
            .max_by_key(|(pattern, _)| pattern.len())
            .map(|(pattern, limit)| {
                (
                    pattern.as_str(),
                    RateLimit {
                        requests: limit.requests_per_minute,
                        burst: limit.burst_size,
                    },
                )
            })
    }

    /// Get current rate limiting statistics
    #[must_use]
    pub fn stats(&self) -> RateLimitStats {
        RateLimitStats {
            enabled: self.config.enabled,
            backend: self.store.backend(),
            requests_per_window: self.config.requests_per_minute,
            window_seconds: self.window.as_secs(),
            burst_size: self.config.burst_size,
            endpoint_overrides: self.config.endpoint_limits.len(),
            local_buckets: self.local_buckets.lock().len(),
            fallback_activations: self.fallback_activations.load(Ordering::Relaxed),
        }
    }

    /// Drop local buckets beyond the retention cap, returning how many went
    pub fn cleanup_local_buckets(&self) -> usize {
        let mut buckets = self.local_buckets.lock();
        if buckets.len() <= MAX_LOCAL_BUCKETS {
            return 0;
        }

        let excess = buckets.len() - MAX_LOCAL_BUCKETS;
        let keys_to_remove: Vec<_> = buckets.keys().take(excess).cloned().collect();
        for key in &keys_to_remove {
            buckets.remove(key);
        }
        debug!(removed = excess, "Trimmed local rate limit buckets");
        excess
    }
}

/// Rate limiting statistics
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStats {
    pub enabled: bool,
    pub backend: &'static str,
    pub requests_per_window: u32,
    pub window_seconds: u64,
    pub burst_size: u32,
    pub endpoint_overrides: usize,
    pub local_buckets: usize,
    pub fallback_activations: u64,
}
