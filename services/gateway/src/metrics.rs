//! Prometheus metrics for the API Gateway
//!
//! Metrics collection covering:
//! - HTTP request metrics (latency, status codes, throughput)
//! - Authentication failures and token issuance
//! - Rate limiting rejections and store fallbacks
//! - Response cache hits, misses and invalidations
//! - Upstream request latency and transport errors

use chrono::Utc;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tracing::warn;

/// Gateway metrics collector
#[derive(Debug)]
pub struct GatewayMetrics {
    start_time: AtomicI64,
    in_flight_requests: AtomicU64,
}

impl GatewayMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::register_metrics();

        Self {
            start_time: AtomicI64::new(Utc::now().timestamp()),
            in_flight_requests: AtomicU64::new(0),
        }
    }

    fn register_metrics() {
        // HTTP Request Metrics
        describe_counter!("gateway_http_requests_total", "Total number of HTTP requests");
        describe_histogram!(
            "gateway_http_request_duration_seconds",
            "HTTP request duration in seconds"
        );
        describe_counter!(
            "gateway_http_responses_total",
            "Total number of HTTP responses by status code"
        );
        describe_gauge!("gateway_http_requests_in_flight", "Requests currently being served");

        // Authentication Metrics
        describe_counter!(
            "gateway_auth_failures_total",
            "Rejected bearer tokens by failure kind"
        );
        describe_counter!("gateway_tokens_issued_total", "Tokens issued by kind");

        // Rate Limiting Metrics
        describe_counter!(
            "gateway_rate_limit_exceeded_total",
            "Requests rejected by the rate limiter"
        );
        describe_counter!(
            "gateway_rate_limit_fallback_total",
            "Rate limit checks decided locally because the store was unavailable"
        );

        // Cache Metrics
        describe_counter!("gateway_cache_lookups_total", "Response cache lookups by result");
        describe_counter!(
            "gateway_cache_invalidated_entries_total",
            "Cache entries removed by write invalidation"
        );

        // Upstream Metrics
        describe_counter!("gateway_upstream_requests_total", "Requests sent upstream");
        describe_histogram!(
            "gateway_upstream_request_duration_seconds",
            "Upstream round-trip duration in seconds"
        );
        describe_counter!(
            "gateway_upstream_errors_total",
            "Upstream calls that failed at the transport level"
        );

        // System Metrics
        describe_gauge!("gateway_uptime_seconds", "Gateway uptime in seconds");
        describe_gauge!("gateway_memory_usage_bytes", "Resident memory in bytes");
    }

    /// Record HTTP request
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration: f64) {
        counter!("gateway_http_requests_total",
            "method" => method.to_string(),
            "path" => path.to_string()
        )
        .increment(1);

        histogram!("gateway_http_request_duration_seconds",
            "method" => method.to_string(),
            "path" => path.to_string()
        )
        .record(duration);

        counter!("gateway_http_responses_total",
            "status_code" => status.to_string()
        )
        .increment(1);
    }

    pub fn record_auth_failure(&self, kind: &str) {
        counter!("gateway_auth_failures_total", "kind" => kind.to_string()).increment(1);
    }

    pub fn record_token_issued(&self, kind: &str) {
        counter!("gateway_tokens_issued_total", "kind" => kind.to_string()).increment(1);
    }

    pub fn record_rate_limit_exceeded(&self, scope: &str) {
        counter!("gateway_rate_limit_exceeded_total", "scope" => scope.to_string()).increment(1);
    }

    pub fn record_rate_limit_fallback(&self, scope: &str) {
        counter!("gateway_rate_limit_fallback_total", "scope" => scope.to_string()).increment(1);
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        counter!("gateway_cache_lookups_total", "result" => result).increment(1);
    }

    pub fn record_cache_invalidation(&self, removed: u64) {
        counter!("gateway_cache_invalidated_entries_total").increment(removed);
    }

    /// Record an upstream round trip that produced a response
    pub fn record_upstream_request(&self, upstream: &str, status: u16, duration: f64) {
        counter!("gateway_upstream_requests_total",
            "upstream" => upstream.to_string(),
            "status_code" => status.to_string()
        )
        .increment(1);

        histogram!("gateway_upstream_request_duration_seconds",
            "upstream" => upstream.to_string()
        )
        .record(duration);
    }

    pub fn record_upstream_error(&self, upstream: &str, duration: f64) {
        counter!("gateway_upstream_errors_total", "upstream" => upstream.to_string()).increment(1);
        histogram!("gateway_upstream_request_duration_seconds",
            "upstream" => upstream.to_string()
        )
        .record(duration);
    }

    pub fn request_started(&self) {
        let active = self.in_flight_requests.fetch_add(1, Ordering::Relaxed) + 1;
        // SAFETY: request count safely converts to f64 for metrics
        #[allow(clippy::cast_precision_loss)]
        gauge!("gateway_http_requests_in_flight").set(active as f64);
    }

    pub fn request_finished(&self) {
        let previous = self
            .in_flight_requests
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        // SAFETY: request count safely converts to f64 for metrics
        #[allow(clippy::cast_precision_loss)]
        gauge!("gateway_http_requests_in_flight").set(previous.saturating_sub(1) as f64);
    }

    /// Seconds since this collector was created
    pub fn uptime_seconds(&self) -> u64 {
        let elapsed = Utc::now().timestamp() - self.start_time.load(Ordering::Relaxed);
        u64::try_from(elapsed).unwrap_or(0)
    }

    /// Update system metrics
    pub fn update_system_metrics(&self) {
        // SAFETY: uptime seconds safely converts to f64 for metrics
        #[allow(clippy::cast_precision_loss)]
        gauge!("gateway_uptime_seconds").set(self.uptime_seconds() as f64);

        #[cfg(target_os = "linux")]
        if let Ok(stat) = procfs::process::Process::myself().and_then(|p| p.stat()) {
            let rss_bytes = stat.rss * procfs::page_size();
            // SAFETY: memory size in bytes safely converts to f64 for metrics
            #[allow(clippy::cast_precision_loss)]
            gauge!("gateway_memory_usage_bytes").set(rss_bytes as f64);
        }
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance
static METRICS: OnceLock<GatewayMetrics> = OnceLock::new();

/// Global Prometheus recorder; `None` when another recorder was installed first
static PROMETHEUS: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Get global metrics instance
pub fn get_metrics() -> &'static GatewayMetrics {
    METRICS.get_or_init(GatewayMetrics::new)
}

/// Install the Prometheus recorder once and return its render handle
pub fn prometheus_handle() -> Option<PrometheusHandle> {
    PROMETHEUS
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Prometheus recorder not installed: {}", e);
                None
            }
        })
        .clone()
}

/// Initialize metrics system
pub fn init_metrics() -> &'static GatewayMetrics {
    // Recorder first, so metric descriptions reach it
    let _ = prometheus_handle();
    get_metrics()
}

/// Start metrics updater task
pub fn start_metrics_updater() -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(10));

        loop {
            interval.tick().await;
            get_metrics().update_system_metrics();
        }
    })
}
