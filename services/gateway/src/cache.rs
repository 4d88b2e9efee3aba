//! Response cache over the shared store
//!
//! Values are wrapped in a JSON [`CacheEntry`] envelope and stored under the
//! `cache:` namespace, so prefix invalidation can never reach rate counters.
//! Every failure reads as a miss: the cache never fails a request.

use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::forwarder::UpstreamResponse;
use crate::metrics::get_metrics;
use crate::store::SharedStore;
use crate::utils::escape_query_component;

/// Store namespace for every cache key
pub const NAMESPACE: &str = "cache:";

/// Response header marking cached routes
pub const CACHE_STATUS_HEADER: &str = "x-cache";

/// Envelope persisted for each cached value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub value: T,
}

/// Deterministic cache key: `resource:family:[segment:...][canonical-query]`
///
/// Query parameters are kept sorted, so the key does not depend on the order
/// the client sent them in. Empty values are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    resource: String,
    family: String,
    segments: Vec<String>,
    params: BTreeMap<String, String>,
}

impl CacheKey {
    #[must_use]
    pub fn new(resource: &str, family: &str) -> Self {
        Self {
            resource: resource.to_string(),
            family: family.to_string(),
            segments: Vec::new(),
            params: BTreeMap::new(),
        }
    }

    /// Append an identifying path segment, e.g. a record id
    #[must_use]
    pub fn segment(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    #[must_use]
    pub fn param(mut self, name: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.params.insert(name.to_string(), value);
        }
        self
    }

    #[must_use]
    pub fn params<I, K, V>(self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        params
            .into_iter()
            .fold(self, |key, (name, value)| key.param(name.as_ref(), value))
    }

    /// Prefix shared by every key of a family
    #[must_use]
    pub fn family_prefix(resource: &str, family: &str) -> String {
        format!("{resource}:{family}:")
    }

    #[must_use]
    pub fn build(&self) -> String {
        let mut key = Self::family_prefix(&self.resource, &self.family);
        let mut parts: Vec<String> = self.segments.clone();
        if !self.params.is_empty() {
            let query = self
                .params
                .iter()
                .map(|(k, v)| {
                    format!(
                        "{}={}",
                        escape_query_component(k),
                        escape_query_component(v)
                    )
                })
                .collect::<Vec<_>>()
                .join("&");
            parts.push(query);
        }
        key.push_str(&parts.join(":"));
        key
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.build())
    }
}

/// Keys and prefixes to drop after a successful write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invalidation {
    pub keys: Vec<String>,
    pub prefixes: Vec<String>,
}

impl Invalidation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.keys.push(key.into());
        self
    }

    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefixes.push(prefix.into());
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.prefixes.is_empty()
    }
}

/// Cached upstream response, relayed byte for byte on a hit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Base64 of the body bytes
    pub body: String,
}

impl CachedResponse {
    #[must_use]
    pub fn from_upstream(response: &UpstreamResponse) -> Self {
        Self {
            status: response.status.as_u16(),
            content_type: response
                .headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(String::from),
            body: STANDARD.encode(&response.body),
        }
    }

    /// Rebuild the HTTP response; `None` if the stored body is corrupt
    #[must_use]
    pub fn into_response(self) -> Option<Response> {
        let body = STANDARD.decode(self.body.as_bytes()).ok()?;
        let status = StatusCode::from_u16(self.status).ok()?;
        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        if let Some(content_type) = self.content_type.and_then(|ct| HeaderValue::from_str(&ct).ok())
        {
            response.headers_mut().insert(header::CONTENT_TYPE, content_type);
        }
        response
            .headers_mut()
            .insert(CACHE_STATUS_HEADER, HeaderValue::from_static("HIT"));
        Some(response)
    }
}

/// Read-through cache for idempotent routes
pub struct ResponseCache {
    store: Arc<dyn SharedStore>,
    enabled: bool,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("backend", &self.store.backend())
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl ResponseCache {
    #[must_use]
    pub fn new(store: Arc<dyn SharedStore>, enabled: bool) -> Self {
        Self { store, enabled }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn namespaced(key: &str) -> String {
        format!("{NAMESPACE}{key}")
    }

    /// Look up a value; corrupt, expired or unreachable entries are misses
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.enabled {
            return None;
        }

        let raw = match self.store.get(&Self::namespaced(key)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                get_metrics().record_cache_lookup(false);
                return None;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                get_metrics().record_cache_lookup(false);
                return None;
            }
        };

        let entry: CacheEntry<T> = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                get_metrics().record_cache_lookup(false);
                return None;
            }
        };

        if entry.expires_at <= Utc::now() {
            debug!(key = %key, "Cache entry past its expiry");
            get_metrics().record_cache_lookup(false);
            return None;
        }

        get_metrics().record_cache_lookup(true);
        Some(entry.value)
    }

    /// Store a value for `ttl`; failures are logged and swallowed
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        if !self.enabled || ttl.is_zero() {
            return;
        }

        let now = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let entry = CacheEntry {
            key: key.to_string(),
            created_at: now,
            expires_at,
            value,
        };

        let raw = match serde_json::to_vec(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to encode cache entry");
                return;
            }
        };

        if let Err(e) = self.store.set(&Self::namespaced(key), &raw, ttl).await {
            warn!(key = %key, error = %e, "Cache write failed");
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        match self.store.delete(&Self::namespaced(key)).await {
            Ok(existed) => existed,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache delete failed");
                false
            }
        }
    }

    /// Remove every key starting with `prefix`; an empty prefix clears the cache
    pub async fn delete_by_prefix(&self, prefix: &str) -> u64 {
        match self.store.delete_by_prefix(&Self::namespaced(prefix)).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(prefix = %prefix, error = %e, "Cache prefix delete failed");
                0
            }
        }
    }

    /// Apply an invalidation plan, returning how many entries were removed
    pub async fn invalidate(&self, plan: &Invalidation) -> u64 {
        let mut removed = 0;
        for key in &plan.keys {
            removed += u64::from(self.delete(key).await);
        }
        for prefix in &plan.prefixes {
            removed += self.delete_by_prefix(prefix).await;
        }

        get_metrics().record_cache_invalidation(removed);
        debug!(keys = ?plan.keys, prefixes = ?plan.prefixes, removed, "Cache invalidated");
        removed
    }
}
