//! Shared counter/cache store
//!
//! The gateway keeps no cross-request state of its own: rate counters and
//! cached responses live in an external key-value store reached through
//! [`SharedStore`]. [`RedisStore`] is the production backend; [`MemoryStore`]
//! serves single-instance development setups and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;

/// Keys scanned per SCAN round trip during prefix deletion
const SCAN_BATCH: usize = 200;

/// Store failures. Callers degrade instead of surfacing these.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Result of an atomic increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    /// Value after the increment
    pub count: u64,
    /// Seconds until the counter expires
    pub ttl_seconds: u64,
}

/// Operations the gateway needs from the shared store
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Atomically increment `key`; a freshly created counter expires after `window`
    async fn increment(&self, key: &str, window: Duration) -> Result<Counter, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError>;

    /// Returns whether the key existed
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Delete every key starting with `prefix`, returning how many were removed
    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    /// Backend name for logs and health output
    fn backend(&self) -> &'static str;
}

/// Open the store described by the configuration
pub async fn connect(config: &StoreConfig) -> anyhow::Result<Arc<dyn SharedStore>> {
    let timeout = Duration::from_millis(config.operation_timeout_ms.max(1));
    if config.url.starts_with("memory://") {
        info!("Using in-process memory store");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = RedisStore::open(&config.url, timeout).await?;
    Ok(Arc::new(store))
}

// ---------------------------------------------------------------------------
// Redis
// ---------------------------------------------------------------------------

/// INCR with expiry set on the first increment, plus the remaining TTL.
/// A counter left without expiry gets one, so it can never live forever.
const INCREMENT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('TTL', KEYS[1])
if ttl < 0 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
";

/// Redis-backed store. Connects lazily and reconnects after failures.
pub struct RedisStore {
    client: redis::Client,
    connection: Mutex<Option<ConnectionManager>>,
    operation_timeout: Duration,
    increment_script: redis::Script,
}

impl RedisStore {
    /// Parse the URL and try an initial connection. An unreachable server is
    /// not fatal: operations fail (and callers degrade) until it comes back.
    pub async fn open(url: &str, operation_timeout: Duration) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let store = Self {
            client,
            connection: Mutex::new(None),
            operation_timeout,
            increment_script: redis::Script::new(INCREMENT_SCRIPT),
        };

        match store.connection().await {
            Ok(_) => info!("Connected to shared store at {}", redact(url)),
            Err(e) => warn!(
                "Shared store at {} unreachable at startup, continuing degraded: {}",
                redact(url),
                e
            ),
        }
        Ok(store)
    }

    /// Shared connection, created on first use. Waiting for the slot counts
    /// against the deadline too, so a hung connect cannot queue callers.
    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let connect = async {
            let mut guard = self.connection.lock().await;
            if let Some(conn) = guard.as_ref() {
                return Ok(conn.clone());
            }
            let conn = ConnectionManager::new(self.client.clone()).await?;
            *guard = Some(conn.clone());
            Ok::<_, StoreError>(conn)
        };

        tokio::time::timeout(self.operation_timeout, connect)
            .await
            .map_err(|_| StoreError::Timeout(self.operation_timeout))?
    }

    async fn bounded<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: std::future::Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.operation_timeout, op).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StoreError::Timeout(self.operation_timeout)),
        }
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<Counter, StoreError> {
        let mut conn = self.connection().await?;
        let mut invocation = self.increment_script.key(key);
        invocation.arg(window.as_secs().max(1));
        let (count, ttl): (u64, i64) = self.bounded(invocation.invoke_async(&mut conn)).await?;
        Ok(Counter {
            count,
            ttl_seconds: u64::try_from(ttl).unwrap_or(0),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = self
            .bounded(redis::cmd("GET").arg(key).query_async(&mut conn))
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let () = self
            .bounded(
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("EX")
                    .arg(ttl.as_secs().max(1))
                    .query_async(&mut conn),
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let removed: u64 = self.bounded(redis::cmd("DEL").arg(key).query_async(&mut conn)).await?;
        Ok(removed > 0)
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection().await?;
        let pattern = format!("{}*", escape_glob(prefix));
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = self
                .bounded(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn),
                )
                .await?;

            if !keys.is_empty() {
                let deleted: u64 = self
                    .bounded(redis::cmd("DEL").arg(&keys).query_async(&mut conn))
                    .await?;
                removed += deleted;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(prefix = %prefix, removed, "Deleted keys by prefix");
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: String = self.bounded(redis::cmd("PING").query_async(&mut conn)).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

/// Escape glob metacharacters so a prefix matches literally in SCAN MATCH
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Hide credentials in a connection string before logging it
fn redact(url: &str) -> String {
    match url.split_once('@') {
        Some((scheme_and_auth, host)) => {
            let scheme = scheme_and_auth.split("://").next().unwrap_or("redis");
            format!("{scheme}://***@{host}")
        }
        None => url.to_string(),
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Slot {
    Counter(u64),
    Value(Vec<u8>),
}

#[derive(Debug, Clone)]
struct Entry {
    slot: Slot,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Process-local store with the same expiry semantics as Redis
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.is_live(now)).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<Counter, StoreError> {
        let now = Instant::now();
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            slot: Slot::Counter(0),
            expires_at: now + window,
        });

        let fresh = !entry.is_live(now) || !matches!(entry.slot, Slot::Counter(_));
        if fresh {
            *entry = Entry {
                slot: Slot::Counter(0),
                expires_at: now + window,
            };
        }

        let count = match &mut entry.slot {
            Slot::Counter(n) => {
                *n += 1;
                *n
            }
            Slot::Value(_) => 1,
        };

        let remaining = entry.expires_at.saturating_duration_since(now);
        Ok(Counter {
            count,
            ttl_seconds: ceil_seconds(remaining),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = Instant::now();
        let value = self.entries.get(key).and_then(|entry| match &entry.slot {
            Slot::Value(bytes) if entry.is_live(now) => Some(bytes.clone()),
            Slot::Counter(n) if entry.is_live(now) => Some(n.to_string().into_bytes()),
            _ => None,
        });
        if value.is_none() {
            self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                slot: Slot::Value(value.to_vec()),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        Ok(self.entries.remove(key).is_some_and(|(_, entry)| entry.is_live(now)))
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|key, entry| {
            if key.starts_with(prefix) {
                if entry.is_live(now) {
                    removed += 1;
                }
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Whole seconds, rounded up, so a live counter never reports zero
fn ceil_seconds(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 { secs + 1 } else { secs }
}
