//! Content-addressed caption cache
//!
//! Keys are `caption:hash:<sha256>` over the raw image bytes; values are
//! serialized [`CaptionRecord`]s written with a TTL. Both operations are
//! fail-open: a backing-store error is logged and counted, and the request
//! proceeds as a miss. Only cloud results are written through; edge and local
//! captions cost nothing to reproduce and are not cached.
//!
//! The exact-hash lookup is the present contract; an embedding-space
//! nearest-neighbour upgrade would sit behind the same interface.

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::routing::{content_sha256, CaptionRecord};
use crate::telemetry::MetricsRegistry;

const KEY_PREFIX: &str = "caption:hash:";

/// Sub-tier label used on cache hit/miss metrics
const EXACT_TIER: &str = "exact";

/// Cache backend errors. Callers of [`SemanticCache`] never see these; the
/// cache swallows them fail-open.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Keyed string store with per-entry TTL. Redis in production, in-memory in
/// tests and single-node setups.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
}

/// Redis-backed store shared across service instances
pub struct RedisCacheStore {
    redis: ConnectionManager,
}

impl RedisCacheStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.redis.clone())
            .await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async::<_, ()>(&mut self.redis.clone())
            .await?;
        Ok(())
    }
}

/// In-process store with lazy TTL expiry
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let expired = {
            let entries = self.entries.read();
            match entries.get(key) {
                Some((value, expires_at)) => {
                    if Instant::now() < *expires_at {
                        return Ok(Some(value.clone()));
                    }
                    true
                }
                None => false,
            }
        };
        if expired {
            self.entries.write().remove(key);
        }
        Ok(None)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.entries
            .write()
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }
}

/// Caption memo keyed by image content hash
pub struct SemanticCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    metrics: Arc<MetricsRegistry>,
}

impl SemanticCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration, metrics: Arc<MetricsRegistry>) -> Self {
        Self { store, ttl, metrics }
    }

    fn key_for(image_bytes: &[u8]) -> String {
        format!("{}{}", KEY_PREFIX, content_sha256(image_bytes))
    }

    /// Look up a prior caption for these exact bytes. Backend errors degrade
    /// to a miss.
    pub async fn lookup(&self, image_bytes: &[u8]) -> Option<CaptionRecord> {
        let key = Self::key_for(image_bytes);
        match self.store.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<CaptionRecord>(&raw) {
                Ok(record) => {
                    self.metrics.cache_hits_total.inc(&[EXACT_TIER]);
                    Some(record)
                }
                Err(e) => {
                    tracing::warn!(target: "prism::cache", error = %e, "undecodable cache entry");
                    self.metrics.cache_errors_total.inc();
                    self.metrics.cache_misses_total.inc(&[EXACT_TIER]);
                    None
                }
            },
            Ok(None) => {
                self.metrics.cache_misses_total.inc(&[EXACT_TIER]);
                None
            }
            Err(e) => {
                tracing::warn!(target: "prism::cache", error = %e, "cache lookup failed");
                self.metrics.cache_errors_total.inc();
                self.metrics.cache_misses_total.inc(&[EXACT_TIER]);
                None
            }
        }
    }

    /// Write a caption through with the configured TTL. Errors are dropped
    /// silently apart from a warning metric.
    pub async fn store(&self, image_bytes: &[u8], record: &CaptionRecord) {
        let key = Self::key_for(image_bytes);
        let raw = match serde_json::to_string(record) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(target: "prism::cache", error = %e, "unserializable caption record");
                self.metrics.cache_errors_total.inc();
                return;
            }
        };
        if let Err(e) = self.store.set_ex(&key, &raw, self.ttl).await {
            tracing::warn!(target: "prism::cache", error = %e, "cache store failed");
            self.metrics.cache_errors_total.inc();
        }
    }
}
