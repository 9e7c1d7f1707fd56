use async_trait::async_trait;
use dashmap::DashMap;
use redis::{AsyncCommands, aio::ConnectionManager};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::clock::{Clock, TokioClock};
use crate::config::CacheBackendKind;
use crate::error::Result;
use crate::metrics::CACHE_SIZE;

// Longest TTL either backend will store (30 days)
pub const MAX_TTL_SECS: u64 = 30 * 24 * 3600;

// ttl in seconds; None takes the backend default. Both backends clamp to 1..=MAX_TTL_SECS
pub fn effective_ttl(ttl: Option<u64>, default_ttl: u64) -> u64 {
    ttl.unwrap_or(default_ttl).clamp(1, MAX_TTL_SECS)
}

// Expired entries read as None
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value, ttl: Option<u64>) -> Result<()>;

    async fn del(&self, key: &str) -> Result<()>;
}

// Cache entry with expiry
#[derive(Clone)]
pub struct CacheEntry {
    pub value: Value,
    pub expires_at: Instant,
}

// Create a cache key (hash of query + variables)
pub fn make_cache_key(query: &str, variables: Option<&Value>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query);
    if let Some(variables) = variables {
        hasher.update(variables.to_string());
    }
    format!("{:x}", hasher.finalize())
}

// In-process cache; expiry checked lazily on read
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
    prefix: String,
    default_ttl: u64,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    pub fn new(prefix: impl Into<String>, default_ttl: u64) -> Self {
        Self::with_clock(prefix, default_ttl, Arc::new(TokioClock))
    }

    pub fn with_clock(prefix: impl Into<String>, default_ttl: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            prefix: prefix.into(),
            default_ttl,
            clock,
        }
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        CACHE_SIZE.set(self.entries.len() as f64);
        before.saturating_sub(self.entries.len())
    }

    pub fn spawn_sweeper(self: &Arc<Self>, sweep_interval: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            info!("Cache sweeper started (interval: {:?})", sweep_interval);
            loop {
                cache.clock.sleep(sweep_interval).await;
                let removed = cache.purge_expired();
                if removed > 0 {
                    debug!(removed, remaining = cache.len(), "swept expired cache entries");
                }
            }
        })
    }
}

#[async_trait]
impl ResultCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let key = self.prefixed(key);
        let now = self.clock.now();

        // Clone out before removing so no shard lock is held across remove
        let entry = self.entries.get(&key).map(|entry| entry.clone());
        match entry {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.value)),
            Some(_) => {
                self.entries.remove(&key);
                CACHE_SIZE.set(self.entries.len() as f64);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<u64>) -> Result<()> {
        let ttl = effective_ttl(ttl, self.default_ttl);
        let expires_at = self.clock.now() + Duration::from_secs(ttl);
        self.entries
            .insert(self.prefixed(key), CacheEntry { value, expires_at });
        CACHE_SIZE.set(self.entries.len() as f64);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.entries.remove(&self.prefixed(key));
        CACHE_SIZE.set(self.entries.len() as f64);
        Ok(())
    }
}

// Shared Redis cache - JSON values under the prefixed key
#[derive(Clone)]
pub struct RedisCache {
    conn_manager: ConnectionManager,
    prefix: String,
    default_ttl: u64,
    redis_url: String,
}

impl fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCache")
            .field("redis_url", &self.redis_url)
            .field("prefix", &self.prefix)
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl RedisCache {
    pub async fn connect(redis_url: &str, prefix: impl Into<String>, default_ttl: u64) -> Result<Self> {
        info!("Connecting Redis cache at {}", redis_url);
        let client = redis::Client::open(redis_url)?;
        let conn_manager = ConnectionManager::new(client).await?;
        Ok(Self {
            conn_manager,
            prefix: prefix.into(),
            default_ttl,
            redis_url: redis_url.to_string(),
        })
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait]
impl ResultCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let key = self.prefixed(key);
        let mut conn = self.conn_manager.clone();
        let data: Option<String> = conn.get(&key).await?;
        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<u64>) -> Result<()> {
        let key = self.prefixed(key);
        // SETEX rejects a zero expiry
        let ttl = effective_ttl(ttl, self.default_ttl);
        let data = serde_json::to_string(&value)?;
        let mut conn = self.conn_manager.clone();
        conn.set_ex::<_, _, ()>(&key, data, ttl).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        conn.del::<_, ()>(self.prefixed(key)).await?;
        Ok(())
    }
}

pub async fn build_cache(
    backend: CacheBackendKind,
    redis_url: &str,
    prefix: &str,
    default_ttl: u64,
    sweep_interval: Option<Duration>,
) -> Result<Arc<dyn ResultCache>> {
    match backend {
        CacheBackendKind::Memory => {
            let cache = Arc::new(MemoryCache::new(prefix, default_ttl));
            if let Some(sweep_interval) = sweep_interval {
                cache.spawn_sweeper(sweep_interval);
            }
            Ok(cache)
        }
        CacheBackendKind::Redis => match RedisCache::connect(redis_url, prefix, default_ttl).await {
            Ok(cache) => Ok(Arc::new(cache)),
            Err(e) => {
                warn!("Redis cache unavailable at {}: {}", redis_url, e);
                Err(e)
            }
        },
    }
}
