//! Counts cache: per-namespace integer counters with a TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use fanout_common::{AppError, AppResult};
use fred::clients::Client as RedisClient;
use fred::interfaces::KeysInterface;
use fred::types::Expiration;
use tokio::sync::Mutex;

/// Default TTL of cached counts: 5 minutes.
pub const DEFAULT_COUNT_TTL_SECS: u64 = 5 * 60;

/// Integer counters keyed by `(namespace, key)`.
///
/// `get` on a missing key fails with [`AppError::KeyNotFound`]. `incr` and
/// `decr` on a missing key create it at `1` and `-1`.
#[async_trait]
pub trait CountsCache: Send + Sync {
    /// Cached value of `key`, `KeyNotFound` on a miss.
    async fn get(&self, ns: &str, key: &str) -> AppResult<i64>;
    /// Store `value` under `key` with the cache ttl.
    async fn set(&self, ns: &str, key: &str, value: i64) -> AppResult<()>;
    /// Bump `key` by one, starting from zero on a miss.
    async fn incr(&self, ns: &str, key: &str) -> AppResult<i64>;
    /// Lower `key` by one, starting from zero on a miss.
    async fn decr(&self, ns: &str, key: &str) -> AppResult<i64>;
    /// Forget `key`.
    async fn delete(&self, ns: &str, key: &str) -> AppResult<()>;
}

fn cache_key(ns: &str, key: &str) -> String {
    format!("cache.count.{ns}.{key}")
}

fn redis_err(e: impl std::fmt::Display) -> AppError {
    AppError::Redis(e.to_string())
}

/// Counts cache backed by Redis.
#[derive(Clone)]
pub struct RedisCountsCache {
    redis: Arc<RedisClient>,
    ttl_secs: i64,
}

impl RedisCountsCache {
    /// Cache over `redis` expiring keys after `ttl`.
    #[must_use]
    pub fn new(redis: Arc<RedisClient>, ttl: Duration) -> Self {
        Self {
            redis,
            ttl_secs: i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX),
        }
    }

    async fn bump(&self, key: String, delta: i64) -> AppResult<i64> {
        let value: i64 = self.redis.incr_by(key.clone(), delta).await.map_err(redis_err)?;
        // A fresh key carries no TTL yet.
        if value == delta {
            self.redis
                .expire::<(), _>(key, self.ttl_secs, None)
                .await
                .map_err(redis_err)?;
        }
        Ok(value)
    }
}

#[async_trait]
impl CountsCache for RedisCountsCache {
    async fn get(&self, ns: &str, key: &str) -> AppResult<i64> {
        let k = cache_key(ns, key);
        let value: Option<i64> = self.redis.get(k.clone()).await.map_err(redis_err)?;
        value.ok_or(AppError::KeyNotFound(k))
    }

    async fn set(&self, ns: &str, key: &str, value: i64) -> AppResult<()> {
        self.redis
            .set::<(), _, _>(
                cache_key(ns, key),
                value,
                Some(Expiration::EX(self.ttl_secs)),
                None,
                false,
            )
            .await
            .map_err(redis_err)
    }

    async fn incr(&self, ns: &str, key: &str) -> AppResult<i64> {
        self.bump(cache_key(ns, key), 1).await
    }

    async fn decr(&self, ns: &str, key: &str) -> AppResult<i64> {
        self.bump(cache_key(ns, key), -1).await
    }

    async fn delete(&self, ns: &str, key: &str) -> AppResult<()> {
        self.redis
            .del::<i64, _>(cache_key(ns, key))
            .await
            .map(|_| ())
            .map_err(redis_err)
    }
}

/// In-process counts cache.
pub struct MemoryCountsCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (i64, Instant)>>,
}

impl MemoryCountsCache {
    /// Cache expiring keys after `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    async fn bump(&self, key: String, delta: i64) -> i64 {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let entry = entries
            .entry(key)
            .and_modify(|e| {
                if e.1 <= now {
                    *e = (0, now + self.ttl);
                }
            })
            .or_insert((0, now + self.ttl));
        entry.0 += delta;
        entry.0
    }
}

impl Default for MemoryCountsCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_COUNT_TTL_SECS))
    }
}

#[async_trait]
impl CountsCache for MemoryCountsCache {
    async fn get(&self, ns: &str, key: &str) -> AppResult<i64> {
        let k = cache_key(ns, key);
        let entries = self.entries.lock().await;
        match entries.get(&k) {
            Some((value, expires)) if *expires > Instant::now() => Ok(*value),
            _ => Err(AppError::KeyNotFound(k)),
        }
    }

    async fn set(&self, ns: &str, key: &str, value: i64) -> AppResult<()> {
        self.entries
            .lock()
            .await
            .insert(cache_key(ns, key), (value, Instant::now() + self.ttl));
        Ok(())
    }

    async fn incr(&self, ns: &str, key: &str) -> AppResult<i64> {
        Ok(self.bump(cache_key(ns, key), 1).await)
    }

    async fn decr(&self, ns: &str, key: &str) -> AppResult<i64> {
        Ok(self.bump(cache_key(ns, key), -1).await)
    }

    async fn delete(&self, ns: &str, key: &str) -> AppResult<()> {
        self.entries.lock().await.remove(&cache_key(ns, key));
        Ok(())
    }
}
