//! Per-app request quotas.
//!
//! Every app token gets a fixed window of requests. The first request of a
//! window opens it with `limit - 1` remaining; each further request
//! decrements the quota until the window expires.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use fanout_common::{AppError, AppResult, get_metrics};
use fred::clients::Client;
use fred::interfaces::KeysInterface;
use fred::types::Expiration;
use tokio::sync::RwLock;

use crate::extractors::CurrentApp;
use crate::response::ApiError;
use crate::state::AppState;

/// Quota of the window.
pub const HEADER_QUOTA: &str = "x-ratelimit-quota";
/// Requests left in the window; negative once exceeded.
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
/// Unix time the window resets.
pub const HEADER_RESET: &str = "x-ratelimit-reset";

/// Outcome of one request against a quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    /// Requests left in the window; negative once exceeded.
    pub remaining: i64,
    /// End of the window.
    pub reset: DateTime<Utc>,
}

impl Quota {
    /// Whether the request that produced this quota is over the limit.
    #[must_use]
    pub const fn exceeded(&self) -> bool {
        self.remaining < 0
    }
}

/// Counts requests per key.
#[async_trait]
pub trait Limiter: Send + Sync {
    /// Record one request for `key`.
    async fn request(&self, key: &str, limit: i64, window: Duration) -> AppResult<Quota>;
}

fn window_end(window: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero())
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    quota: i64,
    expires: DateTime<Utc>,
}

/// In-process limiter.
#[derive(Clone, Default)]
pub struct MemoryLimiter {
    states: Arc<RwLock<HashMap<String, WindowState>>>,
}

impl MemoryLimiter {
    /// Create a new limiter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of tracked keys.
    pub async fn key_count(&self) -> usize {
        self.states.read().await.len()
    }
}

#[async_trait]
impl Limiter for MemoryLimiter {
    async fn request(&self, key: &str, limit: i64, window: Duration) -> AppResult<Quota> {
        let mut states = self.states.write().await;
        let now = Utc::now();
        // Expired windows are dropped so that the map only holds live keys.
        states.retain(|_, s| s.expires > now);

        let state = states
            .entry(key.to_string())
            .and_modify(|s| s.quota -= 1)
            .or_insert_with(|| WindowState {
                quota: limit - 1,
                expires: window_end(window),
            });

        Ok(Quota {
            remaining: state.quota,
            reset: state.expires,
        })
    }
}

/// Limiter shared between processes through Redis.
#[derive(Clone)]
pub struct RedisLimiter {
    client: Client,
    prefix: String,
}

impl RedisLimiter {
    /// Limit under keys `<prefix>:<key>`.
    #[must_use]
    pub fn new(client: Client, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }
}

fn redis_err(e: impl std::fmt::Display) -> AppError {
    AppError::Redis(e.to_string())
}

#[async_trait]
impl Limiter for RedisLimiter {
    async fn request(&self, key: &str, limit: i64, window: Duration) -> AppResult<Quota> {
        let key = self.key(key);
        let mut quota: i64 = self.client.decr(key.as_str()).await.map_err(redis_err)?;
        let ttl: i64 = self.client.ttl(key.as_str()).await.map_err(redis_err)?;

        // No expiry means the decrement created the key.
        if ttl < 0 {
            quota = limit - 1;
            let secs = i64::try_from(window.as_secs()).unwrap_or(i64::MAX);
            self.client
                .set::<(), _, _>(key.as_str(), quota, Some(Expiration::EX(secs)), None, false)
                .await
                .map_err(redis_err)?;
            return Ok(Quota {
                remaining: quota,
                reset: window_end(window),
            });
        }

        Ok(Quota {
            remaining: quota,
            reset: Utc::now() + chrono::Duration::seconds(ttl),
        })
    }
}

/// Charge the calling app one request and report its quota.
pub async fn rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(CurrentApp(app, _)) = req.extensions().get::<CurrentApp>().cloned() else {
        return next.run(req).await;
    };

    let limit = state.ratelimit.limit_for(app.in_production);
    let window = Duration::from_secs(state.ratelimit.window_secs.max(1).unsigned_abs());
    let quota = match state.limiter.request(&app.token, limit, window).await {
        Ok(quota) => quota,
        Err(e) => return ApiError::from(e).into_response(),
    };

    let mut response = if quota.exceeded() {
        get_metrics().record_rate_limited();
        ApiError::from(AppError::LimitExceeded("request quota exceeded".to_string()))
            .into_response()
    } else {
        next.run(req).await
    };

    let headers = response.headers_mut();
    headers.insert(HEADER_QUOTA, HeaderValue::from(limit));
    headers.insert(HEADER_REMAINING, HeaderValue::from(quota.remaining));
    headers.insert(HEADER_RESET, HeaderValue::from(quota.reset.timestamp()));
    response
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_memory_limiter_counts_down() {
        let limiter = MemoryLimiter::new();

        let first = limiter.request("app", 3, WINDOW).await.unwrap();
        assert_eq!(first.remaining, 2);
        assert!(first.reset > Utc::now());

        limiter.request("app", 3, WINDOW).await.unwrap();
        let third = limiter.request("app", 3, WINDOW).await.unwrap();
        assert_eq!(third.remaining, 0);
        assert!(!third.exceeded());

        let fourth = limiter.request("app", 3, WINDOW).await.unwrap();
        assert!(fourth.exceeded());
        assert_eq!(fourth.reset, first.reset);
    }

    #[tokio::test]
    async fn test_memory_limiter_separate_keys() {
        let limiter = MemoryLimiter::new();
        limiter.request("a", 1, WINDOW).await.unwrap();
        assert!(limiter.request("a", 1, WINDOW).await.unwrap().exceeded());
        assert!(!limiter.request("b", 1, WINDOW).await.unwrap().exceeded());
        assert_eq!(limiter.key_count().await, 2);
    }

    #[tokio::test]
    async fn test_memory_limiter_window_expires() {
        let limiter = MemoryLimiter::new();
        limiter.request("app", 1, Duration::ZERO).await.unwrap();
        let again = limiter.request("app", 1, Duration::ZERO).await.unwrap();
        assert_eq!(again.remaining, 0);
    }

    #[tokio::test]
    async fn test_memory_limiter_prunes_expired_keys() {
        let limiter = MemoryLimiter::new();
        limiter.request("old", 1, Duration::ZERO).await.unwrap();
        limiter.request("live", 1, WINDOW).await.unwrap();
        assert_eq!(limiter.key_count().await, 1);

        limiter.request("other", 1, WINDOW).await.unwrap();
        assert_eq!(limiter.key_count().await, 2);
    }
}
