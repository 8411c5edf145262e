//! Shared handler state.

use std::sync::Arc;

use async_trait::async_trait;
use fanout_common::config::RateLimitConfig;
use fanout_core::Core;
use fred::clients::Client;
use fred::interfaces::ClientLike;

use crate::rate_limit::{Limiter, MemoryLimiter};

/// Liveness check of a backing service.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Key reported in the health document.
    fn name(&self) -> &'static str;

    /// Whether the service answers.
    async fn healthy(&self) -> bool;
}

/// Redis connection liveness.
pub struct RedisProbe(pub Client);

#[async_trait]
impl Probe for RedisProbe {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn healthy(&self) -> bool {
        self.0.is_connected()
    }
}

/// Probe with a fixed answer, for processes running without the service.
pub struct StaticProbe {
    /// Key reported in the health document.
    pub name: &'static str,
    /// Fixed answer of the probe.
    pub healthy: bool,
}

#[async_trait]
impl Probe for StaticProbe {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn healthy(&self) -> bool {
        self.healthy
    }
}

/// Application state.
#[derive(Clone)]
pub struct AppState {
    /// Business operations.
    pub core: Core,
    /// Quota store of the rate limiter.
    pub limiter: Arc<dyn Limiter>,
    /// Quotas per app stage.
    pub ratelimit: RateLimitConfig,
    /// Backing services reported by the health check.
    pub probes: Vec<Arc<dyn Probe>>,
}

impl AppState {
    /// State with an in-process limiter and no probes.
    #[must_use]
    pub fn new(core: Core, ratelimit: RateLimitConfig) -> Self {
        Self {
            core,
            limiter: Arc::new(MemoryLimiter::new()),
            ratelimit,
            probes: Vec::new(),
        }
    }

    /// Replace the limiter.
    #[must_use]
    pub fn with_limiter(mut self, limiter: Arc<dyn Limiter>) -> Self {
        self.limiter = limiter;
        self
    }

    /// Add a health probe.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.probes.push(probe);
        self
    }
}
