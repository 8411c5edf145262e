use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use fanout_common::AppResult;
use tracing::debug;

use crate::entities::Entity;
use crate::service::Service;

/// Emits one debug event per operation.
pub struct Logging<E: Entity> {
    inner: Arc<dyn Service<E>>,
}

impl<E: Entity> Logging<E> {
    /// Log every call made to `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn Service<E>>) -> Self {
        Self { inner }
    }
}

fn log<T>(ns: &str, entity: &str, op: &str, start: Instant, res: &AppResult<T>) {
    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
    match res {
        Ok(_) => debug!(namespace = %ns, entity, op, duration_ms, "Store operation"),
        Err(e) => debug!(namespace = %ns, entity, op, duration_ms, error = %e, "Store operation failed"),
    }
}

#[async_trait]
impl<E: Entity> Service<E> for Logging<E> {
    async fn put(&self, ns: &str, entity: E) -> AppResult<E> {
        let start = Instant::now();
        let res = self.inner.put(ns, entity).await;
        log(ns, E::TABLE, "put", start, &res);
        res
    }

    async fn query(&self, ns: &str, opts: &E::Query) -> AppResult<Vec<E>> {
        let start = Instant::now();
        let res = self.inner.query(ns, opts).await;
        log(ns, E::TABLE, "query", start, &res);
        res
    }

    async fn count(&self, ns: &str, opts: &E::Query) -> AppResult<u64> {
        let start = Instant::now();
        let res = self.inner.count(ns, opts).await;
        log(ns, E::TABLE, "count", start, &res);
        res
    }

    async fn setup(&self, ns: &str) -> AppResult<()> {
        let start = Instant::now();
        let res = self.inner.setup(ns).await;
        log(ns, E::TABLE, "setup", start, &res);
        res
    }

    async fn teardown(&self, ns: &str) -> AppResult<()> {
        let start = Instant::now();
        let res = self.inner.teardown(ns).await;
        log(ns, E::TABLE, "teardown", start, &res);
        res
    }
}
