use std::sync::Arc;

use async_trait::async_trait;
use fanout_common::{AppResult, Timer, get_metrics};

use crate::entities::Entity;
use crate::service::Service;

/// Records store latency and errors in the process metrics.
pub struct Instrument<E: Entity> {
    inner: Arc<dyn Service<E>>,
}

impl<E: Entity> Instrument<E> {
    /// Record metrics of every call made to `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn Service<E>>) -> Self {
        Self { inner }
    }
}

fn record<T>(timer: &Timer, res: &AppResult<T>) {
    get_metrics().record_store_op(timer.elapsed(), res.is_err());
}

#[async_trait]
impl<E: Entity> Service<E> for Instrument<E> {
    async fn put(&self, ns: &str, entity: E) -> AppResult<E> {
        let timer = Timer::start();
        let res = self.inner.put(ns, entity).await;
        record(&timer, &res);
        res
    }

    async fn query(&self, ns: &str, opts: &E::Query) -> AppResult<Vec<E>> {
        let timer = Timer::start();
        let res = self.inner.query(ns, opts).await;
        record(&timer, &res);
        res
    }

    async fn count(&self, ns: &str, opts: &E::Query) -> AppResult<u64> {
        let timer = Timer::start();
        let res = self.inner.count(ns, opts).await;
        record(&timer, &res);
        res
    }

    async fn setup(&self, ns: &str) -> AppResult<()> {
        self.inner.setup(ns).await
    }

    async fn teardown(&self, ns: &str) -> AppResult<()> {
        self.inner.teardown(ns).await
    }
}
