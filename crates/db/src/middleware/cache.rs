use std::sync::Arc;

use async_trait::async_trait;
use fanout_common::{AppResult, get_metrics};
use tracing::warn;

use crate::cache::CountsCache;
use crate::entities::Entity;
use crate::service::Service;

/// Read-through counts cache.
///
/// Counts whose query has a cached shape are served from the counts cache;
/// writes invalidate the keys the written value contributes to.
pub struct Cache<E: Entity> {
    inner: Arc<dyn Service<E>>,
    counts: Arc<dyn CountsCache>,
}

impl<E: Entity> Cache<E> {
    /// Serve counts of `inner` through `counts`.
    #[must_use]
    pub fn new(inner: Arc<dyn Service<E>>, counts: Arc<dyn CountsCache>) -> Self {
        Self { inner, counts }
    }
}

#[async_trait]
impl<E: Entity> Service<E> for Cache<E> {
    async fn put(&self, ns: &str, entity: E) -> AppResult<E> {
        let stored = self.inner.put(ns, entity).await?;
        for key in stored.affected_count_keys() {
            if let Err(e) = self.counts.delete(ns, &key).await {
                warn!(namespace = %ns, key = %key, error = %e, "Failed to invalidate count");
            }
        }
        Ok(stored)
    }

    async fn query(&self, ns: &str, opts: &E::Query) -> AppResult<Vec<E>> {
        self.inner.query(ns, opts).await
    }

    async fn count(&self, ns: &str, opts: &E::Query) -> AppResult<u64> {
        let Some(key) = E::count_key(opts) else {
            return self.inner.count(ns, opts).await;
        };

        match self.counts.get(ns, &key).await {
            Ok(n) => {
                get_metrics().record_cache_access(true);
                return Ok(u64::try_from(n).unwrap_or_default());
            }
            Err(e) if e.is_key_not_found() => get_metrics().record_cache_access(false),
            Err(e) => warn!(namespace = %ns, key = %key, error = %e, "Count cache unavailable"),
        }

        let n = self.inner.count(ns, opts).await?;
        if let Err(e) = self
            .counts
            .set(ns, &key, i64::try_from(n).unwrap_or(i64::MAX))
            .await
        {
            warn!(namespace = %ns, key = %key, error = %e, "Failed to populate count");
        }
        Ok(n)
    }

    async fn setup(&self, ns: &str) -> AppResult<()> {
        self.inner.setup(ns).await
    }

    async fn teardown(&self, ns: &str) -> AppResult<()> {
        self.inner.teardown(ns).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cache::MemoryCountsCache;
    use crate::entities::{Object, ObjectQuery, Visibility, object::TYPE_COMMENT, object::TYPE_POST};
    use crate::store::MemoryStore;
    use fanout_common::IdGenerator;

    const NS: &str = "app_1_1";

    #[tokio::test]
    async fn test_count_read_through_and_invalidation() {
        let counts: Arc<dyn CountsCache> = Arc::new(MemoryCountsCache::default());
        let store: Arc<dyn Service<Object>> = Arc::new(MemoryStore::new(IdGenerator::new()));
        let svc = Cache::new(Arc::clone(&store), Arc::clone(&counts));

        let post = svc
            .put(
                NS,
                Object {
                    owner_id: 1,
                    owned: true,
                    kind: TYPE_POST.into(),
                    visibility: Visibility::Public,
                    ..Object::default()
                },
            )
            .await
            .unwrap();
        let comment = Object {
            object_id: post.id,
            owner_id: 2,
            owned: true,
            kind: TYPE_COMMENT.into(),
            ..Object::default()
        };

        let q = ObjectQuery::comments_of(post.id);
        assert_eq!(svc.count(NS, &q).await.unwrap(), 0);
        let key = Object::count_key(&q).unwrap();
        assert_eq!(counts.get(NS, &key).await.unwrap(), 0);

        // A write behind the cache is not visible until invalidated.
        store.put(NS, comment.clone()).await.unwrap();
        assert_eq!(svc.count(NS, &q).await.unwrap(), 0);

        svc.put(NS, comment).await.unwrap();
        assert!(counts.get(NS, &key).await.is_err());
        assert_eq!(svc.count(NS, &q).await.unwrap(), 2);
    }
}
