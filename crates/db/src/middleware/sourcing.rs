use std::sync::Arc;

use async_trait::async_trait;
use fanout_common::{AppResult, get_metrics};
use tracing::warn;

use crate::entities::Entity;
use crate::service::Service;
use crate::source::Source;

/// Publishes a state change for every successful write.
pub struct Sourcing<E: Entity> {
    inner: Arc<dyn Service<E>>,
    source: Arc<dyn Source<E>>,
}

impl<E: Entity> Sourcing<E> {
    /// Propagate writes of `inner` to `source`.
    #[must_use]
    pub fn new(inner: Arc<dyn Service<E>>, source: Arc<dyn Source<E>>) -> Self {
        Self { inner, source }
    }
}

#[async_trait]
impl<E: Entity> Service<E> for Sourcing<E> {
    async fn put(&self, ns: &str, entity: E) -> AppResult<E> {
        let old = match entity.lookup() {
            Some(q) => self.inner.query(ns, &q).await?.into_iter().next(),
            None => None,
        };

        let new = self.inner.put(ns, entity).await?;

        // The write already happened; a lost change is logged, not returned.
        let res = self.source.propagate(ns, old.as_ref(), Some(&new)).await;
        get_metrics().record_propagation(res.is_ok());
        if let Err(e) = res {
            warn!(namespace = %ns, entity = E::TABLE, error = %e, "Failed to propagate change");
        }

        Ok(new)
    }

    async fn query(&self, ns: &str, opts: &E::Query) -> AppResult<Vec<E>> {
        self.inner.query(ns, opts).await
    }

    async fn count(&self, ns: &str, opts: &E::Query) -> AppResult<u64> {
        self.inner.count(ns, opts).await
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
    use crate::entities::{Reaction, ReactionType};
    use crate::source::{MemorySource, StateChange};
    use crate::store::MemoryStore;
    use fanout_common::{AppError, IdGenerator};

    const NS: &str = "app_1_1";

    struct Failing;

    #[async_trait]
    impl Source<Reaction> for Failing {
        async fn propagate(
            &self,
            _ns: &str,
            _old: Option<&Reaction>,
            _new: Option<&Reaction>,
        ) -> AppResult<String> {
            Err(AppError::Queue("down".into()))
        }

        async fn consume(&self) -> AppResult<StateChange<Reaction>> {
            Err(AppError::EmptySource)
        }

        async fn ack(&self, _ack_id: &str) -> AppResult<()> {
            Ok(())
        }
    }

    fn like() -> Reaction {
        Reaction {
            object_id: 1,
            owner_id: 2,
            kind: ReactionType::Like,
            ..Reaction::default()
        }
    }

    #[tokio::test]
    async fn test_publishes_pre_and_post_image() {
        let source = Arc::new(MemorySource::<Reaction>::default());
        let svc = Sourcing::new(
            Arc::new(MemoryStore::<Reaction>::new(IdGenerator::new())),
            Arc::clone(&source) as Arc<dyn Source<Reaction>>,
        );

        let created = svc.put(NS, like()).await.unwrap();
        let deleted = svc
            .put(
                NS,
                Reaction {
                    deleted: true,
                    ..created.clone()
                },
            )
            .await
            .unwrap();

        let first = source.consume().await.unwrap();
        assert_eq!(first.old, None);
        assert_eq!(first.new, Some(created.clone()));

        let second = source.consume().await.unwrap();
        assert_eq!(second.old, Some(created));
        assert_eq!(second.new, Some(deleted));
    }

    #[tokio::test]
    async fn test_failed_writes_publish_nothing() {
        let source = Arc::new(MemorySource::<Reaction>::default());
        let svc = Sourcing::new(
            Arc::new(MemoryStore::<Reaction>::new(IdGenerator::new())),
            Arc::clone(&source) as Arc<dyn Source<Reaction>>,
        );
        assert!(svc.put(NS, Reaction::default()).await.is_err());
        assert_eq!(source.pending().await, 0);
    }

    #[tokio::test]
    async fn test_propagation_failure_is_swallowed() {
        let svc = Sourcing::new(
            Arc::new(MemoryStore::<Reaction>::new(IdGenerator::new())),
            Arc::new(Failing) as Arc<dyn Source<Reaction>>,
        );
        assert!(svc.put(NS, like()).await.is_ok());
    }
}
