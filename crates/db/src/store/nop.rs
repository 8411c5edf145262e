//! Store that validates writes and discards them. Used for dry runs.

use std::marker::PhantomData;

use async_trait::async_trait;
use fanout_common::AppResult;

use super::{check_namespace, stamp};
use crate::entities::Entity;
use crate::service::Service;

/// Store that accepts writes and never returns anything.
pub struct NopStore<E>(PhantomData<fn() -> E>);

impl<E> NopStore<E> {
    /// Create the store.
    #[must_use]
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<E> Default for NopStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: Entity> Service<E> for NopStore<E> {
    async fn put(&self, ns: &str, mut entity: E) -> AppResult<E> {
        check_namespace(ns)?;
        entity.validate()?;
        stamp(&mut entity, None);
        Ok(entity)
    }

    async fn query(&self, ns: &str, _opts: &E::Query) -> AppResult<Vec<E>> {
        check_namespace(ns)?;
        Ok(Vec::new())
    }

    async fn count(&self, ns: &str, _opts: &E::Query) -> AppResult<u64> {
        check_namespace(ns)?;
        Ok(0)
    }

    async fn setup(&self, _ns: &str) -> AppResult<()> {
        Ok(())
    }

    async fn teardown(&self, _ns: &str) -> AppResult<()> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entities::{Event, EventQuery, event::TYPE_LIKE};

    #[tokio::test]
    async fn test_nop_validates_and_forgets() {
        let store = NopStore::<Event>::new();
        assert!(store.put("app_1_1", Event::default()).await.is_err());

        let e = Event {
            kind: TYPE_LIKE.into(),
            user_id: 1,
            ..Event::default()
        };
        store.put("app_1_1", e).await.unwrap();
        assert!(store.query("app_1_1", &EventQuery::default()).await.unwrap().is_empty());
        assert_eq!(store.count("app_1_1", &EventQuery::default()).await.unwrap(), 0);
    }
}
