//! Entity service contract.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use fanout_common::AppResult;
use serde::Serialize;

use crate::entities::{
    App, Connection, Device, Entity, Event, Object, ObjectQuery, Reaction, ReactionQuery,
    ReactionType, Rule, Session, User,
};

/// Uniform operations over one entity kind inside a namespace.
///
/// Stores and middleware implement the same contract so they stack freely.
#[async_trait]
pub trait Service<E: Entity>: Send + Sync {
    /// Insert or update `entity`, returning the stored value.
    async fn put(&self, ns: &str, entity: E) -> AppResult<E>;

    /// Values matching `opts`, newest first.
    async fn query(&self, ns: &str, opts: &E::Query) -> AppResult<Vec<E>>;

    /// Number of values matching `opts`.
    async fn count(&self, ns: &str, opts: &E::Query) -> AppResult<u64>;

    /// Provision storage for `ns`. Idempotent.
    async fn setup(&self, ns: &str) -> AppResult<()>;

    /// Drop storage of `ns`. Idempotent.
    async fn teardown(&self, ns: &str) -> AppResult<()>;
}

/// Shared app service.
pub type AppService = Arc<dyn Service<App>>;
/// Shared connection service.
pub type ConnectionService = Arc<dyn Service<Connection>>;
/// Shared device service.
pub type DeviceService = Arc<dyn Service<Device>>;
/// Shared event service.
pub type EventService = Arc<dyn Service<Event>>;
/// Shared object service.
pub type ObjectService = Arc<dyn Service<Object>>;
/// Shared reaction service.
pub type ReactionService = Arc<dyn Service<Reaction>>;
/// Shared rule service.
pub type RuleService = Arc<dyn Service<Rule>>;
/// Shared session service.
pub type SessionService = Arc<dyn Service<Session>>;
/// Shared user service.
pub type UserService = Arc<dyn Service<User>>;

/// Convenience lookups available on every service.
#[async_trait]
pub trait ServiceExt<E: Entity>: Service<E> {
    /// First match of `opts`, if any.
    async fn one(&self, ns: &str, opts: &E::Query) -> AppResult<Option<E>> {
        Ok(self.query(ns, opts).await?.into_iter().next())
    }
}

impl<E: Entity, S: Service<E> + ?Sized> ServiceExt<E> for S {}

/// Aggregates over objects.
#[async_trait]
pub trait ObjectServiceExt: Service<Object> {
    /// Live first-party comment count per object id.
    async fn count_multi(&self, ns: &str, ids: &[u64]) -> AppResult<HashMap<u64, u64>> {
        let mut counts = HashMap::with_capacity(ids.len());
        for id in ids {
            if counts.contains_key(id) {
                continue;
            }
            let n = self.count(ns, &ObjectQuery::comments_of(*id)).await?;
            counts.insert(*id, n);
        }
        Ok(counts)
    }
}

impl<S: Service<Object> + ?Sized> ObjectServiceExt for S {}

/// Live reaction counts of one object, by type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReactionCounts {
    /// Live `like` reactions.
    pub like: u64,
    /// Live `love` reactions.
    pub love: u64,
    /// Live `haha` reactions.
    pub haha: u64,
    /// Live `wow` reactions.
    pub wow: u64,
    /// Live `sad` reactions.
    pub sad: u64,
    /// Live `angry` reactions.
    pub angry: u64,
}

impl ReactionCounts {
    fn slot(&mut self, kind: ReactionType) -> &mut u64 {
        match kind {
            ReactionType::Like => &mut self.like,
            ReactionType::Love => &mut self.love,
            ReactionType::Haha => &mut self.haha,
            ReactionType::Wow => &mut self.wow,
            ReactionType::Sad => &mut self.sad,
            ReactionType::Angry => &mut self.angry,
        }
    }

    /// Count for `kind`.
    #[must_use]
    pub const fn get(&self, kind: ReactionType) -> u64 {
        match kind {
            ReactionType::Like => self.like,
            ReactionType::Love => self.love,
            ReactionType::Haha => self.haha,
            ReactionType::Wow => self.wow,
            ReactionType::Sad => self.sad,
            ReactionType::Angry => self.angry,
        }
    }
}

/// Aggregates over reactions.
#[async_trait]
pub trait ReactionServiceExt: Service<Reaction> {
    /// Live reaction counts for each object id.
    async fn count_by_type(
        &self,
        ns: &str,
        object_ids: &[u64],
    ) -> AppResult<HashMap<u64, ReactionCounts>> {
        let mut counts: HashMap<u64, ReactionCounts> = HashMap::with_capacity(object_ids.len());
        for id in object_ids {
            if counts.contains_key(id) {
                continue;
            }
            let mut c = ReactionCounts::default();
            for kind in ReactionType::ALL {
                *c.slot(kind) = self.count(ns, &ReactionQuery::live_of(*id, kind)).await?;
            }
            counts.insert(*id, c);
        }
        Ok(counts)
    }
}

impl<S: Service<Reaction> + ?Sized> ReactionServiceExt for S {}
