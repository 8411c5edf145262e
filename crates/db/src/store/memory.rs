//! In-memory store, used by tests and single-process deployments.

use std::collections::HashMap;
use std::marker::PhantomData;

use async_trait::async_trait;
use fanout_common::{AppError, AppResult, IdGenerator};
use tokio::sync::RwLock;

use super::{check_namespace, id_key, stamp};
use crate::entities::{Entity, QueryOptions, matches};
use crate::service::Service;

/// Rows of one entity kind, grouped by namespace.
pub struct MemoryStore<E: Entity> {
    ids: IdGenerator,
    tables: RwLock<HashMap<String, Vec<E>>>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> MemoryStore<E> {
    /// Create an empty store drawing ids from `ids`.
    #[must_use]
    pub fn new(ids: IdGenerator) -> Self {
        Self {
            ids,
            tables: RwLock::new(HashMap::new()),
            _entity: PhantomData,
        }
    }

    fn select(rows: &[E], opts: &E::Query) -> Vec<E> {
        let window = opts.window();
        let mut out: Vec<E> = rows
            .iter()
            .filter(|e| window.contains(e.sort_time()) && matches(*e, opts))
            .cloned()
            .collect();
        out.sort_by_key(|e| std::cmp::Reverse(e.sort_time()));
        if let Some(limit) = window.limit {
            out.truncate(limit);
        }
        out
    }
}

#[async_trait]
impl<E: Entity> Service<E> for MemoryStore<E> {
    async fn put(&self, ns: &str, mut entity: E) -> AppResult<E> {
        check_namespace(ns)?;
        entity.validate()?;

        let mut tables = self.tables.write().await;
        let rows = tables.entry(ns.to_string()).or_default();

        let lookup = entity.lookup();
        let existing = lookup
            .as_ref()
            .and_then(|q| rows.iter().position(|r| matches(r, q)));

        if E::GENERATED_ID && lookup.is_some() && existing.is_none() {
            return Err(AppError::NotFound(format!("{} not found", E::TABLE)));
        }

        if let Some(parent) = entity.parent() {
            if !rows.iter().any(|r| matches(r, &parent)) {
                return Err(AppError::InvalidEntity(format!(
                    "{}: missing reference: parent does not exist",
                    E::TABLE
                )));
            }
        }

        for key in entity.unique_keys() {
            let taken = rows
                .iter()
                .enumerate()
                .any(|(i, r)| Some(i) != existing && r.unique_keys().contains(&key));
            if taken {
                return Err(AppError::NotUnique(format!("{} {key} already taken", E::TABLE)));
            }
        }

        stamp(&mut entity, existing.map(|i| &rows[i]));

        match existing {
            Some(i) => rows[i] = entity.clone(),
            None => {
                if E::GENERATED_ID {
                    entity.set_id(self.ids.next(&id_key::<E>(ns))?);
                }
                rows.push(entity.clone());
            }
        }

        Ok(entity)
    }

    async fn query(&self, ns: &str, opts: &E::Query) -> AppResult<Vec<E>> {
        check_namespace(ns)?;
        let tables = self.tables.read().await;
        Ok(tables
            .get(ns)
            .map(|rows| Self::select(rows, opts))
            .unwrap_or_default())
    }

    async fn count(&self, ns: &str, opts: &E::Query) -> AppResult<u64> {
        check_namespace(ns)?;
        let tables = self.tables.read().await;
        let window = opts.window();
        let n = tables.get(ns).map_or(0, |rows| {
            rows.iter()
                .filter(|e| window.contains(e.sort_time()) && matches(*e, opts))
                .count()
        });
        Ok(n as u64)
    }

    async fn setup(&self, ns: &str) -> AppResult<()> {
        check_namespace(ns)?;
        self.tables.write().await.entry(ns.to_string()).or_default();
        Ok(())
    }

    async fn teardown(&self, ns: &str) -> AppResult<()> {
        check_namespace(ns)?;
        self.tables.write().await.remove(ns);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entities::{
        Connection, ConnectionQuery, ConnectionState, ConnectionType, Object, ObjectQuery,
        Reaction, ReactionType, User, UserQuery, Visibility, now, object::TYPE_COMMENT,
        object::TYPE_POST,
    };
    use chrono::Duration;

    const NS: &str = "app_1_1";

    fn post(owner: u64) -> Object {
        Object {
            owner_id: owner,
            owned: true,
            kind: TYPE_POST.into(),
            visibility: Visibility::Public,
            ..Object::default()
        }
    }

    fn user(email: &str, username: &str) -> User {
        User {
            email: email.into(),
            username: username.into(),
            enabled: true,
            password: "hash".into(),
            ..User::default()
        }
    }

    #[tokio::test]
    async fn test_put_assigns_increasing_ids() {
        let store = MemoryStore::<Object>::new(IdGenerator::new());
        let a = store.put(NS, post(1)).await.unwrap();
        let b = store.put(NS, post(1)).await.unwrap();
        assert!(a.id > 0);
        assert!(b.id > a.id);
        assert!(a.created_at <= b.created_at);
    }

    #[tokio::test]
    async fn test_update_preserves_created_at() {
        let store = MemoryStore::<Object>::new(IdGenerator::new());
        let created = store.put(NS, post(1)).await.unwrap();

        let mut changed = created.clone();
        changed.tags = vec!["x".into()];
        let updated = store.put(NS, changed).await.unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at > created.updated_at);

        let found = store
            .query(
                NS,
                &ObjectQuery {
                    ids: vec![created.id],
                    ..ObjectQuery::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(found, vec![updated]);
    }

    #[tokio::test]
    async fn test_update_of_unknown_id_is_not_found() {
        let store = MemoryStore::<Object>::new(IdGenerator::new());
        let mut ghost = post(1);
        ghost.id = 42;
        let err = store.put(NS, ghost).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_invalid_entity_rejected() {
        let store = MemoryStore::<Object>::new(IdGenerator::new());
        let err = store.put(NS, Object::default()).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidEntity(_)));
    }

    #[tokio::test]
    async fn test_comment_requires_existing_post() {
        let store = MemoryStore::<Object>::new(IdGenerator::new());
        let comment = Object {
            object_id: 99,
            kind: TYPE_COMMENT.into(),
            ..post(2)
        };
        let err = store.put(NS, comment.clone()).await.unwrap_err();
        assert!(matches!(&err, AppError::InvalidEntity(m) if m.contains("missing reference")));

        let parent = store.put(NS, post(1)).await.unwrap();
        let ok = store
            .put(
                NS,
                Object {
                    object_id: parent.id,
                    ..comment
                },
            )
            .await
            .unwrap();
        assert_eq!(ok.object_id, parent.id);
    }

    #[tokio::test]
    async fn test_unique_email_and_username() {
        let store = MemoryStore::<User>::new(IdGenerator::new());
        store.put(NS, user("ada@x.y", "ada")).await.unwrap();

        let err = store.put(NS, user("ADA@x.y", "other")).await.unwrap_err();
        assert!(matches!(err, AppError::NotUnique(_)));
        let err = store.put(NS, user("b@x.y", "Ada")).await.unwrap_err();
        assert!(matches!(err, AppError::NotUnique(_)));

        let disabled = User {
            enabled: false,
            ..user("ada@x.y", "ada")
        };
        assert!(store.put(NS, disabled).await.is_ok());
    }

    #[tokio::test]
    async fn test_user_can_update_itself() {
        let store = MemoryStore::<User>::new(IdGenerator::new());
        let mut u = store.put(NS, user("ada@x.y", "ada")).await.unwrap();
        u.first_name = "Ada".into();
        let u = store.put(NS, u).await.unwrap();
        let found = store
            .query(
                NS,
                &UserQuery {
                    emails: vec!["ada@x.y".into()],
                    ..UserQuery::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(found, vec![u]);
    }

    #[tokio::test]
    async fn test_connection_upsert_by_triple() {
        let store = MemoryStore::<Connection>::new(IdGenerator::new());
        let edge = Connection {
            enabled: true,
            from_id: 1,
            to_id: 2,
            kind: ConnectionType::Friend,
            state: ConnectionState::Pending,
            ..Connection::default()
        };
        let first = store.put(NS, edge.clone()).await.unwrap();
        let second = store
            .put(
                NS,
                Connection {
                    state: ConnectionState::Confirmed,
                    ..edge
                },
            )
            .await
            .unwrap();

        assert_eq!(second.created_at, first.created_at);
        let all = store.query(NS, &ConnectionQuery::default()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].state, ConnectionState::Confirmed);
    }

    #[tokio::test]
    async fn test_query_window_and_order() {
        let store = MemoryStore::<Object>::new(IdGenerator::new());
        let base = now() - Duration::minutes(10);
        for i in 0..5 {
            store
                .put(
                    NS,
                    Object {
                        created_at: base + Duration::seconds(i),
                        ..post(1)
                    },
                )
                .await
                .unwrap();
        }

        let page = store
            .query(
                NS,
                &ObjectQuery {
                    before: Some(base + Duration::seconds(4)),
                    limit: Some(2),
                    ..ObjectQuery::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].created_at, base + Duration::seconds(3));
        assert_eq!(page[1].created_at, base + Duration::seconds(2));

        let n = store
            .count(
                NS,
                &ObjectQuery {
                    after: Some(base + Duration::seconds(1)),
                    ..ObjectQuery::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(n, 3);
    }

    #[tokio::test]
    async fn test_reaction_toggle_reuses_row() {
        let store = MemoryStore::<Reaction>::new(IdGenerator::new());
        let r = store
            .put(
                NS,
                Reaction {
                    object_id: 1,
                    owner_id: 2,
                    kind: ReactionType::Love,
                    ..Reaction::default()
                },
            )
            .await
            .unwrap();
        let off = store
            .put(
                NS,
                Reaction {
                    deleted: true,
                    ..r.clone()
                },
            )
            .await
            .unwrap();
        let on = store
            .put(
                NS,
                Reaction {
                    deleted: false,
                    ..off
                },
            )
            .await
            .unwrap();
        assert_eq!(on.id, r.id);
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let store = MemoryStore::<Object>::new(IdGenerator::new());
        store.put(NS, post(1)).await.unwrap();
        assert_eq!(
            store.count("app_1_2", &ObjectQuery::default()).await.unwrap(),
            0
        );
        store.teardown(NS).await.unwrap();
        assert_eq!(store.count(NS, &ObjectQuery::default()).await.unwrap(), 0);
    }
}
