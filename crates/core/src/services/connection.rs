//! Connection operations: follow and friend edges.

use std::collections::HashMap;

use fanout_common::{AppError, AppResult};
use fanout_db::{
    Service, ServiceExt,
    entities::{App, Connection, ConnectionQuery, ConnectionState, ConnectionType, User, UserQuery},
};

use super::{Core, limit_of};

/// A page of edges with the users on the other end.
#[derive(Debug, Clone, Default)]
pub struct ConnectionFeed {
    /// Edges, newest first.
    pub connections: Vec<Connection>,
    /// Peers in edge order, for follower and friend listings.
    pub users: Vec<User>,
    /// Peers by id, for state listings.
    pub user_map: HashMap<u64, User>,
}

/// Fails with `InvalidEntity` unless `old` may become `new`.
fn validate_transition(old: &Connection, new: &Connection) -> AppResult<()> {
    if old.from_id != new.from_id {
        return Err(AppError::InvalidEntity(format!(
            "from id mismatch {} != {}",
            old.from_id, new.from_id
        )));
    }
    if old.to_id != new.to_id {
        return Err(AppError::InvalidEntity(format!(
            "to id mismatch {} != {}",
            old.to_id, new.to_id
        )));
    }
    if old.kind != new.kind {
        return Err(AppError::InvalidEntity(format!(
            "type mismatch {} != {}",
            old.kind.as_str(),
            new.kind.as_str()
        )));
    }
    if old.state == new.state || old.state.can_transition(new.state) {
        return Ok(());
    }
    Err(AppError::InvalidEntity(format!(
        "invalid state transition from {:?} to {:?}",
        old.state, new.state
    )))
}

/// Both endpoints for friend edges, which are matched in either direction.
fn endpoints(edge: &Connection) -> (Vec<u64>, Vec<u64>) {
    match edge.kind {
        ConnectionType::Friend => (
            vec![edge.from_id, edge.to_id],
            vec![edge.from_id, edge.to_id],
        ),
        ConnectionType::Follow => (vec![edge.from_id], vec![edge.to_id]),
    }
}

fn sort_edges(edges: &mut [Connection]) {
    edges.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}

impl Core {
    /// Edges of `origin` in either direction with the given state.
    pub async fn connection_by_state(
        &self,
        app: &App,
        origin: u64,
        state: &str,
        opts: &ConnectionQuery,
    ) -> AppResult<ConnectionFeed> {
        let state: ConnectionState = state.parse().map_err(AppError::InvalidEntity)?;
        let ns = app.namespace();
        let query = |from: Vec<u64>, to: Vec<u64>| ConnectionQuery {
            before: opts.before,
            enabled: Some(true),
            from_ids: from,
            limit: opts.limit,
            states: vec![state],
            to_ids: to,
            ..ConnectionQuery::default()
        };

        let mut edges = self
            .stores()
            .connections
            .query(&ns, &query(vec![origin], Vec::new()))
            .await?;
        edges.extend(
            self.stores()
                .connections
                .query(&ns, &query(Vec::new(), vec![origin]))
                .await?,
        );
        sort_edges(&mut edges);
        edges.truncate(limit_of(opts.limit));

        let peers: Vec<u64> = edges.iter().map(|c| c.peer_of(origin)).collect();
        let mut user_map = self.users_map(app, &peers).await?;
        for u in user_map.values_mut() {
            self.enrich_relation(app, origin, u).await?;
        }

        Ok(ConnectionFeed {
            connections: edges,
            users: Vec::new(),
            user_map,
        })
    }

    /// Connect `origin` to every enabled user matching `opts`.
    pub async fn connection_create_social(
        &self,
        app: &App,
        origin: u64,
        kind: ConnectionType,
        state: ConnectionState,
        opts: UserQuery,
    ) -> AppResult<Vec<User>> {
        let ns = app.namespace();
        let opts = UserQuery {
            enabled: Some(true),
            ..opts
        };
        let mut users = self.stores().users.query(&ns, &opts).await?;

        for u in &mut users {
            if u.id == origin {
                continue;
            }
            self.stores()
                .connections
                .put(
                    &ns,
                    Connection {
                        enabled: true,
                        from_id: origin,
                        to_id: u.id,
                        state,
                        kind,
                        ..Connection::default()
                    },
                )
                .await?;
            self.query_relation(app, origin, u.id).await?.apply(u);
        }

        users.retain(|u| u.id != origin);
        Ok(users)
    }

    /// Disable the edge matching `edge`. Missing edges are ignored.
    pub async fn connection_delete(&self, app: &App, edge: &Connection) -> AppResult<()> {
        let ns = app.namespace();
        let (from_ids, to_ids) = endpoints(edge);
        let existing = self
            .stores()
            .connections
            .one(
                &ns,
                &ConnectionQuery {
                    enabled: Some(true),
                    from_ids,
                    limit: Some(1),
                    to_ids,
                    types: vec![edge.kind],
                    ..ConnectionQuery::default()
                },
            )
            .await?;

        if let Some(mut existing) = existing {
            existing.enabled = false;
            self.stores().connections.put(&ns, existing).await?;
        }
        Ok(())
    }

    /// Ids of users following `origin`.
    pub async fn connection_follower_ids(&self, app: &App, origin: u64) -> AppResult<Vec<u64>> {
        Ok(self
            .stores()
            .connections
            .query(
                &app.namespace(),
                &ConnectionQuery {
                    enabled: Some(true),
                    states: vec![ConnectionState::Confirmed],
                    to_ids: vec![origin],
                    types: vec![ConnectionType::Follow],
                    ..ConnectionQuery::default()
                },
            )
            .await?
            .iter()
            .map(|c| c.from_id)
            .collect())
    }

    /// Ids of friends of `origin`, whichever side created the edge.
    pub async fn connection_friend_ids(&self, app: &App, origin: u64) -> AppResult<Vec<u64>> {
        let edges = self
            .friend_edges(app, origin, &ConnectionQuery::default())
            .await?;
        Ok(edges.iter().map(|c| c.peer_of(origin)).collect())
    }

    async fn friend_edges(
        &self,
        app: &App,
        user_id: u64,
        opts: &ConnectionQuery,
    ) -> AppResult<Vec<Connection>> {
        let ns = app.namespace();
        let query = |from: Vec<u64>, to: Vec<u64>| ConnectionQuery {
            before: opts.before,
            enabled: Some(true),
            from_ids: from,
            limit: opts.limit,
            states: vec![ConnectionState::Confirmed],
            to_ids: to,
            types: vec![ConnectionType::Friend],
            ..ConnectionQuery::default()
        };

        let mut edges = self
            .stores()
            .connections
            .query(&ns, &query(vec![user_id], Vec::new()))
            .await?;
        edges.extend(
            self.stores()
                .connections
                .query(&ns, &query(Vec::new(), vec![user_id]))
                .await?,
        );
        Ok(edges)
    }

    /// Users following `user_id`, as seen by `origin`.
    pub async fn connection_followers(
        &self,
        app: &App,
        origin: u64,
        user_id: u64,
        opts: &ConnectionQuery,
    ) -> AppResult<ConnectionFeed> {
        let edges = self
            .follow_edges(app, None, Some(user_id), opts)
            .await?;
        let ids: Vec<u64> = edges.iter().map(|c| c.from_id).collect();
        self.connection_feed(app, origin, edges, &ids).await
    }

    /// Users `user_id` follows, as seen by `origin`.
    pub async fn connection_followings(
        &self,
        app: &App,
        origin: u64,
        user_id: u64,
        opts: &ConnectionQuery,
    ) -> AppResult<ConnectionFeed> {
        let edges = self
            .follow_edges(app, Some(user_id), None, opts)
            .await?;
        let ids: Vec<u64> = edges.iter().map(|c| c.to_id).collect();
        self.connection_feed(app, origin, edges, &ids).await
    }

    /// Friends of `user_id`, as seen by `origin`.
    pub async fn connection_friends(
        &self,
        app: &App,
        origin: u64,
        user_id: u64,
        opts: &ConnectionQuery,
    ) -> AppResult<ConnectionFeed> {
        let mut edges = self.friend_edges(app, user_id, opts).await?;
        sort_edges(&mut edges);
        edges.truncate(limit_of(opts.limit));

        let ids: Vec<u64> = edges.iter().map(|c| c.peer_of(user_id)).collect();
        self.connection_feed(app, origin, edges, &ids).await
    }

    async fn follow_edges(
        &self,
        app: &App,
        from: Option<u64>,
        to: Option<u64>,
        opts: &ConnectionQuery,
    ) -> AppResult<Vec<Connection>> {
        self.stores()
            .connections
            .query(
                &app.namespace(),
                &ConnectionQuery {
                    before: opts.before,
                    enabled: Some(true),
                    from_ids: from.into_iter().collect(),
                    limit: opts.limit,
                    states: vec![ConnectionState::Confirmed],
                    to_ids: to.into_iter().collect(),
                    types: vec![ConnectionType::Follow],
                    ..ConnectionQuery::default()
                },
            )
            .await
    }

    async fn connection_feed(
        &self,
        app: &App,
        origin: u64,
        connections: Vec<Connection>,
        ids: &[u64],
    ) -> AppResult<ConnectionFeed> {
        let mut by_id = self.users_map(app, ids).await?;
        let mut users = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(mut u) = by_id.remove(id) else {
                continue;
            };
            self.enrich_connection_counts(app, &mut u).await?;
            self.enrich_relation(app, origin, &mut u).await?;
            users.push(u);
        }

        Ok(ConnectionFeed {
            connections,
            users,
            user_map: HashMap::new(),
        })
    }

    /// Create or move an edge.
    ///
    /// Friend edges are found in either direction and keep their stored
    /// orientation. An unchanged state returns the stored edge as is.
    pub async fn connection_update(&self, app: &App, mut new: Connection) -> AppResult<Connection> {
        let ns = app.namespace();
        self.user_fetch(app, new.to_id).await?;

        let (from_ids, to_ids) = endpoints(&new);
        let old = self
            .stores()
            .connections
            .one(
                &ns,
                &ConnectionQuery {
                    enabled: Some(true),
                    from_ids,
                    limit: Some(1),
                    to_ids,
                    types: vec![new.kind],
                    ..ConnectionQuery::default()
                },
            )
            .await?;

        if let Some(old) = &old {
            if old.state == new.state {
                return Ok(old.clone());
            }
            new.from_id = old.from_id;
            new.to_id = old.to_id;
        }
        new.enabled = true;
        if let Some(old) = &old {
            validate_transition(old, &new)?;
        }

        self.stores().connections.put(&ns, new).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::services::testing::{app, connect, core, user};

    fn edge(from: u64, to: u64, kind: ConnectionType, state: ConnectionState) -> Connection {
        Connection {
            from_id: from,
            to_id: to,
            kind,
            state,
            ..Connection::default()
        }
    }

    #[tokio::test]
    async fn test_friend_request_confirmed_from_other_side() {
        let core = core();
        let app = app();
        let a = user(&core, &app, "alice").await;
        let b = user(&core, &app, "bob").await;

        core.connection_update(&app, edge(a.id, b.id, ConnectionType::Friend, ConnectionState::Pending))
            .await
            .unwrap();
        let confirmed = core
            .connection_update(&app, edge(b.id, a.id, ConnectionType::Friend, ConnectionState::Confirmed))
            .await
            .unwrap();
        assert_eq!(confirmed.from_id, a.id);
        assert_eq!(confirmed.to_id, b.id);
        assert_eq!(confirmed.state, ConnectionState::Confirmed);

        let of_a = core
            .connection_friends(&app, a.id, a.id, &ConnectionQuery::default())
            .await
            .unwrap();
        assert_eq!(of_a.users.len(), 1);
        assert_eq!(of_a.users[0].id, b.id);

        let of_b = core
            .connection_friends(&app, b.id, b.id, &ConnectionQuery::default())
            .await
            .unwrap();
        assert_eq!(of_b.users.len(), 1);
        assert_eq!(of_b.users[0].id, a.id);
    }

    #[tokio::test]
    async fn test_invalid_transition() {
        let core = core();
        let app = app();
        let a = user(&core, &app, "alice").await;
        let b = user(&core, &app, "bob").await;

        core.connection_update(&app, edge(a.id, b.id, ConnectionType::Follow, ConnectionState::Rejected))
            .await
            .unwrap();
        let err = core
            .connection_update(&app, edge(a.id, b.id, ConnectionType::Follow, ConnectionState::Confirmed))
            .await;
        assert!(matches!(err, Err(AppError::InvalidEntity(_))));
    }

    #[tokio::test]
    async fn test_update_unchanged_returns_stored() {
        let core = core();
        let app = app();
        let a = user(&core, &app, "alice").await;
        let b = user(&core, &app, "bob").await;
        let stored = connect(&core, &app, a.id, b.id, ConnectionType::Follow).await;

        let again = core
            .connection_update(&app, edge(a.id, b.id, ConnectionType::Follow, ConnectionState::Confirmed))
            .await
            .unwrap();
        assert_eq!(again.updated_at, stored.updated_at);
    }

    #[tokio::test]
    async fn test_update_requires_target() {
        let core = core();
        let app = app();
        let a = user(&core, &app, "alice").await;
        let err = core
            .connection_update(&app, edge(a.id, 999, ConnectionType::Follow, ConnectionState::Pending))
            .await;
        assert!(matches!(err, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_friend_either_side() {
        let core = core();
        let app = app();
        let a = user(&core, &app, "alice").await;
        let b = user(&core, &app, "bob").await;
        connect(&core, &app, a.id, b.id, ConnectionType::Friend).await;

        core.connection_delete(&app, &edge(b.id, a.id, ConnectionType::Friend, ConnectionState::Confirmed))
            .await
            .unwrap();
        assert!(core.connection_friend_ids(&app, a.id).await.unwrap().is_empty());

        core.connection_delete(&app, &edge(b.id, a.id, ConnectionType::Friend, ConnectionState::Confirmed))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_by_state() {
        let core = core();
        let app = app();
        let a = user(&core, &app, "alice").await;
        let b = user(&core, &app, "bob").await;
        let c = user(&core, &app, "carol").await;
        core.connection_update(&app, edge(a.id, b.id, ConnectionType::Follow, ConnectionState::Pending))
            .await
            .unwrap();
        core.connection_update(&app, edge(c.id, a.id, ConnectionType::Friend, ConnectionState::Pending))
            .await
            .unwrap();

        let feed = core
            .connection_by_state(&app, a.id, "pending", &ConnectionQuery::default())
            .await
            .unwrap();
        assert_eq!(feed.connections.len(), 2);
        assert!(feed.user_map.contains_key(&b.id));
        assert!(feed.user_map.contains_key(&c.id));

        let err = core
            .connection_by_state(&app, a.id, "bogus", &ConnectionQuery::default())
            .await;
        assert!(matches!(err, Err(AppError::InvalidEntity(_))));
    }

    #[tokio::test]
    async fn test_followers_and_followings() {
        let core = core();
        let app = app();
        let a = user(&core, &app, "alice").await;
        let b = user(&core, &app, "bob").await;
        connect(&core, &app, b.id, a.id, ConnectionType::Follow).await;

        let followers = core
            .connection_followers(&app, a.id, a.id, &ConnectionQuery::default())
            .await
            .unwrap();
        assert_eq!(followers.users.len(), 1);
        assert!(followers.users[0].is_follower);
        assert_eq!(followers.users[0].following_count, 1);

        let followings = core
            .connection_followings(&app, a.id, b.id, &ConnectionQuery::default())
            .await
            .unwrap();
        assert_eq!(followings.users[0].id, a.id);
        assert_eq!(core.connection_follower_ids(&app, a.id).await.unwrap(), vec![b.id]);
    }

    #[tokio::test]
    async fn test_friends_truncate_to_limit() {
        let core = core();
        let app = app();
        let a = user(&core, &app, "alice").await;
        for name in ["b1", "b2", "b3"] {
            let b = user(&core, &app, name).await;
            connect(&core, &app, a.id, b.id, ConnectionType::Friend).await;
        }

        let opts = ConnectionQuery {
            limit: Some(2),
            ..ConnectionQuery::default()
        };
        let feed = core.connection_friends(&app, a.id, a.id, &opts).await.unwrap();
        assert_eq!(feed.connections.len(), 2);
        assert_eq!(feed.users.len(), 2);
    }

    #[tokio::test]
    async fn test_create_social() {
        let core = core();
        let app = app();
        let a = user(&core, &app, "alice").await;
        let mut b = user(&core, &app, "bob").await;
        b.social_ids.insert("facebook".to_string(), "fb-b".to_string());
        core.stores().users.put(&app.namespace(), b.clone()).await.unwrap();

        let opts = UserQuery {
            social_ids: HashMap::from([("facebook".to_string(), vec!["fb-b".to_string()])]),
            ..UserQuery::default()
        };
        let users = core
            .connection_create_social(&app, a.id, ConnectionType::Follow, ConnectionState::Confirmed, opts)
            .await
            .unwrap();
        assert_eq!(users.len(), 1);
        assert!(users[0].is_following);
    }
}
