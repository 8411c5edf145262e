//! Feed composition.
//!
//! A feed is assembled from lazy event [`Source`]s that are collected in
//! order, filtered by [`Condition`]s, sorted newest first and truncated. The
//! social graph around the viewer is captured as [`Affiliations`]: confirmed
//! edges paired with the peer user on the other end.

use std::collections::{HashMap, HashSet};

use fanout_common::AppResult;
use fanout_db::{
    Service, ServiceExt,
    entities::{
        App, Connection, ConnectionQuery, ConnectionState, ConnectionType, Entity, Event,
        EventQuery, Object, ObjectQuery, ReactionQuery, Target, User, UserQuery, Visibility,
        event::{TARGET_USER, TYPE_FOLLOW, TYPE_FRIEND, TYPE_LIKE, TYPE_REACTION_PREFIX},
        object::{TYPE_COMMENT, TYPE_POST},
    },
};
use futures::{FutureExt, future::BoxFuture};

use super::{
    Core, limit_of,
    post::{Post, owner_ids, post_ids, sort_posts},
};

/// Lazy producer of feed events.
pub type Source<'a> = BoxFuture<'a, AppResult<Vec<Event>>>;

/// Reports `true` for events to drop.
pub(crate) type Condition<'a> = Box<dyn FnMut(&Event) -> bool + Send + 'a>;

/// A confirmed edge and the user on its far end.
#[derive(Debug, Clone)]
pub struct Affiliation {
    /// Confirmed edge between origin and peer.
    pub connection: Connection,
    /// The peer on the other end of the edge.
    pub user: User,
}

/// Edges around one user.
#[derive(Debug, Clone, Default)]
pub struct Affiliations(Vec<Affiliation>);

impl FromIterator<Affiliation> for Affiliations {
    fn from_iter<I: IntoIterator<Item = Affiliation>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Affiliations {
    /// Affiliations in edge order.
    pub fn iter(&self) -> impl Iterator<Item = &Affiliation> {
        self.0.iter()
    }

    /// Number of affiliations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no affiliations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn edges(&self, keep: impl Fn(&Connection) -> bool) -> Vec<Connection> {
        self.0
            .iter()
            .map(|a| &a.connection)
            .filter(|c| keep(c))
            .cloned()
            .collect()
    }

    fn retain(&self, keep: impl Fn(&Connection) -> bool) -> Self {
        self.0.iter().filter(|a| keep(&a.connection)).cloned().collect()
    }

    /// All edges.
    #[must_use]
    pub fn connections(&self) -> Vec<Connection> {
        self.edges(|_| true)
    }

    /// Follow edges where the peer follows `origin`.
    #[must_use]
    pub fn followers(&self, origin: u64) -> Vec<Connection> {
        self.edges(|c| c.kind == ConnectionType::Follow && c.from_id != origin)
    }

    /// Follow edges where `origin` follows the peer.
    #[must_use]
    pub fn followings(&self, origin: u64) -> Vec<Connection> {
        self.edges(|c| c.kind == ConnectionType::Follow && c.to_id != origin)
    }

    /// Friend edges incident to `origin`.
    #[must_use]
    pub fn friends(&self, origin: u64) -> Vec<Connection> {
        self.edges(|c| c.kind == ConnectionType::Friend && c.touches(origin))
    }

    /// Without the edges of users following `origin`.
    #[must_use]
    pub fn filter_followers(&self, origin: u64) -> Self {
        self.retain(|c| !(c.kind == ConnectionType::Follow && c.to_id == origin))
    }

    /// Without the edges of users `origin` follows.
    #[must_use]
    pub fn filter_followings(&self, origin: u64) -> Self {
        self.retain(|c| !(c.kind == ConnectionType::Follow && c.from_id == origin))
    }

    /// Without friend edges.
    #[must_use]
    pub fn filter_friends(&self) -> Self {
        self.retain(|c| c.kind != ConnectionType::Friend)
    }

    /// Unique peers in edge order.
    #[must_use]
    pub fn users(&self) -> Vec<User> {
        let mut seen = HashSet::new();
        self.0
            .iter()
            .filter(|a| seen.insert(a.user.id))
            .map(|a| a.user.clone())
            .collect()
    }

    /// Unique peer ids in edge order.
    #[must_use]
    pub fn user_ids(&self) -> Vec<u64> {
        let mut seen = HashSet::new();
        self.0
            .iter()
            .map(|a| a.user.id)
            .filter(|id| seen.insert(*id))
            .collect()
    }
}

/// A composed feed.
#[derive(Debug, Clone, Default)]
pub struct Feed {
    /// Events, newest first.
    pub events: Vec<Event>,
    /// Posts, newest first.
    pub posts: Vec<Post>,
    /// Posts referenced by the events.
    pub post_map: HashMap<u64, Post>,
    /// Users referenced by events and posts.
    pub user_map: HashMap<u64, User>,
}

/// Run the sources one after another. The first error aborts.
pub async fn collect(sources: Vec<Source<'_>>) -> AppResult<Vec<Event>> {
    let mut events = Vec::new();
    for source in sources {
        events.extend(source.await?);
    }
    Ok(events)
}

/// Drops events whose id was seen before. Id 0 is never a duplicate.
pub(crate) fn condition_duplicate<'a>() -> Condition<'a> {
    let mut seen = HashSet::new();
    Box::new(move |e: &Event| e.id != 0 && !seen.insert(e.id))
}

/// Drops events pointing at an object absent from `posts`.
pub(crate) fn condition_post_missing(posts: &HashMap<u64, Post>) -> Condition<'_> {
    Box::new(move |e: &Event| e.object_id != 0 && !posts.contains_key(&e.object_id))
}

pub(crate) fn filter(events: Vec<Event>, conditions: &mut [Condition<'_>]) -> Vec<Event> {
    events
        .into_iter()
        .filter(|e| !conditions.iter_mut().any(|c| c(e)))
        .collect()
}

pub(crate) fn sort_events(events: &mut [Event]) {
    events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

/// Posts referenced by the events, each once.
pub(crate) async fn extract_posts(core: &Core, app: &App, events: &[Event]) -> AppResult<Vec<Post>> {
    let ns = app.namespace();
    let mut seen = HashSet::new();
    let mut posts = Vec::new();

    for e in events {
        if e.object_id == 0 || !seen.insert(e.object_id) {
            continue;
        }
        let query = ObjectQuery {
            ids: vec![e.object_id],
            ..ObjectQuery::default()
        };
        if let Some(object) = core.stores().objects.one(&ns, &query).await? {
            if object.is_post() {
                posts.push(Post::from(object));
            }
        }
    }
    Ok(posts)
}

/// Synthesized events draw from the sequence of stored events so their ids
/// never collide with real ones.
fn event_id_key(ns: &str) -> String {
    format!("{ns}_{}", Event::TABLE)
}

fn windowed(opts: &EventQuery) -> EventQuery {
    EventQuery {
        after: opts.after,
        before: opts.before,
        limit: opts.limit,
        ..EventQuery::default()
    }
}

fn into_posts(objects: Vec<Object>) -> Vec<Post> {
    objects.into_iter().map(Post::from).collect()
}

fn into_post_map(posts: Vec<Post>) -> HashMap<u64, Post> {
    posts.into_iter().map(|p| (p.object.id, p)).collect()
}

fn into_user_map(users: Vec<User>) -> HashMap<u64, User> {
    users.into_iter().map(|u| (u.id, u)).collect()
}

fn dedup_posts(posts: &mut Vec<Post>) {
    let mut seen = HashSet::new();
    posts.retain(|p| seen.insert(p.object.id));
}

impl Core {
    /// Confirmed edges around `origin`, skipping edges that touch `root`.
    ///
    /// With `root == 0` the followers of `origin` are included, windowed by
    /// `opts`.
    pub async fn neighbours(
        &self,
        app: &App,
        origin: u64,
        root: u64,
        opts: &EventQuery,
    ) -> AppResult<Affiliations> {
        let ns = app.namespace();
        let confirmed = |from: Vec<u64>, to: Vec<u64>, kind: ConnectionType| ConnectionQuery {
            enabled: Some(true),
            from_ids: from,
            states: vec![ConnectionState::Confirmed],
            to_ids: to,
            types: vec![kind],
            ..ConnectionQuery::default()
        };

        let connections = &self.stores().connections;
        let mut edges = connections
            .query(&ns, &confirmed(vec![origin], vec![], ConnectionType::Follow))
            .await?;
        edges.extend(
            connections
                .query(&ns, &confirmed(vec![origin], vec![], ConnectionType::Friend))
                .await?,
        );
        edges.extend(
            connections
                .query(&ns, &confirmed(vec![], vec![origin], ConnectionType::Friend))
                .await?,
        );
        if root == 0 {
            let followers = ConnectionQuery {
                after: opts.after,
                before: opts.before,
                limit: opts.limit,
                ..confirmed(vec![], vec![origin], ConnectionType::Follow)
            };
            edges.extend(connections.query(&ns, &followers).await?);
        }

        edges.retain(|c| !c.touches(root));
        if edges.is_empty() {
            return Ok(Affiliations::default());
        }

        let ids: Vec<u64> = edges.iter().map(|c| c.peer_of(origin)).collect();
        let users = into_user_map(
            self.stores()
                .users
                .query(
                    &ns,
                    &UserQuery {
                        enabled: Some(true),
                        ids,
                        ..UserQuery::default()
                    },
                )
                .await?,
        );

        Ok(edges
            .into_iter()
            .filter_map(|connection| {
                let user = users.get(&connection.peer_of(origin))?.clone();
                Some(Affiliation { connection, user })
            })
            .collect())
    }

    /// Follow and friend events synthesized from confirmed edges.
    pub fn source_connection<'a>(
        &'a self,
        app: &'a App,
        edges: Vec<Connection>,
        origin: u64,
        opts: &EventQuery,
    ) -> Source<'a> {
        let (after, before) = (opts.after, opts.before);
        async move {
            let key = event_id_key(&app.namespace());
            let mut events = Vec::with_capacity(edges.len());

            for con in edges {
                if con.state != ConnectionState::Confirmed
                    || after.is_some_and(|a| con.updated_at < a)
                    || before.is_some_and(|b| con.updated_at > b)
                {
                    continue;
                }
                let kind = match con.kind {
                    ConnectionType::Follow => TYPE_FOLLOW,
                    ConnectionType::Friend => TYPE_FRIEND,
                };
                events.push(Event {
                    enabled: true,
                    id: self.ids().next(&key)?,
                    owned: true,
                    target: Some(Target::user(con.to_id)),
                    kind: kind.to_string(),
                    user_id: con.peer_of(origin),
                    visibility: Visibility::Private,
                    created_at: con.created_at,
                    updated_at: con.updated_at,
                    ..Event::default()
                });
            }

            sort_events(&mut events);
            Ok(events)
        }
        .boxed()
    }

    /// Enabled events with global visibility.
    pub fn source_global<'a>(&'a self, app: &'a App, opts: &EventQuery) -> Source<'a> {
        let query = EventQuery {
            enabled: Some(true),
            visibilities: vec![Visibility::Global],
            ..windowed(opts)
        };
        async move { self.stores().events.query(&app.namespace(), &query).await }.boxed()
    }

    /// Connection and public events owned by `ids`.
    pub fn source_neighbours<'a>(
        &'a self,
        app: &'a App,
        opts: &EventQuery,
        ids: Vec<u64>,
    ) -> Source<'a> {
        let query = EventQuery {
            enabled: Some(true),
            user_ids: ids,
            visibilities: vec![Visibility::Connection, Visibility::Public],
            ..windowed(opts)
        };
        async move {
            if query.user_ids.is_empty() {
                return Ok(Vec::new());
            }
            self.stores().events.query(&app.namespace(), &query).await
        }
        .boxed()
    }

    /// Private events targeting `origin`.
    pub fn source_target<'a>(&'a self, app: &'a App, origin: u64, opts: &EventQuery) -> Source<'a> {
        let query = EventQuery {
            enabled: Some(true),
            target_ids: vec![origin.to_string()],
            target_types: vec![TARGET_USER.to_string()],
            visibilities: vec![Visibility::Private],
            ..windowed(opts)
        };
        async move { self.stores().events.query(&app.namespace(), &query).await }.boxed()
    }

    /// Private events for comments by others on `post_ids`.
    pub fn source_comment<'a>(
        &'a self,
        app: &'a App,
        origin: u64,
        post_ids: Vec<u64>,
        opts: &EventQuery,
    ) -> Source<'a> {
        let query = ObjectQuery {
            after: opts.after,
            before: opts.before,
            object_ids: post_ids,
            owned: Some(true),
            types: vec![TYPE_COMMENT.to_string()],
            ..ObjectQuery::default()
        };
        async move {
            if query.object_ids.is_empty() {
                return Ok(Vec::new());
            }
            let ns = app.namespace();
            let key = event_id_key(&ns);
            let comments = self.stores().objects.query(&ns, &query).await?;

            let mut events = Vec::with_capacity(comments.len());
            for c in comments.into_iter().filter(|c| c.owner_id != origin) {
                events.push(Event {
                    enabled: true,
                    id: self.ids().next(&key)?,
                    object_id: c.object_id,
                    owned: true,
                    kind: TYPE_COMMENT.to_string(),
                    user_id: c.owner_id,
                    visibility: Visibility::Private,
                    created_at: c.created_at,
                    updated_at: c.updated_at,
                    ..Event::default()
                });
            }
            Ok(events)
        }
        .boxed()
    }

    /// Likes by others on `post_ids`.
    pub fn source_likes<'a>(
        &'a self,
        app: &'a App,
        opts: &EventQuery,
        origin: u64,
        post_ids: Vec<u64>,
    ) -> Source<'a> {
        let query = EventQuery {
            enabled: Some(true),
            object_ids: post_ids,
            owned: Some(true),
            types: vec![TYPE_LIKE.to_string()],
            ..windowed(opts)
        };
        async move {
            if query.object_ids.is_empty() {
                return Ok(Vec::new());
            }
            let likes = self.stores().events.query(&app.namespace(), &query).await?;
            Ok(likes.into_iter().filter(|e| e.user_id != origin).collect())
        }
        .boxed()
    }

    /// Private `tg_reaction:<type>` events for live reactions by others on
    /// `post_ids`. Event ids are minted per read, never the reaction id.
    pub fn source_reactions<'a>(
        &'a self,
        app: &'a App,
        opts: &EventQuery,
        origin: u64,
        post_ids: Vec<u64>,
    ) -> Source<'a> {
        let query = ReactionQuery {
            before: opts.before,
            deleted: Some(false),
            limit: opts.limit,
            object_ids: post_ids,
            ..ReactionQuery::default()
        };
        async move {
            if query.object_ids.is_empty() {
                return Ok(Vec::new());
            }
            let ns = app.namespace();
            let key = event_id_key(&ns);
            let reactions = self.stores().reactions.query(&ns, &query).await?;

            let mut events = Vec::with_capacity(reactions.len());
            for r in reactions.into_iter().filter(|r| r.owner_id != origin) {
                events.push(Event {
                    enabled: true,
                    id: self.ids().next(&key)?,
                    object_id: r.object_id,
                    owned: true,
                    kind: format!("{TYPE_REACTION_PREFIX}{}", r.kind.as_str()),
                    user_id: r.owner_id,
                    visibility: Visibility::Private,
                    created_at: r.created_at,
                    updated_at: r.updated_at,
                    ..Event::default()
                });
            }
            Ok(events)
        }
        .boxed()
    }

    /// Events from the social and interest graph of `origin`.
    pub async fn feed_events(&self, app: &App, origin: u64, opts: &EventQuery) -> AppResult<Feed> {
        let (mut feed, _) = self.graph_events(app, origin, opts).await?;
        self.enrich_relations(app, origin, &mut feed.user_map).await?;
        Ok(feed)
    }

    /// Events plus posts from the social and interest graph of `origin`.
    pub async fn feed_news(
        &self,
        app: &App,
        origin: u64,
        event_opts: &EventQuery,
        post_opts: &ObjectQuery,
    ) -> AppResult<Feed> {
        let (mut feed, graph) = self.graph_events(app, origin, event_opts).await?;

        let mut posts = self.connection_posts(app, post_opts, graph.user_ids()).await?;
        let global = self.global_posts(app, post_opts).await?;
        self.fill_users(app, &mut feed.user_map, owner_ids(&global)).await?;
        posts.extend(global);

        sort_posts(&mut posts);
        posts.truncate(limit_of(post_opts.limit));
        self.enrich_posts(app, origin, &mut posts).await?;
        self.fill_users(app, &mut feed.user_map, owner_ids(&posts)).await?;

        self.enrich_relations(app, origin, &mut feed.user_map).await?;
        feed.posts = posts;
        Ok(feed)
    }

    /// Activity on the content and profile of `origin`.
    pub async fn feed_notifications_self(
        &self,
        app: &App,
        origin: u64,
        opts: &EventQuery,
    ) -> AppResult<Feed> {
        let am = self.neighbours(app, origin, 0, opts).await?;
        let mut posts = self.user_posts(app, origin).await?;
        let ids = post_ids(&posts);
        let others = am.filter_followings(origin);

        let sources = vec![
            self.source_comment(app, origin, ids.clone(), opts),
            self.source_connection(app, others.connections(), origin, opts),
            self.source_likes(app, opts, origin, ids.clone()),
            self.source_reactions(app, opts, origin, ids),
            self.source_target(app, origin, opts),
        ];
        let events = collect(sources).await?;
        let mut events = filter(events, &mut [condition_duplicate()]);
        sort_events(&mut events);
        events.truncate(limit_of(opts.limit));

        let mut user_map = into_user_map(others.users());
        self.fill_users(app, &mut user_map, events.iter().map(|e| e.user_id).collect())
            .await?;
        self.fill_users(app, &mut user_map, owner_ids(&posts)).await?;

        self.enrich_counts(app, &mut posts).await?;
        self.enrich_relations(app, origin, &mut user_map).await?;

        Ok(Feed {
            events,
            post_map: into_post_map(posts),
            user_map,
            ..Feed::default()
        })
    }

    /// Posts of peers, global posts and the viewer's own posts.
    pub async fn feed_posts(&self, app: &App, origin: u64, opts: &ObjectQuery) -> AppResult<Feed> {
        let am = self
            .neighbours(
                app,
                origin,
                0,
                &EventQuery {
                    before: opts.before,
                    limit: opts.limit,
                    ..EventQuery::default()
                },
            )
            .await?;
        let peers = am.filter_followers(origin);

        let mut posts = self.connection_posts(app, opts, peers.user_ids()).await?;
        posts.extend(self.global_posts(app, opts).await?);
        posts.extend(self.own_posts(app, origin, opts).await?);

        sort_posts(&mut posts);
        dedup_posts(&mut posts);
        posts.truncate(limit_of(opts.limit));
        self.enrich_posts(app, origin, &mut posts).await?;

        let mut user_map = into_user_map(am.users());
        self.fill_users(app, &mut user_map, owner_ids(&posts)).await?;
        for id in peers.user_ids() {
            if let Some(u) = user_map.get_mut(&id) {
                u.is_friend = true;
            }
        }

        Ok(Feed {
            posts,
            user_map,
            ..Feed::default()
        })
    }

    /// Shared part of the events and news feeds. Also returns the graph the
    /// events were drawn from.
    async fn graph_events(
        &self,
        app: &App,
        origin: u64,
        opts: &EventQuery,
    ) -> AppResult<(Feed, Affiliations)> {
        let am = self.neighbours(app, origin, 0, opts).await?;
        let graph = am.filter_followers(origin);

        let mut direct = am.followers(origin);
        direct.extend(am.friends(origin));
        let mut sources = vec![
            self.source_connection(app, direct, origin, opts),
            self.source_global(app, opts),
            self.source_neighbours(app, opts, graph.user_ids()),
            self.source_target(app, origin, opts),
        ];

        let mut users = am.users();
        for a in graph.iter() {
            let peer = a.user.id;
            let around = self.neighbours(app, peer, origin, opts).await?;
            let mut edges = around.followings(peer);
            edges.extend(around.friends(peer));
            sources.push(self.source_connection(app, edges, origin, opts));
            users.extend(around.users());
        }

        let events = collect(sources).await?;
        let mut posts = extract_posts(self, app, &events).await?;
        self.enrich_posts(app, origin, &mut posts).await?;
        let post_map = into_post_map(posts);

        let mut events = filter(
            events,
            &mut [condition_duplicate(), condition_post_missing(&post_map)],
        );
        sort_events(&mut events);
        events.truncate(limit_of(opts.limit));

        let mut user_map = into_user_map(users);
        self.fill_users(app, &mut user_map, events.iter().map(|e| e.user_id).collect())
            .await?;
        self.fill_users(
            app,
            &mut user_map,
            post_map.values().map(|p| p.object.owner_id).collect(),
        )
        .await?;

        Ok((
            Feed {
                events,
                post_map,
                user_map,
                ..Feed::default()
            },
            graph,
        ))
    }

    async fn connection_posts(
        &self,
        app: &App,
        opts: &ObjectQuery,
        owners: Vec<u64>,
    ) -> AppResult<Vec<Post>> {
        if owners.is_empty() {
            return Ok(Vec::new());
        }
        let query = ObjectQuery {
            owner_ids: owners,
            owned: Some(true),
            types: vec![TYPE_POST.to_string()],
            visibilities: vec![Visibility::Connection, Visibility::Public],
            ..opts.clone()
        };
        Ok(into_posts(self.stores().objects.query(&app.namespace(), &query).await?))
    }

    async fn global_posts(&self, app: &App, opts: &ObjectQuery) -> AppResult<Vec<Post>> {
        let query = ObjectQuery {
            owned: Some(true),
            types: vec![TYPE_POST.to_string()],
            visibilities: vec![Visibility::Global],
            ..opts.clone()
        };
        Ok(into_posts(self.stores().objects.query(&app.namespace(), &query).await?))
    }

    async fn own_posts(&self, app: &App, origin: u64, opts: &ObjectQuery) -> AppResult<Vec<Post>> {
        let query = ObjectQuery {
            owner_ids: vec![origin],
            owned: Some(true),
            types: vec![TYPE_POST.to_string()],
            visibilities: vec![
                Visibility::Private,
                Visibility::Connection,
                Visibility::Public,
                Visibility::Global,
            ],
            ..opts.clone()
        };
        Ok(into_posts(self.stores().objects.query(&app.namespace(), &query).await?))
    }

    /// Every live post of `origin`, unwindowed.
    async fn user_posts(&self, app: &App, origin: u64) -> AppResult<Vec<Post>> {
        let query = ObjectQuery {
            owner_ids: vec![origin],
            owned: Some(true),
            types: vec![TYPE_POST.to_string()],
            ..ObjectQuery::default()
        };
        Ok(into_posts(self.stores().objects.query(&app.namespace(), &query).await?))
    }

    /// Add the enabled users among `ids` that `users` lacks.
    pub(crate) async fn fill_users(
        &self,
        app: &App,
        users: &mut HashMap<u64, User>,
        ids: Vec<u64>,
    ) -> AppResult<()> {
        let mut missing: Vec<u64> = ids.into_iter().filter(|id| !users.contains_key(id)).collect();
        missing.sort_unstable();
        missing.dedup();
        users.extend(self.users_map(app, &missing).await?);
        Ok(())
    }

    pub(crate) async fn enrich_relations(
        &self,
        app: &App,
        origin: u64,
        users: &mut HashMap<u64, User>,
    ) -> AppResult<()> {
        for u in users.values_mut() {
            self.enrich_relation(app, origin, u).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::origin::Origin;
    use crate::services::testing::{app, connect, core, post_input, user};
    use fanout_db::entities::ReactionType;

    fn edge(from: u64, to: u64, kind: ConnectionType) -> Affiliation {
        Affiliation {
            connection: Connection {
                enabled: true,
                from_id: from,
                to_id: to,
                kind,
                state: ConnectionState::Confirmed,
                ..Connection::default()
            },
            user: User {
                id: if from == 1 { to } else { from },
                ..User::default()
            },
        }
    }

    fn sample() -> Affiliations {
        [
            edge(1, 2, ConnectionType::Follow),
            edge(3, 1, ConnectionType::Follow),
            edge(1, 4, ConnectionType::Friend),
            edge(5, 1, ConnectionType::Friend),
            edge(1, 2, ConnectionType::Friend),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_affiliation_helpers() {
        let a = sample();
        assert_eq!(a.followers(1).len(), 1);
        assert_eq!(a.followers(1)[0].from_id, 3);
        assert_eq!(a.followings(1).len(), 1);
        assert_eq!(a.followings(1)[0].to_id, 2);
        assert_eq!(a.friends(1).len(), 3);

        assert_eq!(a.filter_followers(1).len(), 4);
        assert_eq!(a.filter_followings(1).len(), 4);
        assert_eq!(a.filter_friends().len(), 2);

        assert_eq!(a.user_ids(), vec![2, 3, 4, 5]);
        assert_eq!(a.users().len(), 4);
    }

    #[test]
    fn test_conditions() {
        let events = vec![
            Event { id: 1, ..Event::default() },
            Event { id: 1, ..Event::default() },
            Event { id: 0, ..Event::default() },
            Event { id: 0, ..Event::default() },
            Event { id: 2, object_id: 9, ..Event::default() },
            Event { id: 3, object_id: 8, ..Event::default() },
        ];
        let posts = HashMap::from([(8, Post::default())]);
        let kept = filter(
            events,
            &mut [condition_duplicate(), condition_post_missing(&posts)],
        );
        let ids: Vec<u64> = kept.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 0, 0, 3]);
    }

    #[tokio::test]
    async fn test_collect_aborts_on_error() {
        let ok: Source<'_> = async { Ok(vec![Event::default()]) }.boxed();
        let failing: Source<'_> =
            async { Err(fanout_common::AppError::Internal("boom".to_string())) }.boxed();
        assert_eq!(collect(vec![ok]).await.unwrap().len(), 1);

        let ok: Source<'_> = async { Ok(vec![Event::default()]) }.boxed();
        assert!(collect(vec![ok, failing]).await.is_err());
    }

    #[tokio::test]
    async fn test_neighbours_excludes_root() {
        let core = core();
        let app = app();
        let a = user(&core, &app, "alice").await;
        let b = user(&core, &app, "bob").await;
        let c = user(&core, &app, "carol").await;
        connect(&core, &app, a.id, b.id, ConnectionType::Follow).await;
        connect(&core, &app, c.id, a.id, ConnectionType::Follow).await;
        connect(&core, &app, b.id, c.id, ConnectionType::Friend).await;

        let around = core.neighbours(&app, a.id, 0, &EventQuery::default()).await.unwrap();
        assert_eq!(around.len(), 2);

        let around_b = core.neighbours(&app, b.id, a.id, &EventQuery::default()).await.unwrap();
        assert_eq!(around_b.user_ids(), vec![c.id]);
    }

    #[tokio::test]
    async fn test_events_feed() {
        let core = core();
        let app = app();
        let a = user(&core, &app, "alice").await;
        let b = user(&core, &app, "bob").await;
        let c = user(&core, &app, "carol").await;
        connect(&core, &app, a.id, b.id, ConnectionType::Follow).await;
        connect(&core, &app, b.id, c.id, ConnectionType::Follow).await;

        let post = core
            .post_create(&app, &Origin::application(c.id), post_input(Visibility::Public))
            .await
            .unwrap();
        core.like_create(&app, b.id, post.object.id).await.unwrap();

        let feed = core.feed_events(&app, a.id, &EventQuery::default()).await.unwrap();
        let kinds: Vec<&str> = feed.events.iter().map(|e| e.kind.as_str()).collect();
        assert!(kinds.contains(&TYPE_LIKE));
        assert!(kinds.contains(&TYPE_FOLLOW));
        assert!(feed.post_map.contains_key(&post.object.id));
        assert_eq!(feed.post_map[&post.object.id].counts.likes, 1);

        for e in &feed.events {
            assert!(feed.user_map.contains_key(&e.user_id));
        }
        assert!(feed.user_map.contains_key(&c.id));
        assert!(feed.user_map[&b.id].is_following);

        for pair in feed.events.windows(2) {
            assert!(pair[0].created_at >= pair[1].created_at);
        }
    }

    #[tokio::test]
    async fn test_events_feed_limit() {
        let core = core();
        let app = app();
        let a = user(&core, &app, "alice").await;
        for i in 0..5 {
            let follower = user(&core, &app, &format!("fan{i}")).await;
            connect(&core, &app, follower.id, a.id, ConnectionType::Follow).await;
        }

        let opts = EventQuery {
            limit: Some(3),
            ..EventQuery::default()
        };
        let feed = core.feed_events(&app, a.id, &opts).await.unwrap();
        assert_eq!(feed.events.len(), 3);
        let unique: HashSet<u64> = feed.events.iter().map(|e| e.id).collect();
        assert_eq!(unique.len(), 3);
    }

    #[tokio::test]
    async fn test_posts_feed() {
        let core = core();
        let app = app();
        let a = user(&core, &app, "alice").await;
        let b = user(&core, &app, "bob").await;
        let stranger = user(&core, &app, "stranger").await;
        connect(&core, &app, a.id, b.id, ConnectionType::Follow).await;

        core.post_create(&app, &Origin::application(b.id), post_input(Visibility::Connection))
            .await
            .unwrap();
        core.post_create(&app, &Origin::application(b.id), post_input(Visibility::Private))
            .await
            .unwrap();
        core.post_create(&app, &Origin::application(a.id), post_input(Visibility::Private))
            .await
            .unwrap();
        core.post_create(&app, &Origin::backend(stranger.id), post_input(Visibility::Global))
            .await
            .unwrap();
        core.post_create(&app, &Origin::application(stranger.id), post_input(Visibility::Public))
            .await
            .unwrap();

        let feed = core.feed_posts(&app, a.id, &ObjectQuery::default()).await.unwrap();
        assert_eq!(feed.posts.len(), 3);
        assert!(feed.user_map[&b.id].is_friend);
        assert!(feed.user_map.contains_key(&stranger.id));
        assert!(feed.user_map.contains_key(&a.id));
    }

    #[tokio::test]
    async fn test_news_feed() {
        let core = core();
        let app = app();
        let a = user(&core, &app, "alice").await;
        let b = user(&core, &app, "bob").await;
        connect(&core, &app, a.id, b.id, ConnectionType::Follow).await;
        core.post_create(&app, &Origin::application(b.id), post_input(Visibility::Public))
            .await
            .unwrap();

        let feed = core
            .feed_news(&app, a.id, &EventQuery::default(), &ObjectQuery::default())
            .await
            .unwrap();
        assert_eq!(feed.posts.len(), 1);
        assert!(feed.events.is_empty());
        assert!(feed.user_map.contains_key(&b.id));
    }

    #[tokio::test]
    async fn test_notifications_self() {
        let core = core();
        let app = app();
        let owner = user(&core, &app, "owner").await;
        let fan = user(&core, &app, "fan").await;
        connect(&core, &app, fan.id, owner.id, ConnectionType::Follow).await;

        let origin = Origin::application(owner.id);
        let post = core
            .post_create(&app, &origin, post_input(Visibility::Public))
            .await
            .unwrap();
        let id = post.object.id;
        core.like_create(&app, fan.id, id).await.unwrap();
        core.like_create(&app, owner.id, id).await.unwrap();
        core.reaction_create(&app, fan.id, id, ReactionType::Wow).await.unwrap();
        core.comment_create(
            &app,
            &Origin::application(fan.id),
            id,
            post_input(Visibility::Public),
        )
        .await
        .unwrap();

        let feed = core
            .feed_notifications_self(&app, owner.id, &EventQuery::default())
            .await
            .unwrap();
        let mut kinds: Vec<String> = feed.events.iter().map(|e| e.kind.clone()).collect();
        kinds.sort();
        assert_eq!(
            kinds,
            vec![
                TYPE_COMMENT.to_string(),
                TYPE_FOLLOW.to_string(),
                TYPE_LIKE.to_string(),
                "tg_reaction:wow".to_string(),
            ]
        );
        assert!(feed.events.iter().all(|e| e.user_id == fan.id));
        assert_eq!(feed.post_map[&id].counts.comments, 1);
        assert!(feed.user_map[&fan.id].is_follower);
    }
}
