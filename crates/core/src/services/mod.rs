//! Business operations.
//!
//! [`Core`] holds the entity services and exposes one method per operation.
//! The methods are grouped by domain in the submodules.

pub mod app;
pub mod comment;
pub mod connection;
pub mod device;
pub mod feed;
pub mod like;
pub mod pipeline;
pub mod post;
pub mod reaction;
pub mod relation;
pub mod rule;
pub mod template;
pub mod user;

pub use feed::{Affiliation, Affiliations, Feed};
pub use like::LikeFeed;
pub use pipeline::Message;
pub use post::{HasReacted, Post, PostCounts, PostFeed};
pub use reaction::ReactionFeed;
pub use relation::Relation;
pub use template::Template;

use std::sync::Arc;

use fanout_common::IdGenerator;
use fanout_db::{
    AppService, ConnectionService, DeviceService, EventService, ObjectService, ReactionService,
    RuleService, SessionService, UserService, store::MemoryStore,
};

/// Page size used when the caller gives none.
pub const DEFAULT_LIMIT: usize = 25;

pub(crate) fn limit_of(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT)
}

/// Entity services the operations run against.
#[derive(Clone)]
pub struct Stores {
    /// Apps, in the global namespace.
    pub apps: AppService,
    /// Connections between users.
    pub connections: ConnectionService,
    /// Push devices.
    pub devices: DeviceService,
    /// Events such as likes.
    pub events: EventService,
    /// Posts and comments.
    pub objects: ObjectService,
    /// Reactions on posts.
    pub reactions: ReactionService,
    /// Notification rules.
    pub rules: RuleService,
    /// User sessions.
    pub sessions: SessionService,
    /// Users.
    pub users: UserService,
}

impl Stores {
    /// Memory-backed stores sharing `ids`.
    #[must_use]
    pub fn memory(ids: &IdGenerator) -> Self {
        Self {
            apps: Arc::new(MemoryStore::new(ids.clone())),
            connections: Arc::new(MemoryStore::new(ids.clone())),
            devices: Arc::new(MemoryStore::new(ids.clone())),
            events: Arc::new(MemoryStore::new(ids.clone())),
            objects: Arc::new(MemoryStore::new(ids.clone())),
            reactions: Arc::new(MemoryStore::new(ids.clone())),
            rules: Arc::new(MemoryStore::new(ids.clone())),
            sessions: Arc::new(MemoryStore::new(ids.clone())),
            users: Arc::new(MemoryStore::new(ids.clone())),
        }
    }
}

/// Core operations over a set of entity services.
#[derive(Clone)]
pub struct Core {
    stores: Stores,
    ids: IdGenerator,
}

impl Core {
    /// Create the operations over `stores`.
    #[must_use]
    pub const fn new(stores: Stores, ids: IdGenerator) -> Self {
        Self { stores, ids }
    }

    /// The underlying entity services.
    #[must_use]
    pub const fn stores(&self) -> &Stores {
        &self.stores
    }

    /// The id generator shared with the stores.
    #[must_use]
    pub const fn ids(&self) -> &IdGenerator {
        &self.ids
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod testing {
    //! Fixtures shared by the operation tests.

    use fanout_db::{
        Service,
        entities::{
            App, Connection, ConnectionState, ConnectionType, Object, User, Visibility,
            object::{Attachment, TYPE_POST},
        },
    };
    use maplit::hashmap;

    use super::*;

    pub fn core() -> Core {
        let ids = IdGenerator::new();
        Core::new(Stores::memory(&ids), ids)
    }

    pub fn app() -> App {
        App {
            id: 1,
            org_id: 1,
            name: "test".to_string(),
            token: "t".repeat(32),
            backend_token: "b".repeat(44),
            enabled: true,
            ..App::default()
        }
    }

    pub async fn user(core: &Core, app: &App, name: &str) -> User {
        core.stores()
            .users
            .put(
                &app.namespace(),
                User {
                    enabled: true,
                    username: name.to_string(),
                    email: format!("{name}@example.com"),
                    password: "secret".to_string(),
                    ..User::default()
                },
            )
            .await
            .unwrap()
    }

    pub async fn connect(
        core: &Core,
        app: &App,
        from: u64,
        to: u64,
        kind: ConnectionType,
    ) -> Connection {
        core.stores()
            .connections
            .put(
                &app.namespace(),
                Connection {
                    enabled: true,
                    from_id: from,
                    to_id: to,
                    kind,
                    state: ConnectionState::Confirmed,
                    ..Connection::default()
                },
            )
            .await
            .unwrap()
    }

    pub fn post_input(visibility: Visibility) -> Object {
        Object {
            attachments: vec![Attachment::text(
                "body",
                hashmap! { "en".to_string() => "hello".to_string() },
            )],
            kind: TYPE_POST.to_string(),
            visibility,
            ..Object::default()
        }
    }
}
