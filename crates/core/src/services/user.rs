//! User operations: signup, sessions, profile and lookups.

use std::collections::HashMap;

use fanout_common::{AppError, AppResult, password_compare, password_secure};
use fanout_db::{
    Service, ServiceExt,
    entities::{
        App, ConnectionQuery, ConnectionState, ConnectionType, Entity, Session, SessionQuery,
        User, UserQuery, now,
    },
};
use tracing::warn;

use super::Core;
use crate::origin::Origin;

impl Core {
    /// Sign up a user and open a session on the caller's device.
    pub async fn user_create(&self, app: &App, origin: &Origin, mut user: User) -> AppResult<User> {
        if user.private.is_some() {
            origin.require_backend("private")?;
        }
        user.validate()?;

        user.password = password_secure(&user.password)?;
        user.enabled = true;

        let mut user = self.stores().users.put(&app.namespace(), user).await?;
        self.enrich_session_token(app, &mut user, &origin.device_id)
            .await?;
        Ok(user)
    }

    /// Logically delete `user` and close all of its sessions.
    pub async fn user_delete(&self, app: &App, mut user: User) -> AppResult<()> {
        let ns = app.namespace();
        user.enabled = false;
        user.deleted = true;
        let user = self.stores().users.put(&ns, user).await?;

        let sessions = self
            .stores()
            .sessions
            .query(
                &ns,
                &SessionQuery {
                    enabled: Some(true),
                    user_ids: vec![user.id],
                    ..SessionQuery::default()
                },
            )
            .await?;
        for mut session in sessions {
            session.enabled = false;
            self.stores().sessions.put(&ns, session).await?;
        }

        Ok(())
    }

    /// Enabled user by id.
    pub async fn user_fetch(&self, app: &App, id: u64) -> AppResult<User> {
        self.stores()
            .users
            .one(
                &app.namespace(),
                &UserQuery {
                    enabled: Some(true),
                    ids: vec![id],
                    ..UserQuery::default()
                },
            )
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {id} not found")))
    }

    /// Enabled users among `ids`.
    pub async fn users_fetch(&self, app: &App, ids: &[u64]) -> AppResult<Vec<User>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.stores()
            .users
            .query(
                &app.namespace(),
                &UserQuery {
                    enabled: Some(true),
                    ids: ids.to_vec(),
                    ..UserQuery::default()
                },
            )
            .await
    }

    /// Enabled users among `ids`, keyed by id.
    pub async fn users_map(&self, app: &App, ids: &[u64]) -> AppResult<HashMap<u64, User>> {
        Ok(self
            .users_fetch(app, ids)
            .await?
            .into_iter()
            .map(|u| (u.id, u))
            .collect())
    }

    /// Users owning any of the given emails, with relation flags.
    pub async fn user_list_by_emails(
        &self,
        app: &App,
        origin: u64,
        emails: Vec<String>,
        opts: &UserQuery,
    ) -> AppResult<Vec<User>> {
        let query = UserQuery {
            before: opts.before,
            enabled: Some(true),
            emails,
            limit: opts.limit,
            ..UserQuery::default()
        };
        self.users_with_relations(app, origin, &query).await
    }

    /// Users linked to any of the given ids on a social `platform`.
    pub async fn user_list_by_platform_ids(
        &self,
        app: &App,
        origin: u64,
        platform: &str,
        ids: Vec<String>,
        opts: &UserQuery,
    ) -> AppResult<Vec<User>> {
        let query = UserQuery {
            before: opts.before,
            enabled: Some(true),
            limit: opts.limit,
            social_ids: HashMap::from([(platform.to_string(), ids)]),
            ..UserQuery::default()
        };
        self.users_with_relations(app, origin, &query).await
    }

    async fn users_with_relations(
        &self,
        app: &App,
        origin: u64,
        query: &UserQuery,
    ) -> AppResult<Vec<User>> {
        let mut users = self.stores().users.query(&app.namespace(), query).await?;
        for u in &mut users {
            self.enrich_relation(app, origin, u).await?;
        }
        Ok(users)
    }

    /// Authenticate by email, falling back to username.
    pub async fn user_login(
        &self,
        app: &App,
        origin: &Origin,
        email: &str,
        username: &str,
        password: &str,
    ) -> AppResult<User> {
        let ns = app.namespace();
        let by_email = UserQuery {
            enabled: Some(true),
            emails: vec![email.to_string()],
            ..UserQuery::default()
        };
        let by_username = UserQuery {
            enabled: Some(true),
            usernames: vec![username.to_string()],
            ..UserQuery::default()
        };

        for query in [by_email, by_username] {
            let mut users = self.stores().users.query(&ns, &query).await?;
            if users.len() != 1 {
                continue;
            }
            let Some(mut user) = users.pop() else {
                continue;
            };

            password_compare(password, &user.password)?;
            self.enrich_session_token(app, &mut user, &origin.device_id)
                .await?;
            self.enrich_connection_counts(app, &mut user).await?;
            return Ok(user);
        }

        Err(AppError::NotFound("user not found".to_string()))
    }

    /// Close the session `token` of `user_id`. Unknown tokens are ignored.
    pub async fn user_logout(&self, app: &App, user_id: u64, token: &str) -> AppResult<()> {
        let ns = app.namespace();
        let session = self
            .stores()
            .sessions
            .one(
                &ns,
                &SessionQuery {
                    enabled: Some(true),
                    ids: vec![token.to_string()],
                    user_ids: vec![user_id],
                    ..SessionQuery::default()
                },
            )
            .await?;

        if let Some(mut session) = session {
            session.enabled = false;
            self.stores().sessions.put(&ns, session).await?;
        }
        Ok(())
    }

    /// User `user_id` as seen by `origin`, with counts. Viewing oneself also
    /// yields the session token.
    pub async fn user_retrieve(&self, app: &App, origin: &Origin, user_id: u64) -> AppResult<User> {
        let mut user = self.user_fetch(app, user_id).await?;
        self.enrich_relation(app, origin.user_id, &mut user).await?;
        self.enrich_connection_counts(app, &mut user).await?;
        if origin.user_id == user_id {
            self.enrich_session_token(app, &mut user, &origin.device_id)
                .await?;
        }
        Ok(user)
    }

    /// Substring search over names and email.
    pub async fn user_search(
        &self,
        app: &App,
        origin: u64,
        term: &str,
        opts: &UserQuery,
    ) -> AppResult<Vec<User>> {
        let mut users = self
            .stores()
            .users
            .query(
                &app.namespace(),
                &UserQuery {
                    before: opts.before,
                    enabled: Some(true),
                    limit: opts.limit,
                    search: Some(term.to_string()),
                    ..UserQuery::default()
                },
            )
            .await?;
        for u in &mut users {
            self.enrich_connection_counts(app, u).await?;
            self.enrich_relation(app, origin, u).await?;
        }
        Ok(users)
    }

    /// Replace the profile of `old` with `new`.
    ///
    /// An empty password keeps the stored hash; an absent `private` keeps the
    /// stored flags.
    pub async fn user_update(
        &self,
        app: &App,
        origin: &Origin,
        old: &User,
        mut new: User,
    ) -> AppResult<User> {
        if new.private.is_some() {
            origin.require_backend("private")?;
        }

        new.enabled = true;
        new.id = old.id;
        new.created_at = old.created_at;
        new.last_read = old.last_read;
        new.password = if new.password.is_empty() {
            old.password.clone()
        } else {
            password_secure(&new.password)?
        };
        if new.private.is_none() {
            new.private = old.private.clone();
        }

        let mut user = self.stores().users.put(&app.namespace(), new).await?;
        self.enrich_connection_counts(app, &mut user).await?;
        self.enrich_session_token(app, &mut user, &origin.device_id)
            .await?;
        Ok(user)
    }

    /// Refresh `last_read` of `user`. Failures are logged only.
    pub async fn user_mark_read(&self, app: &App, user: &User) {
        let mut updated = user.clone();
        updated.last_read = now();
        if let Err(e) = self.stores().users.put(&app.namespace(), updated).await {
            warn!(error = %e, user_id = user.id, "Failed to update last read");
        }
    }

    /// Resolve the user behind an enabled session token.
    pub async fn user_by_session(&self, app: &App, token: &str) -> AppResult<User> {
        let session = self
            .stores()
            .sessions
            .one(
                &app.namespace(),
                &SessionQuery {
                    enabled: Some(true),
                    ids: vec![token.to_string()],
                    ..SessionQuery::default()
                },
            )
            .await?
            .ok_or_else(|| AppError::Unauthorized("session not found".to_string()))?;

        let mut user = self
            .user_fetch(app, session.user_id)
            .await
            .map_err(|_| AppError::Unauthorized("user not found".to_string()))?;
        user.session_token = session.id;
        Ok(user)
    }

    /// Set follower, following and friend counts of `user`.
    pub async fn enrich_connection_counts(&self, app: &App, user: &mut User) -> AppResult<()> {
        let edges = |from: Option<u64>, to: Option<u64>, kind: ConnectionType| ConnectionQuery {
            enabled: Some(true),
            from_ids: from.into_iter().collect(),
            states: vec![ConnectionState::Confirmed],
            to_ids: to.into_iter().collect(),
            types: vec![kind],
            ..ConnectionQuery::default()
        };
        let ns = app.namespace();
        let connections = &self.stores().connections;

        let followers: Vec<u64> = connections
            .query(&ns, &edges(None, Some(user.id), ConnectionType::Follow))
            .await?
            .iter()
            .map(|c| c.from_id)
            .collect();
        let followings: Vec<u64> = connections
            .query(&ns, &edges(Some(user.id), None, ConnectionType::Follow))
            .await?
            .iter()
            .map(|c| c.to_id)
            .collect();
        let mut friends: Vec<u64> = connections
            .query(&ns, &edges(Some(user.id), None, ConnectionType::Friend))
            .await?
            .iter()
            .map(|c| c.to_id)
            .collect();
        friends.extend(
            connections
                .query(&ns, &edges(None, Some(user.id), ConnectionType::Friend))
                .await?
                .iter()
                .map(|c| c.from_id),
        );

        user.follower_count = self.count_enabled(&ns, followers).await?;
        user.following_count = self.count_enabled(&ns, followings).await?;
        user.friend_count = self.count_enabled(&ns, friends).await?;
        Ok(())
    }

    async fn count_enabled(&self, ns: &str, ids: Vec<u64>) -> AppResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.stores()
            .users
            .count(
                ns,
                &UserQuery {
                    enabled: Some(true),
                    ids,
                    ..UserQuery::default()
                },
            )
            .await
    }

    /// Attach the live session of `user` on `device_id`, opening one if
    /// needed.
    pub async fn enrich_session_token(
        &self,
        app: &App,
        user: &mut User,
        device_id: &str,
    ) -> AppResult<()> {
        let ns = app.namespace();
        let existing = self
            .stores()
            .sessions
            .one(
                &ns,
                &SessionQuery {
                    device_ids: vec![device_id.to_string()],
                    enabled: Some(true),
                    user_ids: vec![user.id],
                    ..SessionQuery::default()
                },
            )
            .await?;

        let session = match existing {
            Some(s) => s,
            None => {
                self.stores()
                    .sessions
                    .put(
                        &ns,
                        Session {
                            device_id: device_id.to_string(),
                            enabled: true,
                            id: self.ids().session_token(),
                            user_id: user.id,
                            ..Session::default()
                        },
                    )
                    .await?
            }
        };

        user.session_token = session.id;
        Ok(())
    }
}
