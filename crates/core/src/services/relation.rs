//! Relations between users and post visibility.

use fanout_common::{AppError, AppResult};
use fanout_db::{
    Service,
    entities::{App, Connection, ConnectionQuery, ConnectionState, ConnectionType, Object, User, Visibility},
};

use super::Core;

/// How a viewer relates to another user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Relation {
    /// Viewer and user are friends.
    pub is_friend: bool,
    /// The user follows the viewer.
    pub is_follower: bool,
    /// The viewer follows the user.
    pub is_following: bool,
    /// Viewer and user are the same.
    pub is_self: bool,
}

impl Relation {
    fn from_edges(origin: u64, edges: &[Connection]) -> Self {
        let mut r = Self::default();
        for edge in edges {
            match edge.kind {
                ConnectionType::Friend => r.is_friend = true,
                ConnectionType::Follow if edge.from_id == origin => r.is_following = true,
                ConnectionType::Follow => r.is_follower = true,
            }
        }
        r
    }

    /// Copy the flags onto `user`.
    pub fn apply(self, user: &mut User) {
        user.is_friend = self.is_friend;
        user.is_follower = self.is_follower;
        user.is_following = self.is_following;
    }
}

impl Core {
    /// Relation of `origin` to `user_id`.
    pub async fn query_relation(&self, app: &App, origin: u64, user_id: u64) -> AppResult<Relation> {
        if origin == user_id {
            return Ok(Relation {
                is_self: true,
                ..Relation::default()
            });
        }

        let edges = self
            .stores()
            .connections
            .query(
                &app.namespace(),
                &ConnectionQuery {
                    enabled: Some(true),
                    from_ids: vec![origin, user_id],
                    states: vec![ConnectionState::Confirmed],
                    to_ids: vec![origin, user_id],
                    ..ConnectionQuery::default()
                },
            )
            .await?;

        Ok(Relation::from_edges(origin, &edges))
    }

    /// Set the relation flags of `user` as seen by `origin`.
    pub async fn enrich_relation(&self, app: &App, origin: u64, user: &mut User) -> AppResult<()> {
        if origin == user.id {
            return Ok(());
        }
        self.query_relation(app, origin, user.id)
            .await?
            .apply(user);
        Ok(())
    }

    /// Fails with `NotFound` unless `origin` may see `post`.
    pub async fn check_post_visible(&self, app: &App, post: &Object, origin: u64) -> AppResult<()> {
        if origin == post.owner_id {
            return Ok(());
        }

        match post.visibility {
            Visibility::Global | Visibility::Public => Ok(()),
            Visibility::Private => Err(not_visible(post.id)),
            Visibility::Connection => {
                let r = self.query_relation(app, origin, post.owner_id).await?;
                if r.is_friend || r.is_following {
                    Ok(())
                } else {
                    Err(not_visible(post.id))
                }
            }
        }
    }
}

fn not_visible(id: u64) -> AppError {
    AppError::NotFound(format!("post {id} not found"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::services::testing::{app, connect, core, user};

    #[tokio::test]
    async fn test_friendship_is_symmetric() {
        let core = core();
        let app = app();
        let a = user(&core, &app, "alice").await;
        let b = user(&core, &app, "bob").await;
        connect(&core, &app, a.id, b.id, ConnectionType::Friend).await;

        let ab = core.query_relation(&app, a.id, b.id).await.unwrap();
        let ba = core.query_relation(&app, b.id, a.id).await.unwrap();
        assert!(ab.is_friend);
        assert!(ba.is_friend);
        assert!(!ab.is_following && !ab.is_follower);
    }

    #[tokio::test]
    async fn test_follow_is_directional() {
        let core = core();
        let app = app();
        let a = user(&core, &app, "alice").await;
        let b = user(&core, &app, "bob").await;
        connect(&core, &app, a.id, b.id, ConnectionType::Follow).await;

        let ab = core.query_relation(&app, a.id, b.id).await.unwrap();
        assert!(ab.is_following);
        assert!(!ab.is_follower);

        let ba = core.query_relation(&app, b.id, a.id).await.unwrap();
        assert!(ba.is_follower);
        assert!(!ba.is_following);
    }

    #[tokio::test]
    async fn test_self_relation() {
        let core = core();
        let r = core.query_relation(&app(), 3, 3).await.unwrap();
        assert!(r.is_self);
    }

    #[tokio::test]
    async fn test_post_visibility() {
        let core = core();
        let app = app();
        let owner = user(&core, &app, "owner").await;
        let fan = user(&core, &app, "fan").await;
        let stranger = user(&core, &app, "stranger").await;
        connect(&core, &app, fan.id, owner.id, ConnectionType::Follow).await;

        let mut post = Object {
            id: 10,
            owner_id: owner.id,
            visibility: Visibility::Connection,
            ..Object::default()
        };
        assert!(core.check_post_visible(&app, &post, owner.id).await.is_ok());
        assert!(core.check_post_visible(&app, &post, fan.id).await.is_ok());
        let err = core.check_post_visible(&app, &post, stranger.id).await;
        assert!(matches!(err, Err(AppError::NotFound(_))));

        post.visibility = Visibility::Private;
        assert!(core.check_post_visible(&app, &post, fan.id).await.is_err());
        assert!(core.check_post_visible(&app, &post, owner.id).await.is_ok());

        post.visibility = Visibility::Public;
        assert!(core.check_post_visible(&app, &post, stranger.id).await.is_ok());
    }
}
