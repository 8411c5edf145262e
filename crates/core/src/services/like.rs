//! Likes: events of type `tg_like` on first-party posts.

use std::collections::HashMap;

use fanout_common::{AppError, AppResult};
use fanout_db::{
    Service, ServiceExt,
    entities::{App, Event, EventQuery, Object, User, Visibility, event::TYPE_LIKE},
};

use super::{
    Core, Relation,
    feed::{condition_post_missing, extract_posts, filter, sort_events},
    limit_of,
    post::Post,
};

/// Likes with the posts they point at and their users.
#[derive(Debug, Clone, Default)]
pub struct LikeFeed {
    /// Likes, newest first.
    pub likes: Vec<Event>,
    /// Liked posts by id.
    pub post_map: HashMap<u64, Post>,
    /// Likers and post owners by id.
    pub user_map: HashMap<u64, User>,
}

/// Event visibilities a viewer may see for a relation.
pub(crate) fn event_visibilities(r: Relation) -> Vec<Visibility> {
    if r.is_self {
        vec![
            Visibility::Private,
            Visibility::Connection,
            Visibility::Public,
            Visibility::Global,
        ]
    } else if r.is_following || r.is_friend {
        vec![Visibility::Connection, Visibility::Public, Visibility::Global]
    } else {
        vec![Visibility::Public, Visibility::Global]
    }
}

fn check_like_restriction(post: &Object) -> AppResult<()> {
    if post.restrictions().like {
        return Err(AppError::Unauthorized(
            "likes not allowed for this post".to_string(),
        ));
    }
    Ok(())
}

fn like_query(post_id: u64, user_id: u64) -> EventQuery {
    EventQuery {
        object_ids: vec![post_id],
        owned: Some(true),
        types: vec![TYPE_LIKE.to_string()],
        user_ids: vec![user_id],
        ..EventQuery::default()
    }
}

impl Core {
    /// Like a post. Liking twice returns the existing like.
    pub async fn like_create(&self, app: &App, origin: u64, post_id: u64) -> AppResult<Event> {
        let post = self.post_fetch(app, post_id).await?.object;
        self.check_post_visible(app, &post, origin).await?;
        check_like_restriction(&post)?;

        let ns = app.namespace();
        let like = match self.stores().events.one(&ns, &like_query(post.id, origin)).await? {
            Some(like) if like.enabled => return Ok(like),
            Some(mut like) => {
                like.enabled = true;
                like
            }
            None => Event {
                enabled: true,
                object_id: post.id,
                owned: true,
                kind: TYPE_LIKE.to_string(),
                user_id: origin,
                visibility: post.visibility,
                ..Event::default()
            },
        };

        self.stores().events.put(&ns, like).await
    }

    /// Withdraw a like. Missing likes are ignored.
    pub async fn like_delete(&self, app: &App, origin: u64, post_id: u64) -> AppResult<()> {
        let post = self.post_fetch(app, post_id).await?.object;
        self.check_post_visible(app, &post, origin).await?;

        let ns = app.namespace();
        let query = EventQuery {
            enabled: Some(true),
            ..like_query(post.id, origin)
        };
        let Some(mut like) = self.stores().events.one(&ns, &query).await? else {
            return Ok(());
        };

        like.enabled = false;
        self.stores().events.put(&ns, like).await?;
        Ok(())
    }

    /// Likes of a visible post, newest first.
    pub async fn like_list(
        &self,
        app: &App,
        origin: u64,
        post_id: u64,
        opts: &EventQuery,
    ) -> AppResult<LikeFeed> {
        let post = self.post_fetch(app, post_id).await?.object;
        self.check_post_visible(app, &post, origin).await?;

        let likes = self
            .stores()
            .events
            .query(
                &app.namespace(),
                &EventQuery {
                    before: opts.before,
                    limit: opts.limit,
                    ..EventQuery::likes_of(post.id)
                },
            )
            .await?;

        let ids: Vec<u64> = likes.iter().map(|l| l.user_id).collect();
        let user_map = self.users_map(app, &ids).await?;
        Ok(LikeFeed {
            likes,
            post_map: HashMap::new(),
            user_map,
        })
    }

    /// Likes of `user_id` that `origin` may see, with the liked posts.
    pub async fn likes_user(
        &self,
        app: &App,
        origin: u64,
        user_id: u64,
        opts: &EventQuery,
    ) -> AppResult<LikeFeed> {
        let r = self.query_relation(app, origin, user_id).await?;
        let limit = limit_of(opts.limit);
        let query = EventQuery {
            enabled: Some(true),
            types: vec![TYPE_LIKE.to_string()],
            user_ids: vec![user_id],
            visibilities: event_visibilities(r),
            limit: Some(limit),
            ..opts.clone()
        };
        let likes = self.stores().events.query(&app.namespace(), &query).await?;

        let found: HashMap<u64, Post> = extract_posts(self, app, &likes)
            .await?
            .into_iter()
            .map(|p| (p.object.id, p))
            .collect();

        let mut likes = filter(likes, &mut [condition_post_missing(&found)]);
        sort_events(&mut likes);
        likes.truncate(limit);

        let mut posts: Vec<Post> = likes
            .iter()
            .filter_map(|l| found.get(&l.object_id).cloned())
            .collect();
        self.enrich_counts(app, &mut posts).await?;
        if !r.is_self {
            self.enrich_is_liked(app, origin, &mut posts).await?;
        }

        let mut ids: Vec<u64> = likes.iter().map(|l| l.user_id).collect();
        ids.extend(posts.iter().map(|p| p.object.owner_id));
        let user_map = self.users_map(app, &ids).await?;

        let post_map = posts.into_iter().map(|p| (p.object.id, p)).collect();
        Ok(LikeFeed {
            likes,
            post_map,
            user_map,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::origin::Origin;
    use crate::services::testing::{app, core, post_input, user};
    use fanout_db::entities::Restrictions;

    #[tokio::test]
    async fn test_like_is_idempotent() {
        let core = core();
        let app = app();
        let owner = user(&core, &app, "owner").await;
        let fan = user(&core, &app, "fan").await;
        let post = core
            .post_create(&app, &Origin::application(owner.id), post_input(Visibility::Public))
            .await
            .unwrap();

        let first = core.like_create(&app, fan.id, post.object.id).await.unwrap();
        let second = core.like_create(&app, fan.id, post.object.id).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.visibility, Visibility::Public);

        let retrieved = core.post_retrieve(&app, fan.id, post.object.id).await.unwrap();
        assert_eq!(retrieved.counts.likes, 1);
        assert!(retrieved.is_liked);

        core.like_delete(&app, fan.id, post.object.id).await.unwrap();
        core.like_delete(&app, fan.id, post.object.id).await.unwrap();
        let retrieved = core.post_retrieve(&app, fan.id, post.object.id).await.unwrap();
        assert_eq!(retrieved.counts.likes, 0);
        assert!(!retrieved.is_liked);

        let again = core.like_create(&app, fan.id, post.object.id).await.unwrap();
        assert_eq!(again.id, first.id);
        assert!(again.enabled);
    }

    #[tokio::test]
    async fn test_like_restriction() {
        let core = core();
        let app = app();
        let owner = user(&core, &app, "owner").await;
        let mut input = post_input(Visibility::Public);
        input.restrictions = Some(Restrictions {
            like: true,
            ..Restrictions::default()
        });
        let post = core
            .post_create(&app, &Origin::backend(owner.id), input)
            .await
            .unwrap();

        let err = core.like_create(&app, owner.id, post.object.id).await;
        assert!(matches!(err, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_restricted_private_post_is_not_found() {
        let core = core();
        let app = app();
        let owner = user(&core, &app, "owner").await;
        let other = user(&core, &app, "other").await;
        let mut input = post_input(Visibility::Private);
        input.restrictions = Some(Restrictions {
            like: true,
            ..Restrictions::default()
        });
        let post = core
            .post_create(&app, &Origin::backend(owner.id), input)
            .await
            .unwrap();

        let err = core.like_create(&app, other.id, post.object.id).await;
        assert!(matches!(err, Err(AppError::NotFound(_))));
        let err = core.like_create(&app, owner.id, post.object.id).await;
        assert!(matches!(err, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_like_list_and_likes_user() {
        let core = core();
        let app = app();
        let owner = user(&core, &app, "owner").await;
        let fan = user(&core, &app, "fan").await;
        let stranger = user(&core, &app, "stranger").await;
        let origin = Origin::application(owner.id);
        let public = core.post_create(&app, &origin, post_input(Visibility::Public)).await.unwrap();
        let hidden = core.post_create(&app, &origin, post_input(Visibility::Private)).await.unwrap();

        core.like_create(&app, fan.id, public.object.id).await.unwrap();
        core.like_create(&app, owner.id, hidden.object.id).await.unwrap();

        let feed = core
            .like_list(&app, stranger.id, public.object.id, &EventQuery::default())
            .await
            .unwrap();
        assert_eq!(feed.likes.len(), 1);
        assert!(feed.user_map.contains_key(&fan.id));

        let feed = core
            .likes_user(&app, stranger.id, fan.id, &EventQuery::default())
            .await
            .unwrap();
        assert_eq!(feed.likes.len(), 1);
        assert!(feed.post_map.contains_key(&public.object.id));
        assert!(feed.user_map.contains_key(&owner.id));

        let own = core
            .likes_user(&app, owner.id, owner.id, &EventQuery::default())
            .await
            .unwrap();
        assert_eq!(own.likes.len(), 1);
        let seen = core
            .likes_user(&app, stranger.id, owner.id, &EventQuery::default())
            .await
            .unwrap();
        assert!(seen.likes.is_empty());
    }

    #[test]
    fn test_event_visibilities() {
        let own = event_visibilities(Relation {
            is_self: true,
            ..Relation::default()
        });
        assert_eq!(own.len(), 4);
        let friend = event_visibilities(Relation {
            is_friend: true,
            ..Relation::default()
        });
        assert!(friend.contains(&Visibility::Connection));
        assert!(!friend.contains(&Visibility::Private));
        assert_eq!(event_visibilities(Relation::default()).len(), 2);
    }
}
