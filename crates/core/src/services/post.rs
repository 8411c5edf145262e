//! Post operations and post enrichment.

use std::collections::HashMap;

use fanout_common::{AppError, AppResult};
use fanout_db::{
    ObjectServiceExt, ReactionCounts, ReactionServiceExt, Service, ServiceExt,
    entities::{
        App, Entity, EventQuery, Object, ObjectQuery, ReactionQuery, ReactionType, User,
        Visibility,
        event::TYPE_LIKE,
        object::TYPE_POST,
    },
};
use serde::Serialize;

use super::Core;
use crate::origin::Origin;

/// Engagement counters of a post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PostCounts {
    /// Live comments on the post.
    pub comments: u64,
    /// Live likes on the post.
    pub likes: u64,
    /// Live reactions per type.
    pub reactions: ReactionCounts,
}

/// Reaction types the viewer has live on a post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HasReacted {
    /// The viewer reacted with `like`.
    pub like: bool,
    /// The viewer reacted with `love`.
    pub love: bool,
    /// The viewer reacted with `haha`.
    pub haha: bool,
    /// The viewer reacted with `wow`.
    pub wow: bool,
    /// The viewer reacted with `sad`.
    pub sad: bool,
    /// The viewer reacted with `angry`.
    pub angry: bool,
}

impl HasReacted {
    fn set(&mut self, kind: ReactionType) {
        match kind {
            ReactionType::Like => self.like = true,
            ReactionType::Love => self.love = true,
            ReactionType::Haha => self.haha = true,
            ReactionType::Wow => self.wow = true,
            ReactionType::Sad => self.sad = true,
            ReactionType::Angry => self.angry = true,
        }
    }
}

/// A first-party object of type `tg_post` with per-viewer enrichment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Post {
    /// The stored object.
    pub object: Object,
    /// Aggregates attached on read.
    pub counts: PostCounts,
    /// Whether the viewer likes the post.
    pub is_liked: bool,
    /// Reaction types the viewer used.
    pub has_reacted: HasReacted,
}

impl From<Object> for Post {
    fn from(object: Object) -> Self {
        Self {
            object,
            ..Self::default()
        }
    }
}

/// Posts with their owners.
#[derive(Debug, Clone, Default)]
pub struct PostFeed {
    /// Posts, newest first.
    pub posts: Vec<Post>,
    /// Owners of the posts by id.
    pub user_map: HashMap<u64, User>,
}

pub(crate) fn sort_posts(posts: &mut [Post]) {
    posts.sort_by(|a, b| b.object.created_at.cmp(&a.object.created_at));
}

pub(crate) fn post_ids(posts: &[Post]) -> Vec<u64> {
    posts.iter().map(|p| p.object.id).collect()
}

pub(crate) fn owner_ids(posts: &[Post]) -> Vec<u64> {
    posts.iter().map(|p| p.object.owner_id).collect()
}

/// Options restricted to first-party posts.
fn post_query(id: u64) -> ObjectQuery {
    ObjectQuery {
        ids: vec![id],
        owned: Some(true),
        types: vec![TYPE_POST.to_string()],
        ..ObjectQuery::default()
    }
}

fn constrain(origin: &Origin, post: &Object) -> AppResult<()> {
    if post.restrictions.is_some() {
        origin.require_backend("restrictions")?;
    }
    if post.private.is_some() {
        origin.require_backend("private")?;
    }
    if post.visibility == Visibility::Global {
        origin.require_backend("global visibility")?;
    }
    Ok(())
}

impl Core {
    /// Publish a post owned by the caller.
    pub async fn post_create(&self, app: &App, origin: &Origin, mut post: Object) -> AppResult<Post> {
        post.owner_id = origin.user_id;
        post.owned = true;
        post.kind = TYPE_POST.to_string();
        post.object_id = 0;

        constrain(origin, &post)?;
        post.validate().map_err(|e| e.context("invalid post"))?;

        let object = self.stores().objects.put(&app.namespace(), post).await?;
        Ok(object.into())
    }

    /// Logically delete a post of the caller. Missing posts are ignored.
    pub async fn post_delete(&self, app: &App, origin: u64, id: u64) -> AppResult<()> {
        let ns = app.namespace();
        let Some(mut post) = self.stores().objects.one(&ns, &post_query(id)).await? else {
            return Ok(());
        };
        if post.owner_id != origin {
            return Err(AppError::Unauthorized(
                "not allowed to delete post".to_string(),
            ));
        }

        post.deleted = true;
        self.stores().objects.put(&ns, post).await?;
        Ok(())
    }

    /// Live post by id, without visibility checks.
    pub async fn post_fetch(&self, app: &App, id: u64) -> AppResult<Post> {
        self.stores()
            .objects
            .one(&app.namespace(), &post_query(id))
            .await?
            .map(Post::from)
            .ok_or_else(|| AppError::NotFound(format!("post {id} not found")))
    }

    /// Public and global posts of the app.
    pub async fn post_list_all(
        &self,
        app: &App,
        origin: u64,
        opts: &ObjectQuery,
    ) -> AppResult<PostFeed> {
        let query = ObjectQuery {
            owned: Some(true),
            types: vec![TYPE_POST.to_string()],
            visibilities: vec![Visibility::Public, Visibility::Global],
            ..opts.clone()
        };
        let mut posts: Vec<Post> = self
            .stores()
            .objects
            .query(&app.namespace(), &query)
            .await?
            .into_iter()
            .map(Post::from)
            .collect();

        self.enrich_posts(app, origin, &mut posts).await?;
        self.enrich_is_liked(app, origin, &mut posts).await?;
        let user_map = self.related_users(app, origin, &owner_ids(&posts)).await?;
        Ok(PostFeed { posts, user_map })
    }

    /// Posts of `user_id` that `origin` may see.
    pub async fn post_list_user(
        &self,
        app: &App,
        origin: u64,
        user_id: u64,
        opts: &ObjectQuery,
    ) -> AppResult<PostFeed> {
        let mut visibilities = vec![Visibility::Public, Visibility::Global];
        if origin == user_id {
            visibilities.extend([Visibility::Connection, Visibility::Private]);
        } else {
            let r = self.query_relation(app, origin, user_id).await?;
            if r.is_friend || r.is_following {
                visibilities.push(Visibility::Connection);
            }
        }

        let query = ObjectQuery {
            owner_ids: vec![user_id],
            owned: Some(true),
            types: vec![TYPE_POST.to_string()],
            visibilities,
            ..opts.clone()
        };
        let mut posts: Vec<Post> = self
            .stores()
            .objects
            .query(&app.namespace(), &query)
            .await?
            .into_iter()
            .map(Post::from)
            .collect();

        self.enrich_posts(app, origin, &mut posts).await?;
        let user_map = self.related_users(app, origin, &owner_ids(&posts)).await?;
        Ok(PostFeed { posts, user_map })
    }

    /// A post `origin` may see, with counts and viewer flags.
    pub async fn post_retrieve(&self, app: &App, origin: u64, id: u64) -> AppResult<Post> {
        let post = self.post_fetch(app, id).await?;
        self.check_post_visible(app, &post.object, origin).await?;

        let mut posts = vec![post];
        self.enrich_posts(app, origin, &mut posts).await?;
        self.enrich_is_liked(app, origin, &mut posts).await?;
        posts
            .pop()
            .ok_or_else(|| AppError::NotFound(format!("post {id} not found")))
    }

    /// Replace attachments, tags and visibility of a post of the caller.
    /// Restrictions and private flags change only when given.
    pub async fn post_update(
        &self,
        app: &App,
        origin: &Origin,
        id: u64,
        post: Object,
    ) -> AppResult<Post> {
        let ns = app.namespace();
        let query = ObjectQuery {
            owner_ids: vec![origin.user_id],
            ..post_query(id)
        };
        let mut stored = self
            .stores()
            .objects
            .one(&ns, &query)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("post {id} not found")))?;

        constrain(origin, &post)?;
        stored.attachments = post.attachments;
        stored.tags = post.tags;
        stored.visibility = post.visibility;
        if post.restrictions.is_some() {
            stored.restrictions = post.restrictions;
        }
        if post.private.is_some() {
            stored.private = post.private;
        }
        stored.validate()?;

        let object = self.stores().objects.put(&ns, stored).await?;
        Ok(object.into())
    }

    /// Set counts and `has_reacted` for `origin`.
    pub(crate) async fn enrich_posts(
        &self,
        app: &App,
        origin: u64,
        posts: &mut [Post],
    ) -> AppResult<()> {
        self.enrich_counts(app, posts).await?;
        self.enrich_has_reacted(app, origin, posts).await
    }

    pub(crate) async fn enrich_counts(&self, app: &App, posts: &mut [Post]) -> AppResult<()> {
        if posts.is_empty() {
            return Ok(());
        }
        let ns = app.namespace();
        let ids = post_ids(posts);
        let comments = self.stores().objects.count_multi(&ns, &ids).await?;
        let reactions = self.stores().reactions.count_by_type(&ns, &ids).await?;

        for post in posts.iter_mut() {
            let id = post.object.id;
            post.counts = PostCounts {
                comments: comments.get(&id).copied().unwrap_or_default(),
                likes: self
                    .stores()
                    .events
                    .count(&ns, &EventQuery::likes_of(id))
                    .await?,
                reactions: reactions.get(&id).copied().unwrap_or_default(),
            };
        }
        Ok(())
    }

    pub(crate) async fn enrich_has_reacted(
        &self,
        app: &App,
        origin: u64,
        posts: &mut [Post],
    ) -> AppResult<()> {
        let ns = app.namespace();
        for post in posts.iter_mut() {
            let live = self
                .stores()
                .reactions
                .query(
                    &ns,
                    &ReactionQuery {
                        deleted: Some(false),
                        object_ids: vec![post.object.id],
                        owner_ids: vec![origin],
                        ..ReactionQuery::default()
                    },
                )
                .await?;

            let mut has = HasReacted::default();
            for r in live {
                has.set(r.kind);
            }
            post.has_reacted = has;
        }
        Ok(())
    }

    pub(crate) async fn enrich_is_liked(
        &self,
        app: &App,
        origin: u64,
        posts: &mut [Post],
    ) -> AppResult<()> {
        let ns = app.namespace();
        for post in posts.iter_mut() {
            let likes = self
                .stores()
                .events
                .count(
                    &ns,
                    &EventQuery {
                        enabled: Some(true),
                        object_ids: vec![post.object.id],
                        types: vec![TYPE_LIKE.to_string()],
                        user_ids: vec![origin],
                        ..EventQuery::default()
                    },
                )
                .await?;
            post.is_liked = likes > 0;
        }
        Ok(())
    }

    /// Enabled users among `ids` with relation flags for `origin`.
    pub(crate) async fn related_users(
        &self,
        app: &App,
        origin: u64,
        ids: &[u64],
    ) -> AppResult<HashMap<u64, User>> {
        let mut users = self.users_map(app, ids).await?;
        for u in users.values_mut() {
            self.enrich_relation(app, origin, u).await?;
        }
        Ok(users)
    }
}
