//! Comment operations.

use std::collections::HashMap;

use fanout_common::{AppError, AppResult};
use fanout_db::{
    Service, ServiceExt,
    entities::{
        App, Attachment, Entity, Object, ObjectQuery, User,
        object::{ObjectPrivate, TYPE_COMMENT},
    },
};

use super::Core;
use crate::origin::Origin;

/// Name of the single attachment a comment carries.
pub const CONTENT_ATTACHMENT: &str = "content";

/// Comments of a post with their owners.
#[derive(Debug, Clone, Default)]
pub struct CommentFeed {
    /// Comments, newest first.
    pub comments: Vec<Object>,
    /// Comment owners by id.
    pub user_map: HashMap<u64, User>,
}

fn content_of(input: &Object) -> AppResult<Attachment> {
    let contents = input
        .attachments
        .first()
        .map(|a| a.contents.clone())
        .unwrap_or_default();
    let content = Attachment::text(CONTENT_ATTACHMENT, contents);
    if content.contents.is_empty() {
        return Err(AppError::InvalidEntity("comment content missing".to_string()));
    }
    Ok(content)
}

fn comment_query(post_id: u64, id: u64, owner: u64) -> ObjectQuery {
    ObjectQuery {
        ids: vec![id],
        object_ids: vec![post_id],
        owner_ids: vec![owner],
        types: vec![TYPE_COMMENT.to_string()],
        ..ObjectQuery::default()
    }
}

impl Core {
    /// Comment on a post the caller can see.
    pub async fn comment_create(
        &self,
        app: &App,
        origin: &Origin,
        post_id: u64,
        input: Object,
    ) -> AppResult<Object> {
        if input.private.is_some() {
            origin.require_backend("private")?;
        }

        let post = self.post_fetch(app, post_id).await?.object;
        self.check_post_visible(app, &post, origin.user_id).await?;
        if post.restrictions().comment {
            return Err(AppError::Unauthorized(
                "comments are restricted on this post".to_string(),
            ));
        }

        let comment = Object {
            attachments: vec![content_of(&input)?],
            object_id: post.id,
            owned: true,
            owner_id: origin.user_id,
            private: input.private,
            kind: TYPE_COMMENT.to_string(),
            visibility: post.visibility,
            ..Object::default()
        };
        comment.validate()?;

        self.stores().objects.put(&app.namespace(), comment).await
    }

    /// Logically delete a comment of the caller. Missing comments are ignored.
    pub async fn comment_delete(&self, app: &App, origin: u64, post_id: u64, id: u64) -> AppResult<()> {
        let ns = app.namespace();
        let Some(mut comment) = self
            .stores()
            .objects
            .one(&ns, &comment_query(post_id, id, origin))
            .await?
        else {
            return Ok(());
        };

        comment.deleted = true;
        self.stores().objects.put(&ns, comment).await?;
        Ok(())
    }

    /// Comments of a visible post, newest first.
    pub async fn comment_list(
        &self,
        app: &App,
        origin: u64,
        post_id: u64,
        opts: &ObjectQuery,
    ) -> AppResult<CommentFeed> {
        let post = self.post_fetch(app, post_id).await?.object;
        self.check_post_visible(app, &post, origin).await?;

        let comments = self
            .stores()
            .objects
            .query(
                &app.namespace(),
                &ObjectQuery {
                    before: opts.before,
                    limit: opts.limit,
                    ..ObjectQuery::comments_of(post.id)
                },
            )
            .await?;

        let owners: Vec<u64> = comments.iter().map(|c| c.owner_id).collect();
        let user_map = self.related_users(app, origin, &owners).await?;
        Ok(CommentFeed { comments, user_map })
    }

    /// A comment of the caller.
    pub async fn comment_retrieve(
        &self,
        app: &App,
        origin: u64,
        post_id: u64,
        id: u64,
    ) -> AppResult<Object> {
        self.stores()
            .objects
            .one(&app.namespace(), &comment_query(post_id, id, origin))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("comment {id} not found")))
    }

    /// Replace the content of a comment of the caller.
    pub async fn comment_update(
        &self,
        app: &App,
        origin: &Origin,
        post_id: u64,
        id: u64,
        input: Object,
    ) -> AppResult<Object> {
        let private: Option<ObjectPrivate> = input.private;
        if private.is_some() {
            origin.require_backend("private")?;
        }

        let mut comment = self.comment_retrieve(app, origin.user_id, post_id, id).await?;
        comment.attachments = vec![content_of(&input)?];
        if private.is_some() {
            comment.private = private;
        }
        comment.validate()?;

        self.stores().objects.put(&app.namespace(), comment).await
    }
}
