//! Typed reactions on posts.

use std::collections::HashMap;

use fanout_common::{AppError, AppResult};
use fanout_db::{
    Service, ServiceExt,
    entities::{App, Reaction, ReactionQuery, ReactionType, User},
};

use super::{Core, post::Post};

/// Reactions of a post with the post and the users involved.
#[derive(Debug, Clone, Default)]
pub struct ReactionFeed {
    /// Reactions, newest first.
    pub reactions: Vec<Reaction>,
    /// The reacted post with its counts.
    pub post_map: HashMap<u64, Post>,
    /// Reaction owners and the post owner.
    pub user_map: HashMap<u64, User>,
}

fn reaction_query(post_id: u64, origin: u64, kind: ReactionType) -> ReactionQuery {
    ReactionQuery {
        object_ids: vec![post_id],
        owner_ids: vec![origin],
        types: vec![kind],
        ..ReactionQuery::default()
    }
}

impl Core {
    /// React to a post. Reacting twice with the same type returns the
    /// existing reaction; a withdrawn one is restored.
    pub async fn reaction_create(
        &self,
        app: &App,
        origin: u64,
        post_id: u64,
        kind: ReactionType,
    ) -> AppResult<Reaction> {
        let post = self.post_fetch(app, post_id).await?.object;
        self.check_post_visible(app, &post, origin).await?;
        if post.restrictions().like {
            return Err(AppError::Unauthorized(
                "reactions not allowed for this post".to_string(),
            ));
        }

        let ns = app.namespace();
        let reaction = match self
            .stores()
            .reactions
            .one(&ns, &reaction_query(post.id, origin, kind))
            .await?
        {
            Some(r) if !r.deleted => return Ok(r),
            Some(mut r) => {
                r.deleted = false;
                r
            }
            None => Reaction {
                object_id: post.id,
                owner_id: origin,
                kind,
                ..Reaction::default()
            },
        };

        self.stores().reactions.put(&ns, reaction).await
    }

    /// Withdraw a reaction. Missing reactions are ignored.
    pub async fn reaction_delete(
        &self,
        app: &App,
        origin: u64,
        post_id: u64,
        kind: ReactionType,
    ) -> AppResult<()> {
        let post = self.post_fetch(app, post_id).await?.object;
        self.check_post_visible(app, &post, origin).await?;

        let ns = app.namespace();
        let query = ReactionQuery {
            deleted: Some(false),
            ..reaction_query(post.id, origin, kind)
        };
        let Some(mut reaction) = self.stores().reactions.one(&ns, &query).await? else {
            return Ok(());
        };

        reaction.deleted = true;
        self.stores().reactions.put(&ns, reaction).await?;
        Ok(())
    }

    /// Live reactions of a visible post, optionally narrowed to `opts.types`.
    pub async fn reaction_list_post(
        &self,
        app: &App,
        origin: u64,
        post_id: u64,
        opts: &ReactionQuery,
    ) -> AppResult<ReactionFeed> {
        let mut post = self.post_fetch(app, post_id).await?;
        self.check_post_visible(app, &post.object, origin).await?;

        let reactions = self
            .stores()
            .reactions
            .query(
                &app.namespace(),
                &ReactionQuery {
                    before: opts.before,
                    deleted: Some(false),
                    limit: opts.limit,
                    object_ids: vec![post.object.id],
                    types: opts.types.clone(),
                    ..ReactionQuery::default()
                },
            )
            .await?;

        let mut ids: Vec<u64> = reactions.iter().map(|r| r.owner_id).collect();
        ids.push(post.object.owner_id);
        let user_map = self.related_users(app, origin, &ids).await?;

        self.enrich_counts(app, std::slice::from_mut(&mut post)).await?;

        Ok(ReactionFeed {
            reactions,
            post_map: HashMap::from([(post.object.id, post)]),
            user_map,
        })
    }
}
