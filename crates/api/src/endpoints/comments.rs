//! Comment endpoints, nested under their post.

use std::collections::HashMap;

use axum::{Router, extract::State, response::Response, routing::get};
use chrono::{DateTime, Utc};
use fanout_core::services::comment::{CONTENT_ATTACHMENT, CommentFeed};
use fanout_db::entities::{
    Attachment, Object,
    object::{DEFAULT_LANGUAGE, ObjectPrivate},
};
use serde::{Deserialize, Serialize};

use crate::{
    extractors::{Caller, CurrentApp, CurrentUser, JsonBody, PathParams},
    paging::{Page, Pagination, cursors},
    payload::{UserPayload, contents_of, user_map},
    response::{ApiError, ApiResult, created, no_content, ok},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/posts/{id}/comments", get(list).post(create))
        .route(
            "/posts/{id}/comments/{comment_id}",
            get(retrieve).put(update).delete(remove),
        )
}

#[derive(Debug, Serialize)]
struct CommentPayload<'a> {
    content: &'a str,
    contents: Option<&'a HashMap<String, String>>,
    id: String,
    post_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    private: Option<&'a ObjectPrivate>,
    user_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'a> From<&'a Object> for CommentPayload<'a> {
    fn from(c: &'a Object) -> Self {
        let contents = c.attachments.first().map(|a| &a.contents);
        Self {
            content: contents
                .and_then(|m| m.get(DEFAULT_LANGUAGE))
                .map_or("", String::as_str),
            contents,
            id: c.id.to_string(),
            post_id: c.object_id.to_string(),
            private: c.private.as_ref(),
            user_id: c.owner_id.to_string(),
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CommentInput {
    content: String,
    contents: Option<HashMap<String, String>>,
    private: Option<ObjectPrivate>,
}

impl TryFrom<CommentInput> for Object {
    type Error = ApiError;

    fn try_from(f: CommentInput) -> Result<Self, Self::Error> {
        let contents = contents_of(f.contents, f.content)
            .ok_or_else(|| ApiError::bad_request("content or contents must be set"))?;
        Ok(Self {
            attachments: vec![Attachment::text(CONTENT_ATTACHMENT, contents)],
            private: f.private,
            ..Self::default()
        })
    }
}

#[derive(Debug, Serialize)]
struct CommentsPayload<'a> {
    comments: Vec<CommentPayload<'a>>,
    comments_count: usize,
    paging: Pagination,
    users: HashMap<String, UserPayload<'a>>,
    users_count: usize,
}

async fn create(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    Caller(origin): Caller,
    PathParams(post_id): PathParams<u64>,
    JsonBody(input): JsonBody<CommentInput>,
) -> ApiResult<Response> {
    let comment = state
        .core
        .comment_create(&app, &origin, post_id, Object::try_from(input)?)
        .await?;
    Ok(created(&CommentPayload::from(&comment)))
}

async fn retrieve(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    PathParams((post_id, id)): PathParams<(u64, u64)>,
) -> ApiResult<Response> {
    let comment = state
        .core
        .comment_retrieve(&app, me.id, post_id, id)
        .await?;
    Ok(ok(&CommentPayload::from(&comment)))
}

async fn update(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    Caller(origin): Caller,
    PathParams((post_id, id)): PathParams<(u64, u64)>,
    JsonBody(input): JsonBody<CommentInput>,
) -> ApiResult<Response> {
    let comment = state
        .core
        .comment_update(&app, &origin, post_id, id, Object::try_from(input)?)
        .await?;
    Ok(ok(&CommentPayload::from(&comment)))
}

async fn remove(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    PathParams((post_id, id)): PathParams<(u64, u64)>,
) -> ApiResult<Response> {
    state.core.comment_delete(&app, me.id, post_id, id).await?;
    Ok(no_content())
}

fn comments_response(page: &Page, limit: usize, feed: &CommentFeed) -> Response {
    if feed.comments.is_empty() {
        return no_content();
    }
    let (after, before) = cursors(&feed.comments, |c| c.created_at);
    ok(&CommentsPayload {
        comments: feed.comments.iter().map(CommentPayload::from).collect(),
        comments_count: feed.comments.len(),
        paging: page.pagination(limit, after, before),
        users: user_map(&feed.user_map),
        users_count: feed.user_map.len(),
    })
}

async fn list(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    PathParams(post_id): PathParams<u64>,
    page: Page,
) -> ApiResult<Response> {
    let opts = page.object_query()?;
    let feed = state
        .core
        .comment_list(&app, me.id, post_id, &opts)
        .await?;
    Ok(comments_response(&page, page.limit()?, &feed))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use maplit::hashmap;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_comment_input() {
        let input: CommentInput = serde_json::from_value(json!({ "content": "nice" })).unwrap();
        let comment = Object::try_from(input).unwrap();
        assert_eq!(comment.attachments[0].name, CONTENT_ATTACHMENT);
        assert_eq!(
            comment.attachments[0].contents,
            hashmap! { "en".to_string() => "nice".to_string() }
        );

        let input: CommentInput =
            serde_json::from_value(json!({ "contents": { "de": "toll" } })).unwrap();
        let comment = Object::try_from(input).unwrap();
        assert_eq!(comment.attachments[0].contents["de"], "toll");

        let input: CommentInput = serde_json::from_value(json!({})).unwrap();
        assert!(Object::try_from(input).is_err());
    }

    #[test]
    fn test_comment_payload() {
        let comment = Object {
            id: 5,
            object_id: 4,
            owner_id: 3,
            attachments: vec![Attachment::text(
                CONTENT_ATTACHMENT,
                hashmap! { "en".to_string() => "nice".to_string() },
            )],
            ..Object::default()
        };
        let v = serde_json::to_value(CommentPayload::from(&comment)).unwrap();
        assert_eq!(v["id"], "5");
        assert_eq!(v["post_id"], "4");
        assert_eq!(v["user_id"], "3");
        assert_eq!(v["content"], "nice");
        assert!(v.get("private").is_none());
    }
}
