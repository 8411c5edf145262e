//! Like endpoints.

use std::collections::HashMap;

use axum::{Router, extract::State, response::Response, routing::get};
use fanout_core::LikeFeed;
use fanout_db::entities::EventQuery;
use serde::Serialize;

use crate::{
    extractors::{CurrentApp, CurrentUser, PathParams},
    paging::{Page, Pagination, cursors},
    payload::{LikePayload, PostPayload, UserPayload, post_map, user_map},
    response::{ApiResult, created, no_content, ok},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/posts/{id}/likes",
            get(list).post(create).delete(remove),
        )
        .route("/me/likes", get(list_me))
        .route("/users/{id}/likes", get(list_user))
}

#[derive(Debug, Serialize)]
struct LikesPayload<'a> {
    likes: Vec<LikePayload>,
    likes_count: usize,
    paging: Pagination,
    post_map: HashMap<String, PostPayload<'a>>,
    post_map_count: usize,
    users: HashMap<String, UserPayload<'a>>,
    users_count: usize,
}

fn likes_response(page: &Page, limit: usize, feed: &LikeFeed) -> Response {
    if feed.likes.is_empty() {
        return no_content();
    }
    let (after, before) = cursors(&feed.likes, |l| l.created_at);
    ok(&LikesPayload {
        likes: feed.likes.iter().map(LikePayload::from).collect(),
        likes_count: feed.likes.len(),
        paging: page.pagination(limit, after, before),
        post_map: post_map(&feed.post_map),
        post_map_count: feed.post_map.len(),
        users: user_map(&feed.user_map),
        users_count: feed.user_map.len(),
    })
}

fn like_query(page: &Page) -> ApiResult<EventQuery> {
    Ok(EventQuery {
        before: Some(page.before()?),
        limit: Some(page.limit()?),
        ..EventQuery::default()
    })
}

async fn create(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    PathParams(post_id): PathParams<u64>,
) -> ApiResult<Response> {
    let like = state.core.like_create(&app, me.id, post_id).await?;
    Ok(created(&LikePayload::from(&like)))
}

async fn remove(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    PathParams(post_id): PathParams<u64>,
) -> ApiResult<Response> {
    state.core.like_delete(&app, me.id, post_id).await?;
    Ok(no_content())
}

async fn list(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    PathParams(post_id): PathParams<u64>,
    page: Page,
) -> ApiResult<Response> {
    let opts = like_query(&page)?;
    let feed = state.core.like_list(&app, me.id, post_id, &opts).await?;
    Ok(likes_response(&page, page.limit()?, &feed))
}

async fn list_me(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    page: Page,
) -> ApiResult<Response> {
    let opts = like_query(&page)?;
    let feed = state.core.likes_user(&app, me.id, me.id, &opts).await?;
    Ok(likes_response(&page, page.limit()?, &feed))
}

async fn list_user(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    PathParams(user_id): PathParams<u64>,
    page: Page,
) -> ApiResult<Response> {
    let opts = like_query(&page)?;
    let feed = state.core.likes_user(&app, me.id, user_id, &opts).await?;
    Ok(likes_response(&page, page.limit()?, &feed))
}
