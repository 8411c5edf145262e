//! Reaction endpoints: typed reactions on posts.

use std::collections::HashMap;

use axum::{Router, extract::State, response::Response, routing::get};
use fanout_core::ReactionFeed;
use fanout_db::entities::{ReactionQuery, ReactionType};
use serde::Serialize;

use crate::{
    extractors::{CurrentApp, CurrentUser, PathParams},
    paging::{Page, Pagination, cursors},
    payload::{PostPayload, ReactionPayload, UserPayload, post_map, user_map},
    response::{ApiError, ApiResult, created, no_content, ok},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/posts/{id}/reactions", get(list))
        .route(
            "/posts/{id}/reactions/{kind}",
            get(list_kind).post(create).delete(remove),
        )
}

fn parse_kind(raw: &str) -> ApiResult<ReactionType> {
    raw.parse()
        .map_err(|_| ApiError::bad_request("reaction type not supported"))
}

#[derive(Debug, Serialize)]
struct ReactionsPayload<'a> {
    paging: Pagination,
    post_map: HashMap<String, PostPayload<'a>>,
    post_map_count: usize,
    reactions: Vec<ReactionPayload>,
    reactions_count: usize,
    users: HashMap<String, UserPayload<'a>>,
    users_count: usize,
}

fn reactions_response(page: &Page, limit: usize, feed: &ReactionFeed) -> Response {
    if feed.reactions.is_empty() {
        return no_content();
    }
    let (after, before) = cursors(&feed.reactions, |r| r.created_at);
    ok(&ReactionsPayload {
        paging: page.pagination(limit, after, before),
        post_map: post_map(&feed.post_map),
        post_map_count: feed.post_map.len(),
        reactions: feed.reactions.iter().map(ReactionPayload::from).collect(),
        reactions_count: feed.reactions.len(),
        users: user_map(&feed.user_map),
        users_count: feed.user_map.len(),
    })
}

async fn create(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    PathParams((post_id, kind)): PathParams<(u64, String)>,
) -> ApiResult<Response> {
    let reaction = state
        .core
        .reaction_create(&app, me.id, post_id, parse_kind(&kind)?)
        .await?;
    Ok(created(&ReactionPayload::from(&reaction)))
}

async fn remove(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    PathParams((post_id, kind)): PathParams<(u64, String)>,
) -> ApiResult<Response> {
    state
        .core
        .reaction_delete(&app, me.id, post_id, parse_kind(&kind)?)
        .await?;
    Ok(no_content())
}

async fn list_types(
    state: &AppState,
    app: &fanout_db::entities::App,
    origin: u64,
    post_id: u64,
    types: Vec<ReactionType>,
    page: &Page,
) -> ApiResult<Response> {
    let limit = page.limit()?;
    let opts = ReactionQuery {
        before: Some(page.before()?),
        limit: Some(limit),
        types,
        ..ReactionQuery::default()
    };
    let feed = state
        .core
        .reaction_list_post(app, origin, post_id, &opts)
        .await?;
    Ok(reactions_response(page, limit, &feed))
}

async fn list(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    PathParams(post_id): PathParams<u64>,
    page: Page,
) -> ApiResult<Response> {
    list_types(&state, &app, me.id, post_id, Vec::new(), &page).await
}

async fn list_kind(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    PathParams((post_id, kind)): PathParams<(u64, String)>,
    page: Page,
) -> ApiResult<Response> {
    let kind = parse_kind(&kind)?;
    list_types(&state, &app, me.id, post_id, vec![kind], &page).await
}
