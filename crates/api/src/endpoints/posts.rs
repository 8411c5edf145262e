//! Post endpoints.

use axum::{Router, extract::State, response::Response, routing::get};
use fanout_core::PostFeed;
use fanout_db::entities::Object;

use crate::{
    extractors::{Caller, CurrentApp, CurrentUser, JsonBody, PathParams},
    paging::{Page, cursors},
    payload::{PostInput, PostPayload, PostsPayload},
    response::{ApiResult, created, no_content, ok},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/posts", get(list_all).post(create))
        .route("/posts/{id}", get(retrieve).put(update).delete(remove))
        .route("/me/posts", get(list_me))
        .route("/users/{id}/posts", get(list_user))
}

async fn create(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    Caller(origin): Caller,
    JsonBody(input): JsonBody<PostInput>,
) -> ApiResult<Response> {
    let post = state
        .core
        .post_create(&app, &origin, Object::try_from(input)?)
        .await?;
    Ok(created(&PostPayload::from(&post)))
}

async fn retrieve(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    PathParams(id): PathParams<u64>,
) -> ApiResult<Response> {
    let post = state.core.post_retrieve(&app, me.id, id).await?;
    Ok(ok(&PostPayload::from(&post)))
}

async fn update(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    Caller(origin): Caller,
    PathParams(id): PathParams<u64>,
    JsonBody(input): JsonBody<PostInput>,
) -> ApiResult<Response> {
    let post = state
        .core
        .post_update(&app, &origin, id, Object::try_from(input)?)
        .await?;
    Ok(ok(&PostPayload::from(&post)))
}

async fn remove(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    PathParams(id): PathParams<u64>,
) -> ApiResult<Response> {
    state.core.post_delete(&app, me.id, id).await?;
    Ok(no_content())
}

fn posts_response(page: &Page, limit: usize, feed: &PostFeed) -> Response {
    if feed.posts.is_empty() {
        return no_content();
    }
    let (after, before) = cursors(&feed.posts, |p| p.object.created_at);
    ok(&PostsPayload::new(
        page.pagination(limit, after, before),
        &feed.posts,
        &feed.user_map,
    ))
}

async fn list_all(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    page: Page,
) -> ApiResult<Response> {
    let opts = page.object_query()?;
    let feed = state.core.post_list_all(&app, me.id, &opts).await?;
    Ok(posts_response(&page, page.limit()?, &feed))
}

async fn list_me(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    page: Page,
) -> ApiResult<Response> {
    let opts = page.object_query()?;
    let feed = state.core.post_list_user(&app, me.id, me.id, &opts).await?;
    Ok(posts_response(&page, page.limit()?, &feed))
}

async fn list_user(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    PathParams(id): PathParams<u64>,
    page: Page,
) -> ApiResult<Response> {
    let opts = page.object_query()?;
    let feed = state.core.post_list_user(&app, me.id, id, &opts).await?;
    Ok(posts_response(&page, page.limit()?, &feed))
}
