//! User endpoints: sign up, sessions, profile and lookups.

use axum::{
    Router,
    extract::State,
    response::Response,
    routing::{delete, get, post},
};
use fanout_common::AppError;
use fanout_core::Integration;
use fanout_db::entities::{User, UserQuery};
use serde::Deserialize;

use crate::{
    extractors::{Caller, CurrentApp, CurrentUser, JsonBody, PathParams},
    paging::{Page, cursors},
    payload::{UserInput, UserPayload, UsersPayload},
    response::{ApiError, ApiResult, codes, created, no_content, ok},
    state::AppState,
};

/// Shortest accepted search term.
const SEARCH_TERM_MIN: usize = 3;

/// Routes reachable with an app token alone.
pub fn app_router() -> Router<AppState> {
    Router::new()
        .route("/users", post(create))
        .route("/me/login", post(login))
}

/// Routes acting for the current user.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/me", get(retrieve_me).put(update).delete(remove))
        .route("/me/logout", delete(logout))
        .route("/users/search", get(search))
        .route("/users/search/emails", post(search_emails))
        .route("/users/search/{platform}", post(search_platform))
        .route("/users/{id}", get(retrieve))
}

async fn create(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    Caller(origin): Caller,
    JsonBody(input): JsonBody<UserInput>,
) -> ApiResult<Response> {
    let user = state
        .core
        .user_create(&app, &origin, User::try_from(input)?)
        .await?;
    Ok(created(&UserPayload::from(&user)))
}

/// Credentials of a login. `username` matches either email or user name.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoginInput {
    email: String,
    password: String,
    user_name: String,
    username: String,
}

async fn login(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    Caller(origin): Caller,
    JsonBody(mut input): JsonBody<LoginInput>,
) -> ApiResult<Response> {
    if input.password.is_empty() {
        return Err(ApiError::bad_request("password must be set"));
    }
    if !input.username.is_empty() {
        input.email.clone_from(&input.username);
        input.user_name = input.username;
    }
    if input.email.is_empty() && input.user_name.is_empty() {
        return Err(ApiError::bad_request("email or user_name must be provided"));
    }

    let user = state
        .core
        .user_login(&app, &origin, &input.email, &input.user_name, &input.password)
        .await
        .map_err(|e| {
            if e.is_not_found() {
                ApiError::new(
                    codes::APP_NOT_FOUND,
                    AppError::Unauthorized("application user not found".to_string()),
                )
            } else {
                e.into()
            }
        })?;
    Ok(created(&UserPayload::from(&user)))
}

async fn logout(
    State(state): State<AppState>,
    CurrentApp(app, integration): CurrentApp,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Response> {
    if integration == Integration::Backend {
        return Ok(no_content());
    }
    state
        .core
        .user_logout(&app, user.id, &user.session_token)
        .await?;
    Ok(no_content())
}

async fn retrieve_me(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    Caller(origin): Caller,
) -> ApiResult<Response> {
    let user = state.core.user_retrieve(&app, &origin, me.id).await?;
    state.core.user_mark_read(&app, &me).await;
    Ok(ok(&UserPayload::from(&user)))
}

async fn update(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    Caller(origin): Caller,
    JsonBody(input): JsonBody<UserInput>,
) -> ApiResult<Response> {
    let user = state
        .core
        .user_update(&app, &origin, &me, User::try_from(input)?)
        .await?;
    Ok(ok(&UserPayload::from(&user)))
}

async fn remove(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
) -> ApiResult<Response> {
    state.core.user_delete(&app, me).await?;
    Ok(no_content())
}

async fn retrieve(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    Caller(origin): Caller,
    PathParams(id): PathParams<u64>,
) -> ApiResult<Response> {
    let user = state.core.user_retrieve(&app, &origin, id).await?;
    Ok(ok(&UserPayload::from(&user)))
}

fn user_query(page: &Page) -> ApiResult<UserQuery> {
    Ok(UserQuery {
        before: Some(page.before()?),
        limit: Some(page.limit()?),
        ..UserQuery::default()
    })
}

fn users_response(page: &Page, limit: usize, users: &[User]) -> Response {
    if users.is_empty() {
        return no_content();
    }
    let (after, before) = cursors(users, |u| u.created_at);
    ok(&UsersPayload::new(page.pagination(limit, after, before), users))
}

async fn search(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    page: Page,
) -> ApiResult<Response> {
    let term = page.param("q").unwrap_or_default();
    if term.chars().count() < SEARCH_TERM_MIN {
        return Err(ApiError::bad_request(format!(
            "query must be at least {SEARCH_TERM_MIN} characters"
        )));
    }

    let opts = user_query(&page)?;
    let users = state
        .core
        .user_search(&app, me.id, term, &opts)
        .await?;
    Ok(users_response(&page, page.limit()?, &users))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EmailsInput {
    emails: Vec<String>,
}

async fn search_emails(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    page: Page,
    JsonBody(input): JsonBody<EmailsInput>,
) -> ApiResult<Response> {
    if input.emails.is_empty() {
        return Ok(no_content());
    }

    let opts = user_query(&page)?;
    let users = state
        .core
        .user_list_by_emails(&app, me.id, input.emails, &opts)
        .await?;
    Ok(users_response(&page, page.limit()?, &users))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PlatformIdsInput {
    ids: Vec<String>,
}

async fn search_platform(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    PathParams(platform): PathParams<String>,
    page: Page,
    JsonBody(input): JsonBody<PlatformIdsInput>,
) -> ApiResult<Response> {
    if input.ids.is_empty() {
        return Ok(no_content());
    }

    let opts = user_query(&page)?;
    let users = state
        .core
        .user_list_by_platform_ids(&app, me.id, &platform, input.ids, &opts)
        .await?;
    Ok(users_response(&page, page.limit()?, &users))
}
