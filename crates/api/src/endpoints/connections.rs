//! Connection endpoints: follow and friend edges of the current user.

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::Response,
    routing::{delete, get, post, put},
};
use chrono::{DateTime, Utc};
use fanout_common::AppError;
use fanout_core::services::connection::ConnectionFeed;
use fanout_db::entities::{
    App, Connection, ConnectionQuery, ConnectionState, ConnectionType, Entity, UserQuery,
};
use serde::{Deserialize, Serialize};

use crate::{
    extractors::{CurrentApp, CurrentUser, JsonBody, PathParams},
    paging::{Page, cursors},
    payload::{UserPayload, UsersPayload},
    response::{ApiError, ApiResult, json_response, no_content, ok},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/me/connections", put(update))
        .route("/me/connections/social", post(social))
        .route("/me/connections/{name}", get(by_state))
        .route("/me/connections/{name}/{to_id}", delete(remove))
        .route("/me/followers", get(followers_me))
        .route("/me/follows", get(followings_me))
        .route("/me/friends", get(friends_me))
        .route("/users/{id}/followers", get(followers))
        .route("/users/{id}/follows", get(followings))
        .route("/users/{id}/friends", get(friends))
}

#[derive(Debug, Serialize)]
struct ConnectionPayload {
    user_from_id: u64,
    user_from_id_string: String,
    user_to_id: u64,
    user_to_id_string: String,
    state: ConnectionState,
    #[serde(rename = "type")]
    kind: ConnectionType,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<&Connection> for ConnectionPayload {
    fn from(c: &Connection) -> Self {
        Self {
            user_from_id: c.from_id,
            user_from_id_string: c.from_id.to_string(),
            user_to_id: c.to_id,
            user_to_id_string: c.to_id.to_string(),
            state: c.state,
            kind: c.kind,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConnectionInput {
    #[serde(alias = "to_id")]
    user_to_id: u64,
    user_to_id_string: String,
    state: String,
    #[serde(rename = "type")]
    kind: String,
}

fn parse_state(raw: &str) -> ApiResult<ConnectionState> {
    raw.parse().map_err(ApiError::bad_request)
}

fn parse_kind(raw: &str) -> ApiResult<ConnectionType> {
    raw.parse().map_err(ApiError::bad_request)
}

/// Edge writes report invalid edges as malformed requests.
fn edge_error(e: AppError) -> ApiError {
    match e {
        AppError::InvalidEntity(msg) => AppError::BadRequest(msg).into(),
        other => other.into(),
    }
}

impl ConnectionInput {
    fn into_connection(self, from_id: u64) -> ApiResult<Connection> {
        let to_id = match (self.user_to_id, self.user_to_id_string.as_str()) {
            (0, "") => return Err(ApiError::bad_request("user_to_id must be set")),
            (0, raw) => raw
                .parse()
                .map_err(|e| ApiError::bad_request(format!("user_to_id_string: {e}")))?,
            (id, _) => id,
        };

        Ok(Connection {
            from_id,
            to_id,
            state: parse_state(&self.state)?,
            kind: parse_kind(&self.kind)?,
            ..Connection::default()
        })
    }
}

async fn update(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    JsonBody(input): JsonBody<ConnectionInput>,
) -> ApiResult<Response> {
    let edge = input.into_connection(me.id)?;
    edge.validate().map_err(edge_error)?;

    let edge = state
        .core
        .connection_update(&app, edge)
        .await
        .map_err(edge_error)?;
    // A fresh edge has not been touched since it was stored.
    let status = if edge.created_at == edge.updated_at {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok(json_response(status, &ConnectionPayload::from(&edge)))
}

async fn remove(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    PathParams((kind, to_id)): PathParams<(String, u64)>,
) -> ApiResult<Response> {
    let edge = Connection {
        from_id: me.id,
        to_id,
        state: ConnectionState::Pending,
        kind: parse_kind(&kind)?,
        ..Connection::default()
    };
    edge.validate().map_err(edge_error)?;
    state
        .core
        .connection_delete(&app, &edge)
        .await
        .map_err(edge_error)?;
    Ok(no_content())
}

#[derive(Debug, Serialize)]
struct StatePayload<'a> {
    incoming: Vec<ConnectionPayload>,
    incoming_connections_count: usize,
    outgoing: Vec<ConnectionPayload>,
    outgoing_connections_count: usize,
    users: Vec<UserPayload<'a>>,
    users_count: usize,
}

impl<'a> StatePayload<'a> {
    fn new(origin: u64, feed: &'a ConnectionFeed) -> Self {
        let (outgoing, incoming): (Vec<&Connection>, Vec<&Connection>) = feed
            .connections
            .iter()
            .partition(|c| c.from_id == origin);
        let users: Vec<UserPayload<'a>> =
            feed.user_map.values().map(UserPayload::from).collect();

        Self {
            incoming_connections_count: incoming.len(),
            incoming: incoming.into_iter().map(ConnectionPayload::from).collect(),
            outgoing_connections_count: outgoing.len(),
            outgoing: outgoing.into_iter().map(ConnectionPayload::from).collect(),
            users_count: users.len(),
            users,
        }
    }
}

fn connection_query(page: &Page) -> ApiResult<ConnectionQuery> {
    Ok(ConnectionQuery {
        before: Some(page.before()?),
        limit: Some(page.limit()?),
        ..ConnectionQuery::default()
    })
}

async fn by_state(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    PathParams(connection_state): PathParams<String>,
    page: Page,
) -> ApiResult<Response> {
    let opts = connection_query(&page)?;
    let feed = state
        .core
        .connection_by_state(&app, me.id, &connection_state, &opts)
        .await?;
    Ok(ok(&StatePayload::new(me.id, &feed)))
}

fn relations_response(page: &Page, limit: usize, feed: &ConnectionFeed) -> Response {
    if feed.users.is_empty() {
        return no_content();
    }
    let (after, before) = cursors(&feed.connections, |c| c.updated_at);
    ok(&UsersPayload::new(
        page.pagination(limit, after, before),
        &feed.users,
    ))
}

#[derive(Debug, Clone, Copy)]
enum Relation {
    Followers,
    Followings,
    Friends,
}

async fn relations(
    state: &AppState,
    app: &App,
    origin: u64,
    user_id: u64,
    relation: Relation,
    page: &Page,
) -> ApiResult<Response> {
    let opts = connection_query(page)?;
    let core = &state.core;
    let feed = match relation {
        Relation::Followers => core.connection_followers(app, origin, user_id, &opts).await?,
        Relation::Followings => core.connection_followings(app, origin, user_id, &opts).await?,
        Relation::Friends => core.connection_friends(app, origin, user_id, &opts).await?,
    };
    Ok(relations_response(page, page.limit()?, &feed))
}

async fn followers_me(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    page: Page,
) -> ApiResult<Response> {
    relations(&state, &app, me.id, me.id, Relation::Followers, &page).await
}

async fn followings_me(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    page: Page,
) -> ApiResult<Response> {
    relations(&state, &app, me.id, me.id, Relation::Followings, &page).await
}

async fn friends_me(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    page: Page,
) -> ApiResult<Response> {
    relations(&state, &app, me.id, me.id, Relation::Friends, &page).await
}

async fn followers(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    PathParams(id): PathParams<u64>,
    page: Page,
) -> ApiResult<Response> {
    relations(&state, &app, me.id, id, Relation::Followers, &page).await
}

async fn followings(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    PathParams(id): PathParams<u64>,
    page: Page,
) -> ApiResult<Response> {
    relations(&state, &app, me.id, id, Relation::Followings, &page).await
}

async fn friends(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    PathParams(id): PathParams<u64>,
    page: Page,
) -> ApiResult<Response> {
    relations(&state, &app, me.id, id, Relation::Friends, &page).await
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SocialInput {
    connection_ids: Vec<String>,
    platform: String,
    state: String,
    #[serde(rename = "type")]
    kind: String,
}

impl SocialInput {
    fn state(&self) -> ApiResult<ConnectionState> {
        if self.state.is_empty() {
            return Ok(ConnectionState::Confirmed);
        }
        self.state
            .parse()
            .map_err(|_| ApiError::bad_request(format!("invalid state {}", self.state)))
    }

    fn kind(&self) -> ApiResult<ConnectionType> {
        self.kind
            .parse()
            .map_err(|_| ApiError::bad_request(format!("invalid type {}", self.kind)))
    }
}

async fn social(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    page: Page,
    JsonBody(input): JsonBody<SocialInput>,
) -> ApiResult<Response> {
    let connection_state = input.state()?;
    let kind = input.kind()?;
    if input.connection_ids.is_empty() {
        return Ok(no_content());
    }

    let limit = page.limit()?;
    let opts = UserQuery {
        before: Some(page.before()?),
        limit: Some(limit),
        social_ids: [(input.platform, input.connection_ids)].into_iter().collect(),
        ..UserQuery::default()
    };
    let users = state
        .core
        .connection_create_social(&app, me.id, kind, connection_state, opts)
        .await?;
    if users.is_empty() {
        return Ok(no_content());
    }

    let (after, before) = cursors(&users, |u| u.created_at);
    Ok(ok(&UsersPayload::new(
        page.pagination(limit, after, before),
        &users,
    )))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn input(v: serde_json::Value) -> ConnectionInput {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_connection_input() {
        let edge = input(json!({ "user_to_id": 9, "state": "pending", "type": "friend" }))
            .into_connection(3)
            .unwrap();
        assert_eq!((edge.from_id, edge.to_id), (3, 9));
        assert_eq!(edge.kind, ConnectionType::Friend);

        let edge = input(json!({ "to_id": 9, "state": "confirmed", "type": "follow" }))
            .into_connection(3)
            .unwrap();
        assert_eq!(edge.to_id, 9);

        let edge = input(json!({ "user_to_id_string": "12", "state": "confirmed", "type": "follow" }))
            .into_connection(3)
            .unwrap();
        assert_eq!(edge.to_id, 12);
    }

    #[test]
    fn test_connection_input_rejections() {
        assert!(input(json!({ "state": "pending", "type": "follow" }))
            .into_connection(1)
            .is_err());
        assert!(input(json!({ "user_to_id": 2, "state": "maybe", "type": "follow" }))
            .into_connection(1)
            .is_err());
        assert!(input(json!({ "user_to_id": 2, "state": "pending", "type": "block" }))
            .into_connection(1)
            .is_err());
    }

    #[test]
    fn test_social_input_defaults() {
        let social: SocialInput =
            serde_json::from_value(json!({ "platform": "facebook", "type": "friend" })).unwrap();
        assert_eq!(social.state().unwrap(), ConnectionState::Confirmed);
        assert_eq!(social.kind().unwrap(), ConnectionType::Friend);

        let social: SocialInput = serde_json::from_value(json!({ "type": "like" })).unwrap();
        assert_eq!(
            social.kind().unwrap_err().error().to_string(),
            "bad request: invalid type like"
        );
    }

    #[test]
    fn test_state_payload_splits_directions() {
        let feed = ConnectionFeed {
            connections: vec![
                Connection {
                    from_id: 1,
                    to_id: 2,
                    ..Connection::default()
                },
                Connection {
                    from_id: 3,
                    to_id: 1,
                    ..Connection::default()
                },
                Connection {
                    from_id: 4,
                    to_id: 1,
                    ..Connection::default()
                },
            ],
            ..ConnectionFeed::default()
        };
        let v = serde_json::to_value(StatePayload::new(1, &feed)).unwrap();
        assert_eq!(v["outgoing_connections_count"], 1);
        assert_eq!(v["incoming_connections_count"], 2);
        assert_eq!(v["users_count"], 0);
    }
}
