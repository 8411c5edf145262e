//! Feeds of the current user.

use std::collections::HashMap;

use axum::{Router, extract::State, response::Response, routing::get};
use fanout_core::Feed;
use fanout_db::entities::{EventQuery, ObjectQuery};
use serde::Serialize;

use crate::{
    extractors::{CurrentApp, CurrentUser},
    paging::{NewsCursor, Page, Pagination, cursors},
    payload::{EventPayload, PostPayload, PostsPayload, UserPayload, post_map, user_map},
    response::{ApiResult, no_content, ok},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/me/feed", get(news))
        .route("/me/feed/events", get(events))
        .route("/me/feed/notifications/self", get(notifications_self))
        .route("/me/feed/posts", get(posts))
}

#[derive(Debug, Serialize)]
struct EventsPayload<'a> {
    events: Vec<EventPayload<'a>>,
    events_count: usize,
    paging: Pagination,
    post_map: HashMap<String, PostPayload<'a>>,
    post_map_count: usize,
    users: HashMap<String, UserPayload<'a>>,
    users_count: usize,
}

#[derive(Debug, Serialize)]
struct NewsPayload<'a> {
    events: Vec<EventPayload<'a>>,
    events_count: usize,
    events_count_unread: usize,
    paging: Pagination,
    post_map: HashMap<String, PostPayload<'a>>,
    post_map_count: usize,
    posts: Vec<PostPayload<'a>>,
    posts_count: usize,
    posts_count_unread: usize,
    users: HashMap<String, UserPayload<'a>>,
    users_count: usize,
}

fn events_response(page: &Page, limit: usize, feed: &Feed) -> Response {
    if feed.events.is_empty() {
        return no_content();
    }
    let (after, before) = cursors(&feed.events, |e| e.created_at);
    ok(&EventsPayload {
        events: feed.events.iter().map(EventPayload::from).collect(),
        events_count: feed.events.len(),
        paging: page.pagination(limit, after, before),
        post_map: post_map(&feed.post_map),
        post_map_count: feed.post_map.len(),
        users: user_map(&feed.user_map),
        users_count: feed.user_map.len(),
    })
}

fn event_query(page: &Page) -> ApiResult<EventQuery> {
    let mut opts = page.event_query()?;
    opts.before = Some(page.before()?);
    opts.limit = Some(page.limit()?);
    Ok(opts)
}

async fn events(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    page: Page,
) -> ApiResult<Response> {
    let opts = event_query(&page)?;
    let feed = state.core.feed_events(&app, me.id, &opts).await?;
    Ok(events_response(&page, page.limit()?, &feed))
}

async fn notifications_self(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    page: Page,
) -> ApiResult<Response> {
    let opts = event_query(&page)?;
    let feed = state
        .core
        .feed_notifications_self(&app, me.id, &opts)
        .await?;
    Ok(events_response(&page, page.limit()?, &feed))
}

async fn posts(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    page: Page,
) -> ApiResult<Response> {
    let limit = page.limit()?;
    let opts = page.object_query()?;
    let feed = state.core.feed_posts(&app, me.id, &opts).await?;
    if feed.posts.is_empty() {
        return Ok(no_content());
    }
    let (after, before) = cursors(&feed.posts, |p| p.object.created_at);
    Ok(ok(&PostsPayload::new(
        page.pagination(limit, after, before),
        &feed.posts,
        &feed.user_map,
    )))
}

/// Cursor pair of a news page: the newest and the oldest position of both
/// streams. An empty stream keeps the bound it was queried with.
fn news_cursors(feed: &Feed, bound: NewsCursor) -> (String, String) {
    let newest = NewsCursor {
        events: feed.events.first().map_or(bound.events, |e| e.created_at),
        posts: feed.posts.first().map_or(bound.posts, |p| p.object.created_at),
    };
    let oldest = NewsCursor {
        events: feed.events.last().map_or(bound.events, |e| e.created_at),
        posts: feed.posts.last().map_or(bound.posts, |p| p.object.created_at),
    };
    (newest.encode(), oldest.encode())
}

async fn news(
    State(state): State<AppState>,
    CurrentApp(app, _): CurrentApp,
    CurrentUser(me): CurrentUser,
    page: Page,
) -> ApiResult<Response> {
    let limit = page.limit()?;
    let bound = page.news_before()?;

    let mut event_opts = page.event_query()?;
    event_opts.before = Some(bound.events);
    event_opts.limit = Some(limit);
    let post_opts = ObjectQuery {
        before: Some(bound.posts),
        limit: Some(limit),
        tags: page.post_tags()?,
        ..ObjectQuery::default()
    };

    let feed = state
        .core
        .feed_news(&app, me.id, &event_opts, &post_opts)
        .await?;
    if feed.events.is_empty() && feed.posts.is_empty() {
        return Ok(no_content());
    }

    let (after, before) = news_cursors(&feed, bound);
    Ok(ok(&NewsPayload {
        events: feed.events.iter().map(EventPayload::from).collect(),
        events_count: feed.events.len(),
        events_count_unread: feed
            .events
            .iter()
            .filter(|e| e.created_at > me.last_read)
            .count(),
        paging: page.pagination(limit, after, before),
        post_map: post_map(&feed.post_map),
        post_map_count: feed.post_map.len(),
        posts: feed.posts.iter().map(PostPayload::from).collect(),
        posts_count: feed.posts.len(),
        posts_count_unread: feed
            .posts
            .iter()
            .filter(|p| p.object.created_at > me.last_read)
            .count(),
        users: user_map(&feed.user_map),
        users_count: feed.user_map.len(),
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeZone, Utc};
    use fanout_db::entities::Event;

    use super::*;

    #[test]
    fn test_news_cursors_keep_bound_of_empty_stream() {
        let bound = NewsCursor {
            events: Utc.with_ymd_and_hms(2016, 3, 1, 0, 0, 0).unwrap(),
            posts: Utc.with_ymd_and_hms(2016, 3, 1, 0, 0, 0).unwrap(),
        };
        let newer = Utc.with_ymd_and_hms(2016, 2, 2, 0, 0, 0).unwrap();
        let older = Utc.with_ymd_and_hms(2016, 2, 1, 0, 0, 0).unwrap();
        let feed = Feed {
            events: vec![
                Event {
                    created_at: newer,
                    ..Event::default()
                },
                Event {
                    created_at: older,
                    ..Event::default()
                },
            ],
            ..Feed::default()
        };

        let (after, before) = news_cursors(&feed, bound);
        assert_eq!(
            after,
            NewsCursor {
                events: newer,
                posts: bound.posts
            }
            .encode()
        );
        assert_eq!(
            before,
            NewsCursor {
                events: older,
                posts: bound.posts
            }
            .encode()
        );
    }
}
