//! Query parameters of list endpoints: limits, cursors, filters and the
//! paging block of list responses.

use std::collections::{BTreeMap, HashMap};

use axum::{
    extract::FromRequestParts,
    http::request::Parts,
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, SecondsFormat, Utc};
use fanout_db::entities::{EventQuery, ObjectQuery};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::response::{ApiError, ApiResult};

/// Page size used when the request names none.
pub const LIMIT_DEFAULT: usize = 25;
/// Largest page size served.
pub const LIMIT_MAX: usize = 50;

const KEY_AFTER: &str = "after";
const KEY_BEFORE: &str = "before";
const KEY_LIMIT: &str = "limit";
const KEY_WHERE: &str = "where";
const HEADER_FORWARDED_PROTO: &str = "x-forwarded-proto";
const HEADER_HOST: &str = "host";

/// Opaque cursor for a point in time.
#[must_use]
pub fn time_cursor(t: DateTime<Utc>) -> String {
    URL_SAFE_NO_PAD.encode(t.to_rfc3339_opts(SecondsFormat::Nanos, true))
}

fn decode_time_cursor(cursor: &str) -> ApiResult<DateTime<Utc>> {
    let raw = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|e| ApiError::bad_request(format!("cursor: {e}")))?;
    let text = String::from_utf8(raw).map_err(|e| ApiError::bad_request(format!("cursor: {e}")))?;
    DateTime::parse_from_rfc3339(&text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ApiError::bad_request(format!("cursor: {e}")))
}

/// Cursors of a page ordered newest first: the first item opens the page,
/// the last one closes it.
pub fn cursors<T>(items: &[T], at: impl Fn(&T) -> DateTime<Utc>) -> (String, String) {
    match (items.first(), items.last()) {
        (Some(first), Some(last)) => (time_cursor(at(first)), time_cursor(at(last))),
        _ => (String::new(), String::new()),
    }
}

/// Position of the news feed in both of its streams.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsCursor {
    /// Upper bound of the events stream.
    pub events: DateTime<Utc>,
    /// Upper bound of the posts stream.
    pub posts: DateTime<Utc>,
}

impl NewsCursor {
    /// Encoded form.
    #[must_use]
    pub fn encode(&self) -> String {
        // Two timestamps always serialize.
        serde_json::to_vec(self)
            .map(|raw| URL_SAFE_NO_PAD.encode(raw))
            .unwrap_or_default()
    }
}

#[derive(Debug, Default, Deserialize)]
struct Condition {
    #[serde(default)]
    eq: String,
    #[serde(default, rename = "in")]
    any: Option<Vec<String>>,
}

impl Condition {
    fn values(self) -> Option<Vec<String>> {
        match self.any {
            Some(any) => Some(any),
            None if !self.eq.is_empty() => Some(vec![self.eq]),
            None => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ObjectCondition {
    id: Option<Condition>,
    #[serde(rename = "type")]
    kind: Option<Condition>,
}

#[derive(Debug, Default, Deserialize)]
struct EventCondition {
    object: Option<ObjectCondition>,
    #[serde(rename = "type")]
    kind: Option<Condition>,
}

#[derive(Debug, Default, Deserialize)]
struct PostCondition {
    tags: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct PostWhere {
    post: Option<PostCondition>,
}

/// Location and query string of a list request.
#[derive(Debug, Clone)]
pub struct Page {
    scheme: &'static str,
    host: String,
    path: String,
    params: HashMap<String, String>,
}

impl<S> FromRequestParts<S> for Page
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let get = |name: &'static str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
        };

        let scheme = if get(HEADER_FORWARDED_PROTO) == "https" {
            "https"
        } else {
            "http"
        };
        let host = match get(HEADER_HOST) {
            "" => parts
                .uri
                .authority()
                .map(ToString::to_string)
                .unwrap_or_default(),
            host => host.to_string(),
        };
        let params = parts
            .uri
            .query()
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();

        Ok(Self {
            scheme,
            host,
            path: parts.uri.path().to_string(),
            params,
        })
    }
}

impl Page {
    /// Non-empty query parameter `key`.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    /// Requested page size, capped at [`LIMIT_MAX`].
    pub fn limit(&self) -> ApiResult<usize> {
        let Some(raw) = self.param(KEY_LIMIT) else {
            return Ok(LIMIT_DEFAULT);
        };
        let limit: usize = raw
            .parse()
            .map_err(|e| ApiError::bad_request(format!("limit: {e}")))?;
        Ok(limit.min(LIMIT_MAX))
    }

    /// Upper time bound from the `before` cursor, now when absent.
    pub fn before(&self) -> ApiResult<DateTime<Utc>> {
        self.param(KEY_BEFORE)
            .map_or_else(|| Ok(Utc::now()), decode_time_cursor)
    }

    /// Upper bounds of the news feed streams from the `before` cursor.
    pub fn news_before(&self) -> ApiResult<NewsCursor> {
        let Some(raw) = self.param(KEY_BEFORE) else {
            let now = Utc::now();
            return Ok(NewsCursor {
                events: now,
                posts: now,
            });
        };
        let doc = URL_SAFE_NO_PAD
            .decode(raw)
            .map_err(|e| ApiError::bad_request(format!("cursor: {e}")))?;
        serde_json::from_slice(&doc).map_err(|e| ApiError::bad_request(format!("cursor: {e}")))
    }

    /// Tags from a `{"post":{"tags":[…]}}` filter.
    pub fn post_tags(&self) -> ApiResult<Vec<String>> {
        let Some(raw) = self.param(KEY_WHERE) else {
            return Ok(Vec::new());
        };
        let filter: PostWhere = serde_json::from_str(raw)
            .map_err(|e| ApiError::bad_request(format!("error in where param: {e}")))?;
        Ok(filter.post.and_then(|p| p.tags).unwrap_or_default())
    }

    /// Object options bounded by the `before` cursor and limit, filtered by
    /// post tags.
    pub fn object_query(&self) -> ApiResult<ObjectQuery> {
        Ok(ObjectQuery {
            before: Some(self.before()?),
            limit: Some(self.limit()?),
            tags: self.post_tags()?,
            ..ObjectQuery::default()
        })
    }

    /// Event options from an `{"object":{"id":…,"type":…},"type":…}` filter.
    pub fn event_query(&self) -> ApiResult<EventQuery> {
        let mut opts = EventQuery::default();
        let Some(raw) = self.param(KEY_WHERE) else {
            return Ok(opts);
        };
        let cond: EventCondition = serde_json::from_str(raw)
            .map_err(|e| ApiError::bad_request(format!("error in where param: {e}")))?;

        if let Some(object) = cond.object {
            if let Some(ids) = object.id.and_then(Condition::values) {
                opts.external_object_ids = ids;
            }
            if let Some(types) = object.kind.and_then(Condition::values) {
                opts.external_object_types = types;
            }
        }
        if let Some(types) = cond.kind.and_then(Condition::values) {
            opts.types = types;
        }
        Ok(opts)
    }

    fn reference(&self, limit: usize, key: &str, cursor: &str) -> String {
        if cursor.is_empty() {
            return String::new();
        }

        let mut query = BTreeMap::new();
        if let Some(filter) = self.param(KEY_WHERE) {
            query.insert(KEY_WHERE, filter.to_string());
        }
        query.insert(KEY_LIMIT, limit.to_string());
        query.insert(key, cursor.to_string());

        let Ok(mut url) = Url::parse(&format!("{}://{}{}", self.scheme, self.host, self.path))
        else {
            return String::new();
        };
        url.query_pairs_mut().extend_pairs(query);
        url.to_string()
    }

    /// Paging block for a page bounded by `after` and `before`.
    #[must_use]
    pub fn pagination(&self, limit: usize, after: String, before: String) -> Pagination {
        Pagination {
            next: self.reference(limit, KEY_AFTER, &after),
            previous: self.reference(limit, KEY_BEFORE, &before),
            cursors: Cursors { after, before },
        }
    }
}

/// Cursor pair of a page.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Cursors {
    /// Cursor of the newest entry.
    pub after: String,
    /// Cursor of the oldest entry.
    pub before: String,
}

/// Paging block of list responses.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Pagination {
    /// Raw cursors of the page.
    pub cursors: Cursors,
    /// Link to the next, older, page.
    pub next: String,
    /// Link to the previous, newer, page.
    pub previous: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::http::Request;
    use chrono::TimeZone;

    use super::*;

    async fn page(uri: &str) -> Page {
        let (mut parts, ()) = Request::builder()
            .uri(uri)
            .header("Host", "api.example.com")
            .header("X-Forwarded-Proto", "https")
            .body(())
            .unwrap()
            .into_parts();
        Page::from_request_parts(&mut parts, &()).await.unwrap()
    }

    #[tokio::test]
    async fn test_limit() {
        assert_eq!(page("/0.4/posts").await.limit().unwrap(), 25);
        assert_eq!(page("/0.4/posts?limit=10").await.limit().unwrap(), 10);
        assert_eq!(page("/0.4/posts?limit=500").await.limit().unwrap(), 50);
        assert!(page("/0.4/posts?limit=ten").await.limit().is_err());
    }

    #[tokio::test]
    async fn test_time_cursor() {
        let t = Utc.with_ymd_and_hms(2016, 5, 4, 3, 2, 1).unwrap();
        let p = page(&format!("/0.4/me/feed/events?before={}", time_cursor(t))).await;
        assert_eq!(p.before().unwrap(), t);
        assert!(page("/0.4/me/feed/events?before=%%%").await.before().is_err());
    }

    #[tokio::test]
    async fn test_news_cursor() {
        let cursor = NewsCursor {
            events: Utc.with_ymd_and_hms(2016, 1, 1, 0, 0, 0).unwrap(),
            posts: Utc.with_ymd_and_hms(2016, 2, 1, 0, 0, 0).unwrap(),
        };
        let p = page(&format!("/0.4/me/feed?before={}", cursor.encode())).await;
        assert_eq!(p.news_before().unwrap(), cursor);
    }

    #[tokio::test]
    async fn test_event_where() {
        let filter = r#"{"object":{"id":{"eq":"a"},"type":{"in":["x","y"]}},"type":{"eq":"tg_like"}}"#;
        let uri = format!(
            "/0.4/me/feed/events?where={}",
            url::form_urlencoded::byte_serialize(filter.as_bytes()).collect::<String>()
        );
        let opts = page(&uri).await.event_query().unwrap();
        assert_eq!(opts.external_object_ids, vec!["a".to_string()]);
        assert_eq!(opts.external_object_types, vec!["x".to_string(), "y".to_string()]);
        assert_eq!(opts.types, vec!["tg_like".to_string()]);
    }

    #[tokio::test]
    async fn test_post_where() {
        let filter = r#"{"post":{"tags":["review"]}}"#;
        let uri = format!(
            "/0.4/posts?where={}",
            url::form_urlencoded::byte_serialize(filter.as_bytes()).collect::<String>()
        );
        assert_eq!(page(&uri).await.post_tags().unwrap(), vec!["review".to_string()]);
        assert!(page("/0.4/posts?where=nope").await.post_tags().is_err());
    }

    #[tokio::test]
    async fn test_pagination_links() {
        let p = page("/0.4/posts?limit=10").await;
        let paging = p.pagination(10, "a1".to_string(), String::new());
        assert_eq!(paging.next, "https://api.example.com/0.4/posts?after=a1&limit=10");
        assert_eq!(paging.previous, "");
        assert_eq!(paging.cursors.after, "a1");
    }

    #[test]
    fn test_cursors_of_page() {
        let t1 = Utc.with_ymd_and_hms(2016, 1, 2, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2016, 1, 1, 0, 0, 0).unwrap();
        let (after, before) = cursors(&[t1, t2], |t| *t);
        assert_eq!(after, time_cursor(t1));
        assert_eq!(before, time_cursor(t2));
        assert_eq!(cursors::<DateTime<Utc>>(&[], |t| *t), (String::new(), String::new()));
    }
}
