//! Wire shapes shared by several endpoints.
//!
//! Ids of posts, comments and likes travel as strings; users and events carry
//! both the numeric id and an `_string` twin.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use fanout_common::AppError;
use fanout_core::{HasReacted, Post, PostCounts};
use fanout_db::entities::{
    Attachment, AttachmentType, Event, Reaction, Restrictions, User, Visibility,
    event::{ExternalObject, Target},
    object::{DEFAULT_LANGUAGE, ObjectPrivate},
    user::{Image, UserPrivate},
};
use serde::{Deserialize, Serialize};

use crate::paging::Pagination;
use crate::response::ApiError;

/// Most metadata entries a user may carry.
pub const METADATA_LIMIT: usize = 5;

/// A user as rendered to clients.
#[derive(Debug, Serialize)]
pub struct UserPayload<'a> {
    about: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    custom_id: &'a str,
    email: &'a str,
    first_name: &'a str,
    follower_count: u64,
    followed_count: u64,
    friend_count: u64,
    id: u64,
    id_string: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    images: &'a HashMap<String, Image>,
    is_follower: bool,
    is_followed: bool,
    is_friend: bool,
    last_name: &'a str,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    metadata: &'a HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    private: Option<&'a UserPrivate>,
    #[serde(skip_serializing_if = "str::is_empty")]
    session_token: &'a str,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    social_ids: &'a HashMap<String, String>,
    #[serde(skip_serializing_if = "str::is_empty")]
    url: &'a str,
    user_name: &'a str,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'a> From<&'a User> for UserPayload<'a> {
    fn from(u: &'a User) -> Self {
        Self {
            about: &u.about,
            custom_id: &u.custom_id,
            email: &u.email,
            first_name: &u.first_name,
            follower_count: u.follower_count,
            followed_count: u.following_count,
            friend_count: u.friend_count,
            id: u.id,
            id_string: u.id.to_string(),
            images: &u.images,
            is_follower: u.is_follower,
            is_followed: u.is_following,
            is_friend: u.is_friend,
            last_name: &u.last_name,
            metadata: &u.metadata,
            private: u.private.as_ref(),
            session_token: &u.session_token,
            social_ids: &u.social_ids,
            url: &u.url,
            user_name: &u.username,
            created_at: u.created_at,
            updated_at: u.updated_at,
        }
    }
}

/// Users keyed by their string id.
#[must_use]
pub fn user_map(users: &HashMap<u64, User>) -> HashMap<String, UserPayload<'_>> {
    users
        .iter()
        .map(|(id, u)| (id.to_string(), UserPayload::from(u)))
        .collect()
}

/// A page of users.
#[derive(Debug, Serialize)]
pub struct UsersPayload<'a> {
    paging: Pagination,
    users: Vec<UserPayload<'a>>,
    users_count: usize,
}

impl<'a> UsersPayload<'a> {
    /// Page of `users`.
    #[must_use]
    pub fn new(paging: Pagination, users: &'a [User]) -> Self {
        Self {
            paging,
            users: users.iter().map(UserPayload::from).collect(),
            users_count: users.len(),
        }
    }
}

/// A user profile sent by clients.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UserInput {
    about: String,
    custom_id: String,
    email: String,
    first_name: String,
    images: HashMap<String, Image>,
    last_name: String,
    metadata: HashMap<String, String>,
    password: String,
    private: Option<UserPrivate>,
    social_ids: HashMap<String, String>,
    url: String,
    user_name: String,
}

impl TryFrom<UserInput> for User {
    type Error = ApiError;

    fn try_from(f: UserInput) -> Result<Self, Self::Error> {
        if f.metadata.len() > METADATA_LIMIT {
            return Err(ApiError::bad_request(format!(
                "metadata fields limit of {METADATA_LIMIT} exceeded"
            )));
        }

        Ok(Self {
            about: f.about,
            custom_id: f.custom_id,
            email: f.email,
            first_name: f.first_name,
            images: f.images,
            last_name: f.last_name,
            metadata: f.metadata,
            password: f.password,
            private: f.private,
            social_ids: f.social_ids,
            url: f.url,
            username: f.user_name,
            ..Self::default()
        })
    }
}

/// An attachment as rendered to clients.
#[derive(Debug, Serialize)]
pub struct AttachmentPayload<'a> {
    content: &'a str,
    contents: &'a HashMap<String, String>,
    name: &'a str,
    #[serde(rename = "type")]
    kind: AttachmentType,
}

impl<'a> From<&'a Attachment> for AttachmentPayload<'a> {
    fn from(a: &'a Attachment) -> Self {
        Self {
            content: a
                .contents
                .get(DEFAULT_LANGUAGE)
                .map_or("", String::as_str),
            contents: &a.contents,
            name: &a.name,
            kind: a.kind,
        }
    }
}

/// Localized contents given either in full or as a default language string.
#[must_use]
pub fn contents_of(
    contents: Option<HashMap<String, String>>,
    content: String,
) -> Option<HashMap<String, String>> {
    match contents {
        Some(contents) => Some(contents),
        None if content.is_empty() => None,
        None => Some(HashMap::from([(DEFAULT_LANGUAGE.to_string(), content)])),
    }
}

/// An attachment sent by clients.
#[derive(Debug, Deserialize)]
pub struct AttachmentInput {
    #[serde(default)]
    content: String,
    #[serde(default)]
    contents: Option<HashMap<String, String>>,
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    kind: AttachmentType,
}

impl TryFrom<AttachmentInput> for Attachment {
    type Error = ApiError;

    fn try_from(f: AttachmentInput) -> Result<Self, Self::Error> {
        let contents = contents_of(f.contents, f.content)
            .ok_or_else(|| ApiError::bad_request("attachment content missing"))?;
        Ok(Self {
            contents,
            name: f.name,
            kind: f.kind,
        })
    }
}

/// A post as rendered to clients.
#[derive(Debug, Serialize)]
pub struct PostPayload<'a> {
    attachments: Vec<AttachmentPayload<'a>>,
    counts: PostCounts,
    created_at: DateTime<Utc>,
    has_reacted: HasReacted,
    id: String,
    is_liked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    restrictions: Option<&'a Restrictions>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    tags: &'a [String],
    updated_at: DateTime<Utc>,
    user_id: String,
    visibility: Visibility,
}

impl<'a> From<&'a Post> for PostPayload<'a> {
    fn from(p: &'a Post) -> Self {
        let o = &p.object;
        Self {
            attachments: o.attachments.iter().map(AttachmentPayload::from).collect(),
            counts: p.counts,
            created_at: o.created_at,
            has_reacted: p.has_reacted,
            id: o.id.to_string(),
            is_liked: p.is_liked,
            restrictions: o.restrictions.as_ref(),
            tags: &o.tags,
            updated_at: o.updated_at,
            user_id: o.owner_id.to_string(),
            visibility: o.visibility,
        }
    }
}

/// Posts keyed by their string id.
#[must_use]
pub fn post_map(posts: &HashMap<u64, Post>) -> HashMap<String, PostPayload<'_>> {
    posts
        .iter()
        .map(|(id, p)| (id.to_string(), PostPayload::from(p)))
        .collect()
}

/// A page of posts with their owners.
#[derive(Debug, Serialize)]
pub struct PostsPayload<'a> {
    paging: Pagination,
    posts: Vec<PostPayload<'a>>,
    posts_count: usize,
    users: HashMap<String, UserPayload<'a>>,
    users_count: usize,
}

impl<'a> PostsPayload<'a> {
    /// Page of `posts` with their owners.
    #[must_use]
    pub fn new(paging: Pagination, posts: &'a [Post], users: &'a HashMap<u64, User>) -> Self {
        Self {
            paging,
            posts: posts.iter().map(PostPayload::from).collect(),
            posts_count: posts.len(),
            users: user_map(users),
            users_count: users.len(),
        }
    }
}

/// A post sent by clients.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PostInput {
    /// Attachments in display order.
    pub attachments: Vec<AttachmentInput>,
    /// Backend-only moderation fields.
    pub private: Option<ObjectPrivate>,
    /// Interactions the owner disabled.
    pub restrictions: Option<Restrictions>,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Audience; required on create.
    pub visibility: Option<Visibility>,
}

impl TryFrom<PostInput> for fanout_db::entities::Object {
    type Error = ApiError;

    fn try_from(f: PostInput) -> Result<Self, Self::Error> {
        let attachments = f
            .attachments
            .into_iter()
            .map(Attachment::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let visibility = f
            .visibility
            .ok_or_else(|| AppError::InvalidEntity("visibility not supported".to_string()))?;

        Ok(Self {
            attachments,
            private: f.private,
            restrictions: f.restrictions,
            tags: f.tags,
            visibility,
            ..Self::default()
        })
    }
}

/// An event as rendered to clients.
#[derive(Debug, Serialize)]
pub struct EventPayload<'a> {
    id: u64,
    id_string: String,
    language: &'a str,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    metadata: &'a HashMap<String, String>,
    object: Option<&'a ExternalObject>,
    tg_object_id: String,
    owned: bool,
    post_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<&'a Target>,
    #[serde(rename = "type")]
    kind: &'a str,
    user_id: u64,
    user_id_string: String,
    visibility: Visibility,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'a> From<&'a Event> for EventPayload<'a> {
    fn from(e: &'a Event) -> Self {
        Self {
            id: e.id,
            id_string: e.id.to_string(),
            language: &e.language,
            metadata: &e.metadata,
            object: e.object.as_ref(),
            tg_object_id: e.object_id.to_string(),
            owned: e.owned,
            post_id: e.object_id.to_string(),
            target: e.target.as_ref(),
            kind: &e.kind,
            user_id: e.user_id,
            user_id_string: e.user_id.to_string(),
            visibility: e.visibility,
            created_at: e.created_at,
            updated_at: e.updated_at,
        }
    }
}

/// A like as rendered to clients.
#[derive(Debug, Serialize)]
pub struct LikePayload {
    id: String,
    post_id: String,
    user_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<&Event> for LikePayload {
    fn from(l: &Event) -> Self {
        Self {
            id: l.id.to_string(),
            post_id: l.object_id.to_string(),
            user_id: l.user_id.to_string(),
            created_at: l.created_at,
            updated_at: l.updated_at,
        }
    }
}

/// A reaction as rendered to clients.
#[derive(Debug, Serialize)]
pub struct ReactionPayload {
    id: String,
    post_id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    user_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<&Reaction> for ReactionPayload {
    fn from(r: &Reaction) -> Self {
        Self {
            id: r.id.to_string(),
            post_id: r.object_id.to_string(),
            kind: r.kind.as_str(),
            user_id: r.owner_id.to_string(),
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use fanout_db::entities::Object;
    use maplit::hashmap;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_user_payload_fields() {
        let user = User {
            id: 42,
            username: "ada".to_string(),
            following_count: 3,
            is_following: true,
            session_token: "tok".to_string(),
            password: "hash".to_string(),
            ..User::default()
        };
        let v = serde_json::to_value(UserPayload::from(&user)).unwrap();
        assert_eq!(v["id"], 42);
        assert_eq!(v["id_string"], "42");
        assert_eq!(v["user_name"], "ada");
        assert_eq!(v["followed_count"], 3);
        assert_eq!(v["is_followed"], true);
        assert_eq!(v["session_token"], "tok");
        assert!(v.get("password").is_none());
        assert!(v.get("custom_id").is_none());
    }

    #[test]
    fn test_user_input_metadata_limit() {
        let input: UserInput = serde_json::from_value(json!({
            "user_name": "ada",
            "metadata": { "a": "1", "b": "2", "c": "3", "d": "4", "e": "5", "f": "6" },
        }))
        .unwrap();
        assert!(User::try_from(input).is_err());

        let input: UserInput = serde_json::from_value(json!({ "user_name": "ada" })).unwrap();
        assert_eq!(User::try_from(input).unwrap().username, "ada");
    }

    #[test]
    fn test_post_input_content_shorthand() {
        let input: PostInput = serde_json::from_value(json!({
            "attachments": [{ "content": "hi", "name": "body", "type": "text" }],
            "tags": ["a"],
            "visibility": 30,
        }))
        .unwrap();
        let post = Object::try_from(input).unwrap();
        assert_eq!(
            post.attachments[0].contents,
            hashmap! { "en".to_string() => "hi".to_string() }
        );
        assert_eq!(post.visibility, Visibility::Public);
    }

    #[test]
    fn test_post_input_requires_content() {
        let input: PostInput = serde_json::from_value(json!({
            "attachments": [{ "name": "body", "type": "text" }],
            "visibility": 30,
        }))
        .unwrap();
        assert!(Object::try_from(input).is_err());
    }

    #[test]
    fn test_post_payload() {
        let post = Post::from(Object {
            id: 7,
            owner_id: 3,
            attachments: vec![Attachment::text(
                "body",
                hashmap! { "en".to_string() => "hello".to_string() },
            )],
            visibility: Visibility::Connection,
            ..Object::default()
        });
        let v = serde_json::to_value(PostPayload::from(&post)).unwrap();
        assert_eq!(v["id"], "7");
        assert_eq!(v["user_id"], "3");
        assert_eq!(v["visibility"], 20);
        assert_eq!(v["attachments"][0]["content"], "hello");
        assert_eq!(v["counts"]["comments"], 0);
        assert!(v.get("tags").is_none());
    }
}
