//! Object entity: the container for posts and comments.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use fanout_common::AppResult;
use serde::{Deserialize, Serialize};
use validator::ValidateUrl;

use super::{
    Entity, Filter, Predicate, QueryOptions, SortKey, Visibility, Window, invalid,
    is_language_tag,
};

/// Reserved type of posts.
pub const TYPE_POST: &str = "tg_post";
/// Reserved type of comments.
pub const TYPE_COMMENT: &str = "tg_comment";
/// Language used when content has no explicit tag.
pub const DEFAULT_LANGUAGE: &str = "en";

const MAX_ATTACHMENTS: usize = 5;
const MAX_TAGS: usize = 25;

/// Kind of attachment content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentType {
    /// Free text.
    #[default]
    Text,
    /// A URL per language.
    Url,
}

/// Named, localised piece of content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Content keyed by language tag.
    #[serde(default)]
    pub contents: HashMap<String, String>,
    /// Attachment name, e.g. `body`.
    pub name: String,
    /// Content kind.
    #[serde(rename = "type")]
    pub kind: AttachmentType,
}

impl Attachment {
    /// Text attachment.
    #[must_use]
    pub fn text(name: &str, contents: HashMap<String, String>) -> Self {
        Self {
            contents,
            name: name.to_string(),
            kind: AttachmentType::Text,
        }
    }

    fn validate(&self) -> AppResult<()> {
        if self.name.is_empty() {
            return Err(invalid("attachment name must be set"));
        }
        if self.contents.is_empty() {
            return Err(invalid("attachment contents can't be empty"));
        }

        for (tag, content) in &self.contents {
            if !is_language_tag(tag) {
                return Err(invalid(format!("invalid language tag '{tag}'")));
            }
            if content.is_empty() {
                return Err(invalid(format!("content missing for '{tag}'")));
            }
            if self.kind == AttachmentType::Url && !content.validate_url() {
                return Err(invalid(format!("invalid url for '{tag}'")));
            }
        }

        Ok(())
    }
}

/// Interaction switches on a post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restrictions {
    /// Comments disabled.
    #[serde(default)]
    pub comment: bool,
    /// Likes and reactions disabled.
    #[serde(default)]
    pub like: bool,
    /// Reporting disabled.
    #[serde(default)]
    pub report: bool,
}

/// Moderation state of an object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectState {
    #[default]
    Pending,
    Confirmed,
    Declined,
}

/// Fields only backend integrations may set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectPrivate {
    /// Moderation state.
    #[serde(default)]
    pub state: ObjectState,
    /// Whether the object is shown despite its state.
    #[serde(default)]
    pub visible: bool,
}

/// Generic content object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Object {
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub external_id: String,
    #[serde(default)]
    pub id: u64,
    /// Parent object, e.g. the post of a comment.
    #[serde(default)]
    pub object_id: u64,
    #[serde(default)]
    pub owned: bool,
    #[serde(default)]
    pub owner_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<ObjectPrivate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restrictions: Option<Restrictions>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub visibility: Visibility,
}

impl Object {
    /// Whether this object is a post.
    #[must_use]
    pub fn is_post(&self) -> bool {
        self.kind == TYPE_POST
    }

    /// Restrictions, defaulting to none.
    #[must_use]
    pub fn restrictions(&self) -> Restrictions {
        self.restrictions.unwrap_or_default()
    }
}

/// Query options for objects.
///
/// `deleted` defaults to `Some(false)`: only live objects are selected unless
/// the caller explicitly asks for any (`None`) or deleted ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectQuery {
    #[serde(skip)]
    pub after: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub before: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub limit: Option<usize>,
    pub deleted: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub external_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub object_ids: Vec<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub owner_ids: Vec<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owned: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub visibilities: Vec<Visibility>,
}

impl Default for ObjectQuery {
    fn default() -> Self {
        Self {
            after: None,
            before: None,
            limit: None,
            deleted: Some(false),
            external_ids: Vec::new(),
            ids: Vec::new(),
            object_ids: Vec::new(),
            owner_ids: Vec::new(),
            owned: None,
            tags: Vec::new(),
            types: Vec::new(),
            visibilities: Vec::new(),
        }
    }
}

impl ObjectQuery {
    /// Live first-party comments on `post_id`.
    #[must_use]
    pub fn comments_of(post_id: u64) -> Self {
        Self {
            object_ids: vec![post_id],
            owned: Some(true),
            types: vec![TYPE_COMMENT.to_string()],
            ..Self::default()
        }
    }
}

impl QueryOptions for ObjectQuery {
    fn predicates(&self) -> Vec<Predicate> {
        Filter::new()
            .eq("deleted", self.deleted.as_ref())
            .any("external_id", &self.external_ids)
            .any("id", &self.ids)
            .any("object_id", &self.object_ids)
            .any("owner_id", &self.owner_ids)
            .eq("owned", self.owned.as_ref())
            .contains_all("tags", &self.tags)
            .any("type", &self.types)
            .any("visibility", &self.visibilities)
            .build()
    }

    fn window(&self) -> Window {
        Window {
            before: self.before,
            after: self.after,
            limit: self.limit,
        }
    }
}

impl Entity for Object {
    type Query = ObjectQuery;

    const TABLE: &'static str = "objects";
    const SORT: SortKey = SortKey::CreatedAt;
    const GENERATED_ID: bool = true;

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn lookup(&self) -> Option<ObjectQuery> {
        (self.id != 0).then(|| ObjectQuery {
            ids: vec![self.id],
            deleted: None,
            ..ObjectQuery::default()
        })
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn set_timestamps(&mut self, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) {
        self.created_at = created_at;
        self.updated_at = updated_at;
    }

    fn validate(&self) -> AppResult<()> {
        if self.attachments.len() > MAX_ATTACHMENTS {
            return Err(invalid("too many attachments"));
        }
        for a in &self.attachments {
            a.validate()?;
        }
        if self.owner_id == 0 {
            return Err(invalid("missing owner"));
        }
        if self.tags.len() > MAX_TAGS {
            return Err(invalid("too many tags"));
        }
        if self.kind.is_empty() {
            return Err(invalid("missing type"));
        }
        Ok(())
    }

    fn parent(&self) -> Option<ObjectQuery> {
        (self.object_id != 0).then(|| ObjectQuery {
            ids: vec![self.object_id],
            deleted: None,
            ..ObjectQuery::default()
        })
    }

    fn count_key(query: &ObjectQuery) -> Option<String> {
        match query.object_ids.as_slice() {
            [id] if *query == ObjectQuery::comments_of(*id) => {
                Some(format!("objects.count.{TYPE_COMMENT}.{id}"))
            }
            _ => None,
        }
    }

    fn affected_count_keys(&self) -> Vec<String> {
        if self.object_id == 0 {
            return Vec::new();
        }
        vec![format!("objects.count.{}.{}", self.kind, self.object_id)]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entities::matches;
    use maplit::hashmap;

    fn post() -> Object {
        Object {
            owner_id: 1,
            kind: TYPE_POST.to_string(),
            owned: true,
            tags: vec!["a".into(), "b".into()],
            visibility: Visibility::Public,
            attachments: vec![Attachment::text(
                "body",
                hashmap! { "en".to_string() => "hello".to_string() },
            )],
            ..Object::default()
        }
    }

    #[test]
    fn test_validate() {
        assert!(post().validate().is_ok());

        let mut o = post();
        o.owner_id = 0;
        assert!(o.validate().is_err());

        let mut o = post();
        o.tags = (0..26).map(|i| i.to_string()).collect();
        assert!(o.validate().is_err());

        let mut o = post();
        o.attachments[0].contents = hashmap! { "not a tag".to_string() => "x".to_string() };
        assert!(o.validate().is_err());

        let mut o = post();
        o.attachments[0].kind = AttachmentType::Url;
        assert!(o.validate().is_err());
        o.attachments[0].contents =
            hashmap! { "en".to_string() => "https://example.com/a".to_string() };
        assert!(o.validate().is_ok());
    }

    #[test]
    fn test_default_query_excludes_deleted() {
        let mut o = post();
        assert!(matches(&o, &ObjectQuery::default()));
        o.deleted = true;
        assert!(!matches(&o, &ObjectQuery::default()));
        assert!(matches(&o, &ObjectQuery { deleted: None, ..ObjectQuery::default() }));
    }

    #[test]
    fn test_tags_contain_all() {
        let o = post();
        let q = ObjectQuery {
            tags: vec!["a".into()],
            ..ObjectQuery::default()
        };
        assert!(matches(&o, &q));
        let q = ObjectQuery {
            tags: vec!["a".into(), "z".into()],
            ..ObjectQuery::default()
        };
        assert!(!matches(&o, &q));
    }

    #[test]
    fn test_criteria_json_defaults_to_live() {
        let q: ObjectQuery = serde_json::from_str(r#"{"types":["tg_comment"]}"#).unwrap();
        assert_eq!(q.deleted, Some(false));
        assert_eq!(q.types, vec![TYPE_COMMENT.to_string()]);
    }

    #[test]
    fn test_comment_count_key() {
        assert_eq!(
            Object::count_key(&ObjectQuery::comments_of(7)).as_deref(),
            Some("objects.count.tg_comment.7")
        );
        assert!(Object::count_key(&ObjectQuery::default()).is_none());

        let comment = Object {
            object_id: 7,
            kind: TYPE_COMMENT.to_string(),
            ..post()
        };
        assert_eq!(comment.affected_count_keys(), vec!["objects.count.tg_comment.7"]);
    }
}
