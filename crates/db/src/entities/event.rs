//! Event entity: lightweight activity records such as likes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use fanout_common::AppResult;
use serde::{Deserialize, Serialize};

use super::{Entity, Filter, Predicate, QueryOptions, SortKey, Visibility, Window, invalid};

/// Like on an object.
pub const TYPE_LIKE: &str = "tg_like";
/// Follow edge, synthesised by feeds.
pub const TYPE_FOLLOW: &str = "tg_follow";
/// Friend edge, synthesised by feeds.
pub const TYPE_FRIEND: &str = "tg_friend";
/// Prefix of reaction events, followed by the reaction type.
pub const TYPE_REACTION_PREFIX: &str = "tg_reaction:";
/// Target type of user targets.
pub const TARGET_USER: &str = "tg_user";

/// Target of an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Target {
    /// A user target.
    #[must_use]
    pub fn user(id: u64) -> Self {
        Self {
            id: id.to_string(),
            kind: TARGET_USER.to_string(),
        }
    }
}

/// Object metadata attached to an event that refers to external content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalObject {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub display_names: HashMap<String, String>,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub id: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub language: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<ExternalObject>,
    #[serde(default)]
    pub object_id: u64,
    #[serde(default)]
    pub owned: bool,
    #[serde(default)]
    pub target: Option<Target>,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub user_id: u64,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventQuery {
    #[serde(skip)]
    pub after: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub before: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub external_object_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub external_object_types: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub object_ids: Vec<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owned: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub target_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub target_types: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub user_ids: Vec<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub visibilities: Vec<Visibility>,
}

impl EventQuery {
    /// Enabled first-party likes on `object_id`.
    #[must_use]
    pub fn likes_of(object_id: u64) -> Self {
        Self {
            enabled: Some(true),
            object_ids: vec![object_id],
            owned: Some(true),
            types: vec![TYPE_LIKE.to_string()],
            ..Self::default()
        }
    }
}

impl QueryOptions for EventQuery {
    fn predicates(&self) -> Vec<Predicate> {
        Filter::new()
            .eq("enabled", self.enabled.as_ref())
            .any("object.id", &self.external_object_ids)
            .any("object.type", &self.external_object_types)
            .any("id", &self.ids)
            .any("object_id", &self.object_ids)
            .eq("owned", self.owned.as_ref())
            .any("target.id", &self.target_ids)
            .any("target.type", &self.target_types)
            .any("type", &self.types)
            .any("user_id", &self.user_ids)
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

impl Entity for Event {
    type Query = EventQuery;

    const TABLE: &'static str = "events";
    const SORT: SortKey = SortKey::CreatedAt;
    const GENERATED_ID: bool = true;

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn lookup(&self) -> Option<EventQuery> {
        (self.id != 0).then(|| EventQuery {
            ids: vec![self.id],
            ..EventQuery::default()
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
        if self.kind.is_empty() {
            return Err(invalid("missing type"));
        }
        if self.user_id == 0 {
            return Err(invalid("missing owner"));
        }
        Ok(())
    }

    fn count_key(query: &EventQuery) -> Option<String> {
        match query.object_ids.as_slice() {
            [id] if *query == EventQuery::likes_of(*id) => {
                Some(format!("events.count.{TYPE_LIKE}.{id}"))
            }
            _ => None,
        }
    }

    fn affected_count_keys(&self) -> Vec<String> {
        if self.object_id == 0 {
            return Vec::new();
        }
        vec![format!("events.count.{}.{}", self.kind, self.object_id)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::matches;

    #[test]
    fn test_target_query() {
        let e = Event {
            enabled: true,
            kind: "signup".into(),
            user_id: 3,
            target: Some(Target::user(9)),
            ..Event::default()
        };
        let q = EventQuery {
            target_ids: vec!["9".into()],
            target_types: vec![TARGET_USER.into()],
            ..EventQuery::default()
        };
        assert!(matches(&e, &q));

        let untargeted = Event {
            target: None,
            ..e
        };
        assert!(!matches(&untargeted, &q));
    }

    #[test]
    fn test_like_count_key() {
        assert_eq!(
            Event::count_key(&EventQuery::likes_of(5)).as_deref(),
            Some("events.count.tg_like.5")
        );
        let mut q = EventQuery::likes_of(5);
        q.owned = None;
        assert!(Event::count_key(&q).is_none());
    }

    #[test]
    fn test_validate() {
        assert!(Event::default().validate().is_err());
        let e = Event {
            kind: TYPE_LIKE.into(),
            user_id: 1,
            ..Event::default()
        };
        assert!(e.validate().is_ok());
    }
}
