//! Reaction entity.

use chrono::{DateTime, Utc};
use fanout_common::AppResult;
use serde::{Deserialize, Serialize};

use super::{Entity, Filter, Predicate, QueryOptions, SortKey, UniqueIndex, Window, invalid};

/// Supported reaction types.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionType {
    #[default]
    Like,
    Love,
    Haha,
    Wow,
    Sad,
    Angry,
}

impl ReactionType {
    /// All types in wire order.
    pub const ALL: [Self; 6] = [
        Self::Like,
        Self::Love,
        Self::Haha,
        Self::Wow,
        Self::Sad,
        Self::Angry,
    ];

    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Love => "love",
            Self::Haha => "haha",
            Self::Wow => "wow",
            Self::Sad => "sad",
            Self::Angry => "angry",
        }
    }
}

impl std::str::FromStr for ReactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unsupported reaction type '{s}'"))
    }
}

/// Typed engagement of a user on an object. Toggling off sets `deleted`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub id: u64,
    pub object_id: u64,
    pub owner_id: u64,
    #[serde(rename = "type")]
    pub kind: ReactionType,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReactionQuery {
    #[serde(skip)]
    pub after: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub before: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<bool>,
    #[serde(skip)]
    pub ids: Vec<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub object_ids: Vec<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub owner_ids: Vec<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<ReactionType>,
}

impl ReactionQuery {
    /// Live reactions of one type on an object.
    #[must_use]
    pub fn live_of(object_id: u64, kind: ReactionType) -> Self {
        Self {
            deleted: Some(false),
            object_ids: vec![object_id],
            types: vec![kind],
            ..Self::default()
        }
    }
}

impl QueryOptions for ReactionQuery {
    fn predicates(&self) -> Vec<Predicate> {
        Filter::new()
            .eq("deleted", self.deleted.as_ref())
            .any("id", &self.ids)
            .any("object_id", &self.object_ids)
            .any("owner_id", &self.owner_ids)
            .any("type", &self.types)
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

impl Entity for Reaction {
    type Query = ReactionQuery;

    const TABLE: &'static str = "reactions";
    const SORT: SortKey = SortKey::UpdatedAt;
    const GENERATED_ID: bool = true;

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn lookup(&self) -> Option<ReactionQuery> {
        (self.id != 0).then(|| ReactionQuery {
            ids: vec![self.id],
            ..ReactionQuery::default()
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
        if self.object_id == 0 {
            return Err(invalid("missing object id"));
        }
        if self.owner_id == 0 {
            return Err(invalid("missing owner id"));
        }
        Ok(())
    }

    fn unique_keys(&self) -> Vec<String> {
        if self.deleted {
            return Vec::new();
        }
        vec![format!(
            "{}:{}:{}",
            self.owner_id,
            self.object_id,
            self.kind.as_str()
        )]
    }

    fn unique_indexes() -> &'static [UniqueIndex] {
        &[UniqueIndex {
            name: "live",
            columns: "(json_data->>'owner_id'), (json_data->>'object_id'), (json_data->>'type')",
            condition: Some("(json_data->>'deleted')::BOOLEAN = false"),
        }]
    }

    fn count_key(query: &ReactionQuery) -> Option<String> {
        match (query.object_ids.as_slice(), query.types.as_slice()) {
            ([id], [kind]) if *query == ReactionQuery::live_of(*id, *kind) => {
                Some(format!("reactions.count.{}.{id}", kind.as_str()))
            }
            _ => None,
        }
    }

    fn affected_count_keys(&self) -> Vec<String> {
        vec![format!(
            "reactions.count.{}.{}",
            self.kind.as_str(),
            self.object_id
        )]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_type_parse() {
        assert_eq!("haha".parse::<ReactionType>().unwrap(), ReactionType::Haha);
        assert!("meh".parse::<ReactionType>().is_err());
    }

    #[test]
    fn test_count_key_shape() {
        let q = ReactionQuery::live_of(11, ReactionType::Wow);
        assert_eq!(
            Reaction::count_key(&q).as_deref(),
            Some("reactions.count.wow.11")
        );

        let mut wider = q;
        wider.owner_ids = vec![1];
        assert!(Reaction::count_key(&wider).is_none());
    }

    #[test]
    fn test_unique_only_while_live() {
        let mut r = Reaction {
            object_id: 1,
            owner_id: 2,
            kind: ReactionType::Love,
            ..Reaction::default()
        };
        assert_eq!(r.unique_keys(), vec!["2:1:love"]);
        r.deleted = true;
        assert!(r.unique_keys().is_empty());
    }
}
