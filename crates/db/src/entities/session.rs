//! Session entity: bearer tokens binding a user to a device.

use chrono::{DateTime, Utc};
use fanout_common::AppResult;
use serde::{Deserialize, Serialize};

use super::{Entity, Filter, Predicate, QueryOptions, SortKey, UniqueIndex, invalid};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    pub device_id: String,
    #[serde(default)]
    pub enabled: bool,
    /// The bearer token.
    pub id: String,
    pub user_id: u64,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionQuery {
    pub device_ids: Vec<String>,
    pub enabled: Option<bool>,
    pub ids: Vec<String>,
    pub user_ids: Vec<u64>,
}

impl QueryOptions for SessionQuery {
    fn predicates(&self) -> Vec<Predicate> {
        Filter::new()
            .any("device_id", &self.device_ids)
            .eq("enabled", self.enabled.as_ref())
            .any("id", &self.ids)
            .any("user_id", &self.user_ids)
            .build()
    }
}

impl Entity for Session {
    type Query = SessionQuery;

    const TABLE: &'static str = "sessions";
    const SORT: SortKey = SortKey::CreatedAt;
    const GENERATED_ID: bool = false;

    fn lookup(&self) -> Option<SessionQuery> {
        Some(SessionQuery {
            ids: vec![self.id.clone()],
            ..SessionQuery::default()
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
        if self.id.is_empty() {
            return Err(invalid("id must be set"));
        }
        if self.device_id.is_empty() {
            return Err(invalid("device id must be set"));
        }
        if self.user_id == 0 {
            return Err(invalid("user id must be set"));
        }
        Ok(())
    }

    fn unique_keys(&self) -> Vec<String> {
        if !self.enabled {
            return Vec::new();
        }
        vec![format!("{}:{}", self.user_id, self.device_id)]
    }

    fn unique_indexes() -> &'static [UniqueIndex] {
        &[
            UniqueIndex {
                name: "id",
                columns: "(json_data->>'id')",
                condition: None,
            },
            UniqueIndex {
                name: "live",
                columns: "(json_data->>'user_id'), (json_data->>'device_id')",
                condition: Some("(json_data->>'enabled')::BOOLEAN = true"),
            },
        ]
    }
}
