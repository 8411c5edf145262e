//! User entity.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use fanout_common::AppResult;
use serde::{Deserialize, Serialize};
use validator::{ValidateEmail, ValidateUrl};

use super::{Entity, Filter, Predicate, QueryOptions, SortKey, UniqueIndex, Window, invalid};

const MAX_METADATA: usize = 5;

/// Profile image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub url: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub width: u32,
}

/// Flags only backend integrations may set or read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPrivate {
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default)]
    pub verified: bool,
}

/// End user of an app.
///
/// Counts and relation flags are derived per request and never stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub about: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub custom_id: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub id: u64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub images: HashMap<String, Image>,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub last_read: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Hashed password.
    #[serde(default)]
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<UserPrivate>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub social_ids: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, rename = "user_name", skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,

    #[serde(skip)]
    pub follower_count: u64,
    #[serde(skip)]
    pub following_count: u64,
    #[serde(skip)]
    pub friend_count: u64,
    #[serde(skip)]
    pub is_follower: bool,
    #[serde(skip)]
    pub is_following: bool,
    #[serde(skip)]
    pub is_friend: bool,
    #[serde(skip)]
    pub session_token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserQuery {
    #[serde(skip)]
    pub after: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub before: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub limit: Option<usize>,
    pub custom_ids: Vec<String>,
    pub deleted: Option<bool>,
    pub emails: Vec<String>,
    pub enabled: Option<bool>,
    pub ids: Vec<u64>,
    /// Case-insensitive substring over names and email.
    pub search: Option<String>,
    /// Platform to external ids.
    pub social_ids: HashMap<String, Vec<String>>,
    pub usernames: Vec<String>,
}

impl QueryOptions for UserQuery {
    fn predicates(&self) -> Vec<Predicate> {
        let mut filter = Filter::new()
            .any("custom_id", &self.custom_ids)
            .eq("deleted", self.deleted.as_ref())
            .any_fold("email", &self.emails)
            .eq("enabled", self.enabled.as_ref())
            .any("id", &self.ids)
            .search(
                &["user_name", "first_name", "last_name", "email"],
                self.search.as_ref(),
            )
            .any_fold("user_name", &self.usernames);

        let mut platforms: Vec<_> = self.social_ids.iter().collect();
        platforms.sort_by_key(|(p, _)| p.as_str());
        for (platform, ids) in platforms {
            filter = filter.any_at(vec!["social_ids".to_string(), platform.clone()], ids);
        }

        filter.build()
    }

    fn window(&self) -> Window {
        Window {
            before: self.before,
            after: self.after,
            limit: self.limit,
        }
    }
}

impl Entity for User {
    type Query = UserQuery;

    const TABLE: &'static str = "users";
    const SORT: SortKey = SortKey::CreatedAt;
    const GENERATED_ID: bool = true;

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn lookup(&self) -> Option<UserQuery> {
        (self.id != 0).then(|| UserQuery {
            ids: vec![self.id],
            ..UserQuery::default()
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
        if self.email.is_empty() && self.username.is_empty() {
            return Err(invalid("email or username must be set"));
        }
        if !self.email.is_empty() && !self.email.validate_email() {
            return Err(invalid("invalid email address"));
        }
        if !self.username.is_empty() && !(2..=40).contains(&self.username.chars().count()) {
            return Err(invalid("username must be between 2 and 40 characters"));
        }
        for (field, value) in [("first", &self.first_name), ("last", &self.last_name)] {
            if value.chars().count() > 40 {
                return Err(invalid(format!(
                    "{field} name must be between 1 and 40 characters"
                )));
            }
        }
        if !self.url.is_empty() && !self.url.validate_url() {
            return Err(invalid("invalid url"));
        }
        if self.password.is_empty() {
            return Err(invalid("password must be set"));
        }
        if self.metadata.len() > MAX_METADATA {
            return Err(invalid("too many metadata entries"));
        }
        Ok(())
    }

    fn unique_keys(&self) -> Vec<String> {
        if !self.enabled || self.deleted {
            return Vec::new();
        }
        let mut keys = Vec::new();
        if !self.email.is_empty() {
            keys.push(format!("email:{}", self.email.to_lowercase()));
        }
        if !self.username.is_empty() {
            keys.push(format!("username:{}", self.username.to_lowercase()));
        }
        keys
    }

    fn unique_indexes() -> &'static [UniqueIndex] {
        &[
            UniqueIndex {
                name: "email",
                columns: "lower(json_data->>'email')",
                condition: Some(
                    "(json_data->>'enabled')::BOOLEAN = true AND (json_data->>'deleted')::BOOLEAN = false AND (json_data->>'email') <> ''",
                ),
            },
            UniqueIndex {
                name: "username",
                columns: "lower(json_data->>'user_name')",
                condition: Some(
                    "(json_data->>'enabled')::BOOLEAN = true AND (json_data->>'deleted')::BOOLEAN = false AND (json_data->>'user_name') <> ''",
                ),
            },
        ]
    }
}
