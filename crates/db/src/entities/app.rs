//! App entity: tenant containers.

use chrono::{DateTime, Utc};
use fanout_common::AppResult;
use serde::{Deserialize, Serialize};

use super::{Entity, Filter, Predicate, QueryOptions, SortKey, UniqueIndex, Window, invalid};

/// Namespace holding the apps table itself.
pub const APPS_NAMESPACE: &str = "tg";

/// A tenant. Everything an app owns lives in [`App::namespace`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    /// Token of server-to-server integrations (44 chars).
    pub backend_token: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub in_production: bool,
    pub name: String,
    pub org_id: u64,
    #[serde(default)]
    pub public_id: String,
    #[serde(default)]
    pub public_org_id: String,
    /// Token of end-user integrations (32 chars).
    pub token: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

impl App {
    /// Namespace isolating the data of this app.
    #[must_use]
    pub fn namespace(&self) -> String {
        format!("app_{}_{}", self.org_id, self.id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppQuery {
    #[serde(skip)]
    pub before: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub limit: Option<usize>,
    pub backend_tokens: Vec<String>,
    pub enabled: Option<bool>,
    pub ids: Vec<u64>,
    pub in_production: Option<bool>,
    pub org_ids: Vec<u64>,
    pub public_ids: Vec<String>,
    pub tokens: Vec<String>,
}

impl QueryOptions for AppQuery {
    fn predicates(&self) -> Vec<Predicate> {
        Filter::new()
            .any("backend_token", &self.backend_tokens)
            .eq("enabled", self.enabled.as_ref())
            .any("id", &self.ids)
            .eq("in_production", self.in_production.as_ref())
            .any("org_id", &self.org_ids)
            .any("public_id", &self.public_ids)
            .any("token", &self.tokens)
            .build()
    }

    fn window(&self) -> Window {
        Window {
            before: self.before,
            after: None,
            limit: self.limit,
        }
    }
}

impl Entity for App {
    type Query = AppQuery;

    const TABLE: &'static str = "apps";
    const SORT: SortKey = SortKey::CreatedAt;
    const GENERATED_ID: bool = true;

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn lookup(&self) -> Option<AppQuery> {
        (self.id != 0).then(|| AppQuery {
            ids: vec![self.id],
            ..AppQuery::default()
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
        if !(2..=40).contains(&self.name.chars().count()) {
            return Err(invalid("name must be between 2 and 40 characters"));
        }
        if self.org_id == 0 {
            return Err(invalid("org id must be set"));
        }
        if self.token.is_empty() || self.backend_token.is_empty() {
            return Err(invalid("tokens must be set"));
        }
        Ok(())
    }

    fn unique_keys(&self) -> Vec<String> {
        vec![
            format!("token:{}", self.token),
            format!("backend_token:{}", self.backend_token),
        ]
    }

    fn unique_indexes() -> &'static [UniqueIndex] {
        &[
            UniqueIndex {
                name: "token",
                columns: "(json_data->>'token')",
                condition: None,
            },
            UniqueIndex {
                name: "backend_token",
                columns: "(json_data->>'backend_token')",
                condition: None,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace() {
        let app = App {
            id: 12,
            org_id: 3,
            ..App::default()
        };
        assert_eq!(app.namespace(), "app_3_12");
    }

    #[test]
    fn test_validate_name() {
        let app = App {
            name: "x".into(),
            org_id: 1,
            token: "t".into(),
            backend_token: "b".into(),
            ..App::default()
        };
        assert!(app.validate().is_err());
        assert!(App { name: "demo".into(), ..app }.validate().is_ok());
    }
}
