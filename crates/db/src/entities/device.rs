//! Device entity: push endpoints of a user.

use chrono::{DateTime, Utc};
use fanout_common::AppResult;
use serde::{Deserialize, Serialize};

use super::{Entity, Filter, Predicate, QueryOptions, SortKey, UniqueIndex, invalid, is_language_tag};

/// Push platform of a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Platform {
    IosSandbox,
    #[default]
    Ios,
    Android,
}

impl From<Platform> for u8 {
    fn from(p: Platform) -> Self {
        match p {
            Platform::IosSandbox => 1,
            Platform::Ios => 2,
            Platform::Android => 3,
        }
    }
}

impl TryFrom<u8> for Platform {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Self::IosSandbox),
            2 => Ok(Self::Ios),
            3 => Ok(Self::Android),
            other => Err(format!("platform '{other}' not supported")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    #[serde(default)]
    pub deleted: bool,
    pub device_id: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub endpoint_arn: String,
    #[serde(default)]
    pub id: u64,
    pub language: String,
    pub platform: Platform,
    pub token: String,
    pub user_id: u64,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceQuery {
    pub deleted: Option<bool>,
    pub device_ids: Vec<String>,
    pub disabled: Option<bool>,
    pub endpoint_arns: Vec<String>,
    pub ids: Vec<u64>,
    pub platforms: Vec<Platform>,
    pub user_ids: Vec<u64>,
}

impl QueryOptions for DeviceQuery {
    fn predicates(&self) -> Vec<Predicate> {
        Filter::new()
            .eq("deleted", self.deleted.as_ref())
            .any("device_id", &self.device_ids)
            .eq("disabled", self.disabled.as_ref())
            .any("endpoint_arn", &self.endpoint_arns)
            .any("id", &self.ids)
            .any("platform", &self.platforms)
            .any("user_id", &self.user_ids)
            .build()
    }
}

impl Entity for Device {
    type Query = DeviceQuery;

    const TABLE: &'static str = "devices";
    const SORT: SortKey = SortKey::CreatedAt;
    const GENERATED_ID: bool = true;

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn lookup(&self) -> Option<DeviceQuery> {
        (self.id != 0).then(|| DeviceQuery {
            ids: vec![self.id],
            ..DeviceQuery::default()
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
        if self.device_id.is_empty() {
            return Err(invalid("device id must be set"));
        }
        if !is_language_tag(&self.language) {
            return Err(invalid(format!("language invalid '{}'", self.language)));
        }
        if self.token.is_empty() {
            return Err(invalid("token must be set"));
        }
        if self.user_id == 0 {
            return Err(invalid("user id must be set"));
        }
        Ok(())
    }

    fn unique_keys(&self) -> Vec<String> {
        if self.deleted {
            return Vec::new();
        }
        vec![format!(
            "{}:{}:{}",
            self.user_id,
            u8::from(self.platform),
            self.device_id
        )]
    }

    fn unique_indexes() -> &'static [UniqueIndex] {
        &[UniqueIndex {
            name: "live",
            columns: "(json_data->>'user_id'), (json_data->>'platform'), (json_data->>'device_id')",
            condition: Some("(json_data->>'deleted')::BOOLEAN = false"),
        }]
    }
}
