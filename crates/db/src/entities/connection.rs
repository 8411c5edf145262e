//! Connection entity: directed follow and friend edges between users.

use chrono::{DateTime, Utc};
use fanout_common::AppResult;
use serde::{Deserialize, Serialize};

use super::{Entity, Filter, Predicate, QueryOptions, SortKey, UniqueIndex, Window, invalid};

/// Kind of edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    /// Directional.
    #[default]
    Follow,
    /// Bidirectional, stored once.
    Friend,
}

impl ConnectionType {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Follow => "follow",
            Self::Friend => "friend",
        }
    }
}

impl std::str::FromStr for ConnectionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "follow" => Ok(Self::Follow),
            "friend" => Ok(Self::Friend),
            other => Err(format!("unsupported connection type '{other}'")),
        }
    }
}

/// Lifecycle of an edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Pending,
    Confirmed,
    Rejected,
}

impl ConnectionState {
    /// Whether an edge may move from `self` to `next`.
    #[must_use]
    pub const fn can_transition(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Confirmed | Self::Rejected) | (Self::Confirmed, Self::Rejected)
        )
    }
}

impl std::str::FromStr for ConnectionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("unsupported connection state '{other}'")),
        }
    }
}

/// Edge `(from_id, to_id, kind)`; at most one per triple.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "user_from_id")]
    pub from_id: u64,
    #[serde(default)]
    pub state: ConnectionState,
    #[serde(rename = "user_to_id")]
    pub to_id: u64,
    #[serde(rename = "type")]
    pub kind: ConnectionType,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

impl Connection {
    /// Whether the edge touches `user_id` on either end.
    #[must_use]
    pub const fn touches(&self, user_id: u64) -> bool {
        self.from_id == user_id || self.to_id == user_id
    }

    /// The end of the edge that is not `user_id`.
    #[must_use]
    pub const fn peer_of(&self, user_id: u64) -> u64 {
        if self.from_id == user_id {
            self.to_id
        } else {
            self.from_id
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionQuery {
    #[serde(skip)]
    pub after: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub before: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub from_ids: Vec<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub states: Vec<ConnectionState>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub to_ids: Vec<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<ConnectionType>,
}

impl QueryOptions for ConnectionQuery {
    fn predicates(&self) -> Vec<Predicate> {
        Filter::new()
            .eq("enabled", self.enabled.as_ref())
            .any("user_from_id", &self.from_ids)
            .any("state", &self.states)
            .any("user_to_id", &self.to_ids)
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

impl Entity for Connection {
    type Query = ConnectionQuery;

    const TABLE: &'static str = "connections";
    const SORT: SortKey = SortKey::UpdatedAt;
    const GENERATED_ID: bool = false;

    fn lookup(&self) -> Option<ConnectionQuery> {
        Some(ConnectionQuery {
            from_ids: vec![self.from_id],
            to_ids: vec![self.to_id],
            types: vec![self.kind],
            ..ConnectionQuery::default()
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
        if self.from_id == 0 {
            return Err(invalid("from id not set"));
        }
        if self.to_id == 0 {
            return Err(invalid("to id not set"));
        }
        if self.from_id == self.to_id {
            return Err(invalid("self-connection not allowed"));
        }
        Ok(())
    }

    fn unique_indexes() -> &'static [UniqueIndex] {
        &[UniqueIndex {
            name: "edge",
            columns: "(json_data->>'user_from_id'), (json_data->>'user_to_id'), (json_data->>'type')",
            condition: None,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::matches;

    #[test]
    fn test_transitions() {
        use ConnectionState::{Confirmed, Pending, Rejected};

        assert!(Pending.can_transition(Confirmed));
        assert!(Pending.can_transition(Rejected));
        assert!(Confirmed.can_transition(Rejected));
        assert!(!Confirmed.can_transition(Pending));
        assert!(!Rejected.can_transition(Confirmed));
        assert!(!Rejected.can_transition(Pending));
    }

    #[test]
    fn test_wire_names() {
        let c = Connection {
            from_id: 1,
            to_id: 2,
            kind: ConnectionType::Friend,
            state: ConnectionState::Confirmed,
            enabled: true,
            ..Connection::default()
        };
        let v = serde_json::to_value(&c).unwrap_or_default();
        assert_eq!(v["user_from_id"], 1);
        assert_eq!(v["type"], "friend");
        assert_eq!(v["state"], "confirmed");
    }

    #[test]
    fn test_query_matches_enum_selectors() {
        let c = Connection {
            from_id: 1,
            to_id: 2,
            kind: ConnectionType::Follow,
            state: ConnectionState::Confirmed,
            enabled: true,
            ..Connection::default()
        };
        let q = ConnectionQuery {
            enabled: Some(true),
            states: vec![ConnectionState::Confirmed],
            types: vec![ConnectionType::Follow],
            to_ids: vec![2],
            ..ConnectionQuery::default()
        };
        assert!(matches(&c, &q));
        assert!(!matches(
            &c,
            &ConnectionQuery {
                types: vec![ConnectionType::Friend],
                ..ConnectionQuery::default()
            }
        ));
    }

    #[test]
    fn test_peer() {
        let c = Connection {
            from_id: 1,
            to_id: 2,
            ..Connection::default()
        };
        assert_eq!(c.peer_of(1), 2);
        assert_eq!(c.peer_of(2), 1);
        assert!(c.touches(2));
        assert!(!c.touches(3));
    }
}
