//! Rules: tenant-configured triggers evaluated against state changes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use fanout_common::AppResult;
use serde::{Deserialize, Serialize};

use super::{
    ConnectionQuery, Entity, EventQuery, Filter, ObjectQuery, Predicate, QueryOptions,
    ReactionQuery, SortKey, Window, invalid, matches,
};

/// Entity kind a rule reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    Connection,
    Event,
    Object,
    Reaction,
}

impl RuleKind {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Event => "event",
            Self::Object => "object",
            Self::Reaction => "reaction",
        }
    }
}

/// Pre- and post-image constraints. An absent side matches anything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(bound = "Q: QueryOptions")]
pub struct CriteriaSet<Q> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<Q>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Q>,
}

impl<Q: QueryOptions> CriteriaSet<Q> {
    /// Whether the change from `old` to `new` satisfies both sides.
    ///
    /// A creation only checks the new side. A change without a post-image
    /// only matches rules that leave the new side unconstrained.
    pub fn accepts<E: Entity<Query = Q>>(&self, old: Option<&E>, new: Option<&E>) -> bool {
        let side = |skeleton: &Option<Q>, e: &E| skeleton.as_ref().is_none_or(|q| matches(e, q));
        match (old, new) {
            (None, None) => false,
            (None, Some(n)) => side(&self.new, n),
            (Some(o), None) => self.new.is_none() && side(&self.old, o),
            (Some(o), Some(n)) => side(&self.old, o) && side(&self.new, n),
        }
    }
}

/// Criteria tagged by the entity kind they apply to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Criteria {
    Connection(CriteriaSet<ConnectionQuery>),
    Event(CriteriaSet<EventQuery>),
    Object(CriteriaSet<ObjectQuery>),
    Reaction(CriteriaSet<ReactionQuery>),
}

impl Default for Criteria {
    fn default() -> Self {
        Self::Object(CriteriaSet::default())
    }
}

impl Criteria {
    #[must_use]
    pub const fn kind(&self) -> RuleKind {
        match self {
            Self::Connection(_) => RuleKind::Connection,
            Self::Event(_) => RuleKind::Event,
            Self::Object(_) => RuleKind::Object,
            Self::Reaction(_) => RuleKind::Reaction,
        }
    }
}

/// Who receives the message and what it says.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    /// Condition name to query template, e.g. `parentOwner`.
    #[serde(default)]
    pub query: HashMap<String, String>,
    /// Language to message template.
    #[serde(default)]
    pub templates: HashMap<String, String>,
    pub urn: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default)]
    pub active: bool,
    pub criteria: Criteria,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub recipients: Vec<Recipient>,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    #[must_use]
    pub const fn kind(&self) -> RuleKind {
        self.criteria.kind()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<RuleKind>,
}

impl RuleQuery {
    /// Active, not deleted rules of `kind`.
    #[must_use]
    pub fn active_of(kind: RuleKind) -> Self {
        Self {
            active: Some(true),
            deleted: Some(false),
            kinds: vec![kind],
            ..Self::default()
        }
    }
}

impl QueryOptions for RuleQuery {
    fn predicates(&self) -> Vec<Predicate> {
        Filter::new()
            .eq("active", self.active.as_ref())
            .eq("deleted", self.deleted.as_ref())
            .any("id", &self.ids)
            .any("criteria.type", &self.kinds)
            .build()
    }

    fn window(&self) -> Window {
        Window::default()
    }
}

impl Entity for Rule {
    type Query = RuleQuery;

    const TABLE: &'static str = "rules";
    const SORT: SortKey = SortKey::CreatedAt;
    const GENERATED_ID: bool = true;

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn lookup(&self) -> Option<RuleQuery> {
        (self.id != 0).then(|| RuleQuery {
            ids: vec![self.id],
            ..RuleQuery::default()
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
        if self.name.trim().is_empty() {
            return Err(invalid("rule name must be set"));
        }
        if self.recipients.is_empty() {
            return Err(invalid("rule needs at least one recipient"));
        }
        for r in &self.recipients {
            if r.urn.is_empty() {
                return Err(invalid("recipient urn must be set"));
            }
            if r.query.is_empty() {
                return Err(invalid("recipient query must be set"));
            }
            if r.templates.is_empty() {
                return Err(invalid("recipient needs at least one template"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entities::{Connection, ConnectionState, ConnectionType, Object, object::TYPE_POST};
    use serde_json::json;

    fn edge(state: ConnectionState) -> Connection {
        Connection {
            enabled: true,
            from_id: 1,
            to_id: 2,
            kind: ConnectionType::Follow,
            state,
            ..Connection::default()
        }
    }

    #[test]
    fn test_criteria_wire_format() {
        let c: Criteria = serde_json::from_value(json!({
            "type": "connection",
            "new": {"states": ["confirmed"], "types": ["follow"]}
        }))
        .unwrap();
        assert_eq!(c.kind(), RuleKind::Connection);
        let Criteria::Connection(set) = c else {
            panic!("wrong variant");
        };
        assert!(set.old.is_none());
        assert_eq!(set.new.unwrap().states, vec![ConnectionState::Confirmed]);
    }

    #[test]
    fn test_accepts() {
        let set = CriteriaSet {
            new: Some(ConnectionQuery {
                states: vec![ConnectionState::Confirmed],
                ..ConnectionQuery::default()
            }),
            old: Some(ConnectionQuery {
                states: vec![ConnectionState::Pending],
                ..ConnectionQuery::default()
            }),
        };
        let pending = edge(ConnectionState::Pending);
        let confirmed = edge(ConnectionState::Confirmed);

        assert!(set.accepts(Some(&pending), Some(&confirmed)));
        assert!(!set.accepts(Some(&confirmed), Some(&confirmed)));
        assert!(set.accepts(None, Some(&confirmed)));
        assert!(!set.accepts::<Connection>(None, None));
        assert!(!set.accepts(Some(&pending), None));
    }

    #[test]
    fn test_empty_criteria_accept_any_change() {
        let set = CriteriaSet::<ObjectQuery>::default();
        let post = Object {
            kind: TYPE_POST.into(),
            owner_id: 1,
            ..Object::default()
        };
        assert!(set.accepts(None, Some(&post)));
        assert!(set.accepts(Some(&post), None));
    }

    #[test]
    fn test_query_by_kind() {
        let rule = Rule {
            active: true,
            criteria: Criteria::Reaction(CriteriaSet::default()),
            name: "r".into(),
            ..Rule::default()
        };
        assert!(matches(&rule, &RuleQuery::active_of(RuleKind::Reaction)));
        assert!(!matches(&rule, &RuleQuery::active_of(RuleKind::Event)));
    }

    #[test]
    fn test_validate_recipients() {
        let mut rule = Rule {
            name: "welcome".into(),
            ..Rule::default()
        };
        assert!(rule.validate().is_err());
        rule.recipients.push(Recipient {
            query: [("owner".to_string(), String::new())].into(),
            templates: [("en".to_string(), "hi".to_string())].into(),
            urn: "app://x".into(),
        });
        assert!(rule.validate().is_ok());
    }
}
