//! Domain entities stored per namespace.
//!
//! Every entity is persisted as a JSON document. Query options translate into
//! a list of [`Predicate`]s over document paths, which both the in-memory and
//! the Postgres stores evaluate.

#![allow(missing_docs)]

pub mod app;
pub mod connection;
pub mod device;
pub mod event;
pub mod object;
pub mod reaction;
pub mod rule;
pub mod session;
pub mod user;

use std::fmt::Debug;

use chrono::{DateTime, SubsecRound, Utc};
use fanout_common::{AppError, AppResult};
use regex::Regex;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

pub use app::{App, AppQuery};
pub use connection::{Connection, ConnectionQuery, ConnectionState, ConnectionType};
pub use device::{Device, DeviceQuery, Platform};
pub use event::{Event, EventQuery, Target};
pub use object::{Attachment, AttachmentType, Object, ObjectQuery, Restrictions};
pub use reaction::{Reaction, ReactionQuery, ReactionType};
pub use rule::{Criteria, CriteriaSet, Recipient, Rule, RuleKind, RuleQuery};
pub use session::{Session, SessionQuery};
pub use user::{User, UserQuery};

/// Current time truncated to the precision of the persistent store.
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

#[allow(clippy::expect_used)]
static LANGUAGE_TAG: std::sync::LazyLock<Regex> = std::sync::LazyLock::new(|| {
    Regex::new(r"^[A-Za-z]{2,3}(-[A-Za-z0-9]{2,8})*$").expect("valid language tag pattern")
});

/// Whether `tag` looks like a BCP-47 language tag.
#[must_use]
pub fn is_language_tag(tag: &str) -> bool {
    LANGUAGE_TAG.is_match(tag)
}

/// Audience of objects and events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Visibility {
    /// Only the owner.
    #[default]
    Private,
    /// Owner and their connections.
    Connection,
    /// Anyone who asks.
    Public,
    /// Pushed to everyone in the app.
    Global,
}

impl Visibility {
    /// Numeric wire representation.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Private => 10,
            Self::Connection => 20,
            Self::Public => 30,
            Self::Global => 40,
        }
    }
}

impl From<Visibility> for u8 {
    fn from(v: Visibility) -> Self {
        v.as_u8()
    }
}

impl TryFrom<u8> for Visibility {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            10 => Ok(Self::Private),
            20 => Ok(Self::Connection),
            30 => Ok(Self::Public),
            40 => Ok(Self::Global),
            other => Err(format!("unsupported visibility {other}")),
        }
    }
}

/// Time field an entity is ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    /// `created_at`
    CreatedAt,
    /// `updated_at`
    UpdatedAt,
}

impl SortKey {
    /// Document field name.
    #[must_use]
    pub const fn field(self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
        }
    }
}

/// Paging bounds shared by all queries. Both bounds are exclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Window {
    /// Strict upper bound on the sort key.
    pub before: Option<DateTime<Utc>>,
    /// Strict lower bound on the sort key.
    pub after: Option<DateTime<Utc>>,
    /// Maximum number of results; unbounded when absent.
    pub limit: Option<usize>,
}

impl Window {
    /// Whether `t` lies strictly inside the bounds.
    #[must_use]
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.before.is_none_or(|b| t < b) && self.after.is_none_or(|a| t > a)
    }
}

/// Unique index over document expressions, optionally partial.
#[derive(Debug, Clone, Copy)]
pub struct UniqueIndex {
    /// Suffix of the index name.
    pub name: &'static str,
    /// Indexed expressions.
    pub columns: &'static str,
    /// Condition of a partial index.
    pub condition: Option<&'static str>,
}

/// A document path like `["target", "id"]`.
pub type Path = Vec<String>;

/// A single constraint over a stored document. Scalars compare by their text
/// form, so `true`, `42` and `"42"` behave the same on both stores.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Field equals value.
    Eq(Path, Value),
    /// Field equals any of the values.
    In(Path, Vec<Value>),
    /// Case-insensitive `In` over strings.
    InFold(Path, Vec<String>),
    /// Array field contains every value.
    ContainsAll(Path, Vec<String>),
    /// Any of the fields contains the term, case-insensitively.
    Search(Vec<Path>, String),
}

/// Builder collecting predicates; absent or empty selectors add nothing.
#[derive(Debug, Default)]
pub struct Filter(Vec<Predicate>);

fn path(field: &str) -> Path {
    field.split('.').map(ToString::to_string).collect()
}

fn to_value<T: Serialize>(v: &T) -> Value {
    serde_json::to_value(v).unwrap_or_default()
}

impl Filter {
    /// Start an empty filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Equality on an optional selector.
    #[must_use]
    pub fn eq<T: Serialize>(mut self, field: &str, value: Option<&T>) -> Self {
        if let Some(v) = value {
            self.0.push(Predicate::Eq(path(field), to_value(v)));
        }
        self
    }

    /// Membership on a list selector.
    #[must_use]
    pub fn any<T: Serialize>(mut self, field: &str, values: &[T]) -> Self {
        if !values.is_empty() {
            self.0
                .push(Predicate::In(path(field), values.iter().map(to_value).collect()));
        }
        self
    }

    /// Membership on a nested path whose last segment is dynamic.
    #[must_use]
    pub fn any_at(mut self, segments: Path, values: &[String]) -> Self {
        if !values.is_empty() {
            self.0.push(Predicate::In(
                segments,
                values.iter().map(|v| Value::String(v.clone())).collect(),
            ));
        }
        self
    }

    /// Case-insensitive membership.
    #[must_use]
    pub fn any_fold(mut self, field: &str, values: &[String]) -> Self {
        if !values.is_empty() {
            self.0.push(Predicate::InFold(path(field), values.to_vec()));
        }
        self
    }

    /// Array contains all values.
    #[must_use]
    pub fn contains_all(mut self, field: &str, values: &[String]) -> Self {
        if !values.is_empty() {
            self.0.push(Predicate::ContainsAll(path(field), values.to_vec()));
        }
        self
    }

    /// Substring search over several fields.
    #[must_use]
    pub fn search(mut self, fields: &[&str], term: Option<&String>) -> Self {
        if let Some(term) = term.filter(|t| !t.is_empty()) {
            self.0.push(Predicate::Search(
                fields.iter().map(|f| path(f)).collect(),
                term.clone(),
            ));
        }
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> Vec<Predicate> {
        self.0
    }
}

/// Scalar text form used for comparisons.
#[must_use]
pub fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn lookup<'a>(doc: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(doc, |v, seg| v.get(seg))
}

impl Predicate {
    /// Evaluate against a serialized document.
    #[must_use]
    pub fn eval(&self, doc: &Value) -> bool {
        let text = |p: &Path| lookup(doc, p).and_then(scalar_text);
        match self {
            Self::Eq(p, v) => text(p).is_some_and(|t| Some(t) == scalar_text(v)),
            Self::In(p, vs) => text(p)
                .is_some_and(|t| vs.iter().any(|v| scalar_text(v).as_deref() == Some(&t))),
            Self::InFold(p, vs) => text(p).is_some_and(|t| {
                let t = t.to_lowercase();
                vs.iter().any(|v| v.to_lowercase() == t)
            }),
            Self::ContainsAll(p, vs) => match lookup(doc, p) {
                Some(Value::Array(items)) => vs
                    .iter()
                    .all(|v| items.iter().any(|i| i.as_str() == Some(v.as_str()))),
                _ => false,
            },
            Self::Search(ps, term) => {
                let term = term.to_lowercase();
                ps.iter()
                    .any(|p| text(p).is_some_and(|t| t.to_lowercase().contains(&term)))
            }
        }
    }
}

/// Query options of an entity.
pub trait QueryOptions:
    Clone + Debug + Default + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Constraints on the document, ANDed together.
    fn predicates(&self) -> Vec<Predicate>;

    /// Paging bounds.
    fn window(&self) -> Window {
        Window::default()
    }
}

/// A persisted domain value.
pub trait Entity:
    Clone + Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Query options selecting values of this entity.
    type Query: QueryOptions;

    /// Table name inside a namespace.
    const TABLE: &'static str;
    /// Field results are ordered by, descending.
    const SORT: SortKey;
    /// Whether the store assigns numeric ids on insert. Entities without
    /// generated ids are keyed by a natural key and upserted.
    const GENERATED_ID: bool;

    /// Assign a freshly generated id.
    fn set_id(&mut self, _id: u64) {}

    /// Options selecting exactly the stored row of this value, `None` when
    /// the value was never stored.
    fn lookup(&self) -> Option<Self::Query>;

    /// Creation time.
    fn created_at(&self) -> DateTime<Utc>;

    /// Last update time.
    fn updated_at(&self) -> DateTime<Utc>;

    /// Overwrite both timestamps.
    fn set_timestamps(&mut self, created_at: DateTime<Utc>, updated_at: DateTime<Utc>);

    /// Semantic validation.
    fn validate(&self) -> AppResult<()>;

    /// Sort key value.
    fn sort_time(&self) -> DateTime<Utc> {
        match Self::SORT {
            SortKey::CreatedAt => self.created_at(),
            SortKey::UpdatedAt => self.updated_at(),
        }
    }

    /// Keys that must be unique among live rows of the namespace.
    fn unique_keys(&self) -> Vec<String> {
        Vec::new()
    }

    /// Unique indexes of the persistent table.
    fn unique_indexes() -> &'static [UniqueIndex] {
        &[]
    }

    /// Options selecting the row of the same table this value references.
    fn parent(&self) -> Option<Self::Query> {
        None
    }

    /// Counts cache key answering `query`, if the query has a cached shape.
    fn count_key(_query: &Self::Query) -> Option<String> {
        None
    }

    /// Counts cache keys invalidated by writing this value.
    fn affected_count_keys(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Whether `entity` satisfies all selectors of `query` (paging ignored).
#[must_use]
pub fn matches<E: Entity>(entity: &E, query: &E::Query) -> bool {
    let doc = to_value(entity);
    query.predicates().iter().all(|p| p.eval(&doc))
}

pub(crate) fn invalid(msg: impl Into<String>) -> AppError {
    AppError::InvalidEntity(msg.into())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalars_compare_by_text() {
        let doc = json!({"id": 42, "enabled": true, "type": "tg_post"});
        assert!(Predicate::Eq(path("id"), json!(42)).eval(&doc));
        assert!(Predicate::Eq(path("enabled"), json!(true)).eval(&doc));
        assert!(!Predicate::Eq(path("enabled"), json!(false)).eval(&doc));
        assert!(Predicate::In(path("type"), vec![json!("a"), json!("tg_post")]).eval(&doc));
    }

    #[test]
    fn test_missing_path_never_matches() {
        let doc = json!({"target": null});
        assert!(!Predicate::Eq(path("target.id"), json!("1")).eval(&doc));
    }

    #[test]
    fn test_contains_all_and_fold() {
        let doc = json!({"tags": ["a", "b", "c"], "email": "Ada@X.y"});
        assert!(Predicate::ContainsAll(path("tags"), vec!["a".into(), "c".into()]).eval(&doc));
        assert!(!Predicate::ContainsAll(path("tags"), vec!["d".into()]).eval(&doc));
        assert!(Predicate::InFold(path("email"), vec!["ada@x.Y".into()]).eval(&doc));
    }

    #[test]
    fn test_visibility_wire_format() {
        assert_eq!(serde_json::to_string(&Visibility::Global).unwrap(), "40");
        assert_eq!(
            serde_json::from_str::<Visibility>("20").unwrap(),
            Visibility::Connection
        );
        assert!(serde_json::from_str::<Visibility>("25").is_err());
    }

    #[test]
    fn test_window_bounds_are_strict() {
        let t = now();
        let w = Window {
            before: Some(t),
            after: None,
            limit: None,
        };
        assert!(!w.contains(t));
        assert!(w.contains(t - chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_language_tags() {
        assert!(is_language_tag("en"));
        assert!(is_language_tag("de-DE"));
        assert!(is_language_tag("zh-Hant-TW"));
        assert!(!is_language_tag("english please"));
    }
}
