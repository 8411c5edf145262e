//! Postgres store: one JSONB document table per entity and namespace.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use fanout_common::{AppError, AppResult, IdGenerator};
use sea_orm::{
    ConnectionTrait, DatabaseBackend, DatabaseConnection, DbErr, QueryResult, SqlErr, Statement,
    Value,
};
use serde_json::json;
use tracing::{debug, info};

use super::{check_namespace, id_key, stamp};
use crate::entities::{Entity, Predicate, QueryOptions, scalar_text};
use crate::service::Service;

/// Postgres backed entity service.
pub struct PostgresStore<E: Entity> {
    db: Arc<DatabaseConnection>,
    ids: IdGenerator,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for PostgresStore<E> {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
            ids: self.ids.clone(),
            _entity: PhantomData,
        }
    }
}

/// Statement text plus positional values.
#[derive(Debug, Default)]
pub(crate) struct Sql {
    pub text: String,
    pub values: Vec<Value>,
}

impl Sql {
    fn bind(&mut self, v: impl Into<Value>) -> String {
        self.values.push(v.into());
        format!("${}", self.values.len())
    }

    fn statement(self) -> Statement {
        Statement::from_sql_and_values(DatabaseBackend::Postgres, self.text, self.values)
    }
}

/// `'{a,b}'` literal for a document path. Only plain segments are accepted.
fn json_path(path: &[String]) -> Option<String> {
    let plain = !path.is_empty()
        && path.iter().all(|seg| {
            !seg.is_empty()
                && seg
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        });
    plain.then(|| format!("'{{{}}}'", path.join(",")))
}

fn like_pattern(term: &str) -> String {
    let escaped = term
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn condition(p: &Predicate, sql: &mut Sql) -> String {
    const NEVER: &str = "FALSE";

    match p {
        Predicate::Eq(path, v) => match (json_path(path), scalar_text(v)) {
            (Some(jp), Some(text)) => format!("(json_data #>> {jp}) = {}", sql.bind(text)),
            _ => NEVER.to_string(),
        },
        Predicate::In(path, vs) => {
            let Some(jp) = json_path(path) else {
                return NEVER.to_string();
            };
            let params: Vec<String> = vs
                .iter()
                .filter_map(scalar_text)
                .map(|t| sql.bind(t))
                .collect();
            if params.is_empty() {
                return NEVER.to_string();
            }
            format!("(json_data #>> {jp}) IN ({})", params.join(", "))
        }
        Predicate::InFold(path, vs) => {
            let Some(jp) = json_path(path) else {
                return NEVER.to_string();
            };
            let params: Vec<String> = vs.iter().map(|t| sql.bind(t.to_lowercase())).collect();
            format!("lower(json_data #>> {jp}) IN ({})", params.join(", "))
        }
        Predicate::ContainsAll(path, vs) => match json_path(path) {
            Some(jp) => format!("(json_data #> {jp}) @> {}::jsonb", sql.bind(json!(vs))),
            None => NEVER.to_string(),
        },
        Predicate::Search(paths, term) => {
            let param = sql.bind(like_pattern(term));
            let alternatives: Vec<String> = paths
                .iter()
                .filter_map(|p| json_path(p))
                .map(|jp| format!("lower(json_data #>> {jp}) LIKE {param}"))
                .collect();
            if alternatives.is_empty() {
                NEVER.to_string()
            } else {
                format!("({})", alternatives.join(" OR "))
            }
        }
    }
}

/// `WHERE` clause for the predicates and window of `opts`.
fn where_clause<Q: QueryOptions>(opts: &Q, sort: &str, sql: &mut Sql) -> String {
    let mut conds: Vec<String> = opts
        .predicates()
        .iter()
        .map(|p| condition(p, sql))
        .collect();

    let window = opts.window();
    if let Some(before) = window.before {
        conds.push(format!(
            "(json_data->>'{sort}')::timestamptz < {}",
            sql.bind(before)
        ));
    }
    if let Some(after) = window.after {
        conds.push(format!(
            "(json_data->>'{sort}')::timestamptz > {}",
            sql.bind(after)
        ));
    }

    if conds.is_empty() {
        "TRUE".to_string()
    } else {
        conds.join(" AND ")
    }
}

pub(crate) fn select_sql<E: Entity>(ns: &str, opts: &E::Query) -> Sql {
    let sort = E::SORT.field();
    let mut sql = Sql::default();
    let cond = where_clause(opts, sort, &mut sql);
    sql.text = format!(
        "SELECT json_data FROM {ns}.{} WHERE {cond} ORDER BY (json_data->>'{sort}')::timestamptz DESC",
        E::TABLE
    );
    if let Some(limit) = opts.window().limit {
        sql.text.push_str(&format!(" LIMIT {limit}"));
    }
    sql
}

pub(crate) fn count_sql<E: Entity>(ns: &str, opts: &E::Query) -> Sql {
    let mut sql = Sql::default();
    let cond = where_clause(opts, E::SORT.field(), &mut sql);
    sql.text = format!("SELECT count(*) AS count FROM {ns}.{} WHERE {cond}", E::TABLE);
    sql
}

pub(crate) fn update_sql<E: Entity>(ns: &str, lookup: &E::Query, doc: serde_json::Value) -> Sql {
    let mut sql = Sql::default();
    let param = sql.bind(doc);
    let cond = where_clause(lookup, E::SORT.field(), &mut sql);
    sql.text = format!(
        "UPDATE {ns}.{} SET json_data = {param}::jsonb WHERE {cond}",
        E::TABLE
    );
    sql
}

pub(crate) fn insert_sql<E: Entity>(ns: &str, doc: serde_json::Value) -> Sql {
    let mut sql = Sql::default();
    let param = sql.bind(doc);
    sql.text = format!(
        "INSERT INTO {ns}.{} (json_data) VALUES ({param}::jsonb)",
        E::TABLE
    );
    sql
}

pub(crate) fn setup_sql<E: Entity>(ns: &str) -> Vec<String> {
    let table = E::TABLE;
    let mut stmts = vec![
        format!("CREATE SCHEMA IF NOT EXISTS {ns}"),
        format!("CREATE TABLE IF NOT EXISTS {ns}.{table} (json_data JSONB NOT NULL)"),
        format!(
            "CREATE INDEX IF NOT EXISTS {table}_lookup ON {ns}.{table} ((json_data->>'id'))"
        ),
    ];
    for idx in E::unique_indexes() {
        let mut stmt = format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {table}_{} ON {ns}.{table} ({})",
            idx.name, idx.columns
        );
        if let Some(cond) = idx.condition {
            stmt.push_str(&format!(" WHERE {cond}"));
        }
        stmts.push(stmt);
    }
    stmts
}

fn db_err(e: DbErr) -> AppError {
    match e.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(msg)) => AppError::NotUnique(msg),
        _ => AppError::Database(e.to_string()),
    }
}

/// Schema or table has not been provisioned yet.
fn is_missing_relation(e: &DbErr) -> bool {
    e.to_string().contains("does not exist")
}

fn decode<E: Entity>(row: &QueryResult) -> AppResult<E> {
    let doc: serde_json::Value = row.try_get("", "json_data").map_err(db_err)?;
    serde_json::from_value(doc)
        .map_err(|e| AppError::Database(format!("corrupt {} document: {e}", E::TABLE)))
}

impl<E: Entity> PostgresStore<E> {
    /// Create a store over `db` drawing ids from `ids`.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>, ids: IdGenerator) -> Self {
        Self {
            db,
            ids,
            _entity: PhantomData,
        }
    }

    async fn rows(&self, ns: &str, sql: Sql) -> AppResult<Vec<QueryResult>> {
        let stmt = sql.statement();
        match self.db.query_all(stmt.clone()).await {
            Err(e) if is_missing_relation(&e) => {
                self.setup(ns).await?;
                self.db.query_all(stmt).await.map_err(db_err)
            }
            r => r.map_err(db_err),
        }
    }

    async fn exec(&self, ns: &str, sql: Sql) -> AppResult<u64> {
        let stmt = sql.statement();
        let res = match self.db.execute(stmt.clone()).await {
            Err(e) if is_missing_relation(&e) => {
                self.setup(ns).await?;
                self.db.execute(stmt).await
            }
            r => r,
        };
        res.map(|r| r.rows_affected()).map_err(db_err)
    }

    async fn fetch(&self, ns: &str, opts: &E::Query) -> AppResult<Vec<E>> {
        self.rows(ns, select_sql::<E>(ns, opts))
            .await?
            .iter()
            .map(decode)
            .collect()
    }
}

#[async_trait]
impl<E: Entity> Service<E> for PostgresStore<E> {
    async fn put(&self, ns: &str, mut entity: E) -> AppResult<E> {
        check_namespace(ns)?;
        entity.validate()?;

        let lookup = entity.lookup();
        let existing = match &lookup {
            Some(q) => self.fetch(ns, q).await?.into_iter().next(),
            None => None,
        };
        if E::GENERATED_ID && lookup.is_some() && existing.is_none() {
            return Err(AppError::NotFound(format!("{} not found", E::TABLE)));
        }

        if let Some(parent) = entity.parent() {
            if self.count(ns, &parent).await? == 0 {
                return Err(AppError::InvalidEntity(format!(
                    "{}: missing reference: parent does not exist",
                    E::TABLE
                )));
            }
        }

        stamp(&mut entity, existing.as_ref());

        match (lookup, existing) {
            (Some(q), Some(_)) => {
                let doc = serde_json::to_value(&entity)?;
                self.exec(ns, update_sql::<E>(ns, &q, doc)).await?;
            }
            _ => {
                if E::GENERATED_ID {
                    entity.set_id(self.ids.next(&id_key::<E>(ns))?);
                }
                let doc = serde_json::to_value(&entity)?;
                self.exec(ns, insert_sql::<E>(ns, doc)).await?;
            }
        }

        Ok(entity)
    }

    async fn query(&self, ns: &str, opts: &E::Query) -> AppResult<Vec<E>> {
        check_namespace(ns)?;
        self.fetch(ns, opts).await
    }

    async fn count(&self, ns: &str, opts: &E::Query) -> AppResult<u64> {
        check_namespace(ns)?;
        let rows = self.rows(ns, count_sql::<E>(ns, opts)).await?;
        let n: i64 = match rows.first() {
            Some(row) => row.try_get("", "count").map_err(db_err)?,
            None => 0,
        };
        Ok(u64::try_from(n).unwrap_or_default())
    }

    async fn setup(&self, ns: &str) -> AppResult<()> {
        check_namespace(ns)?;
        for stmt in setup_sql::<E>(ns) {
            debug!(namespace = %ns, sql = %stmt, "Provisioning");
            self.db.execute_unprepared(&stmt).await.map_err(db_err)?;
        }
        info!(namespace = %ns, table = E::TABLE, "Provisioned table");
        Ok(())
    }

    async fn teardown(&self, ns: &str) -> AppResult<()> {
        check_namespace(ns)?;
        self.db
            .execute_unprepared(&format!("DROP TABLE IF EXISTS {ns}.{}", E::TABLE))
            .await
            .map_err(db_err)?;
        Ok(())
    }
}
