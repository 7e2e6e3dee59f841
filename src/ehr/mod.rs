//! Record store for the EMR backend.
//!
//! `EhrDatabase` owns the connection pool and the in-process patient cache.
//! Each clinical area adds its operations in its own submodule.

use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, instrument, warn};

use crate::db::{Database, Page, PageRequest};
use crate::error::StoreError;

pub mod ids;

mod accounts;
mod appointments;
mod audit;
mod consultation;
mod laboratory;
mod notifications;
mod nursing;
mod organization;
mod patients;
mod permissions;
mod pharmacy;
mod radiology;
mod reports;
mod visits;

pub use audit::AuditScope;

pub type StoreResult<T> = Result<T, StoreError>;

const CACHE_CHECK_KEY: &str = "health_check_marker";
const DATE_SCOPED_ATTEMPTS: u32 = 1000;

// Main EHR Database struct
#[derive(Clone)]
pub struct EhrDatabase {
    pool: SqlitePool,
    cache: Arc<DashMap<String, serde_json::Value>>,
}

impl EhrDatabase {
    pub fn new(database: &Database) -> Self {
        Self {
            pool: database.pool().clone(),
            cache: Arc::new(DashMap::new()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ===== Cache =====

    fn cache_get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let cached = self.cache.get(key)?;
        match serde_json::from_value(cached.value().clone()) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "Dropping undecodable cache entry");
                drop(cached);
                self.cache.remove(key);
                None
            }
        }
    }

    fn cache_put<T: Serialize>(&self, key: String, value: &T) {
        if let Ok(json) = serde_json::to_value(value) {
            self.cache.insert(key, json);
        }
    }

    fn cache_invalidate(&self, key: &str) {
        if self.cache.remove(key).is_some() {
            debug!(key, "Cache entry invalidated");
        }
    }

    // ===== Health =====

    #[instrument(skip(self))]
    pub async fn ping(&self) -> StoreResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    /// Writes a marker key and reads it back.
    pub fn cache_roundtrip(&self) -> bool {
        let marker = serde_json::Value::String(uuid::Uuid::new_v4().to_string());
        self.cache.insert(CACHE_CHECK_KEY.to_string(), marker.clone());
        let ok = self
            .cache
            .get(CACHE_CHECK_KEY)
            .map(|v| *v.value() == marker)
            .unwrap_or(false);
        self.cache.remove(CACHE_CHECK_KEY);
        ok
    }

    // ===== References =====

    /// Rejects a foreign key that points at no row, keyed by the request field.
    async fn ensure_exists(&self, table: &str, id: i64, field: &str) -> StoreResult<()> {
        let found: bool = sqlx::query_scalar(&format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE id = ?)"))
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        if found {
            Ok(())
        } else {
            Err(StoreError::field(field, format!("Invalid pk \"{id}\" - object does not exist.")))
        }
    }

    /// Rejects `value` when another row already holds it in `column`.
    async fn ensure_unique(
        &self,
        table: &str,
        column: &str,
        value: &str,
        except: Option<i64>,
        message: &str,
    ) -> StoreResult<()> {
        let taken: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS(SELECT 1 FROM {table} WHERE {column} = ? AND id <> ?)"
        ))
        .bind(value)
        .bind(except.unwrap_or(0))
        .fetch_one(&self.pool)
        .await?;
        if taken {
            Err(StoreError::field(column, message))
        } else {
            Ok(())
        }
    }

    // ===== Listing =====

    /// Runs a count and a page query over the same filtered `FROM ... WHERE ...` body.
    async fn fetch_page<T, F>(
        &self,
        select: &str,
        from_where: &str,
        push_filters: F,
        order_by: &str,
        request: PageRequest,
    ) -> StoreResult<Page<T>>
    where
        T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
        F: for<'q> Fn(&mut QueryBuilder<'q, Sqlite>),
    {
        let mut count_query = QueryBuilder::new(format!("SELECT COUNT(*) {from_where}"));
        push_filters(&mut count_query);
        let count: i64 = count_query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut query = QueryBuilder::new(format!("SELECT {select} {from_where}"));
        push_filters(&mut query);
        query.push(order_by);
        query.push(" LIMIT ").push_bind(request.limit());
        query.push(" OFFSET ").push_bind(request.offset());
        let rows = query.build_query_as::<T>().fetch_all(&self.pool).await?;

        Ok(Page::new(rows, count, request))
    }
}

/// Tries `candidate(0)`, `candidate(1)`, ... until one is free in `table.column`.
pub(crate) async fn allocate_unique<F>(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
    what: &'static str,
    limit: u32,
    candidate: F,
) -> StoreResult<String>
where
    F: Fn(u32) -> String,
{
    let sql = format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE {column} = ?)");
    for attempt in 0..limit {
        let id = candidate(attempt);
        let taken: bool = sqlx::query_scalar(&sql)
            .bind(&id)
            .fetch_one(&mut *conn)
            .await?;
        if !taken {
            return Ok(id);
        }
        debug!(what, id = %id, attempt, "Identifier taken, retrying");
    }
    warn!(what, limit, "Identifier allocation exhausted");
    Err(StoreError::IdExhausted(what))
}

/// `{prefix}-YYYYMMDD-NNNN` numbered after the identifiers already issued that day.
pub(crate) async fn allocate_date_scoped(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
    prefix: &str,
    date: NaiveDate,
    what: &'static str,
) -> StoreResult<String> {
    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table} WHERE {column} LIKE ?"))
        .bind(format!("{}%", ids::date_prefix(prefix, date)))
        .fetch_one(&mut *conn)
        .await?;
    allocate_unique(conn, table, column, what, DATE_SCOPED_ATTEMPTS, |n| {
        ids::date_scoped(prefix, date, count + 1 + i64::from(n), 4)
    })
    .await
}

/// Unwraps a mandatory create field or reports it as missing.
pub(crate) fn required<T>(value: Option<T>, field: &str) -> StoreResult<T> {
    value.ok_or_else(|| StoreError::field(field, "This field is required."))
}

/// Shared SQL display name for a user row aliased as `alias`.
pub(crate) fn user_name_sql(alias: &str) -> String {
    format!(
        "CASE WHEN TRIM({a}.first_name || ' ' || {a}.last_name) = '' THEN {a}.username \
         ELSE TRIM({a}.first_name || ' ' || {a}.last_name) END",
        a = alias
    )
}

/// As `user_name_sql`, but NULL when the joined user is missing.
pub(crate) fn optional_user_name_sql(alias: &str) -> String {
    format!("CASE WHEN {alias}.id IS NULL THEN NULL ELSE {} END", user_name_sql(alias))
}

/// Shared SQL display name for a patient row aliased as `alias`.
pub(crate) fn patient_name_sql(alias: &str) -> String {
    format!(
        "TRIM(CASE WHEN {a}.title <> '' THEN UPPER(SUBSTR({a}.title, 1, 1)) || SUBSTR({a}.title, 2) || ' ' ELSE '' END \
         || {a}.first_name || ' ' \
         || CASE WHEN {a}.middle_name <> '' THEN {a}.middle_name || ' ' ELSE '' END \
         || {a}.surname)",
        a = alias
    )
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Fresh migrated in-memory store.
    pub async fn store() -> EhrDatabase {
        let database = Database::connect_in_memory().await.unwrap();
        database.run_migrations().await.unwrap();
        EhrDatabase::new(&database)
    }
}
