use super::model::{LocalRecord, NaturalKey};
use crate::model::Owner;
use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, instrument};

pub type Pool = SqlitePool;

/// How long a writer waits for another connection's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    Ok(pool)
}

/// Normalize a file-backed SQLite URL to `sqlite://<path>?mode=rwc`, expanding
/// `~/` and creating the parent directory. Other URLs pass through.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }

    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let path = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path.to_string(),
    };
    if let Some(parent) = Path::new(&path).parent().filter(|p| !p.as_os_str().is_empty()) {
        let _ = std::fs::create_dir_all(parent);
    }

    match query {
        Some(q) => format!("sqlite://{}?{}", path, q),
        None => format!("sqlite://{}?mode=rwc", path),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Persistence collaborator used by the sync engine.
///
/// Table and column names come from static job definitions, never from
/// remote data.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert `records`, updating `update_columns` of rows that collide on
    /// `conflict_keys`. Returns the number of rows touched.
    async fn upsert(
        &self,
        table: &str,
        records: &[LocalRecord],
        conflict_keys: &[&str],
        update_columns: &[&str],
    ) -> Result<u64>;

    /// Delete rows owned by `owner` whose `key_columns` tuple is not in
    /// `known`, as one atomic write.
    async fn delete_missing(
        &self,
        table: &str,
        owner: &Owner,
        key_columns: &[&str],
        known: &HashSet<NaturalKey>,
    ) -> Result<u64>;

    async fn count(&self, table: &str, owner: &Owner) -> Result<i64>;
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn quote_list(idents: &[&str]) -> String {
    idents
        .iter()
        .map(|c| quote(c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

pub(crate) fn upsert_sql(
    table: &str,
    columns: &[&str],
    rows: usize,
    conflict_keys: &[&str],
    update_columns: &[&str],
) -> String {
    let row = format!("({})", placeholders(columns.len()));
    let values = vec![row.as_str(); rows].join(", ");
    let action = if update_columns.is_empty() {
        "DO NOTHING".to_string()
    } else {
        let sets = update_columns
            .iter()
            .map(|c| format!("{q} = excluded.{q}", q = quote(c)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("DO UPDATE SET {}", sets)
    };
    format!(
        "INSERT INTO {} ({}) VALUES {} ON CONFLICT ({}) {}",
        quote(table),
        quote_list(columns),
        values,
        quote_list(conflict_keys),
        action
    )
}

/// Single-statement reconcile. The known keys are bound as one JSON array of
/// key tuples, so the statement size does not grow with the remote
/// collection.
pub(crate) fn delete_missing_sql(table: &str, scope_column: &str, key_columns: &[&str]) -> String {
    let extracts = (0..key_columns.len())
        .map(|i| format!("json_extract(value, '$[{}]')", i))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "DELETE FROM {} WHERE {} = ? AND ({}) NOT IN (SELECT {} FROM json_each(?))",
        quote(table),
        quote(scope_column),
        quote_list(key_columns),
        extracts
    )
}

#[async_trait]
impl RecordStore for SqliteStore {
    #[instrument(skip_all, fields(table = %table, rows = records.len()))]
    async fn upsert(
        &self,
        table: &str,
        records: &[LocalRecord],
        conflict_keys: &[&str],
        update_columns: &[&str],
    ) -> Result<u64> {
        let Some(first) = records.first() else {
            return Ok(0);
        };
        let columns: Vec<&str> = first.column_names().collect();
        if let Some(pos) = records.iter().position(|r| !r.has_layout(&columns)) {
            bail!("record {} in {} batch has a different column layout", pos, table);
        }

        let sql = upsert_sql(table, &columns, records.len(), conflict_keys, update_columns);
        let mut query = sqlx::query(&sql);
        for record in records {
            for value in record.values() {
                query = value.bind_to(query);
            }
        }
        let affected = query.execute(&self.pool).await?.rows_affected();
        debug!(table, affected, "upserted chunk");
        Ok(affected)
    }

    #[instrument(skip_all, fields(table = %table, owner = %owner, known = known.len()))]
    async fn delete_missing(
        &self,
        table: &str,
        owner: &Owner,
        key_columns: &[&str],
        known: &HashSet<NaturalKey>,
    ) -> Result<u64> {
        if key_columns.is_empty() {
            bail!("{} has no key columns to reconcile on", table);
        }
        let sql = delete_missing_sql(table, owner.column(), key_columns);
        let known_json = serde_json::to_string(known)?;
        let deleted = sqlx::query(&sql)
            .bind(owner.id())
            .bind(known_json)
            .execute(&self.pool)
            .await?
            .rows_affected();
        debug!(deleted, "deleted stale rows");
        Ok(deleted)
    }

    #[instrument(skip_all, fields(table = %table, owner = %owner))]
    async fn count(&self, table: &str, owner: &Owner) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} = ?",
            quote(table),
            quote(owner.column())
        );
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(owner.id())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
