//! Database connection and the placeholder-style adapter.
//!
//! Backend is selected by the shape of `DATABASE_URL`: a `postgres://` (or
//! `postgresql://`) URL connects to an external server; anything else (or
//! the variable being unset) is treated as a path to an embedded sqlite
//! file, created under a configurable temp directory if it doesn't exist.
//!
//! Query text in [`crate::queries`] is always written sqlite-style (`?`
//! placeholders). [`CollectorDb`] rewrites those into postgres's `$1, $2,
//! ...` style when talking to a postgres backend, so the query layer above
//! doesn't need to know which backend it's running against.

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use switchy_database::{Database, DatabaseValue, Row};
use switchy_database_connection::Credentials;

use crate::DbError;

const DEFAULT_SQLITE_FILE: &str = "collector.db";

/// A connected collector database, aware of which placeholder style its
/// backend expects.
#[derive(Clone)]
pub struct CollectorDb {
    db: Arc<dyn Database>,
    postgres: bool,
}

impl CollectorDb {
    #[must_use]
    pub const fn new(db: Arc<dyn Database>, postgres: bool) -> Self {
        Self { db, postgres }
    }

    /// Connects from the `DATABASE_URL` (or `SUPABASE_DB_URL`) environment
    /// variable, falling back to an embedded sqlite file under `TMP_DIR`
    /// when neither is set, then ensures the schema exists.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection cannot be established or the
    /// schema cannot be created.
    pub async fn connect_from_env() -> Result<Self, DbError> {
        let url = std::env::var("DATABASE_URL")
            .or_else(|_| std::env::var("SUPABASE_DB_URL"))
            .ok();

        let (db, postgres): (Box<dyn Database>, bool) = match url {
            Some(url) if is_postgres_url(&url) => (connect_postgres(&url).await?, true),
            Some(url) => (connect_sqlite(Path::new(&url)).await?, false),
            None => (connect_sqlite(&default_sqlite_path()).await?, false),
        };

        let store = Self::new(Arc::from(db), postgres);
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Creates the `agent_runs`, `agent_metrics`, and `agent_daily_summaries`
    /// tables if they don't already exist.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if any DDL statement fails.
    pub async fn ensure_schema(&self) -> Result<(), DbError> {
        self.db
            .exec_raw(
                "CREATE TABLE IF NOT EXISTS agent_runs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    agent_name TEXT NOT NULL,
                    status TEXT NOT NULL,
                    started_at TEXT NOT NULL,
                    finished_at TEXT,
                    error_message TEXT
                )",
            )
            .await?;

        self.db
            .exec_raw(
                "CREATE TABLE IF NOT EXISTS agent_metrics (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    run_id INTEGER NOT NULL REFERENCES agent_runs(id),
                    metric_name TEXT NOT NULL,
                    metric_value_number REAL,
                    metric_value_text TEXT
                )",
            )
            .await?;

        self.db
            .exec_raw(
                "CREATE TABLE IF NOT EXISTS agent_daily_summaries (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    agent_name TEXT NOT NULL,
                    summary_date TEXT NOT NULL,
                    run_count INTEGER NOT NULL DEFAULT 0,
                    success_count INTEGER NOT NULL DEFAULT 0,
                    failed_count INTEGER NOT NULL DEFAULT 0,
                    UNIQUE(agent_name, summary_date)
                )",
            )
            .await?;

        Ok(())
    }

    /// Rewrites `?` placeholders to `$1, $2, ...` when the backend is
    /// postgres; leaves the query untouched for sqlite.
    fn rewrite(&self, sql: &str) -> Cow<'_, str> {
        rewrite_placeholders(sql, self.postgres)
    }

    /// Runs a parameterized query, returning the matched rows.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub async fn query(&self, sql: &str, params: &[DatabaseValue]) -> Result<Vec<Row>, DbError> {
        let sql = self.rewrite(sql);
        Ok(self.db.query_raw_params(&sql, params).await?)
    }

    /// Runs a parameterized statement (insert/update/delete), returning the
    /// number of affected rows.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the statement fails.
    pub async fn exec(&self, sql: &str, params: &[DatabaseValue]) -> Result<u64, DbError> {
        let sql = self.rewrite(sql);
        Ok(self.db.exec_raw_params(&sql, params).await?)
    }
}

/// Rewrites `?` placeholders into `$1, $2, ...` form when `postgres` is
/// true; returns the input unchanged otherwise. Pulled out of
/// [`CollectorDb`] so it can be unit tested without a live connection.
fn rewrite_placeholders(sql: &str, postgres: bool) -> Cow<'_, str> {
    if !postgres {
        return Cow::Borrowed(sql);
    }
    let mut n = 0u32;
    let mut out = String::with_capacity(sql.len() + 8);
    for ch in sql.chars() {
        if ch == '?' {
            n += 1;
            out.push('$');
            out.push_str(&n.to_string());
        } else {
            out.push(ch);
        }
    }
    Cow::Owned(out)
}

fn is_postgres_url(url: &str) -> bool {
    url.starts_with("postgres://") || url.starts_with("postgresql://")
}

async fn connect_postgres(url: &str) -> Result<Box<dyn Database>, DbError> {
    let creds = Credentials::from_url(url).map_err(|e| DbError::Connection(e.to_string()))?;
    let db = switchy_database_connection::init_postgres_raw_native_tls(creds)
        .await
        .map_err(|e| DbError::Connection(e.to_string()))?;
    Ok(db)
}

async fn connect_sqlite(path: &Path) -> Result<Box<dyn Database>, DbError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DbError::Connection(format!("failed to create {parent:?}: {e}")))?;
        }
    }
    let db = switchy_database_connection::init_sqlite_rusqlite(Some(path))
        .await
        .map_err(|e| DbError::Connection(e.to_string()))?;
    // Write-ahead logging so reads never block writes; each operation still
    // opens/closes its own connection per the concurrency policy.
    db.exec_raw("PRAGMA journal_mode=WAL").await?;
    Ok(db)
}

fn default_sqlite_path() -> PathBuf {
    let dir = std::env::var("TMP_DIR").map_or_else(|_| std::env::temp_dir(), PathBuf::from);
    dir.join("agent-platform").join(DEFAULT_SQLITE_FILE)
}

#[cfg(test)]
mod tests {
    use super::rewrite_placeholders;

    #[test]
    fn leaves_sqlite_placeholders_untouched() {
        assert_eq!(
            rewrite_placeholders("SELECT * FROM t WHERE a = ? AND b = ?", false),
            "SELECT * FROM t WHERE a = ? AND b = ?"
        );
    }

    #[test]
    fn rewrites_placeholders_for_postgres() {
        assert_eq!(
            rewrite_placeholders("SELECT * FROM t WHERE a = ? AND b = ?", true),
            "SELECT * FROM t WHERE a = $1 AND b = $2"
        );
    }
}
