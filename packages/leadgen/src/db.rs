//! Database connection and schema for the lead-generation pipeline store.
//!
//! Backend selection mirrors the metrics collector's: `SUPABASE_DB_URL` (or
//! `DATABASE_URL` as a fallback) selects an external postgres server; its
//! absence falls back to an embedded sqlite file under a configurable temp
//! directory. See [`agentops_collector_db::db::CollectorDb`] for the sibling
//! implementation this one is grounded on.

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use switchy_database::{Database, DatabaseValue, Row};
use switchy_database_connection::Credentials;

use crate::PipelineError;

const DEFAULT_SQLITE_FILE: &str = "leadgen.db";

/// A connected pipeline database, aware of which placeholder style its
/// backend expects.
#[derive(Clone)]
pub struct PipelineDb {
    db: Arc<dyn Database>,
    postgres: bool,
}

impl PipelineDb {
    #[must_use]
    pub const fn new(db: Arc<dyn Database>, postgres: bool) -> Self {
        Self { db, postgres }
    }

    /// Connects from `SUPABASE_DB_URL` (falling back to `DATABASE_URL`),
    /// or an embedded sqlite file under `TMP_DIR` when neither is set,
    /// then ensures the schema exists and the city rotation is seeded.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the connection cannot be established
    /// or the schema cannot be created.
    pub async fn connect_from_env() -> Result<Self, PipelineError> {
        let url = std::env::var("SUPABASE_DB_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .ok();

        let (db, postgres): (Box<dyn Database>, bool) = match url {
            Some(url) if is_postgres_url(&url) => (connect_postgres(&url).await?, true),
            Some(url) => (connect_sqlite(Path::new(&url)).await?, false),
            None => (connect_sqlite(&default_sqlite_path()).await?, false),
        };

        let store = Self::new(Arc::from(db), postgres);
        store.ensure_schema().await?;
        crate::cities::seed_if_empty(&store).await?;
        Ok(store)
    }

    /// Creates the `leads`, `city_rotation`, `pipeline_runs`, and
    /// `outreach` tables if they don't already exist, and backfills the
    /// `outreach_sent` column added to `pipeline_runs` after v1.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if any DDL statement fails.
    pub async fn ensure_schema(&self) -> Result<(), PipelineError> {
        self.db
            .exec_raw(
                "CREATE TABLE IF NOT EXISTS leads (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    domain TEXT NOT NULL UNIQUE,
                    company_name TEXT,
                    website TEXT,
                    email TEXT,
                    email_source TEXT,
                    contact_name TEXT,
                    phone TEXT,
                    address TEXT,
                    scraped_text TEXT,
                    ai_summary TEXT,
                    automation_suggestions TEXT,
                    discovered_date TEXT NOT NULL,
                    sent_date TEXT,
                    status TEXT NOT NULL DEFAULT 'new'
                )",
            )
            .await?;

        self.db
            .exec_raw(
                "CREATE TABLE IF NOT EXISTS city_rotation (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    city_name TEXT NOT NULL,
                    country TEXT NOT NULL,
                    language TEXT NOT NULL,
                    last_searched TEXT,
                    search_count INTEGER NOT NULL DEFAULT 0,
                    UNIQUE(city_name, country)
                )",
            )
            .await?;

        self.db
            .exec_raw(
                "CREATE TABLE IF NOT EXISTS pipeline_runs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    run_date TEXT NOT NULL,
                    discovered INTEGER NOT NULL DEFAULT 0,
                    website_enriched INTEGER NOT NULL DEFAULT 0,
                    email_enriched INTEGER NOT NULL DEFAULT 0,
                    ai_analyzed INTEGER NOT NULL DEFAULT 0,
                    reports_sent INTEGER NOT NULL DEFAULT 0,
                    outreach_sent INTEGER,
                    errors TEXT NOT NULL DEFAULT '[]',
                    duration_seconds REAL NOT NULL DEFAULT 0
                )",
            )
            .await?;

        self.db
            .exec_raw(
                "CREATE TABLE IF NOT EXISTS outreach (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    lead_id INTEGER NOT NULL REFERENCES leads(id),
                    outreach_type TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    thread_id TEXT,
                    sent_at TEXT,
                    opened INTEGER NOT NULL DEFAULT 0,
                    clicked INTEGER NOT NULL DEFAULT 0,
                    replied INTEGER NOT NULL DEFAULT 0,
                    followup_sent INTEGER NOT NULL DEFAULT 0
                )",
            )
            .await?;

        // `outreach_sent` was added to `pipeline_runs` after v1; a store
        // created by an older version of this schema needs it backfilled.
        // `CREATE TABLE IF NOT EXISTS` above is a no-op against such a
        // store, so the column has to be added explicitly, tolerating the
        // "already exists" error from a store that already has it.
        let _ = self
            .db
            .exec_raw("ALTER TABLE pipeline_runs ADD COLUMN outreach_sent INTEGER")
            .await;

        Ok(())
    }

    fn rewrite(&self, sql: &str) -> Cow<'_, str> {
        rewrite_placeholders(sql, self.postgres)
    }

    /// Runs a parameterized query, returning the matched rows.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the query fails.
    pub async fn query(&self, sql: &str, params: &[DatabaseValue]) -> Result<Vec<Row>, PipelineError> {
        let sql = self.rewrite(sql);
        Ok(self.db.query_raw_params(&sql, params).await?)
    }

    /// Runs a parameterized statement, returning the number of affected rows.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the statement fails.
    pub async fn exec(&self, sql: &str, params: &[DatabaseValue]) -> Result<u64, PipelineError> {
        let sql = self.rewrite(sql);
        Ok(self.db.exec_raw_params(&sql, params).await?)
    }
}

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

async fn connect_postgres(url: &str) -> Result<Box<dyn Database>, PipelineError> {
    let creds = Credentials::from_url(url).map_err(|e| PipelineError::Connection(e.to_string()))?;
    let db = switchy_database_connection::init_postgres_raw_native_tls(creds)
        .await
        .map_err(|e| PipelineError::Connection(e.to_string()))?;
    Ok(db)
}

async fn connect_sqlite(path: &Path) -> Result<Box<dyn Database>, PipelineError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PipelineError::Connection(format!("failed to create {parent:?}: {e}")))?;
        }
    }
    let db = switchy_database_connection::init_sqlite_rusqlite(Some(path))
        .await
        .map_err(|e| PipelineError::Connection(e.to_string()))?;
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
            rewrite_placeholders("SELECT * FROM leads WHERE a = ?", false),
            "SELECT * FROM leads WHERE a = ?"
        );
    }

    #[test]
    fn rewrites_placeholders_for_postgres() {
        assert_eq!(
            rewrite_placeholders("SELECT * FROM leads WHERE a = ? AND b = ?", true),
            "SELECT * FROM leads WHERE a = $1 AND b = $2"
        );
    }
}
