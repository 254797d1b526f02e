#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Database connection and queries for the metrics collector.
//!
//! Uses `switchy_database` for parameterized queries against either an
//! embedded sqlite file or an external postgres server. Schema setup is a
//! set of idempotent `CREATE TABLE IF NOT EXISTS` statements run on open,
//! not a migration-file runner — see [`db::CollectorDb::ensure_schema`].

pub mod db;
pub mod queries;

pub use db::CollectorDb;

/// Errors that can occur during collector database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Database query error.
    #[error("Database error: {0}")]
    Database(#[from] switchy_database::DatabaseError),

    /// Connection setup error (bad `DATABASE_URL`, unreachable server, etc).
    #[error("Connection error: {0}")]
    Connection(String),

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}
