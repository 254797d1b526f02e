#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Lead-generation pipeline: city-rotated discovery, website and email
//! enrichment, AI analysis, report building, and personalized outreach.
//!
//! The pipeline is a library consumed by [`agent::LeadGenerationAgent`],
//! which in turn is registered with [`agentops_runtime`] and fired by
//! [`agentops_scheduler`] or the internal facade's `run-now` endpoint. No
//! module here calls back into the scheduler or the runtime; the
//! dependency only runs the other way.

pub mod agent;
pub mod ai_analysis;
pub mod cities;
pub mod clients;
pub mod config;
pub mod db;
pub mod discover;
pub mod email_enrichment;
pub mod facade;
pub mod outputs;
pub mod outreach;
pub mod pipeline;
pub mod schedule_policy;
pub mod website_enrichment;

pub use db::PipelineDb;
pub use pipeline::run_pipeline;

/// Errors that can occur anywhere in the lead-generation pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A database query or statement failed.
    #[error("database error: {0}")]
    Database(#[from] switchy_database::DatabaseError),

    /// Connecting to the store or creating its schema failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// A row could not be converted to its typed shape.
    #[error("data conversion error: {message}")]
    Conversion { message: String },

    /// An outbound HTTP call failed.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// An AI provider call failed.
    #[error("ai error: {0}")]
    Ai(#[from] agentops_ai::AiError),

    /// Required configuration is missing or malformed; fatal for the
    /// calling stage.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// An operation succeeded in a business sense but produced nothing to
    /// do (no leads due, no provider configured); callers log and
    /// continue rather than treating this as a failure.
    #[error("{message}")]
    Empty { message: String },
}

pub(crate) fn conversion_error(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Conversion {
        message: e.to_string(),
    }
}
