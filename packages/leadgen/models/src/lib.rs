#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Row and wire types for the lead-generation pipeline store.
//!
//! Kept separate from [`agentops_leadgen`]'s database access so the
//! facade's wire contract and any future consumer can depend on the plain
//! data shapes without pulling in `switchy_database`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Where a lead's email address came from.
///
/// `Apollo` and `None` both mean "matched via Apollo" — a match that
/// returned no email is recorded as `None` rather than suppressed, so it
/// stays eligible for a later free-tier enrichment attempt. See
/// [`EmailSource::is_unverified`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailSource {
    Apollo,
    WebsiteScrape,
    SerperSearch,
    SmtpVerified,
    PatternGuess,
    None,
}

impl EmailSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Apollo => "apollo",
            Self::WebsiteScrape => "website_scrape",
            Self::SerperSearch => "serper_search",
            Self::SmtpVerified => "smtp_verified",
            Self::PatternGuess => "pattern_guess",
            Self::None => "none",
        }
    }
}

impl std::str::FromStr for EmailSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "apollo" => Ok(Self::Apollo),
            "website_scrape" => Ok(Self::WebsiteScrape),
            "serper_search" => Ok(Self::SerperSearch),
            "smtp_verified" => Ok(Self::SmtpVerified),
            "pattern_guess" => Ok(Self::PatternGuess),
            "none" => Ok(Self::None),
            other => Err(format!("unknown email source: {other}")),
        }
    }
}

impl std::fmt::Display for EmailSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Sent,
}

impl LeadStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Sent => "sent",
        }
    }
}

impl std::str::FromStr for LeadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "sent" => Ok(Self::Sent),
            other => Err(format!("unknown lead status: {other}")),
        }
    }
}

/// One AI-generated automation suggestion attached to a lead's analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationSuggestion {
    pub name: String,
    pub description: String,
    pub value: String,
}

/// A prospective customer discovered by a city search, unique by `domain`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: i64,
    pub domain: String,
    pub company_name: Option<String>,
    pub website: Option<String>,
    pub email: Option<String>,
    pub email_source: Option<EmailSource>,
    pub contact_name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub scraped_text: Option<String>,
    pub ai_summary: Option<String>,
    pub automation_suggestions: Vec<AutomationSuggestion>,
    pub discovered_date: NaiveDate,
    pub sent_date: Option<NaiveDate>,
    pub status: LeadStatus,
}

/// One city in the discovery rotation, unique by `(city_name, country)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityRotation {
    pub id: i64,
    pub city_name: String,
    pub country: String,
    pub language: String,
    pub last_searched: Option<NaiveDate>,
    pub search_count: i64,
}

/// Per-stage outcome counts and errors for one end-to-end pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageCounts {
    pub discovered: i64,
    pub website_enriched: i64,
    pub email_enriched: i64,
    pub ai_analyzed: i64,
    pub reports_sent: i64,
    pub outreach_sent: i64,
}

/// A completed end-to-end pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: i64,
    pub run_date: DateTime<Utc>,
    pub counts: StageCounts,
    pub errors: Vec<String>,
    pub duration_seconds: f64,
}

/// Kind of outreach email sent to a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutreachType {
    Initial,
    Followup,
}

impl OutreachType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Followup => "followup",
        }
    }
}

impl std::str::FromStr for OutreachType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial" => Ok(Self::Initial),
            "followup" => Ok(Self::Followup),
            other => Err(format!("unknown outreach type: {other}")),
        }
    }
}

/// Delivery/engagement status of one outreach email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutreachStatus {
    Pending,
    Sent,
    Replied,
}

impl OutreachStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Replied => "replied",
        }
    }
}

impl std::str::FromStr for OutreachStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "replied" => Ok(Self::Replied),
            other => Err(format!("unknown outreach status: {other}")),
        }
    }
}

/// A single email-level interaction with one lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outreach {
    pub id: i64,
    pub lead_id: i64,
    pub outreach_type: OutreachType,
    pub status: OutreachStatus,
    pub thread_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub opened: bool,
    pub clicked: bool,
    pub replied: bool,
    pub followup_sent: bool,
}

// ---------------------------------------------------------------------------
// Facade wire types (§4.E.6)
// ---------------------------------------------------------------------------

/// Derived operational status for a bucketed `agent-status` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineHealth {
    Activo,
    Optimizando,
    #[serde(rename = "en_revision")]
    EnRevision,
}

impl PipelineHealth {
    /// Classifies health from an error count: 0 -> Activo, 1-2 ->
    /// Optimizando, >=3 -> `EnRevision`.
    #[must_use]
    pub const fn from_error_count(errors: usize) -> Self {
        match errors {
            0 => Self::Activo,
            1 | 2 => Self::Optimizando,
            _ => Self::EnRevision,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Activo => "Activo",
            Self::Optimizando => "Optimizando",
            Self::EnRevision => "En revisión",
        }
    }
}

/// One bucketed row returned by `GET /api/acem/agent-status`.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatusRow {
    pub bucket_start: DateTime<Utc>,
    pub runs_total: i64,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub tasks_completed: i64,
    pub status: String,
}

/// Severity of a `pipeline_error` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    Warning,
    Critical,
}

/// One event returned by `GET /api/acem/agent-events`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AgentEvent {
    PipelineRun {
        occurred_at: DateTime<Utc>,
        run_id: i64,
    },
    PipelineError {
        occurred_at: DateTime<Utc>,
        run_id: i64,
        message: String,
        severity: EventSeverity,
    },
}

/// Response to `POST /api/acem/run-now`.
#[derive(Debug, Clone, Serialize)]
pub struct RunNowResponse {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub counts: StageCounts,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_health_buckets_match_spec_thresholds() {
        assert_eq!(PipelineHealth::from_error_count(0).label(), "Activo");
        assert_eq!(PipelineHealth::from_error_count(1).label(), "Optimizando");
        assert_eq!(PipelineHealth::from_error_count(2).label(), "Optimizando");
        assert_eq!(PipelineHealth::from_error_count(3).label(), "En revisión");
        assert_eq!(PipelineHealth::from_error_count(50).label(), "En revisión");
    }

    #[test]
    fn email_source_round_trips_through_str() {
        assert_eq!("apollo".parse::<EmailSource>().unwrap(), EmailSource::Apollo);
        assert_eq!(EmailSource::PatternGuess.as_str(), "pattern_guess");
    }
}
