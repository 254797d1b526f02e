//! Concrete [`Agent`] implementations: the lead-generation driver and the
//! onboarding-clients stub.

use std::time::Duration;

use async_trait::async_trait;

use agentops_ai::create_provider_from_env;
use agentops_runtime::retry::{exponential_backoff, is_transient_http, retry};
use agentops_runtime::{Agent, AgentError, MetricMap};

use crate::clients::{
    ApolloClient, DiscoverySource, OutreachTransport, PersonMatch, ReportBatch, ReportSender, SearchClient,
};
use crate::db::PipelineDb;
use crate::email_enrichment::{MxProbe, TcpReachabilityProbe};
use crate::pipeline::PipelineDeps;
use crate::PipelineError;

/// Finite timeout applied to every external HTTP call this crate makes
/// directly, per the platform-wide "no unbounded suspension point" rule.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// Bounded retry budget for transient network failures on those calls.
const HTTP_RETRY_ATTEMPTS: u32 = 3;

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_default()
}

/// Apollo's people-search endpoint, used both for discovery (by city) and
/// for per-domain contact matching. Issues the documented request shape
/// only; pagination beyond one page and the full filter surface are out
/// of scope.
pub struct ApolloHttpClient {
    api_key: String,
    client: reqwest::Client,
}

impl ApolloHttpClient {
    #[must_use]
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: http_client(),
        }
    }
}

#[async_trait]
impl DiscoverySource for ApolloHttpClient {
    async fn search_city(&self, city: &str, country: &str, limit: u32) -> Result<Vec<PersonMatch>, PipelineError> {
        let oversample = crate::config::apollo_oversample_factor();
        let per_page = i64::from(limit) * oversample;

        let body: serde_json::Value = retry(HTTP_RETRY_ATTEMPTS, exponential_backoff, is_transient_http, || async {
            let response = self
                .client
                .post("https://api.apollo.io/v1/mixed_people/search")
                .header("X-Api-Key", &self.api_key)
                .json(&serde_json::json!({
                    "person_locations": [format!("{city}, {country}")],
                    "per_page": per_page,
                }))
                .send()
                .await?
                .error_for_status()?;
            response.json().await
        })
        .await?;
        let people = body.get("people").and_then(|p| p.as_array()).cloned().unwrap_or_default();

        Ok(people
            .into_iter()
            .filter_map(|person| {
                let domain = person.get("organization")?.get("primary_domain")?.as_str()?.to_string();
                Some(PersonMatch {
                    domain,
                    company_name: person
                        .get("organization")
                        .and_then(|o| o.get("name"))
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                    website: person
                        .get("organization")
                        .and_then(|o| o.get("website_url"))
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                    contact_name: person.get("name").and_then(|v| v.as_str()).map(str::to_string),
                    email: person.get("email").and_then(|v| v.as_str()).map(str::to_string),
                })
            })
            .take(usize::try_from(limit).unwrap_or(0))
            .collect())
    }
}

#[async_trait]
impl ApolloClient for ApolloHttpClient {
    async fn match_domain(&self, domain: &str, company_name: Option<&str>) -> Result<Option<PersonMatch>, PipelineError> {
        let body: serde_json::Value = retry(HTTP_RETRY_ATTEMPTS, exponential_backoff, is_transient_http, || async {
            let response = self
                .client
                .post("https://api.apollo.io/v1/mixed_people/search")
                .header("X-Api-Key", &self.api_key)
                .json(&serde_json::json!({
                    "q_organization_domains": domain,
                    "organization_name": company_name,
                    "per_page": 1,
                }))
                .send()
                .await?
                .error_for_status()?;
            response.json().await
        })
        .await?;
        let Some(person) = body.get("people").and_then(|p| p.as_array()).and_then(|a| a.first()) else {
            return Ok(None);
        };

        Ok(Some(PersonMatch {
            domain: domain.to_string(),
            company_name: company_name.map(str::to_string),
            website: None,
            contact_name: person.get("name").and_then(|v| v.as_str()).map(str::to_string),
            email: person.get("email").and_then(|v| v.as_str()).map(str::to_string),
        }))
    }

    async fn organization_phone(&self, domain: &str) -> Result<Option<String>, PipelineError> {
        let body: serde_json::Value = retry(HTTP_RETRY_ATTEMPTS, exponential_backoff, is_transient_http, || async {
            let response = self
                .client
                .get("https://api.apollo.io/v1/organizations/search")
                .header("X-Api-Key", &self.api_key)
                .query(&[("q_organization_domains", domain)])
                .send()
                .await?
                .error_for_status()?;
            response.json().await
        })
        .await?;
        Ok(body
            .get("organizations")
            .and_then(|o| o.as_array())
            .and_then(|a| a.first())
            .and_then(|org| org.get("phone"))
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }
}

/// Serper's web-search endpoint, used by free-tier email enrichment.
pub struct SerperHttpClient {
    api_key: String,
    client: reqwest::Client,
}

impl SerperHttpClient {
    #[must_use]
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: http_client(),
        }
    }
}

#[async_trait]
impl SearchClient for SerperHttpClient {
    async fn search(&self, query: &str) -> Result<Vec<String>, PipelineError> {
        let body: serde_json::Value = retry(HTTP_RETRY_ATTEMPTS, exponential_backoff, is_transient_http, || async {
            let response = self
                .client
                .post("https://google.serper.dev/search")
                .header("X-API-KEY", &self.api_key)
                .json(&serde_json::json!({ "q": query }))
                .send()
                .await?
                .error_for_status()?;
            response.json().await
        })
        .await?;
        let organic = body.get("organic").and_then(|o| o.as_array()).cloned().unwrap_or_default();

        Ok(organic
            .into_iter()
            .filter_map(|entry| entry.get("snippet").and_then(|v| v.as_str()).map(str::to_string))
            .collect())
    }
}

/// Discovery source with no configured provider: returns zero matches for
/// every city rather than failing, so the pipeline still runs end to end
/// (recording zero counts) when `APOLLO_API_KEY` is unset.
struct NoopDiscoverySource;

#[async_trait]
impl DiscoverySource for NoopDiscoverySource {
    async fn search_city(&self, _city: &str, _country: &str, _limit: u32) -> Result<Vec<PersonMatch>, PipelineError> {
        Ok(Vec::new())
    }
}

struct NoopSearchClient;

#[async_trait]
impl SearchClient for NoopSearchClient {
    async fn search(&self, _query: &str) -> Result<Vec<String>, PipelineError> {
        Ok(Vec::new())
    }
}

/// Logs the report instead of actually emailing it — the HTML templating
/// and spreadsheet/PDF attachment generation are external collaborators
/// out of scope for this crate.
struct LoggingReportSender;

#[async_trait]
impl ReportSender for LoggingReportSender {
    async fn send(&self, batch: &ReportBatch) -> Result<(), PipelineError> {
        log::info!("report: sending {} leads ({} bytes of HTML)", batch.lead_ids.len(), batch.html_body.len());
        Ok(())
    }
}

/// Builds every external collaborator from environment configuration and
/// runs one full pipeline pass, returning its per-stage counts.
///
/// This is the single place that assembles [`PipelineDeps`] from live
/// HTTP clients; both [`LeadGenerationAgent::run`] and the facade's
/// `run-now` endpoint and scheduling policy (`schedule_policy`, `facade`)
/// call through here so a manually-triggered run and a scheduled run
/// build their dependencies identically.
///
/// # Errors
///
/// Returns [`PipelineError`] only if building the outreach transport
/// fails (e.g. `gmass` selected without `GMASS_API_KEY`) or the pipeline
/// driver's own catastrophic failure path is hit — per-stage failures are
/// isolated and recorded, not propagated.
pub async fn run_once(db: &PipelineDb) -> Result<agentops_leadgen_models::StageCounts, PipelineError> {
    let apollo_client = crate::config::apollo_api_key().map(ApolloHttpClient::new);
    let noop_discovery = NoopDiscoverySource;
    let discovery: &dyn DiscoverySource = apollo_client
        .as_ref()
        .map_or(&noop_discovery as &dyn DiscoverySource, |c| c as &dyn DiscoverySource);
    let search: Box<dyn SearchClient> = match crate::config::serper_api_key() {
        Some(key) => Box::new(SerperHttpClient::new(key)),
        None => Box::new(NoopSearchClient),
    };
    let mx = TcpReachabilityProbe;
    let report_sender = LoggingReportSender;
    let outreach_transport = crate::clients::build_outreach_transport()?;

    let (ai_primary, ai_secondary) = build_ai_providers().await;

    let deps = PipelineDeps {
        discovery,
        apollo: apollo_client.as_ref().map(|c| c as &dyn ApolloClient),
        search: search.as_ref(),
        mx: &mx,
        ai_primary: ai_primary.as_deref(),
        ai_secondary: ai_secondary.as_deref(),
        report_sender: &report_sender,
        outreach_transport: outreach_transport.as_ref(),
    };

    crate::pipeline::run_pipeline(db, &deps).await
}

/// The pipeline driver, registered as the `lead_generation` agent.
pub struct LeadGenerationAgent {
    db: PipelineDb,
}

impl LeadGenerationAgent {
    #[must_use]
    pub const fn new(db: PipelineDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Agent for LeadGenerationAgent {
    fn name(&self) -> &str {
        "lead_generation"
    }

    async fn run(&self) -> Result<MetricMap, AgentError> {
        let counts = run_once(&self.db).await.map_err(to_agent_error)?;

        let mut metrics = MetricMap::new();
        metrics.insert("discovered".to_string(), serde_json::json!(counts.discovered));
        metrics.insert("website_enriched".to_string(), serde_json::json!(counts.website_enriched));
        metrics.insert("email_enriched".to_string(), serde_json::json!(counts.email_enriched));
        metrics.insert("ai_analyzed".to_string(), serde_json::json!(counts.ai_analyzed));
        metrics.insert("reports_sent".to_string(), serde_json::json!(counts.reports_sent));
        metrics.insert("outreach_sent".to_string(), serde_json::json!(counts.outreach_sent));
        Ok(metrics)
    }
}

async fn build_ai_providers() -> (Option<Box<dyn agentops_ai::LlmProvider>>, Option<Box<dyn agentops_ai::LlmProvider>>) {
    let primary = match create_provider_from_env().await {
        Ok(provider) => Some(provider),
        Err(e) => {
            log::warn!("ai_analysis: no primary AI provider configured: {e}");
            None
        }
    };

    let secondary = match agentops_ai::create_secondary_provider_from_env().await {
        Ok(provider) => Some(provider),
        Err(e) => {
            log::info!("ai_analysis: no secondary AI provider configured, analysis has no fallback: {e}");
            None
        }
    };

    (primary, secondary)
}

fn to_agent_error(e: PipelineError) -> AgentError {
    AgentError::Failed { message: e.to_string() }
}

/// Stub for the onboarding-clients agent: out of scope per this crate's
/// focus on the execution/observability substrate. Its real body is a
/// short, documented sequence of third-party HTTP calls (Supabase polling,
/// a welcome-email send) with no algorithmic content of its own.
pub struct OnboardingClientsAgent;

#[async_trait]
impl Agent for OnboardingClientsAgent {
    fn name(&self) -> &str {
        "onboarding_clients"
    }

    async fn run(&self) -> Result<MetricMap, AgentError> {
        log::info!("onboarding_clients: stub run (out of scope — see crate docs)");
        Ok(MetricMap::new())
    }
}
