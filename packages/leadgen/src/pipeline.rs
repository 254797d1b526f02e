//! The pipeline driver: runs all seven stages in order, isolating each
//! stage's failure from the rest, and always records a `PipelineRun` row.

use std::time::Instant;

use agentops_ai::LlmProvider;
use agentops_leadgen_models::StageCounts;
use switchy_database::DatabaseValue;

use crate::clients::{ApolloClient, DiscoverySource, OutreachTransport, ReportSender, SearchClient};
use crate::config::leads_per_day;
use crate::db::PipelineDb;
use crate::email_enrichment::MxProbe;
use crate::PipelineError;

/// The external collaborators one pipeline run needs. All are optional
/// except the database and discovery source: a missing AI/Apollo/GMass
/// key is a business condition (log and skip), not a fatal error.
pub struct PipelineDeps<'a> {
    pub discovery: &'a dyn DiscoverySource,
    pub apollo: Option<&'a dyn ApolloClient>,
    pub search: &'a dyn SearchClient,
    pub mx: &'a dyn MxProbe,
    pub ai_primary: Option<&'a dyn LlmProvider>,
    pub ai_secondary: Option<&'a dyn LlmProvider>,
    pub report_sender: &'a dyn ReportSender,
    pub outreach_transport: &'a dyn OutreachTransport,
}

/// Runs one end-to-end pipeline execution: discovery, website
/// enrichment, email enrichment, AI analysis, report build/send, and
/// personalized outreach, each isolated in its own try-boundary. Always
/// records a `PipelineRun` row with per-stage counts, any stage errors,
/// and the total duration, even if every stage fails.
///
/// # Errors
///
/// Returns [`PipelineError`] only if recording the final `PipelineRun` row
/// itself fails — a catastrophic, not a per-stage, condition.
pub async fn run_pipeline(db: &PipelineDb, deps: &PipelineDeps<'_>) -> Result<StageCounts, PipelineError> {
    let started = Instant::now();
    let mut counts = StageCounts::default();
    let mut errors = Vec::new();

    counts.discovered = stage(&mut errors, "discover", async {
        crate::discover::run(db, deps.discovery, leads_per_day()).await
    })
    .await;

    counts.website_enriched = stage(&mut errors, "website_enrichment", async {
        let client = reqwest::Client::new();
        crate::website_enrichment::run(db, &client).await
    })
    .await;

    counts.email_enriched = stage(&mut errors, "email_enrichment", async {
        crate::email_enrichment::run(db, deps.apollo, deps.search, deps.mx).await
    })
    .await;

    counts.ai_analyzed = stage(&mut errors, "ai_analysis", async {
        match deps.ai_primary {
            Some(primary) => crate::ai_analysis::run(db, primary, deps.ai_secondary).await,
            None => {
                log::warn!("ai_analysis: no AI provider configured, skipping");
                Ok(0)
            }
        }
    })
    .await;

    counts.reports_sent = stage(&mut errors, "build_and_send_report", async {
        let lead_ids = crate::outputs::select_leads_for_report(db, leads_per_day()).await?;
        if lead_ids.is_empty() {
            return Ok(0);
        }
        let batch = crate::outputs::build_report(db, &lead_ids).await?;
        crate::outputs::send_report(db, deps.report_sender, &batch).await?;
        Ok(i64::try_from(lead_ids.len()).unwrap_or(0))
    })
    .await;

    counts.outreach_sent = stage(&mut errors, "outreach", async {
        crate::outreach::run(db, deps.outreach_transport, deps.ai_primary).await
    })
    .await;

    let duration = started.elapsed().as_secs_f64();
    record_pipeline_run(db, &counts, &errors, duration).await?;

    Ok(counts)
}

/// Runs one stage, logging and recording its error (as a zero count)
/// rather than propagating it, so later stages always run.
async fn stage<F>(errors: &mut Vec<String>, name: &str, fut: F) -> i64
where
    F: std::future::Future<Output = Result<i64, PipelineError>>,
{
    match fut.await {
        Ok(count) => count,
        Err(e) => {
            log::error!("pipeline stage {name:?} failed: {e}");
            errors.push(format!("{name}: {e}"));
            0
        }
    }
}

async fn record_pipeline_run(
    db: &PipelineDb,
    counts: &StageCounts,
    errors: &[String],
    duration_seconds: f64,
) -> Result<(), PipelineError> {
    let errors_json = serde_json::to_string(errors).unwrap_or_else(|_| "[]".to_string());

    db.exec(
        "INSERT INTO pipeline_runs
            (run_date, discovered, website_enriched, email_enriched, ai_analyzed, reports_sent, outreach_sent, errors, duration_seconds)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        &[
            DatabaseValue::String(chrono::Utc::now().to_rfc3339()),
            DatabaseValue::Int64(counts.discovered),
            DatabaseValue::Int64(counts.website_enriched),
            DatabaseValue::Int64(counts.email_enriched),
            DatabaseValue::Int64(counts.ai_analyzed),
            DatabaseValue::Int64(counts.reports_sent),
            DatabaseValue::Int64(counts.outreach_sent),
            DatabaseValue::String(errors_json),
            DatabaseValue::Real64(duration_seconds),
        ],
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{OutreachSendResult, PersonMatch, ReportBatch};
    use async_trait::async_trait;
    use moosicbox_json_utils::database::ToValue as _;
    use std::sync::Arc;

    async fn test_db() -> PipelineDb {
        let conn = switchy_database_connection::init_sqlite_rusqlite(None).await.unwrap();
        let db = PipelineDb::new(Arc::from(conn), false);
        db.ensure_schema().await.unwrap();
        crate::cities::seed_if_empty(&db).await.unwrap();
        db
    }

    struct EmptyDiscovery;
    #[async_trait]
    impl DiscoverySource for EmptyDiscovery {
        async fn search_city(&self, _city: &str, _country: &str, _limit: u32) -> Result<Vec<PersonMatch>, PipelineError> {
            Ok(Vec::new())
        }
    }

    struct EmptySearch;
    #[async_trait]
    impl SearchClient for EmptySearch {
        async fn search(&self, _query: &str) -> Result<Vec<String>, PipelineError> {
            Ok(Vec::new())
        }
    }

    struct NullMx;
    #[async_trait]
    impl MxProbe for NullMx {
        async fn accepts_mail(&self, _domain: &str) -> Result<bool, PipelineError> {
            Ok(false)
        }
    }

    struct NullReportSender;
    #[async_trait]
    impl ReportSender for NullReportSender {
        async fn send(&self, _batch: &ReportBatch) -> Result<(), PipelineError> {
            Ok(())
        }
    }

    struct NullTransport;
    #[async_trait]
    impl OutreachTransport for NullTransport {
        async fn send_initial(&self, _to: &str, _subject: &str, _body: &str) -> Result<OutreachSendResult, PipelineError> {
            Ok(OutreachSendResult { thread_id: None })
        }
        async fn send_followup(
            &self,
            _to: &str,
            _thread_id: &str,
            _subject: &str,
            _body: &str,
        ) -> Result<OutreachSendResult, PipelineError> {
            Ok(OutreachSendResult { thread_id: None })
        }
    }

    #[tokio::test]
    async fn empty_pipeline_run_still_records_a_run_row() {
        let db = test_db().await;
        let deps = PipelineDeps {
            discovery: &EmptyDiscovery,
            apollo: None,
            search: &EmptySearch,
            mx: &NullMx,
            ai_primary: None,
            ai_secondary: None,
            report_sender: &NullReportSender,
            outreach_transport: &NullTransport,
        };

        let counts = run_pipeline(&db, &deps).await.unwrap();
        assert_eq!(counts.discovered, 0);

        let rows = db.query("SELECT COUNT(*) AS n FROM pipeline_runs", &[]).await.unwrap();
        let n: i64 = rows[0].to_value("n").unwrap();
        assert_eq!(n, 1);
    }
}
