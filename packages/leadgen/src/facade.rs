//! The pipeline process's internal snapshot HTTP facade (§4.E.6).
//!
//! A small long-running `actix-web` service co-located with the
//! scheduling policy loop, serving a dashboard (or admin tooling) bucketed
//! pipeline health without requiring direct database access. Grounded on
//! [`agentops_collector`]'s own server: one `AppState` holding a cloneable
//! handle, CORS-permissive, `middleware::Logger`.

use std::time::Instant;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpResponse, HttpServer};
use chrono::{DateTime, Timelike, Utc};
use moosicbox_json_utils::database::ToValue as _;
use serde::Deserialize;
use switchy_database::DatabaseValue;

use agentops_leadgen_models::{AgentEvent, AgentStatusRow, EventSeverity, PipelineHealth, RunNowResponse};

use crate::db::PipelineDb;
use crate::PipelineError;

/// Shared application state: the pipeline database handle.
#[derive(Clone)]
pub struct FacadeState {
    pub db: PipelineDb,
}

#[derive(Debug, Deserialize)]
pub struct UpdatedAfterQuery {
    updated_after: Option<DateTime<Utc>>,
}

/// `GET /health` — process liveness. A dedicated scheduler-status field
/// isn't tracked here; reachability of the pipeline database stands in
/// for it, matching the collector's own health check.
pub async fn health(state: web::Data<FacadeState>) -> HttpResponse {
    match state.db.query("SELECT 1 AS ok", &[]).await {
        Ok(_) => HttpResponse::Ok().json(serde_json::json!({ "status": "ok" })),
        Err(e) => {
            log::error!("facade health check failed: {e}");
            HttpResponse::ServiceUnavailable().json(serde_json::json!({ "status": "unavailable" }))
        }
    }
}

struct RunRow {
    id: i64,
    run_date: DateTime<Utc>,
    /// `None` when the stored row has `outreach_sent` unset and the
    /// count must be reconstructed from the `outreach` table instead.
    outreach_sent: Option<i64>,
    errors: Vec<String>,
    duration_seconds: f64,
}

async fn runs_since(db: &PipelineDb, updated_after: DateTime<Utc>) -> Result<Vec<RunRow>, PipelineError> {
    let rows = db
        .query(
            "SELECT id, run_date, discovered, website_enriched, email_enriched, ai_analyzed, reports_sent,
                    outreach_sent, errors, duration_seconds
             FROM pipeline_runs
             WHERE run_date >= ?
             ORDER BY run_date ASC",
            &[DatabaseValue::String(updated_after.to_rfc3339())],
        )
        .await?;

    rows.iter()
        .map(|row| {
            let run_date: String = row.to_value("run_date").map_err(crate::conversion_error)?;
            let errors_json: String = row.to_value("errors").map_err(crate::conversion_error)?;
            Ok(RunRow {
                id: row.to_value("id").map_err(crate::conversion_error)?,
                run_date: DateTime::parse_from_rfc3339(&run_date)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| PipelineError::Conversion {
                        message: format!("invalid run_date {run_date:?}: {e}"),
                    })?,
                outreach_sent: row.to_value("outreach_sent").map_err(crate::conversion_error)?,
                errors: serde_json::from_str(&errors_json).unwrap_or_default(),
                duration_seconds: row.to_value("duration_seconds").map_err(crate::conversion_error)?,
            })
        })
        .collect()
}

/// Outreach rows count attributable to a run: the stored `outreach_sent`
/// column when present, else every `outreach` row sent between this run's
/// timestamp and the next run's (or now, for the latest run).
async fn tasks_completed_for(db: &PipelineDb, run: &RunRow, next_run_date: Option<DateTime<Utc>>) -> i64 {
    if let Some(outreach_sent) = run.outreach_sent {
        return outreach_sent;
    }
    let upper = next_run_date.unwrap_or_else(Utc::now);
    let rows = db
        .query(
            "SELECT COUNT(*) AS n FROM outreach WHERE sent_at >= ? AND sent_at < ?",
            &[
                DatabaseValue::String(run.run_date.to_rfc3339()),
                DatabaseValue::String(upper.to_rfc3339()),
            ],
        )
        .await;
    rows.ok().and_then(|rows| rows.first().and_then(|r| r.to_value::<i64>("n").ok())).unwrap_or(0)
}

fn bucket_start(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    let bucketed_minute = (timestamp.minute() / 10) * 10;
    timestamp
        .date_naive()
        .and_hms_opt(timestamp.hour(), bucketed_minute, 0)
        .map_or(timestamp, |naive| DateTime::from_naive_utc_and_offset(naive, Utc))
}

/// Fallback snapshot built from current store totals when no `PipelineRun`
/// rows satisfy the caller's window — so the dashboard still has
/// something to render on a freshly booted store.
async fn synthesized_snapshot(db: &PipelineDb) -> AgentStatusRow {
    if crate::config::acem_metrics_mock() {
        return AgentStatusRow {
            bucket_start: bucket_start(Utc::now()),
            runs_total: crate::config::acem_metrics_mock_runs_total(),
            success_rate: 100.0,
            avg_latency_ms: 0.0,
            tasks_completed: crate::config::acem_metrics_mock_tasks_completed(),
            status: PipelineHealth::Activo.label().to_string(),
        };
    }

    let total_outreach = db
        .query("SELECT COUNT(*) AS n FROM outreach", &[])
        .await
        .ok()
        .and_then(|rows| rows.first().and_then(|r| r.to_value::<i64>("n").ok()))
        .unwrap_or(0);

    AgentStatusRow {
        bucket_start: bucket_start(Utc::now()),
        runs_total: 0,
        success_rate: 100.0,
        avg_latency_ms: 0.0,
        tasks_completed: total_outreach,
        status: PipelineHealth::Activo.label().to_string(),
    }
}

/// `GET /api/acem/agent-status?updated_after=<ISO-8601>`
pub async fn agent_status(state: web::Data<FacadeState>, query: web::Query<UpdatedAfterQuery>) -> HttpResponse {
    let updated_after = query.updated_after.unwrap_or_else(|| DateTime::<Utc>::MIN_UTC);

    let runs = match runs_since(&state.db, updated_after).await {
        Ok(runs) => runs,
        Err(e) => {
            log::error!("facade: failed to load pipeline runs: {e}");
            return HttpResponse::InternalServerError().json(serde_json::json!({ "error": e.to_string() }));
        }
    };

    if runs.is_empty() {
        return HttpResponse::Ok().json(vec![synthesized_snapshot(&state.db).await]);
    }

    let mut out = Vec::with_capacity(runs.len());
    for (i, run) in runs.iter().enumerate() {
        let next_run_date = runs.get(i + 1).map(|r| r.run_date);
        let tasks_completed = tasks_completed_for(&state.db, run, next_run_date).await;
        let error_count = run.errors.len();
        out.push(AgentStatusRow {
            bucket_start: bucket_start(run.run_date),
            runs_total: 1,
            success_rate: (100.0 - 25.0 * error_count as f64).max(0.0),
            avg_latency_ms: run.duration_seconds * 1000.0,
            tasks_completed,
            status: PipelineHealth::from_error_count(error_count).label().to_string(),
        });
    }

    HttpResponse::Ok().json(out)
}

fn severity_of(message: &str) -> EventSeverity {
    let lower = message.to_ascii_lowercase();
    if lower.contains("critical") || lower.contains("fatal") || lower.contains("traceback") {
        EventSeverity::Critical
    } else {
        EventSeverity::Warning
    }
}

/// `GET /api/acem/agent-events?updated_after=<ISO-8601>`
pub async fn agent_events(state: web::Data<FacadeState>, query: web::Query<UpdatedAfterQuery>) -> HttpResponse {
    let updated_after = query.updated_after.unwrap_or_else(|| DateTime::<Utc>::MIN_UTC);

    let runs = match runs_since(&state.db, updated_after).await {
        Ok(runs) => runs,
        Err(e) => {
            log::error!("facade: failed to load pipeline runs: {e}");
            return HttpResponse::InternalServerError().json(serde_json::json!({ "error": e.to_string() }));
        }
    };

    if runs.is_empty() {
        let snapshot = synthesized_snapshot(&state.db).await;
        return HttpResponse::Ok().json(vec![AgentEvent::PipelineRun {
            occurred_at: snapshot.bucket_start,
            run_id: 0,
        }]);
    }

    let mut events = Vec::new();
    for run in &runs {
        events.push(AgentEvent::PipelineRun {
            occurred_at: run.run_date,
            run_id: run.id,
        });
        for message in &run.errors {
            events.push(AgentEvent::PipelineError {
                occurred_at: run.run_date,
                run_id: run.id,
                severity: severity_of(message),
                message: message.clone(),
            });
        }
    }

    HttpResponse::Ok().json(events)
}

/// `POST /api/acem/run-now` — invokes the pipeline once, synchronously
/// from the caller's perspective but dispatched onto a background task so
/// the listener loop is never blocked for the run's duration.
pub async fn run_now(state: web::Data<FacadeState>) -> HttpResponse {
    let db = state.db.clone();
    let started_at = Utc::now();
    let timer = Instant::now();

    let result = tokio::task::spawn(async move { crate::agent::run_once(&db).await }).await;

    let finished_at = Utc::now();
    log::info!("facade: run-now completed in {:?}", timer.elapsed());

    match result {
        Ok(Ok(counts)) => HttpResponse::Ok().json(RunNowResponse {
            started_at,
            finished_at,
            counts,
        }),
        Ok(Err(e)) => {
            log::error!("facade: run-now failed: {e}");
            HttpResponse::InternalServerError().json(serde_json::json!({ "error": e.to_string() }))
        }
        Err(e) => {
            log::error!("facade: run-now task panicked: {e}");
            HttpResponse::InternalServerError().json(serde_json::json!({ "error": "pipeline run task panicked" }))
        }
    }
}

/// Builds and runs the facade HTTP server, blocking until `shutdown` flips
/// to `true` — at which point in-flight requests are given a chance to
/// complete before the listener stops, the same cancellation-token
/// propagation the co-located scheduling loop uses (see
/// `schedule_policy::run`).
///
/// # Errors
///
/// Returns an I/O error if the server cannot bind to `bind_addr`.
pub async fn run_server(
    db: PipelineDb,
    bind_addr: &str,
    port: u16,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> std::io::Result<()> {
    let state = web::Data::new(FacadeState { db });

    log::info!("starting pipeline facade on {bind_addr}:{port}");

    let server = HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .route("/health", web::get().to(health))
            .service(
                web::scope("/api/acem")
                    .route("/agent-status", web::get().to(agent_status))
                    .route("/agent-events", web::get().to(agent_events))
                    .route("/run-now", web::post().to(run_now)),
            )
    })
    .bind((bind_addr, port))?
    .run();

    let handle = server.handle();
    let watcher = tokio::spawn(async move {
        let _ = shutdown.changed().await;
        handle.stop(true).await;
    });

    let result = server.await;
    watcher.abort();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};
    use std::sync::Arc;

    async fn test_db() -> PipelineDb {
        let conn = switchy_database_connection::init_sqlite_rusqlite(None).await.unwrap();
        let db = PipelineDb::new(Arc::from(conn), false);
        db.ensure_schema().await.unwrap();
        db
    }

    #[tokio::test]
    async fn health_reports_ok_against_a_live_database() {
        let db = test_db().await;
        let state = web::Data::new(FacadeState { db });
        let app = test::init_service(App::new().app_data(state.clone()).route("/health", web::get().to(health))).await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }

    #[tokio::test]
    async fn agent_status_falls_back_to_a_synthesized_snapshot_when_empty() {
        let db = test_db().await;
        let state = web::Data::new(FacadeState { db });
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/api/acem/agent-status", web::get().to(agent_status)),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/acem/agent-status").to_request();
        let resp: Vec<AgentStatusRow> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.len(), 1);
        assert_eq!(resp[0].runs_total, 0);
    }

    #[tokio::test]
    async fn agent_status_buckets_one_row_per_pipeline_run() {
        let db = test_db().await;
        db.exec(
            "INSERT INTO pipeline_runs
                (run_date, discovered, website_enriched, email_enriched, ai_analyzed, reports_sent, outreach_sent, errors, duration_seconds)
             VALUES ('2026-02-18T12:37:04Z', 1, 1, 1, 1, 1, 4, '[]', 2.5)",
            &[],
        )
        .await
        .unwrap();

        let state = web::Data::new(FacadeState { db });
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/api/acem/agent-status", web::get().to(agent_status)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/acem/agent-status?updated_after=1970-01-01T00:00:00Z")
            .to_request();
        let resp: Vec<AgentStatusRow> = test::call_and_read_body_json(&app, req).await;

        assert_eq!(resp.len(), 1);
        assert_eq!(resp[0].runs_total, 1);
        assert!((resp[0].success_rate - 100.0).abs() < f64::EPSILON);
        assert!((resp[0].avg_latency_ms - 2500.0).abs() < f64::EPSILON);
        assert_eq!(resp[0].tasks_completed, 4);
        assert_eq!(resp[0].status, "Activo");
    }

    #[tokio::test]
    async fn agent_events_emits_one_error_event_per_stored_error() {
        let db = test_db().await;
        db.exec(
            "INSERT INTO pipeline_runs
                (run_date, discovered, website_enriched, email_enriched, ai_analyzed, reports_sent, outreach_sent, errors, duration_seconds)
             VALUES ('2026-02-18T12:37:04Z', 0, 0, 0, 0, 0, 0, ?, 1.0)",
            &[DatabaseValue::String(
                serde_json::to_string(&vec!["discover: critical traceback"]).unwrap(),
            )],
        )
        .await
        .unwrap();

        let state = web::Data::new(FacadeState { db });
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/api/acem/agent-events", web::get().to(agent_events)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/acem/agent-events?updated_after=1970-01-01T00:00:00Z")
            .to_request();
        let resp: Vec<serde_json::Value> = test::call_and_read_body_json(&app, req).await;

        assert_eq!(resp.len(), 2);
        assert_eq!(resp[0]["event_type"], "pipeline_run");
        assert_eq!(resp[1]["event_type"], "pipeline_error");
        assert_eq!(resp[1]["severity"], "critical");
    }
}
