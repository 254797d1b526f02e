//! HTTP handler functions for the metrics collector API.

use actix_web::{HttpResponse, web};
use agentops_collector_db::queries;
use agentops_collector_models::{ApiHealth, MetricsPushRequest, MetricsPushResponse, MetricsQueryParams, RunStatus};

use crate::AppState;

/// `GET /health` and `GET /api/health`
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    match queries::health_check(&state.db).await {
        Ok(()) => HttpResponse::Ok().json(ApiHealth::default()),
        Err(e) => {
            log::error!("health check failed: {e}");
            HttpResponse::ServiceUnavailable().json(serde_json::json!({ "status": "unavailable" }))
        }
    }
}

/// `POST /api/metrics`
///
/// Records a finished agent run and its metrics. Every push describes a
/// run that has already completed — there is no separate "start" call —
/// so the status is derived from whether `error` is set.
pub async fn push_metrics(state: web::Data<AppState>, payload: web::Json<MetricsPushRequest>) -> HttpResponse {
    let mut payload = payload.into_inner();
    payload.agent_name = payload.agent_name.trim().to_string();

    if payload.agent_name.is_empty() {
        return HttpResponse::UnprocessableEntity()
            .json(serde_json::json!({ "error": "agent_name must not be empty" }));
    }
    if payload.finished_at < payload.started_at {
        return HttpResponse::UnprocessableEntity()
            .json(serde_json::json!({ "error": "finished_at must not precede started_at" }));
    }

    let status = if payload.error.is_some() {
        RunStatus::Failed
    } else {
        RunStatus::Success
    };

    let run_id = match queries::insert_run(
        &state.db,
        &payload.agent_name,
        status,
        payload.started_at,
        payload.finished_at,
        payload.error.as_deref(),
        &payload.metrics,
    )
    .await
    {
        Ok(id) => id,
        Err(e) => {
            log::error!("failed to record run for {}: {e}", payload.agent_name);
            return HttpResponse::InternalServerError().json(serde_json::json!({ "error": e.to_string() }));
        }
    };

    if let Err(e) = queries::upsert_daily_summary(
        &state.db,
        &payload.agent_name,
        payload.finished_at.date_naive(),
        status,
    )
    .await
    {
        log::warn!("failed to update daily summary for {}: {e}", payload.agent_name);
    }

    HttpResponse::Created().json(MetricsPushResponse {
        run_id,
        agent_name: payload.agent_name,
        status: status.as_str().to_string(),
    })
}

/// `GET /api/metrics`
///
/// Returns recent runs, optionally filtered by agent name and start time.
pub async fn query_metrics(state: web::Data<AppState>, params: web::Query<MetricsQueryParams>) -> HttpResponse {
    match queries::query_runs(&state.db, &params).await {
        Ok(runs) => HttpResponse::Ok().json(runs),
        Err(e) => {
            log::error!("failed to query runs: {e}");
            HttpResponse::InternalServerError().json(serde_json::json!({ "error": e.to_string() }))
        }
    }
}
