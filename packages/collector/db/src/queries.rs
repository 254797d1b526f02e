//! Query functions backing the metrics collector API.

use std::collections::BTreeMap;

use agentops_collector_models::{AgentRunSummary, MetricValue, MetricsQueryParams, RunStatus};
use chrono::{DateTime, Utc};
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{DatabaseValue, Row};

use crate::db::CollectorDb;
use crate::DbError;

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 500;

/// Inserts a finished agent run (runtimes always report a completed run —
/// there is no separate "mark running" step) along with its metrics, in one
/// logical unit.
///
/// # Errors
///
/// Returns [`DbError`] if either insert fails.
pub async fn insert_run(
    db: &CollectorDb,
    agent_name: &str,
    status: RunStatus,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    error: Option<&str>,
    metrics: &BTreeMap<String, serde_json::Value>,
) -> Result<i64, DbError> {
    let rows = db
        .query(
            "INSERT INTO agent_runs (agent_name, status, started_at, finished_at, error_message)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id",
            &[
                DatabaseValue::String(agent_name.to_string()),
                DatabaseValue::String(status.as_str().to_string()),
                DatabaseValue::String(started_at.to_rfc3339()),
                DatabaseValue::String(finished_at.to_rfc3339()),
                opt_str(error),
            ],
        )
        .await?;

    let run_id = returning_id(&rows);

    insert_metrics(db, run_id, metrics).await?;

    Ok(run_id)
}

/// Inserts one row per metric for a run, classifying each value the way
/// [`MetricValue::classify`] does.
///
/// # Errors
///
/// Returns [`DbError`] if any insert fails.
pub async fn insert_metrics(
    db: &CollectorDb,
    run_id: i64,
    metrics: &BTreeMap<String, serde_json::Value>,
) -> Result<(), DbError> {
    for (name, raw) in metrics {
        let (number, text) = match MetricValue::classify(raw) {
            MetricValue::Number(n) => (DatabaseValue::Real64(n), DatabaseValue::Null),
            MetricValue::Text(t) => (DatabaseValue::Null, DatabaseValue::String(t)),
        };

        db.exec(
            "INSERT INTO agent_metrics (run_id, metric_name, metric_value_number, metric_value_text)
             VALUES (?, ?, ?, ?)",
            &[
                DatabaseValue::Int64(run_id),
                DatabaseValue::String(name.clone()),
                number,
                text,
            ],
        )
        .await?;
    }

    Ok(())
}

/// Queries runs matching the given filters, most recent first, each with
/// its metrics attached.
///
/// # Errors
///
/// Returns [`DbError`] if either query fails or a row cannot be converted.
pub async fn query_runs(
    db: &CollectorDb,
    params: &MetricsQueryParams,
) -> Result<Vec<AgentRunSummary>, DbError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let mut sql = String::from(
        "SELECT id, agent_name, status, started_at, finished_at, error_message FROM agent_runs WHERE 1=1",
    );
    let mut query_params: Vec<DatabaseValue> = Vec::new();

    if let Some(agent_name) = &params.agent_name {
        sql.push_str(" AND agent_name = ?");
        query_params.push(DatabaseValue::String(agent_name.clone()));
    }

    if let Some(started_after) = params.started_after {
        sql.push_str(" AND started_at > ?");
        query_params.push(DatabaseValue::String(started_after.to_rfc3339()));
    }

    sql.push_str(" ORDER BY started_at ASC LIMIT ?");
    query_params.push(DatabaseValue::Int64(i64::from(limit)));

    let rows = db.query(&sql, &query_params).await?;

    let mut summaries = Vec::with_capacity(rows.len());
    for row in &rows {
        let run_id: i64 = row.to_value("id").map_err(conversion_error)?;
        let metrics = query_metrics(db, run_id).await?;
        summaries.push(row_to_summary(row, metrics)?);
    }

    Ok(summaries)
}

/// Fetches the metrics recorded for a single run.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a row cannot be converted.
pub async fn query_metrics(
    db: &CollectorDb,
    run_id: i64,
) -> Result<BTreeMap<String, MetricValue>, DbError> {
    let rows = db
        .query(
            "SELECT metric_name, metric_value_number, metric_value_text FROM agent_metrics WHERE run_id = ?",
            &[DatabaseValue::Int64(run_id)],
        )
        .await?;

    let mut metrics = BTreeMap::new();
    for row in &rows {
        let name: String = row.to_value("metric_name").map_err(conversion_error)?;
        let number: Option<f64> = row.to_value("metric_value_number").map_err(conversion_error)?;
        let value = if let Some(n) = number {
            MetricValue::Number(n)
        } else {
            let text: Option<String> = row.to_value("metric_value_text").map_err(conversion_error)?;
            MetricValue::Text(text.unwrap_or_default())
        };
        metrics.insert(name, value);
    }

    Ok(metrics)
}

/// Increments (or creates) the daily summary row for an agent's run on the
/// given UTC calendar day.
///
/// # Errors
///
/// Returns [`DbError`] if the upsert fails.
pub async fn upsert_daily_summary(
    db: &CollectorDb,
    agent_name: &str,
    day: chrono::NaiveDate,
    status: RunStatus,
) -> Result<(), DbError> {
    let existing = db
        .query(
            "SELECT run_count, success_count, failed_count FROM agent_daily_summaries
             WHERE agent_name = ? AND summary_date = ?",
            &[
                DatabaseValue::String(agent_name.to_string()),
                DatabaseValue::String(day.to_string()),
            ],
        )
        .await?;

    let (run_count, success_count, failed_count) = existing
        .first()
        .map(|row| {
            let run_count: i64 = row.to_value("run_count").unwrap_or(0);
            let success_count: i64 = row.to_value("success_count").unwrap_or(0);
            let failed_count: i64 = row.to_value("failed_count").unwrap_or(0);
            (run_count, success_count, failed_count)
        })
        .unwrap_or((0, 0, 0));

    let run_count = run_count + 1;
    let success_count = success_count + i64::from(status == RunStatus::Success);
    let failed_count = failed_count + i64::from(status == RunStatus::Failed);

    if existing.is_empty() {
        db.exec(
            "INSERT INTO agent_daily_summaries (agent_name, summary_date, run_count, success_count, failed_count)
             VALUES (?, ?, ?, ?, ?)",
            &[
                DatabaseValue::String(agent_name.to_string()),
                DatabaseValue::String(day.to_string()),
                DatabaseValue::Int64(run_count),
                DatabaseValue::Int64(success_count),
                DatabaseValue::Int64(failed_count),
            ],
        )
        .await?;
    } else {
        db.exec(
            "UPDATE agent_daily_summaries SET run_count = ?, success_count = ?, failed_count = ?
             WHERE agent_name = ? AND summary_date = ?",
            &[
                DatabaseValue::Int64(run_count),
                DatabaseValue::Int64(success_count),
                DatabaseValue::Int64(failed_count),
                DatabaseValue::String(agent_name.to_string()),
                DatabaseValue::String(day.to_string()),
            ],
        )
        .await?;
    }

    Ok(())
}

/// Confirms the database is reachable by executing a trivial query.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub async fn health_check(db: &CollectorDb) -> Result<(), DbError> {
    db.query("SELECT 1", &[]).await?;
    Ok(())
}

fn row_to_summary(row: &Row, metrics: BTreeMap<String, MetricValue>) -> Result<AgentRunSummary, DbError> {
    let run_id: i64 = row.to_value("id").map_err(conversion_error)?;
    let agent_name: String = row.to_value("agent_name").map_err(conversion_error)?;
    let status_str: String = row.to_value("status").map_err(conversion_error)?;
    let started_at_str: String = row.to_value("started_at").map_err(conversion_error)?;
    let finished_at_str: Option<String> = row.to_value("finished_at").map_err(conversion_error)?;
    let error_message: Option<String> = row.to_value("error_message").map_err(conversion_error)?;

    let status = status_str
        .parse::<RunStatus>()
        .map_err(|message| DbError::Conversion { message })?;
    let started_at = parse_rfc3339(&started_at_str)?;
    let finished_at = finished_at_str.map(|s| parse_rfc3339(&s)).transpose()?;

    Ok(AgentRunSummary {
        run_id,
        agent_name,
        started_at,
        finished_at,
        status: status.as_str().to_string(),
        error_message,
        metrics,
    })
}

fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::Conversion {
            message: format!("invalid timestamp {value:?}: {e}"),
        })
}

fn opt_str(value: Option<&str>) -> DatabaseValue {
    value.map_or(DatabaseValue::Null, |s| DatabaseValue::String(s.to_string()))
}

fn returning_id(rows: &[Row]) -> i64 {
    rows.first().and_then(|r| r.to_value("id").ok()).unwrap_or(0)
}

fn conversion_error(e: impl std::fmt::Display) -> DbError {
    DbError::Conversion {
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limit_is_clamped_within_bounds() {
        let params = MetricsQueryParams {
            limit: Some(10_000),
            ..Default::default()
        };
        assert_eq!(params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT), MAX_LIMIT);

        let params = MetricsQueryParams {
            limit: Some(0),
            ..Default::default()
        };
        assert_eq!(params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT), 1);

        let params = MetricsQueryParams::default();
        assert_eq!(params.limit.unwrap_or(DEFAULT_LIMIT), DEFAULT_LIMIT);
    }
}
