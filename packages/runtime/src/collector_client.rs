//! HTTP client for pushing run envelopes to the metrics collector.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::RuntimeError;

const DEFAULT_COLLECTOR_URL: &str = "http://collector:8000";
const PUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct MetricsPushRequest<'a> {
    agent_name: &'a str,
    metrics: &'a BTreeMap<String, serde_json::Value>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    error: Option<&'a str>,
}

/// Pushes a single run envelope to the collector.
#[derive(Clone)]
pub struct CollectorClient {
    base_url: String,
    client: reqwest::Client,
}

impl CollectorClient {
    #[must_use]
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::builder()
                .timeout(PUSH_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Builds a client from `COLLECTOR_URL`, defaulting to
    /// `http://collector:8000`.
    #[must_use]
    pub fn from_env() -> Self {
        let base_url = std::env::var("COLLECTOR_URL").unwrap_or_else(|_| DEFAULT_COLLECTOR_URL.to_string());
        Self::new(base_url)
    }

    /// Pushes one metrics envelope to `POST /metrics` on the collector.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] if the request fails or the collector
    /// responds with a non-success status.
    pub async fn push(
        &self,
        agent_name: &str,
        metrics: &BTreeMap<String, serde_json::Value>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<(), RuntimeError> {
        let url = format!("{}/metrics", self.base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .json(&MetricsPushRequest {
                agent_name,
                metrics,
                started_at,
                finished_at,
                error,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RuntimeError::CollectorPush {
                message: format!("collector returned {status}: {body}"),
            });
        }

        Ok(())
    }
}
