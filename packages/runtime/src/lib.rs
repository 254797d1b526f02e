#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Agent runtime contract shared by every agent in the platform.
//!
//! An agent is a named unit that, when executed, produces a flat mapping
//! of metric name to scalar. [`execute`] wraps an agent's [`Agent::run`]
//! with the bookkeeping every agent needs: a started/finished timestamp
//! pair and a push of the outcome to the collector, regardless of whether
//! the body succeeded.

mod collector_client;
mod registry;
pub mod retry;

pub use collector_client::CollectorClient;
pub use registry::AgentRegistry;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A flat mapping of metric name to scalar JSON value, as produced by an
/// agent's `run()`.
pub type MetricMap = BTreeMap<String, serde_json::Value>;

/// Errors an agent body or the runtime wrapper around it can raise.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The agent body failed; `message` is pushed to the collector as the
    /// run's `error` field.
    #[error("{message}")]
    Failed { message: String },

    /// An HTTP call the agent made failed.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors raised by the runtime wrapper itself, distinct from agent body
/// errors (those are [`AgentError`]).
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The collector rejected or could not be reached for a metrics push.
    #[error("collector push failed: {message}")]
    CollectorPush { message: String },

    /// An HTTP error occurred while reaching the collector.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// A named unit of recurring work. Implementors should be cheap to clone
/// or hold behind an `Arc`, since the same instance is invoked on every
/// scheduled firing.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Short, stable identifier used for registry lookup, metrics
    /// attribution, and per-name concurrency locking.
    fn name(&self) -> &str;

    /// Runs the agent body once, returning its metrics on success.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] if the agent's work fails. The runtime still
    /// records the run (with an empty metrics map and the error message)
    /// before propagating the error to the caller.
    async fn run(&self) -> Result<MetricMap, AgentError>;
}

/// Brackets a single agent run: records `started_at`/`finished_at` and
/// pushes the outcome to the collector from every exit path.
///
/// This is a scoped guard in spirit, not in `Drop` — the push is an async
/// operation and async destructors aren't available, so `finish` must be
/// called explicitly on every exit path of [`execute`]. It is not exported
/// for use outside this module; external callers only see [`execute`].
struct RunRecorder<'a> {
    agent_name: &'a str,
    collector: &'a CollectorClient,
    started_at: DateTime<Utc>,
}

impl<'a> RunRecorder<'a> {
    fn start(agent_name: &'a str, collector: &'a CollectorClient) -> Self {
        Self {
            agent_name,
            collector,
            started_at: Utc::now(),
        }
    }

    /// Pushes the run outcome to the collector. Failure to push is logged
    /// and swallowed — it must never mask the agent's own outcome.
    async fn finish(&self, metrics: &MetricMap, error: Option<&str>) {
        let finished_at = Utc::now();
        if let Err(e) = self
            .collector
            .push(self.agent_name, metrics, self.started_at, finished_at, error)
            .await
        {
            log::error!("failed to push metrics for agent {:?}: {e}", self.agent_name);
        }
    }
}

/// Runs `agent`, recording the run with the collector regardless of
/// outcome, then returns the agent's own result unchanged.
///
/// # Errors
///
/// Returns the error `agent.run()` returned, after recording it.
pub async fn execute(agent: &dyn Agent, collector: &CollectorClient) -> Result<MetricMap, AgentError> {
    let recorder = RunRecorder::start(agent.name(), collector);

    match agent.run().await {
        Ok(metrics) => {
            recorder.finish(&metrics, None).await;
            Ok(metrics)
        }
        Err(e) => {
            recorder.finish(&MetricMap::new(), Some(&e.to_string())).await;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Succeeds;

    #[async_trait]
    impl Agent for Succeeds {
        fn name(&self) -> &str {
            "succeeds"
        }

        async fn run(&self) -> Result<MetricMap, AgentError> {
            let mut metrics = MetricMap::new();
            metrics.insert("count".to_string(), serde_json::json!(3));
            Ok(metrics)
        }
    }

    struct Fails;

    #[async_trait]
    impl Agent for Fails {
        fn name(&self) -> &str {
            "fails"
        }

        async fn run(&self) -> Result<MetricMap, AgentError> {
            Err(AgentError::Failed {
                message: "boom".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn execute_propagates_success() {
        let collector = CollectorClient::new("http://127.0.0.1:0".to_string());
        let result = execute(&Succeeds, &collector).await.unwrap();
        assert_eq!(result.get("count"), Some(&serde_json::json!(3)));
    }

    #[tokio::test]
    async fn execute_propagates_failure_even_though_push_also_failed() {
        // Port 0 is never listening, so the collector push itself fails;
        // execute must still surface the agent's own error, not the push
        // failure.
        let collector = CollectorClient::new("http://127.0.0.1:0".to_string());
        let err = execute(&Fails, &collector).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }
}
