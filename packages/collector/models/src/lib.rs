#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Request, response, and row types for the metrics collector API.
//!
//! These types are serialized to JSON for the REST API. They are separate
//! from the database access layer so the wire contract can evolve
//! independently of storage details.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of an agent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Still executing; `finished_at` is null.
    Running,
    /// Completed without error.
    Success,
    /// Completed with an error.
    Failed,
}

impl RunStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// A scalar metric value as received over the wire — either numeric or text.
///
/// Integers and floats (excluding booleans) are `Number`; everything else,
/// including booleans, is stringified into `Text`. This mirrors the
/// ingest classification rule, not Rust's own type system, so the
/// conversion lives here rather than relying on `serde`'s native bool/number
/// distinction downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

impl MetricValue {
    /// Classifies a raw JSON value the way the ingest handler does: numeric
    /// (non-boolean) values become `Number`, everything else becomes `Text`
    /// using its JSON/display representation.
    #[must_use]
    pub fn classify(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Number(n) => {
                if let Some(f) = n.as_f64() {
                    Self::Number(f)
                } else {
                    Self::Text(n.to_string())
                }
            }
            serde_json::Value::Bool(b) => Self::Text(if *b { "True".to_string() } else { "False".to_string() }),
            serde_json::Value::String(s) => Self::Text(s.clone()),
            other => Self::Text(other.to_string()),
        }
    }
}

/// Payload pushed by `BaseAgent`-equivalent runtimes after executing an agent.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsPushRequest {
    pub agent_name: String,
    #[serde(default)]
    pub metrics: BTreeMap<String, serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Response to a successful `POST /metrics`.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsPushResponse {
    pub run_id: i64,
    pub agent_name: String,
    pub status: String,
}

/// One flattened run as returned by `GET /metrics`.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRunSummary {
    pub run_id: i64,
    pub agent_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: String,
    pub error_message: Option<String>,
    pub metrics: BTreeMap<String, MetricValue>,
}

/// Query parameters accepted by `GET /metrics`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsQueryParams {
    pub agent_name: Option<String>,
    pub started_after: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct ApiHealth {
    pub status: &'static str,
}

impl Default for ApiHealth {
    fn default() -> Self {
        Self { status: "ok" }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_integers_and_floats_as_numbers() {
        assert_eq!(
            MetricValue::classify(&serde_json::json!(3)),
            MetricValue::Number(3.0)
        );
        assert_eq!(
            MetricValue::classify(&serde_json::json!(3.5)),
            MetricValue::Number(3.5)
        );
    }

    #[test]
    fn classifies_booleans_and_strings_as_text() {
        assert_eq!(
            MetricValue::classify(&serde_json::json!(true)),
            MetricValue::Text("True".to_string())
        );
        assert_eq!(
            MetricValue::classify(&serde_json::json!("ok")),
            MetricValue::Text("ok".to_string())
        );
    }

    #[test]
    fn run_status_round_trips_through_str() {
        assert_eq!("failed".parse::<RunStatus>().unwrap(), RunStatus::Failed);
        assert_eq!(RunStatus::Success.as_str(), "success");
    }
}
