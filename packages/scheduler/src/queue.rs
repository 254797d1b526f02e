//! Durable task queue backing the scheduler's beat/worker split.
//!
//! Tasks are rows in a sqlite table rather than an in-memory channel, so a
//! worker crash — or a process restart — does not lose a pending or
//! in-flight task: on restart, anything left `running` is simply picked up
//! again by [`TaskQueue::requeue_stuck`]. The original enqueue identity
//! (the task's `id`) is preserved across retries so the retry count stays
//! bounded per [`crate::SchedulerError`].

use chrono::{DateTime, Utc};
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue};
use uuid::Uuid;

use crate::SchedulerError;

/// Default number of retry attempts after the first failure (so 4 total
/// tries), per the platform's fixed scheduler retry policy.
pub const DEFAULT_MAX_RETRIES: i64 = 3;

/// Fixed delay applied before a retried task becomes eligible again.
pub const DEFAULT_RETRY_DELAY_SECONDS: i64 = 30;

/// Status of a queued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl TaskStatus {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "done" => Self::Done,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// A task popped off the queue, ready to execute.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub entry_name: String,
    pub agent_name: String,
    pub attempt: i64,
    pub max_retries: i64,
}

/// A sqlite-backed durable queue of agent-run tasks.
#[derive(Clone)]
pub struct TaskQueue {
    db: std::sync::Arc<dyn Database>,
}

impl TaskQueue {
    /// Opens (creating if necessary) the queue database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] if the file can't be opened or the
    /// schema can't be created.
    pub async fn open(path: &std::path::Path) -> Result<Self, SchedulerError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| SchedulerError::Queue {
                    message: format!("failed to create {parent:?}: {e}"),
                })?;
            }
        }
        let db = switchy_database_connection::init_sqlite_rusqlite(Some(path))
            .await
            .map_err(|e| SchedulerError::Queue { message: e.to_string() })?;
        let queue = Self {
            db: std::sync::Arc::from(db),
        };
        queue.ensure_schema().await?;
        Ok(queue)
    }

    async fn ensure_schema(&self) -> Result<(), SchedulerError> {
        self.db
            .exec_raw(
                "CREATE TABLE IF NOT EXISTS scheduled_tasks (
                    id TEXT PRIMARY KEY,
                    entry_name TEXT NOT NULL,
                    agent_name TEXT NOT NULL,
                    attempt INTEGER NOT NULL DEFAULT 0,
                    max_retries INTEGER NOT NULL DEFAULT 3,
                    status TEXT NOT NULL,
                    run_at TEXT NOT NULL,
                    last_error TEXT,
                    enqueued_at TEXT NOT NULL
                )",
            )
            .await
            .map_err(|e| SchedulerError::Queue { message: e.to_string() })?;
        Ok(())
    }

    /// Enqueues a new task, eligible to run immediately.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] if the insert fails.
    pub async fn enqueue(&self, entry_name: &str, agent_name: &str) -> Result<String, SchedulerError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        self.db
            .exec_raw_params(
                "INSERT INTO scheduled_tasks
                    (id, entry_name, agent_name, attempt, max_retries, status, run_at, enqueued_at)
                 VALUES (?, ?, ?, 0, ?, ?, ?, ?)",
                &[
                    DatabaseValue::String(id.clone()),
                    DatabaseValue::String(entry_name.to_string()),
                    DatabaseValue::String(agent_name.to_string()),
                    DatabaseValue::Int64(DEFAULT_MAX_RETRIES),
                    DatabaseValue::String(TaskStatus::Pending.as_str().to_string()),
                    DatabaseValue::String(now.to_rfc3339()),
                    DatabaseValue::String(now.to_rfc3339()),
                ],
            )
            .await
            .map_err(|e| SchedulerError::Queue { message: e.to_string() })?;
        Ok(id)
    }

    /// Pops the oldest pending task whose `run_at` has passed, marking it
    /// `running`. Uses an optimistic compare-and-swap (`UPDATE ... WHERE
    /// status = 'pending'`) so concurrent workers racing the same row only
    /// let one of them win.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] if the underlying queries fail.
    pub async fn pop_ready(&self) -> Result<Option<Task>, SchedulerError> {
        let now = Utc::now().to_rfc3339();
        let rows = self
            .db
            .query_raw_params(
                "SELECT id, entry_name, agent_name, attempt, max_retries FROM scheduled_tasks
                 WHERE status = 'pending' AND run_at <= ? ORDER BY run_at ASC LIMIT 5",
                &[DatabaseValue::String(now.clone())],
            )
            .await
            .map_err(|e| SchedulerError::Queue { message: e.to_string() })?;

        for row in &rows {
            let id: String = row.to_value("id").map_err(conversion_error)?;
            let affected = self
                .db
                .exec_raw_params(
                    "UPDATE scheduled_tasks SET status = 'running' WHERE id = ? AND status = 'pending'",
                    &[DatabaseValue::String(id.clone())],
                )
                .await
                .map_err(|e| SchedulerError::Queue { message: e.to_string() })?;
            if affected == 1 {
                return Ok(Some(Task {
                    id,
                    entry_name: row.to_value("entry_name").map_err(conversion_error)?,
                    agent_name: row.to_value("agent_name").map_err(conversion_error)?,
                    attempt: row.to_value("attempt").map_err(conversion_error)?,
                    max_retries: row.to_value("max_retries").map_err(conversion_error)?,
                }));
            }
        }
        Ok(None)
    }

    /// Marks a task as done.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] if the update fails.
    pub async fn mark_done(&self, id: &str) -> Result<(), SchedulerError> {
        self.set_status(id, TaskStatus::Done, None).await
    }

    /// Records a failure for `task`. If attempts remain, re-queues the
    /// same row (preserving its `id`, so the retry count is bounded by
    /// `max_retries`) after `DEFAULT_RETRY_DELAY_SECONDS`; otherwise marks
    /// it `failed` for good.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] if the update fails.
    pub async fn record_failure(&self, task: &Task, error: &str) -> Result<bool, SchedulerError> {
        let next_attempt = task.attempt + 1;
        if next_attempt > task.max_retries {
            self.set_status(&task.id, TaskStatus::Failed, Some(error)).await?;
            return Ok(false);
        }
        let run_at = Utc::now() + chrono::Duration::seconds(DEFAULT_RETRY_DELAY_SECONDS);
        self.db
            .exec_raw_params(
                "UPDATE scheduled_tasks SET status = 'pending', attempt = ?, run_at = ?, last_error = ?
                 WHERE id = ?",
                &[
                    DatabaseValue::Int64(next_attempt),
                    DatabaseValue::String(run_at.to_rfc3339()),
                    DatabaseValue::String(error.to_string()),
                    DatabaseValue::String(task.id.clone()),
                ],
            )
            .await
            .map_err(|e| SchedulerError::Queue { message: e.to_string() })?;
        Ok(true)
    }

    /// Re-offers a task that never got to run because its agent was
    /// already busy elsewhere: resets it to `pending` with `run_at` pushed
    /// out by `delay_seconds`, leaving `attempt` untouched. Distinct from
    /// [`Self::record_failure`], which is for the agent body's own
    /// exceptions and counts against the retry budget — lock contention
    /// is not an agent failure and must not burn it.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] if the update fails.
    pub async fn defer(&self, id: &str, delay_seconds: i64) -> Result<(), SchedulerError> {
        let run_at = Utc::now() + chrono::Duration::seconds(delay_seconds);
        self.db
            .exec_raw_params(
                "UPDATE scheduled_tasks SET status = 'pending', run_at = ? WHERE id = ?",
                &[DatabaseValue::String(run_at.to_rfc3339()), DatabaseValue::String(id.to_string())],
            )
            .await
            .map_err(|e| SchedulerError::Queue { message: e.to_string() })?;
        Ok(())
    }

    /// Marks a task as failed immediately, with no retry — for fatal
    /// errors like an unknown agent name.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] if the update fails.
    pub async fn mark_fatal(&self, id: &str, error: &str) -> Result<(), SchedulerError> {
        self.set_status(id, TaskStatus::Failed, Some(error)).await
    }

    /// Re-queues any task still marked `running` from a previous process
    /// lifetime (a worker crash or an unclean shutdown). Called once at
    /// startup.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] if the update fails.
    pub async fn requeue_stuck(&self) -> Result<u64, SchedulerError> {
        self.db
            .exec_raw("UPDATE scheduled_tasks SET status = 'pending' WHERE status = 'running'")
            .await
            .map_err(|e| SchedulerError::Queue { message: e.to_string() })
    }

    async fn set_status(&self, id: &str, status: TaskStatus, error: Option<&str>) -> Result<(), SchedulerError> {
        self.db
            .exec_raw_params(
                "UPDATE scheduled_tasks SET status = ?, last_error = COALESCE(?, last_error) WHERE id = ?",
                &[
                    DatabaseValue::String(status.as_str().to_string()),
                    error.map_or(DatabaseValue::Null, |e| DatabaseValue::String(e.to_string())),
                    DatabaseValue::String(id.to_string()),
                ],
            )
            .await
            .map_err(|e| SchedulerError::Queue { message: e.to_string() })?;
        Ok(())
    }

    /// Counts tasks currently in `status`, for diagnostics and tests.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] if the query fails.
    pub async fn count(&self, status: TaskStatus) -> Result<i64, SchedulerError> {
        let rows = self
            .db
            .query_raw_params(
                "SELECT COUNT(*) as n FROM scheduled_tasks WHERE status = ?",
                &[DatabaseValue::String(status.as_str().to_string())],
            )
            .await
            .map_err(|e| SchedulerError::Queue { message: e.to_string() })?;
        rows.first()
            .map(|r| r.to_value::<i64>("n").map_err(conversion_error))
            .transpose()
            .map(|n| n.unwrap_or(0))
    }
}

fn conversion_error(e: impl std::fmt::Display) -> SchedulerError {
    SchedulerError::Queue { message: e.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_queue() -> TaskQueue {
        let db = switchy_database_connection::init_sqlite_rusqlite(None)
            .await
            .expect("in-memory sqlite connection");
        let queue = TaskQueue {
            db: std::sync::Arc::from(db),
        };
        queue.ensure_schema().await.unwrap();
        queue
    }

    #[tokio::test]
    async fn pop_ready_marks_task_running_and_hides_it_from_further_pops() {
        let queue = test_queue().await;
        let id = queue.enqueue("daily-lead-gen", "lead_generation").await.unwrap();
        let task = queue.pop_ready().await.unwrap().expect("task should be ready");
        assert_eq!(task.id, id);
        assert!(queue.pop_ready().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn record_failure_retries_until_max_then_fails() {
        let queue = test_queue().await;
        queue.enqueue("x", "agent").await.unwrap();
        let mut task = queue.pop_ready().await.unwrap().unwrap();

        for _ in 0..DEFAULT_MAX_RETRIES {
            let retried = queue.record_failure(&task, "boom").await.unwrap();
            assert!(retried);
            // Force it eligible again for the test instead of waiting out
            // the retry delay.
            queue
                .db
                .exec_raw_params(
                    "UPDATE scheduled_tasks SET run_at = ? WHERE id = ?",
                    &[
                        DatabaseValue::String(Utc::now().to_rfc3339()),
                        DatabaseValue::String(task.id.clone()),
                    ],
                )
                .await
                .unwrap();
            task = queue.pop_ready().await.unwrap().expect("still retryable");
        }

        let retried = queue.record_failure(&task, "boom").await.unwrap();
        assert!(!retried, "exhausted retries must not re-queue");
        assert_eq!(queue.count(TaskStatus::Failed).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn defer_resets_to_pending_without_incrementing_attempt() {
        let queue = test_queue().await;
        queue.enqueue("x", "agent").await.unwrap();
        let task = queue.pop_ready().await.unwrap().unwrap();
        assert_eq!(task.attempt, 0);

        queue.defer(&task.id, 0).await.unwrap();
        assert_eq!(queue.count(TaskStatus::Pending).await.unwrap(), 1);
        assert_eq!(queue.count(TaskStatus::Failed).await.unwrap(), 0);

        let task = queue.pop_ready().await.unwrap().expect("deferred task still pending");
        assert_eq!(task.attempt, 0, "deferring must not spend retry budget");
    }

    #[tokio::test]
    async fn mark_fatal_fails_without_retry() {
        let queue = test_queue().await;
        queue.enqueue("x", "unknown_agent").await.unwrap();
        let task = queue.pop_ready().await.unwrap().unwrap();
        queue.mark_fatal(&task.id, "unknown agent name").await.unwrap();
        assert_eq!(queue.count(TaskStatus::Failed).await.unwrap(), 1);
        assert_eq!(queue.count(TaskStatus::Pending).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn requeue_stuck_recovers_running_tasks_after_restart() {
        let queue = test_queue().await;
        queue.enqueue("x", "agent").await.unwrap();
        queue.pop_ready().await.unwrap();
        assert_eq!(queue.count(TaskStatus::Running).await.unwrap(), 1);
        queue.requeue_stuck().await.unwrap();
        assert_eq!(queue.count(TaskStatus::Running).await.unwrap(), 0);
        assert_eq!(queue.count(TaskStatus::Pending).await.unwrap(), 1);
    }
}
