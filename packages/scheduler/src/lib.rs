#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Cron-like scheduler: dispatches agent runs on bounded-concurrency
//! workers with retry and per-agent at-most-one-active-run semantics.
//!
//! Two halves, run concurrently:
//!
//! - A **beat** loop, evaluating every [`trigger::Trigger`] once a second
//!   and enqueuing a task onto the durable [`queue::TaskQueue`] for any
//!   that should fire.
//! - A pool of **worker** loops, each popping ready tasks off the queue
//!   and executing them through [`agentops_runtime::execute`].
//!
//! Work is serialized through the queue so a worker crash never loses a
//! pending task — on restart, [`queue::TaskQueue::requeue_stuck`] recovers
//! anything left `running`. The per-agent lock that prevents concurrent
//! invocations of the same agent is in-memory only and does not survive a
//! restart: two processes racing to claim the same agent name is the
//! only case that matters, and that's still serialized correctly on a
//! single process through the queue.

pub mod config;
pub mod day_range;
pub mod queue;
pub mod trigger;

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};

use agentops_runtime::{AgentRegistry, CollectorClient};
pub use config::{ScheduleConfig, ScheduleEntry};
pub use queue::TaskQueue;
pub use trigger::Trigger;

/// How often the beat loop evaluates triggers.
const BEAT_INTERVAL: Duration = Duration::from_secs(1);

/// How often an idle worker polls the queue for new work.
const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Delay before re-offering a task whose agent is already running
/// elsewhere, so overlapping schedules don't produce concurrent
/// invocations of the same agent.
const BUSY_AGENT_REQUEUE_DELAY: Duration = Duration::from_secs(5);

/// Errors raised by the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// A day-range or schedule configuration string could not be parsed.
    #[error("invalid schedule: {message}")]
    InvalidSchedule { message: String },

    /// The durable queue could not be read or written.
    #[error("queue error: {message}")]
    Queue { message: String },
}

/// Tracks, in memory, which agent names currently have an active run and
/// the last UTC calendar date each cron entry fired — both are
/// process-local and intentionally do not survive a restart.
#[derive(Default)]
struct SchedulerState {
    active_agents: HashSet<String>,
    last_fired_date: BTreeMap<String, NaiveDate>,
    last_fired_instant: BTreeMap<String, Instant>,
}

/// Dispatches scheduled agent runs with bounded concurrency, retry, and
/// per-agent exclusivity.
#[derive(Clone)]
pub struct Scheduler {
    registry: AgentRegistry,
    collector: CollectorClient,
    queue: TaskQueue,
    schedule: ScheduleConfig,
    worker_count: usize,
    state: Arc<Mutex<SchedulerState>>,
}

impl Scheduler {
    #[must_use]
    pub fn new(
        registry: AgentRegistry,
        collector: CollectorClient,
        queue: TaskQueue,
        schedule: ScheduleConfig,
        worker_count: usize,
    ) -> Self {
        Self {
            registry,
            collector,
            queue,
            schedule,
            worker_count: worker_count.max(1),
            state: Arc::new(Mutex::new(SchedulerState::default())),
        }
    }

    /// Runs the beat loop and worker pool concurrently until `shutdown`
    /// resolves (a `tokio::sync::watch` receiver flipped to `true`, or any
    /// future — e.g. `tokio::signal::ctrl_c()`). In-flight tasks run to
    /// completion; only the loops themselves stop.
    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        if let Err(e) = self.queue.requeue_stuck().await {
            log::warn!("failed to requeue stuck tasks on startup: {e}");
        }

        let mut workers = Vec::with_capacity(self.worker_count);
        for id in 0..self.worker_count {
            let scheduler = self.clone();
            let mut worker_shutdown = shutdown.clone();
            workers.push(tokio::spawn(async move {
                scheduler.worker_loop(id, &mut worker_shutdown).await;
            }));
        }

        let beat = {
            let scheduler = self.clone();
            let mut beat_shutdown = shutdown.clone();
            tokio::spawn(async move {
                scheduler.beat_loop(&mut beat_shutdown).await;
            })
        };

        let _ = shutdown.changed().await;
        let _ = beat.await;
        for worker in workers {
            let _ = worker.await;
        }
    }

    async fn beat_loop(&self, shutdown: &mut tokio::sync::watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }
            self.tick_beat().await;
            tokio::select! {
                () = tokio::time::sleep(BEAT_INTERVAL) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    async fn tick_beat(&self) {
        let now = Utc::now();
        for (entry_name, entry) in &self.schedule {
            let should_fire = match &entry.trigger {
                Trigger::Cron { .. } => {
                    let last = self.state.lock().unwrap_or_else(|p| p.into_inner()).last_fired_date.get(entry_name).copied();
                    entry.trigger.should_fire_cron(now, last)
                }
                Trigger::Interval { period } => {
                    let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
                    let elapsed = state
                        .last_fired_instant
                        .get(entry_name)
                        .is_none_or(|last| last.elapsed() >= *period);
                    elapsed
                }
            };

            if !should_fire {
                continue;
            }

            // Mark fired before enqueuing: a long-running task spanning a
            // poll boundary must not cause a double-fire.
            {
                let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
                state.last_fired_date.insert(entry_name.clone(), now.date_naive());
                state.last_fired_instant.insert(entry_name.clone(), Instant::now());
            }

            match self.queue.enqueue(entry_name, &entry.agent_name).await {
                Ok(task_id) => log::info!("enqueued {entry_name} ({task_id}) -> agent {}", entry.agent_name),
                Err(e) => log::error!("failed to enqueue {entry_name}: {e}"),
            }
        }
    }

    async fn worker_loop(&self, worker_id: usize, shutdown: &mut tokio::sync::watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }

            match self.queue.pop_ready().await {
                Ok(Some(task)) => self.run_task(worker_id, task).await,
                Ok(None) => {
                    tokio::select! {
                        () = tokio::time::sleep(WORKER_POLL_INTERVAL) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    log::error!("worker {worker_id}: queue error: {e}");
                    tokio::time::sleep(WORKER_POLL_INTERVAL).await;
                }
            }
        }
    }

    async fn run_task(&self, worker_id: usize, task: queue::Task) {
        let Some(agent) = self.registry.get(&task.agent_name) else {
            log::error!("worker {worker_id}: unknown agent {:?}, failing task without retry", task.agent_name);
            if let Err(e) = self
                .queue
                .mark_fatal(&task.id, &format!("unknown agent name: {}", task.agent_name))
                .await
            {
                log::error!("failed to mark task {} fatal: {e}", task.id);
            }
            return;
        };

        if !self.try_acquire(&task.agent_name) {
            log::debug!(
                "worker {worker_id}: {} already running elsewhere, re-queuing {}",
                task.agent_name,
                task.id
            );
            let delay_seconds = i64::try_from(BUSY_AGENT_REQUEUE_DELAY.as_secs()).unwrap_or(5);
            if let Err(e) = self.queue.defer(&task.id, delay_seconds).await {
                log::error!("failed to re-queue busy task {}: {e}", task.id);
            } else {
                tokio::time::sleep(BUSY_AGENT_REQUEUE_DELAY).await;
            }
            return;
        }

        let result = agentops_runtime::execute(agent.as_ref(), &self.collector).await;
        self.release(&task.agent_name);

        match result {
            Ok(metrics) => {
                log::info!("worker {worker_id}: {} succeeded with {} metrics", task.agent_name, metrics.len());
                if let Err(e) = self.queue.mark_done(&task.id).await {
                    log::error!("failed to mark task {} done: {e}", task.id);
                }
            }
            Err(e) => {
                log::warn!("worker {worker_id}: {} failed: {e}", task.agent_name);
                match self.queue.record_failure(&task, &e.to_string()).await {
                    Ok(true) => log::info!("task {} will be retried", task.id),
                    Ok(false) => log::error!("task {} exhausted retries: {e}", task.id),
                    Err(queue_err) => log::error!("failed to record failure for {}: {queue_err}", task.id),
                }
            }
        }
    }

    /// Tries to mark `agent_name` as active. Returns `false` if another
    /// worker already holds it.
    fn try_acquire(&self, agent_name: &str) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.active_agents.insert(agent_name.to_string())
    }

    fn release(&self, agent_name: &str) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.active_agents.remove(agent_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentops_runtime::{Agent, AgentError, MetricMap};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingAgent {
        name: &'static str,
        calls: Arc<AtomicU32>,
        fail: bool,
    }

    #[async_trait]
    impl Agent for CountingAgent {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(&self) -> Result<MetricMap, AgentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(AgentError::Failed {
                    message: "boom".to_string(),
                })
            } else {
                Ok(MetricMap::new())
            }
        }
    }

    async fn temp_queue() -> TaskQueue {
        let dir = std::env::temp_dir().join(format!("agentops-scheduler-test-{}", uuid::Uuid::new_v4()));
        TaskQueue::open(&dir.join("queue.db")).await.unwrap()
    }

    #[tokio::test]
    async fn unknown_agent_fails_without_retry() {
        let queue = temp_queue().await;
        let registry = AgentRegistry::new();
        let collector = CollectorClient::new("http://127.0.0.1:0".to_string());
        let scheduler = Scheduler::new(registry, collector, queue.clone(), ScheduleConfig::new(), 1);

        queue.enqueue("x", "ghost").await.unwrap();
        let task = queue.pop_ready().await.unwrap().unwrap();
        scheduler.run_task(0, task).await;

        assert_eq!(queue.count(queue::TaskStatus::Failed).await.unwrap(), 1);
        assert_eq!(queue.count(queue::TaskStatus::Pending).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn successful_agent_marks_task_done() {
        let queue = temp_queue().await;
        let calls = Arc::new(AtomicU32::new(0));
        let registry = AgentRegistry::new().with(Arc::new(CountingAgent {
            name: "succeeds",
            calls: calls.clone(),
            fail: false,
        }));
        let collector = CollectorClient::new("http://127.0.0.1:0".to_string());
        let scheduler = Scheduler::new(registry, collector, queue.clone(), ScheduleConfig::new(), 1);

        queue.enqueue("x", "succeeds").await.unwrap();
        let task = queue.pop_ready().await.unwrap().unwrap();
        scheduler.run_task(0, task).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.count(queue::TaskStatus::Done).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn busy_agent_is_requeued_instead_of_run_concurrently() {
        let queue = temp_queue().await;
        let calls = Arc::new(AtomicU32::new(0));
        let registry = AgentRegistry::new().with(Arc::new(CountingAgent {
            name: "shared",
            calls: calls.clone(),
            fail: false,
        }));
        let collector = CollectorClient::new("http://127.0.0.1:0".to_string());
        let scheduler = Scheduler::new(registry, collector, queue.clone(), ScheduleConfig::new(), 1);

        assert!(scheduler.try_acquire("shared"));

        queue.enqueue("x", "shared").await.unwrap();
        let task = queue.pop_ready().await.unwrap().unwrap();

        // Simulate the requeue path without sleeping out the real delay.
        assert!(!scheduler.try_acquire("shared"));
        queue.defer(&task.id, 0).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(queue.count(queue::TaskStatus::Pending).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn busy_agent_contention_never_exhausts_the_retry_budget() {
        // A task whose agent is permanently held by another worker must
        // keep being deferred forever, not eventually fail, since it
        // never actually got a chance to run.
        let queue = temp_queue().await;
        let registry = AgentRegistry::new().with(Arc::new(CountingAgent {
            name: "shared",
            calls: Arc::new(AtomicU32::new(0)),
            fail: false,
        }));
        let collector = CollectorClient::new("http://127.0.0.1:0".to_string());
        let scheduler = Scheduler::new(registry, collector, queue.clone(), ScheduleConfig::new(), 1);

        assert!(scheduler.try_acquire("shared"));
        queue.enqueue("x", "shared").await.unwrap();

        for _ in 0..(queue::DEFAULT_MAX_RETRIES + 3) {
            let task = queue.pop_ready().await.unwrap().unwrap();
            assert_eq!(task.attempt, 0);
            queue.defer(&task.id, 0).await.unwrap();
        }

        assert_eq!(queue.count(queue::TaskStatus::Pending).await.unwrap(), 1);
        assert_eq!(queue.count(queue::TaskStatus::Failed).await.unwrap(), 0);
    }
}
