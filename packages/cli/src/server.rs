//! Wiring for the `serve`, `run-once`, and `list-agents` subcommands: the
//! same environment-driven construction of the collector client, the
//! pipeline store, and the agent registry that a deployed process uses,
//! built once here so all three commands share it.

use std::sync::Arc;

use agentops_leadgen::agent::{LeadGenerationAgent, OnboardingClientsAgent};
use agentops_leadgen::PipelineDb;
use agentops_runtime::{AgentRegistry, CollectorClient};
use agentops_scheduler::{ScheduleConfig, Scheduler, TaskQueue};

/// Builds the registry of every agent this process knows how to run:
/// the real lead-generation driver and the onboarding-clients stub (see
/// `agentops_leadgen::agent` for why the latter is a stub here).
fn build_registry(db: PipelineDb) -> AgentRegistry {
    AgentRegistry::new()
        .with(Arc::new(LeadGenerationAgent::new(db)))
        .with(Arc::new(OnboardingClientsAgent))
}

/// `QUEUE_PATH`, falling back to a file named `agentops-queue.db` under
/// `TMP_DIR` (or the OS temp directory), mirroring
/// `agentops_leadgen::db`'s own embedded-store default.
fn queue_path() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("QUEUE_PATH") {
        return std::path::PathBuf::from(path);
    }
    let dir = std::env::var("TMP_DIR").map_or_else(|_| std::env::temp_dir(), std::path::PathBuf::from);
    dir.join("agentops-queue.db")
}

/// `SCHEDULER_WORKERS`, defaulting to 4 — how many worker loops pop tasks
/// off the durable queue concurrently.
fn worker_count() -> usize {
    std::env::var("SCHEDULER_WORKERS")
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|n| *n > 0)
        .unwrap_or(4)
}

fn facade_bind_addr() -> String {
    std::env::var("FACADE_BIND_ADDR")
        .or_else(|_| std::env::var("BIND_ADDR"))
        .unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn facade_port() -> u16 {
    std::env::var("FACADE_PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(8081)
}

/// Resolves once both a ctrl-c and (on unix) a SIGTERM arrive — the
/// graceful-shutdown signal every long-running loop in this binary
/// selects against.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to install ctrl-c handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => log::info!("received ctrl-c, shutting down"),
        () = terminate => log::info!("received SIGTERM, shutting down"),
    }
}

/// Runs the cron-like scheduler (beat + workers), the lead-generation
/// pipeline's own daily schedule, and the internal snapshot facade
/// concurrently, until a shutdown signal arrives. In-flight work is
/// allowed to finish; only the loops themselves stop (see
/// `agentops_scheduler::Scheduler::run` and
/// `agentops_leadgen::schedule_policy::run`).
///
/// # Errors
///
/// Returns an error if the pipeline database or durable queue can't be
/// opened, or the facade can't bind its listener — all fatal
/// configuration conditions per the platform's exit-code contract.
pub async fn serve() -> Result<(), Box<dyn std::error::Error>> {
    let db = PipelineDb::connect_from_env().await?;
    let queue = TaskQueue::open(&queue_path()).await?;
    let collector = CollectorClient::from_env();
    let registry = build_registry(db.clone());
    let schedule: ScheduleConfig = agentops_scheduler::config::default_schedule();

    let scheduler = Scheduler::new(registry, collector, queue, schedule, worker_count());
    let policy = agentops_leadgen::schedule_policy::SchedulePolicy::from_env()?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx.clone()));

    let policy_db = db.clone();
    let policy_task = tokio::spawn(agentops_leadgen::schedule_policy::run(
        policy,
        move || {
            let db = policy_db.clone();
            async move {
                if let Err(e) = agentops_leadgen::agent::run_once(&db).await {
                    log::error!("scheduled pipeline run failed: {e}");
                }
            }
        },
        shutdown_rx.clone(),
    ));

    let mut facade_task = tokio::spawn(agentops_leadgen::facade::run_server(
        db,
        &facade_bind_addr(),
        facade_port(),
        shutdown_rx,
    ));

    tokio::select! {
        () = shutdown_signal() => {
            let _ = shutdown_tx.send(true);
            let _ = scheduler_task.await;
            let _ = policy_task.await;
            facade_task.await??;
        }
        result = &mut facade_task => {
            // The facade exited on its own — a bind failure is the only
            // way that happens, a fatal configuration condition. Stop
            // the other two loops rather than leaving them running
            // headless.
            let _ = shutdown_tx.send(true);
            scheduler_task.abort();
            policy_task.abort();
            return match result {
                Ok(inner) => inner.map_err(|e| Box::new(e) as Box<dyn std::error::Error>),
                Err(e) => Err(Box::new(e)),
            };
        }
    }

    Ok(())
}

/// Runs the lead-generation pipeline once, outside the scheduler, and
/// prints its per-stage counts as JSON to stdout. Used for manual
/// catch-up runs and local testing, going through the same
/// `agentops_leadgen::agent::run_once` construction as a scheduled fire
/// and the facade's `POST /run-now`.
///
/// # Errors
///
/// Returns an error if the pipeline database can't be opened, or the
/// pipeline driver's own catastrophic failure path is hit.
pub async fn run_once() -> Result<(), Box<dyn std::error::Error>> {
    let db = PipelineDb::connect_from_env().await?;
    let counts = agentops_leadgen::agent::run_once(&db).await?;
    println!("{}", serde_json::to_string_pretty(&counts)?);
    Ok(())
}

/// Prints every agent name registered with the scheduler, one per line.
///
/// # Errors
///
/// Returns an error if the pipeline database can't be opened.
pub async fn list_agents() -> Result<(), Box<dyn std::error::Error>> {
    let db = PipelineDb::connect_from_env().await?;
    let registry = build_registry(db);
    for name in registry.names() {
        println!("{name}");
    }
    Ok(())
}
