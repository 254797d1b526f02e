#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Unified entry point for the agent platform's long-running processes
//! and ad-hoc operator commands.
//!
//! The metrics collector has its own binary (`agentops-collector`, see
//! `agentops_collector`); this one drives everything downstream of it:
//! the cron-like scheduler, the lead-generation pipeline's own daily
//! schedule and internal snapshot facade, and one-off pipeline runs and
//! registry inspection for operators.

mod server;

use std::process::ExitCode;

use clap::{Parser, Subcommand};

/// Scheduler, pipeline facade, and ad-hoc pipeline runs for the agent
/// platform.
#[derive(Parser)]
#[command(name = "agentops")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the cron-like scheduler, the lead-generation pipeline's daily
    /// schedule, and the internal snapshot HTTP facade until SIGTERM or
    /// SIGINT.
    Serve,
    /// Run the lead-generation pipeline once, synchronously, and print
    /// its per-stage counts as JSON. Useful for local testing and manual
    /// catch-up runs.
    RunOnce,
    /// List every agent name registered with the scheduler.
    ListAgents,
}

#[tokio::main]
async fn main() -> ExitCode {
    pretty_env_logger::init_custom_env("RUST_LOG");

    let result = match Cli::parse().command {
        Command::Serve => server::serve().await,
        Command::RunOnce => server::run_once().await,
        Command::ListAgents => server::list_agents().await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}
