//! # AutoLT - automated load-test scheduling and pipeline orchestration
//!
//! Two entrypoints mirror the two external timers the engine is designed
//! around:
//!
//!   autolt sync-schedule            # pull pending tasks, allocate windows
//!   autolt run-due                  # execute pipelines due this hour
//!   autolt status                   # queue/entry counts
//!   autolt daemon                   # both, on internal interval timers
//!
//! `run-due` stays alive until its spawned pipelines finish (they block for
//! hours by design); `daemon` keeps them detached.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use autolt_core::AutoLtConfig;
use autolt_jenkins::JenkinsPool;
use autolt_scheduler::{dispatch_due, Automation, PipelineRunner, SchedulerDb};
use autolt_tracker::JiraTracker;

#[derive(Parser)]
#[command(name = "autolt", version, about = "🤖 AutoLT - load-test scheduling & pipeline orchestration")]
struct Cli {
    /// Config file (default: ~/.autolt/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sync pending tasks from the tracker and allocate execution windows
    SyncSchedule,
    /// Run all pipelines whose window falls in the current hour
    RunDue,
    /// Show task and entry counts
    Status,
    /// Run both timers in-process
    Daemon {
        /// Seconds between sync+schedule runs
        #[arg(long, default_value = "3600")]
        sync_every: u64,
        /// Seconds between run-due checks
        #[arg(long, default_value = "3600")]
        run_every: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "autolt=debug" } else { "autolt=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => AutoLtConfig::load_from(path)?,
        None => AutoLtConfig::load()?,
    };
    config.validate()?;

    let db = SchedulerDb::open(std::path::Path::new(&config.store.path))?.into_shared();
    let tracker = Arc::new(JiraTracker::new(
        &config.tracker,
        config.schedule.default_pipeline_kind()?,
    )?);
    let build = Arc::new(JenkinsPool::new(&config.jenkins)?);
    let runner = Arc::new(PipelineRunner::new(
        db.clone(),
        build,
        config.jenkins.jobs.clone(),
        config.pipeline.clone(),
    ));
    let automation = Automation::new(tracker, db.clone(), &config);

    match cli.command {
        Command::SyncSchedule => {
            let summary = automation.sync_and_schedule().await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::RunDue => {
            let (summary, workers) = dispatch_due(&runner, chrono_now()).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            // The pipelines must outlive this invocation - wait them out.
            for worker in workers {
                if let Err(e) = worker.await {
                    tracing::error!("❌ Pipeline worker panicked: {}", e);
                }
            }
        }
        Command::Status => {
            let counts = db.lock().await.status_counts()?;
            println!("{}", serde_json::to_string_pretty(&counts)?);
        }
        Command::Daemon {
            sync_every,
            run_every,
        } => {
            run_daemon(automation, runner, sync_every, run_every).await;
        }
    }

    Ok(())
}

fn chrono_now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}

/// Drive both engine entrypoints on interval timers. Spawned pipeline
/// workers run detached; shutdown freezes each entry at its last persisted
/// status.
async fn run_daemon(
    automation: Automation,
    runner: Arc<PipelineRunner>,
    sync_every: u64,
    run_every: u64,
) {
    tracing::info!(
        "⏰ AutoLT daemon started (sync every {}s, run-due every {}s)",
        sync_every,
        run_every
    );

    let sync_loop = async {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(sync_every));
        loop {
            interval.tick().await;
            let summary = automation.sync_and_schedule().await;
            tracing::info!(
                "📣 sync+schedule: synced {}, scheduled {}",
                summary.synced,
                summary.allocation.scheduled
            );
        }
    };

    let run_loop = async {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(run_every));
        loop {
            interval.tick().await;
            match dispatch_due(&runner, chrono_now()).await {
                Ok((summary, _workers)) => {
                    tracing::info!("📣 run-due: dispatched {}", summary.processed);
                }
                Err(e) => tracing::error!("❌ run-due failed: {}", e),
            }
        }
    };

    tokio::join!(sync_loop, run_loop);
}
