//! Hour-bucket dispatch - picks up Ready entries whose window has arrived
//! and hands each to its own worker task.
//!
//! The dispatching trigger returns as soon as the workers are spawned;
//! the multi-hour pipeline execution lives entirely inside the spawned
//! tasks. Entries are flipped to `Running` before the spawn, so a second
//! invocation inside the same hour bucket cannot dispatch them twice.

use std::sync::Arc;

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;

use autolt_core::error::Result;
use autolt_core::types::EntryStatus;

use crate::pipeline::PipelineRunner;

/// Result of one dispatch run.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub processed: usize,
}

/// Floor to the containing hour bucket.
pub fn floor_hour(now: DateTime<Utc>) -> DateTime<Utc> {
    now.duration_trunc(Duration::hours(1)).unwrap_or(now)
}

/// Dispatch all entries due in the hour bucket containing `now`.
///
/// Returns the dispatch count plus the worker handles: the one-shot CLI
/// awaits them (the pipelines must outlive the invocation), the daemon
/// lets them run detached.
pub async fn dispatch_due(
    runner: &Arc<PipelineRunner>,
    now: DateTime<Utc>,
) -> Result<(RunSummary, Vec<JoinHandle<()>>)> {
    let bucket_start = floor_hour(now);
    let bucket_end = bucket_start + Duration::hours(1);
    tracing::info!(
        "🕐 Looking for entries scheduled for {}",
        bucket_start.format("%Y-%m-%d %H:%M")
    );

    let due = {
        let db = runner.db().lock().await;
        db.due_entries(bucket_start, bucket_end)?
    };
    if due.is_empty() {
        tracing::info!("ℹ️ No ready entries for the current hour");
        return Ok((RunSummary { processed: 0 }, Vec::new()));
    }
    tracing::info!("📋 Found {} ready entries", due.len());

    let mut handles = Vec::with_capacity(due.len());
    for mut entry in due {
        let claimed = {
            let db = runner.db().lock().await;
            db.transition_entry(entry.id, EntryStatus::Running)
        };
        if let Err(e) = claimed {
            // Another invocation got here first, or the entry went bad.
            tracing::warn!("⚠️ Skipping entry {}: {}", entry.id, e);
            continue;
        }
        entry.status = EntryStatus::Running;

        let runner = Arc::clone(runner);
        handles.push(tokio::spawn(async move {
            runner.run_entry(entry).await;
        }));
    }

    Ok((
        RunSummary {
            processed: handles.len(),
        },
        handles,
    ))
}
