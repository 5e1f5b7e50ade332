//! Automation facade - "sync pending tasks from the tracker, then run the
//! slot allocator" as one operation for the external timer to call.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use autolt_core::config::AutoLtConfig;
use autolt_core::error::Result;
use autolt_core::traits::TrackerClient;

use crate::persistence::SharedDb;
use crate::slots::{AllocationSummary, SlotPlanner};

/// Result of one sync+schedule run. Failures show up as counts of zero and
/// a message - they never cross this boundary as errors.
#[derive(Debug, Serialize)]
pub struct SyncScheduleSummary {
    pub timestamp: DateTime<Utc>,
    pub synced: usize,
    pub allocation: AllocationSummary,
    pub error: Option<String>,
}

/// Composes the tracker sync with the slot allocator.
pub struct Automation {
    tracker: Arc<dyn TrackerClient>,
    db: SharedDb,
    planner: SlotPlanner,
    jql: String,
    max_results: u32,
}

impl Automation {
    pub fn new(tracker: Arc<dyn TrackerClient>, db: SharedDb, config: &AutoLtConfig) -> Self {
        let planner = SlotPlanner::new(db.clone(), tracker.clone(), config.schedule.clone());
        Self {
            tracker,
            db,
            planner,
            jql: config.tracker.jql.clone(),
            max_results: config.tracker.max_results,
        }
    }

    /// Sync then schedule. A tracker outage yields a zero summary with the
    /// error message filled in; the allocator is skipped for that run.
    pub async fn sync_and_schedule(&self) -> SyncScheduleSummary {
        tracing::info!("🤖 Starting automated task sync and scheduling");
        let synced = match self.sync_tasks().await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!("❌ Tracker sync failed: {}", e);
                return SyncScheduleSummary {
                    timestamp: Utc::now(),
                    synced: 0,
                    allocation: AllocationSummary::default(),
                    error: Some(e.to_string()),
                };
            }
        };

        let (allocation, error) = match self.schedule_pending().await {
            Ok(summary) => (summary, None),
            Err(e) => {
                tracing::error!("❌ Scheduling failed: {}", e);
                (AllocationSummary::default(), Some(e.to_string()))
            }
        };

        tracing::info!(
            "🏁 Automation completed: synced {}, scheduled {}",
            synced,
            allocation.scheduled
        );
        SyncScheduleSummary {
            timestamp: Utc::now(),
            synced,
            allocation,
            error,
        }
    }

    /// Pull pending tasks from the tracker into the local mirror.
    pub async fn sync_tasks(&self) -> Result<usize> {
        let tasks = self.tracker.search(&self.jql, self.max_results).await?;
        let db = self.db.lock().await;
        let mut synced = 0;
        for task in &tasks {
            match db.upsert_task(task) {
                Ok(()) => synced += 1,
                Err(e) => tracing::warn!("⚠️ Could not mirror {}: {}", task.key, e),
            }
        }
        tracing::info!("📥 Synced {} tasks from tracker", synced);
        Ok(synced)
    }

    /// Allocate windows for everything currently pending, oldest first.
    pub async fn schedule_pending(&self) -> Result<AllocationSummary> {
        let pending = {
            let db = self.db.lock().await;
            db.pending_tasks()?
        };
        self.planner.allocate_next(&pending).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{temp_shared_db, MockTracker};
    use autolt_core::types::{PipelineKind, TrackedTask};

    #[tokio::test]
    async fn test_sync_and_schedule_end_to_end() {
        let db = temp_shared_db("auto-e2e").await;
        let tracker = Arc::new(MockTracker::new());
        tracker.add_search_result(TrackedTask::new("EKPLT-1", "t", PipelineKind::Ekp));
        tracker.add_search_result(TrackedTask::new("EKPLT-2", "t", PipelineKind::Infosrv));

        let automation = Automation::new(tracker.clone(), db, &AutoLtConfig::default());
        let summary = automation.sync_and_schedule().await;
        assert!(summary.error.is_none());
        assert_eq!(summary.synced, 2);
        assert_eq!(summary.allocation.scheduled, 2);
        assert_eq!(tracker.updated_keys().len(), 2);
    }

    #[tokio::test]
    async fn test_tracker_outage_yields_zero_summary() {
        let db = temp_shared_db("auto-outage").await;
        let tracker = Arc::new(MockTracker::new());
        tracker.fail_search();

        let automation = Automation::new(tracker, db, &AutoLtConfig::default());
        let summary = automation.sync_and_schedule().await;
        assert_eq!(summary.synced, 0);
        assert_eq!(summary.allocation.scheduled, 0);
        assert!(summary.error.is_some());
    }

    #[tokio::test]
    async fn test_repeat_run_schedules_nothing_new() {
        let db = temp_shared_db("auto-repeat").await;
        let tracker = Arc::new(MockTracker::new());
        tracker.add_search_result(TrackedTask::new("EKPLT-1", "t", PipelineKind::Ekp));

        let automation = Automation::new(tracker, db, &AutoLtConfig::default());
        let first = automation.sync_and_schedule().await;
        assert_eq!(first.allocation.scheduled, 1);

        // The allocation moved the task out of the tracker's pending query
        // and out of the local pending pool.
        let second = automation.sync_and_schedule().await;
        assert_eq!(second.synced, 0);
        assert_eq!(second.allocation.scheduled, 0);
    }
}
