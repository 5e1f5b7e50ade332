//! Slot allocator - finds the next free daily execution window for each
//! pending task and records the assignment.
//!
//! Windows follow a fixed template (default: 4 hours starting 19:00),
//! scanned forward day by day over a bounded horizon. Tasks are processed
//! strictly in the caller's order; the first task that cannot be placed
//! within the horizon stops the whole run, because every later task would
//! only land even further out.

use std::sync::Arc;

use chrono::{DateTime, Days, Duration, Timelike, Utc};
use serde::Serialize;

use autolt_core::config::ScheduleConfig;
use autolt_core::error::Result;
use autolt_core::traits::TrackerClient;
use autolt_core::types::TrackedTask;

use crate::persistence::SharedDb;

/// One successful assignment, in processing order.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedWindow {
    pub task: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Result of one allocation run.
#[derive(Debug, Default, Serialize)]
pub struct AllocationSummary {
    pub scheduled: usize,
    pub entries: Vec<PlannedWindow>,
    pub message: String,
}

/// The slot allocator. Stateless between calls - safe to invoke repeatedly
/// as an idempotent top-up: a task moved out of the pending pool is not
/// offered again until externally reset.
pub struct SlotPlanner {
    db: SharedDb,
    tracker: Arc<dyn TrackerClient>,
    cfg: ScheduleConfig,
}

impl SlotPlanner {
    pub fn new(db: SharedDb, tracker: Arc<dyn TrackerClient>, cfg: ScheduleConfig) -> Self {
        Self { db, tracker, cfg }
    }

    fn window(&self) -> Duration {
        Duration::hours(i64::from(self.cfg.window_hours))
    }

    /// Allocate windows for `pending`, in order, starting from now.
    pub async fn allocate_next(&self, pending: &[TrackedTask]) -> Result<AllocationSummary> {
        self.allocate_next_at(pending, Utc::now()).await
    }

    /// Same as [`allocate_next`](Self::allocate_next) with an explicit clock.
    pub async fn allocate_next_at(
        &self,
        pending: &[TrackedTask],
        now: DateTime<Utc>,
    ) -> Result<AllocationSummary> {
        tracing::info!("🔄 Allocating slots for {} pending tasks", pending.len());
        let mut summary = AllocationSummary::default();

        for task in pending {
            let Some(start) = self.find_next_slot(now).await? else {
                // Hard stop: later tasks would only land further out.
                tracing::warn!(
                    "⏰ No slot within {} days for {} - stopping this run",
                    self.cfg.horizon_days,
                    task.key
                );
                summary.message = format!("horizon exhausted at {}", task.key);
                break;
            };
            let end = start + self.window();

            // Tracker first: if the external record cannot be moved, the
            // task stays pending and no local entry appears.
            if let Err(e) = self
                .tracker
                .update_status_and_schedule(&task.key, "In Progress", start, end)
                .await
            {
                tracing::error!("❌ Tracker update failed for {}: {} - skipping", task.key, e);
                continue;
            }

            let recorded = {
                let mut db = self.db.lock().await;
                db.record_allocation(&task.key, task.pipeline, start)
            };
            if let Err(e) = recorded {
                tracing::error!("❌ Could not record entry for {}: {}", task.key, e);
                continue;
            }

            tracing::info!("✅ Scheduled {} for {}", task.key, start);
            summary.scheduled += 1;
            summary.entries.push(PlannedWindow {
                task: task.key.clone(),
                start,
                end,
            });
        }

        if summary.message.is_empty() {
            summary.message = format!("scheduled {} tasks", summary.scheduled);
        }
        Ok(summary)
    }

    /// Earliest window on the daily template with no active entry overlap.
    ///
    /// Past the cutoff hour "today" no longer offers a window; the scan
    /// starts at tomorrow instead.
    async fn find_next_slot(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let mut first_day = now.date_naive();
        if now.hour() >= self.cfg.cutoff_hour {
            first_day = match first_day.checked_add_days(Days::new(1)) {
                Some(d) => d,
                None => return Ok(None),
            };
        }

        let window = self.window();
        for offset in 0..self.cfg.horizon_days {
            let Some(day) = first_day.checked_add_days(Days::new(u64::from(offset))) else {
                break;
            };
            let Some(start) = day
                .and_hms_opt(self.cfg.start_hour, 0, 0)
                .map(|dt| dt.and_utc())
            else {
                break;
            };
            let end = start + window;

            let conflicts = {
                let db = self.db.lock().await;
                db.entries_overlapping(start, end, window)?
            };
            if conflicts.is_empty() {
                return Ok(Some(start));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{temp_shared_db, MockTracker};
    use autolt_core::types::{EntryStatus, PipelineKind};
    use chrono::TimeZone;

    fn planner_with(
        db: SharedDb,
        tracker: Arc<MockTracker>,
        horizon_days: u32,
    ) -> SlotPlanner {
        let cfg = ScheduleConfig {
            horizon_days,
            ..ScheduleConfig::default()
        };
        SlotPlanner::new(db, tracker, cfg)
    }

    fn day(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, d, h, 0, 0).unwrap()
    }

    fn task(key: &str) -> TrackedTask {
        TrackedTask::new(key, "load test", PipelineKind::Ekp)
    }

    #[tokio::test]
    async fn test_empty_calendar_gets_today_1900() {
        let db = temp_shared_db("slots-empty").await;
        let tracker = Arc::new(MockTracker::new());
        let planner = planner_with(db, tracker, 30);

        let summary = planner
            .allocate_next_at(&[task("EKPLT-1")], day(1, 10))
            .await
            .unwrap();
        assert_eq!(summary.scheduled, 1);
        assert_eq!(summary.entries[0].start, day(1, 19));
        assert_eq!(summary.entries[0].end, day(1, 23));
    }

    #[tokio::test]
    async fn test_occupied_day_pushes_to_next_day() {
        let db = temp_shared_db("slots-occupied").await;
        let tracker = Arc::new(MockTracker::new());
        let planner = planner_with(db.clone(), tracker, 30);

        let summary = planner
            .allocate_next_at(&[task("EKPLT-1"), task("EKPLT-2")], day(1, 10))
            .await
            .unwrap();
        assert_eq!(summary.scheduled, 2);
        assert_eq!(summary.entries[0].start, day(1, 19));
        assert_eq!(summary.entries[1].start, day(2, 19));
    }

    #[tokio::test]
    async fn test_past_cutoff_starts_tomorrow() {
        let db = temp_shared_db("slots-cutoff").await;
        let tracker = Arc::new(MockTracker::new());
        let planner = planner_with(db, tracker, 30);

        let summary = planner
            .allocate_next_at(&[task("EKPLT-1")], day(1, 23) + Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(summary.entries[0].start, day(2, 19));
    }

    #[tokio::test]
    async fn test_horizon_exhaustion_short_circuits() {
        let db = temp_shared_db("slots-horizon").await;
        let tracker = Arc::new(MockTracker::new());
        // Horizon of 2 days, both occupied by tasks 1 and 2 - task 3 cannot
        // be placed and task 4 must not even be attempted.
        let planner = planner_with(db.clone(), tracker.clone(), 2);

        let tasks = [task("EKPLT-1"), task("EKPLT-2"), task("EKPLT-3"), task("EKPLT-4")];
        let summary = planner.allocate_next_at(&tasks, day(1, 10)).await.unwrap();
        assert_eq!(summary.scheduled, 2);
        assert!(summary.message.contains("EKPLT-3"));

        let updated = tracker.updated_keys();
        assert!(!updated.contains(&"EKPLT-3".to_string()));
        assert!(!updated.contains(&"EKPLT-4".to_string()));
    }

    #[tokio::test]
    async fn test_tracker_failure_skips_only_that_task() {
        let db = temp_shared_db("slots-tracker-fail").await;
        let tracker = Arc::new(MockTracker::new());
        tracker.fail_update("EKPLT-1");
        let planner = planner_with(db.clone(), tracker, 30);

        let summary = planner
            .allocate_next_at(&[task("EKPLT-1"), task("EKPLT-2")], day(1, 10))
            .await
            .unwrap();
        // Task 1 skipped, task 2 takes the slot task 1 could not claim.
        assert_eq!(summary.scheduled, 1);
        assert_eq!(summary.entries[0].task, "EKPLT-2");
        assert_eq!(summary.entries[0].start, day(1, 19));

        // No partial entry for the failed task.
        let db = db.lock().await;
        let active = db
            .entries_in_status(&[EntryStatus::Ready, EntryStatus::Running])
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].task_key, "EKPLT-2");
    }

    #[tokio::test]
    async fn test_active_windows_stay_disjoint() {
        let db = temp_shared_db("slots-disjoint").await;
        let tracker = Arc::new(MockTracker::new());
        let planner = planner_with(db.clone(), tracker, 30);

        let tasks: Vec<TrackedTask> =
            (1..=5).map(|i| task(&format!("EKPLT-{i}"))).collect();
        planner.allocate_next_at(&tasks, day(1, 10)).await.unwrap();

        let db = db.lock().await;
        let active = db
            .entries_in_status(&[EntryStatus::Ready, EntryStatus::Running])
            .unwrap();
        assert_eq!(active.len(), 5);
        let w = Duration::hours(4);
        for a in &active {
            for b in &active {
                if a.id == b.id {
                    continue;
                }
                let disjoint =
                    a.planned_start + w <= b.planned_start || b.planned_start + w <= a.planned_start;
                assert!(disjoint, "windows {} and {} overlap", a.id, b.id);
            }
        }
    }

    #[tokio::test]
    async fn test_second_invocation_is_idempotent() {
        let db = temp_shared_db("slots-idempotent").await;
        let tracker = Arc::new(MockTracker::new());
        let planner = planner_with(db.clone(), tracker, 30);

        {
            let db_guard = db.lock().await;
            db_guard.upsert_task(&task("EKPLT-1")).unwrap();
        }
        let pending = db.lock().await.pending_tasks().unwrap();
        let first = planner.allocate_next_at(&pending, day(1, 10)).await.unwrap();
        assert_eq!(first.scheduled, 1);

        // The task left the pending pool with the first allocation.
        let pending = db.lock().await.pending_tasks().unwrap();
        let second = planner.allocate_next_at(&pending, day(1, 10)).await.unwrap();
        assert_eq!(second.scheduled, 0);
    }
}
