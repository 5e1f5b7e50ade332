//! Pipeline runner - drives one schedule entry through the phase state
//! machine against the build server.
//!
//! Failure policy is deliberately asymmetric and must stay that way:
//! trigger failures (readiness, deploy, report) and the invalid
//! starter-stopped/test-running state are fatal and end the entry in
//! `FAIL`; stop failures and the deploy-wait timeout are logged and the
//! pipeline keeps going.

use std::sync::Arc;

use chrono::Utc;

use autolt_core::config::{JobNames, PipelineConfig};
use autolt_core::error::{AutoLtError, Result};
use autolt_core::traits::BuildClient;
use autolt_core::types::{EntryStatus, JobSet, ScheduleEntry};

use crate::persistence::{PhaseStamp, SharedDb};
use crate::poll;

/// Executes pipelines for dispatched entries. One instance is shared by all
/// workers; per-entry state lives entirely in the store.
pub struct PipelineRunner {
    db: SharedDb,
    build: Arc<dyn BuildClient>,
    jobs: JobNames,
    timing: PipelineConfig,
}

impl PipelineRunner {
    pub fn new(
        db: SharedDb,
        build: Arc<dyn BuildClient>,
        jobs: JobNames,
        timing: PipelineConfig,
    ) -> Self {
        Self {
            db,
            build,
            jobs,
            timing,
        }
    }

    pub fn db(&self) -> &SharedDb {
        &self.db
    }

    /// Run one entry end to end. The entry must already be `Running` -
    /// the dispatcher flips it before spawning the worker.
    pub async fn run_entry(&self, entry: ScheduleEntry) {
        tracing::info!(
            "🎯 Starting {} pipeline for task {} (entry {})",
            entry.pipeline,
            entry.task_key,
            entry.id
        );
        match self.execute(&entry).await {
            Ok(()) => {
                tracing::info!(
                    "✅ {} pipeline completed for task {}",
                    entry.pipeline,
                    entry.task_key
                );
            }
            Err(e) => {
                tracing::error!(
                    "❌ Pipeline failed for task {} (entry {}): {}",
                    entry.task_key,
                    entry.id,
                    e
                );
                self.fail_entry(entry.id).await;
            }
        }
    }

    async fn execute(&self, entry: &ScheduleEntry) -> Result<()> {
        let jobs = self.jobs.job_set(entry.pipeline);

        self.check_and_start_jobs(&jobs).await?;
        poll::sleep_phase(self.timing.warmup(), "environment warm-up").await;
        self.test_before_phase(entry.id, &jobs).await?;
        self.deploy_phase(entry.id).await?;
        self.test_after_phase(entry.id, &jobs).await?;
        self.report_phase(entry.id).await
    }

    /// Step 1: make sure the starter and primary test jobs are up.
    ///
    /// Both stopped → start the starter (it brings the test job with it).
    /// Starter up, test down → start the test job. Starter down while the
    /// test runs is an invalid environment and fails the entry.
    async fn check_and_start_jobs(&self, jobs: &JobSet) -> Result<()> {
        let starter_up = self.job_active(&jobs.starter).await;
        let test_up = self.job_active(&jobs.primary_test).await;
        tracing::info!(
            "📊 Job status - {}: {}, {}: {}",
            jobs.starter,
            if starter_up { "running" } else { "stopped" },
            jobs.primary_test,
            if test_up { "running" } else { "stopped" },
        );

        match (starter_up, test_up) {
            (false, false) => {
                self.build
                    .trigger(&jobs.starter, None)
                    .await
                    .map_err(|e| AutoLtError::Pipeline(format!("start {}: {e}", jobs.starter)))?;
            }
            (true, false) => {
                self.build
                    .trigger(&jobs.primary_test, None)
                    .await
                    .map_err(|e| {
                        AutoLtError::Pipeline(format!("start {}: {e}", jobs.primary_test))
                    })?;
            }
            (false, true) => {
                return Err(AutoLtError::Pipeline(format!(
                    "invalid state: {} stopped while {} is running",
                    jobs.starter, jobs.primary_test
                )));
            }
            (true, true) => {}
        }
        Ok(())
    }

    /// Step 3: baseline soak with the current build.
    async fn test_before_phase(&self, id: i64, jobs: &JobSet) -> Result<()> {
        self.advance(id, EntryStatus::TestBefore).await?;
        self.stamp(id, PhaseStamp::BeforeStart).await?;
        poll::sleep_phase(self.timing.soak(), "test-before soak").await;
        self.stamp(id, PhaseStamp::BeforeEnd).await?;
        self.stop_best_effort(&jobs.primary_test).await;
        Ok(())
    }

    /// Step 4: deploy the candidate build and wait it out (best effort).
    async fn deploy_phase(&self, id: i64) -> Result<()> {
        self.advance(id, EntryStatus::Deploy).await?;
        self.stamp(id, PhaseStamp::DeployStart).await?;

        self.build
            .trigger(&self.jobs.deploy, None)
            .await
            .map_err(|e| AutoLtError::Pipeline(format!("start {}: {e}", self.jobs.deploy)))?;

        let finished = poll::wait_for_job_stop(
            self.build.as_ref(),
            &self.jobs.deploy,
            self.timing.deploy_poll(),
            self.timing.deploy_timeout(),
        )
        .await;
        if !finished {
            // Timeout is best-effort: the window keeps moving.
            tracing::warn!("⚠️ Deploy wait timed out - continuing with test-after");
        }

        self.stamp(id, PhaseStamp::DeployEnd).await?;
        Ok(())
    }

    /// Step 5: soak again on the deployed build.
    async fn test_after_phase(&self, id: i64, jobs: &JobSet) -> Result<()> {
        // Re-trigger is best-effort; the warm-up gives the environment time
        // either way.
        if let Err(e) = self.build.trigger(&jobs.primary_test, None).await {
            tracing::warn!("⚠️ Could not restart {}: {}", jobs.primary_test, e);
        }
        poll::sleep_phase(self.timing.warmup(), "environment warm-up").await;

        self.advance(id, EntryStatus::TestAfter).await?;
        self.stamp(id, PhaseStamp::AfterStart).await?;
        poll::sleep_phase(self.timing.soak(), "test-after soak").await;
        self.stamp(id, PhaseStamp::AfterEnd).await?;
        self.stop_best_effort(&jobs.primary_test).await;
        Ok(())
    }

    /// Step 6: kick off report generation and close the entry.
    async fn report_phase(&self, id: i64) -> Result<()> {
        self.advance(id, EntryStatus::GeneratingReport).await?;
        self.build
            .trigger(&self.jobs.report, None)
            .await
            .map_err(|e| AutoLtError::Pipeline(format!("start {}: {e}", self.jobs.report)))?;
        self.advance(id, EntryStatus::Completed).await?;
        Ok(())
    }

    /// Running/queued check; a status error counts as stopped.
    async fn job_active(&self, job: &str) -> bool {
        match self.build.status(job).await {
            Ok(status) => status.is_active(),
            Err(e) => {
                tracing::warn!("⚠️ Could not check status for job {}: {}", job, e);
                false
            }
        }
    }

    async fn stop_best_effort(&self, job: &str) {
        tracing::info!("🛑 Stopping {}...", job);
        if let Err(e) = self.build.stop(job, None).await {
            tracing::warn!("⚠️ Could not stop job {}: {}", job, e);
        }
    }

    async fn advance(&self, id: i64, next: EntryStatus) -> Result<()> {
        self.db.lock().await.transition_entry(id, next)
    }

    async fn stamp(&self, id: i64, stamp: PhaseStamp) -> Result<()> {
        self.db.lock().await.stamp_phase(id, stamp, Utc::now())
    }

    async fn fail_entry(&self, id: i64) {
        let result = self.db.lock().await.transition_entry(id, EntryStatus::Failed);
        if let Err(e) = result {
            tracing::error!("❌ Could not mark entry {} failed: {}", id, e);
        }
    }
}
