//! Collaborator traits - the seams the engine is wired (and tested) against.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{JobStatus, TrackedTask};

/// Issue tracker operations the engine consumes.
///
/// Implementations must recover connectivity failures locally: a failed call
/// returns `Err`, it never panics or poisons the engine.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    /// Run a query and return matching tasks.
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<TrackedTask>>;

    /// Move a task to `status` and stamp its planned start/end window.
    async fn update_status_and_schedule(
        &self,
        key: &str,
        status: &str,
        planned_start: DateTime<Utc>,
        planned_end: DateTime<Utc>,
    ) -> Result<()>;
}

/// Build server operations the engine consumes.
#[async_trait]
pub trait BuildClient: Send + Sync {
    /// Trigger a job, optionally with parameters. Returns the queue item id.
    async fn trigger(&self, job: &str, parameters: Option<&serde_json::Value>) -> Result<i64>;

    /// Stop a build. `build` of `None` means "whatever is currently running".
    async fn stop(&self, job: &str, build: Option<i64>) -> Result<()>;

    /// Running/queued snapshot of a job.
    async fn status(&self, job: &str) -> Result<JobStatus>;
}
