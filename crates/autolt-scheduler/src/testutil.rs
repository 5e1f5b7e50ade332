//! Scripted collaborator mocks and store helpers shared by the engine tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use autolt_core::config::PipelineConfig;
use autolt_core::error::{AutoLtError, Result};
use autolt_core::traits::{BuildClient, TrackerClient};
use autolt_core::types::{JobStatus, TrackedTask};

use crate::persistence::{SchedulerDb, SharedDb};

/// Fresh SQLite store under the system temp dir.
pub async fn temp_shared_db(name: &str) -> SharedDb {
    let dir = std::env::temp_dir().join("autolt-engine-tests");
    std::fs::create_dir_all(&dir).ok();
    let path = dir.join(format!("{name}-{}.db", std::process::id()));
    std::fs::remove_file(&path).ok();
    SchedulerDb::open(&path).unwrap().into_shared()
}

/// Millisecond-free timings so pipeline tests finish instantly.
pub fn test_timing() -> PipelineConfig {
    PipelineConfig {
        warmup_secs: 0,
        soak_secs: 0,
        deploy_poll_secs: 0,
        deploy_timeout_secs: 0,
    }
}

pub fn running() -> JobStatus {
    JobStatus {
        running: true,
        queued: false,
        last_result: None,
    }
}

pub fn stopped() -> JobStatus {
    JobStatus::default()
}

/// Build-server mock with per-job scripted status sequences.
#[derive(Default)]
pub struct MockBuild {
    statuses: Mutex<HashMap<String, VecDeque<JobStatus>>>,
    hold_last: Mutex<HashSet<String>>,
    fail_trigger: Mutex<HashSet<String>>,
    fail_stop: Mutex<HashSet<String>>,
    fail_status: Mutex<HashSet<String>>,
    triggered: Mutex<Vec<String>>,
    stopped: Mutex<Vec<String>>,
}

impl MockBuild {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the statuses returned for `job`, in order. Once the script is
    /// exhausted the job reports stopped (unless held, see below).
    pub fn set_status_seq(&self, job: &str, seq: Vec<JobStatus>) {
        self.statuses
            .lock()
            .unwrap()
            .insert(job.to_string(), seq.into());
    }

    /// Keep returning the final scripted status instead of draining it.
    pub fn hold_last_status(&self, job: &str) {
        self.hold_last.lock().unwrap().insert(job.to_string());
    }

    pub fn fail_trigger(&self, job: &str) {
        self.fail_trigger.lock().unwrap().insert(job.to_string());
    }

    pub fn fail_stop(&self, job: &str) {
        self.fail_stop.lock().unwrap().insert(job.to_string());
    }

    pub fn fail_status(&self, job: &str) {
        self.fail_status.lock().unwrap().insert(job.to_string());
    }

    pub fn triggered(&self) -> Vec<String> {
        self.triggered.lock().unwrap().clone()
    }

    pub fn stopped_jobs(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }
}

#[async_trait]
impl BuildClient for MockBuild {
    async fn trigger(&self, job: &str, _parameters: Option<&serde_json::Value>) -> Result<i64> {
        if self.fail_trigger.lock().unwrap().contains(job) {
            return Err(AutoLtError::BuildServer(format!("trigger {job}: scripted failure")));
        }
        self.triggered.lock().unwrap().push(job.to_string());
        Ok(1)
    }

    async fn stop(&self, job: &str, _build: Option<i64>) -> Result<()> {
        if self.fail_stop.lock().unwrap().contains(job) {
            return Err(AutoLtError::BuildServer(format!("stop {job}: scripted failure")));
        }
        self.stopped.lock().unwrap().push(job.to_string());
        Ok(())
    }

    async fn status(&self, job: &str) -> Result<JobStatus> {
        if self.fail_status.lock().unwrap().contains(job) {
            return Err(AutoLtError::BuildServer(format!("status {job}: scripted failure")));
        }
        let mut statuses = self.statuses.lock().unwrap();
        let Some(seq) = statuses.get_mut(job) else {
            return Ok(JobStatus::default());
        };
        let hold = self.hold_last.lock().unwrap().contains(job);
        if hold && seq.len() == 1 {
            return Ok(seq
                .front()
                .cloned()
                .unwrap_or_default());
        }
        Ok(seq.pop_front().unwrap_or_default())
    }
}

/// Tracker mock: a canned pending list, plus update bookkeeping. Updated
/// tasks drop out of the search results, like a status-filtered query would.
#[derive(Default)]
pub struct MockTracker {
    search_results: Mutex<Vec<TrackedTask>>,
    fail_search: Mutex<bool>,
    fail_updates: Mutex<HashSet<String>>,
    updates: Mutex<Vec<(String, String, DateTime<Utc>)>>,
}

impl MockTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_search_result(&self, task: TrackedTask) {
        self.search_results.lock().unwrap().push(task);
    }

    pub fn fail_search(&self) {
        *self.fail_search.lock().unwrap() = true;
    }

    pub fn fail_update(&self, key: &str) {
        self.fail_updates.lock().unwrap().insert(key.to_string());
    }

    pub fn updated_keys(&self) -> Vec<String> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .map(|(k, _, _)| k.clone())
            .collect()
    }
}

#[async_trait]
impl TrackerClient for MockTracker {
    async fn search(&self, _query: &str, _max_results: u32) -> Result<Vec<TrackedTask>> {
        if *self.fail_search.lock().unwrap() {
            return Err(AutoLtError::Tracker("search: scripted outage".into()));
        }
        Ok(self.search_results.lock().unwrap().clone())
    }

    async fn update_status_and_schedule(
        &self,
        key: &str,
        status: &str,
        planned_start: DateTime<Utc>,
        _planned_end: DateTime<Utc>,
    ) -> Result<()> {
        if self.fail_updates.lock().unwrap().contains(key) {
            return Err(AutoLtError::Tracker(format!("update {key}: scripted failure")));
        }
        self.updates
            .lock()
            .unwrap()
            .push((key.to_string(), status.to_string(), planned_start));
        self.search_results.lock().unwrap().retain(|t| t.key != key);
        Ok(())
    }
}
