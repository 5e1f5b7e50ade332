//! Data model - tracked tasks, schedule entries, and the pipeline state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AutoLtError;

/// Local mirror of a remote tracker issue.
///
/// Owned by the tracker; the engine refreshes it on sync and writes back
/// status + planned start as a side effect of slot allocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedTask {
    /// Stable issue key, e.g. "EKPLT-142".
    pub key: String,
    /// One-line summary from the tracker.
    pub summary: String,
    /// Free-form tracker status label ("Open", "In Progress", ...).
    pub status: String,
    /// Which pipeline this task runs.
    pub pipeline: PipelineKind,
    /// Planned start, if one has been assigned.
    pub planned_start: Option<DateTime<Utc>>,
    /// When this mirror row was last refreshed from the tracker.
    pub last_synced: DateTime<Utc>,
}

impl TrackedTask {
    pub fn new(key: &str, summary: &str, pipeline: PipelineKind) -> Self {
        Self {
            key: key.to_string(),
            summary: summary.to_string(),
            status: "Open".to_string(),
            pipeline,
            planned_start: None,
            last_synced: Utc::now(),
        }
    }

    /// Whether this task is still waiting for a slot.
    pub fn is_pending(&self) -> bool {
        self.status == "Open"
    }
}

/// The engine's own record of one assigned execution window.
///
/// Created by the slot allocator in `Ready`; mutated exclusively by the
/// pipeline runner afterwards; never deleted (audit trail); immutable once
/// terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// Store rowid (0 until persisted).
    pub id: i64,
    /// Task key this entry belongs to. Not unique - historical entries for
    /// the same task may remain.
    pub task_key: String,
    /// Which job set the pipeline drives.
    pub pipeline: PipelineKind,
    /// Start of the assigned execution window.
    pub planned_start: DateTime<Utc>,
    /// State-machine state.
    pub status: EntryStatus,
    pub before_start: Option<DateTime<Utc>>,
    pub before_end: Option<DateTime<Utc>>,
    pub deploy_start: Option<DateTime<Utc>>,
    pub deploy_end: Option<DateTime<Utc>>,
    pub after_start: Option<DateTime<Utc>>,
    pub after_end: Option<DateTime<Utc>>,
}

impl ScheduleEntry {
    /// A fresh entry in `Ready`, as the allocator creates it.
    pub fn ready(task_key: &str, pipeline: PipelineKind, planned_start: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            task_key: task_key.to_string(),
            pipeline,
            planned_start,
            status: EntryStatus::Ready,
            before_start: None,
            before_end: None,
            deploy_start: None,
            deploy_end: None,
            after_start: None,
            after_end: None,
        }
    }
}

/// Pipeline state machine state.
///
/// `Ready → Running → TestBefore → Deploy → TestAfter → GeneratingReport →
/// Completed`, with `Failed` reachable from every non-terminal state.
/// `Running` is set at dispatch time, before the worker is spawned, so a
/// second run-due invocation in the same hour cannot pick the entry twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryStatus {
    Ready,
    Running,
    TestBefore,
    Deploy,
    TestAfter,
    GeneratingReport,
    Completed,
    Failed,
}

impl EntryStatus {
    /// Stable store label (matches the original schema's status strings).
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Ready => "ready",
            EntryStatus::Running => "running",
            EntryStatus::TestBefore => "test_before",
            EntryStatus::Deploy => "deploy",
            EntryStatus::TestAfter => "test_after",
            EntryStatus::GeneratingReport => "generating_report",
            EntryStatus::Completed => "completed",
            EntryStatus::Failed => "FAIL",
        }
    }

    /// Terminal states accept no further writes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EntryStatus::Completed | EntryStatus::Failed)
    }

    /// The transition table. Exhaustive on purpose: adding a state without
    /// deciding its successors will not compile.
    pub fn can_transition_to(&self, next: EntryStatus) -> bool {
        use EntryStatus::*;
        if next == Failed {
            return !self.is_terminal();
        }
        match self {
            Ready => next == Running,
            Running => next == TestBefore,
            TestBefore => next == Deploy,
            Deploy => next == TestAfter,
            TestAfter => next == GeneratingReport,
            GeneratingReport => next == Completed,
            Completed | Failed => false,
        }
    }
}

impl std::str::FromStr for EntryStatus {
    type Err = AutoLtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ready" => Ok(EntryStatus::Ready),
            "running" => Ok(EntryStatus::Running),
            "test_before" => Ok(EntryStatus::TestBefore),
            "deploy" => Ok(EntryStatus::Deploy),
            "test_after" => Ok(EntryStatus::TestAfter),
            "generating_report" => Ok(EntryStatus::GeneratingReport),
            "completed" => Ok(EntryStatus::Completed),
            "FAIL" => Ok(EntryStatus::Failed),
            other => Err(AutoLtError::Store(format!("unknown entry status: {other}"))),
        }
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which external job set a task's pipeline uses.
///
/// Unknown kinds are rejected when parsing config or store rows - not in the
/// middle of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineKind {
    Ekp,
    Infosrv,
}

impl PipelineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineKind::Ekp => "EKP",
            PipelineKind::Infosrv => "INFOSRV",
        }
    }
}

impl std::str::FromStr for PipelineKind {
    type Err = AutoLtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EKP" => Ok(PipelineKind::Ekp),
            "INFOSRV" => Ok(PipelineKind::Infosrv),
            other => Err(AutoLtError::UnknownPipeline(other.to_string())),
        }
    }
}

impl std::fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The pair of jobs a pipeline kind drives during readiness + test phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSet {
    /// Environment bring-up job, expected to stay running for the whole slot.
    pub starter: String,
    /// Primary load-test job, started and stopped around each test phase.
    pub primary_test: String,
}

/// Snapshot of a remote job's execution state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobStatus {
    pub running: bool,
    pub queued: bool,
    pub last_result: Option<BuildResult>,
}

impl JobStatus {
    /// Running or sitting in the build queue - either counts as "up" for
    /// the readiness check.
    pub fn is_active(&self) -> bool {
        self.running || self.queued
    }
}

/// Terminal result of a finished build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildResult {
    Success,
    Failure,
    Unstable,
    Aborted,
    Unknown,
}

impl BuildResult {
    pub fn from_label(label: &str) -> Self {
        match label {
            "SUCCESS" => BuildResult::Success,
            "FAILURE" => BuildResult::Failure,
            "UNSTABLE" => BuildResult::Unstable,
            "ABORTED" => BuildResult::Aborted,
            _ => BuildResult::Unknown,
        }
    }
}
