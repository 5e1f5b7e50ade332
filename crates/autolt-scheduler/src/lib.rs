//! # AutoLT Scheduler
//!
//! The scheduling & pipeline orchestration engine: slot allocation for
//! pending load-test tasks and the multi-phase pipeline that drives each
//! scheduled entry against the build server.
//!
//! ## Architecture
//! ```text
//! external timer ("sync+schedule", hourly)
//!   → Automation::sync_and_schedule
//!     → tracker search → local mirror upsert
//!     → SlotPlanner::allocate_next  (writes Ready entries, updates tracker)
//!
//! external timer ("run due", hourly, on the hour)
//!   → dispatch::dispatch_due
//!     → selects Ready entries in the current hour bucket
//!     → flips each to Running, spawns one worker per entry
//!       → PipelineRunner::run_entry
//!         readiness check → warm-up → test-before → deploy → test-after
//!         → report → Completed | Failed
//! ```
//!
//! Each worker blocks for hours (warm-up + soak waits) inside its own tokio
//! task; the dispatcher itself returns as soon as the workers are spawned.
//! There is no resume path: a worker interrupted by process shutdown leaves
//! its entry frozen at the last persisted status, and `dispatch_due` only
//! ever picks up `Ready` entries.

pub mod automation;
pub mod dispatch;
pub mod persistence;
pub mod pipeline;
pub mod poll;
pub mod slots;

pub use automation::{Automation, SyncScheduleSummary};
pub use dispatch::{dispatch_due, RunSummary};
pub use persistence::{SchedulerDb, SharedDb, StatusCounts};
pub use pipeline::PipelineRunner;
pub use slots::{AllocationSummary, PlannedWindow, SlotPlanner};

#[cfg(test)]
pub(crate) mod testutil;
