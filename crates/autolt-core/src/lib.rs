//! # AutoLT Core
//!
//! Shared foundation for the AutoLT scheduling engine: configuration,
//! error type, the task/schedule data model, and the collaborator traits
//! (issue tracker, build server) that the engine is wired against.
//!
//! Nothing in this crate talks to the network or the database - it only
//! defines the shapes the other crates agree on.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::AutoLtConfig;
pub use error::{AutoLtError, Result};
pub use traits::{BuildClient, TrackerClient};
pub use types::{
    BuildResult, EntryStatus, JobSet, JobStatus, PipelineKind, ScheduleEntry, TrackedTask,
};
