//! AutoLT error type.

use thiserror::Error;

/// Convenience result alias used across all AutoLT crates.
pub type Result<T> = std::result::Result<T, AutoLtError>;

/// All errors the engine and its collaborators can surface.
#[derive(Debug, Error)]
pub enum AutoLtError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Tracker error: {0}")]
    Tracker(String),

    #[error("Build server error: {0}")]
    BuildServer(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Unknown pipeline kind: {0}")]
    UnknownPipeline(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
