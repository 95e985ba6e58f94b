//! Typed error hierarchy for the autopilot control core.
//!
//! Three top-level enums cover the failures that are allowed to surface:
//! - `LockError`: workspace lock acquisition/release failures
//! - `StageError`: stage-gating rejections
//! - `CampaignError`: campaign start/run failures
//!
//! Everything else (corrupt state files, collaborator failures) is recovered
//! locally and never reaches the caller.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::stage::{Stage, StageState};

/// Errors from the workspace lock.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Lock at {path} is held by another process (gave up after {waited:?})")]
    Contention { path: PathBuf, waited: Duration },

    #[error("Lock I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from stage gating.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Cannot enter {target}: prerequisite stage {blocking} is {state}")]
    GateViolation {
        target: Stage,
        blocking: Stage,
        state: StageState,
    },

    #[error("Unknown stage '{0}'")]
    UnknownStage(String),
}

/// Errors from the campaign driver.
#[derive(Debug, Error)]
pub enum CampaignError {
    #[error("Campaign for project {project} is already running (pid {pid})")]
    AlreadyRunning { project: String, pid: u32 },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
