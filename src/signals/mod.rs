//! Blocking signals and provider issue classification.
//!
//! Two read-only views over collaborator output feed the recovery planner:
//!
//! - [`collect`] turns the run-status record, the lifecycle report, and the
//!   stage ledger into a noise-filtered [`BlockingSignals`] snapshot.
//! - [`ProviderIssueClassifier`] scans the time-windowed call-outcome log
//!   for the dominant failure mode of the generation collaborator.
//!
//! Neither view parses collaborator output structurally beyond the report
//! envelopes; free text is only pattern-matched.

mod blocking;
mod provider;
mod types;

pub use blocking::{collect, filter_blockers, is_noise, read_lifecycle_steps, read_run_status_blockers};
pub use provider::{ProviderIssueClassifier, classify_text};
pub use types::{
    BlockingSignals, CallOutcome, LifecycleStep, MAX_REPORTED_BLOCKERS, ProviderIssue,
};
