//! Signal types derived from collaborator reports and call logs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::stage::Stage;

/// Maximum blocker strings carried in a [`BlockingSignals`] snapshot.
pub const MAX_REPORTED_BLOCKERS: usize = 12;

/// What is currently preventing progress on a project. Derived, never persisted
/// on its own (snapshots are embedded in audit records).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockingSignals {
    pub is_blocking: bool,
    /// Noise-filtered, deduplicated, at most [`MAX_REPORTED_BLOCKERS`].
    pub blockers: Vec<String>,
    pub lifecycle_failures: usize,
    pub failed_stages: Vec<Stage>,
}

impl BlockingSignals {
    pub fn new(blockers: Vec<String>, lifecycle_failures: usize, failed_stages: Vec<Stage>) -> Self {
        let mut blockers = blockers;
        blockers.truncate(MAX_REPORTED_BLOCKERS);
        Self {
            is_blocking: !blockers.is_empty() || lifecycle_failures > 0 || !failed_stages.is_empty(),
            blockers,
            lifecycle_failures,
            failed_stages,
        }
    }
}

/// One step in the lifecycle report (build, test, lint, smoke, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleStep {
    pub name: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LifecycleStep {
    pub fn is_failed(&self) -> bool {
        matches!(
            self.status.trim().to_ascii_lowercase().as_str(),
            "failed" | "fail" | "failure" | "error" | "errored"
        )
    }
}

/// Dominant failure mode of the generation collaborator in the recent window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderIssue {
    #[default]
    None,
    Unusable,
    Quota,
    CommandTooLong,
}

impl ProviderIssue {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderIssue::None => "none",
            ProviderIssue::Unusable => "unusable",
            ProviderIssue::Quota => "quota",
            ProviderIssue::CommandTooLong => "command_too_long",
        }
    }
}

impl fmt::Display for ProviderIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One collaborator call attempt, appended to `call-outcomes.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallOutcome {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub success: bool,
    /// Free-text error or output excerpt.
    #[serde(default)]
    pub text: String,
}

impl CallOutcome {
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        success: bool,
        text: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            provider: provider.into(),
            model: model.into(),
            exit_code: None,
            success,
            text: text.into(),
        }
    }
}
