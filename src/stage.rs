//! Stage definitions and the per-project stage ledger.
//!
//! This module provides:
//! - `Stage`, the fixed nine-step delivery sequence
//! - `StageLedger`, the persisted pass/fail/pending map plus bounded history
//! - `can_enter`, the gating guard callers must consult before marking a
//!   stage passed (the ledger itself does not enforce ordering)
//! - `LedgerStore`, load/save/mark against `stage-ledger.json`

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::errors::StageError;
use crate::store;

/// Maximum number of history entries kept in a ledger.
pub const HISTORY_LIMIT: usize = 300;

/// One step of the delivery pipeline, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Discovery,
    FunctionalRequirements,
    TechnicalBacklog,
    Implementation,
    QualityValidation,
    RoleReview,
    ReleaseCandidate,
    FinalRelease,
    RuntimeStart,
}

impl Stage {
    /// Every stage, in pipeline order.
    pub const ALL: [Stage; 9] = [
        Stage::Discovery,
        Stage::FunctionalRequirements,
        Stage::TechnicalBacklog,
        Stage::Implementation,
        Stage::QualityValidation,
        Stage::RoleReview,
        Stage::ReleaseCandidate,
        Stage::FinalRelease,
        Stage::RuntimeStart,
    ];

    pub fn first() -> Stage {
        Stage::ALL[0]
    }

    pub fn last() -> Stage {
        Stage::ALL[Stage::ALL.len() - 1]
    }

    /// Zero-based position in the pipeline.
    pub fn index(self) -> usize {
        Stage::ALL
            .iter()
            .position(|s| *s == self)
            .unwrap_or_default()
    }

    pub fn at(index: usize) -> Option<Stage> {
        Stage::ALL.get(index).copied()
    }

    /// Stages that must be passed before this one may be entered.
    pub fn predecessors(self) -> &'static [Stage] {
        &Stage::ALL[..self.index()]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Discovery => "discovery",
            Stage::FunctionalRequirements => "functional_requirements",
            Stage::TechnicalBacklog => "technical_backlog",
            Stage::Implementation => "implementation",
            Stage::QualityValidation => "quality_validation",
            Stage::RoleReview => "role_review",
            Stage::ReleaseCandidate => "release_candidate",
            Stage::FinalRelease => "final_release",
            Stage::RuntimeStart => "runtime_start",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = StageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == normalized)
            .ok_or_else(|| StageError::UnknownStage(s.to_string()))
    }
}

/// Tri-state status of a stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageState {
    #[default]
    Pending,
    Passed,
    Failed,
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageState::Pending => write!(f, "pending"),
            StageState::Passed => write!(f, "passed"),
            StageState::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for StageState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(StageState::Pending),
            "passed" | "pass" => Ok(StageState::Passed),
            "failed" | "fail" => Ok(StageState::Failed),
            _ => anyhow::bail!(
                "Invalid stage state '{}'. Valid values: pending, passed, failed",
                s
            ),
        }
    }
}

/// One recorded transition in the ledger history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub stage: Stage,
    pub state: StageState,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Persisted stage status for a single project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageLedger {
    /// Stages absent from the map are pending.
    #[serde(default)]
    pub stages: BTreeMap<Stage, StageState>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl StageLedger {
    pub fn state(&self, stage: Stage) -> StageState {
        self.stages.get(&stage).copied().unwrap_or_default()
    }

    pub fn is_passed(&self, stage: Stage) -> bool {
        self.state(stage) == StageState::Passed
    }

    /// Set a stage's state and append a bounded history record.
    pub fn record(&mut self, stage: Stage, state: StageState, details: Option<String>) {
        let now = Utc::now();
        self.stages.insert(stage, state);
        self.history.push(HistoryEntry {
            stage,
            state,
            timestamp: now,
            details,
        });
        if self.history.len() > HISTORY_LIMIT {
            let excess = self.history.len() - HISTORY_LIMIT;
            self.history.drain(..excess);
        }
        self.updated_at = Some(now);
    }

    /// Number of stages passed contiguously from the first stage.
    pub fn rank(&self) -> usize {
        Stage::ALL
            .iter()
            .take_while(|stage| self.is_passed(**stage))
            .count()
    }

    /// Stages currently in the failed state, in pipeline order.
    pub fn failed_stages(&self) -> Vec<Stage> {
        Stage::ALL
            .iter()
            .copied()
            .filter(|stage| self.state(*stage) == StageState::Failed)
            .collect()
    }

    /// Pass flags for every stage, keyed by stage name.
    pub fn pass_flags(&self) -> BTreeMap<Stage, bool> {
        Stage::ALL
            .iter()
            .map(|stage| (*stage, self.is_passed(*stage)))
            .collect()
    }
}

/// Gate check: every stage before `target` must be passed.
///
/// Returns the first prerequisite found not passed, with its actual state.
pub fn can_enter(ledger: &StageLedger, target: Stage) -> Result<(), StageError> {
    match target
        .predecessors()
        .iter()
        .find(|stage| !ledger.is_passed(**stage))
    {
        Some(blocking) => Err(StageError::GateViolation {
            target,
            blocking: *blocking,
            state: ledger.state(*blocking),
        }),
        None => Ok(()),
    }
}

/// File-backed access to one project's stage ledger.
pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the ledger; absent or corrupt files yield an all-pending ledger.
    pub fn load(&self) -> StageLedger {
        store::read_json_or_default(&self.path)
    }

    pub fn save(&self, ledger: &StageLedger) -> Result<()> {
        store::write_json_atomic(&self.path, ledger)
    }

    /// Set a stage's state, append history, persist, and return the ledger.
    ///
    /// Does not enforce ordering; callers consult [`can_enter`] first.
    pub fn mark(
        &self,
        stage: Stage,
        state: StageState,
        details: Option<String>,
    ) -> Result<StageLedger> {
        let mut ledger = self.load();
        ledger.record(stage, state, details);
        self.save(&ledger)?;
        Ok(ledger)
    }
}
