use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::recovery::RecoveryTier;
use crate::stage::Stage;
use crate::store;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignPhase {
    #[default]
    Starting,
    Resuming,
    Delivering,
    Evaluating,
    Sleeping,
    WaitingForProvider,
    Succeeded,
    Stopped,
    Crashed,
    StaleStateSanitized,
}

impl CampaignPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            CampaignPhase::Starting => "starting",
            CampaignPhase::Resuming => "resuming",
            CampaignPhase::Delivering => "delivering",
            CampaignPhase::Evaluating => "evaluating",
            CampaignPhase::Sleeping => "sleeping",
            CampaignPhase::WaitingForProvider => "waiting_for_provider",
            CampaignPhase::Succeeded => "succeeded",
            CampaignPhase::Stopped => "stopped",
            CampaignPhase::Crashed => "crashed",
            CampaignPhase::StaleStateSanitized => "stale_state_sanitized",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CampaignPhase::Succeeded
                | CampaignPhase::Stopped
                | CampaignPhase::Crashed
                | CampaignPhase::StaleStateSanitized
        )
    }
}

impl fmt::Display for CampaignPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-project campaign snapshot, rewritten atomically every cycle.
///
/// Doubles as the liveness record: `running` plus `pid` is how later
/// processes tell a live campaign from one that crashed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CampaignState {
    pub project: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    pub cycle: u32,
    pub elapsed_minutes: f64,
    pub target_stage: Option<Stage>,
    #[serde(default)]
    pub stage_passed: BTreeMap<Stage, bool>,
    #[serde(default)]
    pub stage_rank: usize,
    pub stalled_cycles: u32,
    pub failure_streak: u32,
    pub recovery_tier: RecoveryTier,
    pub running: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub phase: CampaignPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_recovery_action: Option<String>,
    /// `succeeded`, `stopped:max_cycles`, `stopped:runtime_budget` or `crashed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

pub struct CampaignStateStore {
    path: PathBuf,
}

impl CampaignStateStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when absent or corrupt.
    pub fn load(&self) -> Option<CampaignState> {
        store::read_json(&self.path)
    }

    pub fn save(&self, state: &CampaignState) -> Result<()> {
        store::write_json_atomic(&self.path, state)
    }
}
