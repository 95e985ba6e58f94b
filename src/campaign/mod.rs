//! Campaign driver: the outer loop that repeatedly invokes one delivery
//! increment for a project, tracks stage progress, and escalates recovery.
//!
//! - `policy` validates limits from settings or CLI flags
//! - `state` is the per-project snapshot persisted every cycle
//! - `sweep` clears `running` flags left behind by dead processes
//! - `driver` runs the cycle loop

mod driver;
mod policy;
mod state;
mod sweep;

pub use driver::CampaignDriver;
pub use policy::{CampaignPolicy, ResolvedPolicy};
pub use state::{CampaignPhase, CampaignState, CampaignStateStore};
pub use sweep::{SweepCorrection, sweep_stale_states};

use crate::recovery::RecoveryTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    MaxCycles,
    RuntimeBudget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignOutcome {
    Succeeded,
    Stopped(StopReason),
    Crashed,
}

impl CampaignOutcome {
    pub fn label(&self) -> String {
        match self {
            CampaignOutcome::Succeeded => "succeeded".to_string(),
            CampaignOutcome::Stopped(StopReason::MaxCycles) => "stopped:max_cycles".to_string(),
            CampaignOutcome::Stopped(StopReason::RuntimeBudget) => {
                "stopped:runtime_budget".to_string()
            }
            CampaignOutcome::Crashed => "crashed".to_string(),
        }
    }
}

/// Summary returned when a campaign ends without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignReport {
    pub outcome: CampaignOutcome,
    pub cycles: u32,
    pub stage_rank: usize,
    pub stalled_cycles: u32,
    pub failure_streak: u32,
    pub tier: RecoveryTier,
}
