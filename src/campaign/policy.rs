use chrono::Duration;
use tracing::warn;

use crate::settings::CampaignSection;
use crate::stage::Stage;

/// Campaign limits as requested, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignPolicy {
    pub min_runtime_minutes: i64,
    pub max_cycles: i64,
    pub sleep_seconds: i64,
    pub target_stage: Option<String>,
    pub stall_cycles: i64,
}

impl From<&CampaignSection> for CampaignPolicy {
    fn from(section: &CampaignSection) -> Self {
        Self {
            min_runtime_minutes: section.min_runtime_minutes,
            max_cycles: section.max_cycles,
            sleep_seconds: section.sleep_seconds,
            target_stage: section.target_stage.clone(),
            stall_cycles: section.stall_cycles,
        }
    }
}

impl Default for CampaignPolicy {
    fn default() -> Self {
        Self::from(&CampaignSection::default())
    }
}

/// Validated campaign limits. Out-of-range inputs are clamped, never rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPolicy {
    /// Wall-clock budget; `None` when the requested minutes were zero.
    pub runtime_budget: Option<Duration>,
    pub max_cycles: u32,
    pub sleep: std::time::Duration,
    pub target_stage: Stage,
    pub stall_cycles: u32,
}

impl CampaignPolicy {
    pub fn clamped(&self) -> ResolvedPolicy {
        let target_stage = match self.target_stage.as_deref().map(str::parse::<Stage>) {
            Some(Ok(stage)) => stage,
            Some(Err(e)) => {
                warn!(error = %e, fallback = %Stage::last(), "Unknown target stage, using last stage");
                Stage::last()
            }
            None => Stage::last(),
        };
        let minutes = self.min_runtime_minutes.max(0);

        ResolvedPolicy {
            runtime_budget: (minutes > 0).then(|| Duration::minutes(minutes)),
            max_cycles: self.max_cycles.clamp(1, u32::MAX as i64) as u32,
            sleep: std::time::Duration::from_secs(self.sleep_seconds.max(0) as u64),
            target_stage,
            stall_cycles: self.stall_cycles.clamp(1, u32::MAX as i64) as u32,
        }
    }
}

impl ResolvedPolicy {
    /// Stall count as the recovery planner sees it, after the grace window.
    pub fn effective_stall(&self, stalled_cycles: u32) -> u32 {
        stalled_cycles.saturating_sub(self.stall_cycles - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let policy = CampaignPolicy {
            min_runtime_minutes: -5,
            max_cycles: 0,
            sleep_seconds: -1,
            target_stage: Some("shipping".into()),
            stall_cycles: -3,
        }
        .clamped();

        assert_eq!(policy.runtime_budget, None);
        assert_eq!(policy.max_cycles, 1);
        assert_eq!(policy.sleep, std::time::Duration::ZERO);
        assert_eq!(policy.target_stage, Stage::RuntimeStart);
        assert_eq!(policy.stall_cycles, 1);
    }

    #[test]
    fn test_valid_values_pass_through() {
        let policy = CampaignPolicy {
            min_runtime_minutes: 90,
            max_cycles: 3,
            sleep_seconds: 0,
            target_stage: Some("discovery".into()),
            stall_cycles: 2,
        }
        .clamped();

        assert_eq!(policy.runtime_budget, Some(Duration::minutes(90)));
        assert_eq!(policy.max_cycles, 3);
        assert_eq!(policy.target_stage, Stage::Discovery);
    }

    #[test]
    fn test_default_targets_last_stage() {
        let policy = CampaignPolicy::default().clamped();
        assert_eq!(policy.target_stage, Stage::last());
        assert_eq!(policy.max_cycles, 10);
    }

    #[test]
    fn test_stall_grace_window() {
        let mut policy = CampaignPolicy::default();
        policy.stall_cycles = 1;
        assert_eq!(policy.clamped().effective_stall(3), 3);
        policy.stall_cycles = 3;
        let resolved = policy.clamped();
        assert_eq!(resolved.effective_stall(2), 0);
        assert_eq!(resolved.effective_stall(5), 3);
    }
}
