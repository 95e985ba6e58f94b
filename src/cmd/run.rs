//! The `run` command: start a campaign for one project.

use anyhow::Result;
use console::style;

use autopilot::campaign::{CampaignDriver, CampaignOutcome, CampaignPolicy};
use autopilot::config::Config;
use autopilot::delivery::CommandIncrement;

/// CLI flags that override `[campaign]` settings.
#[derive(Debug, Clone, Default)]
pub struct PolicyOverrides {
    pub max_cycles: Option<i64>,
    pub sleep_seconds: Option<i64>,
    pub min_runtime_minutes: Option<i64>,
    pub target_stage: Option<String>,
    pub stall_cycles: Option<i64>,
}

impl PolicyOverrides {
    fn apply(self, mut policy: CampaignPolicy) -> CampaignPolicy {
        if let Some(v) = self.max_cycles {
            policy.max_cycles = v;
        }
        if let Some(v) = self.sleep_seconds {
            policy.sleep_seconds = v;
        }
        if let Some(v) = self.min_runtime_minutes {
            policy.min_runtime_minutes = v;
        }
        if let Some(v) = self.target_stage {
            policy.target_stage = Some(v);
        }
        if let Some(v) = self.stall_cycles {
            policy.stall_cycles = v;
        }
        policy
    }
}

pub fn cmd_run(config: &Config, name: &str, overrides: PolicyOverrides) -> Result<()> {
    let project = super::open_project(config, name)?;
    let policy = overrides
        .apply(CampaignPolicy::from(&config.settings.campaign))
        .clamped();

    println!(
        "{} campaign for '{}' (target {}, max {} cycles)",
        style("Starting").cyan().bold(),
        name,
        policy.target_stage,
        policy.max_cycles
    );

    let delivery = CommandIncrement::new(
        &config.settings.delivery,
        &config.settings.provider.name,
        project.clone(),
    );
    let report = CampaignDriver::new(config, project, policy, delivery).run()?;

    let label = match report.outcome {
        CampaignOutcome::Succeeded => style(report.outcome.label()).green().bold(),
        CampaignOutcome::Stopped(_) => style(report.outcome.label()).yellow().bold(),
        CampaignOutcome::Crashed => style(report.outcome.label()).red().bold(),
    };
    println!();
    println!("Outcome:        {}", label);
    println!("Cycles:         {}", report.cycles);
    println!("Stage rank:     {}", report.stage_rank);
    println!("Stalled cycles: {}", report.stalled_cycles);
    println!("Failure streak: {}", report.failure_streak);
    println!("Recovery tier:  {}", report.tier);
    Ok(())
}
