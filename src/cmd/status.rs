//! Status and diagnosis commands. Neither mutates project state.

use anyhow::Result;
use chrono::Utc;
use console::style;

use autopilot::audit::DebugReport;
use autopilot::campaign::CampaignStateStore;
use autopilot::config::Config;
use autopilot::signals::{self, ProviderIssue, ProviderIssueClassifier};
use autopilot::stage::{LedgerStore, Stage, StageState};
use autopilot::walk::{DEFAULT_MAX_DEPTH, ProjectTree};

fn styled_state(state: StageState) -> console::StyledObject<String> {
    let label = state.to_string();
    match state {
        StageState::Passed => style(label).green(),
        StageState::Failed => style(label).red(),
        StageState::Pending => style(label).dim(),
    }
}

pub fn cmd_status(config: &Config, name: &str) -> Result<()> {
    let project = super::open_project(config, name)?;

    println!();
    println!("Campaign Status: {}", name);
    println!("================{}", "=".repeat(name.len()));
    println!();

    match CampaignStateStore::new(project.campaign_state.clone()).load() {
        Some(state) => {
            let running = if state.running {
                style("yes".to_string()).green()
            } else {
                style("no".to_string()).dim()
            };
            println!("Phase:           {}", state.phase);
            println!("Running:         {}", running);
            if let Some(pid) = state.pid {
                println!("PID:             {}", pid);
            }
            println!("Cycle:           {}", state.cycle);
            println!("Elapsed:         {:.1} min", state.elapsed_minutes);
            if let Some(target) = state.target_stage {
                println!("Target stage:    {}", target);
            }
            println!("Stage rank:      {}", state.stage_rank);
            println!("Stalled cycles:  {}", state.stalled_cycles);
            println!("Failure streak:  {}", state.failure_streak);
            println!("Recovery tier:   {}", state.recovery_tier);
            if let Some(model) = &state.model {
                println!("Model:           {}", model);
            }
            if let Some(outcome) = &state.outcome {
                println!("Outcome:         {}", outcome);
            }
            if let Some(error) = &state.last_error {
                println!("Last error:      {}", style(error).red());
            }
        }
        None => println!("No campaign has run for this project yet."),
    }

    let ledger = LedgerStore::new(project.stage_ledger.clone()).load();
    println!();
    println!("{:<22} State", "Stage");
    println!("{:<22} -----", "-".repeat(22));
    for stage in Stage::ALL {
        println!("{:<22} {}", stage.as_str(), styled_state(ledger.state(stage)));
    }
    println!();
    Ok(())
}

pub fn cmd_diagnose(config: &Config, name: &str) -> Result<()> {
    let project = super::open_project(config, name)?;
    let ledger = LedgerStore::new(project.stage_ledger.clone()).load();
    let signals = signals::collect(&project.run_status, &project.lifecycle_report, &ledger);

    let now = Utc::now();
    let classifier =
        ProviderIssueClassifier::with_window_minutes(config.settings.provider.issue_window_minutes);
    let issue = classifier.classify_log(&project.call_outcomes, now);
    let quota_hint = classifier.quota_reset_hint_from_log(&project.call_outcomes, now);
    let cycle = CampaignStateStore::new(project.campaign_state.clone())
        .load()
        .map(|s| s.cycle)
        .unwrap_or_default();

    let tree = ProjectTree::new(&project.work_dir, DEFAULT_MAX_DEPTH);
    let report = DebugReport::build(cycle, &signals, issue, quota_hint, &tree);

    println!();
    println!("Diagnosis: {}", name);
    println!();
    let blocking = if signals.is_blocking {
        style("yes".to_string()).red().bold()
    } else {
        style("no".to_string()).green()
    };
    println!("Blocking:           {}", blocking);
    println!("Lifecycle failures: {}", signals.lifecycle_failures);
    if !signals.failed_stages.is_empty() {
        let stages: Vec<&str> = signals.failed_stages.iter().map(|s| s.as_str()).collect();
        println!("Failed stages:      {}", stages.join(", "));
    }
    let issue_label = match issue {
        ProviderIssue::None => style(issue.to_string()).dim(),
        _ => style(issue.to_string()).yellow(),
    };
    println!("Provider issue:     {}", issue_label);
    if let Some(hint) = &report.quota_hint {
        println!("Quota hint:         {}", hint);
    }
    println!("Test files:         {}", report.test_file_count);

    if !signals.blockers.is_empty() {
        println!();
        println!("Blockers:");
        for blocker in &signals.blockers {
            println!("  - {}", blocker);
        }
    }

    println!();
    println!("Root causes:");
    if report.root_causes.is_empty() {
        println!("  {}", style("none identified").dim());
    }
    for (cause, recommendation) in report.root_causes.iter().zip(&report.recommendations) {
        println!("  {} {}", style(cause.as_str()).bold(), style(recommendation).dim());
    }

    if !report.docs.is_empty() {
        println!();
        println!("Documentation:");
        for doc in &report.docs {
            println!("  {}", doc.display());
        }
    }
    println!();
    Ok(())
}
