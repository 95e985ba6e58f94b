//! Stale-state sweep, as a command and at process start.

use anyhow::Result;
use console::style;
use tracing::warn;

use autopilot::campaign::sweep_stale_states;
use autopilot::clock::OsProcessProbe;
use autopilot::config::Config;

/// Best-effort sweep before any command runs. Failures are logged only.
pub fn startup_sweep(config: &Config) {
    if !config.layout.is_initialized() {
        return;
    }
    let lock = config.workspace_lock();
    if let Err(e) = sweep_stale_states(&config.layout, &OsProcessProbe, lock.as_ref()) {
        warn!(error = %e, "Startup stale-state sweep failed");
    }
}

pub fn cmd_sweep(config: &Config) -> Result<()> {
    let lock = config.workspace_lock();
    let corrections = sweep_stale_states(&config.layout, &OsProcessProbe, lock.as_ref())?;

    if corrections.is_empty() {
        println!("No stale campaign states found.");
        return Ok(());
    }
    for correction in &corrections {
        let owner = correction
            .pid
            .map(|pid| format!("pid {}", pid))
            .unwrap_or_else(|| "no pid".to_string());
        println!(
            "{} {} ({} not alive)",
            style("sanitized").yellow(),
            correction.project,
            owner
        );
    }
    Ok(())
}
