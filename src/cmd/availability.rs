//! Model availability cache commands.

use anyhow::Result;
use chrono::Utc;
use console::style;
use std::sync::Arc;

use super::super::AvailabilityCommands;
use autopilot::availability::AvailabilityCache;
use autopilot::clock::SystemClock;
use autopilot::config::Config;

pub fn cmd_availability(config: &Config, command: &AvailabilityCommands) -> Result<()> {
    config.layout.ensure_directories()?;
    let cache = AvailabilityCache::new(
        config.layout.availability_file.clone(),
        config.workspace_lock(),
        Arc::new(SystemClock),
    );

    match command {
        AvailabilityCommands::List { provider } => {
            let entries = match provider {
                Some(p) => cache.active_entries(p),
                None => cache.all_active_entries(),
            };
            if entries.is_empty() {
                println!("All models available.");
                return Ok(());
            }

            let now = Utc::now();
            println!("{:<12} {:<24} {:<9} {:<10} Hint", "Provider", "Model", "Reason", "Remaining");
            println!(
                "{:<12} {:<24} {:<9} {:<10} ----",
                "-".repeat(12),
                "-".repeat(24),
                "-".repeat(9),
                "-".repeat(10)
            );
            for entry in entries {
                let remaining = (entry.unavailable_until - now).num_seconds().max(0);
                println!(
                    "{:<12} {:<24} {:<9} {:<10} {}",
                    entry.provider,
                    entry.model,
                    entry.reason,
                    format!("{}m{:02}s", remaining / 60, remaining % 60),
                    style(entry.hint).dim()
                );
            }
        }
        AvailabilityCommands::Mark {
            provider,
            model,
            hint,
        } => {
            let entry = cache.mark_unavailable(
                provider,
                model,
                hint,
                config.settings.provider.fallback_unavailable_ms,
            )?;
            println!(
                "Marked {}/{} unavailable until {}",
                entry.provider,
                entry.model,
                entry.unavailable_until.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
        AvailabilityCommands::Sweep => {
            let removed = cache.sweep_expired()?;
            println!("Removed {} expired entr{}", removed, if removed == 1 { "y" } else { "ies" });
        }
    }
    Ok(())
}
