//! Stage ledger commands: gate check and diagnostic mark.

use anyhow::Result;
use console::style;

use super::super::StagesCommands;
use autopilot::audit::{AuditLogger, JournalEvent};
use autopilot::config::Config;
use autopilot::stage::{LedgerStore, Stage, StageState, can_enter};

pub fn cmd_stages(config: &Config, name: &str, command: &StagesCommands) -> Result<()> {
    let project = super::open_project(config, name)?;
    let store = LedgerStore::new(project.stage_ledger.clone());

    match command {
        StagesCommands::Check { stage } => {
            let stage: Stage = stage.parse()?;
            can_enter(&store.load(), stage)?;
            println!("{} {} may be entered", style("✓").green(), stage);
        }
        StagesCommands::Mark {
            stage,
            state,
            details,
        } => {
            let stage: Stage = stage.parse()?;
            let state: StageState = state.parse()?;
            let ledger = store.mark(stage, state, details.clone())?;
            AuditLogger::new(&project).journal(JournalEvent::StageMarked { stage, state })?;
            println!(
                "Marked {} as {} (rank {})",
                stage,
                state,
                ledger.rank()
            );
        }
    }
    Ok(())
}
