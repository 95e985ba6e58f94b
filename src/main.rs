use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use autopilot::config::Config;
use autopilot::logging::{self, LogOptions};

mod cmd;

#[derive(Parser)]
#[command(name = "autopilot")]
#[command(version, about = "Unattended stage-gated delivery campaigns")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Workspace root (defaults to the current directory)
    #[arg(long, global = true)]
    pub workspace: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the workspace layout and register a project
    Init { project: String },
    /// Run a campaign for a project until it reaches the target stage or a limit
    Run {
        project: String,

        #[arg(long)]
        max_cycles: Option<i64>,

        #[arg(long)]
        sleep_seconds: Option<i64>,

        /// Keep cycling for at most this many minutes (0 = no limit)
        #[arg(long)]
        min_runtime_minutes: Option<i64>,

        #[arg(long)]
        target_stage: Option<String>,

        /// Cycles without progress tolerated before stall recovery escalates
        #[arg(long)]
        stall_cycles: Option<i64>,
    },
    /// Show campaign state and stage ledger
    Status { project: String },
    /// Inspect or adjust the stage ledger
    Stages {
        project: String,

        #[command(subcommand)]
        command: StagesCommands,
    },
    /// Report blockers, provider issues, and recommendations without changing state
    Diagnose { project: String },
    /// Clear running flags left behind by dead campaign processes
    Sweep,
    /// Inspect or edit the model availability cache
    Availability {
        #[command(subcommand)]
        command: AvailabilityCommands,
    },
    /// List registered projects
    Projects,
}

#[derive(Subcommand, Clone)]
pub enum StagesCommands {
    /// Check whether a stage may be entered
    Check { stage: String },
    /// Set a stage's state directly
    Mark {
        stage: String,
        state: String,

        #[arg(long)]
        details: Option<String>,
    },
}

#[derive(Subcommand, Clone)]
pub enum AvailabilityCommands {
    /// Show models that are currently unavailable
    List {
        #[arg(long)]
        provider: Option<String>,
    },
    /// Mark a model unavailable for the duration named in a hint
    Mark {
        provider: String,
        model: String,
        hint: String,
    },
    /// Drop expired entries
    Sweep,
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let config = Config::new(cli.workspace.as_deref(), cli.verbose)?;

    let _guard = logging::init(LogOptions {
        verbose: cli.verbose,
        log_dir: config
            .layout
            .is_initialized()
            .then(|| config.layout.log_dir.clone()),
    });

    if !matches!(cli.command, Commands::Init { .. } | Commands::Sweep) {
        cmd::startup_sweep(&config);
    }

    match &cli.command {
        Commands::Init { project } => cmd::cmd_init(&config, project)?,
        Commands::Run {
            project,
            max_cycles,
            sleep_seconds,
            min_runtime_minutes,
            target_stage,
            stall_cycles,
        } => {
            let overrides = cmd::PolicyOverrides {
                max_cycles: *max_cycles,
                sleep_seconds: *sleep_seconds,
                min_runtime_minutes: *min_runtime_minutes,
                target_stage: target_stage.clone(),
                stall_cycles: *stall_cycles,
            };
            cmd::cmd_run(&config, project, overrides)?;
        }
        Commands::Status { project } => cmd::cmd_status(&config, project)?,
        Commands::Stages { project, command } => cmd::cmd_stages(&config, project, command)?,
        Commands::Diagnose { project } => cmd::cmd_diagnose(&config, project)?,
        Commands::Sweep => cmd::cmd_sweep(&config)?,
        Commands::Availability { command } => cmd::cmd_availability(&config, command)?,
        Commands::Projects => cmd::cmd_projects(&config)?,
    }

    Ok(())
}
