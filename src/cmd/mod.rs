//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module          | Commands handled            |
//! |-----------------|-----------------------------|
//! | `project`       | `Init`, `Projects`          |
//! | `run`           | `Run`                       |
//! | `status`        | `Status`, `Diagnose`        |
//! | `stages`        | `Stages`                    |
//! | `availability`  | `Availability`              |
//! | `sweep`         | `Sweep`, startup sweep      |

pub mod availability;
pub mod project;
pub mod run;
pub mod stages;
pub mod status;
pub mod sweep;

pub use availability::cmd_availability;
pub use project::{cmd_init, cmd_projects};
pub use run::{PolicyOverrides, cmd_run};
pub use stages::cmd_stages;
pub use status::{cmd_diagnose, cmd_status};
pub use sweep::{cmd_sweep, startup_sweep};

use anyhow::{Result, bail};
use autopilot::config::Config;
use autopilot::workspace::ProjectLayout;

/// Resolve a project that `autopilot init` has already created.
fn open_project(config: &Config, name: &str) -> Result<ProjectLayout> {
    let project = config.project(name)?;
    if !project.state_dir.is_dir() {
        bail!(
            "Project '{}' is not initialized. Run 'autopilot init {}' first.",
            name,
            name
        );
    }
    Ok(project)
}
