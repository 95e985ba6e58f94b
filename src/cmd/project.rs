//! Project initialization and listing commands.

use anyhow::Result;
use autopilot::config::Config;
use autopilot::project_index::ProjectIndex;
use autopilot::settings::Settings;

pub fn cmd_init(config: &Config, name: &str) -> Result<()> {
    let project = config.project(name)?;
    let layout = &config.layout;

    layout.ensure_directories()?;
    if !layout.settings_file.exists() {
        Settings::default().save(&layout.settings_file)?;
    }
    project.ensure_directories()?;

    let index = ProjectIndex::new(layout.project_index.clone(), config.workspace_lock());
    let created = index.register(name)?;

    if created {
        println!("Initialized project '{}' in {}", name, layout.root.display());
        println!();
        println!("Created directory structure:");
        println!("  .autopilot/");
        println!("  ├── autopilot.toml          # Settings");
        println!("  ├── projects.json           # Project index");
        println!("  └── projects/{}/", name);
        println!("      ├── reports/            # Collaborator reports");
        println!("      └── logs/               # Per-cycle instructions and output");
        println!("  {}/", name);
        println!("  └── requirements/{{backlog,in-progress,done}}/");
        println!();
        println!("Next steps:");
        println!("  1. Set [delivery] command in .autopilot/autopilot.toml");
        println!("  2. Run `autopilot run {}` to start a campaign", name);
    } else {
        println!("Project '{}' already initialized", name);
        println!("Directory structure verified.");
    }

    Ok(())
}

pub fn cmd_projects(config: &Config) -> Result<()> {
    let index = ProjectIndex::new(config.layout.project_index.clone(), config.workspace_lock());
    let projects = index.list();

    if projects.is_empty() {
        println!("No projects registered. Run 'autopilot init <project>' first.");
        return Ok(());
    }

    println!("{:<24} {:<22} Last campaign", "Project", "Registered");
    println!("{:<24} {:<22} -------------", "-".repeat(24), "-".repeat(22));
    for entry in &projects {
        let last = entry
            .last_campaign_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:<24} {:<22} {}",
            entry.name,
            entry.registered_at.format("%Y-%m-%d %H:%M").to_string(),
            console::style(last).dim()
        );
    }
    Ok(())
}
