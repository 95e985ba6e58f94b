//! Workspace and per-project file layout.
//!
//! ```text
//! <workspace>/
//! ├── .autopilot/
//! │   ├── autopilot.toml           # settings (optional)
//! │   ├── projects.json            # shared project index
//! │   ├── projects.json.lock       # workspace lock marker
//! │   ├── model-availability.json  # provider/model availability cache
//! │   ├── logs/
//! │   └── projects/<project>/      # per-project control state
//! └── <project>/                   # project work area
//!     └── requirements/{backlog,in-progress,done}/
//! ```

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};

/// Name of the control directory at the workspace root.
pub const AUTOPILOT_DIR: &str = ".autopilot";

/// Paths shared by every project in a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
    pub root: PathBuf,
    pub control_dir: PathBuf,
    pub settings_file: PathBuf,
    pub project_index: PathBuf,
    pub lock_file: PathBuf,
    pub availability_file: PathBuf,
    pub log_dir: PathBuf,
    pub projects_dir: PathBuf,
}

impl WorkspaceLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let control_dir = root.join(AUTOPILOT_DIR);
        Self {
            settings_file: control_dir.join("autopilot.toml"),
            project_index: control_dir.join("projects.json"),
            lock_file: control_dir.join("projects.json.lock"),
            availability_file: control_dir.join("model-availability.json"),
            log_dir: control_dir.join("logs"),
            projects_dir: control_dir.join("projects"),
            control_dir,
            root,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.control_dir.is_dir()
    }

    pub fn project(&self, name: &str) -> Result<ProjectLayout> {
        validate_project_name(name)?;
        Ok(ProjectLayout::new(self, name))
    }

    /// Names of every project that has a control directory.
    pub fn project_names(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.projects_dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .filter(|name| validate_project_name(name).is_ok())
            .collect();
        names.sort();
        names
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.control_dir, &self.log_dir, &self.projects_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }
}

/// Paths for one project's control state and work area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    pub name: String,
    pub state_dir: PathBuf,
    pub work_dir: PathBuf,
    pub stage_ledger: PathBuf,
    pub checkpoint: PathBuf,
    pub campaign_state: PathBuf,
    pub journal: PathBuf,
    pub recovery_audit: PathBuf,
    pub debug_report: PathBuf,
    pub call_outcomes: PathBuf,
    pub log_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub run_status: PathBuf,
    pub lifecycle_report: PathBuf,
    pub increment_result: PathBuf,
    pub requirements_dir: PathBuf,
}

impl ProjectLayout {
    fn new(workspace: &WorkspaceLayout, name: &str) -> Self {
        let state_dir = workspace.projects_dir.join(name);
        let work_dir = workspace.root.join(name);
        let reports_dir = state_dir.join("reports");
        Self {
            name: name.to_string(),
            stage_ledger: state_dir.join("stage-ledger.json"),
            checkpoint: state_dir.join("checkpoint.json"),
            campaign_state: state_dir.join("campaign-state.json"),
            journal: state_dir.join("campaign-journal.jsonl"),
            recovery_audit: state_dir.join("recovery-audit.jsonl"),
            debug_report: state_dir.join("debug-report.json"),
            call_outcomes: state_dir.join("call-outcomes.jsonl"),
            log_dir: state_dir.join("logs"),
            run_status: reports_dir.join("run-status.json"),
            lifecycle_report: reports_dir.join("lifecycle-report.json"),
            increment_result: reports_dir.join("increment-result.json"),
            requirements_dir: work_dir.join("requirements"),
            reports_dir,
            state_dir,
            work_dir,
        }
    }

    pub fn in_progress_dir(&self) -> PathBuf {
        self.requirements_dir.join("in-progress")
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            &self.state_dir,
            &self.log_dir,
            &self.reports_dir,
            &self.work_dir,
        ] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        for bucket in ["backlog", "in-progress", "done"] {
            let dir = self.requirements_dir.join(bucket);
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }
}

/// Project names become directory names; keep them to a safe alphabet.
pub fn validate_project_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
        bail!(
            "Invalid project name '{}'. Use letters, digits, '-', '_' or '.' (max 64 chars, no leading '.')",
            name
        );
    }
    Ok(())
}

/// Resolve the workspace root, defaulting to the current directory.
pub fn resolve_root(root: Option<&Path>) -> Result<PathBuf> {
    let root = match root {
        Some(path) => path.to_path_buf(),
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    std::fs::create_dir_all(&root)
        .with_context(|| format!("Failed to create workspace root: {}", root.display()))?;
    root.canonicalize()
        .context("Failed to resolve workspace directory")
}
