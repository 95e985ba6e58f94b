use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::lock::{AdvisoryLock, MarkerFileLock};
use crate::settings::Settings;
use crate::workspace::{ProjectLayout, WorkspaceLayout, resolve_root};

/// Runtime configuration for autopilot.
///
/// Built once from CLI arguments, the settings file, and the environment,
/// then passed explicitly into every component. Nothing reads process-wide
/// flags.
#[derive(Debug, Clone)]
pub struct Config {
    pub layout: WorkspaceLayout,
    pub settings: Settings,
    pub verbose: bool,
    /// Never prompt; the campaign driver always runs this way.
    pub non_interactive: bool,
}

impl Config {
    /// Resolve the workspace and load `.autopilot/autopilot.toml` with env overrides.
    pub fn new(workspace: Option<&Path>, verbose: bool) -> Result<Self> {
        let root = resolve_root(workspace)?;
        let layout = WorkspaceLayout::new(root);
        let settings = Settings::load_or_default(&layout.settings_file)?.with_env_overrides();
        Ok(Self {
            layout,
            settings,
            verbose,
            non_interactive: true,
        })
    }

    /// Build a config from explicit parts.
    pub fn from_parts(root: PathBuf, settings: Settings) -> Self {
        Self {
            layout: WorkspaceLayout::new(root),
            settings,
            verbose: false,
            non_interactive: true,
        }
    }

    pub fn project(&self, name: &str) -> Result<ProjectLayout> {
        self.layout.project(name)
    }

    /// The lock guarding shared workspace files.
    pub fn workspace_lock(&self) -> Arc<dyn AdvisoryLock> {
        Arc::new(MarkerFileLock::new(
            self.layout.lock_file.clone(),
            self.settings.lock.to_options(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_config_without_settings_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::new(Some(dir.path()), false).unwrap();
        assert_eq!(config.settings.campaign.max_cycles, 10);
        assert_eq!(
            config.layout.root,
            dir.path().canonicalize().unwrap()
        );
        assert!(config.non_interactive);
    }

    #[test]
    fn test_config_reads_settings_file() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".autopilot")).unwrap();
        fs::write(
            dir.path().join(".autopilot/autopilot.toml"),
            "[lock]\nwait_budget_ms = 250\n",
        )
        .unwrap();

        let config = Config::new(Some(dir.path()), true).unwrap();
        assert!(config.verbose);
        assert_eq!(config.settings.lock.wait_budget_ms, 250);
    }

    #[test]
    fn test_config_rejects_malformed_settings() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".autopilot")).unwrap();
        fs::write(dir.path().join(".autopilot/autopilot.toml"), "[lock").unwrap();
        let err = Config::new(Some(dir.path()), false).unwrap_err();
        assert!(err.to_string().contains("autopilot.toml"));
    }

    #[test]
    fn test_workspace_lock_uses_layout_lock_file() {
        let dir = tempdir().unwrap();
        let config = Config::new(Some(dir.path()), false).unwrap();
        let lock = config.workspace_lock();
        let handle = lock.acquire().unwrap();
        assert_eq!(handle.path, config.layout.lock_file);
        assert!(config.layout.lock_file.exists());
        lock.release(handle).unwrap();
    }
}
