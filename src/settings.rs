//! Settings file for autopilot workspaces.
//!
//! Reads `.autopilot/autopilot.toml`. Every section and key is optional and
//! falls back to the defaults below; values layer as file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [campaign]
//! min_runtime_minutes = 0
//! max_cycles = 10
//! sleep_seconds = 30
//! target_stage = "runtime_start"
//! stall_cycles = 1
//!
//! [lock]
//! stale_after_ms = 30000
//! retry_interval_ms = 50
//! wait_budget_ms = 5000
//!
//! [provider]
//! name = "claude"
//! models = ["sonnet", "haiku"]
//! fallback_unavailable_ms = 600000
//! issue_window_minutes = 30
//!
//! [delivery]
//! command = "autopilot-increment"
//! args = ["--headless"]
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::lock::LockOptions;

/// Campaign policy defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignSection {
    #[serde(default)]
    pub min_runtime_minutes: i64,
    #[serde(default = "default_max_cycles")]
    pub max_cycles: i64,
    #[serde(default = "default_sleep_seconds")]
    pub sleep_seconds: i64,
    /// Stage name; unknown names fall back to the last stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_stage: Option<String>,
    #[serde(default = "default_stall_cycles")]
    pub stall_cycles: i64,
}

fn default_max_cycles() -> i64 {
    10
}

fn default_sleep_seconds() -> i64 {
    30
}

fn default_stall_cycles() -> i64 {
    1
}

impl Default for CampaignSection {
    fn default() -> Self {
        Self {
            min_runtime_minutes: 0,
            max_cycles: default_max_cycles(),
            sleep_seconds: default_sleep_seconds(),
            target_stage: None,
            stall_cycles: default_stall_cycles(),
        }
    }
}

/// Workspace lock tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockSection {
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    #[serde(default = "default_wait_budget_ms")]
    pub wait_budget_ms: u64,
}

fn default_stale_after_ms() -> u64 {
    30_000
}

fn default_retry_interval_ms() -> u64 {
    50
}

fn default_wait_budget_ms() -> u64 {
    5_000
}

impl Default for LockSection {
    fn default() -> Self {
        Self {
            stale_after_ms: default_stale_after_ms(),
            retry_interval_ms: default_retry_interval_ms(),
            wait_budget_ms: default_wait_budget_ms(),
        }
    }
}

impl LockSection {
    pub fn to_options(&self) -> LockOptions {
        LockOptions {
            stale_after: Duration::from_millis(self.stale_after_ms),
            retry_interval: Duration::from_millis(self.retry_interval_ms.max(1)),
            wait_budget: Duration::from_millis(self.wait_budget_ms),
        }
    }
}

/// Generation provider and model preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSection {
    #[serde(default = "default_provider_name")]
    pub name: String,
    /// Candidate models in preference order.
    #[serde(default = "default_models")]
    pub models: Vec<String>,
    /// Unavailability window used when a quota message carries no duration.
    #[serde(default = "default_fallback_unavailable_ms")]
    pub fallback_unavailable_ms: u64,
    /// How far back the provider issue classifier looks.
    #[serde(default = "default_issue_window_minutes")]
    pub issue_window_minutes: i64,
}

fn default_provider_name() -> String {
    "claude".to_string()
}

fn default_models() -> Vec<String> {
    vec!["default".to_string()]
}

fn default_fallback_unavailable_ms() -> u64 {
    600_000
}

fn default_issue_window_minutes() -> i64 {
    30
}

impl ProviderSection {
    /// Drop blank model names; an empty list falls back to the default model.
    pub fn with_usable_models(mut self) -> Self {
        self.models.retain(|m| !m.trim().is_empty());
        if self.models.is_empty() {
            warn!(provider = %self.name, "No models configured, using the default model");
            self.models = default_models();
        }
        self
    }
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            models: default_models(),
            fallback_unavailable_ms: default_fallback_unavailable_ms(),
            issue_window_minutes: default_issue_window_minutes(),
        }
    }
}

/// External delivery-increment command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliverySection {
    #[serde(default = "default_delivery_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_delivery_command() -> String {
    "autopilot-increment".to_string()
}

impl Default for DeliverySection {
    fn default() -> Self {
        Self {
            command: default_delivery_command(),
            args: Vec::new(),
        }
    }
}

/// The complete autopilot.toml structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub campaign: CampaignSection,
    #[serde(default)]
    pub lock: LockSection,
    #[serde(default)]
    pub provider: ProviderSection,
    #[serde(default)]
    pub delivery: DeliverySection,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut settings: Self = toml::from_str(content).context("Failed to parse autopilot.toml")?;
        settings.provider = settings.provider.with_usable_models();
        Ok(settings)
    }

    /// Load from `path`, or defaults if the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize autopilot.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment overrides (`AUTOPILOT_DELIVERY_CMD`, `AUTOPILOT_PROVIDER`).
    pub fn with_env_overrides(mut self) -> Self {
        self.apply_overrides(
            std::env::var("AUTOPILOT_DELIVERY_CMD").ok(),
            std::env::var("AUTOPILOT_PROVIDER").ok(),
        );
        self
    }

    fn apply_overrides(&mut self, delivery_cmd: Option<String>, provider: Option<String>) {
        if let Some(cmd) = delivery_cmd.filter(|c| !c.trim().is_empty()) {
            self.delivery.command = cmd;
        }
        if let Some(name) = provider.filter(|p| !p.trim().is_empty()) {
            self.provider.name = name;
        }
    }
}
