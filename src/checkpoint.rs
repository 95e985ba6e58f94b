//! Per-project resume point for delivery increments.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

use crate::store;

/// Fine-grained step inside one delivery increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStep {
    Create,
    Plan,
    Start,
    Test,
    Finish,
}

impl DeliveryStep {
    pub const ALL: [DeliveryStep; 5] = [
        DeliveryStep::Create,
        DeliveryStep::Plan,
        DeliveryStep::Start,
        DeliveryStep::Test,
        DeliveryStep::Finish,
    ];

    /// The step after this one, or `None` past `Finish`.
    pub fn next(self) -> Option<DeliveryStep> {
        let idx = Self::ALL.iter().position(|s| *s == self)?;
        Self::ALL.get(idx + 1).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStep::Create => "create",
            DeliveryStep::Plan => "plan",
            DeliveryStep::Start => "start",
            DeliveryStep::Test => "test",
            DeliveryStep::Finish => "finish",
        }
    }
}

impl fmt::Display for DeliveryStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStep {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|step| step.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow::anyhow!("Unknown delivery step: {}", s))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub requirement_id: String,
    #[serde(default)]
    pub seed: String,
    #[serde(default)]
    pub flow: String,
    #[serde(default)]
    pub domain: String,
    pub last_completed: DeliveryStep,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(requirement_id: impl Into<String>, last_completed: DeliveryStep) -> Self {
        Self {
            requirement_id: requirement_id.into(),
            seed: String::new(),
            flow: String::new(),
            domain: String::new(),
            last_completed,
            updated_at: Utc::now(),
        }
    }
}

/// Where the next increment should pick up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumePoint {
    /// No checkpoint on disk.
    Fresh,
    /// The checkpoint pointed at a requirement that is no longer in progress.
    Restart { stale_requirement: String },
    Continue {
        requirement_id: String,
        step: DeliveryStep,
    },
}

impl ResumePoint {
    pub fn step(&self) -> DeliveryStep {
        match self {
            ResumePoint::Fresh | ResumePoint::Restart { .. } => DeliveryStep::Create,
            ResumePoint::Continue { step, .. } => *step,
        }
    }

    pub fn requirement_id(&self) -> Option<&str> {
        match self {
            ResumePoint::Continue { requirement_id, .. } => Some(requirement_id),
            _ => None,
        }
    }
}

/// Answers whether a requirement is still where an in-flight increment left it.
pub trait RequirementLocator {
    fn is_in_progress(&self, requirement_id: &str) -> bool;
}

/// Requirements stored as files under `requirements/in-progress/`.
#[derive(Debug, Clone)]
pub struct RequirementBoard {
    in_progress: PathBuf,
}

impl RequirementBoard {
    pub fn new(in_progress: PathBuf) -> Self {
        Self { in_progress }
    }
}

impl RequirementLocator for RequirementBoard {
    fn is_in_progress(&self, requirement_id: &str) -> bool {
        let Ok(entries) = std::fs::read_dir(&self.in_progress) else {
            return false;
        };
        entries.filter_map(|e| e.ok()).any(|entry| {
            let path = entry.path();
            path.file_stem().and_then(|s| s.to_str()) == Some(requirement_id)
                || path.file_name().and_then(|s| s.to_str()) == Some(requirement_id)
        })
    }
}

pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Option<Checkpoint> {
        store::read_json(&self.path)
    }

    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        store::write_json_atomic(&self.path, checkpoint)
    }

    pub fn clear(&self) -> Result<()> {
        store::remove_if_exists(&self.path)
    }

    /// Record that `step` completed for `requirement_id`, keeping prior context.
    pub fn advance(&self, requirement_id: &str, step: DeliveryStep) -> Result<Checkpoint> {
        let mut checkpoint = match self.load() {
            Some(existing) if existing.requirement_id == requirement_id => existing,
            _ => Checkpoint::new(requirement_id, step),
        };
        checkpoint.last_completed = step;
        checkpoint.updated_at = Utc::now();
        self.save(&checkpoint)?;
        Ok(checkpoint)
    }

    /// Decide where the next increment resumes.
    ///
    /// A checkpoint whose requirement has left the in-progress area was
    /// interfered with externally; it is cleared and the increment restarts
    /// from `create`.
    pub fn choose_resume_step(&self, locator: &dyn RequirementLocator) -> Result<ResumePoint> {
        let Some(checkpoint) = self.load() else {
            return Ok(ResumePoint::Fresh);
        };

        if !locator.is_in_progress(&checkpoint.requirement_id) {
            warn!(
                requirement = %checkpoint.requirement_id,
                "Checkpoint requirement is no longer in progress, restarting"
            );
            self.clear()?;
            return Ok(ResumePoint::Restart {
                stale_requirement: checkpoint.requirement_id,
            });
        }

        let step = checkpoint
            .last_completed
            .next()
            .unwrap_or(DeliveryStep::Finish);
        info!(
            requirement = %checkpoint.requirement_id,
            last_completed = %checkpoint.last_completed,
            resume = %step,
            "Resuming from checkpoint"
        );
        Ok(ResumePoint::Continue {
            requirement_id: checkpoint.requirement_id,
            step,
        })
    }
}
