//! The delivery-increment collaborator seam.
//!
//! The driver hands each cycle to a [`DeliveryIncrement`]. The production
//! adapter, [`CommandIncrement`], runs an external command in the project
//! work area and reads back the report it leaves behind. Whatever it does
//! internally (generation calls, builds, tests) is opaque here.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::checkpoint::{DeliveryStep, ResumePoint};
use crate::extract::{Extracted, extract_json};
use crate::settings::DeliverySection;
use crate::signals::CallOutcome;
use crate::stage::{Stage, StageState};
use crate::store;
use crate::workspace::ProjectLayout;

/// Characters of output kept in call-outcome records.
const OUTCOME_TEXT_LIMIT: usize = 2_000;
/// Share of the outcome text reserved for stderr.
const STDERR_TEXT_LIMIT: usize = 1_500;
/// Characters of stdout searched for a fallback result record.
const STDOUT_TAIL_LIMIT: usize = 16_000;

#[derive(Debug, Clone)]
pub struct IncrementRequest {
    pub project: String,
    pub cycle: u32,
    pub resume: ResumePoint,
    pub instructions: Option<String>,
    pub compact_payloads: bool,
    pub force_restart: bool,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: Stage,
    pub state: StageState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// The requirement an increment is working on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequirementRef {
    pub id: String,
    #[serde(default)]
    pub seed: String,
    #[serde(default)]
    pub flow: String,
    #[serde(default)]
    pub domain: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncrementOutcome {
    pub success: bool,
    pub error: Option<String>,
    pub stage_results: Vec<StageReport>,
    pub completed_step: Option<DeliveryStep>,
    pub requirement: Option<RequirementRef>,
}

impl IncrementOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

pub trait DeliveryIncrement {
    fn deliver(&mut self, request: &IncrementRequest) -> Result<IncrementOutcome>;
}

/// Wire shape of `reports/increment-result.json`.
#[derive(Debug, Clone, Default, Deserialize)]
struct ResultRecord {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    stages: Vec<RawStageReport>,
    #[serde(default)]
    completed_step: Option<String>,
    #[serde(default)]
    requirement: Option<RequirementRef>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawStageReport {
    stage: String,
    state: String,
    #[serde(default)]
    details: Option<String>,
}

impl ResultRecord {
    fn into_outcome(self, exit_ok: bool) -> IncrementOutcome {
        let stage_results = self
            .stages
            .into_iter()
            .filter_map(|raw| match (raw.stage.parse::<Stage>(), raw.state.parse::<StageState>()) {
                (Ok(stage), Ok(state)) => Some(StageReport {
                    stage,
                    state,
                    details: raw.details,
                }),
                _ => {
                    warn!(stage = %raw.stage, state = %raw.state, "Ignoring unrecognised stage result");
                    None
                }
            })
            .collect();
        let completed_step = self.completed_step.and_then(|s| s.parse().ok());
        let success = exit_ok && self.success.unwrap_or(true);

        IncrementOutcome {
            success,
            error: self
                .error
                .or_else(|| (!success).then(|| "increment reported failure".to_string())),
            stage_results,
            completed_step,
            requirement: self.requirement.filter(|r| !r.id.trim().is_empty()),
        }
    }
}

fn tail(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// Call-outcome text: the tail of stderr first, then as much of the stdout
/// tail as still fits.
fn outcome_text(stderr: &str, stdout: &str) -> String {
    let stdout = stdout.trim();
    let stderr_limit = if stdout.is_empty() {
        OUTCOME_TEXT_LIMIT
    } else {
        STDERR_TEXT_LIMIT
    };
    let stderr = tail(stderr.trim(), stderr_limit).trim();
    let remaining = OUTCOME_TEXT_LIMIT.saturating_sub(stderr.len() + 1);
    let stdout = tail(stdout, remaining).trim();
    match (stderr.is_empty(), stdout.is_empty()) {
        (true, _) => stdout.to_string(),
        (false, true) => stderr.to_string(),
        (false, false) => format!("{}\n{}", stderr, stdout),
    }
}

/// Runs the configured delivery command once per cycle.
pub struct CommandIncrement {
    command: String,
    args: Vec<String>,
    provider: String,
    project: ProjectLayout,
}

impl CommandIncrement {
    pub fn new(delivery: &DeliverySection, provider: &str, project: ProjectLayout) -> Self {
        Self {
            command: delivery.command.clone(),
            args: delivery.args.clone(),
            provider: provider.to_string(),
            project,
        }
    }

    fn write_instructions(&self, request: &IncrementRequest) -> Result<Option<PathBuf>> {
        let Some(text) = request.instructions.as_deref() else {
            return Ok(None);
        };
        let path = self
            .project
            .log_dir
            .join(format!("cycle-{}-instructions.md", request.cycle));
        std::fs::create_dir_all(&self.project.log_dir).with_context(|| {
            format!("Failed to create directory: {}", self.project.log_dir.display())
        })?;
        std::fs::write(&path, text).context("Failed to write instructions file")?;
        Ok(Some(path))
    }

    fn read_result(&self, stdout: &str) -> Option<ResultRecord> {
        if let Ok(content) = std::fs::read_to_string(&self.project.increment_result) {
            match extract_json::<ResultRecord>(&content) {
                Extracted::Parsed { value, strategy } => {
                    debug!(%strategy, "Read increment result file");
                    return Some(value);
                }
                Extracted::Unparseable { reason } => {
                    warn!(path = %self.project.increment_result.display(), %reason, "Increment result file unparseable");
                }
            }
        }
        extract_json::<ResultRecord>(tail(stdout, STDOUT_TAIL_LIMIT)).ok()
    }
}

impl DeliveryIncrement for CommandIncrement {
    fn deliver(&mut self, request: &IncrementRequest) -> Result<IncrementOutcome> {
        for dir in [&self.project.work_dir, &self.project.reports_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        store::remove_if_exists(&self.project.increment_result)?;
        let instructions_file = self.write_instructions(request)?;

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .current_dir(&self.project.work_dir)
            .env("AUTOPILOT_PROJECT", &request.project)
            .env("AUTOPILOT_CYCLE", request.cycle.to_string())
            .env("AUTOPILOT_RESUME_STEP", request.resume.step().as_str())
            .env("AUTOPILOT_MODEL", &request.model)
            .env("AUTOPILOT_COMPACT", if request.compact_payloads { "1" } else { "0" })
            .env("AUTOPILOT_FORCE_RESTART", if request.force_restart { "1" } else { "0" })
            .env("AUTOPILOT_RESULT_FILE", &self.project.increment_result)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(requirement) = request.resume.requirement_id() {
            cmd.env("AUTOPILOT_REQUIREMENT", requirement);
        }
        if let Some(path) = &instructions_file {
            cmd.env("AUTOPILOT_INSTRUCTIONS_FILE", path);
        }

        info!(
            project = %request.project,
            cycle = request.cycle,
            resume = %request.resume.step(),
            model = %request.model,
            command = %self.command,
            "Running delivery increment"
        );
        let started = Instant::now();
        let output = cmd
            .output()
            .with_context(|| format!("Failed to spawn delivery command: {}", self.command))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code();

        let log_file = self
            .project
            .log_dir
            .join(format!("cycle-{}-output.log", request.cycle));
        store::write_atomic(
            &log_file,
            format!("## stdout\n{}\n## stderr\n{}\n", stdout, stderr).as_bytes(),
        )?;

        let mut call = CallOutcome::new(
            &self.provider,
            &request.model,
            output.status.success(),
            &outcome_text(&stderr, &stdout),
        );
        call.exit_code = exit_code;
        store::append_jsonl(&self.project.call_outcomes, &call)?;

        let outcome = match self.read_result(&stdout) {
            Some(record) => record.into_outcome(output.status.success()),
            None if output.status.success() => IncrementOutcome {
                success: true,
                ..IncrementOutcome::default()
            },
            None => IncrementOutcome::failed(format!(
                "delivery command exited with {}",
                exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string())
            )),
        };

        info!(
            project = %request.project,
            cycle = request.cycle,
            success = outcome.success,
            stages = outcome.stage_results.len(),
            elapsed_secs = started.elapsed().as_secs_f64(),
            "Delivery increment finished"
        );
        Ok(outcome)
    }
}
