//! Blocking-signal collection from run-status and lifecycle reports.
//!
//! Both reports are written by external collaborators and may be missing,
//! partially written, or wrapped in log noise. They are read through the
//! lenient extractor; anything unreadable counts as "no signal".

use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

use super::types::{BlockingSignals, LifecycleStep};
use crate::extract::extract_json;
use crate::stage::StageLedger;

/// Transient provider trouble; retried by the next cycle, not a blocker.
static TRANSIENT_NOISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(quota|rate[ _-]?limit|429|capacity|overloaded|timed? ?out|timeout|temporarily unavailable|service unavailable|try again|ECONNRESET|socket hang up)",
    )
    .unwrap()
});

/// Known harmless log lines that collaborators sometimes report as blockers.
static BENIGN_LOG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(^npm (warn|notice)|deprecated|ExperimentalWarning|^warning: unused|^\s*$|^debugger attached|punycode)",
    )
    .unwrap()
});

pub fn is_noise(blocker: &str) -> bool {
    TRANSIENT_NOISE.is_match(blocker) || BENIGN_LOG.is_match(blocker.trim())
}

/// Drop noise, collapse whitespace, and dedupe (case-insensitively) in order.
pub fn filter_blockers<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    raw.into_iter()
        .map(|b| b.as_ref().split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|b| !b.is_empty() && !is_noise(b))
        .filter(|b| seen.insert(b.to_lowercase()))
        .collect()
}

/// Blocker strings from the run-status record.
///
/// Accepts `{"blockers": [...]}` or a bare array; entries may be strings or
/// objects with a `message`/`description`/`title` field.
pub fn read_run_status_blockers(path: &Path) -> Vec<String> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let Some(value) = extract_json::<Value>(&content).ok() else {
        debug!(path = %path.display(), "Run-status record unparseable");
        return Vec::new();
    };

    let items: &[Value] = match &value {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("blockers") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => &[],
        },
        _ => &[],
    };

    items.iter().filter_map(blocker_text).collect()
}

fn blocker_text(item: &Value) -> Option<String> {
    match item {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => ["message", "description", "title", "text"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str))
            .map(str::to_string),
        _ => None,
    }
}

/// Steps of the lifecycle report (`{"steps": [...]}` or a bare array).
pub fn read_lifecycle_steps(path: &Path) -> Vec<LifecycleStep> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let Some(value) = extract_json::<Value>(&content).ok() else {
        debug!(path = %path.display(), "Lifecycle report unparseable");
        return Vec::new();
    };

    let steps = match value {
        Value::Object(mut map) => map.remove("steps").unwrap_or(Value::Null),
        other => other,
    };
    match steps {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    }
}

/// Build the blocking view from both reports and the stage ledger.
pub fn collect(run_status: &Path, lifecycle_report: &Path, ledger: &StageLedger) -> BlockingSignals {
    let blockers = filter_blockers(read_run_status_blockers(run_status));
    let lifecycle_failures = read_lifecycle_steps(lifecycle_report)
        .iter()
        .filter(|step| step.is_failed())
        .count();
    BlockingSignals::new(blockers, lifecycle_failures, ledger.failed_stages())
}
