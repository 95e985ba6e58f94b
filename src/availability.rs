//! Time-to-live cache of temporarily unusable (provider, model) pairs.
//!
//! Entries expire passively: every lookup compares against the clock at
//! call time and nothing runs in the background. `sweep_expired` only
//! tidies the file. Mutations go through the workspace lock because every
//! campaign in the workspace shares the same cache.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use tracing::info;

use crate::clock::Clock;
use crate::lock::{AdvisoryLock, with_lock};
use crate::store;

static DURATION_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*([a-z]+)").unwrap());

/// Longest window a single mark can impose.
pub const MAX_UNAVAILABLE_MS: i64 = 7 * 24 * 3_600_000;

static QUOTA_WORDING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)quota|rate.?limit|usage limit").unwrap());

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelAvailabilityEntry {
    pub provider: String,
    pub model: String,
    pub unavailable_until: DateTime<Utc>,
    pub reason: String,
    #[serde(default)]
    pub hint: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AvailabilityFile {
    #[serde(default)]
    entries: BTreeMap<String, ModelAvailabilityEntry>,
}

fn key(provider: &str, model: &str) -> String {
    format!("{}/{}", provider, model)
}

/// Sum every quantity+unit token in `hint` ("1 hour 30 minutes" → 5400 s).
///
/// Unknown units are ignored; `None` if nothing usable was found. The total
/// saturates at [`MAX_UNAVAILABLE_MS`].
pub fn parse_wait_duration(hint: &str) -> Option<Duration> {
    let mut total_ms = 0.0_f64;
    let mut matched = false;

    for caps in DURATION_TOKEN.captures_iter(hint) {
        let Ok(quantity) = caps[1].parse::<f64>() else {
            continue;
        };
        let unit_ms = match caps[2].to_ascii_lowercase().as_str() {
            "h" | "hr" | "hrs" | "hour" | "hours" => 3_600_000.0,
            "m" | "min" | "mins" | "minute" | "minutes" => 60_000.0,
            "s" | "sec" | "secs" | "second" | "seconds" => 1_000.0,
            _ => continue,
        };
        total_ms += quantity * unit_ms;
        matched = true;
    }

    (matched && total_ms > 0.0)
        .then(|| Duration::milliseconds(total_ms.round().min(MAX_UNAVAILABLE_MS as f64) as i64))
}

pub struct AvailabilityCache {
    path: PathBuf,
    lock: Arc<dyn AdvisoryLock>,
    clock: Arc<dyn Clock>,
}

impl AvailabilityCache {
    pub fn new(path: PathBuf, lock: Arc<dyn AdvisoryLock>, clock: Arc<dyn Clock>) -> Self {
        Self { path, lock, clock }
    }

    fn read(&self) -> AvailabilityFile {
        store::read_json_or_default(&self.path)
    }

    /// Mark a model unusable for the duration named in `hint`, or for
    /// `fallback_ms` (at least one second) if the hint names none.
    pub fn mark_unavailable(
        &self,
        provider: &str,
        model: &str,
        hint: &str,
        fallback_ms: u64,
    ) -> Result<ModelAvailabilityEntry> {
        let wait = parse_wait_duration(hint).unwrap_or_else(|| {
            let fallback = i64::try_from(fallback_ms.max(1_000)).unwrap_or(i64::MAX);
            Duration::milliseconds(fallback.min(MAX_UNAVAILABLE_MS))
        });
        let now = self.clock.now();
        let entry = ModelAvailabilityEntry {
            provider: provider.to_string(),
            model: model.to_string(),
            unavailable_until: now.checked_add_signed(wait).unwrap_or(DateTime::<Utc>::MAX_UTC),
            reason: if QUOTA_WORDING.is_match(hint) {
                "quota".to_string()
            } else {
                "capacity".to_string()
            },
            hint: hint.trim().to_string(),
            updated_at: now,
        };

        with_lock(self.lock.as_ref(), || {
            let mut file = self.read();
            file.entries.insert(key(provider, model), entry.clone());
            store::write_json_atomic(&self.path, &file)
        })?;

        info!(
            provider,
            model,
            until = %entry.unavailable_until,
            wait_secs = wait.num_seconds(),
            "Model marked unavailable"
        );
        Ok(entry)
    }

    pub fn is_unavailable(&self, provider: &str, model: &str) -> bool {
        let now = self.clock.now();
        self.read()
            .entries
            .get(&key(provider, model))
            .is_some_and(|e| e.unavailable_until > now)
    }

    /// Models of `provider` that are currently unusable, sorted.
    pub fn list_unavailable(&self, provider: &str) -> Vec<String> {
        self.active_entries(provider)
            .into_iter()
            .map(|e| e.model)
            .collect()
    }

    /// Currently unexpired entries, optionally restricted to one provider.
    pub fn active_entries(&self, provider: &str) -> Vec<ModelAvailabilityEntry> {
        let now = self.clock.now();
        self.read()
            .entries
            .into_values()
            .filter(|e| e.provider == provider && e.unavailable_until > now)
            .collect()
    }

    pub fn all_active_entries(&self) -> Vec<ModelAvailabilityEntry> {
        let now = self.clock.now();
        self.read()
            .entries
            .into_values()
            .filter(|e| e.unavailable_until > now)
            .collect()
    }

    /// Shortest positive wait until any of `provider`'s models frees up.
    pub fn next_availability_ms(&self, provider: &str) -> Option<u64> {
        let now = self.clock.now();
        self.active_entries(provider)
            .iter()
            .map(|e| (e.unavailable_until - now).num_milliseconds())
            .filter(|ms| *ms > 0)
            .min()
            .map(|ms| ms as u64)
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn sweep_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let removed = with_lock(self.lock.as_ref(), || {
            let mut file = self.read();
            let before = file.entries.len();
            file.entries.retain(|_, e| e.unavailable_until > now);
            let removed = before - file.entries.len();
            if removed > 0 {
                store::write_json_atomic(&self.path, &file)?;
            }
            Ok(removed)
        })?;
        if removed > 0 {
            info!(removed, "Swept expired availability entries");
        }
        Ok(removed)
    }
}
