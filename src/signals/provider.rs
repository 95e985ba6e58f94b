//! Provider issue classification over the call-outcome log.

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

use super::types::{CallOutcome, ProviderIssue};
use crate::store;

static COMMAND_TOO_LONG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(argument list too long|command line is too long|E2BIG|prompt is too long|context length exceeded|maximum context length|too many tokens|input is too long)",
    )
    .unwrap()
});

static QUOTA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(quota|rate[ _-]?limit|usage limit|429|insufficient[_ ]quota|capacity|overloaded|credit balance)",
    )
    .unwrap()
});

static UNUSABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(i can(?:'|’)?t help|i cannot (?:help|assist|complete)|i(?:'|’)?m unable to|i am unable to|as an ai\b|i don(?:'|’)?t have (?:access|the ability)|tool (?:use )?(?:is )?not (?:available|permitted|allowed)|no tools? available|permission denied for tool)",
    )
    .unwrap()
});

static QUOTA_RESET_HINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)quota will reset (?:after|in) [^.\n]+").unwrap());

/// Classify a single record's text. Checked in priority order.
pub fn classify_text(text: &str, success: bool) -> ProviderIssue {
    if COMMAND_TOO_LONG.is_match(text) {
        ProviderIssue::CommandTooLong
    } else if QUOTA.is_match(text) {
        ProviderIssue::Quota
    } else if (!success && text.trim().is_empty()) || UNUSABLE.is_match(text) {
        ProviderIssue::Unusable
    } else {
        ProviderIssue::None
    }
}

/// Looks back over a fixed window of call outcomes.
#[derive(Debug, Clone, Copy)]
pub struct ProviderIssueClassifier {
    window: Duration,
}

impl Default for ProviderIssueClassifier {
    fn default() -> Self {
        Self::new(Duration::minutes(30))
    }
}

impl ProviderIssueClassifier {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn with_window_minutes(minutes: i64) -> Self {
        Self::new(Duration::minutes(minutes.max(1)))
    }

    fn in_window<'a>(
        &self,
        outcomes: &'a [CallOutcome],
        now: DateTime<Utc>,
    ) -> impl Iterator<Item = &'a CallOutcome> + use<'a> {
        let cutoff = now - self.window;
        outcomes
            .iter()
            .filter(move |o| o.timestamp >= cutoff && o.timestamp <= now)
    }

    /// Issue of the most recent matching record in the window.
    pub fn classify(&self, outcomes: &[CallOutcome], now: DateTime<Utc>) -> ProviderIssue {
        let mut recent: Vec<&CallOutcome> = self.in_window(outcomes, now).collect();
        recent.sort_by_key(|o| o.timestamp);
        recent
            .into_iter()
            .rev()
            .map(|o| classify_text(&o.text, o.success))
            .find(|issue| *issue != ProviderIssue::None)
            .unwrap_or_default()
    }

    /// First "quota will reset ..." phrase in the window, for display.
    pub fn quota_reset_hint(&self, outcomes: &[CallOutcome], now: DateTime<Utc>) -> Option<String> {
        let mut recent: Vec<&CallOutcome> = self.in_window(outcomes, now).collect();
        recent.sort_by_key(|o| o.timestamp);
        recent
            .into_iter()
            .find_map(|o| QUOTA_RESET_HINT.find(&o.text))
            .map(|m| m.as_str().trim().to_string())
    }

    pub fn classify_log(&self, log: &Path, now: DateTime<Utc>) -> ProviderIssue {
        self.classify(&store::read_jsonl(log), now)
    }

    pub fn quota_reset_hint_from_log(&self, log: &Path, now: DateTime<Utc>) -> Option<String> {
        self.quota_reset_hint(&store::read_jsonl(log), now)
    }
}
