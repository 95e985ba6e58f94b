//! Escalating recovery policy.
//!
//! | Tier  | Trigger (streak / stalled) | Action              | Restart | Compact |
//! |-------|----------------------------|---------------------|---------|---------|
//! | none  | 0 / ≤1                     | `none`              | no      | no      |
//! | tier1 | ≥1 / -                     | `soft_nudge`        | no      | no      |
//! | tier2 | ≥2 / ≥2                    | `gate_focused_fix`  | no      | no      |
//! | tier3 | ≥4 / ≥3                    | `strict_blocker_fix`| no      | no      |
//! | tier4 | ≥5 / ≥4                    | `full_restart`      | yes     | yes     |
//!
//! Root-cause tags are diagnostic only and never influence tier selection.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

use crate::signals::{BlockingSignals, ProviderIssue};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryTier {
    #[default]
    None,
    Tier1,
    Tier2,
    Tier3,
    Tier4,
}

impl RecoveryTier {
    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryTier::None => "none",
            RecoveryTier::Tier1 => "tier1",
            RecoveryTier::Tier2 => "tier2",
            RecoveryTier::Tier3 => "tier3",
            RecoveryTier::Tier4 => "tier4",
        }
    }

    pub fn action(self) -> &'static str {
        match self {
            RecoveryTier::None => "none",
            RecoveryTier::Tier1 => "soft_nudge",
            RecoveryTier::Tier2 => "gate_focused_fix",
            RecoveryTier::Tier3 => "strict_blocker_fix",
            RecoveryTier::Tier4 => "full_restart",
        }
    }
}

impl fmt::Display for RecoveryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn resolve_tier(failure_streak: u32, stalled_cycles: u32) -> RecoveryTier {
    if failure_streak >= 5 || stalled_cycles >= 4 {
        RecoveryTier::Tier4
    } else if failure_streak >= 4 || stalled_cycles >= 3 {
        RecoveryTier::Tier3
    } else if failure_streak >= 2 || stalled_cycles >= 2 {
        RecoveryTier::Tier2
    } else if failure_streak >= 1 {
        RecoveryTier::Tier1
    } else {
        RecoveryTier::None
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPlan {
    pub tier: RecoveryTier,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_instructions: Option<String>,
    pub force_restart_next_cycle: bool,
    pub compact_payloads: bool,
}

impl RecoveryPlan {
    pub fn is_empty(&self) -> bool {
        self.tier == RecoveryTier::None && !self.compact_payloads
    }
}

fn blocker_list(signals: &BlockingSignals) -> String {
    let mut lines: Vec<String> = signals.blockers.iter().map(|b| format!("- {}", b)).collect();
    if signals.lifecycle_failures > 0 {
        lines.push(format!(
            "- {} lifecycle step(s) failed (build/test/lint/smoke)",
            signals.lifecycle_failures
        ));
    }
    for stage in &signals.failed_stages {
        lines.push(format!("- stage {} is failed", stage));
    }
    if lines.is_empty() {
        "- no explicit blockers reported; progress has stalled".to_string()
    } else {
        lines.join("\n")
    }
}

pub fn build_plan(tier: RecoveryTier, signals: &BlockingSignals) -> RecoveryPlan {
    let blockers = blocker_list(signals);
    let instructions = match tier {
        RecoveryTier::None => None,
        RecoveryTier::Tier1 => Some(format!(
            "## Recovery: soft nudge\n\nThe previous increment did not complete cleanly. \
             Address these blockers before continuing:\n\n{}\n",
            blockers
        )),
        RecoveryTier::Tier2 => Some(format!(
            "## Recovery: gate-focused fix\n\nLimit this increment to the smallest change that \
             makes the failing gates pass. Do not start new features.\n\n{}\n",
            blockers
        )),
        RecoveryTier::Tier3 => Some(format!(
            "## Recovery: strict blocker fix\n\nFix the blockers below strictly in order, one at a \
             time, re-running validation after each. Nothing else is in scope.\n\n{}\n",
            blockers
        )),
        RecoveryTier::Tier4 => Some(format!(
            "## Recovery: full restart\n\nRepeated attempts have not progressed. Restart the \
             current requirement from the first step with a minimal, compact approach.\n\n{}\n",
            blockers
        )),
    };

    RecoveryPlan {
        tier,
        action: tier.action().to_string(),
        additional_instructions: instructions,
        force_restart_next_cycle: tier == RecoveryTier::Tier4,
        compact_payloads: tier == RecoveryTier::Tier4,
    }
}

/// Diagnostic root-cause tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootCause {
    InvalidDependencyVersion,
    MissingRuntimeTools,
    MissingSmokeValidation,
    NonContractualResponse,
    QuotaExhausted,
    PromptOverflow,
}

impl RootCause {
    pub fn as_str(self) -> &'static str {
        match self {
            RootCause::InvalidDependencyVersion => "invalid_dependency_version",
            RootCause::MissingRuntimeTools => "missing_runtime_tools",
            RootCause::MissingSmokeValidation => "missing_smoke_validation",
            RootCause::NonContractualResponse => "non_contractual_response",
            RootCause::QuotaExhausted => "quota_exhausted",
            RootCause::PromptOverflow => "prompt_overflow",
        }
    }

    pub fn recommendation(self) -> &'static str {
        match self {
            RootCause::InvalidDependencyVersion => {
                "Pin dependencies to versions that exist in the registry and reinstall."
            }
            RootCause::MissingRuntimeTools => {
                "Install the missing toolchain binaries before the next build step."
            }
            RootCause::MissingSmokeValidation => {
                "Add a smoke test that starts the application and checks one endpoint."
            }
            RootCause::NonContractualResponse => {
                "Re-issue the request with the expected output contract restated explicitly."
            }
            RootCause::QuotaExhausted => {
                "Wait for the provider quota to reset or switch to another available model."
            }
            RootCause::PromptOverflow => {
                "Use compact payloads and trim context passed to the generation call."
            }
        }
    }
}

impl fmt::Display for RootCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static INVALID_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(no matching version|ETARGET|version .* not found|could not find a version|invalid version|no matching package|failed to select a version)").unwrap()
});

static INSTALL_FAILED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(install(?:ation)? failed|failed to install|npm ERR!|pip.*error|could not install)").unwrap()
});

static COMMAND_NOT_FOUND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(command not found|not recognized as an internal|no such file or directory.*bin|ENOENT.*spawn|executable not found)").unwrap()
});

static MISSING_SMOKE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)((missing|no) smoke|smoke (test|check|validation)s? (missing|not found|absent))").unwrap()
});

/// Independent pattern checks; any number of causes may apply.
pub fn categorize_root_causes(blockers: &[String], provider_issue: ProviderIssue) -> Vec<RootCause> {
    let any = |re: &Regex| blockers.iter().any(|b| re.is_match(b));
    let mut causes = Vec::new();

    if any(&INVALID_VERSION) {
        causes.push(RootCause::InvalidDependencyVersion);
    }
    if any(&INSTALL_FAILED) && any(&COMMAND_NOT_FOUND) {
        causes.push(RootCause::MissingRuntimeTools);
    }
    if any(&MISSING_SMOKE) {
        causes.push(RootCause::MissingSmokeValidation);
    }
    match provider_issue {
        ProviderIssue::Unusable => causes.push(RootCause::NonContractualResponse),
        ProviderIssue::Quota => causes.push(RootCause::QuotaExhausted),
        ProviderIssue::CommandTooLong => causes.push(RootCause::PromptOverflow),
        ProviderIssue::None => {}
    }
    causes
}

pub fn recommendations(causes: &[RootCause]) -> Vec<String> {
    causes.iter().map(|c| c.recommendation().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::Stage;

    #[test]
    fn test_tier_examples() {
        assert_eq!(resolve_tier(0, 0), RecoveryTier::None);
        assert_eq!(resolve_tier(1, 0), RecoveryTier::Tier1);
        assert_eq!(resolve_tier(0, 1), RecoveryTier::None);
        assert_eq!(resolve_tier(0, 2), RecoveryTier::Tier2);
        assert_eq!(resolve_tier(4, 0), RecoveryTier::Tier3);
        assert_eq!(resolve_tier(0, 3), RecoveryTier::Tier3);
        assert_eq!(resolve_tier(5, 0), RecoveryTier::Tier4);
        assert_eq!(resolve_tier(0, 4), RecoveryTier::Tier4);
    }

    #[test]
    fn test_tier_is_monotonic_in_both_counters() {
        for streak in 0..10 {
            for stalled in 0..10 {
                let tier = resolve_tier(streak, stalled);
                assert!(resolve_tier(streak + 1, stalled) >= tier);
                assert!(resolve_tier(streak, stalled + 1) >= tier);
            }
        }
    }

    #[test]
    fn test_plan_flags_by_tier() {
        let signals = BlockingSignals::new(vec!["tests fail".into()], 1, vec![Stage::Implementation]);

        let none = build_plan(RecoveryTier::None, &signals);
        assert!(none.is_empty());
        assert!(none.additional_instructions.is_none());

        let soft = build_plan(RecoveryTier::Tier1, &signals);
        let text = soft.additional_instructions.unwrap();
        assert!(text.contains("- tests fail"));
        assert!(text.contains("stage implementation is failed"));
        assert!(!soft.force_restart_next_cycle);

        let restart = build_plan(RecoveryTier::Tier4, &signals);
        assert!(restart.force_restart_next_cycle);
        assert!(restart.compact_payloads);
        assert_eq!(restart.action, "full_restart");
    }

    #[test]
    fn test_root_causes_are_independent() {
        let blockers = vec![
            "npm ERR! notarget No matching version found for react@99".to_string(),
            "sh: vite: command not found".to_string(),
            "Missing smoke test for /health".to_string(),
        ];
        let causes = categorize_root_causes(&blockers, ProviderIssue::Quota);
        assert_eq!(
            causes,
            vec![
                RootCause::InvalidDependencyVersion,
                RootCause::MissingRuntimeTools,
                RootCause::MissingSmokeValidation,
                RootCause::QuotaExhausted,
            ]
        );
        assert_eq!(recommendations(&causes).len(), 4);
    }

    #[test]
    fn test_command_not_found_alone_is_not_missing_tools() {
        let blockers = vec!["vite: command not found".to_string()];
        assert!(categorize_root_causes(&blockers, ProviderIssue::None).is_empty());
        assert_eq!(
            categorize_root_causes(&[], ProviderIssue::CommandTooLong),
            vec![RootCause::PromptOverflow]
        );
    }
}
