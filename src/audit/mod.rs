//! Campaign telemetry: journal events, recovery audit records, debug reports.

mod logger;

pub use logger::AuditLogger;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::recovery::{RecoveryTier, RootCause, categorize_root_causes, recommendations};
use crate::signals::{BlockingSignals, ProviderIssue};
use crate::stage::{Stage, StageState};
use crate::walk::ProjectTree;

/// Documentation paths listed in a debug report.
const MAX_REPORTED_DOCS: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JournalEvent {
    CampaignStarted {
        pid: u32,
        max_cycles: u32,
        target_stage: Stage,
    },
    CycleCompleted {
        cycle: u32,
        success: bool,
        stage_rank: usize,
        tier: RecoveryTier,
    },
    StageMarked {
        stage: Stage,
        state: StageState,
    },
    StageRejected {
        stage: Stage,
        reason: String,
    },
    CheckpointCleared {
        requirement: String,
        reason: String,
    },
    ProviderUnavailable {
        provider: String,
        model: String,
        until: DateTime<Utc>,
    },
    WaitingForProvider {
        cycle: u32,
        wait_ms: u64,
    },
    StaleStateSanitized {
        pid: Option<u32>,
    },
    CampaignFinished {
        outcome: String,
        cycles: u32,
    },
    CampaignCrashed {
        error: String,
    },
}

impl JournalEvent {
    pub fn name(&self) -> &'static str {
        match self {
            JournalEvent::CampaignStarted { .. } => "campaign_started",
            JournalEvent::CycleCompleted { .. } => "cycle_completed",
            JournalEvent::StageMarked { .. } => "stage_marked",
            JournalEvent::StageRejected { .. } => "stage_rejected",
            JournalEvent::CheckpointCleared { .. } => "checkpoint_cleared",
            JournalEvent::ProviderUnavailable { .. } => "provider_unavailable",
            JournalEvent::WaitingForProvider { .. } => "waiting_for_provider",
            JournalEvent::StaleStateSanitized { .. } => "stale_state_sanitized",
            JournalEvent::CampaignFinished { .. } => "campaign_finished",
            JournalEvent::CampaignCrashed { .. } => "campaign_crashed",
        }
    }
}

/// One line of `campaign-journal.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    #[serde(flatten)]
    pub event: JournalEvent,
}

/// One line of `recovery-audit.jsonl`, written every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAuditRecord {
    pub run_id: Uuid,
    pub cycle: u32,
    pub tier: RecoveryTier,
    pub action: String,
    /// `succeeded`, `failed`, `rejected` or `waiting_for_provider`.
    pub outcome: String,
    pub failure_streak: u32,
    pub stalled_cycles: u32,
    pub provider_issue: ProviderIssue,
    pub signals: BlockingSignals,
    pub timestamp: DateTime<Utc>,
}

/// Latest cycle's diagnosis, overwritten each cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugReport {
    pub cycle: u32,
    pub generated_at: DateTime<Utc>,
    pub root_causes: Vec<RootCause>,
    pub recommendations: Vec<String>,
    pub provider_issue: ProviderIssue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota_hint: Option<String>,
    pub signals: BlockingSignals,
    pub test_file_count: usize,
    #[serde(default)]
    pub docs: Vec<PathBuf>,
}

impl DebugReport {
    pub fn build(
        cycle: u32,
        signals: &BlockingSignals,
        provider_issue: ProviderIssue,
        quota_hint: Option<String>,
        tree: &ProjectTree,
    ) -> Self {
        let root_causes = categorize_root_causes(&signals.blockers, provider_issue);
        let docs = tree
            .doc_files()
            .take(MAX_REPORTED_DOCS)
            .map(|record| {
                record
                    .path
                    .strip_prefix(tree.root())
                    .map(|p| p.to_path_buf())
                    .unwrap_or(record.path)
            })
            .collect();

        Self {
            cycle,
            generated_at: Utc::now(),
            recommendations: recommendations(&root_causes),
            root_causes,
            provider_issue,
            quota_hint,
            signals: signals.clone(),
            test_file_count: tree.test_files().count(),
            docs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_journal_entry_is_flat_json() {
        let entry = JournalEntry {
            timestamp: Utc::now(),
            run_id: None,
            event: JournalEvent::StageRejected {
                stage: Stage::Implementation,
                reason: "nope".into(),
            },
        };
        let json: serde_json::Value = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["event"], "stage_rejected");
        assert_eq!(json["stage"], "implementation");
        assert!(json.get("run_id").is_none());

        let back: JournalEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back.event.name(), "stage_rejected");
    }

    #[test]
    fn test_debug_report_counts_tests_and_docs() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("tests")).unwrap();
        std::fs::write(dir.path().join("tests/cart.rs"), "").unwrap();
        std::fs::write(dir.path().join("README.md"), "# shop").unwrap();

        let signals = BlockingSignals::new(vec!["Missing smoke test".into()], 0, vec![]);
        let report = DebugReport::build(
            3,
            &signals,
            ProviderIssue::Quota,
            Some("quota will reset after 2 minutes".into()),
            &ProjectTree::new(dir.path(), 4),
        );

        assert_eq!(report.test_file_count, 1);
        assert_eq!(report.docs, vec![PathBuf::from("README.md")]);
        assert_eq!(
            report.root_causes,
            vec![RootCause::MissingSmokeValidation, RootCause::QuotaExhausted]
        );
        assert_eq!(report.recommendations.len(), 2);
    }
}
