use anyhow::Result;
use chrono::Utc;
use std::path::PathBuf;
use tracing::debug;
use uuid::Uuid;

use super::{DebugReport, JournalEntry, JournalEvent, RecoveryAuditRecord};
use crate::store;
use crate::workspace::ProjectLayout;

/// Writes a project's journal, recovery audit, and debug report.
pub struct AuditLogger {
    journal: PathBuf,
    recovery_audit: PathBuf,
    debug_report: PathBuf,
    run_id: Option<Uuid>,
}

impl AuditLogger {
    pub fn new(project: &ProjectLayout) -> Self {
        Self {
            journal: project.journal.clone(),
            recovery_audit: project.recovery_audit.clone(),
            debug_report: project.debug_report.clone(),
            run_id: None,
        }
    }

    /// Tag every subsequent journal entry with `run_id`.
    pub fn for_run(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn journal(&self, event: JournalEvent) -> Result<()> {
        debug!(event = event.name(), "Journal event");
        store::append_jsonl(
            &self.journal,
            &JournalEntry {
                timestamp: Utc::now(),
                run_id: self.run_id,
                event,
            },
        )
    }

    pub fn record_recovery(&self, record: &RecoveryAuditRecord) -> Result<()> {
        store::append_jsonl(&self.recovery_audit, record)
    }

    pub fn write_debug_report(&self, report: &DebugReport) -> Result<()> {
        store::write_json_atomic(&self.debug_report, report)
    }

    pub fn read_journal(&self) -> Vec<JournalEntry> {
        store::read_jsonl(&self.journal)
    }

    pub fn read_recovery_audit(&self) -> Vec<RecoveryAuditRecord> {
        store::read_jsonl(&self.recovery_audit)
    }

    pub fn load_debug_report(&self) -> Option<DebugReport> {
        store::read_json(&self.debug_report)
    }
}
