use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

use super::state::{CampaignPhase, CampaignStateStore};
use crate::audit::{AuditLogger, JournalEvent};
use crate::clock::ProcessProbe;
use crate::lock::{AdvisoryLock, with_lock};
use crate::workspace::WorkspaceLayout;

/// One campaign state rewritten by the sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepCorrection {
    pub project: String,
    pub pid: Option<u32>,
}

/// Clear `running` on every campaign whose owning process is gone.
///
/// States owned by a live process, including this one, are left untouched.
/// Each rewrite happens inside the workspace lock so it cannot clobber a
/// campaign that is claiming the project at the same moment.
pub fn sweep_stale_states(
    layout: &WorkspaceLayout,
    probe: &dyn ProcessProbe,
    lock: &dyn AdvisoryLock,
) -> Result<Vec<SweepCorrection>> {
    let mut corrections = Vec::new();

    for name in layout.project_names() {
        let project = layout.project(&name)?;
        let store = CampaignStateStore::new(project.campaign_state.clone());

        let corrected = with_lock(lock, || {
            let Some(mut state) = store.load() else {
                return Ok(None);
            };
            if !state.running || state.pid.is_some_and(|pid| probe.is_alive(pid)) {
                return Ok(None);
            }

            let pid = state.pid;
            state.running = false;
            state.phase = CampaignPhase::StaleStateSanitized;
            state.last_error = Some(match pid {
                Some(pid) => format!(
                    "Campaign marked running but owning process {} is no longer alive; state sanitized",
                    pid
                ),
                None => "Campaign marked running without an owning process; state sanitized".to_string(),
            });
            state.updated_at = Some(Utc::now());
            store.save(&state)?;
            Ok(Some(pid))
        })?;

        if let Some(pid) = corrected {
            warn!(project = %name, pid = ?pid, "Sanitized stale campaign state");
            if let Err(e) =
                AuditLogger::new(&project).journal(JournalEvent::StaleStateSanitized { pid })
            {
                warn!(project = %name, error = %e, "Failed to journal stale-state sweep");
            }
            corrections.push(SweepCorrection { project: name, pid });
        }
    }

    if !corrections.is_empty() {
        info!(count = corrections.len(), "Stale-state sweep complete");
    }
    Ok(corrections)
}
