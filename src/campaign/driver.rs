use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::policy::ResolvedPolicy;
use super::state::{CampaignPhase, CampaignState, CampaignStateStore};
use super::sweep::sweep_stale_states;
use super::{CampaignOutcome, CampaignReport, StopReason};
use crate::audit::{AuditLogger, DebugReport, JournalEvent, RecoveryAuditRecord};
use crate::availability::AvailabilityCache;
use crate::checkpoint::{CheckpointStore, DeliveryStep, RequirementBoard, RequirementLocator, ResumePoint};
use crate::clock::{Clock, OsProcessProbe, ProcessProbe, SystemClock};
use crate::config::Config;
use crate::delivery::{DeliveryIncrement, IncrementOutcome, IncrementRequest};
use crate::errors::{CampaignError, LockError};
use crate::lock::{AdvisoryLock, with_lock};
use crate::project_index::ProjectIndex;
use crate::recovery::{RecoveryPlan, build_plan, resolve_tier};
use crate::settings::ProviderSection;
use crate::signals::{self, BlockingSignals, ProviderIssue, ProviderIssueClassifier};
use crate::stage::{LedgerStore, StageLedger, StageState, can_enter};
use crate::walk::{DEFAULT_MAX_DEPTH, ProjectTree};
use crate::workspace::{ProjectLayout, WorkspaceLayout};

/// Drives one project through repeated delivery cycles until it reaches the
/// target stage or a limit runs out.
///
/// The loop is sequential and blocking. Every cycle persists the campaign
/// state, a recovery audit record, and a debug report, so a killed process
/// can resume from its last checkpoint on the next invocation.
pub struct CampaignDriver<D: DeliveryIncrement> {
    workspace: WorkspaceLayout,
    project: ProjectLayout,
    provider: ProviderSection,
    policy: ResolvedPolicy,
    delivery: D,
    clock: Arc<dyn Clock>,
    probe: Arc<dyn ProcessProbe>,
    lock: Arc<dyn AdvisoryLock>,
    locator: Box<dyn RequirementLocator>,
    pid: u32,
}

/// What one delivery cycle produced.
struct CycleResult {
    success: bool,
    rejected: bool,
    error: Option<String>,
    ledger: StageLedger,
}

impl<D: DeliveryIncrement> CampaignDriver<D> {
    pub fn new(config: &Config, project: ProjectLayout, policy: ResolvedPolicy, delivery: D) -> Self {
        let locator = Box::new(RequirementBoard::new(project.in_progress_dir()));
        Self {
            workspace: config.layout.clone(),
            provider: config.settings.provider.clone().with_usable_models(),
            policy,
            delivery,
            clock: Arc::new(SystemClock),
            probe: Arc::new(OsProcessProbe),
            lock: config.workspace_lock(),
            locator,
            project,
            pid: std::process::id(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn ProcessProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_locator(mut self, locator: Box<dyn RequirementLocator>) -> Self {
        self.locator = locator;
        self
    }

    pub fn delivery(&self) -> &D {
        &self.delivery
    }

    fn state_store(&self) -> CampaignStateStore {
        CampaignStateStore::new(self.project.campaign_state.clone())
    }

    fn ledger_store(&self) -> LedgerStore {
        LedgerStore::new(self.project.stage_ledger.clone())
    }

    fn checkpoints(&self) -> CheckpointStore {
        CheckpointStore::new(self.project.checkpoint.clone())
    }

    fn availability(&self) -> AvailabilityCache {
        AvailabilityCache::new(
            self.workspace.availability_file.clone(),
            Arc::clone(&self.lock),
            Arc::clone(&self.clock),
        )
    }

    /// Run the campaign to completion.
    pub fn run(&mut self) -> Result<CampaignReport, CampaignError> {
        self.project.ensure_directories()?;
        sweep_stale_states(&self.workspace, self.probe.as_ref(), self.lock.as_ref())
            .map_err(into_campaign_error)?;

        let run_id = Uuid::new_v4();
        let mut state = self.claim(run_id)?;
        if let Err(e) = ProjectIndex::new(self.workspace.project_index.clone(), Arc::clone(&self.lock))
            .touch(&self.project.name)
        {
            warn!(project = %self.project.name, error = %e, "Failed to update project index");
        }

        let audit = AuditLogger::new(&self.project).for_run(run_id);
        audit.journal(JournalEvent::CampaignStarted {
            pid: self.pid,
            max_cycles: self.policy.max_cycles,
            target_stage: self.policy.target_stage,
        })?;
        info!(
            project = %self.project.name,
            run_id = %run_id,
            target = %self.policy.target_stage,
            max_cycles = self.policy.max_cycles,
            "Campaign started"
        );

        match self.run_cycles(&mut state, &audit, run_id) {
            Ok(outcome) => self.finish(&mut state, &audit, outcome),
            Err(e) => {
                self.record_crash(&mut state, &audit, &e);
                Err(CampaignError::Other(e))
            }
        }
    }

    /// Take ownership of the project's campaign state inside the workspace lock.
    fn claim(&self, run_id: Uuid) -> Result<CampaignState, CampaignError> {
        let store = self.state_store();
        let now = self.clock.now();
        let claimed = with_lock(self.lock.as_ref(), || {
            if let Some(existing) = store.load()
                && existing.running
                && let Some(owner) = existing.pid
                && owner != self.pid
                && self.probe.is_alive(owner)
            {
                return Ok(Err(owner));
            }

            let ledger = self.ledger_store().load();
            let state = CampaignState {
                project: self.project.name.clone(),
                run_id: Some(run_id),
                target_stage: Some(self.policy.target_stage),
                stage_passed: ledger.pass_flags(),
                stage_rank: ledger.rank(),
                running: true,
                pid: Some(self.pid),
                phase: CampaignPhase::Starting,
                started_at: Some(now),
                updated_at: Some(now),
                ..CampaignState::default()
            };
            store.save(&state)?;
            Ok(Ok(state))
        })
        .map_err(into_campaign_error)?;

        claimed.map_err(|pid| CampaignError::AlreadyRunning {
            project: self.project.name.clone(),
            pid,
        })
    }

    fn run_cycles(
        &mut self,
        state: &mut CampaignState,
        audit: &AuditLogger,
        run_id: Uuid,
    ) -> Result<CampaignOutcome> {
        let started_at = state.started_at.unwrap_or_else(|| self.clock.now());
        let ledger = self.ledger_store().load();
        if self.target_reached(&ledger) {
            info!(project = %self.project.name, "Target stage already passed");
            return Ok(CampaignOutcome::Succeeded);
        }

        let classifier = ProviderIssueClassifier::with_window_minutes(self.provider.issue_window_minutes);
        let availability = self.availability();
        let mut previous_rank = ledger.rank();
        let mut plan = RecoveryPlan::default();
        let mut last_issue = ProviderIssue::None;

        loop {
            state.cycle += 1;
            let cycle = state.cycle;

            if let Err(e) = availability.sweep_expired() {
                warn!(error = %e, "Availability sweep failed");
            }

            let Some(model) = self.select_model(&availability) else {
                let wait_ms = availability
                    .next_availability_ms(&self.provider.name)
                    .unwrap_or(self.provider.fallback_unavailable_ms);
                info!(project = %self.project.name, cycle, wait_ms, "No model available, waiting for provider");
                audit.journal(JournalEvent::WaitingForProvider { cycle, wait_ms })?;

                state.phase = CampaignPhase::WaitingForProvider;
                state.elapsed_minutes = self.elapsed_minutes(started_at);
                self.save_state(state)?;
                audit.record_recovery(&RecoveryAuditRecord {
                    run_id,
                    cycle,
                    tier: state.recovery_tier,
                    action: plan.action.clone(),
                    outcome: "waiting_for_provider".to_string(),
                    failure_streak: state.failure_streak,
                    stalled_cycles: state.stalled_cycles,
                    provider_issue: last_issue,
                    signals: BlockingSignals::default(),
                    timestamp: self.clock.now(),
                })?;

                if let Some(reason) = self.stop_reason(cycle, started_at) {
                    return Ok(CampaignOutcome::Stopped(reason));
                }
                let wait = self
                    .policy
                    .sleep
                    .max(std::time::Duration::from_millis(wait_ms));
                self.sleep(wait, started_at);
                continue;
            };
            state.model = Some(model.clone());

            if plan.force_restart_next_cycle
                && let Some(checkpoint) = self.checkpoints().load()
            {
                self.checkpoints().clear()?;
                audit.journal(JournalEvent::CheckpointCleared {
                    requirement: checkpoint.requirement_id,
                    reason: "full restart requested by recovery tier4".to_string(),
                })?;
            }

            state.phase = CampaignPhase::Resuming;
            self.save_state(state)?;
            let resume = self.checkpoints().choose_resume_step(self.locator.as_ref())?;
            if let ResumePoint::Restart { stale_requirement } = &resume {
                audit.journal(JournalEvent::CheckpointCleared {
                    requirement: stale_requirement.clone(),
                    reason: "requirement no longer in progress".to_string(),
                })?;
            }

            state.phase = CampaignPhase::Delivering;
            self.save_state(state)?;
            let request = IncrementRequest {
                project: self.project.name.clone(),
                cycle,
                resume: resume.clone(),
                instructions: plan.additional_instructions.clone(),
                compact_payloads: plan.compact_payloads,
                force_restart: plan.force_restart_next_cycle,
                model: model.clone(),
            };
            let outcome = match self.delivery.deliver(&request) {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(project = %self.project.name, cycle, error = %format!("{:#}", e), "Delivery increment errored");
                    IncrementOutcome::failed(format!("{:#}", e))
                }
            };

            state.phase = CampaignPhase::Evaluating;
            self.save_state(state)?;
            let result = self.apply_outcome(&outcome, &resume, audit)?;

            let signals = signals::collect(
                &self.project.run_status,
                &self.project.lifecycle_report,
                &result.ledger,
            );
            let rank = result.ledger.rank();
            if rank > previous_rank {
                state.stalled_cycles = 0;
            } else {
                state.stalled_cycles += 1;
            }
            previous_rank = rank;

            let cycle_ok = result.success && !result.rejected;
            state.failure_streak = if cycle_ok { 0 } else { state.failure_streak + 1 };

            let now = self.clock.now();
            let provider_issue = classifier.classify_log(&self.project.call_outcomes, now);
            let quota_hint = classifier.quota_reset_hint_from_log(&self.project.call_outcomes, now);
            last_issue = provider_issue;
            if provider_issue == ProviderIssue::Quota && !result.success {
                let entry = availability.mark_unavailable(
                    &self.provider.name,
                    &model,
                    quota_hint.as_deref().unwrap_or_default(),
                    self.provider.fallback_unavailable_ms,
                )?;
                audit.journal(JournalEvent::ProviderUnavailable {
                    provider: entry.provider,
                    model: entry.model,
                    until: entry.unavailable_until,
                })?;
            }

            let tier = resolve_tier(
                state.failure_streak,
                self.policy.effective_stall(state.stalled_cycles),
            );
            plan = build_plan(tier, &signals);
            if provider_issue == ProviderIssue::CommandTooLong {
                plan.compact_payloads = true;
            }

            state.stage_passed = result.ledger.pass_flags();
            state.stage_rank = rank;
            state.recovery_tier = tier;
            state.last_error = result.error.clone();
            state.last_recovery_action = Some(plan.action.clone());
            state.elapsed_minutes = self.elapsed_minutes(started_at);
            self.save_state(state)?;

            audit.record_recovery(&RecoveryAuditRecord {
                run_id,
                cycle,
                tier,
                action: plan.action.clone(),
                outcome: if result.rejected {
                    "rejected".to_string()
                } else if result.success {
                    "succeeded".to_string()
                } else {
                    "failed".to_string()
                },
                failure_streak: state.failure_streak,
                stalled_cycles: state.stalled_cycles,
                provider_issue,
                signals: signals.clone(),
                timestamp: now,
            })?;
            audit.write_debug_report(&DebugReport::build(
                cycle,
                &signals,
                provider_issue,
                quota_hint,
                &ProjectTree::new(&self.project.work_dir, DEFAULT_MAX_DEPTH),
            ))?;
            audit.journal(JournalEvent::CycleCompleted {
                cycle,
                success: cycle_ok,
                stage_rank: rank,
                tier,
            })?;
            info!(
                project = %self.project.name,
                cycle,
                success = cycle_ok,
                rank,
                stalled = state.stalled_cycles,
                streak = state.failure_streak,
                tier = %tier,
                blocking = signals.is_blocking,
                "Cycle complete"
            );

            if self.target_reached(&result.ledger) {
                return Ok(CampaignOutcome::Succeeded);
            }
            if let Some(reason) = self.stop_reason(cycle, started_at) {
                return Ok(CampaignOutcome::Stopped(reason));
            }

            state.phase = CampaignPhase::Sleeping;
            self.save_state(state)?;
            self.sleep(self.policy.sleep, started_at);
        }
    }

    /// Apply stage results through the gate and advance the checkpoint.
    fn apply_outcome(
        &self,
        outcome: &IncrementOutcome,
        resume: &ResumePoint,
        audit: &AuditLogger,
    ) -> Result<CycleResult> {
        let ledger_store = self.ledger_store();
        let mut ledger = ledger_store.load();
        let mut error = outcome.error.clone();
        let mut rejected = false;

        for report in &outcome.stage_results {
            if report.state == StageState::Passed
                && let Err(gate) = can_enter(&ledger, report.stage)
            {
                warn!(project = %self.project.name, stage = %report.stage, reason = %gate, "Stage result rejected");
                audit.journal(JournalEvent::StageRejected {
                    stage: report.stage,
                    reason: gate.to_string(),
                })?;
                error = Some(gate.to_string());
                rejected = true;
                continue;
            }
            if ledger.state(report.stage) == report.state {
                continue;
            }
            ledger.record(report.stage, report.state, report.details.clone());
            audit.journal(JournalEvent::StageMarked {
                stage: report.stage,
                state: report.state,
            })?;
        }
        ledger_store.save(&ledger)?;

        if let Some(step) = outcome.completed_step {
            let requirement = outcome
                .requirement
                .as_ref()
                .map(|r| r.id.clone())
                .or_else(|| resume.requirement_id().map(str::to_string));
            match requirement {
                Some(_) if step == DeliveryStep::Finish && outcome.success => {
                    self.checkpoints().clear()?;
                }
                Some(id) => {
                    let checkpoints = self.checkpoints();
                    let mut checkpoint = checkpoints.advance(&id, step)?;
                    if let Some(r) = &outcome.requirement {
                        checkpoint.seed = r.seed.clone();
                        checkpoint.flow = r.flow.clone();
                        checkpoint.domain = r.domain.clone();
                        checkpoints.save(&checkpoint)?;
                    }
                }
                None => warn!(project = %self.project.name, step = %step, "Completed step reported without a requirement"),
            }
        }

        Ok(CycleResult {
            success: outcome.success,
            rejected,
            error,
            ledger,
        })
    }

    fn select_model(&self, availability: &AvailabilityCache) -> Option<String> {
        self.provider
            .models
            .iter()
            .find(|model| !availability.is_unavailable(&self.provider.name, model))
            .cloned()
    }

    fn target_reached(&self, ledger: &StageLedger) -> bool {
        ledger.is_passed(self.policy.target_stage) && can_enter(ledger, self.policy.target_stage).is_ok()
    }

    fn stop_reason(&self, cycle: u32, started_at: DateTime<Utc>) -> Option<StopReason> {
        if cycle >= self.policy.max_cycles {
            return Some(StopReason::MaxCycles);
        }
        match self.policy.runtime_budget {
            Some(budget) if self.clock.now() - started_at >= budget => Some(StopReason::RuntimeBudget),
            _ => None,
        }
    }

    /// Sleep, but never past the runtime budget.
    fn sleep(&self, duration: std::time::Duration, started_at: DateTime<Utc>) {
        let duration = match self.policy.runtime_budget {
            Some(budget) => {
                let remaining = (budget - (self.clock.now() - started_at))
                    .to_std()
                    .unwrap_or_default();
                duration.min(remaining)
            }
            None => duration,
        };
        if !duration.is_zero() {
            self.clock.sleep(duration);
        }
    }

    fn elapsed_minutes(&self, started_at: DateTime<Utc>) -> f64 {
        (self.clock.now() - started_at).num_milliseconds() as f64 / 60_000.0
    }

    fn save_state(&self, state: &mut CampaignState) -> Result<()> {
        state.updated_at = Some(self.clock.now());
        self.state_store()
            .save(state)
            .context("Failed to persist campaign state")
    }

    fn finish(
        &self,
        state: &mut CampaignState,
        audit: &AuditLogger,
        outcome: CampaignOutcome,
    ) -> Result<CampaignReport, CampaignError> {
        state.running = false;
        state.phase = match outcome {
            CampaignOutcome::Succeeded => CampaignPhase::Succeeded,
            CampaignOutcome::Stopped(_) => CampaignPhase::Stopped,
            CampaignOutcome::Crashed => CampaignPhase::Crashed,
        };
        state.outcome = Some(outcome.label());
        state.elapsed_minutes = state
            .started_at
            .map(|started| self.elapsed_minutes(started))
            .unwrap_or_default();
        self.save_state(state)?;
        audit.journal(JournalEvent::CampaignFinished {
            outcome: outcome.label(),
            cycles: state.cycle,
        })?;
        info!(
            project = %self.project.name,
            outcome = %outcome.label(),
            cycles = state.cycle,
            rank = state.stage_rank,
            "Campaign finished"
        );

        Ok(CampaignReport {
            outcome,
            cycles: state.cycle,
            stage_rank: state.stage_rank,
            stalled_cycles: state.stalled_cycles,
            failure_streak: state.failure_streak,
            tier: state.recovery_tier,
        })
    }

    /// Best-effort: the original error is what the caller sees.
    fn record_crash(&self, state: &mut CampaignState, audit: &AuditLogger, error: &anyhow::Error) {
        warn!(project = %self.project.name, error = %format!("{:#}", error), "Campaign crashed");
        state.running = false;
        state.phase = CampaignPhase::Crashed;
        state.outcome = Some(CampaignOutcome::Crashed.label());
        state.last_error = Some(format!("{:#}", error));
        if let Err(e) = self.save_state(state) {
            warn!(error = %e, "Failed to persist crashed campaign state");
        }
        if let Err(e) = audit.journal(JournalEvent::CampaignCrashed {
            error: format!("{:#}", error),
        }) {
            warn!(error = %e, "Failed to journal campaign crash");
        }
    }
}

fn into_campaign_error(e: anyhow::Error) -> CampaignError {
    match e.downcast::<LockError>() {
        Ok(lock) => CampaignError::Lock(lock),
        Err(other) => CampaignError::Other(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::policy::CampaignPolicy;
    use crate::clock::{ManualClock, StaticProcessProbe};
    use crate::delivery::{RequirementRef, StageReport};
    use crate::settings::Settings;
    use crate::signals::CallOutcome;
    use crate::stage::Stage;
    use crate::store;
    use std::collections::{HashSet, VecDeque};
    use tempfile::TempDir;

    type Script = Box<dyn FnMut(&IncrementRequest, &ProjectLayout, &ManualClock) -> Result<IncrementOutcome>>;

    /// Replays scripted cycles and records every request.
    struct ScriptedIncrement {
        steps: VecDeque<Script>,
        fallback: IncrementOutcome,
        requests: Vec<IncrementRequest>,
        project: ProjectLayout,
        clock: Arc<ManualClock>,
    }

    impl DeliveryIncrement for ScriptedIncrement {
        fn deliver(&mut self, request: &IncrementRequest) -> Result<IncrementOutcome> {
            self.requests.push(request.clone());
            match self.steps.pop_front() {
                Some(mut step) => step(request, &self.project, &self.clock),
                None => Ok(self.fallback.clone()),
            }
        }
    }

    struct Board(HashSet<String>);

    impl RequirementLocator for Board {
        fn is_in_progress(&self, id: &str) -> bool {
            self.0.contains(id)
        }
    }

    struct Harness {
        _dir: TempDir,
        config: Config,
        project: ProjectLayout,
        clock: Arc<ManualClock>,
    }

    fn harness(models: &[&str]) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.provider.models = models.iter().map(|m| m.to_string()).collect();
        settings.lock.retry_interval_ms = 1;
        let config = Config::from_parts(dir.path().to_path_buf(), settings);
        config.layout.ensure_directories().unwrap();
        let project = config.project("shop").unwrap();
        Harness {
            _dir: dir,
            config,
            project,
            clock: Arc::new(ManualClock::default()),
        }
    }

    fn policy(max_cycles: i64, target: &str) -> ResolvedPolicy {
        CampaignPolicy {
            min_runtime_minutes: 0,
            max_cycles,
            sleep_seconds: 0,
            target_stage: Some(target.into()),
            stall_cycles: 1,
        }
        .clamped()
    }

    fn passes(stage: Stage) -> IncrementOutcome {
        IncrementOutcome {
            success: true,
            stage_results: vec![StageReport {
                stage,
                state: StageState::Passed,
                details: None,
            }],
            ..IncrementOutcome::default()
        }
    }

    fn driver(
        h: &Harness,
        policy: ResolvedPolicy,
        steps: Vec<Script>,
        fallback: IncrementOutcome,
        in_progress: &[&str],
    ) -> CampaignDriver<ScriptedIncrement> {
        let increment = ScriptedIncrement {
            steps: steps.into(),
            fallback,
            requests: Vec::new(),
            project: h.project.clone(),
            clock: Arc::clone(&h.clock),
        };
        CampaignDriver::new(&h.config, h.project.clone(), policy, increment)
            .with_clock(h.clock.clone())
            .with_probe(Arc::new(StaticProcessProbe::with_alive([std::process::id()])))
            .with_locator(Box::new(Board(in_progress.iter().map(|s| s.to_string()).collect())))
    }

    fn journal_names(project: &ProjectLayout) -> Vec<&'static str> {
        AuditLogger::new(project)
            .read_journal()
            .iter()
            .map(|e| e.event.name())
            .collect()
    }

    #[test]
    fn test_reaching_target_succeeds_after_first_cycle() {
        let h = harness(&["default"]);
        let mut driver = driver(&h, policy(3, "discovery"), vec![], passes(Stage::Discovery), &[]);

        let report = driver.run().unwrap();
        assert_eq!(report.outcome, CampaignOutcome::Succeeded);
        assert_eq!(report.cycles, 1);
        assert_eq!(report.stage_rank, 1);
        assert_eq!(report.stalled_cycles, 0);

        let state = CampaignStateStore::new(h.project.campaign_state.clone()).load().unwrap();
        assert!(!state.running);
        assert_eq!(state.phase, CampaignPhase::Succeeded);
        assert_eq!(state.stage_passed.get(&Stage::Discovery), Some(&true));

        let names = journal_names(&h.project);
        assert_eq!(names.first(), Some(&"campaign_started"));
        assert!(names.contains(&"stage_marked"));
        assert_eq!(names.last(), Some(&"campaign_finished"));
        assert!(h.project.debug_report.exists());
    }

    #[test]
    fn test_no_progress_stops_at_max_cycles_and_escalates() {
        let h = harness(&["default"]);
        let mut driver = driver(
            &h,
            policy(3, "discovery"),
            vec![],
            IncrementOutcome::failed("build failed"),
            &[],
        );

        let report = driver.run().unwrap();
        assert_eq!(report.outcome, CampaignOutcome::Stopped(StopReason::MaxCycles));
        assert_eq!(report.cycles, 3);
        assert_eq!(report.failure_streak, 3);
        assert_eq!(report.stalled_cycles, 3);
        assert_eq!(report.tier, crate::recovery::RecoveryTier::Tier3);

        let requests = &driver.delivery().requests;
        assert!(requests[0].instructions.is_none());
        assert!(requests[1].instructions.as_deref().unwrap().contains("soft nudge"));

        let audit = AuditLogger::new(&h.project).read_recovery_audit();
        assert_eq!(audit.len(), 3);
        assert_eq!(audit[2].action, "strict_blocker_fix");
    }

    #[test]
    fn test_out_of_order_pass_is_rejected_by_gate() {
        let h = harness(&["default"]);
        let mut driver = driver(&h, policy(1, "discovery"), vec![], passes(Stage::Implementation), &[]);

        let report = driver.run().unwrap();
        assert_eq!(report.outcome, CampaignOutcome::Stopped(StopReason::MaxCycles));
        assert_eq!(report.stage_rank, 0);
        assert_eq!(report.failure_streak, 1);

        let ledger = LedgerStore::new(h.project.stage_ledger.clone()).load();
        assert_eq!(ledger.state(Stage::Implementation), StageState::Pending);

        let state = CampaignStateStore::new(h.project.campaign_state.clone()).load().unwrap();
        assert!(state.last_error.unwrap().contains("Cannot enter implementation"));
        assert!(journal_names(&h.project).contains(&"stage_rejected"));
    }

    #[test]
    fn test_live_owner_blocks_second_campaign() {
        let h = harness(&["default"]);
        h.project.ensure_directories().unwrap();
        CampaignStateStore::new(h.project.campaign_state.clone())
            .save(&CampaignState {
                project: "shop".into(),
                running: true,
                pid: Some(4242),
                ..CampaignState::default()
            })
            .unwrap();

        let mut driver = driver(&h, policy(1, "discovery"), vec![], passes(Stage::Discovery), &[])
            .with_probe(Arc::new(StaticProcessProbe::with_alive([4242, std::process::id()])));
        match driver.run() {
            Err(CampaignError::AlreadyRunning { project, pid }) => {
                assert_eq!(project, "shop");
                assert_eq!(pid, 4242);
            }
            other => panic!("unexpected: {:?}", other.map(|r| r.outcome)),
        }
        assert!(driver.delivery().requests.is_empty());
    }

    #[test]
    fn test_dead_owner_is_swept_before_start() {
        let h = harness(&["default"]);
        h.project.ensure_directories().unwrap();
        CampaignStateStore::new(h.project.campaign_state.clone())
            .save(&CampaignState {
                project: "shop".into(),
                running: true,
                pid: Some(4242),
                ..CampaignState::default()
            })
            .unwrap();

        let mut driver = driver(&h, policy(1, "discovery"), vec![], passes(Stage::Discovery), &[]);
        assert_eq!(driver.run().unwrap().outcome, CampaignOutcome::Succeeded);
        assert_eq!(journal_names(&h.project)[0], "stale_state_sanitized");
    }

    #[test]
    fn test_runtime_budget_stops_campaign() {
        let h = harness(&["default"]);
        let policy = CampaignPolicy {
            min_runtime_minutes: 1,
            max_cycles: 100,
            sleep_seconds: 30,
            target_stage: Some("discovery".into()),
            stall_cycles: 1,
        }
        .clamped();
        let mut driver = driver(&h, policy, vec![], IncrementOutcome::failed("no"), &[]);

        let report = driver.run().unwrap();
        assert_eq!(report.outcome, CampaignOutcome::Stopped(StopReason::RuntimeBudget));
        assert_eq!(report.cycles, 3);
    }

    #[test]
    fn test_checkpoint_resume_and_tier4_restart() {
        let h = harness(&["default"]);
        let fallback = IncrementOutcome {
            success: false,
            error: Some("tests failed".into()),
            completed_step: Some(DeliveryStep::Plan),
            requirement: Some(RequirementRef {
                id: "REQ-1".into(),
                seed: "cart".into(),
                ..RequirementRef::default()
            }),
            ..IncrementOutcome::default()
        };
        let mut driver = driver(&h, policy(5, "discovery"), vec![], fallback, &["REQ-1"]);
        driver.run().unwrap();

        let requests = &driver.delivery().requests;
        assert_eq!(requests.len(), 5);
        assert_eq!(requests[0].resume, ResumePoint::Fresh);
        assert_eq!(
            requests[1].resume,
            ResumePoint::Continue {
                requirement_id: "REQ-1".into(),
                step: DeliveryStep::Start
            }
        );
        assert!(!requests[3].force_restart);
        assert!(requests[4].force_restart);
        assert!(requests[4].compact_payloads);
        assert_eq!(requests[4].resume, ResumePoint::Fresh);
        assert!(journal_names(&h.project).contains(&"checkpoint_cleared"));
    }

    #[test]
    fn test_finish_step_clears_checkpoint() {
        let h = harness(&["default"]);
        let done = IncrementOutcome {
            success: true,
            completed_step: Some(DeliveryStep::Finish),
            requirement: Some(RequirementRef {
                id: "REQ-2".into(),
                ..RequirementRef::default()
            }),
            ..IncrementOutcome::default()
        };
        let mut driver = driver(&h, policy(1, "discovery"), vec![], done, &["REQ-2"]);
        driver.run().unwrap();
        assert!(CheckpointStore::new(h.project.checkpoint.clone()).load().is_none());
    }

    #[test]
    fn test_quota_marks_model_and_waits_for_provider() {
        let h = harness(&["sonnet"]);
        let quota: Script = Box::new(|request, project, clock| {
            let mut call = CallOutcome::new("claude", &request.model, false, "Usage limit hit. Your quota will reset after 2 minutes.");
            call.timestamp = clock.now();
            store::append_jsonl(&project.call_outcomes, &call)?;
            Ok(IncrementOutcome::failed("quota"))
        });
        let mut driver = driver(&h, policy(5, "discovery"), vec![quota], passes(Stage::Discovery), &[]);

        let report = driver.run().unwrap();
        assert_eq!(report.outcome, CampaignOutcome::Succeeded);
        assert_eq!(report.cycles, 3);
        assert_eq!(driver.delivery().requests.len(), 2);

        let names = journal_names(&h.project);
        assert!(names.contains(&"provider_unavailable"));
        assert!(names.contains(&"waiting_for_provider"));

        let waiting: Vec<_> = AuditLogger::new(&h.project)
            .read_recovery_audit()
            .into_iter()
            .filter(|r| r.outcome == "waiting_for_provider")
            .collect();
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].provider_issue, ProviderIssue::Quota);
    }

    #[test]
    fn test_empty_model_list_still_delivers() {
        let h = harness(&[]);
        let mut driver = driver(&h, policy(3, "discovery"), vec![], passes(Stage::Discovery), &[]);

        let report = driver.run().unwrap();
        assert_eq!(report.outcome, CampaignOutcome::Succeeded);
        assert_eq!(driver.delivery().requests[0].model, "default");
    }

    #[test]
    fn test_collaborator_error_is_not_fatal() {
        let h = harness(&["default"]);
        let boom: Script = Box::new(|_, _, _| anyhow::bail!("spawn failed"));
        let mut driver = driver(&h, policy(2, "discovery"), vec![boom], passes(Stage::Discovery), &[]);

        let report = driver.run().unwrap();
        assert_eq!(report.outcome, CampaignOutcome::Succeeded);
        assert_eq!(report.cycles, 2);
        assert_eq!(report.failure_streak, 0);
    }

    #[test]
    fn test_target_already_passed_succeeds_without_cycles() {
        let h = harness(&["default"]);
        LedgerStore::new(h.project.stage_ledger.clone())
            .mark(Stage::Discovery, StageState::Passed, None)
            .unwrap();
        let mut driver = driver(&h, policy(3, "discovery"), vec![], passes(Stage::Discovery), &[]);
        let report = driver.run().unwrap();
        assert_eq!(report.outcome, CampaignOutcome::Succeeded);
        assert_eq!(report.cycles, 0);
        assert!(driver.delivery().requests.is_empty());
    }
}
