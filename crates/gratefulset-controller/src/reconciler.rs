//! Reconciler — one idempotent pass over one logical workload.
//!
//! A pass reads the desired workload, the ledger, the pools and their pods,
//! then performs at most one mutation:
//!
//! 1. workload gone → nothing to do
//! 2. ledger missing → create it
//! 3. observed state invalid → pause
//! 4. structure changed → create a successor pool
//! 5. step in flight → advance it
//! 6. scale-up hook owed → call it
//! 7. template changed → pass it to the active pool
//! 8. retired pool empty → delete it
//! 9. total off target → start the next step
//!
//! Nothing from an earlier pass is trusted except the owed scale-up hook in
//! the status. The status is rewritten at the end of every pass, unless it
//! would not change.

use std::sync::Arc;
use std::time::Duration;

use gratefulset_hooks::HookFactory;
use gratefulset_state::{GratefulSet, StepKind, Substrate, epoch_secs};
use tracing::{debug, error, info};

use crate::config::ControllerConfig;
use crate::coordinator::ScaleCoordinator;
use crate::error::{ReconcileError, ReconcileResult};
use crate::ledger::LedgerWriter;
use crate::plan::{Action, Direction, ReconcileOutcome, ScaleIntent, Step};
use crate::pool::PoolSet;
use crate::status::{StatusDraft, is_unchanged};
use crate::transition::{self, TransitionPlan};

pub struct Reconciler {
    substrate: Arc<dyn Substrate>,
    hooks: Arc<dyn HookFactory>,
    config: ControllerConfig,
}

impl Reconciler {
    pub fn new(substrate: Arc<dyn Substrate>, hooks: Arc<dyn HookFactory>, config: ControllerConfig) -> Self {
        Self {
            substrate,
            hooks,
            config,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn substrate(&self) -> &Arc<dyn Substrate> {
        &self.substrate
    }

    /// Run one pass for the workload keyed `workload_id`.
    pub async fn reconcile(&self, workload_id: &str) -> ReconcileResult<ReconcileOutcome> {
        let Some(workload) = self.substrate.get_workload(workload_id)? else {
            debug!(workload = %workload_id, "workload gone, nothing to reconcile");
            return Ok(ReconcileOutcome::idle());
        };

        let previous = self.substrate.get_status(workload_id)?;
        let now = epoch_secs();
        let mut draft = StatusDraft::new(&workload, previous.as_ref(), now);

        let result = self.pass(&workload, &mut draft, now).await;

        match &result {
            Ok(outcome) if !outcome.is_noop() => {
                info!(workload = %workload_id, action = ?outcome.action, "reconcile pass applied");
            }
            Err(e) if e.is_fatal() => {
                error!(workload = %workload_id, error = %e, "reconciliation paused");
                draft.pause(e.to_string());
                draft.carry_owed_admission();
            }
            _ => {}
        }
        // Someone else is writing; the next pass observes their result.
        if matches!(
            result,
            Err(ReconcileError::Conflict(_) | ReconcileError::Transient(_))
        ) {
            return result;
        }

        let status = draft.finish();
        let changed = previous.as_ref().is_none_or(|prev| !is_unchanged(prev, &status));
        if changed {
            if let Err(e) = self.substrate.put_status(&status) {
                // The pass result matters more than a lost status write.
                if result.is_ok() {
                    return Err(e.into());
                }
            }
        }
        result
    }

    async fn pass(&self, workload: &GratefulSet, draft: &mut StatusDraft, now: u64) -> ReconcileResult<ReconcileOutcome> {
        let substrate = self.substrate.as_ref();
        let writer = LedgerWriter::new(substrate, &workload.id, self.config.ledger_retries);

        if writer.ensure()? {
            return Ok(ReconcileOutcome::new(Action::CreateLedger, Some(Duration::ZERO)));
        }
        let ledger = writer.read()?;

        let pools = PoolSet::observe(
            workload,
            substrate.list_pools(&workload.id)?,
            substrate.list_pods(&workload.id)?,
        );
        draft.observe(&pools);
        pools.validate(&ledger)?;

        if pools.needs_successor() {
            let name = transition::create_successor(substrate, workload, &pools, now)?;
            draft.carry_owed_admission();
            return Ok(ReconcileOutcome::new(
                Action::CreatePool { pool: name },
                Some(Duration::ZERO),
            ));
        }

        let hook = self
            .hooks
            .hook_for(workload)
            .map_err(|e| ReconcileError::InvariantViolation(format!("hook configuration: {e}")))?;
        let coordinator = ScaleCoordinator {
            substrate,
            workload,
            hook: hook.as_ref(),
            ledger: &writer,
            config: &self.config,
            now,
        };

        let intent = ScaleIntent::derive(&pools, &ledger, workload.replicas);
        if let Some(step) = &intent.in_flight {
            debug!(workload = %workload.id, step = ?step, "continuing step in flight");
            return coordinator.advance(step, &pools, draft).await;
        }

        if let Some(outcome) = coordinator.complete_admission(&pools, &ledger, draft).await? {
            return Ok(outcome);
        }

        if let Some(outcome) = self.pass_through_template(workload, &pools)? {
            return Ok(outcome);
        }

        if let Some(retired) = pools.deletable(workload.replicas) {
            let name = retired.record.name.clone();
            transition::delete_retired(substrate, &retired.record)?;
            return Ok(ReconcileOutcome::new(Action::DeletePool { pool: name }, Some(Duration::ZERO)));
        }

        let Some(step) = self.next_step(&pools, &intent, workload.replicas) else {
            if pools.is_migrating() {
                // Predecessor pods are still terminating.
                draft.set_message("waiting for retired pools to empty");
                return Ok(ReconcileOutcome::new(Action::None, Some(self.config.progress_requeue)));
            }
            return Ok(ReconcileOutcome::idle());
        };

        if let Some(reason) = self.blocked(&step, &pools) {
            debug!(workload = %workload.id, step = ?step, %reason, "next step deferred");
            draft.set_message(reason);
            return Ok(ReconcileOutcome::new(Action::None, Some(self.config.progress_requeue)));
        }

        coordinator.begin(&step, &pools, draft)
    }

    /// Pick the step that moves the workload toward its target.
    fn next_step(&self, pools: &PoolSet, intent: &ScaleIntent, desired: u32) -> Option<Step> {
        if pools.is_migrating() {
            return TransitionPlan::derive(pools, desired).first().cloned();
        }
        let active = pools.active()?;
        match intent.direction {
            Direction::Down => {
                let top = active.record.highest_ordinal()?;
                Some(Step::new(StepKind::ScaleDown, active.name(), top))
            }
            Direction::Up => Some(Step::new(StepKind::ScaleUp, active.name(), active.next_ordinal())),
            Direction::None => None,
        }
    }

    /// Why a step cannot start yet, if it cannot.
    ///
    /// Additions wait for the active pool to be fully ready on its current
    /// template. Removals wait for the previous removal's pod to be gone.
    fn blocked(&self, step: &Step, pools: &PoolSet) -> Option<String> {
        let view = pools.get(&step.pool)?;
        if step.kind.is_down() {
            if view.has_extra_pods() {
                return Some(format!("waiting for removed pods of {} to terminate", view.name()));
            }
            return None;
        }
        match pools.active() {
            Some(active) if !active.is_converged() => {
                Some(format!("waiting for pool {} to become ready", active.name()))
            }
            _ => None,
        }
    }

    /// Hand a changed pod template to the active pool; the primitive rolls
    /// it out natively.
    fn pass_through_template(&self, workload: &GratefulSet, pools: &PoolSet) -> ReconcileResult<Option<ReconcileOutcome>> {
        let Some(active) = pools.active() else {
            return Ok(None);
        };
        if active.record.template == workload.template {
            return Ok(None);
        }
        let mut record = active.record.clone();
        record.template = workload.template.clone();
        self.substrate.update_pool(&record)?;
        info!(
            workload = %workload.id,
            pool = %record.name,
            revision = %record.template.revision(),
            "pod template passed to active pool"
        );
        Ok(Some(ReconcileOutcome::new(
            Action::UpdateTemplate { pool: record.name },
            Some(self.config.progress_requeue),
        )))
    }
}
