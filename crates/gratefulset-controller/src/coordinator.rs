//! Scale coordinator — the locked scale-down handshake and its mirror image
//! for scale-up.
//!
//! ```text
//! scale-down  Initiated ─► LockRevoked ─► HookInvoked ─► AwaitingSettle ─► Done
//!               revoke top     scale_down hook   poll pod unready    replicas - 1
//!
//! scale-up    Initiated ─► ReplicasIncremented ─► LockGranted ─► AwaitingReady ─► Done
//!               replicas + 1     grant once pod exists   pod ready     scale_up hook
//! ```
//!
//! Each call performs at most one mutation and returns. Where a step stands
//! is re-derived every pass from the ledger, the pool and its pods, so a
//! crash between any two mutations resumes at the right phase. Only the
//! owed scale-up hook is remembered in the workload status, since nothing
//! else observable records it.

use std::time::Duration;

use gratefulset_hooks::{HookContext, HookError, ScaleHook};
use gratefulset_state::{
    GratefulSet, LockLedger, PodPhase, StepPhase, StepStatus, Substrate,
};
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::error::{ReconcileError, ReconcileResult};
use crate::ledger::LedgerWriter;
use crate::plan::{Action, ReconcileOutcome, Step};
use crate::poll::poll_until;
use crate::pool::{PoolSet, PoolView, is_settled};
use crate::status::StatusDraft;

/// Everything a scale step needs for one pass over one workload.
pub struct ScaleCoordinator<'a> {
    pub substrate: &'a dyn Substrate,
    pub workload: &'a GratefulSet,
    pub hook: &'a dyn ScaleHook,
    pub ledger: &'a LedgerWriter<'a>,
    pub config: &'a ControllerConfig,
    pub now: u64,
}

impl<'a> ScaleCoordinator<'a> {
    /// Take the first action of a new step.
    pub fn begin(&self, step: &Step, pools: &PoolSet, draft: &mut StatusDraft) -> ReconcileResult<ReconcileOutcome> {
        let view = self.pool(pools, &step.pool)?;
        if step.kind.is_down() {
            self.ledger.revoke(step.ordinal)?;
            info!(
                workload = %self.workload.id,
                pool = %step.pool,
                ordinal = step.ordinal,
                kind = ?step.kind,
                "scale-down started"
            );
            draft.step(step.kind, &step.pool, step.ordinal, StepPhase::LockRevoked);
            Ok(ReconcileOutcome::new(Action::RevokeLock { ordinal: step.ordinal }, Some(Duration::ZERO))
                .with_step(step))
        } else {
            let outcome = self.set_replicas(view, view.record.replicas + 1, step)?;
            draft.step(step.kind, &step.pool, step.ordinal, StepPhase::ReplicasIncremented);
            Ok(outcome)
        }
    }

    /// Move an in-flight step forward by at most one mutation.
    pub async fn advance(&self, step: &Step, pools: &PoolSet, draft: &mut StatusDraft) -> ReconcileResult<ReconcileOutcome> {
        if step.kind.is_down() {
            self.advance_down(step, pools, draft).await
        } else {
            self.advance_up(step, pools, draft)
        }
    }

    async fn advance_down(&self, step: &Step, pools: &PoolSet, draft: &mut StatusDraft) -> ReconcileResult<ReconcileOutcome> {
        let view = self.pool(pools, &step.pool)?;
        if is_settled(view, step.ordinal) {
            return self.remove(view, step, draft);
        }

        let target_ready = view.pod(step.ordinal).is_some_and(|p| p.is_ready());
        if target_ready && self.hook_due(draft.previous_step(), step) {
            let ctx = self.hook_context(view, step.ordinal);
            let result = self.call(self.hook.scale_down(&ctx)).await;
            let record = draft.step(step.kind, &step.pool, step.ordinal, StepPhase::HookInvoked);
            record.hook_attempts += 1;
            if let Err(source) = result {
                warn!(
                    workload = %self.workload.id,
                    ordinal = step.ordinal,
                    attempts = record.hook_attempts,
                    error = %source,
                    "scale-down hook failed"
                );
                record.last_error = Some(source.to_string());
                return Err(ReconcileError::Hook {
                    direction: "scale_down",
                    ordinal: step.ordinal,
                    source,
                });
            }
            record.hook_accepted_at = Some(self.now);
            info!(workload = %self.workload.id, ordinal = step.ordinal, hook = self.hook.name(), "scale-down hook accepted");

            if !self.hook.stops_pod() {
                return self.remove(view, step, draft);
            }
        }

        let workload_id = self.workload.id.as_str();
        let settled = poll_until(self.config.settle_timeout, self.config.settle_poll_interval, || {
            let pods = self.substrate.list_pods(workload_id)?;
            Ok(is_settled(&view.refresh(&pods), step.ordinal))
        })
        .await?;

        if settled {
            return self.remove(view, step, draft);
        }
        debug!(workload = %workload_id, ordinal = step.ordinal, "waiting for pod to settle");
        draft.step(step.kind, &step.pool, step.ordinal, StepPhase::AwaitingSettle);
        Ok(ReconcileOutcome::new(Action::None, Some(self.config.progress_requeue)).with_step(step))
    }

    fn advance_up(&self, step: &Step, pools: &PoolSet, draft: &mut StatusDraft) -> ReconcileResult<ReconcileOutcome> {
        let view = self.pool(pools, &step.pool)?;
        let pod_started = view
            .pod(step.ordinal)
            .is_some_and(|p| p.phase != PodPhase::Terminating);
        if !pod_started {
            draft.step(step.kind, &step.pool, step.ordinal, StepPhase::ReplicasIncremented);
            return Ok(ReconcileOutcome::new(Action::None, Some(self.config.progress_requeue)).with_step(step));
        }

        self.ledger.grant(step.ordinal)?;
        draft.step(step.kind, &step.pool, step.ordinal, StepPhase::LockGranted);
        Ok(ReconcileOutcome::new(Action::GrantLock { ordinal: step.ordinal }, Some(self.config.progress_requeue))
            .with_step(step))
    }

    /// Finish a granted scale-up whose hook has not been accepted yet.
    ///
    /// Returns `None` when the previous status owes no hook call.
    pub async fn complete_admission(
        &self,
        pools: &PoolSet,
        ledger: &LockLedger,
        draft: &mut StatusDraft,
    ) -> ReconcileResult<Option<ReconcileOutcome>> {
        let Some(prev) = draft.previous_step().cloned() else {
            return Ok(None);
        };
        if prev.kind.is_down() || prev.phase == StepPhase::Done {
            return Ok(None);
        }
        let Some(view) = pools.get(&prev.pool) else {
            return Ok(None);
        };
        if !view.record.owns(prev.ordinal) || !ledger.is_permitted(prev.ordinal) {
            return Ok(None);
        }
        let step = Step::new(prev.kind, &prev.pool, prev.ordinal);

        if !view.pod(prev.ordinal).is_some_and(|p| p.is_ready()) {
            draft.step(step.kind, &step.pool, step.ordinal, StepPhase::AwaitingReady);
            return Ok(Some(
                ReconcileOutcome::new(Action::None, Some(self.config.progress_requeue)).with_step(&step),
            ));
        }

        let ctx = self.hook_context(view, step.ordinal);
        let result = self.call(self.hook.scale_up(&ctx)).await;
        let phase = if result.is_ok() { StepPhase::Done } else { StepPhase::HookInvoked };
        let record = draft.step(step.kind, &step.pool, step.ordinal, phase);
        record.hook_attempts += 1;
        if let Err(source) = result {
            warn!(workload = %self.workload.id, ordinal = step.ordinal, error = %source, "scale-up hook failed");
            record.last_error = Some(source.to_string());
            return Err(ReconcileError::Hook {
                direction: "scale_up",
                ordinal: step.ordinal,
                source,
            });
        }
        record.hook_accepted_at = Some(self.now);
        info!(workload = %self.workload.id, ordinal = step.ordinal, "scale-up complete");
        Ok(Some(ReconcileOutcome::new(Action::None, Some(Duration::ZERO)).with_step(&step)))
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn pool<'p>(&self, pools: &'p PoolSet, name: &str) -> ReconcileResult<&'p PoolView> {
        pools
            .get(name)
            .ok_or_else(|| ReconcileError::Transient(format!("pool {name} disappeared")))
    }

    /// Lower the pool by one now that the removed pod has settled.
    fn remove(&self, view: &PoolView, step: &Step, draft: &mut StatusDraft) -> ReconcileResult<ReconcileOutcome> {
        let outcome = self.set_replicas(view, view.record.replicas.saturating_sub(1), step)?;
        draft.step(step.kind, &step.pool, step.ordinal, StepPhase::Done);
        info!(
            workload = %self.workload.id,
            pool = %step.pool,
            ordinal = step.ordinal,
            "ordinal removed"
        );
        Ok(outcome)
    }

    fn set_replicas(&self, view: &PoolView, to: u32, step: &Step) -> ReconcileResult<ReconcileOutcome> {
        let mut record = view.record.clone();
        let from = record.replicas;
        record.replicas = to;
        self.substrate.update_pool(&record)?;
        debug!(workload = %self.workload.id, pool = %record.name, from, to, "pool replicas set");
        Ok(ReconcileOutcome::new(
            Action::SetReplicas {
                pool: record.name,
                from,
                to,
            },
            Some(self.config.progress_requeue),
        )
        .with_step(step))
    }

    /// A scale-down hook is (re)sent unless it was accepted for this very
    /// step recently.
    fn hook_due(&self, previous: Option<&StepStatus>, step: &Step) -> bool {
        let accepted = previous
            .filter(|p| p.kind == step.kind && p.pool == step.pool && p.ordinal == step.ordinal)
            .and_then(|p| p.hook_accepted_at);
        match accepted {
            Some(at) => self.now.saturating_sub(at) >= self.config.rehook_interval.as_secs(),
            None => true,
        }
    }

    fn hook_context(&self, view: &PoolView, ordinal: u32) -> HookContext {
        let pod_name = view.record.pod_name(ordinal);
        HookContext {
            workload_id: self.workload.id.clone(),
            pool: view.record.name.clone(),
            ordinal,
            host: format!("{pod_name}.{}", view.record.structure.service_name),
            pod_name,
        }
    }

    async fn call<F>(&self, call: F) -> Result<(), HookError>
    where
        F: std::future::Future<Output = Result<(), HookError>>,
    {
        match tokio::time::timeout(self.config.hook_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(HookError::Timeout(self.config.hook_timeout)),
        }
    }
}
