//! Workload status assembled during a pass and written at its end.
//!
//! The draft starts from the previous status so a step that spans several
//! passes keeps its start time and hook attempt count. The write is skipped
//! when nothing but timestamps changed, so a pass over converged state
//! performs no writes at all.

use gratefulset_state::{
    Condition, GratefulSet, StepKind, StepPhase, StepStatus, WorkloadStatus,
};

use crate::pool::PoolSet;

pub struct StatusDraft {
    status: WorkloadStatus,
    previous_step: Option<StepStatus>,
    now: u64,
}

impl StatusDraft {
    pub fn new(workload: &GratefulSet, previous: Option<&WorkloadStatus>, now: u64) -> Self {
        let status = WorkloadStatus {
            workload_id: workload.id.clone(),
            desired_replicas: workload.replicas,
            observed_fingerprint: workload.fingerprint(),
            updated_at: now,
            ..Default::default()
        };
        Self {
            status,
            previous_step: previous.and_then(|s| s.step.clone()),
            now,
        }
    }

    /// The step recorded by the previous pass.
    pub fn previous_step(&self) -> Option<&StepStatus> {
        self.previous_step.as_ref()
    }

    pub fn observe(&mut self, pools: &PoolSet) {
        self.status.replicas = pools.total();
        self.status.ready_replicas = pools.ready_total();
        self.status.pools = pools.summaries();
    }

    /// Record progress on a step, carrying over what this pass or the
    /// previous one already knew about the same step.
    pub fn step(&mut self, kind: StepKind, pool: &str, ordinal: u32, phase: StepPhase) -> &mut StepStatus {
        let mut step = StepStatus {
            kind,
            pool: pool.to_string(),
            ordinal,
            phase,
            started_at: self.now,
            elapsed_secs: 0,
            hook_attempts: 0,
            hook_accepted_at: None,
            last_error: None,
        };
        let carried = self
            .status
            .step
            .as_ref()
            .filter(|s| s.same_step(&step))
            .or_else(|| self.previous_step.as_ref().filter(|p| p.same_step(&step)));
        if let Some(prev) = carried {
            step.started_at = prev.started_at;
            step.hook_attempts = prev.hook_attempts;
            step.hook_accepted_at = prev.hook_accepted_at;
        }
        step.elapsed_secs = self.now.saturating_sub(step.started_at);
        self.status.step.insert(step)
    }

    /// Keep a scale-up that still owes its hook call when this pass ends
    /// before reaching it.
    pub fn carry_owed_admission(&mut self) {
        if self.status.step.is_some() {
            return;
        }
        let owed = self
            .previous_step
            .as_ref()
            .filter(|p| !p.kind.is_down() && p.phase != StepPhase::Done);
        if let Some(prev) = owed {
            self.status.step = Some(prev.clone());
        }
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.status.message = Some(message.into());
    }

    pub fn pause(&mut self, reason: impl Into<String>) {
        self.status.condition = Condition::Paused {
            reason: reason.into(),
        };
    }

    /// Finalise the condition and return the status to write.
    pub fn finish(mut self) -> WorkloadStatus {
        if matches!(self.status.condition, Condition::Paused { .. }) {
            return self.status;
        }
        let converged = self.status.step.is_none()
            && self.status.pools.len() == 1
            && self.status.replicas == self.status.desired_replicas
            && self.status.ready_replicas == self.status.desired_replicas;
        self.status.condition = if self
            .status
            .step
            .as_ref()
            .is_some_and(|s| s.last_error.is_some())
        {
            Condition::Stalled
        } else if converged {
            Condition::Ready
        } else {
            Condition::Progressing
        };
        self.status
    }
}

/// Whether two statuses differ in anything but timestamps.
pub fn is_unchanged(previous: &WorkloadStatus, next: &WorkloadStatus) -> bool {
    fn normalise(s: &WorkloadStatus) -> WorkloadStatus {
        let mut s = s.clone();
        s.updated_at = 0;
        if let Some(step) = s.step.as_mut() {
            step.elapsed_secs = 0;
        }
        s
    }
    normalise(previous) == normalise(next)
}
