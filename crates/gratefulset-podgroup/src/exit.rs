//! Pod-exit scale hook for the local driver.
//!
//! `scale_down` flags the pod so the driver restarts it on its next tick.
//! The restart runs the admission gate, which refuses the revoked ordinal,
//! so the pod ends up `AdmissionDenied` and the controller sees it settle.

use gratefulset_hooks::{HookContext, HookError, HookFuture, ScaleHook};
use gratefulset_state::{LocalSubstrate, PodPhase};
use tracing::{debug, info};

pub struct PodExitHook {
    substrate: LocalSubstrate,
}

impl PodExitHook {
    pub fn new(substrate: LocalSubstrate) -> Self {
        Self { substrate }
    }

    fn request_exit(&self, ctx: &HookContext) -> Result<(), HookError> {
        let key = format!("{}:{}", ctx.workload_id, ctx.pod_name);
        let pod = self
            .substrate
            .get_pod(&key)
            .map_err(|e| HookError::Request(e.to_string()))?;
        let Some(mut pod) = pod else {
            debug!(pod = %ctx.pod_name, "pod already gone");
            return Ok(());
        };
        if pod.exit_requested || pod.phase == PodPhase::Terminating {
            return Ok(());
        }
        pod.exit_requested = true;
        self.substrate
            .update_pod(&pod)
            .map_err(|e| HookError::Request(e.to_string()))?;
        info!(workload = %ctx.workload_id, pod = %ctx.pod_name, ordinal = ctx.ordinal, "pod asked to exit");
        Ok(())
    }
}

impl ScaleHook for PodExitHook {
    fn name(&self) -> &'static str {
        "pod_exit"
    }

    fn scale_down<'a>(&'a self, ctx: &'a HookContext) -> HookFuture<'a> {
        Box::pin(async move { self.request_exit(ctx) })
    }

    fn scale_up<'a>(&'a self, _ctx: &'a HookContext) -> HookFuture<'a> {
        Box::pin(async { Ok(()) })
    }
}
