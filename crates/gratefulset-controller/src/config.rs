//! Controller tuning knobs.

use std::time::Duration;

use crate::backoff::BackoffPolicy;

/// Timeouts, intervals and concurrency for the reconciler and its runtime.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Keys processed concurrently.
    pub workers: usize,
    /// Every workload is re-queued at this interval regardless of events.
    pub resync_interval: Duration,
    /// Upper bound on a single reconcile pass.
    pub pass_timeout: Duration,
    /// Upper bound on one scale hook call.
    pub hook_timeout: Duration,
    /// How long one pass polls for a removed pod to settle.
    pub settle_timeout: Duration,
    /// Poll interval while waiting for a pod to settle.
    pub settle_poll_interval: Duration,
    /// Requeue delay while waiting on the pod-group primitive.
    pub progress_requeue: Duration,
    /// Requeue delay after a conflict.
    pub conflict_requeue: Duration,
    /// An accepted scale-down hook is re-sent if the pod is still ready
    /// after this long.
    pub rehook_interval: Duration,
    /// Attempts per ledger mutation before giving up on conflicts.
    pub ledger_retries: u32,
    /// Requeue backoff for transient and hook failures.
    pub backoff: BackoffPolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            resync_interval: Duration::from_secs(300),
            pass_timeout: Duration::from_secs(120),
            hook_timeout: Duration::from_secs(30),
            settle_timeout: Duration::from_secs(10),
            settle_poll_interval: Duration::from_millis(500),
            progress_requeue: Duration::from_secs(2),
            conflict_requeue: Duration::from_millis(100),
            rehook_interval: Duration::from_secs(300),
            ledger_retries: 5,
            backoff: BackoffPolicy::default(),
        }
    }
}
