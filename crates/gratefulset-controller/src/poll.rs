//! Poll-until-condition with a deadline.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::ReconcileResult;

/// Evaluate `check` every `interval` until it returns true or `timeout`
/// elapses. The check always runs at least once.
///
/// Returns `Ok(false)` on timeout; the caller decides whether to requeue.
pub async fn poll_until<F>(timeout: Duration, interval: Duration, mut check: F) -> ReconcileResult<bool>
where
    F: FnMut() -> ReconcileResult<bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if check()? {
            return Ok(true);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}
