//! Per-key exponential backoff with jitter.
//!
//! ```text
//! Failures    Delay (base=1s, max=300s)    With jitter (±10%)
//! ─────────────────────────────────────────────────────────────
//!     1              1s                     0.9s - 1.1s
//!     2              2s                     1.8s - 2.2s
//!     3              4s                     3.6s - 4.4s
//!    ...
//!    ≥10           300s                    270s - 330s
//! ```
//!
//! Failure counts are the only state the controller keeps per key between
//! passes. They shape requeue timing and nothing else; a success forgets them.

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;

/// Shape of the backoff curve.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Fraction of the delay added or subtracted at random (0.0-1.0).
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(300),
            jitter: 0.1,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `failures` (1-indexed), without jitter.
    pub fn raw_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }

    /// Delay before retry number `failures`, with jitter applied.
    pub fn delay(&self, failures: u32) -> Duration {
        let delay = self.raw_delay(failures);
        let range = delay.as_secs_f64() * self.jitter.clamp(0.0, 1.0);
        if range <= 0.0 {
            return delay;
        }
        let offset = rand::thread_rng().gen_range(-range..=range);
        Duration::from_secs_f64((delay.as_secs_f64() + offset).max(0.0))
    }
}

/// Failure counters per work-queue key.
#[derive(Debug, Default)]
pub struct Backoff {
    policy: BackoffPolicy,
    failures: HashMap<String, u32>,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            failures: HashMap::new(),
        }
    }

    /// Record a failure for `key` and return how long to wait.
    pub fn next_delay(&mut self, key: &str) -> Duration {
        let count = self.failures.entry(key.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        self.policy.delay(*count)
    }

    /// Forget the failure history of `key`.
    pub fn reset(&mut self, key: &str) {
        self.failures.remove(key);
    }

    pub fn failures(&self, key: &str) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }
}
