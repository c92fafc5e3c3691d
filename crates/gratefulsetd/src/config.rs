//! gratefulsetd.toml configuration parser.
//!
//! Every field has a default, so an empty file (or none at all) is valid.
//!
//! ```toml
//! [controller]
//! workers = 4
//! resync_interval_secs = 300
//! settle_timeout_secs = 10
//!
//! [hooks]
//! timeout_secs = 30
//!
//! [podgroup]
//! tick_interval_ms = 500
//!
//! [api]
//! port = 8443
//! ```

use std::path::Path;
use std::time::Duration;

use gratefulset_controller::{BackoffPolicy, ControllerConfig};
use gratefulset_podgroup::DriverConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub controller: ControllerSection,
    pub hooks: HooksSection,
    pub podgroup: PodGroupSection,
    pub api: ApiSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSection {
    pub workers: usize,
    pub resync_interval_secs: u64,
    pub pass_timeout_secs: u64,
    pub settle_timeout_secs: u64,
    pub settle_poll_interval_ms: u64,
    pub progress_requeue_ms: u64,
    pub rehook_interval_secs: u64,
    pub ledger_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_secs: u64,
    pub backoff_jitter: f64,
}

impl Default for ControllerSection {
    fn default() -> Self {
        let defaults = ControllerConfig::default();
        Self {
            workers: defaults.workers,
            resync_interval_secs: defaults.resync_interval.as_secs(),
            pass_timeout_secs: defaults.pass_timeout.as_secs(),
            settle_timeout_secs: defaults.settle_timeout.as_secs(),
            settle_poll_interval_ms: defaults.settle_poll_interval.as_millis() as u64,
            progress_requeue_ms: defaults.progress_requeue.as_millis() as u64,
            rehook_interval_secs: defaults.rehook_interval.as_secs(),
            ledger_retries: defaults.ledger_retries,
            backoff_base_ms: defaults.backoff.base.as_millis() as u64,
            backoff_max_secs: defaults.backoff.max.as_secs(),
            backoff_jitter: defaults.backoff.jitter,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksSection {
    /// Used when a workload's hook config carries no timeout of its own.
    pub timeout_secs: u64,
}

impl Default for HooksSection {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PodGroupSection {
    pub tick_interval_ms: u64,
}

impl Default for PodGroupSection {
    fn default() -> Self {
        Self { tick_interval_ms: 500 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub port: u16,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self { port: 8443 }
    }
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DaemonConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn hook_timeout(&self) -> Duration {
        Duration::from_secs(self.hooks.timeout_secs)
    }

    pub fn controller_config(&self) -> ControllerConfig {
        let c = &self.controller;
        ControllerConfig {
            workers: c.workers.max(1),
            resync_interval: Duration::from_secs(c.resync_interval_secs),
            pass_timeout: Duration::from_secs(c.pass_timeout_secs),
            hook_timeout: self.hook_timeout(),
            settle_timeout: Duration::from_secs(c.settle_timeout_secs),
            settle_poll_interval: Duration::from_millis(c.settle_poll_interval_ms),
            progress_requeue: Duration::from_millis(c.progress_requeue_ms),
            rehook_interval: Duration::from_secs(c.rehook_interval_secs),
            ledger_retries: c.ledger_retries,
            backoff: BackoffPolicy {
                base: Duration::from_millis(c.backoff_base_ms),
                max: Duration::from_secs(c.backoff_max_secs),
                jitter: c.backoff_jitter.clamp(0.0, 1.0),
            },
            ..ControllerConfig::default()
        }
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            tick_interval: Duration::from_millis(self.podgroup.tick_interval_ms),
        }
    }
}
