//! Pod-group driver — converges pod records towards their pool records.
//!
//! One tick walks every pool once:
//!
//! 1. pods marked `Terminating` on the previous tick are deleted,
//! 2. pods above the pool's replica count are marked `Terminating`,
//!    highest ordinal first,
//! 3. pods that exited or have not been admitted yet run the gate,
//! 4. a fully ready pool restarts one outdated pod onto the current
//!    template revision,
//! 5. missing pods are created,
//! 6. the pool's status counters are written back if they changed.

use std::collections::HashMap;
use std::time::Duration;

use gratefulset_gate::{Decision, decide, logical_ordinal};
use gratefulset_state::{
    LocalSubstrate, LockLedger, PodManagementPolicy, PodPhase, PodRecord, PoolRecord, PoolStatus,
    StateError, Substrate, epoch_secs,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::PodGroupResult;

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub tick_interval: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(500),
        }
    }
}

/// What one tick changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub created: u32,
    pub admitted: u32,
    pub denied: u32,
    pub restarted: u32,
    pub terminating: u32,
    pub deleted: u32,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }

    fn merge(&mut self, other: TickReport) {
        self.created += other.created;
        self.admitted += other.admitted;
        self.denied += other.denied;
        self.restarted += other.restarted;
        self.terminating += other.terminating;
        self.deleted += other.deleted;
    }
}

pub struct PodGroupDriver {
    substrate: LocalSubstrate,
    config: DriverConfig,
}

impl PodGroupDriver {
    pub fn new(substrate: LocalSubstrate, config: DriverConfig) -> Self {
        Self { substrate, config }
    }

    /// Tick every `tick_interval` until `shutdown` flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.config.tick_interval, "pod-group driver started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.tick_interval) => {
                    match self.tick() {
                        Ok(report) if !report.is_idle() => debug!(?report, "pod-group tick applied"),
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "pod-group tick failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("pod-group driver shutting down");
                    break;
                }
            }
        }
    }

    /// Converge every pool by one step.
    pub fn tick(&self) -> PodGroupResult<TickReport> {
        let pools = self.substrate.list_all_pools()?;
        let pods = self.substrate.store().list_all_pods()?;
        let mut report = TickReport::default();

        for pod in pods.iter().filter(|p| !pools.iter().any(|pool| owns_pod(pool, p))) {
            if self.substrate.delete_pod(pod)? {
                debug!(workload = %pod.workload_id, pod = %pod.name, "orphaned pod deleted");
                report.deleted += 1;
            }
        }

        let mut ledgers: HashMap<String, Option<LockLedger>> = HashMap::new();
        for pool in &pools {
            let ledger = ledgers
                .entry(pool.workload_id.clone())
                .or_insert_with(|| self.load_ledger(&pool.workload_id))
                .as_ref();
            let owned = pods.iter().filter(|p| owns_pod(pool, p)).cloned().collect();
            report.merge(self.sync_pool(pool, owned, ledger)?);
        }
        Ok(report)
    }

    fn sync_pool(&self, pool: &PoolRecord, mut pods: Vec<PodRecord>, ledger: Option<&LockLedger>) -> PodGroupResult<TickReport> {
        let mut report = TickReport::default();
        let ordered = pool.structure.pod_management_policy == PodManagementPolicy::OrderedReady;
        let revision = pool.template.revision();
        let now = epoch_secs();
        pods.sort_by_key(|p| p.ordinal);

        let mut live = Vec::with_capacity(pods.len());
        for pod in pods {
            if pod.phase == PodPhase::Terminating {
                self.substrate.delete_pod(&pod)?;
                debug!(pool = %pool.name, pod = %pod.name, "pod deleted");
                report.deleted += 1;
            } else {
                live.push(pod);
            }
        }

        let (keep, surplus): (Vec<PodRecord>, Vec<PodRecord>) =
            live.into_iter().partition(|p| p.ordinal < pool.replicas);
        for mut pod in surplus.into_iter().rev() {
            pod.phase = PodPhase::Terminating;
            pod.updated_at = now;
            self.substrate.update_pod(&pod)?;
            info!(pool = %pool.name, pod = %pod.name, ordinal = pod.logical_ordinal, "pod terminating");
            report.terminating += 1;
            if ordered {
                break;
            }
        }

        let mut current = Vec::with_capacity(keep.len());
        for mut pod in keep {
            let before = pod.clone();
            if pod.exit_requested {
                pod.exit_requested = false;
                pod.restart_count += 1;
                pod.phase = self.start(pool, &pod, ledger);
                report.restarted += 1;
            } else if matches!(pod.phase, PodPhase::Pending | PodPhase::AdmissionDenied) {
                pod.phase = self.start(pool, &pod, ledger);
            }
            if pod == before {
                current.push(pod);
                continue;
            }
            if pod.phase != before.phase {
                match pod.phase {
                    PodPhase::Ready => {
                        pod.started_at = now;
                        report.admitted += 1;
                    }
                    PodPhase::AdmissionDenied => report.denied += 1,
                    _ => {}
                }
            }
            pod.updated_at = now;
            current.push(self.substrate.update_pod(&pod)?);
        }

        let all_ready = current.len() as u32 == pool.replicas && current.iter().all(|p| p.is_ready());
        if all_ready {
            if let Some(pod) = current.iter_mut().rev().find(|p| p.revision != revision) {
                let mut next = pod.clone();
                next.revision = revision.clone();
                next.restart_count += 1;
                next.phase = self.start(pool, &next, ledger);
                next.started_at = now;
                next.updated_at = now;
                *pod = self.substrate.update_pod(&next)?;
                info!(pool = %pool.name, pod = %pod.name, %revision, "pod restarted on new revision");
                report.restarted += 1;
            }
        }

        for local in 0..pool.replicas {
            if current.iter().any(|p| p.ordinal == local) {
                continue;
            }
            if ordered && !current.iter().filter(|p| p.ordinal < local).all(|p| p.is_ready()) {
                break;
            }
            let created = self.substrate.create_pod(&new_pod(pool, local, &revision, now))?;
            debug!(pool = %pool.name, pod = %created.name, "pod created");
            current.push(created);
            report.created += 1;
            if ordered {
                break;
            }
        }

        self.record_status(pool)?;
        Ok(report)
    }

    /// Run the admission gate for one pod start.
    fn start(&self, pool: &PoolRecord, pod: &PodRecord, ledger: Option<&LockLedger>) -> PodPhase {
        let ordinal = match logical_ordinal(&pod.name, pool.ordinal_base) {
            Ok(ordinal) => ordinal,
            Err(e) => {
                warn!(pool = %pool.name, pod = %pod.name, error = %e, "gate cannot run");
                return PodPhase::Pending;
            }
        };
        let Some(ledger) = ledger else {
            debug!(pool = %pool.name, pod = %pod.name, "ledger unavailable, start retried");
            return PodPhase::Pending;
        };
        match decide(ledger, ordinal) {
            Decision::Admit => PodPhase::Ready,
            Decision::Deny => {
                debug!(pool = %pool.name, pod = %pod.name, ordinal, "admission denied");
                PodPhase::AdmissionDenied
            }
        }
    }

    fn load_ledger(&self, workload_id: &str) -> Option<LockLedger> {
        match self.substrate.get_ledger(workload_id) {
            Ok(Some(doc)) => match LockLedger::from_document(&doc) {
                Ok(ledger) => Some(ledger),
                Err(e) => {
                    warn!(workload = %workload_id, error = %e, "ledger malformed");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(workload = %workload_id, error = %e, "ledger unreadable");
                None
            }
        }
    }

    fn record_status(&self, pool: &PoolRecord) -> PodGroupResult<()> {
        let revision = pool.template.revision();
        let pods: Vec<PodRecord> = self
            .substrate
            .list_pods(&pool.workload_id)?
            .into_iter()
            .filter(|p| owns_pod(pool, p))
            .collect();
        let status = PoolStatus {
            replicas: pods.len() as u32,
            ready_replicas: pods.iter().filter(|p| p.is_ready()).count() as u32,
            updated_replicas: pods
                .iter()
                .filter(|p| p.revision == revision && p.phase != PodPhase::Terminating)
                .count() as u32,
        };
        if status == pool.status {
            return Ok(());
        }

        let mut record = pool.clone();
        record.status = status;
        match self.substrate.update_pool(&record) {
            Ok(_) => Ok(()),
            // The controller changed the pool meanwhile; next tick recounts.
            Err(StateError::Conflict { .. }) => {
                debug!(pool = %pool.name, "pool status write conflicted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn owns_pod(pool: &PoolRecord, pod: &PodRecord) -> bool {
    pod.workload_id == pool.workload_id && pod.pool == pool.name && pod.generation == pool.generation
}

fn new_pod(pool: &PoolRecord, local: u32, revision: &str, now: u64) -> PodRecord {
    PodRecord {
        name: format!("{}-{local}", pool.name),
        workload_id: pool.workload_id.clone(),
        pool: pool.name.clone(),
        generation: pool.generation,
        ordinal: local,
        logical_ordinal: pool.ordinal_base + local,
        phase: PodPhase::Pending,
        revision: revision.to_string(),
        restart_count: 0,
        exit_requested: false,
        started_at: 0,
        updated_at: now,
        resource_version: 0,
    }
}
