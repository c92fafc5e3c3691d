//! Observed model of the pools realising one logical workload.
//!
//! Built fresh at the start of every pass from the substrate. Pools are held
//! oldest generation first. The newest pool is *active* when its fingerprint
//! matches the desired structural spec; every other pool is *draining* while
//! it still holds replicas and *retired* once it is down to zero.

use std::collections::HashSet;

use gratefulset_state::{
    GratefulSet, LockLedger, PodPhase, PodRecord, PoolRecord, PoolRole, PoolSummary, StepKind,
};

use crate::error::{ReconcileError, ReconcileResult};
use crate::plan::Step;

/// One pool together with its pods.
#[derive(Debug, Clone)]
pub struct PoolView {
    pub record: PoolRecord,
    pub role: PoolRole,
    /// Pods of this pool, ascending by ordinal.
    pub pods: Vec<PodRecord>,
}

impl PoolView {
    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// Pod holding a logical ordinal, if it exists.
    pub fn pod(&self, ordinal: u32) -> Option<&PodRecord> {
        self.pods.iter().find(|p| p.logical_ordinal == ordinal)
    }

    pub fn ready_count(&self) -> u32 {
        self.pods.iter().filter(|p| p.is_ready()).count() as u32
    }

    /// Logical ordinal the next scale-up would add.
    pub fn next_ordinal(&self) -> u32 {
        self.record.range().end
    }

    /// Pods whose ordinal lies outside the desired range (still terminating).
    pub fn has_extra_pods(&self) -> bool {
        self.pods.iter().any(|p| !self.record.owns(p.logical_ordinal))
    }

    /// Every owned ordinal has a ready pod on the current template and
    /// nothing is left over from earlier scale-downs.
    pub fn is_converged(&self) -> bool {
        let revision = self.record.template.revision();
        !self.has_extra_pods()
            && self.record.range().all(|ordinal| {
                self.pod(ordinal)
                    .is_some_and(|p| p.is_ready() && p.revision == revision)
            })
    }

    /// Highest logical ordinal held by any pod, owned or not.
    fn highest_pod_ordinal(&self) -> Option<u32> {
        self.pods.iter().map(|p| p.logical_ordinal).max()
    }

    /// Same pool with a fresh pod listing.
    pub fn refresh(&self, pods: &[PodRecord]) -> PoolView {
        PoolView {
            record: self.record.clone(),
            role: self.role,
            pods: pods_of(&self.record, pods),
        }
    }

    pub fn summary(&self) -> PoolSummary {
        PoolSummary {
            name: self.record.name.clone(),
            generation: self.record.generation,
            role: self.role,
            fingerprint: self.record.fingerprint.clone(),
            ordinal_base: self.record.ordinal_base,
            replicas: self.record.replicas,
            ready_replicas: self.ready_count(),
        }
    }
}

fn pods_of(record: &PoolRecord, pods: &[PodRecord]) -> Vec<PodRecord> {
    let mut owned: Vec<PodRecord> = pods
        .iter()
        .filter(|p| p.pool == record.name && p.generation == record.generation)
        .cloned()
        .collect();
    owned.sort_by_key(|p| p.ordinal);
    owned
}

/// All pools of one workload, oldest first.
#[derive(Debug, Clone)]
pub struct PoolSet {
    /// Fingerprint of the desired structural spec.
    pub fingerprint: String,
    pub pools: Vec<PoolView>,
}

impl PoolSet {
    pub fn observe(workload: &GratefulSet, mut pools: Vec<PoolRecord>, pods: Vec<PodRecord>) -> Self {
        let fingerprint = workload.fingerprint();
        pools.sort_by_key(|p| p.generation);
        let newest = pools.last().map(|p| p.generation);

        let pools = pools
            .into_iter()
            .map(|record| {
                let role = if Some(record.generation) == newest && record.fingerprint == fingerprint {
                    PoolRole::Active
                } else if record.replicas > 0 {
                    PoolRole::Draining
                } else {
                    PoolRole::Retired
                };
                let pods = pods_of(&record, &pods);
                PoolView { record, role, pods }
            })
            .collect();

        Self { fingerprint, pools }
    }

    pub fn get(&self, name: &str) -> Option<&PoolView> {
        self.pools.iter().find(|p| p.record.name == name)
    }

    pub fn active(&self) -> Option<&PoolView> {
        self.pools.iter().find(|p| p.role == PoolRole::Active)
    }

    /// No pool yet, or the newest pool's structure differs from the desired one.
    pub fn needs_successor(&self) -> bool {
        self.active().is_none()
    }

    /// More than one pool exists.
    pub fn is_migrating(&self) -> bool {
        self.pools.len() > 1
    }

    /// Sum of desired replicas across pools.
    pub fn total(&self) -> u32 {
        self.pools.iter().map(|p| p.record.replicas).sum()
    }

    pub fn ready_total(&self) -> u32 {
        self.pools.iter().map(|p| p.ready_count()).sum()
    }

    /// Total the workload heads for in its current phase.
    ///
    /// A migration runs at the total recorded when the active pool was
    /// created. Any change of size, up or down, is applied once the
    /// predecessors are gone.
    pub fn migration_target(&self, desired: u32) -> u32 {
        match self.active() {
            Some(active) if self.is_migrating() => active.record.transition_total,
            _ => desired,
        }
    }

    /// First logical ordinal free for a new pool.
    pub fn next_ordinal_base(&self) -> u32 {
        self.pools
            .iter()
            .map(|p| {
                let by_range = p.record.range().end;
                let by_pods = p.highest_pod_ordinal().map_or(0, |o| o + 1);
                by_range.max(by_pods)
            })
            .max()
            .unwrap_or(0)
    }

    pub fn next_generation(&self) -> u64 {
        self.pools.last().map_or(1, |p| p.record.generation + 1)
    }

    /// A retired pool whose pods are gone and whose capacity has been
    /// replaced, if any.
    pub fn deletable(&self, desired: u32) -> Option<&PoolView> {
        if self.total() < self.migration_target(desired) {
            return None;
        }
        self.pools
            .iter()
            .find(|p| p.role == PoolRole::Retired && p.record.replicas == 0 && p.pods.is_empty())
    }

    /// The step already in flight, if any.
    ///
    /// A pool whose highest owned ordinal is not permitted is mid-step. In a
    /// draining pool that is always a retirement. In the active pool it is a
    /// scale-down while the total exceeds the target and an addition
    /// otherwise.
    pub fn in_flight(&self, ledger: &LockLedger, desired: u32) -> Option<Step> {
        let total = self.total();
        let target = self.migration_target(desired);
        self.pools.iter().find_map(|view| {
            let top = view.record.highest_ordinal()?;
            if ledger.is_permitted(top) {
                return None;
            }
            let kind = match view.role {
                PoolRole::Active if total > target => StepKind::ScaleDown,
                PoolRole::Active if self.is_migrating() => StepKind::Admit,
                PoolRole::Active => StepKind::ScaleUp,
                PoolRole::Draining | PoolRole::Retired => StepKind::Retire,
            };
            Some(Step::new(kind, view.name(), top))
        })
    }

    /// Check the structural invariants a pass relies on.
    pub fn validate(&self, ledger: &LockLedger) -> ReconcileResult<()> {
        let mut generations = HashSet::new();
        for view in &self.pools {
            if !generations.insert(view.record.generation) {
                return Err(ReconcileError::InvariantViolation(format!(
                    "generation {} appears on more than one pool",
                    view.record.generation
                )));
            }
        }

        for (i, a) in self.pools.iter().enumerate() {
            for b in &self.pools[i + 1..] {
                let (ra, rb) = (a.record.range(), b.record.range());
                if !ra.is_empty() && !rb.is_empty() && ra.start < rb.end && rb.start < ra.end {
                    return Err(ReconcileError::InvariantViolation(format!(
                        "pools {} {:?} and {} {:?} own overlapping ordinals",
                        a.name(),
                        ra,
                        b.name(),
                        rb
                    )));
                }
            }
        }

        for ordinal in ledger.permitted() {
            if !self.pools.iter().any(|p| p.record.owns(ordinal)) {
                return Err(ReconcileError::InvariantViolation(format!(
                    "ordinal {ordinal} is granted but owned by no pool"
                )));
            }
        }

        let mut ungranted_tops = 0;
        for view in &self.pools {
            let Some(top) = view.record.highest_ordinal() else {
                continue;
            };
            if let Some(hole) = (view.record.ordinal_base..top).find(|o| !ledger.is_permitted(*o)) {
                return Err(ReconcileError::InvariantViolation(format!(
                    "ordinal {hole} of pool {} is not granted below its top ordinal {top}",
                    view.name()
                )));
            }
            if !ledger.is_permitted(top) {
                ungranted_tops += 1;
            }
        }
        if ungranted_tops > 1 {
            return Err(ReconcileError::InvariantViolation(format!(
                "{ungranted_tops} pools have a scale step in flight"
            )));
        }

        Ok(())
    }

    pub fn summaries(&self) -> Vec<PoolSummary> {
        self.pools.iter().map(PoolView::summary).collect()
    }
}

/// Whether a pod marked for removal has stopped serving.
///
/// Positive confirmation is the admission gate refusing the pod; otherwise
/// the pod must be unready and the pool's ready count must have dropped.
pub fn is_settled(view: &PoolView, ordinal: u32) -> bool {
    let target_replicas = view.record.replicas.saturating_sub(1);
    match view.pod(ordinal) {
        None => true,
        Some(pod) if pod.phase == PodPhase::AdmissionDenied => true,
        Some(pod) => !pod.is_ready() && view.ready_count() <= target_replicas,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use gratefulset_state::{HookConfig, PodTemplate, PoolStatus, StructuralSpec};

    pub fn workload(replicas: u32, service: &str) -> GratefulSet {
        GratefulSet {
            id: "default/ingester".to_string(),
            namespace: "default".to_string(),
            name: "ingester".to_string(),
            replicas,
            template: PodTemplate {
                image: "ingester:1".to_string(),
                ..Default::default()
            },
            structure: StructuralSpec {
                service_name: service.to_string(),
                ..Default::default()
            },
            hooks: HookConfig::Noop,
            created_at: 0,
            updated_at: 0,
            resource_version: 0,
        }
    }

    pub fn pool(workload: &GratefulSet, generation: u64, base: u32, replicas: u32) -> PoolRecord {
        PoolRecord {
            name: format!("{}-g{generation}", workload.name),
            workload_id: workload.id.clone(),
            generation,
            fingerprint: workload.fingerprint(),
            ordinal_base: base,
            replicas,
            transition_total: 0,
            template: workload.template.clone(),
            structure: workload.structure.clone(),
            status: PoolStatus::default(),
            created_at: 0,
            resource_version: 1,
        }
    }

    pub fn pod(pool: &PoolRecord, local: u32, phase: PodPhase) -> PodRecord {
        PodRecord {
            name: format!("{}-{local}", pool.name),
            workload_id: pool.workload_id.clone(),
            pool: pool.name.clone(),
            generation: pool.generation,
            ordinal: local,
            logical_ordinal: pool.ordinal_base + local,
            phase,
            revision: pool.template.revision(),
            restart_count: 0,
            exit_requested: false,
            started_at: 0,
            updated_at: 0,
            resource_version: 1,
        }
    }

    pub fn ready_pods(pool: &PoolRecord) -> Vec<PodRecord> {
        (0..pool.replicas).map(|k| pod(pool, k, PodPhase::Ready)).collect()
    }

    fn ledger(ordinals: &[u32]) -> LockLedger {
        let mut ledger = LockLedger::new();
        for o in ordinals {
            ledger.grant(*o);
        }
        ledger
    }

    #[test]
    fn roles_follow_generation_and_fingerprint() {
        let old = workload(3, "svc-a");
        let new = workload(3, "svc-b");
        let g1 = pool(&old, 1, 0, 2);
        let g2 = pool(&new, 2, 3, 1);
        let g0 = pool(&old, 0, 0, 0);

        let set = PoolSet::observe(&new, vec![g2, g1, g0], vec![]);
        let roles: Vec<PoolRole> = set.pools.iter().map(|p| p.role).collect();
        assert_eq!(roles, vec![PoolRole::Retired, PoolRole::Draining, PoolRole::Active]);
        assert!(set.is_migrating());
        assert_eq!(set.total(), 3);

        // The newest pool is not active if its structure is stale.
        let newer = workload(3, "svc-c");
        let set = PoolSet::observe(&newer, set.pools.into_iter().map(|p| p.record).collect(), vec![]);
        assert!(set.needs_successor());
    }

    #[test]
    fn migration_target_holds_capacity_until_predecessors_are_gone() {
        let old = workload(3, "svc-a");
        let new = workload(1, "svc-b");
        let g1 = pool(&old, 1, 0, 3);
        let mut g2 = pool(&new, 2, 3, 0);
        g2.transition_total = 3;

        let set = PoolSet::observe(&new, vec![g1, g2.clone()], vec![]);
        assert_eq!(set.migration_target(1), 3);
        assert_eq!(set.migration_target(5), 3);

        let alone = PoolSet::observe(&new, vec![g2], vec![]);
        assert_eq!(alone.migration_target(1), 1);
    }

    #[test]
    fn successor_base_skips_terminating_pods() {
        let w = workload(3, "svc-a");
        let g1 = pool(&w, 1, 0, 2);
        // Ordinal 2 was just scaled away but its pod still exists.
        let mut pods = ready_pods(&g1);
        pods.push(pod(&g1, 2, PodPhase::Terminating));

        let set = PoolSet::observe(&w, vec![g1], pods);
        assert_eq!(set.next_ordinal_base(), 3);
        assert_eq!(set.next_generation(), 2);
        assert_eq!(PoolSet::observe(&w, vec![], vec![]).next_ordinal_base(), 0);
    }

    #[test]
    fn in_flight_direction_is_inferred() {
        let w = workload(2, "svc-a");
        let g1 = pool(&w, 1, 0, 3);
        let set = PoolSet::observe(&w, vec![g1.clone()], ready_pods(&g1));

        // Top revoked and total above target: scale-down.
        let step = set.in_flight(&ledger(&[0, 1]), 2).unwrap();
        assert_eq!(step, Step::new(StepKind::ScaleDown, "ingester-g1", 2));

        // Same ledger but desired total reached: an addition awaiting its grant.
        let step = set.in_flight(&ledger(&[0, 1]), 3).unwrap();
        assert_eq!(step.kind, StepKind::ScaleUp);

        assert!(set.in_flight(&ledger(&[0, 1, 2]), 2).is_none());
    }

    #[test]
    fn draining_pool_steps_are_retirements() {
        let old = workload(3, "svc-a");
        let new = workload(3, "svc-b");
        let g1 = pool(&old, 1, 0, 3);
        let mut g2 = pool(&new, 2, 3, 0);
        g2.transition_total = 3;
        let set = PoolSet::observe(&new, vec![g1, g2], vec![]);

        let step = set.in_flight(&ledger(&[0, 1]), 3).unwrap();
        assert_eq!(step, Step::new(StepKind::Retire, "ingester-g1", 2));
    }

    #[test]
    fn validate_rejects_overlapping_ranges() {
        let old = workload(3, "svc-a");
        let new = workload(3, "svc-b");
        let g1 = pool(&old, 1, 0, 3);
        let g2 = pool(&new, 2, 2, 1);
        let set = PoolSet::observe(&new, vec![g1, g2], vec![]);
        let err = set.validate(&ledger(&[0, 1, 2])).unwrap_err();
        assert!(matches!(err, ReconcileError::InvariantViolation(msg) if msg.contains("overlapping")));
    }

    #[test]
    fn validate_rejects_grant_outside_every_pool() {
        let w = workload(2, "svc-a");
        // Replicas were lowered externally while ordinal 2 was still granted.
        let g1 = pool(&w, 1, 0, 2);
        let set = PoolSet::observe(&w, vec![g1], vec![]);
        let err = set.validate(&ledger(&[0, 1, 2])).unwrap_err();
        assert!(matches!(err, ReconcileError::InvariantViolation(msg) if msg.contains("no pool")));
    }

    #[test]
    fn validate_rejects_holes_and_parallel_steps() {
        let old = workload(3, "svc-a");
        let new = workload(3, "svc-b");
        let g1 = pool(&old, 1, 0, 3);
        let set = PoolSet::observe(&old, vec![g1.clone()], vec![]);
        assert!(set.validate(&ledger(&[0, 2])).is_err());

        let g2 = pool(&new, 2, 3, 1);
        let set = PoolSet::observe(&new, vec![g1, g2], vec![]);
        assert!(set.validate(&ledger(&[0, 1])).is_err());
        assert!(set.validate(&ledger(&[0, 1, 2])).is_ok());
    }

    #[test]
    fn settled_requires_unready_target() {
        let w = workload(2, "svc-a");
        let g1 = pool(&w, 1, 0, 3);

        let set = PoolSet::observe(&w, vec![g1.clone()], ready_pods(&g1));
        assert!(!is_settled(&set.pools[0], 2));

        let mut pods = ready_pods(&g1);
        pods[2].phase = PodPhase::AdmissionDenied;
        let set = PoolSet::observe(&w, vec![g1.clone()], pods);
        assert!(is_settled(&set.pools[0], 2));

        let mut pods = ready_pods(&g1);
        pods[2].phase = PodPhase::Pending;
        let set = PoolSet::observe(&w, vec![g1], pods);
        assert!(is_settled(&set.pools[0], 2));
    }

    #[test]
    fn convergence_requires_current_revision() {
        let w = workload(2, "svc-a");
        let g1 = pool(&w, 1, 0, 2);
        let mut pods = ready_pods(&g1);
        let set = PoolSet::observe(&w, vec![g1.clone()], pods.clone());
        assert!(set.pools[0].is_converged());

        pods[1].revision = "stale".to_string();
        let set = PoolSet::observe(&w, vec![g1], pods);
        assert!(!set.pools[0].is_converged());
    }
}
