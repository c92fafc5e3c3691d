//! Pool transition manager — moves ordinals from predecessor pools into a
//! successor when the structural spec changes.
//!
//! ```text
//!   g1 (draining) [0 1 2]      g2 (active) []          total 3, target 3
//!   retire 2  ─► [0 1]          admit 3 ─► [3]          3 ─► 2 ─► 3
//!   retire 1  ─► [0]            admit 4 ─► [3 4]
//!   retire 0  ─► []             admit 5 ─► [3 4 5]
//!   delete g1
//! ```
//!
//! One step per pass. A retirement always comes first for a unit of
//! capacity, so the total never rises above the migration target. The
//! migration runs at the total the successor was created at; growth and
//! reduction wait until the predecessors are deleted.

use gratefulset_state::{GratefulSet, PoolRecord, PoolRole, PoolStatus, StepKind, Substrate};
use tracing::info;

use crate::error::ReconcileResult;
use crate::plan::Step;
use crate::pool::PoolSet;

/// Ordered retire/admit steps that would finish the current migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPlan {
    /// Total the migration runs at.
    pub target: u32,
    pub steps: Vec<Step>,
}

impl TransitionPlan {
    /// Derive the remaining migration from observed pools.
    pub fn derive(pools: &PoolSet, desired: u32) -> Self {
        let target = pools.migration_target(desired);
        let Some(active) = pools.active() else {
            return Self {
                target,
                steps: Vec::new(),
            };
        };

        // (name, base, replicas) of each draining pool, oldest first.
        let mut draining: Vec<(String, u32, u32)> = pools
            .pools
            .iter()
            .filter(|p| p.role == PoolRole::Draining && p.record.replicas > 0)
            .map(|p| (p.record.name.clone(), p.record.ordinal_base, p.record.replicas))
            .collect();

        let mut total = pools.total();
        let mut next = active.next_ordinal();
        let mut steps = Vec::new();
        loop {
            if total >= target {
                let Some((name, base, replicas)) = draining.iter_mut().find(|d| d.2 > 0) else {
                    break;
                };
                *replicas -= 1;
                steps.push(Step::new(StepKind::Retire, name.as_str(), *base + *replicas));
                total -= 1;
            } else {
                steps.push(Step::new(StepKind::Admit, active.name(), next));
                next += 1;
                total += 1;
            }
        }

        Self { target, steps }
    }

    pub fn first(&self) -> Option<&Step> {
        self.steps.first()
    }

    pub fn is_complete(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Record for the pool that will replace the current ones.
pub fn successor(workload: &GratefulSet, pools: &PoolSet, now: u64) -> PoolRecord {
    let generation = pools.next_generation();
    PoolRecord {
        name: format!("{}-g{generation}", workload.name),
        workload_id: workload.id.clone(),
        generation,
        fingerprint: workload.fingerprint(),
        ordinal_base: pools.next_ordinal_base(),
        replicas: 0,
        transition_total: pools.total(),
        template: workload.template.clone(),
        structure: workload.structure.clone(),
        status: PoolStatus::default(),
        created_at: now,
        resource_version: 0,
    }
}

/// Create the successor pool. Returns its name.
pub fn create_successor(
    substrate: &dyn Substrate,
    workload: &GratefulSet,
    pools: &PoolSet,
    now: u64,
) -> ReconcileResult<String> {
    let record = successor(workload, pools, now);
    let created = substrate.create_pool(&record)?;
    info!(
        workload = %workload.id,
        pool = %created.name,
        generation = created.generation,
        ordinal_base = created.ordinal_base,
        transition_total = created.transition_total,
        fingerprint = %created.fingerprint,
        "successor pool created"
    );
    Ok(created.name)
}

/// Delete a retired pool. Returns false if it was already gone.
pub fn delete_retired(substrate: &dyn Substrate, record: &PoolRecord) -> ReconcileResult<bool> {
    let existed = substrate.delete_pool(record)?;
    if existed {
        info!(workload = %record.workload_id, pool = %record.name, "retired pool deleted");
    }
    Ok(existed)
}
