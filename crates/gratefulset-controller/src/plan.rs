//! Per-pass scale decisions. Nothing here is persisted; every pass derives
//! its intent again from observed pools and the ledger.

use std::time::Duration;

use gratefulset_state::{LockLedger, StepKind};

use crate::pool::PoolSet;

/// One unit of scale work: add or remove a single ordinal of one pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub kind: StepKind,
    pub pool: String,
    pub ordinal: u32,
}

impl Step {
    pub fn new(kind: StepKind, pool: impl Into<String>, ordinal: u32) -> Self {
        Self {
            kind,
            pool: pool.into(),
            ordinal,
        }
    }
}

/// Which way the total has to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    None,
}

/// What the workload needs from this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleIntent {
    pub direction: Direction,
    /// Ordinals still to add or remove.
    pub delta: u32,
    /// Sum of desired replicas across pools.
    pub current: u32,
    /// Total the workload is heading for in this phase.
    pub target: u32,
    /// A step already under way, inferred from ledger and pools.
    pub in_flight: Option<Step>,
}

impl ScaleIntent {
    pub fn derive(pools: &PoolSet, ledger: &LockLedger, desired: u32) -> Self {
        let current = pools.total();
        let target = pools.migration_target(desired);
        let (direction, delta) = if current < target {
            (Direction::Up, target - current)
        } else if current > target {
            (Direction::Down, current - target)
        } else {
            (Direction::None, 0)
        };
        Self {
            direction,
            delta,
            current,
            target,
            in_flight: pools.in_flight(ledger, desired),
        }
    }
}

/// The single mutation a pass performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    None,
    CreateLedger,
    CreatePool { pool: String },
    DeletePool { pool: String },
    RevokeLock { ordinal: u32 },
    GrantLock { ordinal: u32 },
    SetReplicas { pool: String, from: u32, to: u32 },
    UpdateTemplate { pool: String },
}

/// Result of one reconcile pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub action: Action,
    /// Run another pass after this long. `None` waits for the next event.
    pub requeue_after: Option<Duration>,
    /// The step the pass worked on, if any.
    pub step: Option<Step>,
}

impl ReconcileOutcome {
    pub fn new(action: Action, requeue_after: Option<Duration>) -> Self {
        Self {
            action,
            requeue_after,
            step: None,
        }
    }

    /// Nothing to do until something changes.
    pub fn idle() -> Self {
        Self::new(Action::None, None)
    }

    pub fn with_step(mut self, step: &Step) -> Self {
        self.step = Some(step.clone());
        self
    }

    pub fn is_noop(&self) -> bool {
        self.action == Action::None
    }
}
