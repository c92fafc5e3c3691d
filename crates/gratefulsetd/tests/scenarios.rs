//! End-to-end scale scenarios.
//!
//! Each test drives the reconciler and the local pod-group driver in lock
//! step, one pass and one tick at a time, and checks the safety properties
//! after every step:
//!
//! - the pool total never rises above the bound of the scenario,
//! - a pool never shrinks while the removed ordinal is still granted,
//! - a pool is deleted only once it is down to zero,
//! - a pod only becomes ready when its ordinal is granted.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use gratefulset_controller::{ControllerConfig, ReconcileError, Reconciler};
use gratefulset_hooks::{DefaultHookFactory, HookContext, HookFactory, HookFuture, ScaleHook};
use gratefulset_podgroup::{DriverConfig, PodExitHook, PodGroupDriver};
use gratefulset_state::{
    Condition, GratefulSet, HookConfig, LocalSubstrate, LockLedger, PodPhase, PodRecord, PodTemplate,
    PoolRecord, StateStore, StepPhase, StructuralSpec, Substrate,
};

const ID: &str = "default/ingester";

fn workload(replicas: u32, service: &str) -> GratefulSet {
    GratefulSet {
        id: ID.to_string(),
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
        hooks: HookConfig::PodExit,
        created_at: 0,
        updated_at: 0,
        resource_version: 0,
    }
}

fn config() -> ControllerConfig {
    ControllerConfig {
        hook_timeout: Duration::from_millis(20),
        settle_timeout: Duration::from_millis(10),
        settle_poll_interval: Duration::from_millis(2),
        ..Default::default()
    }
}

fn pod_exit_hooks(substrate: &LocalSubstrate) -> Arc<dyn HookFactory> {
    Arc::new(
        DefaultHookFactory::new(Duration::from_secs(1))
            .with_pod_exit(Arc::new(PodExitHook::new(substrate.clone()))),
    )
}

struct Observed {
    pools: Vec<PoolRecord>,
    pods: Vec<PodRecord>,
    ledger: LockLedger,
}

impl Observed {
    fn total(&self) -> u32 {
        self.pools.iter().map(|p| p.replicas).sum()
    }
}

struct World {
    substrate: LocalSubstrate,
    reconciler: Reconciler,
    driver: PodGroupDriver,
}

impl World {
    fn new(substrate: LocalSubstrate) -> Self {
        let hooks = pod_exit_hooks(&substrate);
        Self::with_hooks(substrate, hooks)
    }

    fn with_hooks(substrate: LocalSubstrate, hooks: Arc<dyn HookFactory>) -> Self {
        let reconciler = Reconciler::new(Arc::new(substrate.clone()), hooks, config());
        let driver = PodGroupDriver::new(substrate.clone(), DriverConfig::default());
        Self {
            substrate,
            reconciler,
            driver,
        }
    }

    fn in_memory() -> Self {
        Self::new(LocalSubstrate::in_memory().unwrap())
    }

    fn observe(&self) -> Observed {
        let ledger = match self.substrate.get_ledger(ID).unwrap() {
            Some(doc) => LockLedger::from_document(&doc).unwrap(),
            None => LockLedger::new(),
        };
        Observed {
            pools: self.substrate.list_pools(ID).unwrap(),
            pods: self.substrate.list_pods(ID).unwrap(),
            ledger,
        }
    }

    /// One reconcile pass and one driver tick. Returns true once both
    /// were idle.
    async fn step(&self, bound: u32) -> bool {
        let before = self.observe();
        let outcome = match self.reconciler.reconcile(ID).await {
            Ok(outcome) => outcome,
            Err(e) => panic!("reconcile pass failed: {e}"),
        };
        let report = self.driver.tick().unwrap();
        check_step(&before, &self.observe(), bound);
        outcome.is_noop() && outcome.requeue_after.is_none() && report.is_idle()
    }

    /// Step until idle. Returns the sequence of distinct pool totals.
    async fn converge(&self, bound: u32) -> Vec<u32> {
        let mut totals = vec![self.observe().total()];
        for _ in 0..500 {
            let idle = self.step(bound).await;
            let total = self.observe().total();
            if totals.last() != Some(&total) {
                totals.push(total);
            }
            if idle {
                return totals;
            }
        }
        panic!("workload did not converge, totals so far: {totals:?}");
    }

    fn status(&self) -> gratefulset_state::WorkloadStatus {
        self.substrate.get_status(ID).unwrap().unwrap()
    }
}

fn check_step(before: &Observed, after: &Observed, bound: u32) {
    assert!(
        after.total() <= bound,
        "pool total {} exceeds {bound}",
        after.total()
    );

    for old in &before.pools {
        match after.pools.iter().find(|p| p.name == old.name) {
            Some(new) if new.replicas < old.replicas => {
                for ordinal in new.range().end..old.range().end {
                    assert!(
                        !after.ledger.is_permitted(ordinal),
                        "pool {} shrank while ordinal {ordinal} was still granted",
                        old.name
                    );
                }
            }
            Some(_) => {}
            None => assert_eq!(old.replicas, 0, "pool {} deleted while holding replicas", old.name),
        }
    }

    for pod in after.pods.iter().filter(|p| p.is_ready()) {
        let already_ready = before.pods.iter().any(|b| {
            b.name == pod.name && b.generation == pod.generation && b.is_ready() && b.restart_count == pod.restart_count
        });
        if !already_ready {
            assert!(
                after.ledger.is_permitted(pod.logical_ordinal),
                "pod {} became ready without a grant for ordinal {}",
                pod.name,
                pod.logical_ordinal
            );
        }
    }
}

// ── Scenarios ──────────────────────────────────────────────────

#[tokio::test]
async fn new_workload_reaches_ready() {
    let world = World::in_memory();
    world.substrate.put_workload(&workload(3, "svc-a")).unwrap();

    let totals = world.converge(3).await;
    assert_eq!(totals, vec![0, 1, 2, 3]);

    let observed = world.observe();
    assert_eq!(observed.ledger.permitted().collect::<Vec<_>>(), vec![0, 1, 2]);
    assert!(observed.pods.iter().all(|p| p.phase == PodPhase::Ready));
    let status = world.status();
    assert_eq!(status.condition, Condition::Ready);
    assert_eq!(status.ready_replicas, 3);
}

#[tokio::test]
async fn scenario_a_scale_down_without_spec_change() {
    let world = World::in_memory();
    world.substrate.put_workload(&workload(3, "svc-a")).unwrap();
    world.converge(3).await;

    world.substrate.put_workload(&workload(2, "svc-a")).unwrap();
    let totals = world.converge(3).await;
    assert_eq!(totals, vec![3, 2]);

    let observed = world.observe();
    assert_eq!(observed.pools.len(), 1);
    assert_eq!(observed.pools[0].replicas, 2);
    assert_eq!(observed.ledger.permitted().collect::<Vec<_>>(), vec![0, 1]);
    let names: Vec<&str> = observed.pods.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["ingester-g1-0", "ingester-g1-1"]);
    assert_eq!(world.status().condition, Condition::Ready);

    // Converged: further passes change nothing.
    let mut events = world.substrate.subscribe();
    for _ in 0..2 {
        let outcome = world.reconciler.reconcile(ID).await.unwrap();
        assert!(outcome.is_noop() && outcome.requeue_after.is_none());
    }
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn scenario_b_structural_change_at_constant_total() {
    let world = World::in_memory();
    world.substrate.put_workload(&workload(3, "svc-a")).unwrap();
    world.converge(3).await;

    world.substrate.put_workload(&workload(3, "svc-b")).unwrap();
    let totals = world.converge(3).await;
    // Three strict retire/admit pairs.
    assert_eq!(totals, vec![3, 2, 3, 2, 3, 2, 3]);

    let observed = world.observe();
    assert_eq!(observed.pools.len(), 1);
    let pool = &observed.pools[0];
    assert_eq!(pool.name, "ingester-g2");
    assert_eq!(pool.ordinal_base, 3);
    assert_eq!(pool.replicas, 3);
    assert_eq!(observed.ledger.permitted().collect::<Vec<_>>(), vec![3, 4, 5]);
    assert!(observed.pods.iter().all(|p| p.pool == "ingester-g2" && p.is_ready()));
    assert_eq!(world.status().condition, Condition::Ready);
}

#[tokio::test]
async fn scenario_c_structural_change_with_reduction() {
    let world = World::in_memory();
    world.substrate.put_workload(&workload(3, "svc-a")).unwrap();
    world.converge(3).await;

    world.substrate.put_workload(&workload(1, "svc-b")).unwrap();
    let totals = world.converge(3).await;
    // Full migration at the old total, then two scale-downs.
    assert_eq!(totals, vec![3, 2, 3, 2, 3, 2, 3, 2, 1]);

    let observed = world.observe();
    assert_eq!(observed.pools.len(), 1);
    assert_eq!(observed.pools[0].name, "ingester-g2");
    assert_eq!(observed.pools[0].replicas, 1);
    assert_eq!(observed.ledger.permitted().collect::<Vec<_>>(), vec![3]);
}

/// Never answers a scale-down in time.
struct UnresponsiveHook;

impl ScaleHook for UnresponsiveHook {
    fn name(&self) -> &'static str {
        "unresponsive"
    }

    fn scale_down<'a>(&'a self, _ctx: &'a HookContext) -> HookFuture<'a> {
        Box::pin(async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
    }

    fn scale_up<'a>(&'a self, _ctx: &'a HookContext) -> HookFuture<'a> {
        Box::pin(async { Ok(()) })
    }
}

struct FixedHooks(Arc<dyn ScaleHook>);

impl HookFactory for FixedHooks {
    fn hook_for(&self, _workload: &GratefulSet) -> Result<Arc<dyn ScaleHook>, gratefulset_hooks::HookError> {
        Ok(Arc::clone(&self.0))
    }
}

#[tokio::test]
async fn scenario_d_hook_timeout_keeps_the_replica() {
    let substrate = LocalSubstrate::in_memory().unwrap();
    let world = World::with_hooks(substrate, Arc::new(FixedHooks(Arc::new(UnresponsiveHook))));
    world.substrate.put_workload(&workload(2, "svc-a")).unwrap();
    world.converge(2).await;

    world.substrate.put_workload(&workload(1, "svc-a")).unwrap();
    world.reconciler.reconcile(ID).await.unwrap();
    for _ in 0..4 {
        let err = world.reconciler.reconcile(ID).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Hook { ordinal: 1, .. }), "unexpected error: {err}");
        world.driver.tick().unwrap();
    }

    let observed = world.observe();
    assert_eq!(observed.pools[0].replicas, 2);
    assert_eq!(observed.ledger.permitted().collect::<Vec<_>>(), vec![0]);
    assert!(observed.pods.iter().all(|p| p.is_ready()));

    let status = world.status();
    assert_eq!(status.condition, Condition::Stalled);
    let step = status.step.unwrap();
    assert_eq!(step.phase, StepPhase::HookInvoked);
    assert_eq!(step.ordinal, 1);
    assert_eq!(step.hook_attempts, 4);
    assert!(step.last_error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn migration_resumes_after_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gratefulset.redb");
    let open = || World::new(LocalSubstrate::new(StateStore::open(&path).unwrap()));

    {
        let world = open();
        world.substrate.put_workload(&workload(3, "svc-a")).unwrap();
        world.converge(3).await;
        world.substrate.put_workload(&workload(3, "svc-b")).unwrap();
    }

    // Restart the whole process every two steps.
    let mut converged = false;
    for _ in 0..300 {
        let world = open();
        for _ in 0..2 {
            if world.step(3).await {
                converged = true;
                break;
            }
        }
        if converged {
            break;
        }
    }
    assert!(converged, "migration did not finish across restarts");

    let world = open();
    let observed = world.observe();
    assert_eq!(observed.pools.len(), 1);
    assert_eq!(observed.pools[0].name, "ingester-g2");
    assert_eq!(observed.ledger.permitted().collect::<Vec<_>>(), vec![3, 4, 5]);
    assert_eq!(world.status().condition, Condition::Ready);
}

/// Pod-exit hook that records every call it accepted.
struct RecordingHook {
    inner: PodExitHook,
    calls: Mutex<Vec<(&'static str, u32)>>,
}

impl RecordingHook {
    fn new(substrate: &LocalSubstrate) -> Self {
        Self {
            inner: PodExitHook::new(substrate.clone()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, direction: &'static str, ordinal: u32) {
        let mut calls = self.calls.lock().unwrap();
        // A re-sent hook for the same pod counts once.
        if calls.last() != Some(&(direction, ordinal)) {
            calls.push((direction, ordinal));
        }
    }

    fn calls(&self) -> Vec<(&'static str, u32)> {
        self.calls.lock().unwrap().clone()
    }
}

impl ScaleHook for RecordingHook {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn scale_down<'a>(&'a self, ctx: &'a HookContext) -> HookFuture<'a> {
        Box::pin(async move {
            self.inner.scale_down(ctx).await?;
            self.record("down", ctx.ordinal);
            Ok(())
        })
    }

    fn scale_up<'a>(&'a self, ctx: &'a HookContext) -> HookFuture<'a> {
        Box::pin(async move {
            self.inner.scale_up(ctx).await?;
            self.record("up", ctx.ordinal);
            Ok(())
        })
    }
}

fn recorded_world() -> (World, Arc<RecordingHook>) {
    let substrate = LocalSubstrate::in_memory().unwrap();
    let hook = Arc::new(RecordingHook::new(&substrate));
    let world = World::with_hooks(substrate, Arc::new(FixedHooks(hook.clone())));
    (world, hook)
}

#[tokio::test]
async fn structural_change_after_grant_still_announces_the_ordinal() {
    let (world, hook) = recorded_world();
    world.substrate.put_workload(&workload(1, "svc-a")).unwrap();
    world.converge(1).await;
    assert_eq!(hook.calls(), vec![("up", 0)]);

    // 1 -> 2 up to the grant of ordinal 1, before its scale-up hook.
    world.substrate.put_workload(&workload(2, "svc-a")).unwrap();
    world.step(2).await;
    world.step(2).await;
    assert!(world.observe().ledger.is_permitted(1));
    assert_eq!(hook.calls(), vec![("up", 0)]);

    world.substrate.put_workload(&workload(2, "svc-b")).unwrap();
    let totals = world.converge(2).await;
    assert_eq!(totals, vec![2, 1, 2, 1, 2]);
    assert_eq!(
        hook.calls(),
        vec![
            ("up", 0),
            ("up", 1),
            ("down", 1),
            ("up", 2),
            ("down", 0),
            ("up", 3),
        ]
    );

    let observed = world.observe();
    assert_eq!(observed.pools.len(), 1);
    assert_eq!(observed.ledger.permitted().collect::<Vec<_>>(), vec![2, 3]);
    assert_eq!(world.status().condition, Condition::Ready);
}

#[tokio::test]
async fn structural_change_before_grant_retires_the_ordinal_silently() {
    let (world, hook) = recorded_world();
    world.substrate.put_workload(&workload(1, "svc-a")).unwrap();
    world.converge(1).await;

    // Replicas raised and the pod created, but ordinal 1 never granted.
    world.substrate.put_workload(&workload(2, "svc-a")).unwrap();
    world.step(2).await;
    assert_eq!(world.observe().total(), 2);
    assert!(!world.observe().ledger.is_permitted(1));

    world.substrate.put_workload(&workload(2, "svc-b")).unwrap();
    let totals = world.converge(2).await;
    assert_eq!(totals, vec![2, 1, 2, 1, 2]);
    // Ordinal 1 was never admitted, so it is neither announced nor drained.
    assert_eq!(hook.calls(), vec![("up", 0), ("up", 2), ("down", 0), ("up", 3)]);

    let observed = world.observe();
    assert_eq!(observed.pools.len(), 1);
    assert_eq!(observed.ledger.permitted().collect::<Vec<_>>(), vec![2, 3]);
}

#[tokio::test]
async fn structural_change_with_growth_migrates_before_growing() {
    let (world, hook) = recorded_world();
    world.substrate.put_workload(&workload(3, "svc-a")).unwrap();
    world.converge(3).await;
    let before = hook.calls().len();

    world.substrate.put_workload(&workload(5, "svc-b")).unwrap();
    let totals = world.converge(5).await;
    // Three retire/admit pairs at the old total, then two scale-ups.
    assert_eq!(totals, vec![3, 2, 3, 2, 3, 2, 3, 4, 5]);
    assert_eq!(
        hook.calls()[before..],
        [
            ("down", 2),
            ("up", 3),
            ("down", 1),
            ("up", 4),
            ("down", 0),
            ("up", 5),
            ("up", 6),
            ("up", 7),
        ]
    );

    let observed = world.observe();
    assert_eq!(observed.pools.len(), 1);
    assert_eq!(observed.pools[0].name, "ingester-g2");
    assert_eq!(observed.pools[0].replicas, 5);
    assert_eq!(observed.ledger.permitted().collect::<Vec<_>>(), vec![3, 4, 5, 6, 7]);
}
