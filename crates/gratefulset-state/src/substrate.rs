//! The substrate seam — how the controller observes and mutates the world.
//!
//! [`Substrate`] exposes exactly the reads and conditional writes the
//! reconciler needs: workloads, pools, pods, the lock ledger and status.
//! Pool and ledger writes are compare-and-swap on `resource_version`.
//!
//! [`LocalSubstrate`] implements the trait over a [`StateStore`] and
//! broadcasts a [`ChangeEvent`] after every successful write. It also carries
//! the writes only the pod-group driver and the API perform (pods, workload
//! desired state).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::StateResult;
use crate::store::StateStore;
use crate::types::*;

/// Buffered change events per subscriber before lagging.
const EVENT_CAPACITY: usize = 1024;

/// Kind of object a change event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Workload,
    Pool,
    Pod,
    Ledger,
    Status,
}

/// Notification that an object owned by a workload changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ResourceKind,
    pub workload_id: WorkloadId,
    pub name: String,
    pub deleted: bool,
}

/// Read and conditional-write access to workload state.
pub trait Substrate: Send + Sync {
    fn get_workload(&self, workload_id: &str) -> StateResult<Option<GratefulSet>>;
    fn list_workloads(&self) -> StateResult<Vec<GratefulSet>>;

    /// Pools of a workload, oldest generation first.
    fn list_pools(&self, workload_id: &str) -> StateResult<Vec<PoolRecord>>;
    fn create_pool(&self, pool: &PoolRecord) -> StateResult<PoolRecord>;
    fn update_pool(&self, pool: &PoolRecord) -> StateResult<PoolRecord>;
    fn delete_pool(&self, pool: &PoolRecord) -> StateResult<bool>;

    fn list_pods(&self, workload_id: &str) -> StateResult<Vec<PodRecord>>;

    fn get_ledger(&self, workload_id: &str) -> StateResult<Option<LedgerDocument>>;
    fn create_ledger(&self, doc: &LedgerDocument) -> StateResult<LedgerDocument>;
    fn update_ledger(&self, doc: &LedgerDocument) -> StateResult<LedgerDocument>;

    fn get_status(&self, workload_id: &str) -> StateResult<Option<WorkloadStatus>>;
    fn put_status(&self, status: &WorkloadStatus) -> StateResult<()>;

    /// Subscribe to change notifications for all workloads.
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;
}

/// [`Substrate`] over a local [`StateStore`].
#[derive(Clone)]
pub struct LocalSubstrate {
    store: StateStore,
    events: broadcast::Sender<ChangeEvent>,
}

impl LocalSubstrate {
    pub fn new(store: StateStore) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { store, events }
    }

    /// Substrate over a fresh in-memory store.
    pub fn in_memory() -> StateResult<Self> {
        Ok(Self::new(StateStore::open_in_memory()?))
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    fn publish(&self, kind: ResourceKind, workload_id: &str, name: &str, deleted: bool) {
        // No receivers is fine.
        let _ = self.events.send(ChangeEvent {
            kind,
            workload_id: workload_id.to_string(),
            name: name.to_string(),
            deleted,
        });
    }

    // ── Desired state ──────────────────────────────────────────────

    pub fn put_workload(&self, workload: &GratefulSet) -> StateResult<GratefulSet> {
        let stored = self.store.put_workload(workload)?;
        self.publish(ResourceKind::Workload, &stored.id, &stored.name, false);
        Ok(stored)
    }

    /// Delete a workload together with its pools, pods, ledger and status.
    pub fn delete_workload(&self, workload_id: &str) -> StateResult<bool> {
        for pod in self.store.list_pods(workload_id)? {
            self.store.delete_pod(&pod.table_key())?;
        }
        for pool in self.store.list_pools(workload_id)? {
            let key = pool.table_key();
            // Re-read so a concurrent status write does not fail the cascade.
            if let Some(current) = self.store.get_pool(&key)? {
                self.store.delete_pool(&current)?;
            }
        }
        self.store.delete_ledger(workload_id)?;
        self.store.delete_status(workload_id)?;
        let existed = self.store.delete_workload(workload_id)?;
        debug!(workload = %workload_id, existed, "workload and owned objects deleted");
        self.publish(ResourceKind::Workload, workload_id, workload_id, true);
        Ok(existed)
    }

    // ── Pod-group driver writes ────────────────────────────────────

    pub fn list_all_pools(&self) -> StateResult<Vec<PoolRecord>> {
        self.store.list_all_pools()
    }

    pub fn get_pod(&self, key: &str) -> StateResult<Option<PodRecord>> {
        self.store.get_pod(key)
    }

    pub fn create_pod(&self, pod: &PodRecord) -> StateResult<PodRecord> {
        let created = self.store.create_pod(pod)?;
        self.publish(ResourceKind::Pod, &created.workload_id, &created.name, false);
        Ok(created)
    }

    pub fn update_pod(&self, pod: &PodRecord) -> StateResult<PodRecord> {
        let updated = self.store.update_pod(pod)?;
        self.publish(ResourceKind::Pod, &updated.workload_id, &updated.name, false);
        Ok(updated)
    }

    pub fn delete_pod(&self, pod: &PodRecord) -> StateResult<bool> {
        let existed = self.store.delete_pod(&pod.table_key())?;
        if existed {
            self.publish(ResourceKind::Pod, &pod.workload_id, &pod.name, true);
        }
        Ok(existed)
    }
}

impl Substrate for LocalSubstrate {
    fn get_workload(&self, workload_id: &str) -> StateResult<Option<GratefulSet>> {
        self.store.get_workload(workload_id)
    }

    fn list_workloads(&self) -> StateResult<Vec<GratefulSet>> {
        self.store.list_workloads()
    }

    fn list_pools(&self, workload_id: &str) -> StateResult<Vec<PoolRecord>> {
        self.store.list_pools(workload_id)
    }

    fn create_pool(&self, pool: &PoolRecord) -> StateResult<PoolRecord> {
        let created = self.store.create_pool(pool)?;
        self.publish(ResourceKind::Pool, &created.workload_id, &created.name, false);
        Ok(created)
    }

    fn update_pool(&self, pool: &PoolRecord) -> StateResult<PoolRecord> {
        let updated = self.store.update_pool(pool)?;
        self.publish(ResourceKind::Pool, &updated.workload_id, &updated.name, false);
        Ok(updated)
    }

    fn delete_pool(&self, pool: &PoolRecord) -> StateResult<bool> {
        let existed = self.store.delete_pool(pool)?;
        if existed {
            self.publish(ResourceKind::Pool, &pool.workload_id, &pool.name, true);
        }
        Ok(existed)
    }

    fn list_pods(&self, workload_id: &str) -> StateResult<Vec<PodRecord>> {
        self.store.list_pods(workload_id)
    }

    fn get_ledger(&self, workload_id: &str) -> StateResult<Option<LedgerDocument>> {
        self.store.get_ledger(workload_id)
    }

    fn create_ledger(&self, doc: &LedgerDocument) -> StateResult<LedgerDocument> {
        let created = self.store.create_ledger(doc)?;
        self.publish(ResourceKind::Ledger, &created.workload_id, "ledger", false);
        Ok(created)
    }

    fn update_ledger(&self, doc: &LedgerDocument) -> StateResult<LedgerDocument> {
        let updated = self.store.update_ledger(doc)?;
        self.publish(ResourceKind::Ledger, &updated.workload_id, "ledger", false);
        Ok(updated)
    }

    fn get_status(&self, workload_id: &str) -> StateResult<Option<WorkloadStatus>> {
        self.store.get_status(workload_id)
    }

    fn put_status(&self, status: &WorkloadStatus) -> StateResult<()> {
        self.store.put_status(status)?;
        self.publish(ResourceKind::Status, &status.workload_id, "status", false);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workload() -> GratefulSet {
        GratefulSet {
            id: "default/ingester".to_string(),
            namespace: "default".to_string(),
            name: "ingester".to_string(),
            replicas: 2,
            template: PodTemplate::default(),
            structure: StructuralSpec::default(),
            hooks: HookConfig::Noop,
            created_at: 0,
            updated_at: 0,
            resource_version: 0,
        }
    }

    fn pool(generation: u64) -> PoolRecord {
        PoolRecord {
            name: format!("ingester-g{generation}"),
            workload_id: "default/ingester".to_string(),
            generation,
            fingerprint: "f".to_string(),
            ordinal_base: 0,
            replicas: 1,
            transition_total: 0,
            template: PodTemplate::default(),
            structure: StructuralSpec::default(),
            status: PoolStatus::default(),
            created_at: 0,
            resource_version: 0,
        }
    }

    #[tokio::test]
    async fn writes_publish_change_events() {
        let substrate = LocalSubstrate::in_memory().unwrap();
        let mut events = substrate.subscribe();

        substrate.put_workload(&workload()).unwrap();
        let created = substrate.create_pool(&pool(1)).unwrap();
        substrate.update_pool(&created).unwrap();

        let first = events.recv().await.unwrap();
        assert_eq!(first.kind, ResourceKind::Workload);
        assert_eq!(first.workload_id, "default/ingester");
        assert_eq!(events.recv().await.unwrap().kind, ResourceKind::Pool);
        assert_eq!(events.recv().await.unwrap().kind, ResourceKind::Pool);
    }

    #[tokio::test]
    async fn failed_write_publishes_nothing() {
        let substrate = LocalSubstrate::in_memory().unwrap();
        let created = substrate.create_pool(&pool(1)).unwrap();
        substrate.update_pool(&created).unwrap();

        let mut events = substrate.subscribe();
        assert!(substrate.update_pool(&created).unwrap_err().is_conflict());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn delete_workload_cascades() {
        let substrate = LocalSubstrate::in_memory().unwrap();
        substrate.put_workload(&workload()).unwrap();
        substrate.create_pool(&pool(1)).unwrap();
        substrate.create_pool(&pool(2)).unwrap();
        substrate
            .create_ledger(&LedgerDocument {
                workload_id: "default/ingester".to_string(),
                ..Default::default()
            })
            .unwrap();

        assert!(substrate.delete_workload("default/ingester").unwrap());
        assert!(substrate.list_pools("default/ingester").unwrap().is_empty());
        assert!(substrate.get_ledger("default/ingester").unwrap().is_none());
        assert!(substrate.get_workload("default/ingester").unwrap().is_none());
    }
}
