//! StateStore — redb-backed persistence for GratefulSet objects.
//!
//! Provides typed CRUD operations over workloads, pools, pods, lock ledgers
//! and status. All values are JSON-serialized into redb's `&[u8]` value
//! columns. Pools, pods and ledgers are updated with compare-and-swap on
//! their `resource_version`; each redb write transaction is serializable, so
//! the read-compare-write inside one transaction is atomic. The store
//! supports both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(WORKLOADS).map_err(map_err!(Table))?;
        txn.open_table(POOLS).map_err(map_err!(Table))?;
        txn.open_table(PODS).map_err(map_err!(Table))?;
        txn.open_table(LEDGERS).map_err(map_err!(Table))?;
        txn.open_table(STATUSES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Workloads ──────────────────────────────────────────────────

    /// Insert or replace a workload. Desired state is last-writer-wins;
    /// the stored version is bumped on every write.
    pub fn put_workload(&self, workload: &GratefulSet) -> StateResult<GratefulSet> {
        let key = workload.table_key();
        let mut workload = workload.clone();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(WORKLOADS).map_err(map_err!(Table))?;
            let current: Option<GratefulSet> = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?)
                }
                None => None,
            };
            workload.resource_version = current.map_or(0, |w| w.resource_version) + 1;
            let value = serde_json::to_vec(&workload).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, version = workload.resource_version, "workload stored");
        Ok(workload)
    }

    /// Get a workload by `{namespace}/{name}` key.
    pub fn get_workload(&self, key: &str) -> StateResult<Option<GratefulSet>> {
        self.get_json(WORKLOADS, key)
    }

    /// List all workloads.
    pub fn list_workloads(&self) -> StateResult<Vec<GratefulSet>> {
        self.list_prefix(WORKLOADS, "")
    }

    /// Delete a workload by key. Returns true if it existed.
    pub fn delete_workload(&self, key: &str) -> StateResult<bool> {
        let existed = self.remove(WORKLOADS, key)?;
        debug!(%key, existed, "workload deleted");
        Ok(existed)
    }

    // ── Pools ──────────────────────────────────────────────────────

    /// Create a pool. Fails with `AlreadyExists` if the generation is taken.
    pub fn create_pool(&self, pool: &PoolRecord) -> StateResult<PoolRecord> {
        let created = self.insert_new(POOLS, &pool.table_key(), pool)?;
        debug!(pool = %created.name, generation = created.generation, "pool created");
        Ok(created)
    }

    /// Get a pool by its composite key.
    pub fn get_pool(&self, key: &str) -> StateResult<Option<PoolRecord>> {
        self.get_json(POOLS, key)
    }

    /// List a workload's pools, oldest generation first.
    pub fn list_pools(&self, workload_id: &str) -> StateResult<Vec<PoolRecord>> {
        self.list_prefix(POOLS, &format!("{workload_id}:"))
    }

    /// List every pool of every workload.
    pub fn list_all_pools(&self) -> StateResult<Vec<PoolRecord>> {
        self.list_prefix(POOLS, "")
    }

    /// Compare-and-swap a pool against its `resource_version`.
    pub fn update_pool(&self, pool: &PoolRecord) -> StateResult<PoolRecord> {
        self.compare_and_swap(POOLS, &pool.table_key(), pool.clone())
    }

    /// Delete a pool if its version still matches. Returns false if absent.
    pub fn delete_pool(&self, pool: &PoolRecord) -> StateResult<bool> {
        let existed =
            self.compare_and_delete::<PoolRecord>(POOLS, &pool.table_key(), pool.resource_version)?;
        debug!(pool = %pool.name, existed, "pool deleted");
        Ok(existed)
    }

    // ── Pods ───────────────────────────────────────────────────────

    /// Create a pod record.
    pub fn create_pod(&self, pod: &PodRecord) -> StateResult<PodRecord> {
        self.insert_new(PODS, &pod.table_key(), pod)
    }

    /// Get a pod by its composite key.
    pub fn get_pod(&self, key: &str) -> StateResult<Option<PodRecord>> {
        self.get_json(PODS, key)
    }

    /// Compare-and-swap a pod against its `resource_version`.
    pub fn update_pod(&self, pod: &PodRecord) -> StateResult<PodRecord> {
        self.compare_and_swap(PODS, &pod.table_key(), pod.clone())
    }

    /// List all pods of a workload, across its pools.
    pub fn list_pods(&self, workload_id: &str) -> StateResult<Vec<PodRecord>> {
        self.list_prefix(PODS, &format!("{workload_id}:"))
    }

    /// List every pod of every workload.
    pub fn list_all_pods(&self) -> StateResult<Vec<PodRecord>> {
        self.list_prefix(PODS, "")
    }

    /// Delete a pod by key. Returns true if it existed.
    pub fn delete_pod(&self, key: &str) -> StateResult<bool> {
        self.remove(PODS, key)
    }

    // ── Lock ledgers ───────────────────────────────────────────────

    /// Create a workload's ledger document.
    pub fn create_ledger(&self, doc: &LedgerDocument) -> StateResult<LedgerDocument> {
        self.insert_new(LEDGERS, &doc.workload_id, doc)
    }

    /// Get a workload's ledger document.
    pub fn get_ledger(&self, workload_id: &str) -> StateResult<Option<LedgerDocument>> {
        self.get_json(LEDGERS, workload_id)
    }

    /// Compare-and-swap a ledger document against its `resource_version`.
    pub fn update_ledger(&self, doc: &LedgerDocument) -> StateResult<LedgerDocument> {
        self.compare_and_swap(LEDGERS, &doc.workload_id, doc.clone())
    }

    /// Delete a workload's ledger. Returns true if it existed.
    pub fn delete_ledger(&self, workload_id: &str) -> StateResult<bool> {
        self.remove(LEDGERS, workload_id)
    }

    // ── Status ─────────────────────────────────────────────────────

    /// Insert or replace a workload's status.
    pub fn put_status(&self, status: &WorkloadStatus) -> StateResult<()> {
        let value = serde_json::to_vec(status).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(STATUSES).map_err(map_err!(Table))?;
            table
                .insert(status.workload_id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a workload's status.
    pub fn get_status(&self, workload_id: &str) -> StateResult<Option<WorkloadStatus>> {
        self.get_json(STATUSES, workload_id)
    }

    /// Delete a workload's status. Returns true if it existed.
    pub fn delete_status(&self, workload_id: &str) -> StateResult<bool> {
        self.remove(STATUSES, workload_id)
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn get_json<T: DeserializeOwned>(&self, table: Table, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list_prefix<T: DeserializeOwned>(&self, table: Table, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                let item: T =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(item);
            }
        }
        Ok(results)
    }

    fn insert_new<T>(&self, table: Table, key: &str, value: &T) -> StateResult<T>
    where
        T: Versioned + Serialize + Clone,
    {
        let mut value = value.clone();
        value.set_resource_version(1);
        let bytes = serde_json::to_vec(&value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let exists = {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            let exists = t.get(key).map_err(map_err!(Read))?.is_some();
            if !exists {
                t.insert(key, bytes.as_slice()).map_err(map_err!(Write))?;
            }
            exists
        };
        if exists {
            txn.abort().map_err(map_err!(Transaction))?;
            return Err(StateError::AlreadyExists(key.to_string()));
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(value)
    }

    fn compare_and_swap<T>(&self, table: Table, key: &str, mut value: T) -> StateResult<T>
    where
        T: Versioned + Serialize + DeserializeOwned,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let outcome = {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            let current: Option<T> = match t.get(key).map_err(map_err!(Read))? {
                Some(guard) => {
                    Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?)
                }
                None => None,
            };
            match current {
                None => Err(StateError::NotFound(key.to_string())),
                Some(cur) if cur.resource_version() != value.resource_version() => {
                    Err(StateError::Conflict {
                        key: key.to_string(),
                        expected: value.resource_version(),
                        found: cur.resource_version(),
                    })
                }
                Some(cur) => {
                    value.set_resource_version(cur.resource_version() + 1);
                    let bytes = serde_json::to_vec(&value).map_err(map_err!(Serialize))?;
                    t.insert(key, bytes.as_slice()).map_err(map_err!(Write))?;
                    Ok(())
                }
            }
        };
        match outcome {
            Ok(()) => {
                txn.commit().map_err(map_err!(Transaction))?;
                Ok(value)
            }
            Err(e) => {
                txn.abort().map_err(map_err!(Transaction))?;
                Err(e)
            }
        }
    }

    fn compare_and_delete<T>(&self, table: Table, key: &str, expected: u64) -> StateResult<bool>
    where
        T: Versioned + DeserializeOwned,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let outcome = {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            let current: Option<T> = match t.get(key).map_err(map_err!(Read))? {
                Some(guard) => {
                    Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?)
                }
                None => None,
            };
            match current {
                None => Ok(false),
                Some(cur) if cur.resource_version() != expected => Err(StateError::Conflict {
                    key: key.to_string(),
                    expected,
                    found: cur.resource_version(),
                }),
                Some(_) => {
                    t.remove(key).map_err(map_err!(Write))?;
                    Ok(true)
                }
            }
        };
        match outcome {
            Ok(existed) => {
                txn.commit().map_err(map_err!(Transaction))?;
                Ok(existed)
            }
            Err(e) => {
                txn.abort().map_err(map_err!(Transaction))?;
                Err(e)
            }
        }
    }

    fn remove(&self, table: Table, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            existed = t.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn test_workload(namespace: &str, name: &str) -> GratefulSet {
        GratefulSet {
            id: format!("{namespace}/{name}"),
            namespace: namespace.to_string(),
            name: name.to_string(),
            replicas: 3,
            template: PodTemplate {
                image: "ingester:1.0".to_string(),
                ..Default::default()
            },
            structure: StructuralSpec {
                service_name: name.to_string(),
                ..Default::default()
            },
            hooks: HookConfig::Noop,
            created_at: 1000,
            updated_at: 1000,
            resource_version: 0,
        }
    }

    fn test_pool(workload_id: &str, generation: u64) -> PoolRecord {
        PoolRecord {
            name: format!("ingester-g{generation}"),
            workload_id: workload_id.to_string(),
            generation,
            fingerprint: "abc".to_string(),
            ordinal_base: 0,
            replicas: 3,
            transition_total: 0,
            template: PodTemplate::default(),
            structure: StructuralSpec::default(),
            status: PoolStatus::default(),
            created_at: 1000,
            resource_version: 0,
        }
    }

    fn test_pod(workload_id: &str, ordinal: u32) -> PodRecord {
        PodRecord {
            name: format!("ingester-g1-{ordinal}"),
            workload_id: workload_id.to_string(),
            pool: "ingester-g1".to_string(),
            generation: 1,
            ordinal,
            logical_ordinal: ordinal,
            phase: PodPhase::Pending,
            revision: "r1".to_string(),
            restart_count: 0,
            exit_requested: false,
            started_at: 1000,
            updated_at: 1000,
            resource_version: 0,
        }
    }

    // ── Workloads ──────────────────────────────────────────────────

    #[test]
    fn workload_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let stored = store.put_workload(&test_workload("default", "ingester")).unwrap();
        assert_eq!(stored.resource_version, 1);

        let retrieved = store.get_workload("default/ingester").unwrap();
        assert_eq!(retrieved, Some(stored));
    }

    #[test]
    fn workload_put_bumps_version() {
        let store = StateStore::open_in_memory().unwrap();
        let mut spec = test_workload("default", "ingester");
        store.put_workload(&spec).unwrap();

        spec.replicas = 5;
        let stored = store.put_workload(&spec).unwrap();
        assert_eq!(stored.resource_version, 2);
        assert_eq!(store.get_workload("default/ingester").unwrap().unwrap().replicas, 5);
    }

    #[test]
    fn workload_list_and_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_workload(&test_workload("ns1", "a")).unwrap();
        store.put_workload(&test_workload("ns2", "b")).unwrap();
        assert_eq!(store.list_workloads().unwrap().len(), 2);

        assert!(store.delete_workload("ns1/a").unwrap());
        assert!(!store.delete_workload("ns1/a").unwrap());
        assert_eq!(store.list_workloads().unwrap().len(), 1);
    }

    // ── Pools ──────────────────────────────────────────────────────

    #[test]
    fn pool_create_rejects_duplicate_generation() {
        let store = StateStore::open_in_memory().unwrap();
        let created = store.create_pool(&test_pool("default/ingester", 1)).unwrap();
        assert_eq!(created.resource_version, 1);

        let err = store.create_pool(&test_pool("default/ingester", 1)).unwrap_err();
        assert!(matches!(err, StateError::AlreadyExists(_)));
    }

    #[test]
    fn pool_update_is_compare_and_swap() {
        let store = StateStore::open_in_memory().unwrap();
        let created = store.create_pool(&test_pool("default/ingester", 1)).unwrap();

        let mut first = created.clone();
        first.replicas = 2;
        let updated = store.update_pool(&first).unwrap();
        assert_eq!(updated.resource_version, 2);

        // A writer holding the stale version loses.
        let mut stale = created;
        stale.replicas = 4;
        let err = store.update_pool(&stale).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(
            store.get_pool(&updated.table_key()).unwrap().unwrap().replicas,
            2
        );
    }

    #[test]
    fn pools_listed_oldest_first() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_pool(&test_pool("default/ingester", 10)).unwrap();
        store.create_pool(&test_pool("default/ingester", 2)).unwrap();
        store.create_pool(&test_pool("default/other", 1)).unwrap();

        let pools = store.list_pools("default/ingester").unwrap();
        let generations: Vec<u64> = pools.iter().map(|p| p.generation).collect();
        assert_eq!(generations, vec![2, 10]);
        assert_eq!(store.list_all_pools().unwrap().len(), 3);
    }

    #[test]
    fn pool_delete_checks_version() {
        let store = StateStore::open_in_memory().unwrap();
        let created = store.create_pool(&test_pool("default/ingester", 1)).unwrap();
        let mut bumped = created.clone();
        bumped.replicas = 0;
        store.update_pool(&bumped).unwrap();

        assert!(store.delete_pool(&created).unwrap_err().is_conflict());
        let current = store.get_pool(&created.table_key()).unwrap().unwrap();
        assert!(store.delete_pool(&current).unwrap());
        assert!(!store.delete_pool(&current).unwrap());
    }

    // ── Pods ───────────────────────────────────────────────────────

    #[test]
    fn pod_crud() {
        let store = StateStore::open_in_memory().unwrap();
        let pod = store.create_pod(&test_pod("default/ingester", 0)).unwrap();
        store.create_pod(&test_pod("default/ingester", 1)).unwrap();
        store.create_pod(&test_pod("default/other", 0)).unwrap();

        let mut ready = pod.clone();
        ready.phase = PodPhase::Ready;
        store.update_pod(&ready).unwrap();
        assert!(store.update_pod(&ready).unwrap_err().is_conflict());

        assert_eq!(store.list_pods("default/ingester").unwrap().len(), 2);
        assert!(store.delete_pod(&pod.table_key()).unwrap());
        assert_eq!(store.list_pods("default/ingester").unwrap().len(), 1);
        assert_eq!(store.list_all_pods().unwrap().len(), 2);
    }

    // ── Ledgers ────────────────────────────────────────────────────

    #[test]
    fn ledger_update_is_compare_and_swap() {
        let store = StateStore::open_in_memory().unwrap();
        let doc = store
            .create_ledger(&LedgerDocument {
                workload_id: "default/ingester".to_string(),
                ..Default::default()
            })
            .unwrap();

        let mut granted = doc.clone();
        granted.data = BTreeMap::from([("0".to_string(), true)]);
        let granted = store.update_ledger(&granted).unwrap();
        assert_eq!(granted.resource_version, 2);

        assert!(store.update_ledger(&doc).unwrap_err().is_conflict());
        assert!(store.create_ledger(&doc).is_err());
    }

    #[test]
    fn update_missing_record_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store.update_pool(&test_pool("default/ingester", 1)).unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    // ── Status ─────────────────────────────────────────────────────

    #[test]
    fn status_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let status = WorkloadStatus {
            workload_id: "default/ingester".to_string(),
            desired_replicas: 3,
            condition: Condition::Paused {
                reason: "overlapping pools".to_string(),
            },
            ..Default::default()
        };
        store.put_status(&status).unwrap();
        assert_eq!(store.get_status("default/ingester").unwrap(), Some(status));
        assert!(store.delete_status("default/ingester").unwrap());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_workload(&test_workload("prod", "ingester")).unwrap();
            store.create_pool(&test_pool("prod/ingester", 1)).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        assert!(store.get_workload("prod/ingester").unwrap().is_some());
        assert_eq!(store.list_pools("prod/ingester").unwrap().len(), 1);
    }

    // ── Types ──────────────────────────────────────────────────────

    #[test]
    fn fingerprint_tracks_structural_fields_only() {
        let a = test_workload("default", "ingester");
        let mut b = a.clone();
        b.replicas = 7;
        b.template.image = "ingester:2.0".to_string();
        assert_eq!(a.fingerprint(), b.fingerprint());

        b.structure.volume_claims.push(VolumeClaimTemplate {
            name: "data".to_string(),
            storage_class: None,
            size: "10Gi".to_string(),
            access_modes: vec!["ReadWriteOnce".to_string()],
        });
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 10);
    }

    #[test]
    fn pool_ordinal_range() {
        let mut pool = test_pool("default/ingester", 2);
        pool.ordinal_base = 3;
        pool.replicas = 2;
        assert_eq!(pool.range(), 3..5);
        assert_eq!(pool.highest_ordinal(), Some(4));
        assert_eq!(pool.pod_name(4), "ingester-g2-1");
        assert!(pool.owns(3));
        assert!(!pool.owns(5));

        pool.replicas = 0;
        assert_eq!(pool.highest_ordinal(), None);
    }
}
