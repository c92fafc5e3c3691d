//! Domain types for the GratefulSet object store.
//!
//! These types represent the desired state of logical workloads and the
//! observed state of the pools, pods, lock ledgers and status records that
//! realise them. All types are serializable to/from JSON for storage in
//! redb tables.

use std::collections::BTreeMap;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Unique identifier for a logical workload (`{namespace}/{name}`).
pub type WorkloadId = String;

/// Number of hex characters kept from a structural fingerprint.
const FINGERPRINT_LEN: usize = 10;

/// Records mutated under optimistic concurrency.
pub trait Versioned {
    fn resource_version(&self) -> u64;
    fn set_resource_version(&mut self, version: u64);
}

macro_rules! versioned {
    ($($ty:ty),* $(,)?) => {
        $(impl Versioned for $ty {
            fn resource_version(&self) -> u64 {
                self.resource_version
            }
            fn set_resource_version(&mut self, version: u64) {
                self.resource_version = version;
            }
        })*
    };
}

// ── Workload ──────────────────────────────────────────────────────

/// Desired state of one logical workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GratefulSet {
    pub id: WorkloadId,
    pub namespace: String,
    pub name: String,
    /// Target replica count across all pools.
    pub replicas: u32,
    /// Pod template. Changes roll through the active pool in place.
    pub template: PodTemplate,
    /// Fields the pod-group primitive cannot mutate. Changes require a new pool.
    pub structure: StructuralSpec,
    /// Which scale hook implementation to invoke.
    #[serde(default)]
    pub hooks: HookConfig,
    pub created_at: u64,
    pub updated_at: u64,
    #[serde(default)]
    pub resource_version: u64,
}

/// Mutable part of the pod specification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PodTemplate {
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Immutable part of the pod-group specification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StructuralSpec {
    /// Governing service; pods resolve as `{pod}.{service_name}`.
    pub service_name: String,
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
    #[serde(default)]
    pub pod_management_policy: PodManagementPolicy,
    #[serde(default)]
    pub volume_claims: Vec<VolumeClaimTemplate>,
}

/// How the pod-group primitive orders pod creation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PodManagementPolicy {
    /// Pod `k` is created only once pods `0..k` are ready.
    #[default]
    OrderedReady,
    /// Pods are created without waiting for their predecessors.
    Parallel,
}

/// Persistent volume claim attached to every pod of a pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolumeClaimTemplate {
    pub name: String,
    #[serde(default)]
    pub storage_class: Option<String>,
    /// Requested size, e.g. `"10Gi"`.
    pub size: String,
    #[serde(default)]
    pub access_modes: Vec<String>,
}

/// Scale hook selection for a workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HookConfig {
    /// Accept every scale transition without contacting the application.
    #[default]
    Noop,
    /// POST to an endpoint on the pod being scaled.
    Http {
        port: u16,
        scale_down_path: String,
        #[serde(default)]
        scale_up_path: Option<String>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    /// Ask the local pod-group driver to stop the pod's process.
    PodExit,
}

impl GratefulSet {
    /// Build the composite key for the workloads table.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Structural fingerprint of the desired spec.
    pub fn fingerprint(&self) -> String {
        self.structure.fingerprint()
    }
}

impl StructuralSpec {
    /// Hash the immutable fields into a short hex fingerprint.
    ///
    /// Two specs with the same fingerprint can share a pool.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        feed(&mut hasher, "service", &self.service_name);
        for (k, v) in &self.selector {
            feed(&mut hasher, "selector", k);
            feed(&mut hasher, "selector-value", v);
        }
        let policy = match self.pod_management_policy {
            PodManagementPolicy::OrderedReady => "ordered_ready",
            PodManagementPolicy::Parallel => "parallel",
        };
        feed(&mut hasher, "policy", policy);
        for claim in &self.volume_claims {
            feed(&mut hasher, "claim", &claim.name);
            feed(
                &mut hasher,
                "storage-class",
                claim.storage_class.as_deref().unwrap_or(""),
            );
            feed(&mut hasher, "size", &claim.size);
            for mode in &claim.access_modes {
                feed(&mut hasher, "access-mode", mode);
            }
        }
        let mut digest = hex::encode(hasher.finalize());
        digest.truncate(FINGERPRINT_LEN);
        digest
    }
}

impl PodTemplate {
    /// Digest of the template, used to detect pods running an outdated revision.
    pub fn revision(&self) -> String {
        let mut hasher = Sha256::new();
        feed(&mut hasher, "image", &self.image);
        for arg in &self.command {
            feed(&mut hasher, "command", arg);
        }
        for (k, v) in &self.env {
            feed(&mut hasher, "env", k);
            feed(&mut hasher, "env-value", v);
        }
        for (k, v) in &self.labels {
            feed(&mut hasher, "label", k);
            feed(&mut hasher, "label-value", v);
        }
        let mut digest = hex::encode(hasher.finalize());
        digest.truncate(FINGERPRINT_LEN);
        digest
    }
}

/// Length-prefixed, tagged write so adjacent fields cannot alias.
fn feed(hasher: &mut Sha256, tag: &str, value: &str) {
    hasher.update(tag.as_bytes());
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

// ── Pool ──────────────────────────────────────────────────────────

/// One underlying pod group realising part of a logical workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolRecord {
    /// `{workload-name}-g{generation}`.
    pub name: String,
    pub workload_id: WorkloadId,
    /// Monotonically increasing per workload. Only the newest pool may be active.
    pub generation: u64,
    /// Fingerprint of `structure`.
    pub fingerprint: String,
    /// Logical ordinal of this pool's pod 0.
    pub ordinal_base: u32,
    /// Desired pod count; the pool owns `[ordinal_base, ordinal_base + replicas)`.
    pub replicas: u32,
    /// Workload total when the pool was created. A migration into this
    /// pool is carried out at this capacity.
    pub transition_total: u32,
    pub template: PodTemplate,
    pub structure: StructuralSpec,
    #[serde(default)]
    pub status: PoolStatus,
    pub created_at: u64,
    #[serde(default)]
    pub resource_version: u64,
}

/// Observed state of a pool, maintained by the pod-group driver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PoolStatus {
    /// Pods that currently exist.
    pub replicas: u32,
    /// Pods that are ready.
    pub ready_replicas: u32,
    /// Pods running the current template revision.
    #[serde(default)]
    pub updated_replicas: u32,
}

impl PoolRecord {
    /// Build the composite key for the pools table.
    pub fn table_key(&self) -> String {
        pool_key(&self.workload_id, self.generation)
    }

    /// Logical ordinals this pool currently owns.
    pub fn range(&self) -> Range<u32> {
        self.ordinal_base..self.ordinal_base + self.replicas
    }

    /// Highest owned logical ordinal, if any.
    pub fn highest_ordinal(&self) -> Option<u32> {
        self.replicas
            .checked_sub(1)
            .map(|top| self.ordinal_base + top)
    }

    /// Whether this pool owns the given logical ordinal.
    pub fn owns(&self, ordinal: u32) -> bool {
        self.range().contains(&ordinal)
    }

    /// Stable pod name for a logical ordinal owned by this pool.
    pub fn pod_name(&self, ordinal: u32) -> String {
        format!("{}-{}", self.name, ordinal.saturating_sub(self.ordinal_base))
    }
}

/// Composite key for a pool.
pub fn pool_key(workload_id: &str, generation: u64) -> String {
    format!("{workload_id}:{generation:010}")
}

// ── Pod ───────────────────────────────────────────────────────────

/// Observed state of a single pod of a pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PodRecord {
    /// `{pool}-{local ordinal}`.
    pub name: String,
    pub workload_id: WorkloadId,
    pub pool: String,
    pub generation: u64,
    /// Ordinal within the pool.
    pub ordinal: u32,
    /// Ordinal within the logical workload.
    pub logical_ordinal: u32,
    pub phase: PodPhase,
    /// Template revision this pod was started from.
    pub revision: String,
    pub restart_count: u32,
    /// Set when the application has been asked to exit.
    #[serde(default)]
    pub exit_requested: bool,
    pub started_at: u64,
    pub updated_at: u64,
    #[serde(default)]
    pub resource_version: u64,
}

/// Lifecycle phase of a pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PodPhase {
    /// Created, admission gate not yet run.
    Pending,
    /// Admitted and serving.
    Ready,
    /// The admission gate refused to start the application. Retried on restart.
    AdmissionDenied,
    /// Being removed by the pod-group primitive.
    Terminating,
}

impl PodRecord {
    /// Build the composite key for the pods table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.workload_id, self.name)
    }

    pub fn is_ready(&self) -> bool {
        self.phase == PodPhase::Ready
    }
}

// ── Lock ledger ───────────────────────────────────────────────────

/// Stored form of a workload's lock ledger.
///
/// `data` is a flat mapping from stringified logical ordinal to a
/// permitted flag; see [`crate::LockLedger`] for the decoded view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LedgerDocument {
    pub workload_id: WorkloadId,
    pub data: BTreeMap<String, bool>,
    pub updated_at: u64,
    #[serde(default)]
    pub resource_version: u64,
}

// ── Status ────────────────────────────────────────────────────────

/// Status subresource of a logical workload, written by the reconciler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WorkloadStatus {
    pub workload_id: WorkloadId,
    pub desired_replicas: u32,
    /// Sum of desired replicas across pools.
    pub replicas: u32,
    pub ready_replicas: u32,
    pub observed_fingerprint: String,
    pub pools: Vec<PoolSummary>,
    /// The scale step in flight, if any.
    pub step: Option<StepStatus>,
    pub condition: Condition,
    #[serde(default)]
    pub message: Option<String>,
    pub updated_at: u64,
}

/// Role of a pool within its workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolRole {
    /// Newest pool with the desired fingerprint; accepts new ordinals.
    Active,
    /// Older pool that still holds ordinals; only shrinks.
    Draining,
    /// Older pool at zero replicas, eligible for deletion.
    Retired,
}

/// Per-pool line of the workload status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolSummary {
    pub name: String,
    pub generation: u64,
    pub role: PoolRole,
    pub fingerprint: String,
    pub ordinal_base: u32,
    pub replicas: u32,
    pub ready_replicas: u32,
}

/// Which sequence a scale step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Remove the highest ordinal of the active pool.
    ScaleDown,
    /// Add an ordinal to the active pool.
    ScaleUp,
    /// Remove the highest ordinal of a draining pool during a migration.
    Retire,
    /// Add an ordinal to the successor pool during a migration.
    Admit,
}

impl StepKind {
    /// Whether the step removes capacity.
    pub fn is_down(self) -> bool {
        matches!(self, StepKind::ScaleDown | StepKind::Retire)
    }
}

/// Position of a scale step within its sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    Initiated,
    LockRevoked,
    HookInvoked,
    AwaitingSettle,
    ReplicasIncremented,
    LockGranted,
    AwaitingReady,
    Done,
}

/// Scale step progress as reported in the workload status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepStatus {
    pub kind: StepKind,
    pub pool: String,
    pub ordinal: u32,
    pub phase: StepPhase,
    pub started_at: u64,
    #[serde(default)]
    pub elapsed_secs: u64,
    #[serde(default)]
    pub hook_attempts: u32,
    #[serde(default)]
    pub hook_accepted_at: Option<u64>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl StepStatus {
    /// Whether this record describes the same unit of work as `other`.
    pub fn same_step(&self, other: &StepStatus) -> bool {
        self.kind == other.kind && self.pool == other.pool && self.ordinal == other.ordinal
    }
}

/// Summary condition of a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Desired state reached.
    Ready,
    /// A scale step or migration is advancing.
    #[default]
    Progressing,
    /// A scale step is retrying a failing hook.
    Stalled,
    /// Observed state violates an invariant; reconciliation is paused.
    Paused { reason: String },
}

versioned!(GratefulSet, PoolRecord, PodRecord, LedgerDocument);
