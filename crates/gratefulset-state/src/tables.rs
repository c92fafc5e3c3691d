//! redb table definitions for the GratefulSet object store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).
//! Composite keys follow the pattern `{namespace}/{name}` or `{workload_id}:{child}`.

use redb::TableDefinition;

/// Logical workloads keyed by `{namespace}/{name}`.
pub const WORKLOADS: TableDefinition<&str, &[u8]> = TableDefinition::new("workloads");

/// Pools keyed by `{workload_id}:{generation:010}`.
pub const POOLS: TableDefinition<&str, &[u8]> = TableDefinition::new("pools");

/// Pods keyed by `{workload_id}:{pod_name}`.
pub const PODS: TableDefinition<&str, &[u8]> = TableDefinition::new("pods");

/// Lock ledger documents keyed by `{workload_id}`.
pub const LEDGERS: TableDefinition<&str, &[u8]> = TableDefinition::new("ledgers");

/// Workload status keyed by `{workload_id}`.
pub const STATUSES: TableDefinition<&str, &[u8]> = TableDefinition::new("statuses");
