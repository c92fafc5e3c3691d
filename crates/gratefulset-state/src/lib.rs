//! gratefulset-state — object store and substrate seam for GratefulSet.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for logical workloads, pools (pod groups), pods, lock ledgers and
//! workload status.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{namespace}/{name}`, `{workload_id}:{generation}`) enable
//! prefix scans for the records owned by one workload.
//!
//! Every record that is mutated concurrently carries a `resource_version`.
//! Updates are compare-and-swap: a write whose version does not match the
//! stored one fails with [`StateError::Conflict`] and the caller re-reads.
//!
//! The [`Substrate`] trait is the seam the controller talks through.
//! [`LocalSubstrate`] implements it over a [`StateStore`] and publishes a
//! [`ChangeEvent`] for every write so controllers can watch for changes.

pub mod error;
pub mod ledger;
pub mod store;
pub mod substrate;
pub mod tables;
pub mod types;

use std::time::{SystemTime, UNIX_EPOCH};

pub use error::{StateError, StateResult};
pub use ledger::LockLedger;
pub use store::StateStore;
pub use substrate::{ChangeEvent, LocalSubstrate, ResourceKind, Substrate};
pub use types::*;

/// Seconds since the Unix epoch.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
