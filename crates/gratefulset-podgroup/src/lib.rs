//! gratefulset-podgroup — a local stand-in for the ordered pod-group
//! primitive.
//!
//! The driver owns pod records the way the real primitive owns pods. Each
//! tick it converges every pool towards its record:
//!
//! - pods are created in ordinal order, each only once its predecessors are
//!   ready (`OrderedReady`), or all at once (`Parallel`);
//! - surplus pods are removed highest ordinal first;
//! - every pod start runs the admission gate against the workload's lock
//!   ledger, so a revoked ordinal comes back as `AdmissionDenied`;
//! - a pod asked to exit restarts, and so runs the gate again;
//! - template changes roll through the pool one pod at a time, highest
//!   ordinal first.
//!
//! # Architecture
//!
//! ```text
//! PodGroupDriver::tick
//!   ├── LocalSubstrate (read pools + ledgers, write pods + pool status)
//!   └── gratefulset_gate::decide (per pod start)
//!
//! PodExitHook ── sets `exit_requested`, picked up by the next tick
//! ```

pub mod driver;
pub mod error;
pub mod exit;

pub use driver::{DriverConfig, PodGroupDriver, TickReport};
pub use error::{PodGroupError, PodGroupResult};
pub use exit::PodExitHook;
