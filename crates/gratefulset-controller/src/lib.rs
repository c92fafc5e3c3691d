//! gratefulset-controller — application-aware scaling over a pod-group
//! primitive.
//!
//! The primitive (a fixed-identity, ordered pod group) removes its highest
//! pod without asking, and cannot change structural fields such as volume
//! claims in place. This crate layers a control loop on top that:
//!
//! - revokes a pod's ordinal in the lock ledger, asks the application to
//!   drain through a scale hook, and only then shrinks the pool;
//! - grows a pool, grants the new ordinal once its pod exists, and tells the
//!   application once it is ready;
//! - on a structural change, creates a successor pool and moves ordinals
//!   across one retire/admit pair at a time, never exceeding the declared
//!   total.
//!
//! # Architecture
//!
//! ```text
//!   Controller (runtime)
//!     └─ WorkQueue ─► Reconciler::reconcile(key)
//!                        ├─ PoolSet         observed pools and pods
//!                        ├─ ScaleIntent     which way, what is in flight
//!                        ├─ TransitionPlan  retire/admit order across pools
//!                        ├─ ScaleCoordinator ── LedgerWriter ── ScaleHook
//!                        └─ StatusDraft     written once per pass
//! ```

pub mod backoff;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod plan;
pub mod poll;
pub mod pool;
pub mod queue;
pub mod reconciler;
pub mod runtime;
pub mod status;
pub mod transition;

pub use backoff::{Backoff, BackoffPolicy};
pub use config::ControllerConfig;
pub use error::{ReconcileError, ReconcileResult};
pub use plan::{Action, Direction, ReconcileOutcome, ScaleIntent, Step};
pub use pool::{PoolSet, PoolView};
pub use queue::WorkQueue;
pub use reconciler::Reconciler;
pub use runtime::Controller;
pub use transition::TransitionPlan;
