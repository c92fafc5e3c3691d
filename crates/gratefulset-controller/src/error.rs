//! Error taxonomy for reconcile passes.
//!
//! Each variant maps to one requeue policy in the runtime: conflicts retry
//! immediately from a fresh read, transient and hook failures back off,
//! invariant violations and codec failures pause the workload.

use gratefulset_hooks::HookError;
use gratefulset_state::StateError;
use thiserror::Error;

/// Result type alias for reconcile operations.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Substrate unavailable or I/O failure.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Optimistic-concurrency conflict; re-read and recompute.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A scale hook failed or timed out; the step stays where it is.
    #[error("{direction} hook for ordinal {ordinal} failed: {source}")]
    Hook {
        direction: &'static str,
        ordinal: u32,
        #[source]
        source: HookError,
    },

    /// Observed state breaks a structural invariant. Needs an operator.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// A stored document could not be decoded.
    #[error("codec failure: {0}")]
    Codec(String),
}

impl ReconcileError {
    /// Whether the workload must be paused rather than retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReconcileError::InvariantViolation(_) | ReconcileError::Codec(_)
        )
    }
}

impl From<StateError> for ReconcileError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::Conflict { .. } => ReconcileError::Conflict(e.to_string()),
            StateError::Codec(msg) => ReconcileError::Codec(msg),
            other => ReconcileError::Transient(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_errors_are_classified() {
        let conflict = StateError::Conflict {
            key: "k".into(),
            expected: 1,
            found: 2,
        };
        assert!(matches!(
            ReconcileError::from(conflict),
            ReconcileError::Conflict(_)
        ));
        assert!(ReconcileError::from(StateError::Codec("bad".into())).is_fatal());
        assert!(matches!(
            ReconcileError::from(StateError::Read("io".into())),
            ReconcileError::Transient(_)
        ));
    }
}
