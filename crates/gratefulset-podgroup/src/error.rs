//! Pod-group driver error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PodGroupError {
    #[error("state store error: {0}")]
    State(#[from] gratefulset_state::StateError),
}

pub type PodGroupResult<T> = Result<T, PodGroupError>;
