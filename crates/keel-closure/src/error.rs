//! Error types for closure computation.

use keel_store::{ErrorKind, StoreError};
use keel_types::StorePath;

/// Errors that can occur while computing or ordering a closure.
#[derive(Debug, thiserror::Error)]
pub enum ClosureError {
    /// A node could not be resolved; the whole closure is abandoned.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Distinct paths reference each other, so no topological order exists.
    #[error("cycle detected involving {0}")]
    CycleDetected(StorePath),
}

impl ClosureError {
    /// Classification of the underlying store failure, if there is one.
    pub fn store_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Store(e) => Some(e.kind()),
            Self::CycleDetected(_) => None,
        }
    }
}

/// Convenience alias for closure results.
pub type ClosureResult<T> = Result<T, ClosureError>;
