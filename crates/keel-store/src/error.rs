use keel_types::{StorePath, TypeError};

/// Errors from store provider operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No object with this path is known to the store.
    #[error("path not found in store: {0}")]
    NotFound(StorePath),

    /// Communication or backend failure, reported by the provider.
    #[error("store provider error: {0}")]
    Provider(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The provider returned metadata that is internally inconsistent.
    #[error("corrupt path info for {path}: {reason}")]
    Corruption { path: StorePath, reason: String },

    /// A stored metadata document could not be read back. Raised where the
    /// path it describes is not yet known.
    #[error("corrupt metadata document {file}: {reason}")]
    CorruptDocument { file: String, reason: String },

    /// A string that should be a store path is not one.
    #[error("invalid store path: {0}")]
    InvalidPath(#[from] TypeError),

    /// Serialization or deserialization failure on the write path.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The provider does not offer this capability.
    #[error("operation not supported by this store: {0}")]
    Unsupported(&'static str),
}

/// Coarse classification of a [`StoreError`], for callers choosing a policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown path. Recoverable; the caller decides.
    NotFound,
    /// Transport or backend failure. The caller may retry.
    Provider,
    /// Inconsistent metadata. Fatal for the query.
    Corruption,
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Corruption { .. } | Self::CorruptDocument { .. } => ErrorKind::Corruption,
            Self::Provider(_)
            | Self::Io(_)
            | Self::InvalidPath(_)
            | Self::Serialization(_)
            | Self::Unsupported(_) => ErrorKind::Provider,
        }
    }

    pub fn corruption(path: &StorePath, reason: impl Into<String>) -> Self {
        Self::Corruption {
            path: path.clone(),
            reason: reason.into(),
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
