use keel_closure::ClosureError;
use keel_nar::NarError;
use keel_store::{ErrorKind, StoreError};
use keel_types::TypeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("closure error: {0}")]
    Closure(#[from] ClosureError),

    #[error("export error: {0}")]
    Export(#[from] NarError),

    #[error("invalid store path: {0}")]
    InvalidPath(#[from] TypeError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no async runtime available: {0}")]
    Runtime(String),
}

impl SdkError {
    /// Classification of the underlying store failure, if there is one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Store(e) => Some(e.kind()),
            Self::Closure(e) => e.store_kind(),
            Self::Export(NarError::Store(e)) => Some(e.kind()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == Some(ErrorKind::NotFound)
    }
}

pub type SdkResult<T> = Result<T, SdkError>;
