use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while parsing or validating foundation types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid store path {path:?}: {reason}")]
    InvalidStorePath { path: PathBuf, reason: &'static str },

    #[error("invalid store path base name {base_name:?}: {reason}")]
    InvalidStorePathName {
        base_name: String,
        reason: &'static str,
    },

    #[error("invalid store path hash \"{hash}\": {reason}")]
    InvalidStorePathHash { hash: String, reason: &'static str },

    #[error("invalid store directory {dir:?}: {reason}")]
    InvalidStoreDir { dir: PathBuf, reason: &'static str },

    #[error("invalid nix-base32 string \"{0}\"")]
    InvalidBase32(String),
}

/// Result alias for type operations.
pub type TypeResult<T> = Result<T, TypeError>;
