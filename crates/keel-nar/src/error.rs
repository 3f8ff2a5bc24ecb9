use std::io;

use keel_store::StoreError;

/// Failure reported by a [`StreamSink`](crate::StreamSink).
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The consumer stopped listening.
    #[error("stream consumer went away")]
    Cancelled,

    #[error("downstream failure: {0}")]
    Downstream(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors from archive export and decoding.
#[derive(Debug, thiserror::Error)]
pub enum NarError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Reading the object's file tree failed.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("invalid entry name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("file {path:?} changed size during export: expected {expected} bytes, read {actual}")]
    SizeChanged {
        path: String,
        expected: u64,
        actual: u64,
    },

    #[error("malformed archive at offset {offset}: {reason}")]
    Malformed { offset: u64, reason: String },

    /// The producer aborted; the bytes received so far are not an archive.
    #[error("archive stream truncated: {0}")]
    Truncated(String),
}

impl NarError {
    /// Whether the export stopped because its consumer went away.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Sink(SinkError::Cancelled))
    }
}

pub type NarResult<T> = Result<T, NarError>;
