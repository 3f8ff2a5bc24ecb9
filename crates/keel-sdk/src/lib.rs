//! High-level SDK for Keel.
//!
//! [`StoreHandle`] is the main entry point for applications: it resolves
//! store paths to verified metadata, computes closures, and streams or
//! verifies archives, all against one long-lived store provider.

pub mod config;
pub mod error;
pub mod handle;

pub use config::StoreConfig;
pub use error::{SdkError, SdkResult};
pub use handle::{StoreHandle, Verified};

// Re-export key types
pub use keel_closure::ClosureRequest;
pub use keel_crypto::{Hash, Keypair, PublicKey};
pub use keel_nar::{NarStream, StreamSink, StreamStatus, WriterSink};
pub use keel_store::{ErrorKind, InMemoryStore, LocalStore, PathInfo, RawPathInfo, StoreProvider};
pub use keel_types::{StoreDir, StorePath, StorePathHash};
