//! Store provider capability for Keel.
//!
//! A store is a set of immutable objects, each named by a
//! [`StorePath`](keel_types::StorePath) and described by a metadata record.
//! This crate defines how the rest of Keel talks to a store and turns raw
//! records into verified [`PathInfo`].
//!
//! # Storage Backends
//!
//! All backends implement the [`StoreProvider`] trait:
//!
//! - [`InMemoryStore`] -- map-based store for tests and embedding
//! - [`LocalStore`] -- object trees on disk plus JSON metadata documents
//!
//! # Design Rules
//!
//! 1. Metadata is validated on every read path; inconsistent records are
//!    corruption errors, never silently repaired.
//! 2. Unknown paths are `NotFound`, distinct from backend failures.
//! 3. Object trees are read without following symlinks.
//! 4. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod local;
pub mod memory;
pub mod path_info;
pub mod traits;
pub mod tree;

pub use error::{ErrorKind, StoreError, StoreResult};
pub use local::LocalStore;
pub use memory::InMemoryStore;
pub use path_info::{PathInfo, RawPathInfo, MIN_NAR_SIZE};
pub use traits::{resolve, StoreProvider};
pub use tree::{name_to_path, DiskObject, EntryKind, MemoryNode, MemoryObject, ObjectReader};
