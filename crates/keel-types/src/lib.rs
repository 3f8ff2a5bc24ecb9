//! Foundation types for Keel.
//!
//! Every other Keel crate depends on `keel-types`.
//!
//! # Key Types
//!
//! - [`StorePath`]: identifier of one store object (`<hash>-<name>`)
//! - [`StorePathHash`]: the 32-digit hash part of a store path
//! - [`StoreDir`]: the root prefix all store paths resolve under
//! - [`nix_base32`]: the base-32 codec used for path hashes and NAR digests

pub mod error;
pub mod nix_base32;
pub mod store_path;

pub use error::{TypeError, TypeResult};
pub use store_path::{StoreDir, StorePath, StorePathHash, STORE_PATH_HASH_LEN};
