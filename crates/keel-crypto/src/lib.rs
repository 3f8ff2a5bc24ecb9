//! Cryptographic primitives for Keel.
//!
//! Provides the SHA-256 digest used for NAR hashes (with the typed
//! `sha256:<digest>` string form), a streaming [`NarHasher`], and Ed25519
//! keys that sign and verify in the `<key name>:<base64>` format.
//!
//! All crypto operations wrap established libraries; no custom cryptography.

pub mod hash;
pub mod signer;

pub use hash::{Hash, HashError, HashResult, NarHasher};
pub use signer::{Keypair, PublicKey, SignatureError};
