use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use keel_types::nix_base32;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Length of a SHA-256 digest in bytes.
pub const SHA256_LEN: usize = 32;

/// A typed digest.
///
/// Only SHA-256 is supported; it is what NAR hashes use. The canonical text
/// form is `sha256:<nix-base32>`, and `sha256:<hex>` is accepted on input.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hash {
    Sha256([u8; SHA256_LEN]),
}

impl Hash {
    /// Hash a byte slice.
    pub fn sha256_from_bytes(data: &[u8]) -> Self {
        Self::Sha256(Sha256::digest(data).into())
    }

    /// Parse `<algorithm>:<digest>` with a base16 or nix-base32 digest.
    pub fn from_typed(s: &str) -> HashResult<Self> {
        let (algorithm, digest) = s.split_once(':').ok_or(HashError::NoColonSeparator)?;
        if algorithm != "sha256" {
            return Err(HashError::UnsupportedHashAlgorithm(algorithm.to_string()));
        }

        let base16_len = SHA256_LEN * 2;
        let base32_len = nix_base32::encoded_len(SHA256_LEN);
        let bytes = if digest.len() == base16_len {
            hex::decode(digest).map_err(|e| HashError::InvalidBase16Hash(e.to_string()))?
        } else if digest.len() == base32_len {
            nix_base32::decode(digest).map_err(|_| HashError::InvalidBase32Hash)?
        } else {
            return Err(HashError::InvalidHashStringLength {
                expected: vec![base16_len, base32_len],
                actual: digest.len(),
            });
        };

        Self::sha256_from_digest(&bytes)
    }

    /// Parse an SRI string, `sha256-<base64>`.
    pub fn from_sri(s: &str) -> HashResult<Self> {
        let (algorithm, digest) = s.split_once('-').ok_or(HashError::NoDashSeparator)?;
        if algorithm != "sha256" {
            return Err(HashError::UnsupportedHashAlgorithm(algorithm.to_string()));
        }
        let bytes = BASE64_STANDARD
            .decode(digest)
            .map_err(|e| HashError::InvalidBase64Hash(e.to_string()))?;
        Self::sha256_from_digest(&bytes)
    }

    fn sha256_from_digest(bytes: &[u8]) -> HashResult<Self> {
        let digest: [u8; SHA256_LEN] =
            bytes
                .try_into()
                .map_err(|_| HashError::InvalidDigestLength {
                    expected: SHA256_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self::Sha256(digest))
    }

    /// Algorithm name.
    pub fn algorithm(&self) -> &'static str {
        match self {
            Self::Sha256(_) => "sha256",
        }
    }

    /// Raw digest bytes.
    pub fn digest(&self) -> &[u8] {
        match self {
            Self::Sha256(d) => d,
        }
    }

    /// `sha256:<hex>`.
    pub fn to_typed_base16(&self) -> String {
        format!("{}:{}", self.algorithm(), hex::encode(self.digest()))
    }

    /// `sha256:<nix-base32>`, the canonical form.
    pub fn to_typed_base32(&self) -> String {
        format!("{}:{}", self.algorithm(), nix_base32::encode(self.digest()))
    }

    /// `sha256-<base64>`.
    pub fn to_sri(&self) -> String {
        format!("{}-{}", self.algorithm(), BASE64_STANDARD.encode(self.digest()))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_typed_base32())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_typed_base32())
    }
}

impl FromStr for Hash {
    type Err = HashError;

    fn from_str(s: &str) -> HashResult<Self> {
        Self::from_typed(s)
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_typed_base32())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_typed(&s).map_err(de::Error::custom)
    }
}

/// Incremental SHA-256 over a NAR stream, counting bytes as it goes.
#[derive(Clone, Default)]
pub struct NarHasher {
    inner: Sha256,
    size: u64,
}

impl NarHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next piece of the stream.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
        self.size += data.len() as u64;
    }

    /// Bytes hashed so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Finish, returning the digest and the total byte count.
    pub fn finish(self) -> (Hash, u64) {
        (Hash::Sha256(self.inner.finalize().into()), self.size)
    }
}

impl std::io::Write for NarHasher {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for NarHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NarHasher").field("size", &self.size).finish()
    }
}

/// Errors from parsing digests.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HashError {
    #[error("hash string lacks a colon separator")]
    NoColonSeparator,

    #[error("SRI hash string lacks a dash separator")]
    NoDashSeparator,

    #[error("unsupported hash algorithm: {0}")]
    UnsupportedHashAlgorithm(String),

    #[error("invalid hash string length: expected one of {expected:?}, got {actual}")]
    InvalidHashStringLength { expected: Vec<usize>, actual: usize },

    #[error("invalid digest length: expected {expected} bytes, got {actual}")]
    InvalidDigestLength { expected: usize, actual: usize },

    #[error("invalid base16 hash: {0}")]
    InvalidBase16Hash(String),

    #[error("invalid nix-base32 hash")]
    InvalidBase32Hash,

    #[error("invalid base64 hash: {0}")]
    InvalidBase64Hash(String),
}

/// Result alias for digest parsing.
pub type HashResult<T> = Result<T, HashError>;
