//! Named Ed25519 keys.
//!
//! Keys and signatures share one text format, `<key name>:<base64 payload>`,
//! which keeps them interchangeable with keys produced by the Nix CLI:
//!
//! - secret key: 64-byte payload (seed followed by public key)
//! - public key: 32-byte payload
//! - signature: 64-byte payload

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use ed25519_dalek::{Signer, Verifier};

/// An Ed25519 keypair with a name.
pub struct Keypair {
    name: String,
    signing: ed25519_dalek::SigningKey,
}

/// An Ed25519 public key with a name.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    name: String,
    key: ed25519_dalek::VerifyingKey,
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate(name: &str) -> Result<Self, SignatureError> {
        validate_name(name)?;
        let mut csprng = rand::thread_rng();
        Ok(Self {
            name: name.to_string(),
            signing: ed25519_dalek::SigningKey::generate(&mut csprng),
        })
    }

    /// Build a keypair from a 32-byte seed.
    pub fn from_seed(name: &str, seed: [u8; 32]) -> Result<Self, SignatureError> {
        validate_name(name)?;
        Ok(Self {
            name: name.to_string(),
            signing: ed25519_dalek::SigningKey::from_bytes(&seed),
        })
    }

    /// The key name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Canonical text form of the secret key.
    pub fn export_keypair(&self) -> String {
        format!(
            "{}:{}",
            self.name,
            BASE64_STANDARD.encode(self.signing.to_keypair_bytes())
        )
    }

    /// Canonical text form of the public key.
    pub fn export_public_key(&self) -> String {
        self.to_public_key().to_string()
    }

    /// The public half.
    pub fn to_public_key(&self) -> PublicKey {
        PublicKey {
            name: self.name.clone(),
            key: self.signing.verifying_key(),
        }
    }

    /// Sign a message, returning the canonical signature string.
    pub fn sign(&self, message: &[u8]) -> String {
        let signature = self.signing.sign(message);
        format!("{}:{}", self.name, BASE64_STANDARD.encode(signature.to_bytes()))
    }

    /// Verify a signature made by this keypair.
    pub fn verify(&self, message: &[u8], signature: &str) -> Result<(), SignatureError> {
        self.to_public_key().verify(message, signature)
    }
}

impl FromStr for Keypair {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, SignatureError> {
        let (name, bytes) = decode_string(s, "keypair", ed25519_dalek::KEYPAIR_LENGTH)?;
        let bytes: [u8; ed25519_dalek::KEYPAIR_LENGTH] = bytes
            .try_into()
            .map_err(|_| SignatureError::InvalidKey)?;
        let signing = ed25519_dalek::SigningKey::from_keypair_bytes(&bytes)
            .map_err(|_| SignatureError::InvalidKey)?;
        Ok(Self {
            name: name.to_string(),
            signing,
        })
    }
}

impl PublicKey {
    /// The key name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Verify a canonical signature string over `message`.
    ///
    /// The signature's key name must match this key's name.
    pub fn verify(&self, message: &[u8], signature: &str) -> Result<(), SignatureError> {
        let (name, bytes) = decode_string(signature, "signature", ed25519_dalek::SIGNATURE_LENGTH)?;
        if name != self.name {
            return Err(SignatureError::WrongKeyName {
                our_name: self.name.clone(),
                string_name: name.to_string(),
            });
        }
        let bytes: [u8; ed25519_dalek::SIGNATURE_LENGTH] = bytes
            .try_into()
            .map_err(|_| SignatureError::InvalidSignature)?;
        let signature = ed25519_dalek::Signature::from_bytes(&bytes);
        self.key
            .verify(message, &signature)
            .map_err(|_| SignatureError::InvalidSignature)
    }
}

impl FromStr for PublicKey {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, SignatureError> {
        let (name, bytes) = decode_string(s, "public key", ed25519_dalek::PUBLIC_KEY_LENGTH)?;
        let bytes: [u8; ed25519_dalek::PUBLIC_KEY_LENGTH] = bytes
            .try_into()
            .map_err(|_| SignatureError::InvalidKey)?;
        let key = ed25519_dalek::VerifyingKey::from_bytes(&bytes)
            .map_err(|_| SignatureError::InvalidKey)?;
        Ok(Self {
            name: name.to_string(),
            key,
        })
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, BASE64_STANDARD.encode(self.key.as_bytes()))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({self})")
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair({}:<redacted>)", self.name)
    }
}

fn validate_name(name: &str) -> Result<(), SignatureError> {
    if name.is_empty() || name.contains(':') {
        return Err(SignatureError::InvalidKeyName(name.to_string()));
    }
    Ok(())
}

/// Split `<name>:<base64>` and decode the payload, checking its length.
fn decode_string<'s>(
    s: &'s str,
    usage: &'static str,
    expected: usize,
) -> Result<(&'s str, Vec<u8>), SignatureError> {
    let (name, payload) = s.split_once(':').ok_or(SignatureError::NoColonSeparator)?;
    if name.is_empty() {
        return Err(SignatureError::BlankKeyName);
    }
    if payload.is_empty() {
        return Err(SignatureError::BlankPayload);
    }
    let bytes = BASE64_STANDARD
        .decode(payload)
        .map_err(|e| SignatureError::Base64(e.to_string()))?;
    if bytes.len() != expected {
        return Err(SignatureError::InvalidPayloadLength {
            expected,
            actual: bytes.len(),
            usage,
        });
    }
    Ok((name, bytes))
}

/// Errors from key handling and signature verification.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid key")]
    InvalidKey,

    #[error("invalid key name \"{0}\": must be non-empty and contain no colon")]
    InvalidKeyName(String),

    #[error("signature was made by key \"{string_name}\", not \"{our_name}\"")]
    WrongKeyName {
        our_name: String,
        string_name: String,
    },

    #[error("string lacks a colon separator")]
    NoColonSeparator,

    #[error("key name is blank")]
    BlankKeyName,

    #[error("payload is blank")]
    BlankPayload,

    #[error("base64 decode error: {0}")]
    Base64(String),

    #[error("invalid {usage} payload length: expected {expected}, got {actual}")]
    InvalidPayloadLength {
        expected: usize,
        actual: usize,
        usage: &'static str,
    },
}
