//! Store object identifiers.
//!
//! A store object is named by its base name, `<hash>-<name>`, for example
//! `ia70ss13m22znbl8khrf2hq72qmh5drr-ruby-2.7.5`. The full filesystem path
//! is the base name joined onto a [`StoreDir`] such as `/nix/store`.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{TypeError, TypeResult};
use crate::nix_base32;

/// Length of the hash part of a base name.
pub const STORE_PATH_HASH_LEN: usize = 32;

/// Maximum length of the name part of a base name.
pub const STORE_PATH_NAME_MAX_LEN: usize = 211;

/// Suffix marking a derivation (build recipe) object.
pub const DERIVATION_EXTENSION: &str = ".drv";

/// The fixed-length hash part of a store path.
///
/// Exactly 32 nix-base32 digits. `e`, `o`, `u` and `t` never appear, and
/// upper case is rejected.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorePathHash(String);

impl StorePathHash {
    /// Validate and wrap a hash part.
    pub fn new(hash: impl Into<String>) -> TypeResult<Self> {
        let hash = hash.into();
        if hash.len() != STORE_PATH_HASH_LEN {
            return Err(TypeError::InvalidStorePathHash {
                hash,
                reason: "hash is of invalid length",
            });
        }
        if !hash.bytes().all(nix_base32::is_digit) {
            return Err(TypeError::InvalidStorePathHash {
                hash,
                reason: "hash contains characters outside the nix-base32 alphabet",
            });
        }
        Ok(Self(hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for StorePathHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorePathHash({})", self.0)
    }
}

impl fmt::Display for StorePathHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StorePathHash {
    type Err = TypeError;

    fn from_str(s: &str) -> TypeResult<Self> {
        Self::new(s)
    }
}

/// Identifier of one store object: a validated base name.
///
/// Immutable once constructed. Ordering is by base name, which makes
/// iteration over sets of store paths reproducible.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorePath {
    base_name: String,
}

impl StorePath {
    /// Parse a base name of the form `<hash>-<name>`.
    pub fn from_base_name(base_name: impl Into<String>) -> TypeResult<Self> {
        let base_name = base_name.into();
        let invalid = |reason| TypeError::InvalidStorePathName {
            base_name: base_name.clone(),
            reason,
        };

        if base_name.len() < STORE_PATH_HASH_LEN + 2 {
            return Err(invalid("base name is too short"));
        }
        let Some(hash) = base_name.get(..STORE_PATH_HASH_LEN) else {
            return Err(invalid("hash part is not ASCII"));
        };
        StorePathHash::new(hash)?;
        let rest = &base_name[STORE_PATH_HASH_LEN..];

        let Some(name) = rest.strip_prefix('-') else {
            return Err(invalid("hash must be followed by a dash"));
        };
        validate_name(name).map_err(invalid)?;

        Ok(Self { base_name })
    }

    /// Build a store path from its two parts.
    pub fn from_parts(hash: &StorePathHash, name: &str) -> TypeResult<Self> {
        Self::from_base_name(format!("{hash}-{name}"))
    }

    /// The full base name, `<hash>-<name>`.
    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    /// The hash part.
    pub fn hash_part(&self) -> &str {
        &self.base_name[..STORE_PATH_HASH_LEN]
    }

    /// The hash part as a typed value.
    pub fn to_hash(&self) -> StorePathHash {
        StorePathHash(self.hash_part().to_string())
    }

    /// The human-readable name part.
    pub fn name(&self) -> &str {
        &self.base_name[STORE_PATH_HASH_LEN + 1..]
    }

    /// Returns `true` if this object is a derivation (`*.drv`).
    pub fn is_derivation(&self) -> bool {
        self.name().ends_with(DERIVATION_EXTENSION)
    }
}

fn validate_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("name is empty");
    }
    if name.len() > STORE_PATH_NAME_MAX_LEN {
        return Err("name is too long");
    }
    if name.starts_with('.') {
        return Err("name must not start with a period");
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || "+-._?=".contains(c);
    if !name.chars().all(allowed) {
        return Err("name contains illegal characters");
    }
    Ok(())
}

impl fmt::Debug for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorePath({})", self.base_name)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base_name)
    }
}

impl FromStr for StorePath {
    type Err = TypeError;

    fn from_str(s: &str) -> TypeResult<Self> {
        Self::from_base_name(s)
    }
}

impl Serialize for StorePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.base_name)
    }
}

impl<'de> Deserialize<'de> for StorePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_base_name(s).map_err(de::Error::custom)
    }
}

/// The directory all store paths live under, e.g. `/nix/store`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StoreDir {
    root: PathBuf,
}

impl StoreDir {
    /// Validate a store directory: absolute, normalized, not the filesystem root.
    pub fn new(root: impl Into<PathBuf>) -> TypeResult<Self> {
        let root: PathBuf = root.into();
        let invalid = |reason| TypeError::InvalidStoreDir {
            dir: root.clone(),
            reason,
        };

        if !root.is_absolute() {
            return Err(invalid("store directory must be absolute"));
        }
        if root.parent().is_none() {
            return Err(invalid("store directory must not be the filesystem root"));
        }
        let normalized = root
            .components()
            .all(|c| matches!(c, Component::RootDir | Component::Normal(_)));
        if !normalized {
            return Err(invalid("store directory must be normalized"));
        }

        // Strip a trailing separator by rebuilding from components.
        let root: PathBuf = root.components().collect();
        Ok(Self { root })
    }

    /// The root prefix as a path.
    pub fn as_path(&self) -> &Path {
        &self.root
    }

    /// The root prefix as a string, lossily converted if not UTF-8.
    pub fn to_string_lossy(&self) -> String {
        self.root.to_string_lossy().into_owned()
    }

    /// Full filesystem path of a store object.
    pub fn full_path(&self, path: &StorePath) -> PathBuf {
        self.root.join(path.base_name())
    }

    /// Parse a full path into the store path it lies in.
    ///
    /// Paths inside an object (`<root>/<base>/bin/foo`) resolve to the
    /// object itself.
    pub fn parse_store_path(&self, path: impl AsRef<Path>) -> TypeResult<StorePath> {
        let path = path.as_ref();
        let invalid = |reason| TypeError::InvalidStorePath {
            path: path.to_path_buf(),
            reason,
        };

        let relative = path
            .strip_prefix(&self.root)
            .map_err(|_| invalid("path is not inside the store directory"))?;
        let first = relative
            .components()
            .next()
            .ok_or_else(|| invalid("path is the store directory itself"))?;
        let Component::Normal(base_name) = first else {
            return Err(invalid("path is not normalized"));
        };
        let base_name = base_name
            .to_str()
            .ok_or_else(|| invalid("base name is not valid UTF-8"))?;

        StorePath::from_base_name(base_name)
    }
}

impl fmt::Display for StoreDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root.display())
    }
}

impl Default for StoreDir {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/nix/store"),
        }
    }
}
