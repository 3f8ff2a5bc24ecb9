use std::collections::BTreeSet;

use keel_crypto::{Hash, Keypair, PublicKey};
use keel_types::{StoreDir, StorePath};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Size of the smallest archive the NAR grammar can produce (an empty
/// directory).
pub const MIN_NAR_SIZE: u64 = 96;

/// Unvalidated metadata exactly as a provider stores it.
///
/// Hashes and paths are plain strings here; [`PathInfo::from_raw`] turns a
/// raw record into a verified one.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPathInfo {
    /// Typed NAR hash, e.g. `sha256:<digest>`.
    pub nar_hash: String,
    pub nar_size: u64,
    /// Base names of referenced store paths.
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub signatures: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deriver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_address: Option<String>,
}

impl RawPathInfo {
    /// A raw record with the given hash and size and nothing else.
    pub fn new(nar_hash: &Hash, nar_size: u64) -> Self {
        Self {
            nar_hash: nar_hash.to_typed_base32(),
            nar_size,
            ..Self::default()
        }
    }

    pub fn with_references<'a>(mut self, refs: impl IntoIterator<Item = &'a StorePath>) -> Self {
        self.references = refs.into_iter().map(|p| p.base_name().to_owned()).collect();
        self
    }

    pub fn with_deriver(mut self, deriver: &StorePath) -> Self {
        self.deriver = Some(deriver.base_name().to_owned());
        self
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signatures.push(signature.into());
        self
    }

    pub fn with_content_address(mut self, ca: impl Into<String>) -> Self {
        self.content_address = Some(ca.into());
        self
    }
}

/// Verified provenance record for one store object.
///
/// Produced on demand from a provider's [`RawPathInfo`] and never mutated
/// afterwards. Every `PathInfo` in circulation has passed the checks in
/// [`PathInfo::from_raw`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PathInfo {
    path: StorePath,
    nar_hash: Hash,
    nar_size: u64,
    references: BTreeSet<StorePath>,
    signatures: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deriver: Option<StorePath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_address: Option<String>,
}

impl PathInfo {
    /// Validate a raw record for `path`.
    ///
    /// Any inconsistency is reported as [`StoreError::Corruption`]: the
    /// provider handed back metadata that cannot describe a real object.
    pub fn from_raw(path: StorePath, raw: RawPathInfo) -> StoreResult<Self> {
        let nar_hash = Hash::from_typed(&raw.nar_hash).map_err(|e| {
            StoreError::corruption(&path, format!("bad nar hash {:?}: {e}", raw.nar_hash))
        })?;

        if raw.nar_size < MIN_NAR_SIZE {
            return Err(StoreError::corruption(
                &path,
                format!("nar size {} is below the minimum of {MIN_NAR_SIZE}", raw.nar_size),
            ));
        }
        if raw.nar_size % 8 != 0 {
            return Err(StoreError::corruption(
                &path,
                format!("nar size {} is not a multiple of 8", raw.nar_size),
            ));
        }

        let references = raw
            .references
            .iter()
            .map(|r| {
                StorePath::from_base_name(r.as_str())
                    .map_err(|e| StoreError::corruption(&path, format!("bad reference: {e}")))
            })
            .collect::<StoreResult<BTreeSet<_>>>()?;

        let deriver = raw
            .deriver
            .as_deref()
            .filter(|d| !d.is_empty())
            .map(|d| {
                StorePath::from_base_name(d)
                    .map_err(|e| StoreError::corruption(&path, format!("bad deriver: {e}")))
            })
            .transpose()?;

        let mut signatures: Vec<String> = Vec::with_capacity(raw.signatures.len());
        for sig in raw.signatures {
            if !signatures.contains(&sig) {
                signatures.push(sig);
            }
        }

        let content_address = raw.content_address.filter(|ca| !ca.is_empty());

        Ok(Self {
            path,
            nar_hash,
            nar_size: raw.nar_size,
            references,
            signatures,
            deriver,
            content_address,
        })
    }

    /// Convert back to the provider's storage form.
    pub fn to_raw(&self) -> RawPathInfo {
        RawPathInfo {
            nar_hash: self.nar_hash.to_typed_base32(),
            nar_size: self.nar_size,
            references: self
                .references
                .iter()
                .map(|p| p.base_name().to_owned())
                .collect(),
            signatures: self.signatures.clone(),
            deriver: self.deriver.as_ref().map(|d| d.base_name().to_owned()),
            content_address: self.content_address.clone(),
        }
    }

    pub fn path(&self) -> &StorePath {
        &self.path
    }

    pub fn nar_hash(&self) -> &Hash {
        &self.nar_hash
    }

    pub fn nar_size(&self) -> u64 {
        self.nar_size
    }

    pub fn references(&self) -> &BTreeSet<StorePath> {
        &self.references
    }

    /// Signatures in first-seen order, duplicates removed.
    pub fn signatures(&self) -> &[String] {
        &self.signatures
    }

    pub fn deriver(&self) -> Option<&StorePath> {
        self.deriver.as_ref()
    }

    pub fn content_address(&self) -> Option<&str> {
        self.content_address.as_deref()
    }

    pub fn is_content_addressed(&self) -> bool {
        self.content_address.is_some()
    }

    pub fn references_self(&self) -> bool {
        self.references.contains(&self.path)
    }

    /// The string signatures are computed over.
    pub fn fingerprint(&self, store_dir: &StoreDir) -> String {
        let full = |p: &StorePath| store_dir.full_path(p).to_string_lossy().into_owned();
        let refs: Vec<String> = self.references.iter().map(full).collect();
        format!(
            "1;{};{};{};{}",
            full(&self.path),
            self.nar_hash.to_typed_base32(),
            self.nar_size,
            refs.join(",")
        )
    }

    /// Whether any recorded signature verifies under `key`.
    pub fn is_signed_by(&self, store_dir: &StoreDir, key: &PublicKey) -> bool {
        let fingerprint = self.fingerprint(store_dir);
        self.signatures
            .iter()
            .any(|sig| key.verify(fingerprint.as_bytes(), sig).is_ok())
    }

    /// Produce a signature for this record. The record itself is not changed;
    /// callers store the signature through their provider.
    pub fn sign(&self, store_dir: &StoreDir, keypair: &Keypair) -> String {
        keypair.sign(self.fingerprint(store_dir).as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: &str = "3c8kxlpkawfdhbnkfrp1k9kah9ykhjgn-hello-2.12";
    const GLIBC: &str = "0wydqkbgvnfxwbxkcy2hcnvyhcjf0l7z-glibc-2.38";
    const DRV: &str = "ll3jrlr0ys6qxr1sbsjmfi5gbc8w9wk4-hello-2.12.drv";

    fn path(base: &str) -> StorePath {
        StorePath::from_base_name(base).unwrap()
    }

    fn raw() -> RawPathInfo {
        RawPathInfo::new(&Hash::sha256_from_bytes(b"hello"), 1024)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    #[test]
    fn from_raw_accepts_valid_record() {
        let raw = raw()
            .with_references([&path(GLIBC), &path(HELLO)])
            .with_deriver(&path(DRV));
        let info = PathInfo::from_raw(path(HELLO), raw).unwrap();
        assert_eq!(info.path(), &path(HELLO));
        assert_eq!(info.nar_size(), 1024);
        assert_eq!(info.references().len(), 2);
        assert!(info.references_self());
        assert_eq!(info.deriver(), Some(&path(DRV)));
        assert!(!info.is_content_addressed());
    }

    #[test]
    fn from_raw_accepts_hex_hash() {
        let hash = Hash::sha256_from_bytes(b"hello");
        let raw = RawPathInfo {
            nar_hash: hash.to_typed_base16(),
            nar_size: 96,
            ..RawPathInfo::default()
        };
        let info = PathInfo::from_raw(path(HELLO), raw).unwrap();
        assert_eq!(info.nar_hash(), &hash);
    }

    #[test]
    fn from_raw_rejects_bad_hash() {
        let raw = RawPathInfo {
            nar_hash: "md5:abcd".into(),
            nar_size: 96,
            ..RawPathInfo::default()
        };
        let err = PathInfo::from_raw(path(HELLO), raw).unwrap_err();
        assert!(matches!(err, StoreError::Corruption { .. }));
    }

    #[test]
    fn from_raw_rejects_impossible_sizes() {
        for size in [0, 8, 88, 97, 1001] {
            let raw = RawPathInfo {
                nar_size: size,
                ..raw()
            };
            let err = PathInfo::from_raw(path(HELLO), raw).unwrap_err();
            assert!(matches!(err, StoreError::Corruption { .. }), "size {size}");
        }
    }

    #[test]
    fn from_raw_rejects_bad_reference() {
        let mut raw = raw();
        raw.references.push("not-a-store-path".into());
        let err = PathInfo::from_raw(path(HELLO), raw).unwrap_err();
        assert!(err.to_string().contains("bad reference"));
    }

    #[test]
    fn from_raw_rejects_bad_deriver() {
        let mut raw = raw();
        raw.deriver = Some("/nix/store/whatever".into());
        let err = PathInfo::from_raw(path(HELLO), raw).unwrap_err();
        assert!(err.to_string().contains("bad deriver"));
    }

    #[test]
    fn empty_optional_strings_normalize_to_none() {
        let mut raw = raw();
        raw.deriver = Some(String::new());
        raw.content_address = Some(String::new());
        let info = PathInfo::from_raw(path(HELLO), raw).unwrap();
        assert_eq!(info.deriver(), None);
        assert_eq!(info.content_address(), None);
    }

    #[test]
    fn signatures_keep_order_and_drop_duplicates() {
        let raw = raw()
            .with_signature("b:BBBB")
            .with_signature("a:AAAA")
            .with_signature("b:BBBB");
        let info = PathInfo::from_raw(path(HELLO), raw).unwrap();
        assert_eq!(info.signatures(), ["b:BBBB", "a:AAAA"]);
    }

    #[test]
    fn to_raw_round_trips() {
        let raw = raw()
            .with_references([&path(GLIBC)])
            .with_deriver(&path(DRV))
            .with_content_address("fixed:r:sha256:abc");
        let info = PathInfo::from_raw(path(HELLO), raw).unwrap();
        let again = PathInfo::from_raw(path(HELLO), info.to_raw()).unwrap();
        assert_eq!(info, again);
    }

    // -----------------------------------------------------------------------
    // Fingerprint and signatures
    // -----------------------------------------------------------------------

    #[test]
    fn fingerprint_format() {
        let hash = Hash::sha256_from_bytes(b"hello");
        let raw = RawPathInfo::new(&hash, 1024).with_references([&path(HELLO), &path(GLIBC)]);
        let info = PathInfo::from_raw(path(HELLO), raw).unwrap();
        let fp = info.fingerprint(&StoreDir::default());
        assert_eq!(
            fp,
            format!(
                "1;/nix/store/{HELLO};{};1024;/nix/store/{GLIBC},/nix/store/{HELLO}",
                hash.to_typed_base32()
            )
        );
    }

    #[test]
    fn fingerprint_without_references_ends_with_separator() {
        let info = PathInfo::from_raw(path(HELLO), raw()).unwrap();
        assert!(info.fingerprint(&StoreDir::default()).ends_with(";1024;"));
    }

    #[test]
    fn sign_and_check_signature() {
        let dir = StoreDir::default();
        let keypair = Keypair::generate("cache.example.org-1").unwrap();
        let unsigned = PathInfo::from_raw(path(HELLO), raw()).unwrap();
        let sig = unsigned.sign(&dir, &keypair);

        let signed = PathInfo::from_raw(path(HELLO), raw().with_signature(sig)).unwrap();
        assert!(signed.is_signed_by(&dir, &keypair.to_public_key()));
        assert!(!unsigned.is_signed_by(&dir, &keypair.to_public_key()));

        let other = Keypair::generate("other-1").unwrap();
        assert!(!signed.is_signed_by(&dir, &other.to_public_key()));
    }

    #[test]
    fn signature_does_not_cover_other_store_dir() {
        let keypair = Keypair::generate("cache-1").unwrap();
        let info = PathInfo::from_raw(path(HELLO), raw()).unwrap();
        let sig = info.sign(&StoreDir::default(), &keypair);
        let signed = PathInfo::from_raw(path(HELLO), raw().with_signature(sig)).unwrap();
        let elsewhere = StoreDir::new("/opt/store").unwrap();
        assert!(!signed.is_signed_by(&elsewhere, &keypair.to_public_key()));
    }

    #[test]
    fn raw_info_json_defaults() {
        let json = format!(
            r#"{{"nar_hash":"{}","nar_size":96}}"#,
            Hash::sha256_from_bytes(b"").to_typed_base32()
        );
        let raw: RawPathInfo = serde_json::from_str(&json).unwrap();
        assert!(raw.references.is_empty());
        assert!(raw.signatures.is_empty());
        assert_eq!(raw.deriver, None);
    }
}
