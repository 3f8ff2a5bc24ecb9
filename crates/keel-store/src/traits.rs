use std::collections::BTreeSet;

use keel_types::{StoreDir, StorePath, StorePathHash};

use crate::error::{StoreError, StoreResult};
use crate::path_info::{PathInfo, RawPathInfo};
use crate::tree::ObjectReader;

/// Backend that knows which store objects exist and what they contain.
///
/// Implementations may be a local on-disk store or a connection to a remote
/// daemon; the rest of Keel only sees this capability. All implementations
/// must satisfy these invariants:
/// - `lookup` returns `Ok(None)` for unknown paths and `Err` only on
///   backend failure.
/// - Metadata for a path never changes once it has been returned.
/// - Every method is safe to call concurrently from several threads.
pub trait StoreProvider: Send + Sync {
    /// Root prefix all paths of this store live under.
    fn store_dir(&self) -> &StoreDir;

    /// Fetch the raw metadata record for a path.
    fn lookup(&self, path: &StorePath) -> StoreResult<Option<RawPathInfo>>;

    /// Whether the store holds a valid object at this path.
    fn contains(&self, path: &StorePath) -> StoreResult<bool> {
        Ok(self.lookup(path)?.is_some())
    }

    /// Find the full store path with the given hash part.
    fn query_path_from_hash_part(&self, hash: &StorePathHash) -> StoreResult<Option<StorePath>>;

    /// Open the object's file tree for reading.
    ///
    /// Fails with [`StoreError::NotFound`] if the store has no such path.
    fn open_object(&self, path: &StorePath) -> StoreResult<Box<dyn ObjectReader>>;

    /// Paths whose references include `path`.
    ///
    /// Consistency with concurrent writes is whatever the backend offers
    /// for a single call; nothing spans several calls.
    fn reverse_references(&self, path: &StorePath) -> StoreResult<BTreeSet<StorePath>> {
        let _ = path;
        Err(StoreError::Unsupported("reverse references"))
    }

    /// Outputs of a derivation that are present in the store.
    fn derivation_outputs(&self, drv: &StorePath) -> StoreResult<BTreeSet<StorePath>> {
        let _ = drv;
        Ok(BTreeSet::new())
    }
}

/// Resolve a path to its verified [`PathInfo`].
///
/// Unknown paths are [`StoreError::NotFound`]; records that fail validation
/// are [`StoreError::Corruption`].
pub fn resolve<S: StoreProvider + ?Sized>(store: &S, path: &StorePath) -> StoreResult<PathInfo> {
    let raw = store
        .lookup(path)?
        .ok_or_else(|| StoreError::NotFound(path.clone()))?;
    let info = PathInfo::from_raw(path.clone(), raw)?;
    tracing::debug!(path = %path, nar_size = info.nar_size(), "resolved path info");
    Ok(info)
}
