use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use keel_types::{StoreDir, StorePath, StorePathHash};

use crate::error::{StoreError, StoreResult};
use crate::path_info::RawPathInfo;
use crate::traits::StoreProvider;
use crate::tree::{MemoryNode, MemoryObject, ObjectReader};

struct Entry {
    info: RawPathInfo,
    tree: Arc<MemoryNode>,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<StorePath, Entry>,
    /// Reverse references, maintained on insert and remove.
    referrers: BTreeMap<StorePath, BTreeSet<StorePath>>,
    outputs: BTreeMap<StorePath, BTreeSet<StorePath>>,
}

/// In-memory store provider.
///
/// Intended for tests and embedding. Objects, the referrers index and
/// derivation outputs live behind one `RwLock`, so every call sees a
/// consistent snapshot.
pub struct InMemoryStore {
    store_dir: StoreDir,
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new(store_dir: StoreDir) -> Self {
        Self {
            store_dir,
            state: RwLock::new(State::default()),
        }
    }

    /// Add an object. Returns `false` if the path was already present, in
    /// which case the existing object is kept.
    ///
    /// References that are not valid base names are stored as-is and
    /// surface as corruption when the path is resolved.
    pub fn insert(&self, path: StorePath, info: RawPathInfo, tree: MemoryNode) -> bool {
        let mut state = self.state.write().expect("lock poisoned");
        if state.objects.contains_key(&path) {
            return false;
        }
        for reference in info
            .references
            .iter()
            .filter_map(|r| StorePath::from_base_name(r.as_str()).ok())
        {
            state
                .referrers
                .entry(reference)
                .or_default()
                .insert(path.clone());
        }
        tracing::debug!(path = %path, "inserted object");
        state.objects.insert(
            path,
            Entry {
                info,
                tree: Arc::new(tree),
            },
        );
        true
    }

    /// Record the outputs a derivation produces.
    pub fn set_derivation_outputs(&self, drv: StorePath, outputs: impl IntoIterator<Item = StorePath>) {
        let mut state = self.state.write().expect("lock poisoned");
        state.outputs.insert(drv, outputs.into_iter().collect());
    }

    /// Remove an object. Returns `true` if it existed.
    ///
    /// Nothing checks whether other objects still reference it; this
    /// mirrors garbage collection of a live path and is meant for tests.
    pub fn remove(&self, path: &StorePath) -> bool {
        let mut state = self.state.write().expect("lock poisoned");
        let Some(entry) = state.objects.remove(path) else {
            return false;
        };
        for reference in entry
            .info
            .references
            .iter()
            .filter_map(|r| StorePath::from_base_name(r.as_str()).ok())
        {
            if let Some(referrers) = state.referrers.get_mut(&reference) {
                referrers.remove(path);
                if referrers.is_empty() {
                    state.referrers.remove(&reference);
                }
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.state.read().expect("lock poisoned").objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().expect("lock poisoned").objects.is_empty()
    }

    /// All paths in the store, sorted.
    pub fn paths(&self) -> Vec<StorePath> {
        let state = self.state.read().expect("lock poisoned");
        state.objects.keys().cloned().collect()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(StoreDir::default())
    }
}

impl StoreProvider for InMemoryStore {
    fn store_dir(&self) -> &StoreDir {
        &self.store_dir
    }

    fn lookup(&self, path: &StorePath) -> StoreResult<Option<RawPathInfo>> {
        let state = self.state.read().expect("lock poisoned");
        Ok(state.objects.get(path).map(|e| e.info.clone()))
    }

    fn contains(&self, path: &StorePath) -> StoreResult<bool> {
        let state = self.state.read().expect("lock poisoned");
        Ok(state.objects.contains_key(path))
    }

    fn query_path_from_hash_part(&self, hash: &StorePathHash) -> StoreResult<Option<StorePath>> {
        let state = self.state.read().expect("lock poisoned");
        Ok(state
            .objects
            .keys()
            .find(|p| p.hash_part() == hash.as_str())
            .cloned())
    }

    fn open_object(&self, path: &StorePath) -> StoreResult<Box<dyn ObjectReader>> {
        let state = self.state.read().expect("lock poisoned");
        let entry = state
            .objects
            .get(path)
            .ok_or_else(|| StoreError::NotFound(path.clone()))?;
        Ok(Box::new(MemoryObject::new(Arc::clone(&entry.tree))))
    }

    fn reverse_references(&self, path: &StorePath) -> StoreResult<BTreeSet<StorePath>> {
        let state = self.state.read().expect("lock poisoned");
        Ok(state.referrers.get(path).cloned().unwrap_or_default())
    }

    fn derivation_outputs(&self, drv: &StorePath) -> StoreResult<BTreeSet<StorePath>> {
        let state = self.state.read().expect("lock poisoned");
        Ok(state
            .outputs
            .get(drv)
            .map(|outputs| {
                outputs
                    .iter()
                    .filter(|o| state.objects.contains_key(*o))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("store_dir", &self.store_dir)
            .field("object_count", &self.len())
            .finish()
    }
}
