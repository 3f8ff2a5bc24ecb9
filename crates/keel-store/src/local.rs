use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use keel_types::{StoreDir, StorePath, StorePathHash};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::path_info::RawPathInfo;
use crate::traits::StoreProvider;
use crate::tree::{DiskObject, ObjectReader};

const INFO_DIR: &str = "info";
const INFO_EXTENSION: &str = "json";

/// One metadata document under `<db_dir>/info/`.
#[derive(Debug, Serialize, Deserialize)]
struct InfoDocument {
    path: StorePath,
    #[serde(flatten)]
    info: RawPathInfo,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    outputs: BTreeSet<StorePath>,
}

/// Store provider backed by the local filesystem.
///
/// Object trees live at `<store_dir>/<base name>`. Metadata is one JSON
/// document per object at `<db_dir>/info/<hash part>.json`, written
/// atomically through a temporary file. Reverse references are found by
/// scanning the metadata directory on each call.
#[derive(Debug, Clone)]
pub struct LocalStore {
    store_dir: StoreDir,
    db_dir: PathBuf,
}

impl LocalStore {
    /// Open a store, creating the metadata directory if needed.
    pub fn open(store_dir: StoreDir, db_dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let db_dir = db_dir.into();
        fs::create_dir_all(db_dir.join(INFO_DIR))?;
        tracing::debug!(store_dir = %store_dir, db_dir = %db_dir.display(), "opened local store");
        Ok(Self { store_dir, db_dir })
    }

    pub fn db_dir(&self) -> &Path {
        &self.db_dir
    }

    fn info_dir(&self) -> PathBuf {
        self.db_dir.join(INFO_DIR)
    }

    fn info_path(&self, hash: &str) -> PathBuf {
        self.info_dir().join(format!("{hash}.{INFO_EXTENSION}"))
    }

    /// Write the metadata document for `path`, replacing any previous one.
    ///
    /// `outputs` is only meaningful for derivations.
    pub fn register(
        &self,
        path: &StorePath,
        info: &RawPathInfo,
        outputs: &BTreeSet<StorePath>,
    ) -> StoreResult<()> {
        let doc = InfoDocument {
            path: path.clone(),
            info: info.clone(),
            outputs: outputs.clone(),
        };
        let json = serde_json::to_vec_pretty(&doc)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(self.info_dir())?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.info_path(path.hash_part()))
            .map_err(|e| StoreError::Io(e.error))?;

        tracing::debug!(path = %path, "registered path info");
        Ok(())
    }

    /// Read the document stored under a hash part, if any.
    fn read_document(&self, hash: &str) -> StoreResult<Option<(PathBuf, Vec<u8>)>> {
        let file = self.info_path(hash);
        match fs::read(&file) {
            Ok(bytes) => Ok(Some((file, bytes))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Load the document for `path`. A document naming a different path
    /// with the same hash part counts as absent.
    fn load(&self, path: &StorePath) -> StoreResult<Option<InfoDocument>> {
        let Some((file, bytes)) = self.read_document(path.hash_part())? else {
            return Ok(None);
        };
        let doc = parse_document(&file, &bytes)?;
        if doc.path != *path {
            return Ok(None);
        }
        Ok(Some(doc))
    }

    /// Every metadata document in the store, in directory order.
    fn scan(&self) -> StoreResult<Vec<InfoDocument>> {
        let mut docs = Vec::new();
        for entry in fs::read_dir(self.info_dir())? {
            let file = entry?.path();
            if file.extension().and_then(|e| e.to_str()) != Some(INFO_EXTENSION) {
                continue;
            }
            let bytes = match fs::read(&file) {
                Ok(bytes) => bytes,
                // Removed between listing and reading.
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            docs.push(parse_document(&file, &bytes)?);
        }
        Ok(docs)
    }
}

fn parse_document(file: &Path, bytes: &[u8]) -> StoreResult<InfoDocument> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::CorruptDocument {
        file: file.display().to_string(),
        reason: e.to_string(),
    })
}

impl StoreProvider for LocalStore {
    fn store_dir(&self) -> &StoreDir {
        &self.store_dir
    }

    fn lookup(&self, path: &StorePath) -> StoreResult<Option<RawPathInfo>> {
        Ok(self.load(path)?.map(|doc| doc.info))
    }

    fn query_path_from_hash_part(&self, hash: &StorePathHash) -> StoreResult<Option<StorePath>> {
        let Some((file, bytes)) = self.read_document(hash.as_str())? else {
            return Ok(None);
        };
        Ok(Some(parse_document(&file, &bytes)?.path))
    }

    fn open_object(&self, path: &StorePath) -> StoreResult<Box<dyn ObjectReader>> {
        if !self.contains(path)? {
            return Err(StoreError::NotFound(path.clone()));
        }
        Ok(Box::new(DiskObject::new(self.store_dir.full_path(path))))
    }

    fn reverse_references(&self, path: &StorePath) -> StoreResult<BTreeSet<StorePath>> {
        let target = path.base_name();
        Ok(self
            .scan()?
            .into_iter()
            .filter(|doc| doc.info.references.iter().any(|r| r == target))
            .map(|doc| doc.path)
            .collect())
    }

    fn derivation_outputs(&self, drv: &StorePath) -> StoreResult<BTreeSet<StorePath>> {
        let Some(doc) = self.load(drv)? else {
            return Ok(BTreeSet::new());
        };
        let mut present = BTreeSet::new();
        for output in doc.outputs {
            if self.contains(&output)? {
                present.insert(output);
            }
        }
        Ok(present)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::traits::resolve;
    use crate::tree::EntryKind;
    use keel_crypto::Hash;

    const A: &str = "7n0mbqydcipkpbxm24fab066lxk68aqk-a";
    const B: &str = "5rwxzi7pal3qhpsyfc16gzkh939q1np6-b";
    const DRV: &str = "ll3jrlr0ys6qxr1sbsjmfi5gbc8w9wk4-a.drv";

    fn path(base: &str) -> StorePath {
        StorePath::from_base_name(base).unwrap()
    }

    fn info(refs: &[&str]) -> RawPathInfo {
        let refs: Vec<StorePath> = refs.iter().map(|r| path(r)).collect();
        RawPathInfo::new(&Hash::sha256_from_bytes(b"x"), 128).with_references(&refs)
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: LocalStore,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store_dir = StoreDir::new(dir.path().join("store")).unwrap();
        fs::create_dir_all(store_dir.as_path()).unwrap();
        let store = LocalStore::open(store_dir, dir.path().join("db")).unwrap();
        Fixture { _dir: dir, store }
    }

    #[test]
    fn register_and_resolve() {
        let fx = fixture();
        fx.store
            .register(&path(A), &info(&[B]), &BTreeSet::new())
            .unwrap();
        let resolved = resolve(&fx.store, &path(A)).unwrap();
        assert_eq!(resolved.references(), &BTreeSet::from([path(B)]));
        assert!(fx.store.contains(&path(A)).unwrap());
        assert!(!fx.store.contains(&path(B)).unwrap());
    }

    #[test]
    fn unknown_path_is_not_found() {
        let fx = fixture();
        let err = resolve(&fx.store, &path(A)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn same_hash_different_name_is_absent() {
        let fx = fixture();
        fx.store
            .register(&path(A), &info(&[]), &BTreeSet::new())
            .unwrap();
        let other = StorePath::from_parts(&path(A).to_hash(), "other").unwrap();
        assert_eq!(fx.store.lookup(&other).unwrap(), None);
    }

    #[test]
    fn garbage_metadata_is_corruption() {
        let fx = fixture();
        fs::write(fx.store.info_path(path(A).hash_part()), b"{not json").unwrap();
        let err = fx.store.lookup(&path(A)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corruption);
    }

    #[test]
    fn garbage_metadata_is_corruption_on_every_read() {
        let fx = fixture();
        fx.store
            .register(&path(B), &info(&[]), &BTreeSet::new())
            .unwrap();
        fs::write(fx.store.info_path(path(A).hash_part()), b"{not json").unwrap();

        let err = fx
            .store
            .query_path_from_hash_part(&path(A).to_hash())
            .unwrap_err();
        assert!(matches!(err, StoreError::CorruptDocument { .. }));
        assert_eq!(err.kind(), ErrorKind::Corruption);

        let err = fx.store.reverse_references(&path(B)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corruption);
    }

    #[test]
    fn reverse_references_scan() {
        let fx = fixture();
        fx.store
            .register(&path(B), &info(&[]), &BTreeSet::new())
            .unwrap();
        fx.store
            .register(&path(A), &info(&[B]), &BTreeSet::new())
            .unwrap();
        assert_eq!(
            fx.store.reverse_references(&path(B)).unwrap(),
            BTreeSet::from([path(A)])
        );
        assert!(fx.store.reverse_references(&path(A)).unwrap().is_empty());
    }

    #[test]
    fn derivation_outputs_filtered_by_presence() {
        let fx = fixture();
        fx.store
            .register(&path(A), &info(&[]), &BTreeSet::new())
            .unwrap();
        fx.store
            .register(&path(DRV), &info(&[]), &BTreeSet::from([path(A), path(B)]))
            .unwrap();
        assert_eq!(
            fx.store.derivation_outputs(&path(DRV)).unwrap(),
            BTreeSet::from([path(A)])
        );
    }

    #[test]
    fn hash_part_lookup() {
        let fx = fixture();
        fx.store
            .register(&path(A), &info(&[]), &BTreeSet::new())
            .unwrap();
        assert_eq!(
            fx.store
                .query_path_from_hash_part(&path(A).to_hash())
                .unwrap(),
            Some(path(A))
        );
        assert_eq!(
            fx.store
                .query_path_from_hash_part(&path(B).to_hash())
                .unwrap(),
            None
        );
    }

    #[test]
    fn open_object_reads_disk_tree() {
        let fx = fixture();
        let root = fx.store.store_dir().full_path(&path(A));
        fs::create_dir(&root).unwrap();
        fs::write(root.join("hello"), b"hi").unwrap();
        fx.store
            .register(&path(A), &info(&[]), &BTreeSet::new())
            .unwrap();

        let reader = fx.store.open_object(&path(A)).unwrap();
        assert_eq!(reader.entry(Path::new("")).unwrap(), EntryKind::Directory);
        assert_eq!(reader.list(Path::new("")).unwrap(), [b"hello".to_vec()]);
    }

    #[test]
    fn open_unregistered_object_is_not_found() {
        let fx = fixture();
        assert!(matches!(
            fx.store.open_object(&path(A)),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn register_overwrites_atomically() {
        let fx = fixture();
        fx.store
            .register(&path(A), &info(&[]), &BTreeSet::new())
            .unwrap();
        fx.store
            .register(&path(A), &info(&[B]), &BTreeSet::new())
            .unwrap();
        let raw = fx.store.lookup(&path(A)).unwrap().unwrap();
        assert_eq!(raw.references, [B]);
        // Only the final document remains; no temporary files linger.
        let files: Vec<_> = fs::read_dir(fx.store.info_dir()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }
}
