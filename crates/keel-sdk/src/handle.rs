use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use keel_closure::{topological_order, ClosureComputer, ClosureRequest};
use keel_crypto::{Hash, PublicKey};
use keel_nar::{nar_channel, ArchiveExporter, HashingSink, NarStream, StreamSink};
use keel_store::{resolve, LocalStore, PathInfo, StoreError, StoreProvider};
use keel_types::{StorePath, StorePathHash};

use crate::config::StoreConfig;
use crate::error::{SdkError, SdkResult};

/// Outcome of a successful [`StoreHandle::verify`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verified {
    pub nar_hash: Hash,
    pub nar_size: u64,
}

/// Entry point to one store.
///
/// Owns a long-lived provider and dispatches lookups, closure queries and
/// exports to it. Cheap to clone; clones share the provider.
#[derive(Clone)]
pub struct StoreHandle {
    store: Arc<dyn StoreProvider>,
    exporter: ArchiveExporter,
    channel_capacity: usize,
    trusted_keys: Vec<PublicKey>,
}

impl StoreHandle {
    pub fn new(store: Arc<dyn StoreProvider>) -> Self {
        let defaults = StoreConfig::default();
        Self {
            store,
            exporter: ArchiveExporter::with_chunk_size(defaults.export_chunk_size),
            channel_capacity: defaults.export_channel_capacity,
            trusted_keys: Vec::new(),
        }
    }

    /// Open the local store a configuration describes.
    pub fn open(config: &StoreConfig) -> SdkResult<Self> {
        config.validate()?;
        let store = LocalStore::open(config.store_dir()?, &config.db_dir)?;
        tracing::info!(store_dir = %config.store_dir.display(), "opened store");
        Ok(Self::new(Arc::new(store))
            .with_export_settings(config.export_chunk_size, config.export_channel_capacity)
            .with_trusted_keys(config.public_keys()?))
    }

    pub fn with_export_settings(mut self, chunk_size: usize, channel_capacity: usize) -> Self {
        self.exporter = ArchiveExporter::with_chunk_size(chunk_size);
        self.channel_capacity = channel_capacity.max(1);
        self
    }

    pub fn with_trusted_keys(mut self, keys: Vec<PublicKey>) -> Self {
        self.trusted_keys = keys;
        self
    }

    pub fn provider(&self) -> &Arc<dyn StoreProvider> {
        &self.store
    }

    // ---- Paths ----

    /// Root prefix of the store, e.g. `/nix/store`.
    pub fn store_root(&self) -> String {
        self.store.store_dir().to_string_lossy()
    }

    /// Accept a full path under the store root or a bare base name.
    pub fn parse_store_path(&self, s: &str) -> SdkResult<StorePath> {
        if s.starts_with('/') {
            Ok(self.store.store_dir().parse_store_path(s)?)
        } else {
            Ok(StorePath::from_base_name(s)?)
        }
    }

    pub fn full_path(&self, path: &StorePath) -> PathBuf {
        self.store.store_dir().full_path(path)
    }

    pub fn query_path_from_hash_part(&self, hash: &str) -> SdkResult<Option<StorePath>> {
        let hash = StorePathHash::new(hash)?;
        Ok(self.store.query_path_from_hash_part(&hash)?)
    }

    // ---- Metadata ----

    pub fn resolve(&self, path: &StorePath) -> SdkResult<PathInfo> {
        Ok(resolve(self.store.as_ref(), path)?)
    }

    /// Names of the trusted keys that signed `info`.
    pub fn trusted_signers(&self, info: &PathInfo) -> Vec<String> {
        let store_dir = self.store.store_dir();
        self.trusted_keys
            .iter()
            .filter(|key| info.is_signed_by(store_dir, key))
            .map(|key| key.name().to_owned())
            .collect()
    }

    // ---- Closures ----

    pub fn closure(
        &self,
        paths: &BTreeSet<StorePath>,
        flip_direction: bool,
        include_outputs: bool,
        include_derivers: bool,
    ) -> SdkResult<BTreeSet<StorePath>> {
        let request = ClosureRequest {
            flip_direction,
            include_outputs,
            include_derivers,
        };
        self.closure_with(paths, &request)
    }

    /// Single-seed form of [`closure`](Self::closure).
    pub fn closure_of(
        &self,
        path: &StorePath,
        flip_direction: bool,
        include_outputs: bool,
        include_derivers: bool,
    ) -> SdkResult<BTreeSet<StorePath>> {
        let request = ClosureRequest {
            flip_direction,
            include_outputs,
            include_derivers,
        };
        Ok(ClosureComputer::new(self.store.as_ref()).closure_of(path, &request)?)
    }

    pub fn closure_with(
        &self,
        paths: &BTreeSet<StorePath>,
        request: &ClosureRequest,
    ) -> SdkResult<BTreeSet<StorePath>> {
        let closure = ClosureComputer::new(self.store.as_ref()).closure(paths, request)?;
        tracing::info!(seeds = paths.len(), nodes = closure.len(), "computed closure");
        Ok(closure)
    }

    pub fn closure_with_info(
        &self,
        paths: &BTreeSet<StorePath>,
        request: &ClosureRequest,
    ) -> SdkResult<BTreeMap<StorePath, PathInfo>> {
        Ok(ClosureComputer::new(self.store.as_ref()).closure_with_info(paths, request)?)
    }

    /// Closure in dependency order: every path after everything it
    /// references.
    pub fn sorted_closure(
        &self,
        paths: &BTreeSet<StorePath>,
        request: &ClosureRequest,
    ) -> SdkResult<Vec<StorePath>> {
        let infos = self.closure_with_info(paths, request)?;
        Ok(topological_order(&infos)?)
    }

    // ---- Export ----

    /// Stream the archive of `path` into `sink`. Blocks until done.
    pub fn export(&self, path: &StorePath, sink: &mut dyn StreamSink) -> SdkResult<u64> {
        let size = self.exporter.export(self.store.as_ref(), path, sink)?;
        tracing::info!(path = %path, size, "exported archive");
        Ok(size)
    }

    /// Start an export on the blocking thread pool and return its consumer
    /// half.
    ///
    /// The existence check also runs on the blocking pool. Unknown paths
    /// fail here; later failures arrive through the stream as truncation.
    /// Dropping the stream cancels the export.
    pub async fn export_stream(&self, path: &StorePath) -> SdkResult<NarStream> {
        let store = Arc::clone(&self.store);
        let path = path.clone();
        let (known, store, path) = tokio::task::spawn_blocking(move || {
            let known = store.contains(&path);
            (known, store, path)
        })
        .await
        .map_err(|e| SdkError::Runtime(e.to_string()))?;
        if !known? {
            return Err(StoreError::NotFound(path).into());
        }

        let (mut sink, stream) = nar_channel(self.channel_capacity);
        let exporter = self.exporter.clone();
        tokio::task::spawn_blocking(move || {
            match exporter.export(store.as_ref(), &path, &mut sink) {
                Ok(size) => tracing::debug!(path = %path, size, "streamed archive"),
                Err(e) if e.is_cancelled() => {
                    tracing::debug!(path = %path, "archive consumer went away")
                }
                Err(e) => tracing::warn!(path = %path, error = %e, "streamed export failed"),
            }
        });
        Ok(stream)
    }

    /// Re-serialize `path` and check it against its recorded hash and size.
    pub fn verify(&self, path: &StorePath) -> SdkResult<Verified> {
        let info = self.resolve(path)?;
        let mut sink = HashingSink::discarding();
        self.exporter.export(self.store.as_ref(), path, &mut sink)?;
        let (nar_hash, nar_size, _) = sink.finish();

        if nar_hash != *info.nar_hash() || nar_size != info.nar_size() {
            tracing::warn!(path = %path, "archive does not match recorded metadata");
            return Err(StoreError::corruption(
                path,
                format!(
                    "recorded {} ({} bytes), computed {} ({} bytes)",
                    info.nar_hash(),
                    info.nar_size(),
                    nar_hash,
                    nar_size
                ),
            )
            .into());
        }
        tracing::info!(path = %path, "verified archive");
        Ok(Verified { nar_hash, nar_size })
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("store_root", &self.store_root())
            .field("chunk_size", &self.exporter.chunk_size())
            .field("channel_capacity", &self.channel_capacity)
            .field("trusted_keys", &self.trusted_keys.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_crypto::Keypair;
    use keel_nar::{archive_to_vec, decode_nar, WriterSink};
    use keel_store::{ErrorKind, InMemoryStore, MemoryNode, MemoryObject, RawPathInfo};
    use keel_types::StoreDir;
    use std::fs;

    const A: &str = "7n0mbqydcipkpbxm24fab066lxk68aqk-a";
    const B: &str = "5rwxzi7pal3qhpsyfc16gzkh939q1np6-b";
    const C: &str = "3c8kxlpkawfdhbnkfrp1k9kah9ykhjgn-c";

    fn path(base: &str) -> StorePath {
        StorePath::from_base_name(base).unwrap()
    }

    /// Raw info with the correct hash and size for `tree`.
    fn info_for(tree: &MemoryNode, refs: &[&str]) -> RawPathInfo {
        let bytes = archive_to_vec(&MemoryObject::new(tree.clone())).unwrap();
        let refs: Vec<StorePath> = refs.iter().map(|r| path(r)).collect();
        RawPathInfo::new(&Hash::sha256_from_bytes(&bytes), bytes.len() as u64).with_references(&refs)
    }

    fn add(store: &InMemoryStore, base: &str, tree: MemoryNode, refs: &[&str]) {
        let info = info_for(&tree, refs);
        store.insert(path(base), info, tree);
    }

    /// A -> {B, C}, B -> {}, C -> {A}; A holds a single file "hello".
    fn handle() -> StoreHandle {
        let store = InMemoryStore::default();
        add(
            &store,
            A,
            MemoryNode::directory([("hello", MemoryNode::regular("hi"))]),
            &[B, C],
        );
        add(&store, B, MemoryNode::regular("b"), &[]);
        add(&store, C, MemoryNode::symlink(A), &[A]);
        StoreHandle::new(Arc::new(store))
    }

    fn set(bases: &[&str]) -> BTreeSet<StorePath> {
        bases.iter().map(|b| path(b)).collect()
    }

    // ---- Paths and lookup ----

    #[test]
    fn store_root_and_paths() {
        let h = handle();
        assert_eq!(h.store_root(), "/nix/store");
        assert_eq!(h.full_path(&path(A)), PathBuf::from(format!("/nix/store/{A}")));
        assert_eq!(h.parse_store_path(&format!("/nix/store/{A}/hello")).unwrap(), path(A));
        assert_eq!(h.parse_store_path(A).unwrap(), path(A));
        assert!(matches!(
            h.parse_store_path("/usr/bin/env"),
            Err(SdkError::InvalidPath(_))
        ));
        assert!(h.parse_store_path("garbage").is_err());
    }

    #[test]
    fn resolve_unknown_is_not_found() {
        let h = handle();
        let err = h
            .resolve(&path("00000000000000000000000000000000-nope"))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn hash_part_lookup() {
        let h = handle();
        assert_eq!(
            h.query_path_from_hash_part(path(B).hash_part()).unwrap(),
            Some(path(B))
        );
        assert!(h.query_path_from_hash_part("too-short").is_err());
    }

    // ---- Closures ----

    #[test]
    fn closure_forward_and_reverse() {
        let h = handle();
        assert_eq!(h.closure(&set(&[A]), false, false, false).unwrap(), set(&[A, B, C]));
        assert_eq!(h.closure(&set(&[B]), false, false, false).unwrap(), set(&[B]));
        assert_eq!(h.closure(&set(&[B]), true, false, false).unwrap(), set(&[A, B, C]));
    }

    #[test]
    fn single_and_multi_seed_forms_agree() {
        let h = handle();
        for base in [A, B, C] {
            for flip in [false, true] {
                assert_eq!(
                    h.closure_of(&path(base), flip, false, false).unwrap(),
                    h.closure(&set(&[base]), flip, false, false).unwrap()
                );
            }
        }
        let union: BTreeSet<StorePath> = [B, C]
            .iter()
            .flat_map(|b| h.closure_of(&path(b), false, false, false).unwrap())
            .collect();
        assert_eq!(h.closure(&set(&[B, C]), false, false, false).unwrap(), union);
        assert!(h
            .closure_of(&path("00000000000000000000000000000000-nope"), false, false, false)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn sorted_closure_rejects_cycle() {
        let h = handle();
        let err = h
            .sorted_closure(&set(&[A]), &ClosureRequest::forward())
            .unwrap_err();
        assert!(matches!(
            err,
            SdkError::Closure(keel_closure::ClosureError::CycleDetected(_))
        ));
        assert_eq!(
            h.sorted_closure(&set(&[B]), &ClosureRequest::forward())
                .unwrap(),
            vec![path(B)]
        );
    }

    // ---- Export and verify ----

    #[test]
    fn export_single_file_object() {
        let h = handle();
        let mut sink = WriterSink::new(Vec::new());
        let size = h.export(&path(A), &mut sink).unwrap();
        let bytes = sink.into_inner();
        assert_eq!(size, bytes.len() as u64);
        let MemoryNode::Directory { entries } = decode_nar(&bytes).unwrap() else {
            panic!("expected a directory");
        };
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[&b"hello"[..]], MemoryNode::regular("hi"));
    }

    #[test]
    fn verify_matches_recorded_hash() {
        let h = handle();
        let verified = h.verify(&path(A)).unwrap();
        let info = h.resolve(&path(A)).unwrap();
        assert_eq!(&verified.nar_hash, info.nar_hash());
        assert_eq!(verified.nar_size, info.nar_size());
    }

    #[test]
    fn verify_detects_mismatch() {
        let store = InMemoryStore::default();
        let tree = MemoryNode::regular("actual");
        let mut info = info_for(&tree, &[]);
        info.nar_hash = Hash::sha256_from_bytes(b"something else").to_typed_base32();
        store.insert(path(A), info, tree);
        let h = StoreHandle::new(Arc::new(store));
        let err = h.verify(&path(A)).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Corruption));
    }

    #[test]
    fn trusted_signers_lists_matching_keys() {
        let keypair = Keypair::generate("cache-1").unwrap();
        let other = Keypair::generate("other-1").unwrap();
        let tree = MemoryNode::regular("x");
        let unsigned = info_for(&tree, &[]);
        let sig = keel_store::PathInfo::from_raw(path(A), unsigned.clone())
            .unwrap()
            .sign(&StoreDir::default(), &keypair);

        let store = InMemoryStore::default();
        store.insert(path(A), unsigned.with_signature(sig), tree);
        let h = StoreHandle::new(Arc::new(store))
            .with_trusted_keys(vec![keypair.to_public_key(), other.to_public_key()]);
        let info = h.resolve(&path(A)).unwrap();
        assert_eq!(h.trusted_signers(&info), ["cache-1"]);
    }

    #[tokio::test]
    async fn export_stream_delivers_archive() {
        let h = handle().with_export_settings(16, 2);
        let stream = h.export_stream(&path(A)).await.unwrap();
        let bytes = stream.collect().await.unwrap();
        let expected = {
            let mut sink = WriterSink::new(Vec::new());
            h.export(&path(A), &mut sink).unwrap();
            sink.into_inner()
        };
        assert_eq!(bytes, expected);
    }

    #[tokio::test]
    async fn export_stream_unknown_path_fails_early() {
        let h = handle();
        let err = h
            .export_stream(&path("00000000000000000000000000000000-nope"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn export_stream_survives_dropped_consumer() {
        let h = handle().with_export_settings(8, 1);
        let mut stream = h.export_stream(&path(A)).await.unwrap();
        let first = stream.next_chunk().await.unwrap();
        assert!(first.is_some());
        drop(stream);
        // The producer notices cancellation on its next write; the handle
        // stays usable.
        assert!(h.verify(&path(A)).is_ok());
    }

    /// Delegates to an in-memory store and records which threads looked
    /// paths up.
    struct ThreadRecorder {
        inner: InMemoryStore,
        lookups: std::sync::Mutex<Vec<std::thread::ThreadId>>,
    }

    impl StoreProvider for ThreadRecorder {
        fn store_dir(&self) -> &StoreDir {
            self.inner.store_dir()
        }
        fn lookup(&self, path: &StorePath) -> keel_store::StoreResult<Option<RawPathInfo>> {
            self.lookups.lock().unwrap().push(std::thread::current().id());
            self.inner.lookup(path)
        }
        fn query_path_from_hash_part(
            &self,
            hash: &StorePathHash,
        ) -> keel_store::StoreResult<Option<StorePath>> {
            self.inner.query_path_from_hash_part(hash)
        }
        fn open_object(
            &self,
            path: &StorePath,
        ) -> keel_store::StoreResult<Box<dyn keel_store::ObjectReader>> {
            self.inner.open_object(path)
        }
    }

    #[tokio::test]
    async fn export_stream_keeps_lookups_off_the_async_thread() {
        let inner = InMemoryStore::default();
        add(&inner, B, MemoryNode::regular("b"), &[]);
        let store = Arc::new(ThreadRecorder {
            inner,
            lookups: std::sync::Mutex::new(Vec::new()),
        });
        let h = StoreHandle::new(store.clone());

        let bytes = h.export_stream(&path(B)).await.unwrap().collect().await.unwrap();
        assert_eq!(decode_nar(&bytes).unwrap(), MemoryNode::regular("b"));
        let err = h
            .export_stream(&path("00000000000000000000000000000000-nope"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let here = std::thread::current().id();
        let lookups = store.lookups.lock().unwrap();
        assert!(!lookups.is_empty());
        assert!(lookups.iter().all(|id| *id != here));
    }

    // ---- Local store ----

    #[test]
    fn open_local_store_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            store_dir: dir.path().join("store"),
            db_dir: dir.path().join("db"),
            ..StoreConfig::default()
        };
        fs::create_dir_all(config.store_dir.join(A)).unwrap();
        fs::write(config.store_dir.join(A).join("hello"), b"hi").unwrap();

        let h = StoreHandle::open(&config).unwrap();
        let tree = MemoryNode::directory([("hello", MemoryNode::regular("hi"))]);
        let local = LocalStore::open(config.store_dir().unwrap(), &config.db_dir).unwrap();
        local
            .register(&path(A), &info_for(&tree, &[]), &BTreeSet::new())
            .unwrap();

        assert_eq!(h.store_root(), config.store_dir.to_string_lossy());
        assert!(h.verify(&path(A)).is_ok());
        assert_eq!(h.closure(&set(&[A]), false, false, false).unwrap(), set(&[A]));
    }

    #[test]
    fn open_rejects_invalid_config() {
        let config = StoreConfig {
            export_chunk_size: 0,
            ..StoreConfig::default()
        };
        assert!(matches!(
            StoreHandle::open(&config),
            Err(SdkError::Config(_))
        ));
    }
}
