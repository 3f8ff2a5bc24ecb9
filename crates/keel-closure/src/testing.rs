//! Graph fixtures shared by the closure tests.

use keel_crypto::Hash;
use keel_store::{InMemoryStore, MemoryNode, RawPathInfo};
use keel_types::StorePath;
use proptest::prelude::*;

pub fn path(base: &str) -> StorePath {
    StorePath::from_base_name(base).unwrap()
}

/// Distinct path per index; digits are valid hash characters.
pub fn node(i: usize) -> StorePath {
    path(&format!("{i:032}-node{i}"))
}

pub fn raw(refs: &[&StorePath]) -> RawPathInfo {
    RawPathInfo::new(&Hash::sha256_from_bytes(b"node"), 128).with_references(refs.iter().copied())
}

/// Random reference graph. Every third node is a derivation; a node whose
/// deriver is a derivation is one of its outputs.
#[derive(Clone, Debug)]
pub struct Graph {
    pub refs: Vec<Vec<usize>>,
    pub derivers: Vec<Option<usize>>,
}

impl Graph {
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn path(&self, i: usize) -> StorePath {
        if i % 3 == 0 {
            path(&format!("{i:032}-node{i}.drv"))
        } else {
            node(i)
        }
    }
}

pub fn any_graph() -> impl Strategy<Value = Graph> {
    (1usize..10).prop_flat_map(|n| {
        (
            prop::collection::vec(prop::collection::vec(0..n, 0..4), n),
            prop::collection::vec(prop::option::of(0..n), n),
        )
            .prop_map(|(refs, derivers)| Graph { refs, derivers })
    })
}

pub fn graph_store(graph: &Graph) -> InMemoryStore {
    let store = InMemoryStore::default();
    for i in 0..graph.len() {
        let refs: Vec<StorePath> = graph.refs[i].iter().map(|&r| graph.path(r)).collect();
        let mut info = RawPathInfo::new(&Hash::sha256_from_bytes(b"node"), 128).with_references(&refs);
        if let Some(d) = graph.derivers[i] {
            info = info.with_deriver(&graph.path(d));
        }
        store.insert(graph.path(i), info, MemoryNode::empty_directory());
    }
    for d in (0..graph.len()).filter(|d| d % 3 == 0) {
        let outputs = (0..graph.len())
            .filter(|&j| graph.derivers[j] == Some(d))
            .map(|j| graph.path(j));
        store.set_derivation_outputs(graph.path(d), outputs);
    }
    store
}
