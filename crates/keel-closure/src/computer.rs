//! Worklist traversal of the reference graph.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use keel_store::{resolve, PathInfo, StoreProvider};
use keel_types::StorePath;

use crate::error::ClosureResult;
use crate::request::ClosureRequest;

/// Computes closures by resolving nodes lazily through a store provider.
///
/// The graph is never materialized: every visited node is resolved exactly
/// once, and the first lookup failure aborts the whole query. A partial
/// closure is never returned.
pub struct ClosureComputer<'a, S: StoreProvider + ?Sized> {
    store: &'a S,
}

impl<'a, S: StoreProvider + ?Sized> ClosureComputer<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// All paths reachable from `seeds` under `request`, seeds included.
    ///
    /// Equal to the union of the closures of each seed taken alone.
    pub fn closure<'p>(
        &self,
        seeds: impl IntoIterator<Item = &'p StorePath>,
        request: &ClosureRequest,
    ) -> ClosureResult<BTreeSet<StorePath>> {
        Ok(self.closure_with_info(seeds, request)?.into_keys().collect())
    }

    /// Closure of a single path.
    pub fn closure_of(
        &self,
        seed: &StorePath,
        request: &ClosureRequest,
    ) -> ClosureResult<BTreeSet<StorePath>> {
        self.closure([seed], request)
    }

    /// Like [`closure`](Self::closure), keeping the resolved record of every
    /// node.
    pub fn closure_with_info<'p>(
        &self,
        seeds: impl IntoIterator<Item = &'p StorePath>,
        request: &ClosureRequest,
    ) -> ClosureResult<BTreeMap<StorePath, PathInfo>> {
        let mut visited: BTreeMap<StorePath, PathInfo> = BTreeMap::new();
        let mut frontier: VecDeque<StorePath> = seeds
            .into_iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        while let Some(current) = frontier.pop_front() {
            if visited.contains_key(&current) {
                continue;
            }
            let info = resolve(self.store, &current)?;

            for next in self.edges(&info, request)? {
                if !visited.contains_key(&next) {
                    frontier.push_back(next);
                }
            }

            tracing::debug!(path = %current, visited = visited.len() + 1, "closure node");
            visited.insert(current, info);
        }

        tracing::debug!(
            nodes = visited.len(),
            reverse = request.flip_direction,
            "closure complete"
        );
        Ok(visited)
    }

    /// Outgoing edges of one node. Each option adds its own edge set.
    fn edges(&self, info: &PathInfo, request: &ClosureRequest) -> ClosureResult<BTreeSet<StorePath>> {
        let path = info.path();

        let mut edges = if request.flip_direction {
            self.store.reverse_references(path)?
        } else {
            info.references().clone()
        };

        if request.include_outputs && path.is_derivation() {
            edges.extend(self.store.derivation_outputs(path)?);
        }

        if request.include_derivers {
            if let Some(deriver) = info.deriver() {
                if self.store.contains(deriver)? {
                    edges.insert(deriver.clone());
                }
            }
        }

        Ok(edges)
    }
}
