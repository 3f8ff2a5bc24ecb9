//! Dependency ordering of a computed closure.

use std::collections::{BTreeMap, BTreeSet};

use keel_store::PathInfo;
use keel_types::StorePath;

use crate::error::{ClosureError, ClosureResult};

/// Order a closure so every path comes after all the paths it references.
///
/// Uses Kahn's algorithm. Only edges inside `infos` count and
/// self-references are ignored. Among paths that are ready at the same
/// time the smaller base name goes first, so the output is deterministic.
pub fn topological_order(infos: &BTreeMap<StorePath, PathInfo>) -> ClosureResult<Vec<StorePath>> {
    // Number of unplaced references per path.
    let mut pending: BTreeMap<&StorePath, usize> = BTreeMap::new();
    // Reverse edges: reference -> paths referencing it.
    let mut dependents: BTreeMap<&StorePath, Vec<&StorePath>> = BTreeMap::new();

    for (path, info) in infos {
        let refs = info
            .references()
            .iter()
            .filter(|r| *r != path && infos.contains_key(*r));
        let mut count = 0;
        for r in refs {
            dependents.entry(r).or_default().push(path);
            count += 1;
        }
        pending.insert(path, count);
    }

    let mut ready: BTreeSet<&StorePath> = pending
        .iter()
        .filter(|(_, &count)| count == 0)
        .map(|(&path, _)| path)
        .collect();
    let mut order = Vec::with_capacity(infos.len());

    while let Some(path) = ready.pop_first() {
        order.push(path.clone());
        for &dependent in dependents.get(path).into_iter().flatten() {
            if let Some(count) = pending.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(dependent);
                }
            }
        }
    }

    if order.len() < infos.len() {
        let stuck = pending
            .into_iter()
            .find(|(_, count)| *count > 0)
            .map(|(path, _)| path.clone());
        if let Some(path) = stuck {
            return Err(ClosureError::CycleDetected(path));
        }
    }

    Ok(order)
}
