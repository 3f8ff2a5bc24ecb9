//! Closure computation over the store reference graph.
//!
//! The reference graph is never built up front. [`ClosureComputer`] walks it
//! lazily, resolving each node through a
//! [`StoreProvider`](keel_store::StoreProvider), so the cost of a query is
//! proportional to the closure, not to the store.
//!
//! # Key Types
//!
//! - [`ClosureRequest`] -- direction and extra edge sets
//! - [`ClosureComputer`] -- worklist traversal with a visited set
//! - [`topological_order`] -- dependencies-first ordering of a closure

pub mod computer;
pub mod error;
pub mod request;
pub mod topo;

#[cfg(test)]
mod testing;

pub use computer::ClosureComputer;
pub use error::{ClosureError, ClosureResult};
pub use request::ClosureRequest;
pub use topo::topological_order;
