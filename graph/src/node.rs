// Copyright 2022 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt::{Debug, Display};
use std::hash::Hash;

use async_trait::async_trait;

use crate::context::Context;

/// Identifies a Node's vertex in the graph. 2^32 nodes ought to be more than enough for any one
/// build.
pub type EntryId = petgraph::graph::NodeIndex<u32>;

/// A unit of incremental computation (§3 "Key"/"Value"). `N` itself is the key; `N::Item` is the
/// value a successful computation produces; `N::Error` is what a failed one produces.
///
/// Implementations must be deterministic and side-effect-free except through the `Context` they
/// are handed (§4.7's "key property"): the same `self` and the same transitive dependency values
/// must yield the same `Item`.
#[async_trait]
pub trait Node: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static {
    type Item: Clone + Debug + Eq + Send + Sync + 'static;
    type Error: NodeError;

    async fn run(self, context: Context<Self>) -> Result<Self::Item, Self::Error>;

    /// Whether invalidation may dirty this node directly (§4.7). Nodes that should always be
    /// re-observed rather than invalidated out from under an in-flight run (a build-session
    /// counter, say) return `false`.
    fn restartable(&self) -> bool {
        true
    }

    /// Whether a successful result may be cached and reused across re-evaluations at all. A
    /// `false` here means the node is always re-run on demand, never read from `Completed`.
    fn cacheable(&self) -> bool {
        true
    }
}

/// The closed set of ways a `Node::run` can fail, from the engine's point of view (§4.10 is the
/// concrete enum built on top of this for `engine::NodeKey`).
pub trait NodeError: Clone + Debug + Send + Sync + 'static {
    /// The node's previous run was invalidated out from under it mid-flight.
    fn invalidated() -> Self;
    /// A cancellation signal was observed at an engine boundary (§4.7 "Cancellation").
    fn cancelled() -> Self;
    /// Every node named in `path` participates in a dependency cycle (§4.7 "Cycle detection").
    fn cyclic(path: Vec<String>) -> Self;
    /// An error with no more specific home; used internally by `graph` for invariant violations.
    fn generic(msg: String) -> Self;
}
