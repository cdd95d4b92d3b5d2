// Copyright 2022 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::entry::Generation;
use crate::node::{Node, NodeError};
use crate::{EntryId, Graph};

/// The environment a `Node::run` implementation is handed (§6 "the environment"). `get` is the
/// only way a function may request another key's value; every call is recorded as a dependency
/// edge and a `Generation`, which `graph` later compares to decide early cutoff (§4.7).
///
/// Unlike the distilled spec's synchronous "restart on missing dependency" sentinel, `get` is an
/// `async fn`: a function `.await`s a dependency and is resumed by the executor once it completes,
/// rather than being re-invoked from the top (see SPEC_FULL.md §4.7 and DESIGN.md Open Question
/// 1). `values_missing()` has no counterpart here for the same reason — it would always be
/// `false`.
pub struct Context<N: Node> {
    entry_id: Option<EntryId>,
    dep_state: Arc<Mutex<Option<Vec<(EntryId, Generation)>>>>,
    graph: Graph<N>,
    cancelled: Arc<AtomicBool>,
}

impl<N: Node> Clone for Context<N> {
    fn clone(&self) -> Self {
        Context {
            entry_id: self.entry_id,
            dep_state: self.dep_state.clone(),
            graph: self.graph.clone(),
            cancelled: self.cancelled.clone(),
        }
    }
}

impl<N: Node> Context<N> {
    pub(crate) fn new(graph: Graph<N>, cancelled: Arc<AtomicBool>) -> Self {
        Context {
            entry_id: None,
            dep_state: Arc::new(Mutex::new(Some(Vec::new()))),
            graph,
            cancelled,
        }
    }

    /// Produces the context a particular entry's `Node::run` is invoked with: carries the same
    /// graph and cancellation flag, but a fresh, empty dependency set to accumulate into.
    pub(crate) fn clone_for(&self, entry_id: EntryId) -> Self {
        Context {
            entry_id: Some(entry_id),
            dep_state: Arc::new(Mutex::new(Some(Vec::new()))),
            graph: self.graph.clone(),
            cancelled: self.cancelled.clone(),
        }
    }

    pub fn graph(&self) -> &Graph<N> {
        &self.graph
    }

    pub(crate) fn entry_id(&self) -> Option<EntryId> {
        self.entry_id
    }

    /// Whether the build this context belongs to has been cancelled (§4.7 "Cancellation"). Checked
    /// at every `get` call, which is the only engine boundary a `Node::run` passes through.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Requests the value of `node`, recording it as a dependency of the entry this context was
    /// created for (if any — a top-level context created by `Graph::evaluate` has none).
    pub async fn get(&self, node: N) -> Result<N::Item, N::Error> {
        if self.is_cancelled() {
            return Err(N::Error::cancelled());
        }
        let (item, generation, dep_id) = self.graph.get_inner(self.entry_id, self, node).await?;
        if let Some(deps) = self.dep_state.lock().as_mut() {
            deps.push((dep_id, generation));
        }
        Ok(item)
    }

    /// Like `get`, but maps a failure through `recover` instead of propagating it, for call sites
    /// that want to turn an error into a typed fallback value rather than re-throw it (§7
    /// "Package parse failures produce a value with both an error and a partial package").
    pub async fn get_or_recover<F>(&self, node: N, recover: F) -> Result<N::Item, N::Error>
    where
        F: FnOnce(N::Error) -> Result<N::Item, N::Error>,
    {
        match self.get(node).await {
            Ok(item) => Ok(item),
            Err(e) => recover(e),
        }
    }

    /// Takes the set of `(dependency, generation-at-request-time)` pairs accumulated by `get`
    /// calls made through this context so far, leaving it empty. Called once, after a `Node::run`
    /// future completes, to record the entry's new dependency set.
    pub(crate) fn take_deps(&self) -> Vec<(EntryId, Generation)> {
        self.dep_state.lock().take().unwrap_or_default()
    }
}
