// Copyright 2018 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
#![deny(
    clippy::all,
    clippy::default_trait_access,
    clippy::expl_impl_clone_on_copy,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::unseparated_literal_suffix,
    clippy::used_underscore_binding
)]
#![allow(clippy::match_ref_pats)]
#![allow(
    clippy::len_without_is_empty,
    clippy::redundant_field_names,
    clippy::too_many_arguments
)]
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]
#![allow(clippy::mutex_atomic)]

//! The generic incremental-computation core of §4.7: a keyed, demand-driven, parallel graph of
//! `Node` implementations, with dependency discovery, early cutoff, cycle detection, and
//! invalidation. See `context` for the environment a `Node::run` is handed, and `entry` for the
//! per-key state machine (§3 "Lifecycles").

mod context;
mod entry;
mod interrupt;
mod node;

#[cfg(test)]
mod tests;

pub use crate::context::Context;
pub use crate::entry::Generation;
pub use crate::node::{EntryId, Node, NodeError};

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use petgraph::graph::DiGraph;
use petgraph::Direction;
use task_executor::Executor;
use tokio::sync::broadcast;
use tokio::time::sleep;

use crate::entry::{Action, Entry, NodeResult, RunOutcome, RunToken};

type PGraph<N> = DiGraph<Entry<N>, (), u32>;

/// The outcome of one `invalidate_from_roots` call (§4.8's change detector feeds invalidation
/// through this; "roots" are the Nodes the predicate directly matches).
#[derive(Debug, Eq, PartialEq)]
pub struct InvalidationResult {
    /// Nodes matching the predicate, cleared entirely (their next run starts from scratch).
    pub cleared: usize,
    /// Transitive dependents of the cleared set, marked dirty (their value is kept but will be
    /// rechecked against their dependencies' current generations before reuse).
    pub dirtied: usize,
}

struct InnerGraph<N: Node> {
    nodes: HashMap<N, EntryId>,
    pg: PGraph<N>,
}

impl<N: Node> InnerGraph<N> {
    fn entry_id(&self, node: &N) -> Option<EntryId> {
        self.nodes.get(node).copied()
    }

    fn entry_for_id(&self, id: EntryId) -> Option<&Entry<N>> {
        self.pg.node_weight(id)
    }

    fn ensure_entry(&mut self, node: N) -> EntryId {
        if let Some(&id) = self.nodes.get(&node) {
            return id;
        }
        let id = self.pg.add_node(Entry::new(node.clone()));
        self.nodes.insert(node, id);
        id
    }

    /// A breadth-first walk from `roots` in `direction`, stopping at (but not descending past)
    /// any node for which `stop` returns true.
    fn walk(
        &self,
        roots: VecDeque<EntryId>,
        direction: Direction,
        stop: impl Fn(EntryId) -> bool,
    ) -> Vec<EntryId> {
        let mut walked = HashSet::new();
        let mut deque = roots;
        let mut out = Vec::new();
        while let Some(id) = deque.pop_front() {
            if !walked.insert(id) || stop(id) {
                continue;
            }
            deque.extend(self.pg.neighbors_directed(id, direction));
            out.push(id);
        }
        out
    }

    /// Clears every entry matching `predicate`, and dirties their transitive dependents (§4.7
    /// "done → dirty"). Matches §4.5's requirement that a `!restartable` node's dependents are not
    /// dirtied through it (invalidation "does not pass through" such a node).
    fn invalidate_from_roots<P: Fn(&N) -> bool>(
        &mut self,
        log_dirtied: bool,
        predicate: P,
    ) -> InvalidationResult {
        let root_ids: HashSet<EntryId> = self
            .nodes
            .iter()
            .filter_map(|(node, &id)| {
                if predicate(node) && self.entry_for_id(id).is_some_and(Entry::is_started) {
                    Some(id)
                } else {
                    None
                }
            })
            .collect();

        let transitive_ids: Vec<EntryId> = self
            .walk(
                root_ids.iter().copied().collect(),
                Direction::Incoming,
                |id| {
                    let entry = self.unsafe_entry_for_id(id);
                    !entry.node().restartable() && entry.is_running()
                },
            )
            .into_iter()
            .filter(|id| !root_ids.contains(id))
            .collect();

        let result = InvalidationResult {
            cleared: root_ids.len(),
            dirtied: transitive_ids.len(),
        };
        if root_ids.is_empty() {
            return result;
        }

        for id in &root_ids {
            if let Some(entry) = self.pg.node_weight(*id) {
                entry.clear();
            }
        }
        // The cleared roots' outbound edges no longer mean anything: the next run will record a
        // fresh dependency set. Dependents' edges are left intact until they are next evaluated
        // (§4.7 "the new dep set replaces the old").
        self.pg.retain_edges(|pg, edge| {
            pg.edge_endpoints(edge)
                .map(|(src, _)| !root_ids.contains(&src))
                .unwrap_or(true)
        });

        for id in &transitive_ids {
            if let Some(entry) = self.pg.node_weight(*id) {
                if log_dirtied {
                    log::info!("Dirtying {}", entry.node());
                }
                entry.dirty();
            }
        }

        result
    }

    fn unsafe_entry_for_id(&self, id: EntryId) -> &Entry<N> {
        self.pg
            .node_weight(id)
            .expect("EntryId referred to a vertex that is not in this graph")
    }

    /// Finds cycles among currently-`Running` nodes and terminates one member of each with a
    /// `cyclic` error (§4.7 "Cycle detection"). Run periodically in the background rather than
    /// inline in `get`, so that a Node which never participates in a cycle never pays for the
    /// check.
    fn terminate_cycles(&mut self) {
        let running_graph = self.pg.filter_map(
            |idx, entry| entry.is_running().then_some(idx),
            |_, _| Some(()),
        );
        // Kosaraju rather than Tarjan: this runs repeatedly and only needs "some" SCC, not the
        // minimal decomposition, and is simpler to reason about across a graph that is mutating
        // concurrently with the check.
        for scc in petgraph::algo::kosaraju_scc(&running_graph) {
            if scc.len() <= 1 {
                continue;
            }
            let candidate = *scc.iter().max_by_key(|id| running_graph[**id]).unwrap();
            let predecessor = running_graph
                .neighbors_directed(candidate, Direction::Incoming)
                .find(|id| scc.contains(id));
            let Some(predecessor) = predecessor else {
                continue;
            };
            // Indices into `running_graph` (the filtered, reindexed subgraph), not into `self.pg`.
            let path: Vec<_> = petgraph::algo::all_simple_paths::<Vec<_>, _>(
                &running_graph,
                candidate,
                predecessor,
                0,
                None,
            )
            .next()
            .unwrap_or_default();
            let path_names = path
                .into_iter()
                .map(|idx| self.pg[running_graph[idx]].node().to_string())
                .collect();
            let real_id = running_graph[candidate];
            self.pg[real_id].terminate(N::Error::cyclic(path_names));
        }
    }
}

/// A DAG (enforced on mutation) of `Entry`s, one per distinct `Node` ever demanded. The only
/// shared mutable resource in the concurrency model of §5: reads of `done` entries and the
/// structural mutations below may all happen concurrently, synchronized per-entry (`Entry`'s own
/// mutex) or, for structural changes (adding a vertex/edge), under `InnerGraph`'s single lock,
/// held only for the duration of the mutation itself.
pub struct Graph<N: Node> {
    inner: Arc<Mutex<InnerGraph<N>>>,
    executor: Executor,
    invalidation_delay: Duration,
}

impl<N: Node> Clone for Graph<N> {
    fn clone(&self) -> Self {
        Graph {
            inner: self.inner.clone(),
            executor: self.executor.clone(),
            invalidation_delay: self.invalidation_delay,
        }
    }
}

impl<N: Node> Graph<N> {
    pub fn new(executor: Executor) -> Graph<N> {
        Self::new_with_invalidation_delay(executor, Duration::from_millis(500))
    }

    pub fn new_with_invalidation_delay(executor: Executor, invalidation_delay: Duration) -> Graph<N> {
        let inner = Arc::new(Mutex::new(InnerGraph {
            nodes: HashMap::new(),
            pg: DiGraph::new(),
        }));
        let _ = executor.native_spawn(Self::cycle_check_task(
            Arc::downgrade(&inner),
            invalidation_delay,
        ));
        Graph {
            inner,
            executor,
            invalidation_delay,
        }
    }

    /// Periodically checks for cycles among `Running` nodes, so that a cycle is eventually
    /// terminated even though no individual `Node::run` can detect participating in one.
    async fn cycle_check_task(inner: Weak<Mutex<InnerGraph<N>>>, period: Duration) {
        loop {
            sleep(period).await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            inner.lock().terminate_cycles();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().nodes.len()
    }

    /// Builds a fresh top-level `Context` (no `entry_id`: not itself computing any Node) bound to
    /// this graph and the given cancellation flag (§6 "evaluate(keys, keep_going, parallelism,
    /// listener)" builds one of these per top-level request).
    pub fn context(&self, cancelled: Arc<AtomicBool>) -> Context<N> {
        Context::new(self.clone(), cancelled)
    }

    pub fn peek(&self, node: &N) -> Option<N::Item> {
        let inner = self.inner.lock();
        inner
            .entry_id(node)
            .and_then(|id| inner.entry_for_id(id))
            .and_then(Entry::peek)
    }

    pub fn invalidate_from_roots<P: Fn(&N) -> bool>(
        &self,
        log_dirtied: bool,
        predicate: P,
    ) -> InvalidationResult {
        self.inner.lock().invalidate_from_roots(log_dirtied, predicate)
    }

    /// Requests `dst_node`'s value, recording a dependency edge from `src_id` if present (§3
    /// "Ownership": the engine, not the function, owns dep-set and version metadata).
    pub(crate) async fn get_inner(
        &self,
        src_id: Option<EntryId>,
        context: &Context<N>,
        dst_node: N,
    ) -> Result<(N::Item, Generation, EntryId), N::Error> {
        let (entry, dst_id) = {
            let mut inner = self.inner.lock();
            let dst_id = inner.ensure_entry(dst_node);
            if let Some(src_id) = src_id {
                inner.pg.update_edge(src_id, dst_id, ());
            }
            let entry = inner
                .entry_for_id(dst_id)
                .cloned()
                .expect("just inserted above");
            (entry, dst_id)
        };

        let (item, generation) = self.run_entry(&entry, dst_id, context).await?;
        Ok((item, generation, dst_id))
    }

    /// Drives one entry to a value: returns immediately if already clean, joins an in-flight run
    /// if one exists, or starts one (running the Node fresh, or cleaning it by rechecking its
    /// previous dependency generations; see `run_or_clean`).
    async fn run_entry(
        &self,
        entry: &Entry<N>,
        entry_id: EntryId,
        context: &Context<N>,
    ) -> Result<(N::Item, Generation), N::Error> {
        match entry.start() {
            Action::Ready(result) => result,
            Action::Wait(mut rx) => rx
                .recv()
                .await
                .unwrap_or_else(|_| Err(N::Error::invalidated())),
            Action::Run {
                run_token,
                previous,
                waiter,
                listener,
            } => {
                self.drive_run(entry.clone(), entry_id, context, run_token, previous, waiter, listener)
                    .await
            }
        }
    }

    /// Spawns the run-or-clean work onto the executor (so that it keeps making progress even if
    /// this particular caller's future is later dropped — §5 "Cancellation... In-flight I/O is
    /// not force-killed"), then waits for its result alongside every other concurrent caller
    /// subscribed to the same broadcast `waiter`.
    #[allow(clippy::too_many_arguments)]
    async fn drive_run(
        &self,
        entry: Entry<N>,
        entry_id: EntryId,
        context: &Context<N>,
        run_token: RunToken,
        previous: Option<(N::Item, Vec<(EntryId, Generation)>)>,
        waiter: broadcast::Sender<NodeResult<N>>,
        listener: crate::interrupt::Listener<N::Error>,
    ) -> Result<(N::Item, Generation), N::Error> {
        let mut rx = waiter.subscribe();
        let node_context = context.clone_for(entry_id);
        let graph = self.clone();
        let node = entry.node().clone();
        let previous_value = previous.as_ref().map(|(v, _)| v.clone());
        let previous_deps = previous.map(|(_, deps)| deps);
        let sender = waiter.clone();

        let _ = self.executor.native_spawn(async move {
            let mut listener = listener;
            // `run_or_clean`'s future is constructed eagerly by `select!`, which would move
            // `previous_deps` out from under the `Aborted` arm's handler; clone for it up front.
            let previous_deps_on_abort = previous_deps.clone().unwrap_or_default();
            let (outcome, dep_generations) = tokio::select! {
                err = listener.recv_abort() => (RunOutcome::Aborted(err), previous_deps_on_abort),
                outcome_and_deps = graph.run_or_clean(node, node_context, previous_deps) => outcome_and_deps,
            };
            entry.complete(run_token, dep_generations, sender, previous_value, outcome);
        });

        rx.recv().await.unwrap_or_else(|_| Err(N::Error::invalidated()))
    }

    /// Either reuses a cached value (when every previously-recorded dependency is still at the
    /// same `Generation`: §4.7 "early cutoff") or runs the Node fresh, returning its outcome and
    /// the dependency set future callers should compare against.
    async fn run_or_clean(
        &self,
        node: N,
        context: Context<N>,
        previous_deps: Option<Vec<(EntryId, Generation)>>,
    ) -> (RunOutcome<N>, Vec<(EntryId, Generation)>) {
        if let Some(previous_deps) = previous_deps {
            if !self.dependencies_changed(&previous_deps, &context).await {
                return (RunOutcome::Clean, previous_deps);
            }
        }
        let result = node.run(context.clone()).await;
        let dep_generations = context.take_deps();
        (RunOutcome::Ran(result), dep_generations)
    }

    /// Forces each previous dependency to a value (running or cleaning it in turn, recursively)
    /// and compares its current `Generation` to the one recorded last time. Any mismatch, or any
    /// dependency erroring, counts as "changed" and forces a re-run.
    async fn dependencies_changed(
        &self,
        previous_deps: &[(EntryId, Generation)],
        context: &Context<N>,
    ) -> bool {
        for (dep_id, previous_generation) in previous_deps {
            let dep_entry = {
                let inner = self.inner.lock();
                inner.entry_for_id(*dep_id).cloned()
            };
            let Some(dep_entry) = dep_entry else {
                return true;
            };
            match self.run_entry(&dep_entry, *dep_id, context).await {
                Ok((_, generation)) if generation == *previous_generation => continue,
                _ => return true,
            }
        }
        false
    }
}
