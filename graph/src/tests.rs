// Copyright 2022 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use task_executor::Executor;
use tokio::time::timeout;

use crate::{Context, Graph, InvalidationResult, Node, NodeError};

fn cancelled() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}

/// Shared state behind every `CountingNode` in a test: stands in for "the rest of the world" a
/// real `Node::run` would observe through its context. Changing a salt and re-requesting a Node
/// is the test-level equivalent of a file changing on disk.
#[derive(Debug, Default)]
struct World {
    edges: HashMap<u64, Vec<u64>>,
    salts: Mutex<HashMap<u64, i64>>,
    errors: Mutex<HashSet<u64>>,
    runs: Mutex<Vec<u64>>,
}

impl World {
    fn new(edges: HashMap<u64, Vec<u64>>) -> Arc<World> {
        Arc::new(World {
            edges,
            ..World::default()
        })
    }

    fn set_salt(&self, id: u64, value: i64) {
        self.salts.lock().insert(id, value);
    }

    fn set_error(&self, id: u64) {
        self.errors.lock().insert(id);
    }

    fn clear_error(&self, id: u64) {
        self.errors.lock().remove(&id);
    }

    fn runs(&self) -> Vec<u64> {
        self.runs.lock().clone()
    }
}

/// A Node whose value is its own salt plus the sum of its dependencies' values (as declared in
/// `World::edges`). Two `CountingNode`s are equal (and hash equal) iff their ids match, regardless
/// of salt: the id is the key's identity, the salt is "the state of the world" it observes.
#[derive(Clone, Debug)]
struct CountingNode {
    id: u64,
    world: Arc<World>,
}

impl CountingNode {
    fn new(world: &Arc<World>, id: u64) -> CountingNode {
        CountingNode {
            id,
            world: world.clone(),
        }
    }
}

impl PartialEq for CountingNode {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for CountingNode {}
impl Hash for CountingNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
impl std::fmt::Display for CountingNode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "CountingNode({})", self.id)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum CountingError {
    Invalidated,
    Cancelled,
    Cyclic(Vec<String>),
    Generic(String),
    Failed(u64),
}

impl NodeError for CountingError {
    fn invalidated() -> Self {
        CountingError::Invalidated
    }
    fn cancelled() -> Self {
        CountingError::Cancelled
    }
    fn cyclic(path: Vec<String>) -> Self {
        CountingError::Cyclic(path)
    }
    fn generic(msg: String) -> Self {
        CountingError::Generic(msg)
    }
}

#[async_trait]
impl Node for CountingNode {
    type Item = i64;
    type Error = CountingError;

    async fn run(self, context: Context<Self>) -> Result<i64, CountingError> {
        self.world.runs.lock().push(self.id);
        if self.world.errors.lock().contains(&self.id) {
            return Err(CountingError::Failed(self.id));
        }
        let dep_ids = self.world.edges.get(&self.id).cloned().unwrap_or_default();
        let mut total = *self.world.salts.lock().get(&self.id).unwrap_or(&0);
        for dep_id in dep_ids {
            total += context.get(CountingNode::new(&self.world, dep_id)).await?;
        }
        Ok(total)
    }
}

#[tokio::test]
async fn caches_and_does_not_rerun_when_unchanged() {
    let world = World::new(HashMap::from([(2, vec![1]), (1, vec![0])]));
    let graph: Graph<CountingNode> = Graph::new(Executor::new());
    let context = graph.context(cancelled());

    let top = CountingNode::new(&world, 2);
    assert_eq!(context.get(top.clone()).await, Ok(0));
    assert_eq!(world.runs(), vec![2, 1, 0]);

    // Re-requesting without any change in the world reuses every cached value: no Node reruns.
    assert_eq!(context.get(top).await, Ok(0));
    assert_eq!(world.runs(), vec![2, 1, 0]);
}

#[tokio::test]
async fn invalidate_and_rerun_on_changed_input() {
    let world = World::new(HashMap::from([(2, vec![1]), (1, vec![0])]));
    let graph: Graph<CountingNode> = Graph::new(Executor::new());
    let context = graph.context(cancelled());
    let top = CountingNode::new(&world, 2);

    assert_eq!(context.get(top.clone()).await, Ok(0));

    world.set_salt(0, 10);
    assert_eq!(
        graph.invalidate_from_roots(false, |n| n.id == 0),
        InvalidationResult {
            cleared: 1,
            dirtied: 2,
        }
    );

    assert_eq!(context.get(top).await, Ok(10));
    assert_eq!(world.runs(), vec![2, 1, 0, 0, 1, 2]);
}

#[tokio::test]
async fn early_cutoff_skips_dependents_of_an_unchanged_value() {
    let world = World::new(HashMap::from([(2, vec![1]), (1, vec![0])]));
    let graph: Graph<CountingNode> = Graph::new(Executor::new());
    let context = graph.context(cancelled());
    let top = CountingNode::new(&world, 2);

    assert_eq!(context.get(top.clone()).await, Ok(0));

    // Dirty the leaf without changing its salt: it reruns and produces the same value, so its
    // dependents must not rerun.
    assert_eq!(
        graph.invalidate_from_roots(false, |n| n.id == 0),
        InvalidationResult {
            cleared: 1,
            dirtied: 2,
        }
    );
    assert_eq!(context.get(top).await, Ok(0));
    assert_eq!(world.runs(), vec![2, 1, 0, 0]);
}

#[tokio::test]
async fn error_propagates_without_caching() {
    let world = World::new(HashMap::from([(1, vec![0])]));
    world.set_error(0);
    let graph: Graph<CountingNode> = Graph::new(Executor::new());
    let context = graph.context(cancelled());
    let top = CountingNode::new(&world, 1);

    assert_eq!(
        context.get(top.clone()).await,
        Err(CountingError::Failed(0))
    );

    // The failure is not cached: fixing the underlying problem and re-requesting succeeds.
    world.clear_error(0);
    assert_eq!(context.get(top).await, Ok(0));
}

#[tokio::test]
async fn get_or_recover_converts_a_dependency_failure() {
    let world = World::new(HashMap::new());
    world.set_error(0);
    let graph: Graph<CountingNode> = Graph::new(Executor::new());
    let context = graph.context(cancelled());

    let recovered = context
        .get_or_recover(CountingNode::new(&world, 0), |_| Ok(-1))
        .await;
    assert_eq!(recovered, Ok(-1));
}

#[tokio::test]
async fn concurrent_requests_for_the_same_node_run_once() {
    let world = World::new(HashMap::new());
    let graph: Graph<CountingNode> = Graph::new(Executor::new());
    let context = graph.context(cancelled());
    let node = CountingNode::new(&world, 0);

    let (a, b) = tokio::join!(context.get(node.clone()), context.get(node));
    assert_eq!(a, Ok(0));
    assert_eq!(b, Ok(0));
    assert_eq!(world.runs(), vec![0]);
}

#[tokio::test]
async fn cycles_are_detected_and_terminated() {
    let world = World::new(HashMap::from([(0, vec![1]), (1, vec![0])]));
    let graph: Graph<CountingNode> =
        Graph::new_with_invalidation_delay(Executor::new(), Duration::from_millis(20));
    let context = graph.context(cancelled());

    let result = timeout(
        Duration::from_secs(10),
        context.get(CountingNode::new(&world, 0)),
    )
    .await
    .expect("cycle was not detected within the timeout");

    assert!(matches!(result, Err(CountingError::Cyclic(_))));
}
