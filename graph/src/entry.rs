// Copyright 2022 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::interrupt::{self, Interrupter};
use crate::node::{EntryId, Node};

/// Identifies one run of a Node. Bumped every time the Node transitions out of `Running`,
/// whether it completed, was cleaned, or was cleared out from under itself. A completion racing
/// against a stale `RunToken` is discarded (§4.7 "at most one function invocation in flight").
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct RunToken(u32);

impl RunToken {
    fn initial() -> RunToken {
        RunToken(0)
    }

    fn next(self) -> RunToken {
        RunToken(self.0 + 1)
    }
}

/// Bumped only when a Node's output value changes (or it runs for the first time). Consumers
/// record the Generation they observed a dependency at; comparing it on re-evaluation is the
/// early-cutoff check of §4.7/§8.2.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Generation(u32);

impl Generation {
    fn initial() -> Generation {
        Generation(0)
    }

    fn next(self) -> Generation {
        Generation(self.0 + 1)
    }
}

pub(crate) type NodeResult<N> = Result<(<N as Node>::Item, Generation), <N as Node>::Error>;

/// The value carried by a `Completed` entry: `Clean` is safe to hand back without rechecking
/// dependencies; `Dirty` has been invalidated (directly, or because the run that produced it was
/// aborted) and must have its dependency generations rechecked before its value can be reused.
#[derive(Clone, Debug)]
enum EntryResult<N: Node> {
    Clean(N::Item),
    Dirty(N::Item),
}

impl<N: Node> EntryResult<N> {
    fn value(&self) -> &N::Item {
        match self {
            EntryResult::Clean(v) | EntryResult::Dirty(v) => v,
        }
    }

    fn is_clean(&self) -> bool {
        matches!(self, EntryResult::Clean(_))
    }

    fn dirty(&mut self) {
        if let EntryResult::Clean(v) = self {
            *self = EntryResult::Dirty(v.clone());
        }
    }
}

/// A previous value plus the dependency generations it was computed from, carried across a
/// dirty/re-run cycle so that cleaning can reuse it without re-executing the Node.
type Previous<N> = (EntryResult<N>, Vec<(EntryId, Generation)>);

enum EntryState<N: Node> {
    NotStarted {
        run_token: RunToken,
        generation: Generation,
        previous_result: Option<Previous<N>>,
    },
    Running {
        run_token: RunToken,
        generation: Generation,
        waiter: broadcast::Sender<NodeResult<N>>,
        interrupter: Interrupter<N::Error>,
    },
    Completed {
        run_token: RunToken,
        generation: Generation,
        result: EntryResult<N>,
        dep_generations: Vec<(EntryId, Generation)>,
    },
}

impl<N: Node> EntryState<N> {
    fn initial() -> Self {
        EntryState::NotStarted {
            run_token: RunToken::initial(),
            generation: Generation::initial(),
            previous_result: None,
        }
    }
}

/// The outcome of one run-or-clean attempt, computed outside of the entry's lock (§5 "Functions
/// themselves do no locking").
pub(crate) enum RunOutcome<N: Node> {
    /// The Node ran fresh and produced this result.
    Ran(Result<N::Item, N::Error>),
    /// The Node's previous dependency generations were rechecked and found unchanged: its
    /// previous value (passed back into `Entry::complete` as `previous`) is reused without
    /// re-running (§4.7 "early cutoff").
    Clean,
    /// The Node was terminated mid-flight by the cycle checker (§4.7 "Cycle detection").
    Aborted(N::Error),
}

struct Inner<N: Node> {
    node: N,
    state: Mutex<EntryState<N>>,
}

/// A Node and its computation state, stored as the weight of one graph vertex. Cheap to clone
/// (an `Arc`), so callers can release the `InnerGraph` lock before awaiting a long-running
/// computation.
pub struct Entry<N: Node>(Arc<Inner<N>>);

impl<N: Node> Clone for Entry<N> {
    fn clone(&self) -> Self {
        Entry(self.0.clone())
    }
}

/// What a caller of `Entry::start` should do next, decided while holding the entry's lock.
pub(crate) enum Action<N: Node> {
    /// The entry is already clean and done: return this value immediately.
    Ready(Result<(N::Item, Generation), N::Error>),
    /// The entry is already running: subscribe and wait for its result.
    Wait(broadcast::Receiver<NodeResult<N>>),
    /// The entry was NotStarted, dirty, or needs re-checking: the caller must run or clean it,
    /// then call `Entry::complete` with the same `run_token` and `waiter`.
    Run {
        run_token: RunToken,
        previous: Option<(N::Item, Vec<(EntryId, Generation)>)>,
        waiter: broadcast::Sender<NodeResult<N>>,
        listener: interrupt::Listener<N::Error>,
    },
}

impl<N: Node> Entry<N> {
    pub(crate) fn new(node: N) -> Entry<N> {
        Entry(Arc::new(Inner {
            node,
            state: Mutex::new(EntryState::initial()),
        }))
    }

    pub fn node(&self) -> &N {
        &self.0.node
    }

    pub(crate) fn is_started(&self) -> bool {
        !matches!(&*self.0.state.lock(), EntryState::NotStarted { .. })
    }

    pub(crate) fn is_running(&self) -> bool {
        matches!(&*self.0.state.lock(), EntryState::Running { .. })
    }

    /// Returns the entry's value without forcing computation, iff it is already clean.
    pub(crate) fn peek(&self) -> Option<N::Item> {
        match &*self.0.state.lock() {
            EntryState::Completed { result, .. } if result.is_clean() => {
                Some(result.value().clone())
            }
            _ => None,
        }
    }

    /// Decides, under the entry's lock, what a caller wanting this entry's value should do. If a
    /// fresh run is needed, transitions the entry to `Running` and hands the caller everything it
    /// needs to drive that run and later call `complete`.
    pub(crate) fn start(&self) -> Action<N> {
        let mut state = self.0.state.lock();
        match &*state {
            EntryState::Running { waiter, .. } => return Action::Wait(waiter.subscribe()),
            EntryState::Completed {
                result, generation, ..
            } if result.is_clean() => {
                return Action::Ready(Ok((result.value().clone(), *generation)));
            }
            _ => (),
        }

        let (run_token, generation, previous) =
            match mem::replace(&mut *state, EntryState::initial()) {
                EntryState::NotStarted {
                    run_token,
                    generation,
                    previous_result,
                } => (run_token, generation, previous_result),
                EntryState::Completed {
                    run_token,
                    generation,
                    result,
                    dep_generations,
                } => (run_token, generation, Some((result, dep_generations))),
                EntryState::Running { .. } => unreachable!("handled above"),
            };

        let run_token = run_token.next();
        let (waiter, _rx) = broadcast::channel(1);
        let (interrupter, listener) = interrupt::channel();
        *state = EntryState::Running {
            run_token,
            generation,
            waiter: waiter.clone(),
            interrupter,
        };
        Action::Run {
            run_token,
            previous: previous.map(|(result, deps)| (result.value().clone(), deps)),
            waiter,
            listener,
        }
    }

    /// Marks this entry dirty (§4.7 "done → dirty"): a `Completed` entry keeps its value but will
    /// have its dependency generations rechecked on next demand; a `Running` entry is notified
    /// advisorily — its in-flight run is allowed to finish, because `complete`'s `Ran` handling
    /// always re-derives the generation by comparing against the *previous* value rather than
    /// trusting that nothing changed, so a late-arriving dirty signal cannot make it return a
    /// stale value without a subsequent caller noticing on the next dependency check. `NotStarted`
    /// has nothing to dirty.
    pub(crate) fn dirty(&self) {
        let mut state = self.0.state.lock();
        match &mut *state {
            EntryState::Completed { result, .. } => result.dirty(),
            EntryState::Running { interrupter, .. } => interrupter.dirty(),
            EntryState::NotStarted { .. } => (),
        }
    }

    /// Clears this entry's state entirely (§4.7 invalidation root): forces a fresh run with a new
    /// `RunToken`, discarding any in-flight run's result when it eventually arrives.
    pub(crate) fn clear(&self) {
        let mut state = self.0.state.lock();
        *state = match mem::replace(&mut *state, EntryState::initial()) {
            EntryState::NotStarted {
                run_token,
                generation,
                previous_result,
            } => EntryState::NotStarted {
                run_token: run_token.next(),
                generation,
                previous_result,
            },
            EntryState::Running {
                run_token,
                generation,
                ..
            } => EntryState::NotStarted {
                run_token: run_token.next(),
                generation,
                previous_result: None,
            },
            EntryState::Completed {
                run_token,
                generation,
                result,
                dep_generations,
            } => EntryState::NotStarted {
                run_token: run_token.next(),
                generation,
                previous_result: Some((result, dep_generations)),
            },
        };
    }

    /// Forcibly terminates a `Running` entry with a terminal error (§4.7 "Cycle detection"): used
    /// only by the background cycle checker.
    pub(crate) fn terminate(&self, err: N::Error) {
        let state = self.0.state.lock();
        if let EntryState::Running { interrupter, .. } = &*state {
            interrupter.abort(err);
        }
    }

    /// Called once the run-or-clean work started by `start` has produced an outcome. `previous`
    /// must be the same value `start` handed back in `Action::Run` (needed here to detect an
    /// unchanged result for early cutoff, and to fall back to on error). A mismatched `run_token`
    /// means this entry was cleared or re-started from under the caller in the meantime, so the
    /// result is discarded rather than overwriting newer state.
    pub(crate) fn complete(
        &self,
        run_token: RunToken,
        dep_generations: Vec<(EntryId, Generation)>,
        waiter: broadcast::Sender<NodeResult<N>>,
        previous: Option<N::Item>,
        outcome: RunOutcome<N>,
    ) {
        let mut state = self.0.state.lock();
        let generation = match &*state {
            EntryState::Running {
                run_token: current,
                generation,
                ..
            } if *current == run_token => *generation,
            _ => return,
        };

        *state = match outcome {
            RunOutcome::Aborted(err) => {
                let next_generation = generation.next();
                let _ = waiter.send(Err(err.clone()));
                EntryState::NotStarted {
                    run_token: run_token.next(),
                    generation: next_generation,
                    previous_result: previous.map(|v| (EntryResult::Dirty(v), dep_generations)),
                }
            }
            RunOutcome::Ran(Err(e)) => {
                let next_generation = generation.next();
                let _ = waiter.send(Err(e.clone()));
                EntryState::NotStarted {
                    run_token: run_token.next(),
                    generation: next_generation,
                    previous_result: previous.map(|v| (EntryResult::Dirty(v), dep_generations)),
                }
            }
            RunOutcome::Ran(Ok(value)) => {
                let changed = previous.as_ref() != Some(&value);
                let next_generation = if changed { generation.next() } else { generation };
                let _ = waiter.send(Ok((value.clone(), next_generation)));
                EntryState::Completed {
                    run_token,
                    generation: next_generation,
                    result: EntryResult::Clean(value),
                    dep_generations,
                }
            }
            RunOutcome::Clean => {
                let value =
                    previous.expect("RunOutcome::Clean is only produced when a previous value exists");
                let _ = waiter.send(Ok((value.clone(), generation)));
                EntryState::Completed {
                    run_token,
                    generation,
                    result: EntryResult::Clean(value),
                    dep_generations,
                }
            }
        };
    }
}
