// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! `EngineCore`: the resources every registered function needs — the configured roots and their
//! `Vfs` handles, the engine's configuration record, and the shared executor (§2 item 0, `[ADDED]`
//! ambient stack). One `EngineCore` is built per `evaluate()` caller and shared (via `Arc`) by
//! every `NodeKey` it mints; see `nodes::NodeKey` for why it is carried on the key rather than
//! threaded through `graph::Context`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use options::EngineOptions;
use task_executor::Executor;

/// One `fs::FS` per configured package root (§3 "rooted path"): `PosixFS` itself is
/// single-rooted, so the multi-root search list lives here rather than in `fs`.
pub struct EngineCore {
    pub options: EngineOptions,
    pub roots: fs::Roots,
    pub vfs: Vec<Arc<fs::FS>>,
    pub executor: Executor,
    build_id: AtomicU64,
}

impl EngineCore {
    pub fn new(options: EngineOptions, executor: Executor) -> Result<EngineCore, String> {
        let roots = fs::Roots::new(options.package_roots.clone());
        let vfs = options
            .package_roots
            .iter()
            .map(|root| fs::FS::new(root, executor.clone()).map(Arc::new))
            .collect::<Result<Vec<_>, String>>()?;
        Ok(EngineCore {
            options,
            roots,
            vfs,
            executor,
            build_id: AtomicU64::new(0),
        })
    }

    pub fn vfs_for(&self, root: fs::Root) -> &Arc<fs::FS> {
        &self.vfs[root.0]
    }

    /// The current build-session counter (§4.9 "a `build_id` sentinel"). Bumped once per
    /// `evaluate()` call by `evaluation::Evaluator`.
    pub fn build_id(&self) -> u64 {
        self.build_id.load(Ordering::SeqCst)
    }

    pub(crate) fn bump_build_id(&self) -> u64 {
        self.build_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}
