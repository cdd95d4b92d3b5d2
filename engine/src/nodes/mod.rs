// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The registered-function families of §2, tied together as one `graph::Node` implementation.
//!
//! `graph::Context<N>` carries nothing but the dependency-recording machinery — there is no slot
//! for application state. A `NodeKey` therefore carries its own `Arc<EngineCore>` alongside the
//! part that actually identifies it (`NodeVariant`); `Eq`/`Hash`/`PartialEq` are implemented by
//! hand below to compare only the `variant`, so two keys built from the same `EngineCore` and the
//! same variant are the same graph node regardless of which `Arc` happened to mint them. This
//! mirrors the teacher's own habit of carrying non-identifying `Arc` fields on key structs (e.g. a
//! `Task`'s `side_effected` flag) rather than threading them through the generic engine.
//!
//! A `tokio::task_local!` was considered (the teacher uses one, `TASK_SIDE_EFFECTED`, for a
//! similar purpose) and rejected: `graph::Graph::drive_run` spawns each node's `run` on a fresh
//! task via `Executor::native_spawn`, which does not inherit a task-local scope entered once at
//! the top of `evaluate()`.

pub mod directory_listing;
pub mod file;
pub mod file_state;
pub mod package;
pub mod package_lookup;
pub mod target_pattern;
pub mod traversal;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::EngineCore;
use crate::error::EngineError;

pub use directory_listing::DirectoryListingValue;
pub use file::{FileKind, FileValue};
pub use file_state::{FileFingerprint, FileStateValue};
pub use package::{PackageValue, Target};
pub use package_lookup::PackageLookupValue;
pub use target_pattern::TargetAddress;
pub use traversal::{RecursivePackageKey, RecursivePackageValue};

/// Identifies one unit of cached, incremental work (§3 "Key"). Equality and hashing are delegated
/// entirely to `variant` — see the module doc comment for why `core` is excluded.
#[derive(Clone)]
pub struct NodeKey {
    core: Arc<EngineCore>,
    variant: NodeVariant,
}

impl NodeKey {
    pub fn new(core: Arc<EngineCore>, variant: NodeVariant) -> NodeKey {
        NodeKey { core, variant }
    }

    pub fn core(&self) -> &Arc<EngineCore> {
        &self.core
    }

    pub fn variant(&self) -> &NodeVariant {
        &self.variant
    }
}

impl PartialEq for NodeKey {
    fn eq(&self, other: &Self) -> bool {
        self.variant == other.variant
    }
}

impl Eq for NodeKey {}

impl std::hash::Hash for NodeKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.variant.hash(state);
    }
}

impl fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.variant, f)
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.variant, f)
    }
}

/// The part of a `NodeKey` that actually identifies it: one variant per §2 registered-function
/// family, plus the `[ADDED]` `BuildId` sentinel of §4.9.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum NodeVariant {
    FileState(fs::RootedPath),
    File(fs::RootedPath),
    DirectoryListing(fs::RootedPath),
    PackageLookup(address::PackageId),
    Package(address::PackageId),
    RecursivePackage(RecursivePackageKey),
    TargetPattern(address::TargetPattern),
    /// §4.9: depending on this node forces re-observation once per build. Never cached (see
    /// `NodeKey::cacheable` below) and carries no payload of its own — its "value" is the current
    /// build-id counter, read fresh every time it runs.
    BuildId,
}

impl fmt::Display for NodeVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeVariant::FileState(path) => write!(f, "FileState({path:?})"),
            NodeVariant::File(path) => write!(f, "File({path:?})"),
            NodeVariant::DirectoryListing(path) => write!(f, "DirectoryListing({path:?})"),
            NodeVariant::PackageLookup(id) => write!(f, "PackageLookup({id})"),
            NodeVariant::Package(id) => write!(f, "Package({id})"),
            NodeVariant::RecursivePackage(key) => write!(f, "RecursivePackage({key:?})"),
            NodeVariant::TargetPattern(pattern) => write!(f, "TargetPattern({pattern})"),
            NodeVariant::BuildId => write!(f, "BuildId"),
        }
    }
}

/// The result of running one `NodeKey` (§3 "Value"). Every family's payload is wrapped in an `Arc`
/// so that dependents can share it without cloning the underlying data, matching how `graph`
/// itself stores a `Node::Item` once per `Entry`.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeValue {
    FileState(Arc<FileStateValue>),
    File(Arc<FileValue>),
    DirectoryListing(Arc<DirectoryListingValue>),
    PackageLookup(Arc<PackageLookupValue>),
    Package(Arc<PackageValue>),
    RecursivePackage(Arc<RecursivePackageValue>),
    TargetPatternMatches(Arc<std::collections::BTreeSet<TargetAddress>>),
    BuildId(u64),
}

impl Eq for NodeValue {}

#[async_trait]
impl graph::Node for NodeKey {
    type Item = NodeValue;
    type Error = EngineError;

    async fn run(self, context: graph::Context<NodeKey>) -> Result<NodeValue, EngineError> {
        let core = self.core.clone();
        match self.variant {
            NodeVariant::FileState(path) => file_state::run_node(core, path)
                .await
                .map(|v| NodeValue::FileState(Arc::new(v))),
            NodeVariant::File(path) => file::run_node(core, &context, path)
                .await
                .map(|v| NodeValue::File(Arc::new(v))),
            NodeVariant::DirectoryListing(path) => directory_listing::run_node(core, &context, path)
                .await
                .map(|v| NodeValue::DirectoryListing(Arc::new(v))),
            NodeVariant::PackageLookup(id) => package_lookup::run_node(core, &context, id)
                .await
                .map(|v| NodeValue::PackageLookup(Arc::new(v))),
            NodeVariant::Package(id) => package::run_node(core, &context, id)
                .await
                .map(|v| NodeValue::Package(Arc::new(v))),
            NodeVariant::RecursivePackage(key) => traversal::run_node(core, &context, key)
                .await
                .map(|v| NodeValue::RecursivePackage(Arc::new(v))),
            NodeVariant::TargetPattern(pattern) => target_pattern::run_node(core, &context, pattern)
                .await
                .map(|v| NodeValue::TargetPatternMatches(Arc::new(v))),
            NodeVariant::BuildId => Ok(NodeValue::BuildId(core.build_id())),
        }
    }

    /// The `BuildId` sentinel is deliberately never cached: every dependent that reads it must
    /// observe the current build, not a memoized one (§4.9).
    fn cacheable(&self) -> bool {
        !matches!(self.variant, NodeVariant::BuildId)
    }
}

/// Requests `key`'s value and unwraps it into the `FileStateValue` the caller expects, erroring
/// out (rather than panicking) if `key` was not in fact a `FileState` key — a programmer error
/// inside this crate, not a user-facing condition.
pub(crate) async fn get_file_state(
    context: &graph::Context<NodeKey>,
    core: &Arc<EngineCore>,
    path: fs::RootedPath,
) -> Result<Arc<FileStateValue>, EngineError> {
    match context
        .get(NodeKey::new(core.clone(), NodeVariant::FileState(path)))
        .await?
    {
        NodeValue::FileState(value) => Ok(value),
        _ => Err(EngineError::new(
            crate::error::ErrorKind::Internal,
            "FileState key did not produce a FileState value",
        )),
    }
}

pub(crate) async fn get_file(
    context: &graph::Context<NodeKey>,
    core: &Arc<EngineCore>,
    path: fs::RootedPath,
) -> Result<Arc<FileValue>, EngineError> {
    match context
        .get(NodeKey::new(core.clone(), NodeVariant::File(path)))
        .await?
    {
        NodeValue::File(value) => Ok(value),
        _ => Err(EngineError::new(
            crate::error::ErrorKind::Internal,
            "File key did not produce a File value",
        )),
    }
}

pub(crate) async fn get_directory_listing(
    context: &graph::Context<NodeKey>,
    core: &Arc<EngineCore>,
    path: fs::RootedPath,
) -> Result<Arc<DirectoryListingValue>, EngineError> {
    match context
        .get(NodeKey::new(core.clone(), NodeVariant::DirectoryListing(path)))
        .await?
    {
        NodeValue::DirectoryListing(value) => Ok(value),
        _ => Err(EngineError::new(
            crate::error::ErrorKind::Internal,
            "DirectoryListing key did not produce a DirectoryListing value",
        )),
    }
}

pub(crate) async fn get_package_lookup(
    context: &graph::Context<NodeKey>,
    core: &Arc<EngineCore>,
    id: address::PackageId,
) -> Result<Arc<PackageLookupValue>, EngineError> {
    match context
        .get(NodeKey::new(core.clone(), NodeVariant::PackageLookup(id)))
        .await?
    {
        NodeValue::PackageLookup(value) => Ok(value),
        _ => Err(EngineError::new(
            crate::error::ErrorKind::Internal,
            "PackageLookup key did not produce a PackageLookup value",
        )),
    }
}

/// Requests a package's value, recovering a partial payload on `PackageErrors` the way §7
/// describes ("a package that parsed with errors still carries its partial value").
pub(crate) async fn get_package(
    context: &graph::Context<NodeKey>,
    core: &Arc<EngineCore>,
    id: address::PackageId,
) -> Result<Arc<PackageValue>, EngineError> {
    let key = NodeKey::new(core.clone(), NodeVariant::Package(id));
    let result = context
        .get_or_recover(key, |e| match e.partial.as_deref() {
            Some(NodeValue::Package(value)) => Ok(NodeValue::Package(value.clone())),
            _ => Err(e),
        })
        .await?;
    match result {
        NodeValue::Package(value) => Ok(value),
        _ => Err(EngineError::new(
            crate::error::ErrorKind::Internal,
            "Package key did not produce a Package value",
        )),
    }
}

pub(crate) async fn get_recursive_package(
    context: &graph::Context<NodeKey>,
    core: &Arc<EngineCore>,
    key: RecursivePackageKey,
) -> Result<Arc<RecursivePackageValue>, EngineError> {
    match context
        .get(NodeKey::new(core.clone(), NodeVariant::RecursivePackage(key)))
        .await?
    {
        NodeValue::RecursivePackage(value) => Ok(value),
        _ => Err(EngineError::new(
            crate::error::ErrorKind::Internal,
            "RecursivePackage key did not produce a RecursivePackage value",
        )),
    }
}

pub(crate) async fn get_build_id(
    context: &graph::Context<NodeKey>,
    core: &Arc<EngineCore>,
) -> Result<u64, EngineError> {
    match context
        .get(NodeKey::new(core.clone(), NodeVariant::BuildId))
        .await?
    {
        NodeValue::BuildId(id) => Ok(id),
        _ => Err(EngineError::new(
            crate::error::ErrorKind::Internal,
            "BuildId key did not produce a BuildId value",
        )),
    }
}
