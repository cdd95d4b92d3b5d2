// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! §4.5 Recursive-directory traversal.
//!
//! Two related shapes live in this module: `RecursivePackageKey`/`RecursivePackageValue` is the
//! cached graph-node family — one node per directory, answering "is this a package, and which of
//! its subdirectories are worth descending into" — while `TraversalRequest`/`traverse` is a plain
//! (uncached) async walk that drives however many `RecursivePackage` nodes a given request needs,
//! honoring the walk-level policy flags (`cross_package_boundaries`, `name_pattern`, etc) that
//! don't belong on the node's own identity.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use fs::RootedPath;

use crate::core::EngineCore;
use crate::error::EngineError;
use crate::nodes::package_lookup::PackageLookupValue;
use crate::nodes::{self, FileKind, NodeKey};

/// Directories never worth scanning into, regardless of the requested traversal (version-control
/// metadata). Part of a `RecursivePackageKey`'s identity, since changing this set would change
/// what the node observes.
fn default_excluded_subdirs() -> Arc<BTreeSet<String>> {
    [".git", ".hg", ".svn"]
        .iter()
        .map(|s| (*s).to_owned())
        .collect::<BTreeSet<_>>()
        .into()
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct RecursivePackageKey {
    pub rooted_path: RootedPath,
    pub excluded_subdirs: Arc<BTreeSet<String>>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RecursivePackageValue {
    pub is_package: bool,
    /// Immediate subdirectory names (directories, and symlinks that resolve to directories) worth
    /// descending into. Exclusions from `RecursivePackageKey::excluded_subdirs` are already
    /// applied; walk-level policy (cross-package-boundary, name-pattern) is applied by `traverse`.
    pub subdirs: Arc<BTreeSet<String>>,
}

pub(crate) async fn run_node(
    core: Arc<EngineCore>,
    context: &graph::Context<NodeKey>,
    key: RecursivePackageKey,
) -> Result<RecursivePackageValue, EngineError> {
    let id = address::PackageId::new(key.rooted_path.relative.to_str().unwrap_or(""));
    let lookup = nodes::get_package_lookup(context, &core, id).await?;
    let is_package = matches!(lookup.as_ref(), PackageLookupValue::Exists { .. });

    let listing = nodes::get_directory_listing(context, &core, key.rooted_path.clone()).await?;
    let mut subdirs = BTreeSet::new();
    for stat in listing.0 .0.iter() {
        match stat {
            fs::Stat::Dir(fs::Dir(path)) => {
                if let Some(name) = path.to_str() {
                    if !key.excluded_subdirs.contains(name) {
                        subdirs.insert(name.to_owned());
                    }
                }
            }
            fs::Stat::Link(fs::Link { path, .. }) => {
                let Some(name) = path.to_str() else {
                    continue;
                };
                if key.excluded_subdirs.contains(name) {
                    continue;
                }
                if let Ok(child) = key.rooted_path.join(name) {
                    if let Ok(file_value) = nodes::get_file(context, &core, child).await {
                        if matches!(file_value.kind, FileKind::Directory) {
                            subdirs.insert(name.to_owned());
                        }
                    }
                }
            }
            fs::Stat::File(_) => {}
        }
    }

    Ok(RecursivePackageValue {
        is_package,
        subdirs: Arc::new(subdirs),
    })
}

/// The parameters of one recursive-discovery walk (§3 "Traversal-request record"). Distinct from
/// `RecursivePackageKey` because none of these fields identify a cacheable unit of work on their
/// own — they describe how a caller wants to *combine* a series of `RecursivePackage` lookups.
#[derive(Clone, Debug)]
pub struct TraversalRequest {
    pub rooted_path: RootedPath,
    /// Out-of-scope rule/target generation is never modeled here; kept for shape-fidelity with
    /// the record this is grounded on, and always treated as `false`.
    pub is_generated: bool,
    /// If `false`, the walk stops descending once it finds a directory that is itself a package
    /// (`pkg/...` from a package boundary does not reach across into a nested package's files).
    pub cross_package_boundaries: bool,
    /// If `true`, skip the `is_package` check entirely and treat every directory reached as
    /// eligible, descending unconditionally (used by a plain recursive glob, as opposed to a
    /// below-directory target pattern).
    pub skip_subpackage_check: bool,
    /// An optional shell-style (`*`-only) filter on each candidate package's directory name.
    pub name_pattern: Option<String>,
    /// Caller-supplied exclusions, as slash-separated paths relative to `rooted_path` (e.g.
    /// `"foo/bar"` to exclude only that nested subdirectory, as opposed to every `bar` anywhere in
    /// the walk). Re-relativized per child as the walk descends (§4.5 step 3,
    /// `excluded_subdirs_beneath_this_child`): passing the whole set unchanged to every
    /// `RecursivePackageKey` would fold an ancestor's exclusions into a descendant directory's
    /// identity, preventing that directory's node from being shared with a traversal rooted
    /// elsewhere that doesn't share the same ancestor.
    pub excluded_subdirs: Arc<BTreeSet<String>>,
    /// Free-text context folded into any error this walk produces, so a failure deep in a large
    /// traversal still names the request that triggered it.
    pub error_context: String,
}

/// Filters `excluded`, which is relative to the directory currently being walked, down to the
/// entries that live strictly beneath `child`, re-relativizing them to be relative to `child`
/// itself (§4.5 step 3). An entry equal to `child` itself does not appear here — it was already
/// consumed when `child` was excluded from (or kept in) its parent's `subdirs`.
fn excluded_subdirs_beneath_child(excluded: &BTreeSet<String>, child: &str) -> Arc<BTreeSet<String>> {
    let prefix = format!("{child}/");
    Arc::new(
        excluded
            .iter()
            .filter_map(|entry| entry.strip_prefix(&prefix))
            .map(|s| s.to_owned())
            .collect(),
    )
}

/// The exclusion set actually consulted for one directory's `RecursivePackage` node: the
/// always-on version-control names, plus whatever of the caller's (already-relativized) set
/// applies directly at this level.
fn merged_excluded_subdirs(relativized_caller_set: &BTreeSet<String>) -> Arc<BTreeSet<String>> {
    let mut merged = (*default_excluded_subdirs()).clone();
    merged.extend(relativized_caller_set.iter().cloned());
    Arc::new(merged)
}

/// Walks `request.rooted_path` and everything beneath it, returning every package directory found
/// (§4.5). Directories are visited breadth-first; each directory costs exactly one
/// `RecursivePackage` node lookup.
pub async fn traverse(
    core: &Arc<EngineCore>,
    context: &graph::Context<NodeKey>,
    request: &TraversalRequest,
) -> Result<Vec<address::PackageId>, EngineError> {
    let mut found = Vec::new();
    let mut queue: VecDeque<(RootedPath, Arc<BTreeSet<String>>)> = VecDeque::new();
    queue.push_back((request.rooted_path.clone(), request.excluded_subdirs.clone()));

    while let Some((dir, excluded_here)) = queue.pop_front() {
        let key = RecursivePackageKey {
            rooted_path: dir.clone(),
            excluded_subdirs: merged_excluded_subdirs(&excluded_here),
        };
        let value = nodes::get_recursive_package(context, core, key)
            .await
            .map_err(|e| {
                EngineError::new(
                    e.kind,
                    format!("{}: {}", request.error_context, e.detail),
                )
            })?;

        let is_match = request.skip_subpackage_check || value.is_package;
        if is_match {
            let id = address::PackageId::new(dir.relative.to_str().unwrap_or(""));
            if name_matches(&request.name_pattern, &id) {
                found.push(id);
            }
        }

        if request.skip_subpackage_check || request.cross_package_boundaries || !value.is_package {
            for subdir in value.subdirs.iter() {
                if let Ok(child) = dir.join(subdir) {
                    let child_excluded = excluded_subdirs_beneath_child(&excluded_here, subdir);
                    queue.push_back((child, child_excluded));
                }
            }
        }
    }

    Ok(found)
}

fn name_matches(pattern: &Option<String>, id: &address::PackageId) -> bool {
    let Some(pattern) = pattern else {
        return true;
    };
    glob_match(pattern, id.as_str())
}

/// A minimal `*`-only shell-style matcher (real globbing is out of scope, per DESIGN.md Open
/// Question 3 — this exists only so `name_pattern` is not a dead field).
fn glob_match(pattern: &str, candidate: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return candidate == segments[0];
    }

    let Some(mut rest) = candidate.strip_prefix(segments[0]) else {
        return false;
    };
    for segment in &segments[1..segments.len() - 1] {
        if segment.is_empty() {
            continue;
        }
        match rest.find(segment) {
            Some(idx) => rest = &rest[idx + segment.len()..],
            None => return false,
        }
    }
    rest.ends_with(segments[segments.len() - 1])
}
