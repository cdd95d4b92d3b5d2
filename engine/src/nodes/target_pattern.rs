// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! §4.6 Target-Pattern Resolver: expands one already-parsed `address::TargetPattern` into the
//! concrete targets it matches. `address::ParsedPattern` only carries the text-parsed shape
//! (`Target`/`Package`/`BelowDirectory`/`Negative`); turning `Package`/`BelowDirectory` into real
//! targets needs the package-lookup and traversal layers, which is why this lives here rather
//! than in `address`.

use std::collections::BTreeSet;
use std::sync::Arc;

use address::{ParsedPattern, PackageId, TargetName, TargetPattern};

use crate::core::EngineCore;
use crate::error::{EngineError, ErrorKind};
use crate::nodes::traversal::{traverse, TraversalRequest};
use crate::nodes::{self, NodeKey};

/// One resolved target, identified the same way `ParsedPattern::Target` names one (§3).
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TargetAddress {
    pub package: PackageId,
    pub name: TargetName,
}

impl std::fmt::Display for TargetAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.package, self.name)
    }
}

/// Runs as a cached node per unsigned pattern (a `Negative` wrapper's sign is stripped by the
/// resolver below, not by this node, so `-pkg:` and `pkg:` share one cached expansion).
pub(crate) async fn run_node(
    core: Arc<EngineCore>,
    context: &graph::Context<NodeKey>,
    pattern: TargetPattern,
) -> Result<BTreeSet<TargetAddress>, EngineError> {
    expand(&core, context, pattern.parsed.unsigned()).await
}

async fn expand(
    core: &Arc<EngineCore>,
    context: &graph::Context<NodeKey>,
    parsed: &ParsedPattern,
) -> Result<BTreeSet<TargetAddress>, EngineError> {
    match parsed {
        ParsedPattern::Negative(inner) => expand(core, context, inner).await,
        ParsedPattern::Target(package, name) => {
            let package_value = nodes::get_package(context, core, package.clone()).await?;
            if package_value.targets.contains_key(name) {
                let mut set = BTreeSet::new();
                set.insert(TargetAddress {
                    package: package.clone(),
                    name: name.clone(),
                });
                Ok(set)
            } else {
                Err(EngineError::new(
                    ErrorKind::NoSuchTarget,
                    format!("{package}:{name}: no such target in package `{package}`"),
                ))
            }
        }
        ParsedPattern::Package(package) => {
            let package_value = nodes::get_package(context, core, package.clone()).await?;
            Ok(package_value
                .targets
                .keys()
                .map(|name| TargetAddress {
                    package: package.clone(),
                    name: name.clone(),
                })
                .collect())
        }
        ParsedPattern::BelowDirectory(package) => {
            let relative = fs::RelativePath::new(package.as_str())
                .map_err(|e| EngineError::new(ErrorKind::Internal, e))?;
            let mut found_packages = BTreeSet::new();
            // `BelowDirectory` searches every configured root, not just the first that happens to
            // contain the directory: two roots can each contribute packages beneath the same
            // relative directory (§4.4's scan-order only picks one root per individual package).
            for (root, _) in core.roots.iter() {
                let candidate = fs::RootedPath::new(root, relative.clone());
                // A root is free to simply not have this directory at all (the whole point of a
                // search-path list); that contributes nothing, rather than failing the pattern.
                let state = nodes::get_file_state(context, core, candidate.clone()).await?;
                if !matches!(state.as_ref(), crate::nodes::FileStateValue::Directory) {
                    continue;
                }
                let request = TraversalRequest {
                    rooted_path: candidate,
                    is_generated: false,
                    cross_package_boundaries: true,
                    skip_subpackage_check: false,
                    name_pattern: None,
                    excluded_subdirs: Arc::new(BTreeSet::new()),
                    error_context: format!("{package}::"),
                };
                found_packages.extend(traverse(core, context, &request).await?);
            }

            let mut set = BTreeSet::new();
            for found in found_packages {
                let package_value = nodes::get_package(context, core, found.clone()).await?;
                set.extend(package_value.targets.keys().map(|name| TargetAddress {
                    package: found.clone(),
                    name: name.clone(),
                }));
            }
            Ok(set)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs as std_fs;
    use std::sync::atomic::AtomicBool;

    use options::EngineOptions;
    use task_executor::Executor;

    use super::*;

    fn make_core(roots: Vec<std::path::PathBuf>) -> Arc<EngineCore> {
        let executor = Executor::new();
        let options = EngineOptions::new(roots);
        Arc::new(EngineCore::new(options, executor).unwrap())
    }

    async fn expand_spec(core: &Arc<EngineCore>, context: &graph::Context<NodeKey>, spec: &str) -> BTreeSet<TargetAddress> {
        let pattern = TargetPattern::parse(spec, 0).unwrap();
        run_node(core.clone(), context, pattern).await.unwrap()
    }

    #[tokio::test]
    async fn an_explicit_target_resolves_to_itself() {
        let tmp = tempfile::TempDir::new().unwrap();
        std_fs::create_dir(tmp.path().join("foo")).unwrap();
        std_fs::write(tmp.path().join("foo/BUILD"), b"library bar\n").unwrap();
        let core = make_core(vec![tmp.path().to_path_buf()]);
        let graph = graph::Graph::new(core.executor.clone());
        let context = graph.context(Arc::new(AtomicBool::new(false)));

        let matches = expand_spec(&core, &context, "foo:bar").await;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches.iter().next().unwrap().to_string(), "//foo:bar");
    }

    #[tokio::test]
    async fn an_explicit_target_that_does_not_exist_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        std_fs::create_dir(tmp.path().join("foo")).unwrap();
        std_fs::write(tmp.path().join("foo/BUILD"), b"library bar\n").unwrap();
        let core = make_core(vec![tmp.path().to_path_buf()]);
        let graph = graph::Graph::new(core.executor.clone());
        let context = graph.context(Arc::new(AtomicBool::new(false)));

        let pattern = TargetPattern::parse("foo:nope", 0).unwrap();
        let result = run_node(core, &context, pattern).await;
        assert_eq!(result.unwrap_err().kind, ErrorKind::NoSuchTarget);
    }

    #[tokio::test]
    async fn a_package_wildcard_matches_every_target_in_one_package() {
        let tmp = tempfile::TempDir::new().unwrap();
        std_fs::create_dir(tmp.path().join("foo")).unwrap();
        std_fs::write(tmp.path().join("foo/BUILD"), b"library bar\nbinary baz\n").unwrap();
        let core = make_core(vec![tmp.path().to_path_buf()]);
        let graph = graph::Graph::new(core.executor.clone());
        let context = graph.context(Arc::new(AtomicBool::new(false)));

        let matches = expand_spec(&core, &context, "foo:").await;
        assert_eq!(matches.len(), 2);
    }

    #[tokio::test]
    async fn below_directory_searches_every_configured_root() {
        let first = tempfile::TempDir::new().unwrap();
        let second = tempfile::TempDir::new().unwrap();
        // `shared` exists on both roots, with distinct packages beneath it on each: a
        // below-directory pattern must descend into both, not stop at the first root that has
        // the starting directory at all.
        std_fs::create_dir_all(first.path().join("shared/alpha")).unwrap();
        std_fs::write(first.path().join("shared/alpha/BUILD"), b"library a\n").unwrap();
        std_fs::create_dir_all(second.path().join("shared/beta")).unwrap();
        std_fs::write(second.path().join("shared/beta/BUILD"), b"library b\n").unwrap();
        let core = make_core(vec![first.path().to_path_buf(), second.path().to_path_buf()]);
        let graph = graph::Graph::new(core.executor.clone());
        let context = graph.context(Arc::new(AtomicBool::new(false)));

        let matches = expand_spec(&core, &context, "shared::").await;
        let names: BTreeSet<String> = matches.iter().map(|t| t.name.to_string()).collect();
        assert_eq!(names, BTreeSet::from(["a".to_owned(), "b".to_owned()]));
    }

    #[tokio::test]
    async fn below_directory_tolerates_a_root_missing_the_directory_entirely() {
        let first = tempfile::TempDir::new().unwrap();
        let second = tempfile::TempDir::new().unwrap();
        std_fs::create_dir_all(first.path().join("only_here")).unwrap();
        std_fs::write(first.path().join("only_here/BUILD"), b"library a\n").unwrap();
        // `second` has no `only_here` directory at all.
        let core = make_core(vec![first.path().to_path_buf(), second.path().to_path_buf()]);
        let graph = graph::Graph::new(core.executor.clone());
        let context = graph.context(Arc::new(AtomicBool::new(false)));

        let matches = expand_spec(&core, &context, "only_here::").await;
        assert_eq!(matches.len(), 1);
    }
}
