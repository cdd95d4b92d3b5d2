// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! §4.4 Package-lookup node: for one `PackageId`, finds which configured root (in search order)
//! contains its package-definition file, depending on a `FileState` node per candidate root so
//! that a later root's `BUILD` file coming into or out of existence is independently cached.

use std::sync::Arc;

use fs::{RelativePath, RootedPath};

use crate::core::EngineCore;
use crate::error::EngineError;
use crate::nodes::file_state::FileStateValue;
use crate::nodes::{self, NodeKey};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PackageLookupValue {
    Exists { root: fs::Root },
    NotFound,
}

pub(crate) async fn run_node(
    core: Arc<EngineCore>,
    context: &graph::Context<NodeKey>,
    id: address::PackageId,
) -> Result<PackageLookupValue, EngineError> {
    let build_file_relative = RelativePath::new(&core.options.build_file_name)
        .map_err(|e| EngineError::new(crate::error::ErrorKind::Internal, e))?;
    let package_dir = RelativePath::new(id.as_str())
        .map_err(|e| EngineError::new(crate::error::ErrorKind::Internal, e))?;

    for (root, _) in core.roots.iter() {
        let candidate = RootedPath::new(root, package_dir.join(&build_file_relative));
        let state = nodes::get_file_state(context, &core, candidate).await?;
        if let FileStateValue::File { .. } = state.as_ref() {
            return Ok(PackageLookupValue::Exists { root });
        }
    }
    Ok(PackageLookupValue::NotFound)
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

    #[tokio::test]
    async fn finds_a_package_on_the_first_matching_root() {
        let tmp = tempfile::TempDir::new().unwrap();
        std_fs::create_dir(tmp.path().join("foo")).unwrap();
        std_fs::write(tmp.path().join("foo/BUILD"), b"library foo\n").unwrap();
        let core = make_core(vec![tmp.path().to_path_buf()]);
        let graph = graph::Graph::new(core.executor.clone());
        let context = graph.context(Arc::new(AtomicBool::new(false)));

        let result = run_node(core, &context, address::PackageId::new("foo"))
            .await
            .unwrap();
        assert_eq!(result, PackageLookupValue::Exists { root: fs::Root(0) });
    }

    #[tokio::test]
    async fn missing_package_is_not_found_not_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let core = make_core(vec![tmp.path().to_path_buf()]);
        let graph = graph::Graph::new(core.executor.clone());
        let context = graph.context(Arc::new(AtomicBool::new(false)));

        let result = run_node(core, &context, address::PackageId::new("nope"))
            .await
            .unwrap();
        assert_eq!(result, PackageLookupValue::NotFound);
    }

    #[tokio::test]
    async fn later_roots_are_consulted_in_search_order() {
        let first = tempfile::TempDir::new().unwrap();
        let second = tempfile::TempDir::new().unwrap();
        std_fs::create_dir(second.path().join("foo")).unwrap();
        std_fs::write(second.path().join("foo/BUILD"), b"library foo\n").unwrap();
        let core = make_core(vec![first.path().to_path_buf(), second.path().to_path_buf()]);
        let graph = graph::Graph::new(core.executor.clone());
        let context = graph.context(Arc::new(AtomicBool::new(false)));

        let result = run_node(core, &context, address::PackageId::new("foo"))
            .await
            .unwrap();
        assert_eq!(result, PackageLookupValue::Exists { root: fs::Root(1) });
    }
}
