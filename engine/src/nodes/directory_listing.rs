// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! §4.3 Directory-listing node: one `scandir`, sorted by name, excluding only `.`/`..` (no
//! ignore-pattern filtering — that belongs to the out-of-scope rule language, per DESIGN.md Open
//! Question 3).

use std::sync::Arc;

use fs::{Dir, RootedPath, Vfs};

use crate::core::EngineCore;
use crate::error::{EngineError, ErrorKind};
use crate::nodes::{self, FileKind, NodeKey};

#[derive(Debug, Eq, PartialEq)]
pub struct DirectoryListingValue(pub Arc<fs::DirectoryListing>);

/// Lists `rooted_path`, first resolving it through `File` (which follows symlinks) so that a
/// symlink-to-directory lists normally while any other non-directory target reports `not_a_directory`
/// (§4.3) instead of whatever `scandir` happens to fail with.
pub(crate) async fn run_node(
    core: Arc<EngineCore>,
    context: &graph::Context<NodeKey>,
    rooted_path: RootedPath,
) -> Result<DirectoryListingValue, EngineError> {
    let resolved = nodes::get_file(context, &core, rooted_path.clone()).await?;
    match resolved.kind {
        FileKind::Directory => {}
        FileKind::Missing => {
            return Err(EngineError::new(
                ErrorKind::NotADirectory,
                format!("{}: no such directory", rooted_path.relative.display()),
            ));
        }
        FileKind::File { .. } => {
            return Err(EngineError::new(
                ErrorKind::NotADirectory,
                format!("{}: not a directory", rooted_path.relative.display()),
            ));
        }
    }

    let vfs = core.vfs_for(rooted_path.root);
    let relative: std::path::PathBuf = rooted_path.relative.clone().into();
    let listing = vfs
        .scandir(Dir(relative))
        .await
        .map_err(|e| EngineError::io(rooted_path.relative.as_ref(), e))?;
    Ok(DirectoryListingValue(listing))
}

#[cfg(test)]
mod tests {
    use std::fs as std_fs;
    use std::sync::atomic::AtomicBool;

    use options::EngineOptions;
    use task_executor::Executor;

    use super::*;

    fn make_core(root: &std::path::Path) -> Arc<EngineCore> {
        let executor = Executor::new();
        let options = EngineOptions::new(vec![root.to_path_buf()]);
        Arc::new(EngineCore::new(options, executor).unwrap())
    }

    fn make_context(core: &Arc<EngineCore>) -> (graph::Graph<NodeKey>, graph::Context<NodeKey>) {
        let graph = graph::Graph::new(core.executor.clone());
        let context = graph.context(Arc::new(AtomicBool::new(false)));
        (graph, context)
    }

    #[tokio::test]
    async fn lists_sorted_excluding_nothing_but_dot_entries() {
        let tmp = tempfile::TempDir::new().unwrap();
        for name in ["zeta", "alpha"] {
            std_fs::write(tmp.path().join(name), b"x").unwrap();
        }
        std_fs::create_dir(tmp.path().join("mid")).unwrap();
        let core = make_core(tmp.path());
        let (_graph, context) = make_context(&core);
        let rooted_path = RootedPath::new(fs::Root(0), fs::RelativePath::empty());
        let value = run_node(core, &context, rooted_path).await.unwrap();
        let names: Vec<_> = value
            .0
            .0
            .iter()
            .map(|s| s.path().to_str().unwrap().to_owned())
            .collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[tokio::test]
    async fn listing_a_plain_file_is_not_a_directory() {
        let tmp = tempfile::TempDir::new().unwrap();
        std_fs::write(tmp.path().join("plain"), b"x").unwrap();
        let core = make_core(tmp.path());
        let (_graph, context) = make_context(&core);
        let rooted_path = RootedPath::new(fs::Root(0), fs::RelativePath::new("plain").unwrap());
        let err = run_node(core, &context, rooted_path).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotADirectory);
    }

    #[tokio::test]
    async fn listing_a_symlink_to_a_directory_is_allowed() {
        let tmp = tempfile::TempDir::new().unwrap();
        std_fs::create_dir(tmp.path().join("real")).unwrap();
        std_fs::write(tmp.path().join("real/inside"), b"x").unwrap();
        std::os::unix::fs::symlink("real", tmp.path().join("link")).unwrap();
        let core = make_core(tmp.path());
        let (_graph, context) = make_context(&core);
        let rooted_path = RootedPath::new(fs::Root(0), fs::RelativePath::new("link").unwrap());
        let value = run_node(core, &context, rooted_path).await.unwrap();
        let names: Vec<_> = value
            .0
            .0
            .iter()
            .map(|s| s.path().to_str().unwrap().to_owned())
            .collect();
        assert_eq!(names, vec!["inside"]);
    }

    #[tokio::test]
    async fn listing_a_missing_path_is_not_a_directory() {
        let tmp = tempfile::TempDir::new().unwrap();
        let core = make_core(tmp.path());
        let (_graph, context) = make_context(&core);
        let rooted_path = RootedPath::new(fs::Root(0), fs::RelativePath::new("nope").unwrap());
        let err = run_node(core, &context, rooted_path).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotADirectory);
    }
}
