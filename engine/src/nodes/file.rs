// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! §4.2 File node: resolves a rooted path through any symlinks along the way, down to the
//! terminal file, directory, or absence. Each hop depends on a `FileState` node (one `lstat`),
//! and then — if that hop is itself a symlink — recurses through another `File` node for the
//! path the link points at, so that the symlink's own target is independently cached and
//! invalidated.

use std::sync::Arc;

use fs::RootedPath;

use crate::core::EngineCore;
use crate::error::{EngineError, ErrorKind};
use crate::external_path::{self, PathClass};
use crate::nodes::file_state::{FileFingerprint, FileStateValue};
use crate::nodes::{self, NodeKey};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FileKind {
    Missing,
    Directory,
    File {
        size: u64,
        is_executable: bool,
        fingerprint: FileFingerprint,
    },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileValue {
    pub kind: FileKind,
    /// The rooted path this resolved to, which may differ from the path requested if it was
    /// reached through one or more symlinks.
    pub resolved: RootedPath,
}

pub(crate) async fn run_node(
    core: Arc<EngineCore>,
    context: &graph::Context<NodeKey>,
    rooted_path: RootedPath,
) -> Result<FileValue, EngineError> {
    resolve(core, context, rooted_path, 0).await
}

async fn resolve(
    core: Arc<EngineCore>,
    context: &graph::Context<NodeKey>,
    rooted_path: RootedPath,
    depth: u8,
) -> Result<FileValue, EngineError> {
    if depth > fs::MAX_LINK_DEPTH {
        return Err(EngineError::new(
            ErrorKind::SymlinkCycle,
            format!("{}: symlink depth exceeded {}", rooted_path.relative.display(), fs::MAX_LINK_DEPTH),
        ));
    }

    let state = nodes::get_file_state(context, &core, rooted_path.clone()).await?;
    match state.as_ref() {
        FileStateValue::Missing => Ok(FileValue {
            kind: FileKind::Missing,
            resolved: rooted_path,
        }),
        FileStateValue::Directory => Ok(FileValue {
            kind: FileKind::Directory,
            resolved: rooted_path,
        }),
        FileStateValue::File {
            size,
            is_executable,
            fingerprint,
        } => Ok(FileValue {
            kind: FileKind::File {
                size: *size,
                is_executable: *is_executable,
                fingerprint: fingerprint.clone(),
            },
            resolved: rooted_path,
        }),
        FileStateValue::Symlink { target } => {
            follow_symlink(core, context, &rooted_path, target, depth).await
        }
    }
}

/// Resolves a symlink's target, relative to the directory the link itself lives in (POSIX
/// symlink-target semantics), then recurses. A target that stays within the same root continues
/// in the ordinary rooted-path model; one that walks outside every configured root falls back to
/// the external-path policy of §4.9.
async fn follow_symlink(
    core: Arc<EngineCore>,
    context: &graph::Context<NodeKey>,
    link: &RootedPath,
    target: &std::path::Path,
    depth: u8,
) -> Result<FileValue, EngineError> {
    let link_dir = link
        .parent()
        .unwrap_or_else(|| RootedPath::new(link.root, fs::RelativePath::empty()));

    if target.is_absolute() {
        return resolve_absolute_target(core, context, link, target, depth).await;
    }

    let mut joined: std::path::PathBuf = link_dir.relative.clone().into();
    joined.push(target);
    if let Ok(relative) = fs::RelativePath::new(&joined) {
        let next = RootedPath::new(link.root, relative);
        return Box::pin(resolve(core, context, next, depth + 1)).await;
    }

    let root_absolute = core.roots.resolve(link.root);
    let base_absolute = root_absolute.join(&link_dir.relative);
    let absolute_target = external_path::lexically_normalize(&base_absolute, target);
    resolve_absolute_target(core, context, link, &absolute_target, depth).await
}

async fn resolve_absolute_target(
    core: Arc<EngineCore>,
    context: &graph::Context<NodeKey>,
    link: &RootedPath,
    absolute_target: &std::path::Path,
    depth: u8,
) -> Result<FileValue, EngineError> {
    let (class, rooted) = external_path::classify(&core, absolute_target);
    match (class, rooted) {
        (PathClass::Internal, Some(relative)) => {
            Box::pin(resolve(core, context, relative, depth + 1)).await
        }
        (PathClass::ExternalImmutable, _) => {
            external_terminal(absolute_target, link.clone()).await
        }
        (PathClass::ExternalMutable, _) => {
            if core.options.error_on_external_files {
                return Err(EngineError::new(
                    ErrorKind::ExternalReference,
                    format!(
                        "{}: symlink resolves to {}, outside every configured root and no declared immutable directory",
                        link.relative.display(),
                        absolute_target.display()
                    ),
                ));
            }
            nodes::get_build_id(context, &core).await?;
            external_terminal(absolute_target, link.clone()).await
        }
        (PathClass::Internal, None) => Err(EngineError::new(
            ErrorKind::Internal,
            "classify reported Internal with no RootedPath",
        )),
    }
}

/// Stats a path outside the rooted-path model directly, without further symlink-following: an
/// external path is, by definition, outside the engine's change-detection scope, so there is
/// nothing further here worth caching as its own node.
async fn external_terminal(
    absolute: &std::path::Path,
    resolved_as: RootedPath,
) -> Result<FileValue, EngineError> {
    let metadata = tokio::fs::symlink_metadata(absolute)
        .await
        .map(Some)
        .or_else(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Ok(None)
            } else {
                Err(e)
            }
        })
        .map_err(|e| EngineError::io(absolute, e))?;

    let kind = match metadata {
        None => FileKind::Missing,
        Some(m) if m.is_dir() => FileKind::Directory,
        Some(m) => {
            use std::os::unix::fs::PermissionsExt;
            FileKind::File {
                size: m.len(),
                is_executable: (m.permissions().mode() & 0o111) != 0,
                fingerprint: FileFingerprint::Proxy {
                    size: m.len(),
                    mtime: m.modified().ok(),
                },
            }
        }
    };
    Ok(FileValue {
        kind,
        resolved: resolved_as,
    })
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

    fn make_graph(core: &Arc<EngineCore>) -> graph::Graph<NodeKey> {
        graph::Graph::new(core.executor.clone())
    }

    fn rooted(path: &str) -> RootedPath {
        RootedPath::new(fs::Root(0), fs::RelativePath::new(path).unwrap())
    }

    #[tokio::test]
    async fn resolves_a_plain_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        std_fs::write(tmp.path().join("hello"), b"hi").unwrap();
        let core = make_core(tmp.path());
        let graph = make_graph(&core);
        let context = graph.context(Arc::new(AtomicBool::new(false)));

        let value = run_node(core, &context, rooted("hello")).await.unwrap();
        assert!(matches!(value.kind, FileKind::File { size: 2, .. }));
        assert_eq!(value.resolved.relative.to_str(), Some("hello"));
    }

    #[tokio::test]
    async fn resolves_a_missing_path() {
        let tmp = tempfile::TempDir::new().unwrap();
        let core = make_core(tmp.path());
        let graph = make_graph(&core);
        let context = graph.context(Arc::new(AtomicBool::new(false)));

        let value = run_node(core, &context, rooted("nope")).await.unwrap();
        assert_eq!(value.kind, FileKind::Missing);
    }

    #[tokio::test]
    async fn follows_a_symlink_to_its_target() {
        let tmp = tempfile::TempDir::new().unwrap();
        std_fs::write(tmp.path().join("target"), b"hello world").unwrap();
        std::os::unix::fs::symlink("target", tmp.path().join("link")).unwrap();
        let core = make_core(tmp.path());
        let graph = make_graph(&core);
        let context = graph.context(Arc::new(AtomicBool::new(false)));

        let value = run_node(core, &context, rooted("link")).await.unwrap();
        assert!(matches!(value.kind, FileKind::File { size: 11, .. }));
        assert_eq!(value.resolved.relative.to_str(), Some("target"));
    }

    #[tokio::test]
    async fn a_symlink_cycle_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::os::unix::fs::symlink("a", tmp.path().join("b")).unwrap();
        std::os::unix::fs::symlink("b", tmp.path().join("a")).unwrap();
        let core = make_core(tmp.path());
        let graph = make_graph(&core);
        let context = graph.context(Arc::new(AtomicBool::new(false)));

        let result = run_node(core, &context, rooted("a")).await;
        assert_eq!(result.unwrap_err().kind, ErrorKind::SymlinkCycle);
    }
}
