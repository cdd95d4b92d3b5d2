// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! §4.2 File-state node: the finest-grained cached observation, one `lstat` plus (for a regular
//! file) one content identity. Never follows a symlink — that is `file::run_node`'s job, one layer
//! up, which is why this node's value distinguishes `Symlink` from `File`/`Directory`/`Missing`
//! rather than resolving through it.

use std::sync::Arc;
use std::time::SystemTime;

use fs::{PathMetadataKind, RootedPath, Vfs};

use crate::core::EngineCore;
use crate::error::{EngineError, ErrorKind};

/// How a regular file's content identity was determined (§3 "fast_digest... or falls back to a
/// size/mtime proxy").
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FileFingerprint {
    Digest(hashing::Digest),
    Proxy {
        size: u64,
        mtime: Option<SystemTime>,
    },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FileStateValue {
    Missing,
    Directory,
    /// The symlink's literal target string, unresolved (§4.2: resolving it is `file`'s job).
    Symlink { target: std::path::PathBuf },
    File {
        size: u64,
        is_executable: bool,
        fingerprint: FileFingerprint,
    },
}

pub(crate) async fn run_node(
    core: Arc<EngineCore>,
    rooted_path: RootedPath,
) -> Result<FileStateValue, EngineError> {
    let vfs = core.vfs_for(rooted_path.root);
    let relative: &std::path::Path = rooted_path.relative.as_ref();
    let metadata = vfs
        .path_metadata(relative.to_path_buf())
        .await
        .map_err(|e| EngineError::io(relative, e))?;

    let Some(metadata) = metadata else {
        return Ok(FileStateValue::Missing);
    };

    match metadata.kind {
        PathMetadataKind::Directory => Ok(FileStateValue::Directory),
        PathMetadataKind::Symlink => {
            let target = metadata.symlink_target.ok_or_else(|| {
                EngineError::new(
                    ErrorKind::InconsistentFilesystem,
                    format!("{}: reported as a symlink but had no target", relative.display()),
                )
            })?;
            Ok(FileStateValue::Symlink { target })
        }
        PathMetadataKind::File => {
            let fingerprint = match vfs
                .fast_digest(relative)
                .await
                .map_err(|e| EngineError::io(relative, e))?
            {
                Some(digest) => FileFingerprint::Digest(digest),
                None => FileFingerprint::Proxy {
                    size: metadata.length,
                    // §3: a non-empty file is compared by size/digest alone, never by mtime, so
                    // that touching a file's mtime with no content change is a no-op for early
                    // cutoff. Only an empty file (no size to distinguish it at all) falls back to
                    // mtime as a last-resort disambiguator.
                    mtime: if metadata.length > 0 {
                        None
                    } else {
                        metadata.modified
                    },
                },
            };
            Ok(FileStateValue::File {
                size: metadata.length,
                is_executable: metadata.is_executable,
                fingerprint,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs as std_fs;

    use options::EngineOptions;
    use task_executor::Executor;

    use super::*;

    fn make_core(root: &std::path::Path) -> Arc<EngineCore> {
        let executor = Executor::new();
        let options = EngineOptions::new(vec![root.to_path_buf()]);
        Arc::new(EngineCore::new(options, executor).unwrap())
    }

    fn rooted(path: &str) -> RootedPath {
        RootedPath::new(fs::Root(0), fs::RelativePath::new(path).unwrap())
    }

    #[tokio::test]
    async fn missing_path_is_missing_not_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let core = make_core(tmp.path());
        let value = run_node(core, rooted("nope")).await.unwrap();
        assert_eq!(value, FileStateValue::Missing);
    }

    #[tokio::test]
    async fn directory_is_reported_as_directory() {
        let tmp = tempfile::TempDir::new().unwrap();
        std_fs::create_dir(tmp.path().join("a_dir")).unwrap();
        let core = make_core(tmp.path());
        let value = run_node(core, rooted("a_dir")).await.unwrap();
        assert_eq!(value, FileStateValue::Directory);
    }

    #[tokio::test]
    async fn non_empty_file_falls_back_to_a_size_only_proxy() {
        let tmp = tempfile::TempDir::new().unwrap();
        std_fs::write(tmp.path().join("hello"), b"hello world").unwrap();
        let core = make_core(tmp.path());
        let value = run_node(core, rooted("hello")).await.unwrap();
        match value {
            FileStateValue::File {
                size, fingerprint, ..
            } => {
                assert_eq!(size, 11);
                assert_eq!(fingerprint, FileFingerprint::Proxy { size: 11, mtime: None });
            }
            other => panic!("expected a File state, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_file_still_falls_back_to_mtime() {
        let tmp = tempfile::TempDir::new().unwrap();
        std_fs::write(tmp.path().join("empty"), b"").unwrap();
        let core = make_core(tmp.path());
        let value = run_node(core, rooted("empty")).await.unwrap();
        match value {
            FileStateValue::File { fingerprint, .. } => match fingerprint {
                FileFingerprint::Proxy { size, mtime } => {
                    assert_eq!(size, 0);
                    assert!(mtime.is_some());
                }
                other => panic!("expected a Proxy fingerprint, got {other:?}"),
            },
            other => panic!("expected a File state, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn touching_a_non_empty_files_mtime_is_a_no_op() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("hello");
        std_fs::write(&path, b"hello world").unwrap();
        let core = make_core(tmp.path());
        let before = run_node(core.clone(), rooted("hello")).await.unwrap();

        let old_mtime = std_fs::metadata(&path).unwrap().modified().unwrap();
        let new_mtime = old_mtime + std::time::Duration::from_secs(120);
        std_fs::File::open(&path).unwrap().set_modified(new_mtime).unwrap();

        let after = run_node(core, rooted("hello")).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn symlink_is_reported_unresolved() {
        let tmp = tempfile::TempDir::new().unwrap();
        std_fs::write(tmp.path().join("target"), b"hi").unwrap();
        std::os::unix::fs::symlink("target", tmp.path().join("link")).unwrap();
        let core = make_core(tmp.path());
        let value = run_node(core, rooted("link")).await.unwrap();
        match value {
            FileStateValue::Symlink { target } => assert_eq!(target, std::path::Path::new("target")),
            other => panic!("expected a Symlink state, got {other:?}"),
        }
    }
}
