// Copyright 2017 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fs;
use std::io::{self, ErrorKind};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::{Dir, DirectoryListing, File, Link, PathMetadata, PathMetadataKind, Stat, Vfs};

/// A `Vfs` backed by real POSIX syscalls, rooted at a canonicalized directory. All `Stat`s and
/// paths accepted or returned by this type are relative to that root.
#[derive(Clone)]
pub struct PosixFS {
    root: Dir,
    executor: task_executor::Executor,
}

impl PosixFS {
    pub fn new<P: AsRef<Path>>(
        root: P,
        executor: task_executor::Executor,
    ) -> Result<PosixFS, String> {
        let root: &Path = root.as_ref();
        let canonical_root = root
            .canonicalize()
            .and_then(|canonical| {
                canonical.metadata().and_then(|metadata| {
                    if metadata.is_dir() {
                        Ok(Dir(canonical))
                    } else {
                        Err(io::Error::new(
                            io::ErrorKind::InvalidInput,
                            "Not a directory.",
                        ))
                    }
                })
            })
            .map_err(|e| format!("Could not canonicalize root {root:?}: {e:?}"))?;

        Ok(PosixFS {
            root: canonical_root,
            executor,
        })
    }

    fn scandir_sync(&self, dir_relative_to_root: &Dir) -> Result<DirectoryListing, io::Error> {
        let dir_abs = self.root.0.join(&dir_relative_to_root.0);
        let mut stats: Vec<Stat> = dir_abs
            .read_dir()?
            .map(|readdir| {
                let dir_entry = readdir?;
                // `file_type()` from a directory walk is symlink-aware without an extra syscall.
                let file_type = dir_entry.file_type()?;
                PosixFS::stat_internal(&dir_abs.join(dir_entry.file_name()), file_type, || {
                    dir_entry.metadata()
                })
            })
            .filter_map(|s| match s {
                Ok(Some(s)) => Some(Ok(s)),
                Ok(None) => None,
                Err(e) => Some(Err(e)),
            })
            .collect::<Result<Vec<_>, io::Error>>()
            .map_err(|e| {
                io::Error::new(
                    e.kind(),
                    format!("Failed to scan directory {dir_abs:?}: {e}"),
                )
            })?;
        // §4.3: byte-wise lexicographic ordering by name, part of the observable contract.
        stats.sort_by(|s1, s2| s1.path().cmp(s2.path()));
        Ok(DirectoryListing(stats))
    }

    /// Builds a `Stat` for `path_to_stat`, relative to its containing directory.
    fn stat_internal<F>(
        path_to_stat: &Path,
        file_type: std::fs::FileType,
        compute_metadata: F,
    ) -> Result<Option<Stat>, io::Error>
    where
        F: FnOnce() -> Result<std::fs::Metadata, io::Error>,
    {
        let Some(file_name) = path_to_stat.file_name() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "path_to_stat must have a file name.",
            ));
        };
        let path = file_name.to_owned().into();
        if file_type.is_symlink() {
            Ok(Some(Stat::Link(Link {
                path,
                target: std::fs::read_link(path_to_stat)?,
            })))
        } else if file_type.is_file() {
            let is_executable = compute_metadata()?.permissions().mode() & 0o100 == 0o100;
            Ok(Some(Stat::File(File {
                path,
                is_executable,
            })))
        } else if file_type.is_dir() {
            Ok(Some(Stat::Dir(Dir(path))))
        } else {
            Ok(None)
        }
    }

    pub async fn scandir(&self, dir_relative_to_root: Dir) -> Result<DirectoryListing, io::Error> {
        let vfs = self.clone();
        self.executor
            .spawn_blocking(move || vfs.scandir_sync(&dir_relative_to_root), |_| {
                Err(io::Error::other("scandir task panicked"))
            })
            .await
    }

    pub fn file_path(&self, file: &File) -> PathBuf {
        self.root.0.join(&file.path)
    }

    /// Reads a regular file's full content (§4.4: the package-definition parser needs the actual
    /// bytes, not just a `Stat`/`PathMetadata` observation of it).
    pub async fn read_file(&self, relative_path: &Path) -> Result<Vec<u8>, io::Error> {
        let abs_path = self.root.0.join(relative_path);
        tokio::fs::read(&abs_path)
            .await
            .map_err(|e| io::Error::new(e.kind(), format!("Failed to read {abs_path:?}: {e}")))
    }

    pub async fn read_link(&self, link: &Link) -> Result<PathBuf, io::Error> {
        let link_parent = link.path.parent().map(Path::to_owned);
        let link_abs = self.root.0.join(link.path.as_path());
        tokio::fs::read_link(&link_abs)
            .await
            .and_then(|path_buf| {
                if path_buf.is_absolute() {
                    Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("Absolute symlink: {path_buf:?}"),
                    ))
                } else {
                    link_parent
                        .map(|parent| parent.join(&path_buf))
                        .ok_or_else(|| {
                            io::Error::new(
                                io::ErrorKind::InvalidData,
                                format!("Symlink without a parent?: {path_buf:?}"),
                            )
                        })
                }
            })
            .map_err(|e| io::Error::new(e.kind(), format!("Failed to read link {link_abs:?}: {e}")))
    }

    /// `lstat`: does not follow a trailing symlink. Synchronous because it is used to stat all
    /// files in a directory as one blocking operation as part of `scandir_sync`.
    pub fn stat_sync(&self, relative_path: &Path) -> Result<Option<Stat>, io::Error> {
        let abs_path = self.root.0.join(relative_path);
        fs::symlink_metadata(&abs_path)
            .and_then(|metadata| {
                PosixFS::stat_internal(&abs_path, metadata.file_type(), || Ok(metadata))
            })
            .or_else(|err| match err.kind() {
                // §4.2: "not found" is the `nonexistent` variant, not an error.
                io::ErrorKind::NotFound => Ok(None),
                _ => Err(err),
            })
    }

    pub async fn path_metadata(&self, path: PathBuf) -> Result<Option<PathMetadata>, io::Error> {
        let abs_path = self.root.0.join(&path);
        match tokio::fs::symlink_metadata(&abs_path).await {
            Ok(metadata) => {
                let (kind, symlink_target) = match metadata.file_type() {
                    ft if ft.is_symlink() => {
                        let symlink_target = tokio::fs::read_link(&abs_path).await.map_err(|e| {
                            io::Error::other(format!(
                                "path {abs_path:?} was previously a symlink but read_link failed: {e}"
                            ))
                        })?;
                        (PathMetadataKind::Symlink, Some(symlink_target))
                    }
                    ft if ft.is_dir() => (PathMetadataKind::Directory, None),
                    ft if ft.is_file() => (PathMetadataKind::File, None),
                    _ => unreachable!("std::fs::FileType was not a symlink, directory, or file"),
                };

                let mode = metadata.permissions().mode();
                Ok(Some(PathMetadata {
                    path,
                    kind,
                    length: metadata.len(),
                    is_executable: (mode & 0o111) != 0,
                    unix_mode: Some(mode),
                    accessed: metadata.accessed().ok(),
                    created: metadata.created().ok(),
                    modified: metadata.modified().ok(),
                    symlink_target,
                }))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl Vfs<io::Error> for Arc<PosixFS> {
    async fn lstat(&self, path: &Path) -> Result<Option<Stat>, io::Error> {
        PosixFS::stat_sync(self, path)
    }

    async fn read_link(&self, link: &Link) -> Result<PathBuf, io::Error> {
        PosixFS::read_link(self, link).await
    }

    async fn scandir(&self, dir: Dir) -> Result<Arc<DirectoryListing>, io::Error> {
        Ok(Arc::new(PosixFS::scandir(self, dir).await?))
    }

    async fn fast_digest(&self, _path: &Path) -> Result<Option<hashing::Digest>, io::Error> {
        // Plain POSIX has no fast content digest; callers fall back to the size/mtime proxy.
        Ok(None)
    }

    fn mk_error(msg: &str) -> io::Error {
        io::Error::other(msg)
    }
}
