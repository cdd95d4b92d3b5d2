// Copyright 2017 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
#![deny(
    clippy::all,
    clippy::default_trait_access,
    clippy::expl_impl_clone_on_copy,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::unseparated_literal_suffix,
    clippy::used_underscore_binding
)]
#![allow(clippy::match_ref_pats)]
#![allow(
    clippy::len_without_is_empty,
    clippy::redundant_field_names,
    clippy::too_many_arguments
)]
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]
#![allow(clippy::mutex_atomic)]

#[cfg(unix)]
mod posixfs;

use std::ops::Deref;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;

#[cfg(unix)]
pub use crate::posixfs::PosixFS;

/// NB: Linux limits path lookups to 40 symlink traversals: https://lwn.net/Articles/650786/
///
/// The File node's resolution loop uses a slightly different limit because it is a distinct
/// operation from the kernel's own path resolution: it walks one symlink hop at a time, issuing
/// a file-state lookup for each intermediate rooted path.
pub const MAX_LINK_DEPTH: u8 = 64;

/// A path relative to some root, with `..`/`.` components resolved and absolute paths rejected.
#[derive(Clone, Debug, PartialEq, Eq, Ord, PartialOrd, Hash)]
pub struct RelativePath(PathBuf);

impl RelativePath {
    pub fn empty() -> RelativePath {
        RelativePath(PathBuf::new())
    }

    pub fn new<P: AsRef<Path>>(path: P) -> Result<RelativePath, String> {
        let mut relative_path = PathBuf::new();
        let candidate = path.as_ref();
        for component in candidate.components() {
            match component {
                Component::Prefix(_) => {
                    return Err(format!("Windows paths are not allowed: {candidate:?}"));
                }
                Component::RootDir => {
                    return Err(format!("Absolute paths are not allowed: {candidate:?}"));
                }
                Component::CurDir => (),
                Component::ParentDir => {
                    if !relative_path.pop() {
                        return Err(format!(
                            "Relative paths that escape the root are not allowed: {candidate:?}"
                        ));
                    }
                }
                Component::Normal(path) => relative_path.push(path),
            }
        }
        Ok(RelativePath(relative_path))
    }

    pub fn to_str(&self) -> Option<&str> {
        self.0.to_str()
    }

    pub fn join(&self, other: &RelativePath) -> RelativePath {
        RelativePath(self.0.join(&other.0))
    }

    pub fn parent(&self) -> Option<RelativePath> {
        self.0.parent().map(|p| RelativePath(p.to_path_buf()))
    }
}

impl Deref for RelativePath {
    type Target = PathBuf;

    fn deref(&self) -> &PathBuf {
        &self.0
    }
}

impl AsRef<Path> for RelativePath {
    fn as_ref(&self) -> &Path {
        self.0.as_path()
    }
}

impl From<RelativePath> for PathBuf {
    fn from(p: RelativePath) -> Self {
        p.0
    }
}

/// An index into the configured, ordered list of package roots (§3 "Rooted path"). Two rooted
/// paths with the same absolute resolution but different `Root`s are deliberately distinct keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Root(pub usize);

/// A `(root, relative)` pair, as described in §3.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RootedPath {
    pub root: Root,
    pub relative: RelativePath,
}

impl RootedPath {
    pub fn new(root: Root, relative: RelativePath) -> RootedPath {
        RootedPath { root, relative }
    }

    pub fn join(&self, child: &str) -> Result<RootedPath, String> {
        Ok(RootedPath {
            root: self.root,
            relative: self.relative.join(&RelativePath::new(child)?),
        })
    }

    pub fn parent(&self) -> Option<RootedPath> {
        self.relative.parent().map(|relative| RootedPath {
            root: self.root,
            relative,
        })
    }
}

/// The ordered, resolved absolute paths that `Root` indices refer to (§4.4's package-lookup scan
/// order; §4.9's containment checks).
#[derive(Clone, Debug)]
pub struct Roots(Vec<PathBuf>);

impl Roots {
    pub fn new(roots: Vec<PathBuf>) -> Roots {
        Roots(roots)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn resolve(&self, root: Root) -> &Path {
        &self.0[root.0]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Root, &Path)> {
        self.0.iter().enumerate().map(|(i, p)| (Root(i), p.as_path()))
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Stat {
    Link(Link),
    Dir(Dir),
    File(File),
}

impl Stat {
    pub fn path(&self) -> &Path {
        match self {
            Stat::Dir(Dir(p)) => p.as_path(),
            Stat::File(File { path: p, .. }) => p.as_path(),
            Stat::Link(Link { path: p, .. }) => p.as_path(),
        }
    }

    pub fn dir(path: PathBuf) -> Stat {
        Stat::Dir(Dir(path))
    }

    pub fn file(path: PathBuf, is_executable: bool) -> Stat {
        Stat::File(File {
            path,
            is_executable,
        })
    }

    pub fn link(path: PathBuf, target: PathBuf) -> Stat {
        Stat::Link(Link { path, target })
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Link {
    pub path: PathBuf,
    pub target: PathBuf,
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Dir(pub PathBuf);

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct File {
    pub path: PathBuf,
    pub is_executable: bool,
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum PathStat {
    Dir { path: PathBuf, stat: Dir },
    File { path: PathBuf, stat: File },
    Link { path: PathBuf, stat: Link },
}

impl PathStat {
    pub fn dir(path: PathBuf, stat: Dir) -> PathStat {
        PathStat::Dir { path, stat }
    }

    pub fn file(path: PathBuf, stat: File) -> PathStat {
        PathStat::File { path, stat }
    }

    pub fn link(path: PathBuf, stat: Link) -> PathStat {
        PathStat::Link { path, stat }
    }

    pub fn path(&self) -> &Path {
        match self {
            PathStat::Dir { path, .. } => path.as_path(),
            PathStat::File { path, .. } => path.as_path(),
            PathStat::Link { path, .. } => path.as_path(),
        }
    }
}

/// The kind of path (e.g. file, directory, symlink), as identified in `PathMetadata`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PathMetadataKind {
    File,
    Directory,
    Symlink,
}

/// Expanded filesystem attributes, used when more than the bare `Stat` kind is needed.
#[derive(Clone, Debug, PartialEq)]
pub struct PathMetadata {
    pub path: PathBuf,
    pub kind: PathMetadataKind,
    pub length: u64,
    pub is_executable: bool,
    pub unix_mode: Option<u32>,
    pub accessed: Option<SystemTime>,
    pub created: Option<SystemTime>,
    pub modified: Option<SystemTime>,
    pub symlink_target: Option<PathBuf>,
}

#[derive(Debug, Eq, PartialEq)]
pub struct DirectoryListing(pub Vec<Stat>);

/// A filesystem abstraction parameterized on an error type `E` (§6 "filesystem abstraction").
/// `readdir`/`scandir` implementations must return a listing sorted by name (§4.3).
#[async_trait]
pub trait Vfs<E: Send + Sync + 'static>: Clone + Send + Sync + 'static {
    /// `lstat` semantics: does not follow a trailing symlink. A "not found" condition surfaces as
    /// `Ok(None)`, never as an error (§4.2).
    async fn lstat(&self, path: &Path) -> Result<Option<Stat>, E>;
    async fn read_link(&self, link: &Link) -> Result<PathBuf, E>;
    async fn scandir(&self, dir: Dir) -> Result<Arc<DirectoryListing>, E>;
    /// A fast content digest, if the filesystem can provide one without reading the full file
    /// (§3, §6 "`fast_digest` (optional)"). `Ok(None)` means "fall back to the size/mtime proxy".
    async fn fast_digest(&self, path: &Path) -> Result<Option<hashing::Digest>, E>;
    fn mk_error(msg: &str) -> E;
}

#[cfg(unix)]
pub type FS = PosixFS;
