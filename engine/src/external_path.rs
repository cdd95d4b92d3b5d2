// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! §4.9 External-Path Policy: classifies a resolved absolute path as `Internal` (under a
//! configured package root), `ExternalImmutable` (under a declared immutable directory — assumed
//! not to change within a process lifetime, so no change-detector dependency is needed), or
//! `ExternalMutable` (anything else, which must depend on the `BuildId` sentinel so it is
//! re-observed every build).
//!
//! Most `RootedPath`s constructed by `NodeKey::new` are already `Internal` by construction (they
//! carry a `Root` index into the configured roots). This module exists for the one place that
//! mints paths *not* already known to be internal: the `File` node's symlink-resolution loop,
//! when a symlink target's relative path would escape its own root (§4.2).

use std::path::{Path, PathBuf};

use crate::core::EngineCore;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PathClass {
    Internal,
    ExternalImmutable,
    ExternalMutable,
}

/// Classifies an absolute path. If it resolves under a configured package root, also returns the
/// `RootedPath` it corresponds to there (so callers can keep following it as an ordinary rooted
/// path rather than falling out of the rooted-path model entirely).
pub fn classify(core: &EngineCore, absolute: &Path) -> (PathClass, Option<fs::RootedPath>) {
    for (root, root_dir) in core.roots.iter() {
        if let Ok(relative) = absolute.strip_prefix(root_dir) {
            if let Ok(relative_path) = fs::RelativePath::new(relative) {
                return (
                    PathClass::Internal,
                    Some(fs::RootedPath::new(root, relative_path)),
                );
            }
        }
    }
    for immutable_dir in &core.options.immutable_directories {
        if absolute.starts_with(immutable_dir) {
            return (PathClass::ExternalImmutable, None);
        }
    }
    (PathClass::ExternalMutable, None)
}

/// Lexically normalizes a path that may contain `..`/`.` components without requiring it to
/// exist and without rejecting components that walk back past the start (unlike
/// `fs::RelativePath::new`, which rejects exactly that case because a rooted path must never
/// escape its root). Used only when a symlink target's relative resolution has already been
/// determined to escape its root, to recover the absolute path it actually points at.
pub fn lexically_normalize(base: &Path, relative: &Path) -> PathBuf {
    let mut components: Vec<std::path::Component> = base.components().collect();
    for component in relative.components() {
        match component {
            std::path::Component::ParentDir => {
                components.pop();
            }
            std::path::Component::CurDir => (),
            other => components.push(other),
        }
    }
    components.iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use options::EngineOptions;

    fn core_with_roots(roots: Vec<PathBuf>, immutable: Vec<PathBuf>) -> EngineCore {
        let options = EngineOptions::new(roots).with_immutable_directories(immutable);
        EngineCore::new(options, task_executor::Executor::new_owned(1, 2).unwrap()).unwrap()
    }

    #[test]
    fn classifies_internal_path() {
        let tmp = tempfile::TempDir::new().unwrap();
        let core = core_with_roots(vec![tmp.path().to_path_buf()], vec![]);
        let (class, rooted) = classify(&core, &tmp.path().join("foo/bar"));
        assert_eq!(class, PathClass::Internal);
        assert!(rooted.is_some());
    }

    #[test]
    fn classifies_external_immutable_path() {
        let root_tmp = tempfile::TempDir::new().unwrap();
        let immutable_tmp = tempfile::TempDir::new().unwrap();
        let core = core_with_roots(
            vec![root_tmp.path().to_path_buf()],
            vec![immutable_tmp.path().to_path_buf()],
        );
        let (class, _) = classify(&core, &immutable_tmp.path().join("cached/thing"));
        assert_eq!(class, PathClass::ExternalImmutable);
    }

    #[test]
    fn classifies_external_mutable_path() {
        let root_tmp = tempfile::TempDir::new().unwrap();
        let core = core_with_roots(vec![root_tmp.path().to_path_buf()], vec![]);
        let (class, _) = classify(&core, Path::new("/somewhere/else/entirely"));
        assert_eq!(class, PathClass::ExternalMutable);
    }

    #[test]
    fn lexical_normalization_pops_parent_components() {
        let base = Path::new("/root/pkg/sub");
        let result = lexically_normalize(base, Path::new("../../other"));
        assert_eq!(result, PathBuf::from("/root/other"));
    }
}
