// Copyright 2021 Pants project contributors (see CONTRIBUTORS.md).
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

//! The engine's configuration record (§6 "CLI and configuration... passed in as a configuration
//! record at engine construction"). Parsing flags or config files into this record is out of
//! scope; callers build one directly.

use std::path::PathBuf;

/// Any flags that influence the evaluation engine's behavior, collected at construction time.
#[derive(Clone, Debug)]
pub struct EngineOptions {
    /// Number of worker threads driving the evaluation engine's work-stealing queue.
    pub parallelism: usize,
    /// If true, an error in one requested key does not cancel evaluation of independent keys.
    pub keep_going: bool,
    /// If true, a reference from a known-internal node to an `external_mutable` path is a typed
    /// error rather than an implicit `build_id` dependency (§4.9).
    pub error_on_external_files: bool,
    /// Package roots, in search order (§4.4's package-lookup scan order).
    pub package_roots: Vec<PathBuf>,
    /// Directories whose contents are assumed not to change within a process lifetime (§4.9).
    pub immutable_directories: Vec<PathBuf>,
    /// The file name that marks a directory as containing a package definition.
    pub build_file_name: String,
}

impl EngineOptions {
    pub fn new(package_roots: Vec<PathBuf>) -> EngineOptions {
        EngineOptions {
            parallelism: num_cpus(),
            keep_going: false,
            error_on_external_files: false,
            package_roots,
            immutable_directories: Vec::new(),
            build_file_name: "BUILD".to_owned(),
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_keep_going(mut self, keep_going: bool) -> Self {
        self.keep_going = keep_going;
        self
    }

    pub fn with_error_on_external_files(mut self, error_on_external_files: bool) -> Self {
        self.error_on_external_files = error_on_external_files;
        self
    }

    pub fn with_immutable_directories(mut self, dirs: Vec<PathBuf>) -> Self {
        self.immutable_directories = dirs;
        self
    }

    pub fn with_build_file_name(mut self, name: impl Into<String>) -> Self {
        self.build_file_name = name.into();
        self
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let opts = EngineOptions::new(vec![PathBuf::from("/repo")]);
        assert!(!opts.keep_going);
        assert!(!opts.error_on_external_files);
        assert_eq!(opts.build_file_name, "BUILD");
        assert!(opts.parallelism >= 1);
    }

    #[test]
    fn builder_overrides_apply() {
        let opts = EngineOptions::new(vec![])
            .with_keep_going(true)
            .with_parallelism(2)
            .with_build_file_name("PKG");
        assert!(opts.keep_going);
        assert_eq!(opts.parallelism, 2);
        assert_eq!(opts.build_file_name, "PKG");
    }
}
