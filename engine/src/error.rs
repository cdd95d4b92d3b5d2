// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The closed error taxonomy of §4.10, and the `EngineError` type that carries it across the
//! `graph::Node` boundary (`graph::NodeError` is implemented below). §3's "a value... may still
//! carry a usable payload alongside an error" is realized by `EngineError::partial`: a package
//! that parsed with errors still carries its partial `NodeValue::Package` here, recoverable via
//! `graph::Context::get_or_recover`.

use std::fmt;

use crate::nodes::NodeValue;

/// The closed set of error kinds the engine recognises (§4.10). The engine itself only ever
/// produces `Cycle`, `Cancelled`, and `Internal` (§4.10 "The engine itself never invents error
/// kinds for user-level problems"); the rest are produced by registered functions.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    Io,
    InconsistentFilesystem,
    SymlinkCycle,
    NotADirectory,
    PackageNotFound,
    PackageErrors,
    NoSuchTarget,
    ExternalReference,
    Cycle,
    Cancelled,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Io => "io",
            ErrorKind::InconsistentFilesystem => "inconsistent_filesystem",
            ErrorKind::SymlinkCycle => "symlink_cycle",
            ErrorKind::NotADirectory => "not_a_directory",
            ErrorKind::PackageNotFound => "package_not_found",
            ErrorKind::PackageErrors => "package_errors",
            ErrorKind::NoSuchTarget => "no_such_target",
            ErrorKind::ExternalReference => "external_reference",
            ErrorKind::Cycle => "cycle",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

/// A typed, captured error (§3 "Value::error"). `partial` carries a recovered payload alongside
/// the error for the families that support it (currently only `Package`, per §4.4 "Partial-failure
/// policy").
#[derive(Clone, Debug)]
pub struct EngineError {
    pub kind: ErrorKind,
    pub detail: String,
    pub partial: Option<Box<NodeValue>>,
}

impl EngineError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> EngineError {
        EngineError {
            kind,
            detail: detail.into(),
            partial: None,
        }
    }

    pub fn with_partial(mut self, partial: NodeValue) -> EngineError {
        self.partial = Some(Box::new(partial));
        self
    }

    /// Wraps an I/O error with path context, once (§7 "Filesystem errors... are wrapped with path
    /// context once and propagated").
    pub fn io(path: &std::path::Path, source: impl fmt::Display) -> EngineError {
        EngineError::new(ErrorKind::Io, format!("{}: {source}", path.display()))
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

impl std::error::Error for EngineError {}

impl graph::NodeError for EngineError {
    fn invalidated() -> EngineError {
        EngineError::new(ErrorKind::Internal, "node was invalidated mid-computation")
    }

    fn cancelled() -> EngineError {
        EngineError::new(ErrorKind::Cancelled, "the build was cancelled")
    }

    fn cyclic(path: Vec<String>) -> EngineError {
        EngineError::new(ErrorKind::Cycle, path.join(" -> "))
    }

    fn generic(msg: String) -> EngineError {
        EngineError::new(ErrorKind::Internal, msg)
    }
}
