// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
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

//! The incremental evaluation engine proper: the registered-function families of §2, wired onto
//! the generic `graph` crate via `NodeKey`/`NodeValue`, plus the `evaluate()` facade of §6 that
//! ties the graph, the filesystem watch, and the external-path policy together for one caller.

pub mod core;
pub mod error;
pub mod evaluation;
pub mod external_path;
pub mod nodes;

pub use crate::core::EngineCore;
pub use crate::error::{EngineError, ErrorKind};
pub use crate::evaluation::{EvalResult, Evaluator, Listener, NoopListener, PatternFilter, ResolvedPatterns};
pub use crate::nodes::{NodeKey, NodeValue, NodeVariant};
