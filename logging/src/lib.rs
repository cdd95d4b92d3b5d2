// Copyright 2018 Pants project contributors (see CONTRIBUTORS.md).
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

//! A thin `log`-facade logger for the engine: one process-wide destination, level-filtered,
//! timestamped, and colored by level the way a terminal-attached build tool's output is.

pub mod logger;

pub use logger::EngineLogger;

use std::sync::Once;

static INIT: Once = Once::new();

/// Installs the engine's logger as the global `log` implementation, at the given level. Safe to
/// call more than once: only the first call takes effect.
pub fn init(level: log::LevelFilter) {
    INIT.call_once(|| {
        log::set_max_level(level);
        log::set_boxed_logger(Box::new(EngineLogger::new(level)))
            .expect("a logger was already installed before logging::init was called");
    });
}
