// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Logging initialization (§4.L): one call at process startup wires the
//! resolved verbose flag to `env_logger`'s filter level.

/// Initializes the global logger. Safe to call more than once per process
/// (later calls are no-ops) so tests that build a [`crate::config::Config`]
/// repeatedly don't panic on double-init.
pub fn init(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .try_init();
}
