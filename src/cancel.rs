// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Cancellation token (§9 design note), replacing the original tool's
//! process-wide signal flag with a cloneable handle the monitor loop and any
//! bounded wait can observe.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct Cancel(Arc<AtomicBool>);

impl Cancel {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Installs this token as the target of SIGINT/Ctrl-C, mirroring
    /// `runner/src/main.rs`'s signal handler but without the `_exit`-on-signal
    /// shortcut: here the monitor loop is expected to observe the flag and
    /// unwind cleanly instead of terminating the process from the handler.
    pub fn install_ctrlc_handler(&self) {
        let token = self.clone();
        let _ = ctrlc::set_handler(move || token.set());
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn starts_unset_and_observes_set() {
        let token = Cancel::new();
        assert!(!token.is_set());
        token.set();
        assert!(token.is_set());
    }

    #[test]
    fn clones_share_state() {
        let token = Cancel::new();
        let clone = token.clone();
        clone.set();
        assert!(token.is_set());
    }
}
