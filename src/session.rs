// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Session context (§4.M): the per-invocation mutable state shared by the
//! protocol, reset orchestrator, and flash driver, built once by the CLI
//! layer and threaded through as `&mut` references.

use crate::cancel::Cancel;
use crate::chip::{self, ChipDescriptor, StatusTail};
use crate::config::Config;
use crate::error::Result;
use crate::protocol::Link;
use crate::reset::{Orchestrator, Platform};
use crate::transport::Serial;

/// The ROM bootloader always answers SYNC at this rate; any higher target
/// baud is only reached afterward, via `CHANGE_BAUD_RATE` (§4.F step 1).
const SYNC_BAUD: u32 = 115200;

pub struct Session {
    pub link: Link,
    pub orchestrator: Orchestrator,
    pub chip: ChipDescriptor,
    pub cancel: Cancel,
}

impl Session {
    /// Opens the serial port named in `config`, always at [`SYNC_BAUD`]
    /// regardless of the configured target baud, and wraps it in a fresh
    /// [`Link`]. Does not yet reset or sync with the target — callers do
    /// that via [`Session::connect`] once they're ready to talk to the
    /// bootloader.
    pub fn open(config: &Config) -> Result<Self> {
        let serial = Serial::open(&config.port, SYNC_BAUD)?;
        let tail = config
            .chip_override
            .map(|c| c.status_tail)
            .unwrap_or(StatusTail::Long);
        let link = Link::new(serial, tail);
        Ok(Self {
            link,
            orchestrator: Orchestrator::new(Platform::native()),
            chip: config.chip_override.unwrap_or(chip::UNKNOWN),
            cancel: Cancel::new(),
        })
    }

    /// Runs the reset/sync dance and records the detected (or confirmed)
    /// chip on the session.
    pub fn connect(&mut self) -> Result<ChipDescriptor> {
        let expected = if self.chip.id != 0 {
            Some(self.chip)
        } else {
            None
        };
        let detected = self.orchestrator.connect(&mut self.link, expected)?;
        self.chip = detected;
        Ok(detected)
    }
}

#[cfg(test)]
mod test {
    // Session::open requires a real serial device; its construction logic
    // is otherwise exercised end-to-end through the CLI integration tests.
}
