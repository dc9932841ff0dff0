// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Bootloader entry / synchronization orchestrator (§4.D).
//!
//! Three reset "recipes" assert DTR/RTS in different timed sequences to coax
//! the chip into its ROM download mode; since no single sequence works
//! across every USB-serial adapter, [`Orchestrator`] rotates through them
//! across repeated connection attempts.

use std::time::Duration;

use crate::chip::{self, ChipDescriptor, StatusTail};
use crate::error::{Error, Result};
use crate::protocol::{Link, Opcode};
use crate::transport::Serial;

const DEFAULT_RESET_DELAY: Duration = Duration::from_millis(50);

fn sleep(d: Duration) {
    std::thread::sleep(d);
}

/// Clears DTR/RTS, pulses DTR high then cycles RTS, settling between steps.
/// This is the recipe USB-JTAG-serial adapters respond to.
fn usb_jtag_serial_recipe(serial: &mut Serial) -> Result<()> {
    serial.set_rts(false)?;
    serial.set_dtr(false)?;
    sleep(Duration::from_millis(100));
    serial.set_dtr(true)?;
    serial.set_rts(false)?;
    sleep(Duration::from_millis(100));
    serial.set_rts(true)?;
    serial.set_dtr(false)?;
    serial.set_rts(true)?;
    sleep(Duration::from_millis(100));
    serial.set_dtr(false)?;
    serial.set_rts(false)?;
    Ok(())
}

/// DTR low, RTS high, wait 100ms, DTR high, RTS low, wait `delay`, DTR low.
fn classic_recipe(serial: &mut Serial, delay: Duration) -> Result<()> {
    sleep(Duration::from_millis(100));
    serial.set_dtr(false)?;
    serial.set_rts(true)?;
    sleep(Duration::from_millis(100));
    serial.set_dtr(true)?;
    serial.set_rts(false)?;
    sleep(delay);
    serial.set_dtr(false)?;
    Ok(())
}

/// Sets DTR and RTS together through what on Unix is a single ioctl; here
/// through two writes performed back-to-back, matching the observable
/// timing the "tight" variant exists for.
fn set_rts_and_dtr(serial: &mut Serial, rts: bool, dtr: bool) -> Result<()> {
    serial.set_rts(rts)?;
    serial.set_dtr(dtr)?;
    Ok(())
}

/// `(0,0) -> (1,1) -> (1,0) -> wait 100ms -> (0,1) -> wait delay -> (0,0)`.
/// Unix-only in the original tool because it relies on setting both lines in
/// one syscall to avoid a race other platforms don't exhibit; kept available
/// on every platform here since this crate's transport sets the lines
/// independently regardless of target OS.
fn unix_tight_recipe(serial: &mut Serial, delay: Duration) -> Result<()> {
    set_rts_and_dtr(serial, false, false)?;
    set_rts_and_dtr(serial, true, true)?;
    set_rts_and_dtr(serial, true, false)?;
    sleep(Duration::from_millis(100));
    set_rts_and_dtr(serial, false, true)?;
    sleep(delay);
    set_rts_and_dtr(serial, false, false)?;
    serial.set_dtr(false)?;
    Ok(())
}

/// Which rotation table is in effect. The Windows-style table has 3
/// recipes; the Unix-style table has 5 (it additionally tries both
/// `unix_tight_recipe` delays before falling back to the classic recipe).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Platform {
    WindowsStyle,
    UnixStyle,
}

impl Platform {
    /// The rotation table's length for this platform (§8 "reset rotation").
    pub fn cycle_length(self) -> u32 {
        match self {
            Platform::WindowsStyle => 3,
            Platform::UnixStyle => 5,
        }
    }

    #[cfg(unix)]
    pub fn native() -> Self {
        Platform::UnixStyle
    }

    #[cfg(not(unix))]
    pub fn native() -> Self {
        Platform::WindowsStyle
    }
}

/// Drives the reset/sync sequence. Owns the rotating recipe counter as
/// instance state (§9 design note) rather than a process-wide global, so
/// tests can construct one with a fixed starting counter and assert which
/// recipe a given attempt number selects.
pub struct Orchestrator {
    platform: Platform,
    count: u32,
}

impl Orchestrator {
    pub fn new(platform: Platform) -> Self {
        Self { platform, count: 0 }
    }

    /// Runs one reset recipe — the one selected by the current rotation
    /// counter — and advances the counter.
    pub fn reset_once(&mut self, serial: &mut Serial) -> Result<()> {
        let cycle = self.platform.cycle_length();
        let slot = self.count % cycle;
        self.count += 1;

        match self.platform {
            Platform::WindowsStyle => match slot {
                0 => usb_jtag_serial_recipe(serial),
                1 => classic_recipe(serial, DEFAULT_RESET_DELAY),
                _ => classic_recipe(serial, DEFAULT_RESET_DELAY + Duration::from_millis(50)),
            },
            Platform::UnixStyle => match slot {
                0 => usb_jtag_serial_recipe(serial),
                1 => unix_tight_recipe(serial, DEFAULT_RESET_DELAY),
                2 => unix_tight_recipe(serial, DEFAULT_RESET_DELAY + Duration::from_millis(50)),
                3 => classic_recipe(serial, DEFAULT_RESET_DELAY),
                _ => classic_recipe(serial, DEFAULT_RESET_DELAY + Duration::from_millis(50)),
            },
        }
    }

    /// Runs six reset rounds of `(2 + j)` SYNC attempts each, trying a fresh
    /// recipe before each round, until one SYNC succeeds. On success, flushes
    /// the serial buffers, detects the chip, and returns it; on exhaustion,
    /// fails with [`Error::SyncFailed`].
    ///
    /// `expected` is the user's `-chip` override, if any: detection must
    /// agree with it or the session fails with [`Error::ChipMismatch`].
    pub fn connect(
        &mut self,
        link: &mut Link,
        expected: Option<ChipDescriptor>,
    ) -> Result<ChipDescriptor> {
        let mut attempts = 0u32;
        for round in 0..6u32 {
            self.reset_once(link.serial_mut())?;
            link.serial_mut().flush_buffers()?;

            for _ in 0..(2 + round) {
                attempts += 1;
                let mut body = vec![0x07, 0x07, 0x12, 0x20];
                body.extend(std::iter::repeat(0x55).take(32));
                let sync_result = link.send(Opcode::Sync, &body, 0, Duration::from_millis(100));
                if let Ok((0, _)) = sync_result {
                    sleep(Duration::from_millis(50));
                    link.serial_mut().flush_buffers()?;
                    return self.detect(link, expected);
                }
            }
        }
        Err(Error::SyncFailed { attempts })
    }

    fn detect(&self, link: &mut Link, expected: Option<ChipDescriptor>) -> Result<ChipDescriptor> {
        let chip_id = link.read_register(0x4000_1000)?;
        let detected = chip::by_id(chip_id)?;
        if let Some(expected) = expected {
            if expected.id != 0 && expected.id != detected.id {
                return Err(Error::ChipMismatch {
                    expected: expected.name.to_string(),
                    actual: detected.id,
                });
            }
        }
        link.set_status_tail(tail_for(&detected));
        Ok(detected)
    }
}

fn tail_for(chip: &ChipDescriptor) -> StatusTail {
    chip.status_tail
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn windows_style_cycle_length_is_three() {
        assert_eq!(Platform::WindowsStyle.cycle_length(), 3);
    }

    #[test]
    fn unix_style_cycle_length_is_five() {
        assert_eq!(Platform::UnixStyle.cycle_length(), 5);
    }

    #[test]
    fn rotation_counter_wraps_and_each_recipe_gets_its_share() {
        // We can't exercise the real DTR/RTS toggles without a serial port,
        // but the rotation arithmetic itself is pure and must give each
        // recipe slot at least floor(N / cycle_length) turns over N attempts
        // (§8 "reset rotation").
        let cycle = Platform::UnixStyle.cycle_length();
        let n = 37u32;
        let mut counts = vec![0u32; cycle as usize];
        for i in 0..n {
            counts[(i % cycle) as usize] += 1;
        }
        for c in counts {
            assert!(c >= n / cycle);
        }
    }
}
