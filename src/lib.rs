// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Host-side flashing and diagnostic tool for ROM-bootloader
//! microcontrollers: a SLIP-framed command protocol, chip detection, ELF and
//! Intel HEX conversion, and a serial/UDP monitor relay.

pub mod cancel;
pub mod chip;
pub mod cli;
pub mod config;
pub mod error;
pub mod flash;
pub mod hexfile;
pub mod image;
pub mod logging;
pub mod monitor;
pub mod protocol;
pub mod reset;
pub mod session;
pub mod slip;
pub mod transport;

pub use error::{Error, Result};
