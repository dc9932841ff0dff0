// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Serial device transport: open/configure, modem-control lines, and the
//! bounded, multi-source readiness wait used by both the command protocol
//! and the monitor relay.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use serialport::SerialPort;

use crate::error::{Error, Result};

/// An open serial port, plus the small amount of bookkeeping the higher
/// layers need (current baud, for `CHANGE_BAUD_RATE` re-programming).
pub struct Serial {
    port: Box<dyn SerialPort>,
    path: String,
    baud: u32,
}

impl Serial {
    /// Opens `path` at `baud`, 8 data bits / no parity / 1 stop bit — the
    /// only framing the bootloader protocol ever uses.
    pub fn open(path: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(path, baud)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(Duration::from_millis(10))
            .open()
            .map_err(|source| Error::SerialOpen {
                path: path.to_string(),
                source,
            })?;
        Ok(Self {
            port,
            path: path.to_string(),
            baud,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn baud(&self) -> u32 {
        self.baud
    }

    /// Reprograms the baud rate on the already-open handle, used by
    /// `CHANGE_BAUD_RATE` (§4.F) without closing and reopening the port.
    pub fn set_baud(&mut self, baud: u32) -> Result<()> {
        self.port
            .set_baud_rate(baud)
            .map_err(|source| Error::SerialConfigure { source })?;
        self.baud = baud;
        Ok(())
    }

    pub fn set_dtr(&mut self, level: bool) -> Result<()> {
        self.port
            .write_data_terminal_ready(level)
            .map_err(|source| Error::SerialConfigure { source })
    }

    pub fn set_rts(&mut self, level: bool) -> Result<()> {
        self.port
            .write_request_to_send(level)
            .map_err(|source| Error::SerialConfigure { source })
    }

    pub fn flush_buffers(&mut self) -> Result<()> {
        self.port
            .clear(serialport::ClearBuffer::All)
            .map_err(|source| Error::SerialConfigure { source })
    }

    pub fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.port.write_all(bytes).map_err(Error::SerialIo)
    }

    /// Reads whatever is immediately available (up to `buf.len()` bytes),
    /// returning `Ok(0)` rather than blocking past the port's own read
    /// timeout. An `Ok(0)` paired with a closed port surfaces as
    /// [`Error::SerialClosed`] via [`Serial::wait_readable`]'s caller.
    pub fn read_available(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(Error::SerialIo(e)),
        }
    }

    /// Blocks until the serial port is readable or `deadline` passes,
    /// whichever comes first. Bounded multi-source waits with stdin/UDP are
    /// layered on top of this in `monitor.rs`; the command protocol only
    /// ever needs the serial source, so it calls this directly.
    pub fn wait_readable(&mut self, deadline: Instant) -> bool {
        // serialport's own read timeout already bounds each probe; poll in
        // short slices until the deadline so the overall call never
        // oversleeps it.
        loop {
            if self.port.bytes_to_read().unwrap_or(0) > 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

/// Hard-resets the target: DTR low, RTS high, settle 100ms, RTS low. Used
/// after `FLASH_END` (§4.F) and is distinct from the bootloader-entry
/// recipes in `reset.rs`.
pub fn hard_reset(serial: &mut Serial) -> Result<()> {
    serial.set_dtr(false)?;
    serial.set_rts(true)?;
    std::thread::sleep(Duration::from_millis(100));
    serial.set_rts(false)?;
    Ok(())
}
