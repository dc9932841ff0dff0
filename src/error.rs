// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Crate-wide error type.
//!
//! Every fallible operation in this crate returns a [`Result<T>`] using this
//! single enum rather than a per-module error type: the CLI layer needs to
//! turn any failure, from any subsystem, into one diagnostic line.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to open serial port {path}: {source}")]
    SerialOpen {
        path: String,
        #[source]
        source: serialport::Error,
    },

    #[error("failed to configure serial port: {source}")]
    SerialConfigure {
        #[source]
        source: serialport::Error,
    },

    #[error("serial line closed")]
    SerialClosed,

    #[error("serial I/O error: {0}")]
    SerialIo(#[source] std::io::Error),

    #[error("timed out waiting for response to opcode 0x{opcode:02x}")]
    ProtocolTimeout { opcode: u8 },

    #[error("device reported error for opcode 0x{opcode:02x}: {message} (code {code})")]
    ProtocolStatus {
        opcode: u8,
        code: u8,
        message: &'static str,
    },

    #[error("could not detect a responsive bootloader after {attempts} attempts")]
    SyncFailed { attempts: u32 },

    #[error(
        "chip mismatch: user specified {expected}, device reports chip id 0x{actual:08x}"
    )]
    ChipMismatch { expected: String, actual: u32 },

    #[error("unknown chip id 0x{0:08x}")]
    UnknownChip(u32),

    #[error("readflash is not supported on this chip")]
    ReadflashUnsupported,

    #[error("{path}: not a valid ELF32 little-endian file")]
    InvalidElf { path: PathBuf },

    #[error("{path}: file too short to contain a program header table")]
    TruncatedElf { path: PathBuf },

    #[error("{path}:{line}: malformed HEX record: {reason}")]
    MalformedHex {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("{path}: bad flash image magic byte 0x{found:02x}, expected 0xe9")]
    BadFlashMagic { path: PathBuf, found: u8 },

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid --fspi pin specification {spec:?}: {reason}")]
    InvalidPinSpec { spec: String, reason: String },

    #[error("invalid --fp flash-params value {spec:?}: {reason}")]
    InvalidFlashParams { spec: String, reason: String },
}

/// Maps a protocol status byte (§4.C) to its diagnostic string.
pub fn status_message(code: u8) -> &'static str {
    match code {
        5 => "invalid message",
        6 => "failed to act",
        7 => "invalid CRC",
        8 => "flash write error",
        9 => "flash read error",
        10 => "flash read length error",
        11 => "deflate error",
        _ => "unknown error",
    }
}
