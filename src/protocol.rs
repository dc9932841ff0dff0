// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! The command protocol (§4.C): fixed 8-byte header + body, carried over the
//! SLIP codec, strictly synchronous (one request in flight at a time).

use std::time::{Duration, Instant};

use byteorder::{ByteOrder, LittleEndian};

use crate::chip::StatusTail;
use crate::error::{status_message, Error, Result};
use crate::slip::{self, Decoder, Fed};
use crate::transport::Serial;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Opcode {
    FlashBegin = 2,
    FlashData = 3,
    FlashEnd = 4,
    MemBegin = 5,
    MemEnd = 6,
    MemData = 7,
    Sync = 8,
    WriteReg = 9,
    ReadReg = 10,
    SpiSetParams = 11,
    SpiAttach = 13,
    ReadFlashSlow = 14,
    ChangeBaudRate = 15,
}

/// XOR-folds `body` starting from the protocol's seed byte `0xEF` (§4.C, and
/// reused verbatim by the image checksum in §4.G).
pub fn checksum(body: &[u8]) -> u8 {
    body.iter().fold(0xEFu8, |acc, &b| acc ^ b)
}

/// Builds the 8-byte request header (§4.C table) followed by `body`.
pub fn build_request(op: Opcode, body: &[u8], checksum: u32) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8 + body.len());
    frame.push(0); // direction = request
    frame.push(op as u8);
    let mut len_buf = [0u8; 2];
    LittleEndian::write_u16(&mut len_buf, body.len() as u16);
    frame.extend_from_slice(&len_buf);
    let mut cs_buf = [0u8; 4];
    LittleEndian::write_u32(&mut cs_buf, checksum);
    frame.extend_from_slice(&cs_buf);
    frame.extend_from_slice(body);
    frame
}

/// A live link to a responsive bootloader: the serial handle plus the SLIP
/// decoder's assembly state. One [`Link`] is strictly synchronous — only one
/// request may be outstanding at a time (§5).
pub struct Link {
    serial: Serial,
    decoder: Decoder,
    status_tail: StatusTail,
}

impl Link {
    pub fn new(serial: Serial, status_tail: StatusTail) -> Self {
        Self {
            serial,
            decoder: Decoder::new(),
            status_tail,
        }
    }

    pub fn set_status_tail(&mut self, tail: StatusTail) {
        self.status_tail = tail;
    }

    pub fn serial_mut(&mut self) -> &mut Serial {
        &mut self.serial
    }

    /// Sends `op`/`body`/`checksum` and waits up to `timeout` for a matching
    /// response (§4.C `send` contract). Returns the response error code (0
    /// = success) and the full assembled response frame, so callers needing
    /// the data payload (e.g. `READ_REG`) can pull it out themselves.
    pub fn send(
        &mut self,
        op: Opcode,
        body: &[u8],
        checksum: u32,
        timeout: Duration,
    ) -> Result<(u8, Vec<u8>)> {
        let request = build_request(op, body, checksum);
        let mut encoded = Vec::new();
        slip::encode(&request, |b| encoded.push(b));
        self.serial.write_all(&encoded)?;

        let deadline = Instant::now() + timeout;
        let mut byte_buf = [0u8; 256];
        loop {
            if Instant::now() >= deadline {
                return Err(Error::ProtocolTimeout { opcode: op as u8 });
            }
            if !self.serial.wait_readable(deadline) {
                return Err(Error::ProtocolTimeout { opcode: op as u8 });
            }
            let n = self.serial.read_available(&mut byte_buf)?;
            if n == 0 {
                continue;
            }
            for &b in &byte_buf[..n] {
                if let Fed::PacketReady { len } = self.decoder.feed(b) {
                    let frame = self.decoder.packet()[..len].to_vec();
                    if len >= 10 && frame[0] == 0x01 && frame[1] == op as u8 {
                        let tail_len = self.status_tail.len();
                        let tail = &frame[frame.len() - tail_len..];
                        let error_flag = tail[0];
                        let code = if error_flag != 0 { tail[1] } else { 0 };
                        return Ok((code, frame));
                    }
                    // Response for a different opcode, or too short: ignored
                    // per §4.C ordering guarantees.
                }
            }
        }
    }

    /// Sends a request and turns a non-zero status code into
    /// [`Error::ProtocolStatus`].
    pub fn send_checked(
        &mut self,
        op: Opcode,
        body: &[u8],
        checksum: u32,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let (code, frame) = self.send(op, body, checksum, timeout)?;
        if code != 0 {
            return Err(Error::ProtocolStatus {
                opcode: op as u8,
                code,
                message: status_message(code),
            });
        }
        Ok(frame)
    }

    /// `READ_REG` (§4.C): reads the 32-bit value at `addr`. The value sits
    /// at offset 4 of the response frame on success.
    pub fn read_register(&mut self, addr: u32) -> Result<u32> {
        let mut body = [0u8; 4];
        LittleEndian::write_u32(&mut body, addr);
        let frame = self.send_checked(Opcode::ReadReg, &body, 0, Duration::from_millis(100))?;
        Ok(LittleEndian::read_u32(&frame[4..8]))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn checksum_of_empty_body_is_seed() {
        assert_eq!(checksum(&[]), 0xEF);
    }

    #[test]
    fn checksum_is_order_independent() {
        let a = checksum(&[0x01, 0x02, 0x03]);
        let b = checksum(&[0x03, 0x01, 0x02]);
        assert_eq!(a, b);
    }

    #[test]
    fn read_reg_header_matches_spec_literal() {
        let mut body = [0u8; 4];
        LittleEndian::write_u32(&mut body, 0x4000_1000);
        let frame = build_request(Opcode::ReadReg, &body, 0);
        assert_eq!(
            &frame[..8],
            &[0x00, 0x0A, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
        assert_eq!(&frame[8..], &body);
    }

    #[test]
    fn sync_frame_matches_spec_literal() {
        let mut body = vec![0x07, 0x07, 0x12, 0x20];
        body.extend(std::iter::repeat(0x55).take(32));
        let frame = build_request(Opcode::Sync, &body, 0);
        let mut encoded = Vec::new();
        slip::encode(&frame, |b| encoded.push(b));

        let mut expected = vec![0xC0, 0x00, 0x08, 0x24, 0x00, 0x00, 0x00, 0x00, 0x00];
        expected.extend([0x07, 0x07, 0x12, 0x20]);
        expected.extend(std::iter::repeat(0x55).take(32));
        expected.push(0xC0);
        assert_eq!(encoded, expected);
    }
}
