// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! RFC 1055 SLIP framing, byte-stuffed over the serial link.
//!
//! The codec owns a fixed-capacity buffer and never allocates. It has two
//! modes: [`Mode::Passthrough`], where bytes fed to [`Decoder::feed`] are
//! handed back to the caller as console output, and [`Mode::Packet`], where
//! bytes are escape-decoded and appended to the internal buffer. The mode
//! toggles on every delimiter byte, and on no other byte.

/// Frame delimiter.
pub const END: u8 = 0xC0;
/// Escape byte.
pub const ESC: u8 = 0xDB;
/// Escaped encoding of [`END`].
pub const ESC_END: u8 = 0xDC;
/// Escaped encoding of [`ESC`].
pub const ESC_ESC: u8 = 0xDD;

/// Capacity of the decode buffer. Large enough for the biggest body this
/// protocol ever frames: a 4096-byte `FLASH_DATA` payload plus its 16-byte
/// prefix and the 8-byte command header.
pub const BUF_CAPACITY: usize = 4096 + 16 + 8 + 64;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Mode {
    Passthrough,
    Packet,
}

/// What happened to a single byte fed into the decoder.
#[derive(Debug, PartialEq, Eq)]
pub enum Fed {
    /// The codec is in passthrough mode; this byte is console output.
    Passthrough(u8),
    /// The codec is assembling a packet; the byte was consumed silently.
    Consumed,
    /// A closing delimiter completed a packet. The packet's bytes are
    /// available via [`Decoder::packet`] and have length `len`.
    PacketReady { len: usize },
}

/// A byte-stuffing SLIP decoder with an owned, fixed-capacity buffer.
pub struct Decoder {
    buf: [u8; BUF_CAPACITY],
    len: usize,
    mode: Mode,
    prev: u8,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buf: [0; BUF_CAPACITY],
            len: 0,
            mode: Mode::Passthrough,
            prev: 0,
        }
    }

    /// The bytes of the most recently assembled packet.
    pub fn packet(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Feeds one byte from the serial line into the decoder.
    pub fn feed(&mut self, byte: u8) -> Fed {
        if byte == END {
            let result = if self.mode == Mode::Packet {
                let len = self.len;
                self.len = 0;
                Fed::PacketReady { len }
            } else {
                Fed::Consumed
            };
            self.mode = match self.mode {
                Mode::Passthrough => Mode::Packet,
                Mode::Packet => Mode::Passthrough,
            };
            self.prev = byte;
            return result;
        }

        if self.mode == Mode::Passthrough {
            self.prev = byte;
            return Fed::Passthrough(byte);
        }

        if self.prev == ESC && byte == ESC_END {
            self.push(END);
        } else if self.prev == ESC && byte == ESC_ESC {
            self.push(ESC);
        } else if byte != ESC {
            self.push(byte);
        }
        // byte == ESC and prev != ESC: the escape byte itself is never
        // appended; it only sets up the resolution on the next byte.
        self.prev = byte;
        Fed::Consumed
    }

    fn push(&mut self, byte: u8) {
        if self.len >= self.buf.len() {
            // Overflow policy: reset silently, never grow.
            self.len = 0;
            return;
        }
        self.buf[self.len] = byte;
        self.len += 1;
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encodes `payload` as a complete SLIP frame, calling `sink` once per
/// emitted byte (including the framing delimiters). The sink is generic so
/// the same encoder works against a `Write` impl, a `Vec<u8>`, or a test
/// double.
pub fn encode(payload: &[u8], mut sink: impl FnMut(u8)) {
    sink(END);
    for &byte in payload {
        match byte {
            END => {
                sink(ESC);
                sink(ESC_END);
            }
            ESC => {
                sink(ESC);
                sink(ESC_ESC);
            }
            other => sink(other),
        }
    }
    sink(END);
}

/// Convenience wrapper around [`encode`] that appends to a `Vec<u8>`.
pub fn encode_to_vec(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 2);
    encode(payload, |b| out.push(b));
    out
}

#[cfg(test)]
mod test {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut dec = Decoder::new();
        let mut packets = Vec::new();
        for &b in bytes {
            if let Fed::PacketReady { len } = dec.feed(b) {
                packets.push(dec.packet()[..len].to_vec());
            }
        }
        packets
    }

    #[test]
    fn encode_single_end_byte() {
        let encoded = encode_to_vec(&[0xC0]);
        assert_eq!(encoded, vec![0xC0, 0xDB, 0xDC, 0xC0]);
    }

    #[test]
    fn encode_single_esc_byte() {
        let encoded = encode_to_vec(&[0xDB]);
        assert_eq!(encoded, vec![0xC0, 0xDB, 0xDD, 0xC0]);
    }

    #[test]
    fn decode_of_encoded_end_byte_yields_one_packet() {
        let packets = decode_all(&[0xC0, 0xDB, 0xDC, 0xC0]);
        assert_eq!(packets, vec![vec![0xC0]]);
    }

    #[test]
    fn every_byte_round_trips() {
        for byte in 0u8..=255 {
            let encoded = encode_to_vec(&[byte]);
            let packets = decode_all(&encoded);
            assert_eq!(packets, vec![vec![byte]], "byte {byte:#04x} failed to round-trip");
        }
    }

    #[test]
    fn arbitrary_payload_round_trips() {
        let payload: Vec<u8> = (0u8..=255).chain(0u8..=255).collect();
        let encoded = encode_to_vec(&payload);
        let packets = decode_all(&encoded);
        assert_eq!(packets, vec![payload]);
    }

    #[test]
    fn mode_toggles_only_on_delimiter() {
        let mut dec = Decoder::new();
        // Starts in passthrough.
        assert_eq!(dec.feed(0x41), Fed::Passthrough(0x41));
        assert_eq!(dec.feed(0x42), Fed::Passthrough(0x42));
        // First END flips to packet mode.
        assert_eq!(dec.feed(END), Fed::Consumed);
        assert_eq!(dec.feed(0x01), Fed::Consumed);
        // Closing END flips back to passthrough and yields the packet.
        assert_eq!(dec.feed(END), Fed::PacketReady { len: 1 });
        assert_eq!(dec.feed(0x99), Fed::Passthrough(0x99));
    }

    #[test]
    fn overflow_resets_length_silently() {
        let mut dec = Decoder::new();
        dec.feed(END);
        for _ in 0..(BUF_CAPACITY + 10) {
            dec.feed(0x41);
        }
        // Buffer should have been silently reset at least once; closing the
        // frame now must not panic and must report a length no larger than
        // what was pushed since the last reset.
        let fed = dec.feed(END);
        match fed {
            Fed::PacketReady { len } => assert!(len <= BUF_CAPACITY),
            other => panic!("expected PacketReady, got {other:?}"),
        }
    }

    #[test]
    fn passthrough_bytes_are_not_buffered() {
        let mut dec = Decoder::new();
        for b in 0u8..10 {
            assert_eq!(dec.feed(b), Fed::Passthrough(b));
        }
    }
}
