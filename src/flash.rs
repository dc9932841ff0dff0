// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Flash driver (§4.F): SPI attach/set-params bring-up, block-wise write,
//! and the end-of-flash handshake.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use log::info;

use crate::chip::ChipDescriptor;
use crate::error::{Error, Result};
use crate::protocol::{checksum, Link, Opcode};
use crate::transport::hard_reset;

/// Block size used by `FLASH_BEGIN`/`FLASH_DATA` (distinct from the 64KiB
/// erase-block size `SPI_SET_PARAMS` advertises).
pub const FLASH_BLOCK_SIZE: usize = 4096;

/// A parsed `-fspi a,b,c,e,d` SPI pin specification (§4.F step 1).
#[derive(Clone, Copy, Debug, Default)]
pub struct PinSpec {
    pub a: u32,
    pub b: u32,
    pub c: u32,
    pub e: u32,
    pub d: u32,
}

impl PinSpec {
    /// Parses the CSV form `a,b,c,e,d`.
    pub fn parse(spec: &str) -> Result<Self> {
        let parts: Vec<&str> = spec.split(',').collect();
        if parts.len() != 5 {
            return Err(Error::InvalidPinSpec {
                spec: spec.to_string(),
                reason: format!("expected 5 comma-separated pins, got {}", parts.len()),
            });
        }
        let parse_one = |s: &str| -> Result<u32> {
            s.trim().parse::<u32>().map_err(|_| Error::InvalidPinSpec {
                spec: spec.to_string(),
                reason: format!("{s:?} is not a valid pin number"),
            })
        };
        Ok(Self {
            a: parse_one(parts[0])?,
            b: parse_one(parts[1])?,
            c: parse_one(parts[2])?,
            e: parse_one(parts[3])?,
            d: parse_one(parts[4])?,
        })
    }

    /// Encodes as `a | b<<6 | c<<12 | d<<18 | e<<24` — note that the CSV's
    /// fourth field (`e`) lands in the top bits and the fifth (`d`) lands at
    /// `<<18`. This is reproduced verbatim from the device's pin-mux layout
    /// (§9 resolved open question), not a transcription bug.
    pub fn encode(self) -> u32 {
        self.a | (self.b << 6) | (self.c << 12) | (self.d << 18) | (self.e << 24)
    }
}

/// `SPI_ATTACH` + `SPI_SET_PARAMS` bring-up, required for every chip except
/// the ESP8266 (§4.F).
pub fn spi_attach(link: &mut Link, pins: Option<PinSpec>) -> Result<()> {
    let pins_word = pins.map(PinSpec::encode).unwrap_or(0);
    let mut body = [0u8; 8];
    LittleEndian::write_u32(&mut body[0..4], pins_word);
    LittleEndian::write_u32(&mut body[4..8], 0);
    link.send_checked(Opcode::SpiAttach, &body, 0, Duration::from_millis(3000))?;

    let mut params = [0u8; 24];
    LittleEndian::write_u32(&mut params[0..4], 0); // flash_id
    LittleEndian::write_u32(&mut params[4..8], 4 * 1024 * 1024); // flash_size
    LittleEndian::write_u32(&mut params[8..12], 65536); // block_size
    LittleEndian::write_u32(&mut params[12..16], 4096); // sector_size
    LittleEndian::write_u32(&mut params[16..20], 256); // page_size
    LittleEndian::write_u32(&mut params[20..24], 0xFFFF); // status_mask
    link.send_checked(
        Opcode::SpiSetParams,
        &params,
        0,
        Duration::from_millis(3000),
    )?;
    Ok(())
}

/// Resolves the 16-bit flash-params field embedded at offset 2..4 of a
/// bootable image's first block, either from `override_params` or by
/// reading it back off the device's existing bootloader image.
pub fn resolve_flash_params(
    link: &mut Link,
    chip: &ChipDescriptor,
    override_params: Option<u16>,
) -> Result<u16> {
    if let Some(p) = override_params {
        return Ok(p);
    }
    if chip.bootloader_flash_offset == 0 {
        return Ok(0);
    }
    let mut body = [0u8; 8];
    LittleEndian::write_u32(&mut body[0..4], chip.bootloader_flash_offset);
    LittleEndian::write_u32(&mut body[4..8], 16);
    let frame = link.send_checked(
        Opcode::ReadFlashSlow,
        &body,
        0,
        Duration::from_millis(2000),
    )?;
    let data = &frame[8..];
    if data[0] != 0xe9 {
        return Err(Error::BadFlashMagic {
            path: Path::new("<device bootloader image>").to_path_buf(),
            found: data[0],
        });
    }
    Ok(((data[2] as u16) << 8) | data[3] as u16)
}

/// Flashes one file's contents at `flash_offset`. `flash_params` is patched
/// into the first block only when `flash_offset` equals the chip's
/// bootloader image offset (§4.F step 4).
pub fn flash_file(
    link: &mut Link,
    chip: &ChipDescriptor,
    flash_params: u16,
    flash_offset: u32,
    path: &Path,
) -> Result<()> {
    let mut file = File::open(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let size = file
        .metadata()
        .map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?
        .len() as u32;

    let num_blocks = (size as usize + FLASH_BLOCK_SIZE - 1) / FLASH_BLOCK_SIZE;
    let mut begin_body = Vec::with_capacity(24);
    begin_body.extend_from_slice(&size.to_le_bytes());
    begin_body.extend_from_slice(&(num_blocks as u32).to_le_bytes());
    begin_body.extend_from_slice(&(FLASH_BLOCK_SIZE as u32).to_le_bytes());
    begin_body.extend_from_slice(&flash_offset.to_le_bytes());
    begin_body.extend_from_slice(&0u32.to_le_bytes()); // encrypted = 0
    if chip.flash_begin_has_trailer {
        begin_body.extend_from_slice(&0u32.to_le_bytes());
    }
    link.send_checked(
        Opcode::FlashBegin,
        &begin_body,
        0,
        Duration::from_millis(15_000),
    )?;

    info!("erasing {size} bytes @ {flash_offset:#x}");

    const HEADER: usize = 16;
    let mut buf = vec![0u8; HEADER + FLASH_BLOCK_SIZE];
    let mut seq = 0u32;
    let mut written = 0u32;
    loop {
        let n = file.read(&mut buf[HEADER..]).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if n == 0 {
            break;
        }

        if seq == 0 && flash_offset == chip.bootloader_flash_offset {
            patch_first_block(&mut buf[HEADER..HEADER + n], chip, flash_params);
        }

        LittleEndian::write_u32(&mut buf[0..4], n as u32);
        LittleEndian::write_u32(&mut buf[4..8], seq);
        buf[8..16].fill(0);

        let cs = checksum(&buf[HEADER..HEADER + n]);
        link.send_checked(
            Opcode::FlashData,
            &buf[..HEADER + n],
            cs as u32,
            Duration::from_millis(1500),
        )?;

        seq += 1;
        written += n as u32;
        info!(
            "writing {} bytes @ {:#x} ({}%)",
            path.display(),
            flash_offset + written - n as u32,
            (written as u64 * 100 / size.max(1) as u64)
        );
    }
    info!("written {} bytes @ {flash_offset:#x}", path.display());
    Ok(())
}

/// Patches flash-params and chip-type fields into the first `FLASH_DATA`
/// block of the embedded bootloader image, per §4.F step 4.
fn patch_first_block(block: &mut [u8], chip: &ChipDescriptor, flash_params: u16) {
    if flash_params != 0 && block.len() >= 4 {
        block[2] = (flash_params >> 8) as u8;
        block[3] = (flash_params & 0xff) as u8;
    }
    // Common header is 8 bytes, extended header offset 4 within it, so
    // offset 12 overall.
    if chip.name == "ESP32-C3-ECO3" && block.len() > 12 {
        block[12] = 5;
    }
    if chip.name == "ESP32-S2" {
        if block.len() > 8 {
            block[8] = 0;
        }
        if block.len() > 12 {
            block[12] = 2;
        }
    }
}

/// If `baud` exceeds 115200, negotiates `CHANGE_BAUD_RATE` and re-programs
/// the local serial port to match (§4.F step 1).
pub fn maybe_change_baud(link: &mut Link, baud: u32) -> Result<()> {
    if baud <= 115200 {
        return Ok(());
    }
    let mut body = [0u8; 8];
    LittleEndian::write_u32(&mut body[0..4], baud);
    LittleEndian::write_u32(&mut body[4..8], 0);
    link.send_checked(
        Opcode::ChangeBaudRate,
        &body,
        0,
        Duration::from_millis(50),
    )?;
    link.serial_mut().set_baud(baud)?;
    Ok(())
}

/// `FLASH_END` with `reboot=0` (reboot into application), followed by a
/// hard reset of the target (§4.F step 5).
pub fn flash_end_and_reset(link: &mut Link) -> Result<()> {
    let body = [0u8; 4];
    link.send_checked(Opcode::FlashEnd, &body, 0, Duration::from_millis(250))?;
    hard_reset(link.serial_mut())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::chip::ESP32_S2;

    #[test]
    fn pin_spec_places_fourth_csv_field_in_top_bits() {
        let pins = PinSpec {
            a: 1,
            b: 2,
            c: 3,
            e: 4,
            d: 5,
        };
        let encoded = pins.encode();
        assert_eq!(encoded, 1 | (2 << 6) | (3 << 12) | (5 << 18) | (4 << 24));
    }

    #[test]
    fn pin_spec_parse_rejects_wrong_field_count() {
        assert!(PinSpec::parse("1,2,3,4").is_err());
        assert!(PinSpec::parse("1,2,3,4,5,6").is_err());
    }

    #[test]
    fn pin_spec_parse_round_trips_field_order() {
        let pins = PinSpec::parse("1,2,3,4,5").unwrap();
        assert_eq!((pins.a, pins.b, pins.c, pins.e, pins.d), (1, 2, 3, 4, 5));
    }

    #[test]
    fn patch_first_block_sets_s2_chip_type_and_zeroes_offset_8() {
        let mut block = vec![0u8; 16];
        block[8] = 0xaa;
        patch_first_block(&mut block, &ESP32_S2, 0x0220);
        assert_eq!(block[2], 0x02);
        assert_eq!(block[3], 0x20);
        assert_eq!(block[8], 0);
        assert_eq!(block[12], 2);
    }
}
