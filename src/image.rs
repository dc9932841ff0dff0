// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! ELF32 → bootable image conversion (§4.G).
//!
//! Parses just enough of the ELF32 program header table to walk loadable
//! segments; this is not a general-purpose ELF reader and does not attempt
//! section-header or symbol-table support.

use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use log::info;

use crate::error::{Error, Result};

const EHDR_SIZE: usize = 52;
const PHDR_SIZE: usize = 32;

struct Ehdr {
    e_entry: u32,
    e_phoff: u32,
    e_phnum: u16,
}

struct Phdr {
    p_offset: u32,
    p_vaddr: u32,
    p_filesz: u32,
}

fn parse_ehdr(path: &Path, bytes: &[u8]) -> Result<Ehdr> {
    if bytes.len() < EHDR_SIZE {
        return Err(Error::TruncatedElf {
            path: path.to_path_buf(),
        });
    }
    if bytes[4] != 1 {
        return Err(Error::InvalidElf {
            path: path.to_path_buf(),
        });
    }
    Ok(Ehdr {
        e_entry: LittleEndian::read_u32(&bytes[24..28]),
        e_phoff: LittleEndian::read_u32(&bytes[28..32]),
        e_phnum: LittleEndian::read_u16(&bytes[44..46]),
    })
}

fn parse_phdr(path: &Path, bytes: &[u8], ehdr: &Ehdr, index: u16) -> Result<Phdr> {
    let base = ehdr.e_phoff as usize;
    let first = bytes
        .get(base..base + PHDR_SIZE)
        .ok_or_else(|| Error::TruncatedElf {
            path: path.to_path_buf(),
        })?;
    // GCC emits an empty leading program header; when we see one, every
    // index shifts by one to skip it (§4.G, and esputil.c's elf_get_phdr).
    let shift = if LittleEndian::read_u32(&first[16..20]) == 0 {
        1
    } else {
        0
    };
    let slot = index as usize + shift;
    let start = base + slot * PHDR_SIZE;
    let raw = bytes
        .get(start..start + PHDR_SIZE)
        .ok_or_else(|| Error::TruncatedElf {
            path: path.to_path_buf(),
        })?;
    Ok(Phdr {
        p_offset: LittleEndian::read_u32(&raw[4..8]),
        p_vaddr: LittleEndian::read_u32(&raw[8..12]),
        p_filesz: LittleEndian::read_u32(&raw[16..20]),
    })
}

fn align_to(n: u32, to: u32) -> u32 {
    (n + to - 1) / to * to
}

/// Reads `elf_path` and writes the corresponding bootable image to
/// `bin_path`, per §4.G's layout: common header, entry point, extended
/// header (with the ESP32-S2 override), one load_addr+size+payload block per
/// segment, 16-byte alignment pad, and a trailing checksum byte.
pub fn elf_to_image(elf_path: &Path, bin_path: &Path, chip_id: u32, verbose: bool) -> Result<()> {
    let elf_bytes = std::fs::read(elf_path).map_err(|source| Error::Io {
        path: elf_path.to_path_buf(),
        source,
    })?;
    let ehdr = parse_ehdr(elf_path, &elf_bytes)?;

    let mut out = Vec::new();
    out.push(0xe9);
    out.push(ehdr.e_phnum as u8);
    out.push(0);
    out.push(0);
    out.extend_from_slice(&ehdr.e_entry.to_le_bytes());

    // extended header: magic, 3 reserved, chip_id byte, 11 reserved.
    let mut extended = [0xeeu8, 0, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
    if chip_id == 0x0000_07c6 {
        extended[0] = 0x00;
        extended[4] = 2;
    }
    out.extend_from_slice(&extended);

    if verbose {
        info!(
            "{}: {} segments found",
            elf_path.display(),
            ehdr.e_phnum
        );
    }

    let mut cs = 0xefu8;
    for i in 0..ehdr.e_phnum {
        let phdr = parse_phdr(elf_path, &elf_bytes, &ehdr, i)?;
        let aligned_size = align_to(phdr.p_filesz, 4);
        if verbose {
            info!("  addr {:#x} size {}", phdr.p_vaddr, aligned_size);
        }
        out.extend_from_slice(&phdr.p_vaddr.to_le_bytes());
        out.extend_from_slice(&aligned_size.to_le_bytes());

        let start = phdr.p_offset as usize;
        let end = start + phdr.p_filesz as usize;
        let segment = elf_bytes
            .get(start..end)
            .ok_or_else(|| Error::TruncatedElf {
                path: elf_path.to_path_buf(),
            })?;
        out.extend_from_slice(segment);
        out.extend(std::iter::repeat(0u8).take((aligned_size - phdr.p_filesz) as usize));
        cs = segment.iter().fold(cs, |acc, &b| acc ^ b);
    }

    let aligned_len = align_to(out.len() as u32 + 1, 16) as usize;
    out.extend(std::iter::repeat(0u8).take(aligned_len - out.len() - 1));
    out.push(cs);

    std::fs::write(bin_path, &out).map_err(|source| Error::Io {
        path: bin_path.to_path_buf(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn build_elf(phnum: u16, leading_empty_phdr: bool, segments: &[(u32, &[u8])]) -> Vec<u8> {
        let phdrs_start = EHDR_SIZE as u32;
        let mut ehdr = vec![0u8; EHDR_SIZE];
        ehdr[4] = 1;
        LittleEndian::write_u32(&mut ehdr[24..28], 0x4008_0400); // entry
        LittleEndian::write_u32(&mut ehdr[28..32], phdrs_start);
        LittleEndian::write_u16(&mut ehdr[44..46], phnum);

        let total_phdrs = phnum as usize + if leading_empty_phdr { 1 } else { 0 };
        let mut phdrs = vec![0u8; total_phdrs * PHDR_SIZE];
        let data_start = phdrs_start as usize + phdrs.len();
        let mut data = Vec::new();

        let mut idx = 0;
        if leading_empty_phdr {
            idx += 1; // p_filesz stays 0
        }
        for (vaddr, payload) in segments {
            let offset = data_start + data.len();
            let base = idx * PHDR_SIZE;
            LittleEndian::write_u32(&mut phdrs[base + 4..base + 8], offset as u32);
            LittleEndian::write_u32(&mut phdrs[base + 8..base + 12], *vaddr);
            LittleEndian::write_u32(&mut phdrs[base + 16..base + 20], payload.len() as u32);
            data.extend_from_slice(payload);
            idx += 1;
        }

        let mut elf = ehdr;
        elf.extend_from_slice(&phdrs);
        elf.extend_from_slice(&data);
        elf
    }

    #[test]
    fn image_starts_with_common_and_extended_header() {
        let dir = tempfile::tempdir().unwrap();
        let elf_path = dir.path().join("a.elf");
        let bin_path = dir.path().join("a.bin");
        std::fs::write(&elf_path, build_elf(1, false, &[(0x4008_0000, &[1, 2, 3, 4])])).unwrap();

        elf_to_image(&elf_path, &bin_path, 0x00f0_1d83, false).unwrap();
        let out = std::fs::read(&bin_path).unwrap();

        assert_eq!(out[0], 0xe9);
        assert_eq!(out[1], 1); // num_segments
        assert_eq!(&out[4..8], &0x4008_0400u32.to_le_bytes());
        assert_eq!(out[8], 0xee); // extended header magic, non-S2 chip
    }

    #[test]
    fn esp32_s2_overrides_extended_header_magic() {
        let dir = tempfile::tempdir().unwrap();
        let elf_path = dir.path().join("a.elf");
        let bin_path = dir.path().join("a.bin");
        std::fs::write(&elf_path, build_elf(1, false, &[(0x4008_0000, &[1, 2])])).unwrap();

        elf_to_image(&elf_path, &bin_path, 0x0000_07c6, false).unwrap();
        let out = std::fs::read(&bin_path).unwrap();
        assert_eq!(out[8], 0x00);
        assert_eq!(out[12], 2);
    }

    #[test]
    fn leading_empty_phdr_shifts_segment_indices() {
        let dir = tempfile::tempdir().unwrap();
        let elf_path = dir.path().join("a.elf");
        let bin_path = dir.path().join("a.bin");
        std::fs::write(
            &elf_path,
            build_elf(1, true, &[(0x3ffb_0000, &[0xaa, 0xbb, 0xcc])]),
        )
        .unwrap();

        elf_to_image(&elf_path, &bin_path, 0x00f0_1d83, false).unwrap();
        let out = std::fs::read(&bin_path).unwrap();

        let header_len = 4 + 4 + 16;
        let load_addr = LittleEndian::read_u32(&out[header_len..header_len + 4]);
        assert_eq!(load_addr, 0x3ffb_0000);
    }

    #[test]
    fn segment_payload_is_4_byte_aligned_and_zero_padded() {
        let dir = tempfile::tempdir().unwrap();
        let elf_path = dir.path().join("a.elf");
        let bin_path = dir.path().join("a.bin");
        std::fs::write(&elf_path, build_elf(1, false, &[(0x1000, &[1, 2, 3])])).unwrap();

        elf_to_image(&elf_path, &bin_path, 0x00f0_1d83, false).unwrap();
        let out = std::fs::read(&bin_path).unwrap();

        let header_len = 4 + 4 + 16;
        let aligned_size = LittleEndian::read_u32(&out[header_len + 4..header_len + 8]);
        assert_eq!(aligned_size, 4);
        let payload = &out[header_len + 8..header_len + 8 + 4];
        assert_eq!(payload, &[1, 2, 3, 0]);
    }

    #[test]
    fn rejects_non_elf32_little_endian_input() {
        let dir = tempfile::tempdir().unwrap();
        let elf_path = dir.path().join("a.elf");
        let bin_path = dir.path().join("a.bin");
        let mut bogus = vec![0u8; EHDR_SIZE];
        bogus[4] = 2; // ELFCLASS64
        std::fs::write(&elf_path, &bogus).unwrap();

        assert!(elf_to_image(&elf_path, &bin_path, 0, false).is_err());
    }
}
