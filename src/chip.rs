// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Chip registry and identification (§4.E).
//!
//! The registry is a small closed table: every chip this tool knows about is
//! listed in [`REGISTRY`], plus a reserved [`UNKNOWN`] descriptor used before
//! detection and as the fallback for the status-tail width (§4.C).

use crate::error::{Error, Result};

/// Width of a response frame's status tail, in bytes. Computed once (at
/// detection or `-chip` override time) and stored on the descriptor so the
/// command layer never has to re-derive it from the chip id per response
/// (see DESIGN.md's "tagged command response parsing" note).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StatusTail {
    /// 2 trailing bytes — the ESP8266 ROM bootloader.
    Short,
    /// 4 trailing bytes — every other chip, including the unknown default.
    Long,
}

impl StatusTail {
    pub fn len(self) -> usize {
        match self {
            StatusTail::Short => 2,
            StatusTail::Long => 4,
        }
    }
}

/// eFuse/UART register offsets needed by the `info` command (§4.E). `None`
/// for chips (ESP8266) that don't expose these through the generic eFuse
/// layout used by the others.
#[derive(Clone, Copy, Debug)]
pub struct InfoRegisters {
    pub efuse_mac_lo: u32,
    pub efuse_mac_hi: u32,
    pub uart_clkdiv: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct ChipDescriptor {
    pub id: u32,
    pub name: &'static str,
    /// Flash offset of the embedded bootloader image header; zero if this
    /// chip's image is not offset from flash base.
    pub bootloader_flash_offset: u32,
    pub status_tail: StatusTail,
    pub info_registers: Option<InfoRegisters>,
    pub xtal_divisor: u32,
    /// `FLASH_BEGIN` (§4.F) carries a fifth trailing 32-bit zero word on
    /// S2/S3/C3/C6-family chips.
    pub flash_begin_has_trailer: bool,
    /// `readflash` (§6) is unsupported on the ESP8266.
    pub supports_readflash: bool,
}

pub const UNKNOWN: ChipDescriptor = ChipDescriptor {
    id: 0,
    name: "unknown",
    bootloader_flash_offset: 0,
    status_tail: StatusTail::Long,
    info_registers: None,
    xtal_divisor: 1,
    flash_begin_has_trailer: false,
    supports_readflash: true,
};

pub const ESP32: ChipDescriptor = ChipDescriptor {
    id: 0x00f0_1d83,
    name: "ESP32",
    bootloader_flash_offset: 0x1000,
    status_tail: StatusTail::Long,
    info_registers: Some(InfoRegisters {
        efuse_mac_lo: 0x3FF5_A000 + 0x04,
        efuse_mac_hi: 0x3FF5_A000 + 0x08,
        uart_clkdiv: 0x3FF4_0014,
    }),
    xtal_divisor: 1,
    flash_begin_has_trailer: false,
    supports_readflash: true,
};

pub const ESP32_S2: ChipDescriptor = ChipDescriptor {
    id: 0x0000_07c6,
    name: "ESP32-S2",
    bootloader_flash_offset: 0x1000,
    status_tail: StatusTail::Long,
    info_registers: Some(InfoRegisters {
        efuse_mac_lo: 0x3F41_A044 + 0x44,
        efuse_mac_hi: 0x3F41_A044 + 0x48,
        uart_clkdiv: 0x3F40_0014,
    }),
    xtal_divisor: 1,
    flash_begin_has_trailer: true,
    supports_readflash: true,
};

pub const ESP32_C3_ECO3: ChipDescriptor = ChipDescriptor {
    id: 0x1b31_506f,
    name: "ESP32-C3-ECO3",
    bootloader_flash_offset: 0x1000,
    status_tail: StatusTail::Long,
    info_registers: Some(InfoRegisters {
        efuse_mac_lo: 0x6000_8800 + 0x44,
        efuse_mac_hi: 0x6000_8800 + 0x48,
        uart_clkdiv: 0x6000_0014,
    }),
    xtal_divisor: 1,
    flash_begin_has_trailer: true,
    supports_readflash: true,
};

pub const ESP32_S3_BETA3: ChipDescriptor = ChipDescriptor {
    id: 0x0000_0009,
    name: "ESP32-S3-BETA3",
    bootloader_flash_offset: 0x1000,
    status_tail: StatusTail::Long,
    info_registers: Some(InfoRegisters {
        efuse_mac_lo: 0x6000_7000 + 0x44,
        efuse_mac_hi: 0x6000_7000 + 0x48,
        uart_clkdiv: 0x6000_0014,
    }),
    xtal_divisor: 1,
    flash_begin_has_trailer: true,
    supports_readflash: true,
};

pub const ESP8266: ChipDescriptor = ChipDescriptor {
    id: 0xfff0_c101,
    name: "ESP8266",
    bootloader_flash_offset: 0,
    status_tail: StatusTail::Short,
    info_registers: None,
    xtal_divisor: 2,
    flash_begin_has_trailer: false,
    supports_readflash: false,
};

/// The closed set of chips this tool recognizes.
pub const REGISTRY: &[ChipDescriptor] = &[
    ESP32,
    ESP32_S2,
    ESP32_C3_ECO3,
    ESP32_S3_BETA3,
    ESP8266,
];

/// Looks a chip up by the 32-bit value read from the ROM identification
/// register (§4.D step "invokes chip detection").
pub fn by_id(id: u32) -> Result<ChipDescriptor> {
    REGISTRY
        .iter()
        .copied()
        .find(|c| c.id == id)
        .ok_or(Error::UnknownChip(id))
}

/// Looks a chip up by its display name, case-insensitively, for the `-chip`
/// override. Matching is on `name` with `-`/`_` treated alike so both
/// `ESP32-S2` and `esp32_s2` work from a shell.
pub fn by_name(name: &str) -> Option<ChipDescriptor> {
    let norm = |s: &str| s.to_ascii_lowercase().replace('_', "-");
    let target = norm(name);
    REGISTRY.iter().copied().find(|c| norm(c.name) == target)
}

/// Formats the 6-byte MAC address from the two eFuse words, per §4.E:
/// `(mac1>>8)&255 : mac1&255 : (mac0>>24)&255 : (mac0>>16)&255 : (mac0>>8)&255 : mac0&255`.
pub fn format_mac(mac0: u32, mac1: u32) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        (mac1 >> 8) & 0xff,
        mac1 & 0xff,
        (mac0 >> 24) & 0xff,
        (mac0 >> 16) & 0xff,
        (mac0 >> 8) & 0xff,
        mac0 & 0xff,
    )
}

/// Estimated crystal frequency in MHz, per §4.E.
pub fn estimate_xtal_mhz(baud: u32, uart_clkdiv: u32, xtal_divisor: u32) -> f64 {
    let divisor = (uart_clkdiv & 0x000F_FFFF) as f64;
    (baud as f64) * divisor / 1_000_000.0 / (xtal_divisor as f64)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn by_id_finds_esp32() {
        let chip = by_id(0x00f0_1d83).expect("esp32 should be known");
        assert_eq!(chip.name, "ESP32");
        assert_eq!(chip.bootloader_flash_offset, 0x1000);
    }

    #[test]
    fn by_id_rejects_unknown() {
        assert!(by_id(0xdead_beef).is_err());
    }

    #[test]
    fn by_name_is_case_insensitive() {
        assert_eq!(by_name("esp32").unwrap().id, ESP32.id);
        assert_eq!(by_name("ESP32-S2").unwrap().id, ESP32_S2.id);
        assert_eq!(by_name("esp32_s2").unwrap().id, ESP32_S2.id);
    }

    #[test]
    fn mac_formatting_matches_spec_formula() {
        // mac0 = 0x11223344, mac1 = 0x0000aabb
        let mac = format_mac(0x1122_3344, 0x0000_aabb);
        assert_eq!(mac, "aa:bb:11:22:33:44");
    }

    #[test]
    fn status_tail_width_is_short_only_for_esp8266() {
        assert_eq!(ESP8266.status_tail.len(), 2);
        assert_eq!(ESP32.status_tail.len(), 4);
        assert_eq!(UNKNOWN.status_tail.len(), 4);
    }
}
