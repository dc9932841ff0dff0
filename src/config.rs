// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Configuration resolution (ambient, §3/§4.J): CLI flag, then environment
//! variable, then built-in default, for every overridable field.

use std::path::PathBuf;

use crate::chip::ChipDescriptor;
use crate::error::{Error, Result};
use crate::flash::PinSpec;

/// Platform-appropriate placeholder serial device, used only when neither a
/// `-p` flag nor a `PORT` environment variable is given.
#[cfg(target_os = "windows")]
const DEFAULT_PORT: &str = "COM99";
#[cfg(target_os = "macos")]
const DEFAULT_PORT: &str = "/dev/cu.usbmodem";
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const DEFAULT_PORT: &str = "/dev/ttyUSB0";

const DEFAULT_BAUD: u32 = 115200;
const DEFAULT_TMP_DIR: &str = "tmp";
const DEFAULT_UDP_PORT: u16 = 1999;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: String,
    pub baud: u32,
    pub chip_override: Option<ChipDescriptor>,
    pub flash_params_override: Option<u16>,
    pub flash_spi: Option<PinSpec>,
    pub udp_port: u16,
    pub tmp_dir: PathBuf,
    pub verbose: bool,
}

/// One resolved field: an explicit CLI value wins, then the named
/// environment variable, then `default`.
fn resolve(flag: Option<&str>, env_var: &str) -> Option<String> {
    flag.map(str::to_string)
        .or_else(|| std::env::var(env_var).ok())
}

impl Config {
    /// Builds a [`Config`] from parsed CLI flags, falling back to
    /// environment variables and then hardcoded defaults (§4.J).
    pub fn resolve(
        port: Option<&str>,
        baud: Option<&str>,
        chip: Option<&str>,
        flash_params: Option<&str>,
        flash_spi: Option<&str>,
        udp_port: Option<&str>,
        tmp_dir: Option<&str>,
        verbose: bool,
    ) -> Result<Self> {
        let port = resolve(port, "PORT").unwrap_or_else(|| DEFAULT_PORT.to_string());

        let baud = match resolve(baud, "BAUD") {
            Some(s) => s.parse::<u32>().map_err(|_| Error::InvalidFlashParams {
                spec: s.clone(),
                reason: "not a valid baud rate".to_string(),
            })?,
            None => DEFAULT_BAUD,
        };

        let chip_override = match chip {
            Some(name) => Some(
                crate::chip::by_name(name).ok_or_else(|| Error::InvalidPinSpec {
                    spec: name.to_string(),
                    reason: "unrecognized -chip name".to_string(),
                })?,
            ),
            None => None,
        };

        let flash_params_override = match resolve(flash_params, "FLASH_PARAMS") {
            Some(s) => Some(parse_flash_params(&s)?),
            None => None,
        };

        let flash_spi = match resolve(flash_spi, "FLASH_SPI") {
            Some(s) => Some(PinSpec::parse(&s)?),
            None => None,
        };

        let udp_port = match resolve(udp_port, "UDP_PORT") {
            Some(s) => s.parse::<u16>().map_err(|_| Error::InvalidFlashParams {
                spec: s.clone(),
                reason: "not a valid UDP port".to_string(),
            })?,
            None => DEFAULT_UDP_PORT,
        };

        let tmp_dir = resolve(tmp_dir, "TMP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TMP_DIR));

        let verbose = verbose || std::env::var("V").is_ok();

        Ok(Self {
            port,
            baud,
            chip_override,
            flash_params_override,
            flash_spi,
            udp_port,
            tmp_dir,
            verbose,
        })
    }
}

/// Parses a `-fp`/`FLASH_PARAMS` value, given as hex (`0x...`) or decimal.
fn parse_flash_params(s: &str) -> Result<u16> {
    let trimmed = s.trim();
    let parsed = if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        u16::from_str_radix(hex, 16)
    } else {
        trimmed.parse::<u16>()
    };
    parsed.map_err(|_| Error::InvalidFlashParams {
        spec: s.to_string(),
        reason: "not a valid 16-bit flash-params value".to_string(),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cli_flag_wins_over_environment_and_default() {
        std::env::remove_var("BAUD");
        let config = Config::resolve(
            Some("/dev/ttyACM0"),
            Some("921600"),
            None,
            None,
            None,
            None,
            None,
            false,
        )
        .unwrap();
        assert_eq!(config.port, "/dev/ttyACM0");
        assert_eq!(config.baud, 921600);
    }

    #[test]
    fn falls_back_to_default_port_when_nothing_set() {
        std::env::remove_var("PORT");
        let config =
            Config::resolve(None, None, None, None, None, None, None, false).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.baud, DEFAULT_BAUD);
        assert_eq!(config.udp_port, DEFAULT_UDP_PORT);
    }

    #[test]
    fn parses_hex_flash_params() {
        assert_eq!(parse_flash_params("0x0220").unwrap(), 0x0220);
        assert_eq!(parse_flash_params("544").unwrap(), 544);
    }

    #[test]
    fn rejects_unknown_chip_name() {
        assert!(Config::resolve(
            None,
            None,
            Some("not-a-real-chip"),
            None,
            None,
            None,
            None,
            false
        )
        .is_err());
    }
}
