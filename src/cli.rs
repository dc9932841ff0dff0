// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! CLI surface (§4.J): argument parsing and subcommand dispatch.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use log::info;

use crate::chip;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::flash::{self, PinSpec};
use crate::hexfile;
use crate::image;
use crate::protocol::Opcode;
use crate::session::Session;
use crate::transport::hard_reset;

fn global_args() -> Vec<Arg<'static, 'static>> {
    vec![
        Arg::with_name("baud").short("b").takes_value(true).help("target baud rate"),
        Arg::with_name("port").short("p").takes_value(true).help("serial device"),
        Arg::with_name("chip").long("chip").takes_value(true).help("pre-pin chip descriptor"),
        Arg::with_name("fp").long("fp").takes_value(true).help("flash-params override"),
        Arg::with_name("fspi").long("fspi").takes_value(true).help("SPI pin spec a,b,c,e,d"),
        Arg::with_name("udp").long("udp").takes_value(true).help("UDP relay port"),
        Arg::with_name("tmp").long("tmp").takes_value(true).help("temp dir for unhex"),
        Arg::with_name("v").short("v").help("verbose hexdumps"),
    ]
}

/// Builds the full `clap` app: global options plus one subcommand per
/// entry in §6's command table.
pub fn build_app() -> App<'static, 'static> {
    App::new("romflash")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Host-side flashing and diagnostic tool for ROM-bootloader microcontrollers")
        .setting(AppSettings::ArgRequiredElseHelp)
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .args(&global_args())
        .subcommand(SubCommand::with_name("info").about("connect and print chip info"))
        .subcommand(SubCommand::with_name("monitor").about("relay loop until interrupted"))
        .subcommand(
            SubCommand::with_name("readmem")
                .about("dump a register range to stdout")
                .arg(Arg::with_name("addr").required(true))
                .arg(Arg::with_name("size").required(true)),
        )
        .subcommand(
            SubCommand::with_name("readflash")
                .about("dump a flash range to stdout")
                .arg(Arg::with_name("addr").required(true))
                .arg(Arg::with_name("size").required(true)),
        )
        .subcommand(
            SubCommand::with_name("flash")
                .about("write one or more files to flash, or a .hex image")
                .arg(Arg::with_name("args").multiple(true).required(true)),
        )
        .subcommand(
            SubCommand::with_name("mkbin")
                .about("convert an ELF32 image to a bootable binary image")
                .arg(Arg::with_name("elf").required(true))
                .arg(Arg::with_name("bin").required(true)),
        )
        .subcommand(
            SubCommand::with_name("mkhex")
                .about("encode ADDR/FILE pairs as Intel HEX on stdout")
                .arg(Arg::with_name("args").multiple(true).required(true)),
        )
        .subcommand(
            SubCommand::with_name("unhex")
                .about("split a HEX file into per-address binaries")
                .arg(Arg::with_name("hex").required(true)),
        )
}

fn parse_u32(s: &str, what: &str) -> Result<u32> {
    let s = s.trim();
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        s.parse::<u32>()
    };
    parsed.map_err(|_| Error::InvalidPinSpec {
        spec: s.to_string(),
        reason: format!("{what} must be a decimal or 0x-prefixed hex number"),
    })
}

/// Resolves [`Config`] from parsed global flags, then dispatches to the
/// matched subcommand (§4.J).
pub fn dispatch(matches: &ArgMatches) -> Result<()> {
    let config = Config::resolve(
        matches.value_of("port"),
        matches.value_of("baud"),
        matches.value_of("chip"),
        matches.value_of("fp"),
        matches.value_of("fspi"),
        matches.value_of("udp"),
        matches.value_of("tmp"),
        matches.is_present("v"),
    )?;
    crate::logging::init(config.verbose);

    match matches.subcommand() {
        ("mkbin", Some(sub)) => run_mkbin(sub, &config),
        ("mkhex", Some(sub)) => run_mkhex(sub),
        ("unhex", Some(sub)) => run_unhex(sub, &config),
        ("info", Some(_)) => run_info(&config),
        ("monitor", Some(_)) => run_monitor(&config),
        ("readmem", Some(sub)) => run_readmem(sub, &config),
        ("readflash", Some(sub)) => run_readflash(sub, &config),
        ("flash", Some(sub)) => run_flash(sub, &config),
        _ => unreachable!("clap guarantees a subcommand is present"),
    }
}

fn run_mkbin(sub: &ArgMatches, config: &Config) -> Result<()> {
    let elf_path = Path::new(sub.value_of("elf").unwrap());
    let bin_path = Path::new(sub.value_of("bin").unwrap());
    let chip_id = config.chip_override.map(|c| c.id).unwrap_or(0);
    image::elf_to_image(elf_path, bin_path, chip_id, config.verbose)
}

fn run_mkhex(sub: &ArgMatches) -> Result<()> {
    let args: Vec<&str> = sub.values_of("args").unwrap().collect();
    if args.len() % 2 != 0 {
        return Err(Error::InvalidPinSpec {
            spec: args.join(" "),
            reason: "mkhex takes ADDR FILE pairs".to_string(),
        });
    }
    let mut files = Vec::new();
    for pair in args.chunks(2) {
        let addr = parse_u32(pair[0], "mkhex address")?;
        let data = std::fs::read(pair[1]).map_err(|source| Error::Io {
            path: pair[1].into(),
            source,
        })?;
        files.push((addr, data));
    }
    let text = hexfile::encode(&files);
    std::io::stdout().write_all(text.as_bytes()).map_err(Error::SerialIo)
}

fn run_unhex(sub: &ArgMatches, config: &Config) -> Result<()> {
    let hex_path = Path::new(sub.value_of("hex").unwrap());
    hexfile::unhex_to_dir(hex_path, &config.tmp_dir)?;
    Ok(())
}

fn run_info(config: &Config) -> Result<()> {
    let mut session = Session::open(config)?;
    let descriptor = session.connect()?;
    println!("Chip ID: {:#x} ({})", descriptor.id, descriptor.name);

    if let Some(regs) = descriptor.info_registers {
        let mac0 = session.link.read_register(regs.efuse_mac_lo)?;
        let mac1 = session.link.read_register(regs.efuse_mac_hi)?;
        println!("MAC: {}", chip::format_mac(mac0, mac1));

        let clkdiv = session.link.read_register(regs.uart_clkdiv)?;
        let xtal = chip::estimate_xtal_mhz(config.baud, clkdiv, descriptor.xtal_divisor);
        println!("Detected xtal freq: {xtal:.2}MHz");
    }

    hard_reset(session.link.serial_mut())
}

fn run_monitor(config: &Config) -> Result<()> {
    let mut session = Session::open(config)?;
    session.connect()?;
    if config.baud != 115200 {
        session.link.serial_mut().set_baud(config.baud)?;
    }
    session.cancel.install_ctrlc_handler();
    crate::monitor::run(session.link.serial_mut(), &session.cancel, Some(config.udp_port))
}

fn run_readmem(sub: &ArgMatches, config: &Config) -> Result<()> {
    let base = parse_u32(sub.value_of("addr").unwrap(), "readmem address")?;
    let size = parse_u32(sub.value_of("size").unwrap(), "readmem size")?;

    let mut session = Session::open(config)?;
    session.connect()?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut offset = 0u32;
    while offset < size {
        let value = session.link.read_register(base + offset)?;
        let mut bytes = [0u8; 4];
        LittleEndian::write_u32(&mut bytes, value);
        out.write_all(&bytes).map_err(Error::SerialIo)?;
        offset += 4;
    }
    hard_reset(session.link.serial_mut())
}

fn run_readflash(sub: &ArgMatches, config: &Config) -> Result<()> {
    let base = parse_u32(sub.value_of("addr").unwrap(), "readflash address")?;
    let size = parse_u32(sub.value_of("size").unwrap(), "readflash size")?;

    let mut session = Session::open(config)?;
    let chip = session.connect()?;
    if !chip.supports_readflash {
        return Err(Error::ReadflashUnsupported);
    }
    flash::spi_attach(&mut session.link, config.flash_spi)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut offset = 0u32;
    while offset < size {
        let chunk = (size - offset).min(64);
        let mut body = [0u8; 8];
        LittleEndian::write_u32(&mut body[0..4], base + offset);
        LittleEndian::write_u32(&mut body[4..8], chunk);
        let frame = session
            .link
            .send_checked(Opcode::ReadFlashSlow, &body, 0, Duration::from_millis(500))?;
        out.write_all(&frame[8..8 + chunk as usize]).map_err(Error::SerialIo)?;
        offset += chunk;
    }
    hard_reset(session.link.serial_mut())
}

fn run_flash(sub: &ArgMatches, config: &Config) -> Result<()> {
    let args: Vec<&str> = sub.values_of("args").unwrap().collect();

    let mut session = Session::open(config)?;
    let descriptor = session.connect()?;
    flash::maybe_change_baud(&mut session.link, config.baud)?;

    if descriptor.id != chip::ESP8266.id {
        flash::spi_attach(&mut session.link, config.flash_spi)?;
    }

    let flash_params =
        flash::resolve_flash_params(&mut session.link, &descriptor, config.flash_params_override)?;

    if args.len() == 1 && args[0].ends_with(".hex") {
        let hex_path = Path::new(args[0]);
        let files = hexfile::unhex_to_dir(hex_path, &config.tmp_dir)?;
        for path in files {
            let addr = parse_addr_from_stem(&path)?;
            info!("flashing {} @ {addr:#x}", path.display());
            flash::flash_file(&mut session.link, &descriptor, flash_params, addr, &path)?;
        }
    } else {
        if args.len() % 2 != 0 {
            return Err(Error::InvalidPinSpec {
                spec: args.join(" "),
                reason: "flash takes ADDR FILE pairs, or a single .hex file".to_string(),
            });
        }
        for pair in args.chunks(2) {
            let addr = parse_u32(pair[0], "flash address")?;
            flash::flash_file(&mut session.link, &descriptor, flash_params, addr, Path::new(pair[1]))?;
        }
    }

    flash::flash_end_and_reset(&mut session.link)
}

fn parse_addr_from_stem(path: &Path) -> Result<u32> {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("0");
    parse_u32(stem, "unhexed segment filename")
}
