// Copyright 2020, 2021 Adam Greig
// Licensed under the Apache-2.0 and MIT licenses.

use std::{fs::File, io::{self, BufRead, BufReader}};
use clap::{Command, Arg, ArgAction, crate_description, crate_version};
use clap_num::{maybe_hex, si_number};
use anyhow::{bail, Context};

use dapengine::{Engine, Settings, SimTarget, Protocol, DAPInfoID};
use dapengine::command::capability;

fn main() -> anyhow::Result<()> {
    let matches = Command::new("dapengine")
        .version(crate_version!())
        .about(crate_description!())
        .subcommand_required(true)
        .arg_required_else_help(true)
        .propagate_version(true)
        .infer_subcommands(true)
        .arg(Arg::new("quiet")
             .help("Suppress informative output and raise log level to errors only")
             .long("quiet")
             .short('q')
             .action(ArgAction::SetTrue)
             .global(true))
        .arg(Arg::new("verbose")
             .help("Increase log level, specify once for info, twice for debug, three times for trace")
             .long("verbose")
             .short('v')
             .action(ArgAction::Count)
             .conflicts_with("quiet")
             .global(true))
        .arg(Arg::new("jtag")
             .help("Advertise JTAG support in addition to SWD")
             .long("jtag")
             .action(ArgAction::SetTrue)
             .global(true))
        .arg(Arg::new("default-port")
             .help("Port used when the host connects with the default port")
             .long("default-port")
             .action(ArgAction::Set)
             .value_parser(["swd", "jtag"])
             .default_value("swd")
             .global(true))
        .arg(Arg::new("packet-size")
             .help("Maximum packet size reported to the host (decimal, or hex with 0x prefix)")
             .long("packet-size")
             .action(ArgAction::Set)
             .value_parser(maybe_hex::<u16>)
             .global(true))
        .arg(Arg::new("base-clock")
             .help("Debug port base clock in Hz (k and M suffixes allowed)")
             .long("base-clock")
             .action(ArgAction::Set)
             .default_value("48M")
             .value_parser(si_number::<u32>)
             .global(true))
        .arg(Arg::new("capabilities")
             .help("Override the capability byte (decimal, or hex with 0x prefix)")
             .long("capabilities")
             .action(ArgAction::Set)
             .value_parser(maybe_hex::<u8>)
             .global(true))
        .subcommand(Command::new("info")
            .about("Query every DAP_Info field from a simulated probe"))
        .subcommand(Command::new("run")
            .about("Run hex-encoded command packets through a simulated probe")
            .arg(Arg::new("file")
                 .help("File of packets, one per line, or - for stdin"))
            .arg(Arg::new("expect")
                 .help("Check responses written after `=>` on each line")
                 .long("expect")
                 .short('e')
                 .action(ArgAction::SetTrue)))
        .get_matches();

    let quiet = matches.get_flag("quiet");
    let verbose = matches.get_count("verbose");
    let env = if quiet {
        env_logger::Env::default().default_filter_or("error")
    } else if verbose == 0 {
        env_logger::Env::default().default_filter_or("warn")
    } else if verbose == 1 {
        env_logger::Env::default().default_filter_or("info")
    } else if verbose == 2 {
        env_logger::Env::default().default_filter_or("debug")
    } else {
        env_logger::Env::default().default_filter_or("trace")
    };
    env_logger::Builder::from_env(env).format_timestamp(None).init();

    let mut settings = Settings::default();
    if matches.get_flag("jtag") {
        settings.capabilities |= capability::JTAG;
    }
    if matches.get_one::<String>("default-port").map(String::as_str) == Some("jtag") {
        settings.default_port = Protocol::Jtag;
    }
    if let Some(&size) = matches.get_one::<u16>("packet-size") {
        settings.max_packet_size = size;
    }
    if let Some(&base_clock) = matches.get_one::<u32>("base-clock") {
        settings.base_clock = base_clock;
    }
    if let Some(&capabilities) = matches.get_one::<u8>("capabilities") {
        settings.capabilities = capabilities;
    }

    let mut engine = Engine::new(SimTarget::new(), settings);

    match matches.subcommand() {
        Some(("info", _)) => print_info(&mut engine)?,
        Some(("run", matches)) => {
            let expect = matches.get_flag("expect");
            let reader: Box<dyn BufRead> = match matches.get_one::<String>("file").map(String::as_str) {
                None | Some("-") => Box::new(BufReader::new(io::stdin())),
                Some(path) => Box::new(BufReader::new(
                    File::open(path).with_context(|| format!("Opening {}", path))?)),
            };
            let failures = run_packets(&mut engine, reader, expect, quiet)?;
            if failures > 0 {
                bail!("{} responses did not match", failures);
            }
        },
        _ => bail!("Unknown subcommand"),
    }

    Ok(())
}

fn print_info(engine: &mut Engine<SimTarget>) -> anyhow::Result<()> {
    let ids = [
        ("Vendor ID", DAPInfoID::VendorID),
        ("Product ID", DAPInfoID::ProductID),
        ("Serial number", DAPInfoID::SerialNumber),
        ("Firmware version", DAPInfoID::FirmwareVersion),
        ("Target vendor", DAPInfoID::TargetVendor),
        ("Target name", DAPInfoID::TargetName),
        ("Capabilities", DAPInfoID::Capabilities),
        ("Test domain timer", DAPInfoID::TestDomainTimer),
        ("SWO trace buffer size", DAPInfoID::SWOTraceBufferSize),
        ("Max packet count", DAPInfoID::MaxPacketCount),
        ("Max packet size", DAPInfoID::MaxPacketSize),
    ];

    for (name, id) in ids.iter() {
        let response = engine.process(&[0x00, u8::from(*id)])?;
        let payload = match response.get(2..) {
            Some(payload) if response.len() == 2 + response[1] as usize => payload,
            _ => bail!("Malformed response to {:?}: {:02X?}", id, response),
        };
        match id {
            DAPInfoID::FirmwareVersion => {
                println!("{}: {}", name, String::from_utf8_lossy(payload));
            },
            DAPInfoID::Capabilities => {
                let caps = payload.first().copied().unwrap_or(0);
                println!("{}: 0x{:02X} (SWD: {}, JTAG: {})", name, caps,
                         caps & capability::SWD != 0, caps & capability::JTAG != 0);
            },
            _ if payload.is_empty() => println!("{}: (none)", name),
            _ => {
                let mut value = [0u8; 4];
                value[..payload.len().min(4)].copy_from_slice(&payload[..payload.len().min(4)]);
                println!("{}: {}", name, u32::from_le_bytes(value));
            },
        }
    }

    Ok(())
}

/// Parse whitespace-separated hex bytes.
fn parse_hex(text: &str) -> anyhow::Result<Vec<u8>> {
    text.split_whitespace()
        .map(|b| u8::from_str_radix(b.trim_start_matches("0x"), 16)
                  .with_context(|| format!("Invalid hex byte '{}'", b)))
        .collect()
}

fn format_hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(" ")
}

/// Run each line of `reader` as one packet, returning the number of mismatches.
fn run_packets<R: BufRead>(engine: &mut Engine<SimTarget>, reader: R, expect: bool, quiet: bool)
    -> anyhow::Result<usize>
{
    let mut failures = 0;
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let mut parts = line.splitn(2, "=>");
        let packet = parse_hex(parts.next().unwrap_or(""))
            .with_context(|| format!("Line {}", lineno + 1))?;
        let expected = match parts.next() {
            Some(text) if expect => Some(parse_hex(text).with_context(|| format!("Line {}", lineno + 1))?),
            _ => None,
        };

        let response = engine.process(&packet)?;
        if !quiet {
            println!(">>> {}", format_hex(&packet));
            println!("<<< {}", format_hex(&response));
        }

        if let Some(expected) = expected {
            if response != expected {
                log::error!("Line {}: expected {}, got {}",
                            lineno + 1, format_hex(&expected), format_hex(&response));
                failures += 1;
            }
        }
    }
    Ok(failures)
}

#[test]
fn test_parse_hex() {
    assert_eq!(parse_hex("00 0x04 ff").unwrap(), vec![0x00, 0x04, 0xFF]);
    assert!(parse_hex("00 zz").is_err());
    assert_eq!(format_hex(&[0x0A, 0xFF]), "0a ff");
}

#[test]
fn test_demo_vectors() {
    let mut engine = Engine::new(SimTarget::new(), Settings::default());
    let vectors = include_str!("../demos/vectors.txt");
    assert_eq!(run_packets(&mut engine, vectors.as_bytes(), true, true).unwrap(), 0);
}
