// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! An interactive console for the pipeline snapshot subsystem.
//!
//! snapadm runs the subsystem in-process against the register simulator and
//! reads one command per line from stdin.  It is meant for exercising the
//! snapshot lifecycle by hand, and for scripting end-to-end checks.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::anyhow;
use anyhow::Context;
use slog::info;
use structopt::*;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;

use aal::ChipFamily;
use aal::DevId;
use asic::device;
use asic::interrupt;
use asic::sim::SimAsic;
use asic::sim::SimConfig;
use asic::sim::SimDevice;
use asic::AsicConfig;
use asic::Handle;

mod counters;
mod device_cmds;
mod interrupts;
mod sim;
mod snapshot;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "snapadm",
    about = "console for the pipeline snapshot subsystem",
    version = "0.0.1"
)]
struct GlobalOpts {
    #[structopt(
        long,
        short,
        about = "simulator config",
        help = "toml file describing the simulated devices"
    )]
    config: Option<PathBuf>,

    #[structopt(long, about = "snapshot subsystem config")]
    asic_config: Option<PathBuf>,

    #[structopt(long, about = "log file")]
    log_file: Option<String>,

    #[structopt(
        long,
        short = "l",
        default_value = "human",
        about = "log format",
        help = "format logs for 'human' or 'json' consumption"
    )]
    log_format: common::logging::LogFormat,
}

/// One line of console input.
#[derive(Debug, StructOpt)]
#[structopt(name = "snapadm", no_version)]
enum Command {
    #[structopt(visible_alias = "snap")]
    Snapshot(snapshot::Snapshot),
    #[structopt(visible_alias = "ctr")]
    Counter(counters::DbgCounter),
    #[structopt(visible_alias = "int")]
    Interrupt(interrupts::Interrupt),
    #[structopt(visible_alias = "dev")]
    Device(device_cmds::Device),
    Sim(sim::Sim),
    /// Pause for the given number of milliseconds.
    Sleep { ms: u64 },
    /// Leave the console.
    #[structopt(visible_alias = "quit")]
    Exit,
}

/// Everything a console command operates on.
pub struct Console {
    pub hdl: Arc<Handle>,
    pub sim: SimAsic,
}

impl Console {
    /// Translate a logical pipe into the physical pipe the simulator uses.
    pub fn physical_pipe(&self, dev: DevId, pipe: u32) -> anyhow::Result<u32> {
        let view = device::device_view(&self.hdl, dev)?;
        view.pipes
            .get(pipe as usize)
            .copied()
            .ok_or_else(|| anyhow!("device {dev} has no logical pipe {pipe}"))
    }
}

// Parse a hex string into big-endian bytes, as trigger values and masks are
// supplied.
pub fn parse_hex_bytes(s: &str) -> anyhow::Result<Vec<u8>> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return Err(anyhow!("empty hex value"));
    }
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(anyhow!("invalid hex value: {s}"));
    }
    let padded = if digits.len() % 2 == 1 {
        format!("0{digits}")
    } else {
        digits.to_string()
    };
    (0..padded.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&padded[i..i + 2], 16)
                .map_err(|_| anyhow!("invalid hex value: {s}"))
        })
        .collect()
}

/// A trigger value or mask, written in hex and handed on as big-endian bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HexBytes(pub Vec<u8>);

impl FromStr for HexBytes {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex_bytes(s).map(HexBytes)
    }
}

// Accepts either decimal or 0x-prefixed hex.
pub fn parse_u128(s: &str) -> anyhow::Result<u128> {
    match s.strip_prefix("0x") {
        Some(hex) => u128::from_str_radix(hex, 16),
        None => s.parse(),
    }
    .map_err(|_| anyhow!("invalid number: {s}"))
}

pub fn parse_u32(s: &str) -> anyhow::Result<u32> {
    u32::try_from(parse_u128(s)?).map_err(|_| anyhow!("out of range: {s}"))
}

async fn run(console: &Console, cmd: Command) -> anyhow::Result<bool> {
    match cmd {
        Command::Snapshot(s) => snapshot::snapshot_cmd(console, s).await?,
        Command::Counter(c) => counters::counter_cmd(console, c).await?,
        Command::Interrupt(i) => interrupts::interrupt_cmd(console, i).await?,
        Command::Device(d) => device_cmds::device_cmd(console, d).await?,
        Command::Sim(s) => sim::sim_cmd(console, s).await?,
        Command::Sleep { ms } => {
            tokio::time::sleep(std::time::Duration::from_millis(ms)).await
        }
        Command::Exit => return Ok(false),
    }
    Ok(true)
}

fn sim_config(opts: &GlobalOpts) -> anyhow::Result<SimConfig> {
    match &opts.config {
        Some(path) => SimConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(SimConfig {
            device: vec![SimDevice::new(0, ChipFamily::Tofino2)],
            ..Default::default()
        }),
    }
}

fn asic_config(opts: &GlobalOpts) -> anyhow::Result<AsicConfig> {
    match &opts.asic_config {
        Some(path) => AsicConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(AsicConfig::default()),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let opts = GlobalOpts::from_args();
    let log =
        common::logging::init("snapadm", &opts.log_file, opts.log_format)?;

    let sim_config = sim_config(&opts)?;
    let sim = SimAsic::from_config(&log, &sim_config)
        .context("building simulator")?;
    let hdl = Arc::new(
        Handle::new(&log, asic_config(&opts)?, sim.backend())
            .context("building handle")?,
    );
    for dev in &sim_config.device {
        device::device_add(&hdl, dev.id)
            .with_context(|| format!("adding device {}", dev.id))?;
    }
    let _monitor = interrupt::interrupt_monitor_start(&hdl, &sim)
        .context("starting interrupt monitor")?;
    info!(log, "console ready"; "devices" => sim_config.device.len());

    let console = Console { hdl, sim };
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) =
        lines.next_line().await.context("reading console input")?
    {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let tokens = std::iter::once("snapadm").chain(line.split_whitespace());
        let cmd = match Command::from_iter_safe(tokens) {
            Ok(cmd) => cmd,
            Err(e) => {
                println!("{}", e.message);
                continue;
            }
        };
        match run(&console, cmd).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => println!("error: {e:#}"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_bytes() {
        assert_eq!(parse_hex_bytes("0x0042").unwrap(), vec![0x00, 0x42]);
        assert_eq!(parse_hex_bytes("fff").unwrap(), vec![0x0f, 0xff]);
        assert!(parse_hex_bytes("0x").is_err());
        assert!(parse_hex_bytes("0xzz").is_err());
    }

    #[test]
    fn test_parse_numbers() {
        assert_eq!(parse_u128("0x10").unwrap(), 16);
        assert_eq!(parse_u128("10").unwrap(), 10);
        assert_eq!(parse_u32("0xffffffff").unwrap(), u32::MAX);
        assert!(parse_u32("0x100000000").is_err());
    }

    #[test]
    fn test_command_parse() {
        let tokens = "snapadm snap create 0 all 0 3 ingress";
        assert!(Command::from_iter_safe(tokens.split(' ')).is_ok());
        let tokens = ["snapadm", "sleep", "ten"];
        assert!(Command::from_iter_safe(tokens).is_err());
    }
}
