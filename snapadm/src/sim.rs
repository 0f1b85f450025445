// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

use std::time::Duration;

use anyhow::anyhow;
use structopt::*;

use aal::ChipFamily;
use aal::DevId;
use aal::Direction;
use asic::chip::Block;
use asic::device;
use asic::sim;
use asic::sim::SimAsic;
use asic::sim::SimDevice;

use crate::parse_u128;
use crate::parse_u32;
use crate::Console;

// A "name=value" pair describing one field of a simulated packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketField {
    name: String,
    value: u128,
}

impl std::str::FromStr for PacketField {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((name, value)) = s.split_once('=') else {
            anyhow::bail!("expected name=value, found: {s}");
        };
        Ok(PacketField {
            name: name.to_string(),
            value: parse_u128(value)?,
        })
    }
}

#[derive(Debug, StructOpt)]
/// Drive the register simulator.  Pipes are logical pipe ids, translated to
/// the device's physical pipes.
#[structopt(verbatim_doc_comment)]
pub enum Sim {
    #[structopt(about = "fire a stage's trigger unconditionally")]
    Fire {
        dev: DevId,
        pipe: u32,
        stage: u8,
        dir: Direction,
    },
    #[structopt(about = "present a packet to a stage's trigger compare")]
    Packet {
        dev: DevId,
        pipe: u32,
        stage: u8,
        dir: Direction,
        /// field=value pairs
        fields: Vec<PacketField>,
    },
    #[structopt(about = "fill a stage's capture registers with a pattern")]
    Fill {
        dev: DevId,
        pipe: u32,
        stage: u8,
        #[structopt(parse(try_from_str = parse_u32))]
        seed: u32,
    },
    #[structopt(about = "latch datapath error bits and interrupt")]
    Error {
        dev: DevId,
        pipe: u32,
        stage: u8,
        #[structopt(parse(try_from_str = parse_u32))]
        bits: u32,
    },
    #[structopt(about = "fail the next reads of a register block")]
    FailReads {
        dev: DevId,
        pipe: u32,
        stage: u8,
        block: Block,
        count: u32,
        #[structopt(long, default_value = "ingress")]
        dir: Direction,
    },
    #[structopt(about = "fail the next writes to a register block")]
    FailWrites {
        dev: DevId,
        pipe: u32,
        stage: u8,
        block: Block,
        count: u32,
        #[structopt(long, default_value = "ingress")]
        dir: Direction,
    },
    #[structopt(about = "set the probability that any register read fails")]
    Chaos { value: f64 },
    #[structopt(about = "delay every register completion")]
    Latency {
        /// microseconds, 0 for none
        usec: u64,
    },
    #[structopt(about = "drop interrupts instead of delivering them")]
    SuppressIrqs {
        #[structopt(long)]
        off: bool,
    },
    #[structopt(about = "add a simulated device and register it")]
    AddDevice {
        dev: DevId,
        family: ChipFamily,
        #[structopt(long)]
        stages: Option<u8>,
    },
    #[structopt(about = "list the trigger fields the simulator knows")]
    Fields,
    #[structopt(about = "display register access counts")]
    Stats,
}

fn sim_packet(
    console: &Console,
    dev: DevId,
    pipe: u32,
    stage: u8,
    dir: Direction,
    fields: &[PacketField],
) -> anyhow::Result<()> {
    let family = device::device_view(&console.hdl, dev)?.family;
    let values: Vec<(&str, u128)> =
        fields.iter().map(|f| (f.name.as_str(), f.value)).collect();
    let key = SimAsic::key(family, stage, &values);
    let phys = console.physical_pipe(dev, pipe)?;
    let fired = console.sim.inject(dev, phys, stage, dir, &key);
    println!("{}", if fired { "fired" } else { "no match" });
    Ok(())
}

pub async fn sim_cmd(console: &Console, cmd: Sim) -> anyhow::Result<()> {
    let sim = &console.sim;
    match cmd {
        Sim::Fire {
            dev,
            pipe,
            stage,
            dir,
        } => {
            let phys = console.physical_pipe(dev, pipe)?;
            if !sim.fire(dev, phys, stage, dir) {
                return Err(anyhow!("stage {stage} is not armed"));
            }
        }
        Sim::Packet {
            dev,
            pipe,
            stage,
            dir,
            fields,
        } => sim_packet(console, dev, pipe, stage, dir, &fields)?,
        Sim::Fill {
            dev,
            pipe,
            stage,
            seed,
        } => {
            let phys = console.physical_pipe(dev, pipe)?;
            sim.fill_capture(dev, phys, stage, seed)?
        }
        Sim::Error {
            dev,
            pipe,
            stage,
            bits,
        } => {
            let phys = console.physical_pipe(dev, pipe)?;
            sim.raise_error(dev, phys, stage, bits)?
        }
        Sim::FailReads {
            dev,
            pipe,
            stage,
            block,
            count,
            dir,
        } => {
            let phys = console.physical_pipe(dev, pipe)?;
            sim.fail_reads(sim.target(dev, phys, stage, block, dir)?, count)
        }
        Sim::FailWrites {
            dev,
            pipe,
            stage,
            block,
            count,
            dir,
        } => {
            let phys = console.physical_pipe(dev, pipe)?;
            sim.fail_writes(sim.target(dev, phys, stage, block, dir)?, count)
        }
        Sim::Chaos { value } => sim.set_read_chaos(value)?,
        Sim::Latency { usec } => sim.set_latency(match usec {
            0 => None,
            us => Some(Duration::from_micros(us)),
        }),
        Sim::SuppressIrqs { off } => sim.suppress_irqs(!off),
        Sim::AddDevice {
            dev,
            family,
            stages,
        } => {
            sim.add_device(&SimDevice {
                stages,
                ..SimDevice::new(dev, family)
            })?;
            if let Err(e) = device::device_add(&console.hdl, dev) {
                sim.remove_device(dev)?;
                return Err(e.into());
            }
        }
        Sim::Fields => {
            for name in sim::field_names() {
                println!("{name}");
            }
        }
        Sim::Stats => {
            println!("reads:  {}", sim.read_count());
            println!("writes: {}", sim.write_count());
        }
    }
    Ok(())
}
