// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

use std::io::stdout;
use std::io::Write;

use colored::*;
use structopt::*;
use tabwriter::TabWriter;

use aal::DevId;
use asic::device;

use crate::Console;

#[derive(Debug, StructOpt)]
/// Inspect and manage the registered devices.
pub enum Device {
    #[structopt(about = "list registered devices")]
    List,
    #[structopt(about = "display a device's software state")]
    Show {
        dev: DevId,
        #[structopt(long)]
        json: bool,
    },
    #[structopt(about = "register a simulated device")]
    Add { dev: DevId },
    #[structopt(about = "unregister a device, deleting its snapshots")]
    Remove { dev: DevId },
}

fn device_list(console: &Console) -> anyhow::Result<()> {
    let mut tw = TabWriter::new(stdout());
    writeln!(
        tw,
        "{}\t{}\t{}\t{}\t{}",
        "Dev".underline(),
        "Family".underline(),
        "Pipes".underline(),
        "Stages".underline(),
        "Snapshots".underline(),
    )?;
    for dev in device::devices_list(&console.hdl) {
        let view = device::device_view(&console.hdl, dev)?;
        writeln!(
            tw,
            "{}\t{}\t{:?}\t{}\t{}",
            view.dev,
            view.family,
            view.pipes,
            view.stages,
            view.snapshots.len(),
        )?;
    }
    tw.flush()?;
    Ok(())
}

fn device_show(
    console: &Console,
    dev: DevId,
    json: bool,
) -> anyhow::Result<()> {
    let view = device::device_view(&console.hdl, dev)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }
    println!("device:         {}", view.dev);
    println!("family:         {}", view.family);
    println!("physical pipes: {:?}", view.pipes);
    println!("stages:         {}", view.stages);
    println!("error ints:     {}", view.err_int_mode);
    let snaps: Vec<String> =
        view.snapshots.iter().map(|s| s.to_string()).collect();
    println!("snapshots:      {}", snaps.join(" "));
    let configured = view.counters.iter().filter(|c| c.is_some()).count();
    println!("counters set:   {configured}");
    Ok(())
}

pub async fn device_cmd(console: &Console, cmd: Device) -> anyhow::Result<()> {
    match cmd {
        Device::List => device_list(console)?,
        Device::Show { dev, json } => device_show(console, dev, json)?,
        Device::Add { dev } => device::device_add(&console.hdl, dev)?,
        Device::Remove { dev } => {
            device::device_remove(&console.hdl, dev).await?
        }
    }
    Ok(())
}
