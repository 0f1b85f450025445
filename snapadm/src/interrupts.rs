// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

use std::io::stdout;
use std::io::Write;

use anyhow::anyhow;
use colored::*;
use structopt::*;
use tabwriter::TabWriter;

use aal::DevId;
use aal::Direction;
use asic::event_log;
use asic::interrupt;

use crate::Console;

fn parse_on_off(s: &str) -> anyhow::Result<bool> {
    match s {
        "on" | "enable" | "true" => Ok(true),
        "off" | "disable" | "false" => Ok(false),
        _ => Err(anyhow!("expected 'on' or 'off', found: {s}")),
    }
}

#[derive(Debug, StructOpt)]
/// Interrupt handling and the event log.
pub enum Interrupt {
    #[structopt(about = "turn datapath error interrupts on or off")]
    Mode {
        dev: DevId,
        #[structopt(parse(try_from_str = parse_on_off))]
        enable: bool,
    },
    #[structopt(about = "clear a snapshot slot's interrupt status")]
    Clear {
        dev: DevId,
        pipe: u32,
        stage: u8,
        dir: Direction,
    },
    #[structopt(about = "poll for triggers whose interrupts were lost")]
    Scrub,
    #[structopt(about = "display recent interrupt events")]
    Events {
        #[structopt(
            short,
            long,
            default_value = "-1",
            allow_hyphen_values = true
        )]
        /// most recent events to show, negative for all
        count: i64,
        #[structopt(long)]
        json: bool,
    },
}

fn display_events(
    console: &Console,
    count: i64,
    json: bool,
) -> anyhow::Result<()> {
    let events = event_log::events_get(&console.hdl, count);
    if json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }

    let mut tw = TabWriter::new(stdout());
    writeln!(
        tw,
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
        "Seq".underline(),
        "Kind".underline(),
        "Dev".underline(),
        "Pipe".underline(),
        "Stage".underline(),
        "Dir".underline(),
        "Snapshot".underline(),
        "Detail".underline(),
    )?;
    for e in events {
        writeln!(
            tw,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            e.seq,
            e.kind,
            e.dev,
            e.pipe,
            e.stage,
            e.dir.map(|d| d.to_string()).unwrap_or_else(|| "-".into()),
            e.snapshot
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".into()),
            e.detail,
        )?;
    }
    tw.flush()?;
    Ok(())
}

pub async fn interrupt_cmd(
    console: &Console,
    cmd: Interrupt,
) -> anyhow::Result<()> {
    let hdl = &console.hdl;
    match cmd {
        Interrupt::Mode { dev, enable } => {
            interrupt::interrupt_mode_set(hdl, dev, enable).await?
        }
        Interrupt::Clear {
            dev,
            pipe,
            stage,
            dir,
        } => interrupt::interrupt_clear(hdl, dev, pipe, stage, dir).await?,
        Interrupt::Scrub => {
            let serviced = interrupt::scrub(hdl).await;
            println!("serviced {serviced}");
        }
        Interrupt::Events { count, json } => {
            display_events(console, count, json)?
        }
    }
    Ok(())
}
