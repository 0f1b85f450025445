// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

use std::io::stdout;
use std::io::Write;

use anyhow::Context;
use colored::*;
use structopt::*;
use tabwriter::TabWriter;

use aal::AsicError;
use aal::DevId;
use aal::Direction;
use aal::PipeScope;
use asic::snapshot;
use asic::snapshot::capture::StageTriggers;
use asic::snapshot::Captured;
use asic::snapshot::IngressMode;
use asic::snapshot::PipeCapture;
use asic::snapshot::SnapshotHdl;
use asic::snapshot::SnapshotSettings;

use crate::Console;
use crate::HexBytes;

#[derive(Debug, StructOpt)]
/// Manage pipeline snapshots.  Pipes are logical pipe ids, or "all".
#[structopt(verbatim_doc_comment)]
pub enum Snapshot {
    #[structopt(about = "create a snapshot over a range of stages")]
    Create {
        dev: DevId,
        pipe: PipeScope,
        start_stage: u8,
        end_stage: u8,
        dir: Direction,
    },
    #[structopt(about = "delete a snapshot")]
    Delete { snap: SnapshotHdl },
    #[structopt(about = "add or replace a trigger field")]
    Trigger {
        snap: SnapshotHdl,
        field: String,
        /// value to match, in hex
        value: HexBytes,
        /// bits of the value that must match, in hex
        mask: HexBytes,
    },
    #[structopt(about = "remove every trigger field")]
    ClearTriggers { snap: SnapshotHdl },
    #[structopt(about = "arm a snapshot")]
    Enable {
        snap: SnapshotHdl,
        #[structopt(short, long, default_value = "0")]
        /// watchdog timeout in microseconds, 0 for none
        timeout: u32,
    },
    #[structopt(about = "disarm a snapshot")]
    Disable { snap: SnapshotHdl },
    #[structopt(about = "write every setting of a snapshot at once")]
    Set {
        snap: SnapshotHdl,
        #[structopt(long)]
        enabled: bool,
        #[structopt(long, default_value = "0")]
        timeout: u32,
        #[structopt(long, default_value = "ingress_only")]
        ingress_mode: IngressMode,
    },
    #[structopt(about = "choose which ingress threads trigger")]
    IngressMode { snap: SnapshotHdl, mode: IngressMode },
    #[structopt(about = "report a snapshot's state")]
    State { snap: SnapshotHdl },
    #[structopt(about = "report a snapshot's configuration")]
    Config { snap: SnapshotHdl },
    #[structopt(about = "display captured data")]
    Capture {
        snap: SnapshotHdl,
        #[structopt(short, long)]
        /// only display this logical pipe
        pipe: Option<u32>,
        #[structopt(long)]
        json: bool,
    },
    #[structopt(about = "list snapshots")]
    List {
        #[structopt(short, long)]
        dev: Option<DevId>,
    },
    #[structopt(about = "dump a snapshot as json")]
    Dump {
        snap: SnapshotHdl,
        #[structopt(possible_values = &["state", "config", "capture"])]
        what: String,
        #[structopt(short, long, default_value = "0")]
        pipe: u32,
    },
}

fn triggers_str(t: &StageTriggers) -> String {
    let causes: Vec<&str> = [
        (t.local, "local"),
        (t.prev_stage, "prev"),
        (t.timer, "timer"),
    ]
    .iter()
    .filter(|(set, _)| *set)
    .map(|(_, name)| *name)
    .collect();
    if causes.is_empty() {
        "none".to_string()
    } else {
        causes.join(",")
    }
}

fn captured<T>(c: &Captured<T>, f: impl Fn(&T) -> String) -> String {
    match c {
        Captured::Valid(v) => f(v),
        Captured::Missing => "missing".red().to_string(),
        Captured::Absent => "-".to_string(),
    }
}

fn hex<T: std::fmt::LowerHex>(v: &T) -> String {
    format!("{v:#x}")
}

fn display_pipe(pipe: &PipeCapture) -> anyhow::Result<()> {
    println!("pipe {}", pipe.pipe);
    let mut tw = TabWriter::new(stdout());
    writeln!(
        tw,
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
        "Stage".underline(),
        "Trigger".underline(),
        "Datapath".underline(),
        "Table Hit".underline(),
        "Gateway".underline(),
        "Next Table".underline(),
        "Pred".underline(),
        "Errors".underline(),
        "PHV".underline(),
    )?;
    for s in &pipe.stages {
        let phv = captured(&s.phv, |p| {
            let state = if p.all_valid() { "ok" } else { "partial" };
            format!("{} {state}", p.containers())
        });
        writeln!(
            tw,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            s.stage,
            captured(&s.triggers, triggers_str),
            captured(&s.datapath_capture, hex),
            captured(&s.logical_table_hit, hex),
            captured(&s.gateway_table_hit, hex),
            captured(&s.next_table_out, hex),
            captured(&s.next_table_pred, hex),
            captured(&s.error_bitmap, hex),
            phv,
        )?;
    }
    tw.flush()?;
    let long_branch = captured(&pipe.long_branch, |lb| {
        format!("lookup {:?} terminate {}", lb.lookup, lb.terminate)
    });
    println!("long branch: {long_branch}");
    Ok(())
}

async fn snapshot_capture(
    console: &Console,
    snap: SnapshotHdl,
    pipe: Option<u32>,
    json: bool,
) -> anyhow::Result<()> {
    let data = snapshot::snapshot_capture(&console.hdl, snap)
        .await
        .context("failed to fetch capture")?;
    let pipes: Vec<&PipeCapture> = match pipe {
        Some(p) => vec![data.pipe(p).ok_or_else(|| {
            AsicError::Missing(format!("pipe {p} in capture"))
        })?],
        None => data.pipes.iter().collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&pipes)?);
        return Ok(());
    }
    println!(
        "{} captured on pipe {} stage {}{} at {}",
        data.family,
        data.trigger.pipe,
        data.trigger.stage,
        if data.trigger.forced { " (forced)" } else { "" },
        data.captured_at,
    );
    for p in pipes {
        display_pipe(p)?;
    }
    Ok(())
}

async fn snapshot_state(
    console: &Console,
    snap: SnapshotHdl,
) -> anyhow::Result<()> {
    let status = snapshot::snapshot_state_get(&console.hdl, snap).await?;
    let mut tw = TabWriter::new(stdout());
    writeln!(
        tw,
        "{}\t{}\t{}\t{}\t{}",
        "Snapshot".underline(),
        "State".underline(),
        "Enabled".underline(),
        "Timeout".underline(),
        "Trigger".underline(),
    )?;
    let trigger = match status.trigger {
        Some(t) if t.forced => format!("{}/{} (forced)", t.pipe, t.stage),
        Some(t) => format!("{}/{}", t.pipe, t.stage),
        None => "-".to_string(),
    };
    writeln!(
        tw,
        "{}\t{}\t{}\t{}\t{}",
        status.snapshot,
        status.state,
        status.enabled,
        status.timeout_usec,
        trigger,
    )?;
    tw.flush()?;
    Ok(())
}

async fn snapshot_config(
    console: &Console,
    snap: SnapshotHdl,
) -> anyhow::Result<()> {
    let view = snapshot::snapshot_config_get(&console.hdl, snap).await?;
    let cfg = &view.cfg;
    println!("snapshot:     {}", view.snapshot);
    println!("device:       {}", cfg.dev);
    println!("pipe:         {}", cfg.pipe);
    println!("stages:       {}-{}", cfg.start_stage, cfg.end_stage);
    println!("direction:    {}", cfg.dir);
    println!("enabled:      {}", cfg.enabled);
    println!("timeout:      {}us", cfg.timeout_usec);
    println!("ingress mode: {}", cfg.ingress_mode);
    if view.triggers.is_empty() {
        return Ok(());
    }

    let mut tw = TabWriter::new(stdout());
    writeln!(
        tw,
        "{}\t{}\t{}\t{}",
        "Field".underline(),
        "Value".underline(),
        "Mask".underline(),
        "Width".underline(),
    )?;
    for t in &view.triggers {
        writeln!(tw, "{}\t{}\t{}\t{}", t.name, t.value, t.mask, t.width)?;
    }
    tw.flush()?;
    Ok(())
}

// Render a dump, growing the buffer until it fits.
async fn snapshot_dump(
    console: &Console,
    snap: SnapshotHdl,
    what: &str,
    pipe: u32,
) -> anyhow::Result<()> {
    let hdl = &console.hdl;
    let mut buf = vec![0u8; 256];
    loop {
        let res = match what {
            "state" => snapshot::snapshot_state_dump(hdl, snap, &mut buf).await,
            "config" => snapshot::snapshot_cfg_dump(hdl, snap, &mut buf).await,
            _ => {
                snapshot::snapshot_capture_dump(hdl, snap, pipe, &mut buf)
                    .await
            }
        };
        match res {
            Ok(len) => {
                println!("{}", String::from_utf8_lossy(&buf[..len]));
                return Ok(());
            }
            Err(AsicError::BufferTooSmall { needed }) => buf.resize(needed, 0),
            Err(e) => return Err(e.into()),
        }
    }
}

async fn snapshot_disable(
    console: &Console,
    snap: SnapshotHdl,
) -> anyhow::Result<()> {
    let settings = snapshot::snapshot_cfg_get(&console.hdl, snap).await?;
    snapshot::snapshot_state_set(
        &console.hdl,
        snap,
        false,
        settings.timeout_usec,
    )
    .await
    .context("failed to disable snapshot")
}

pub async fn snapshot_cmd(
    console: &Console,
    cmd: Snapshot,
) -> anyhow::Result<()> {
    let hdl = &console.hdl;
    match cmd {
        Snapshot::Create {
            dev,
            pipe,
            start_stage,
            end_stage,
            dir,
        } => {
            let snap = snapshot::snapshot_create(
                hdl,
                dev,
                pipe,
                start_stage,
                end_stage,
                dir,
            )?;
            println!("{snap}");
        }
        Snapshot::Delete { snap } => {
            snapshot::snapshot_delete(hdl, snap).await?
        }
        Snapshot::Trigger {
            snap,
            field,
            value,
            mask,
        } => {
            snapshot::snapshot_trigger_add(hdl, snap, &field, &value.0, &mask.0)
                .await
                .with_context(|| format!("failed to add trigger {field}"))?
        }
        Snapshot::ClearTriggers { snap } => {
            snapshot::snapshot_triggers_clear(hdl, snap).await?
        }
        Snapshot::Enable { snap, timeout } => {
            snapshot::snapshot_state_set(hdl, snap, true, timeout)
                .await
                .context("failed to enable snapshot")?
        }
        Snapshot::Disable { snap } => snapshot_disable(console, snap).await?,
        Snapshot::Set {
            snap,
            enabled,
            timeout,
            ingress_mode,
        } => {
            let settings = SnapshotSettings {
                enabled,
                timeout_usec: timeout,
                ingress_mode,
            };
            snapshot::snapshot_cfg_set(hdl, snap, settings).await?
        }
        Snapshot::IngressMode { snap, mode } => {
            snapshot::snapshot_ingress_mode_set(hdl, snap, mode).await?
        }
        Snapshot::State { snap } => snapshot_state(console, snap).await?,
        Snapshot::Config { snap } => snapshot_config(console, snap).await?,
        Snapshot::Capture { snap, pipe, json } => {
            snapshot_capture(console, snap, pipe, json).await?
        }
        Snapshot::List { dev } => {
            for snap in snapshot::snapshot_handles_get(hdl, dev)? {
                println!("{snap}");
            }
        }
        Snapshot::Dump { snap, what, pipe } => {
            snapshot_dump(console, snap, &what, pipe).await?
        }
    }
    Ok(())
}
