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
use aal::PipeScope;
use asic::dbg_counter;
use asic::dbg_counter::DbgCounter as Counter;
use asic::dbg_counter::DbgCounterType;

use crate::Console;

#[derive(Debug, StructOpt)]
/// Manage the per-logical-table debug counters.  Each counter can be pointed
/// at one kind of lookup event: table_miss, table_hit, gateway_miss,
/// gateway_hit, gateway_inhibit, or disabled.
#[structopt(verbatim_doc_comment)]
pub enum DbgCounter {
    #[structopt(about = "choose what a counter counts")]
    SetType {
        dev: DevId,
        pipe: PipeScope,
        stage: u8,
        table: u8,
        kind: DbgCounterType,
    },
    #[structopt(about = "display counters")]
    Get {
        dev: DevId,
        pipe: u32,
        stage: u8,
        /// a single logical table, otherwise all of them
        table: Option<u8>,
    },
    #[structopt(about = "zero a counter")]
    Clear {
        dev: DevId,
        pipe: PipeScope,
        stage: u8,
        table: u8,
    },
}

fn display_counters(counters: &[Counter]) -> anyhow::Result<()> {
    let mut tw = TabWriter::new(stdout());
    writeln!(
        tw,
        "{}\t{}\t{}\t{}\t{}",
        "Pipe".underline(),
        "Stage".underline(),
        "Table".underline(),
        "Type".underline(),
        "Value".underline(),
    )?;
    for c in counters {
        let kind = match c.kind {
            Some(kind) => kind.to_string(),
            None => "-".to_string(),
        };
        writeln!(
            tw,
            "{}\t{}\t{}\t{}\t{}",
            c.pipe, c.stage, c.table, kind, c.value
        )?;
    }
    tw.flush()?;
    Ok(())
}

pub async fn counter_cmd(
    console: &Console,
    cmd: DbgCounter,
) -> anyhow::Result<()> {
    let hdl = &console.hdl;
    match cmd {
        DbgCounter::SetType {
            dev,
            pipe,
            stage,
            table,
            kind,
        } => {
            dbg_counter::dbg_counter_type_set(
                hdl, dev, pipe, stage, table, kind,
            )
            .await?
        }
        DbgCounter::Get {
            dev,
            pipe,
            stage,
            table: Some(table),
        } => {
            let c =
                dbg_counter::dbg_counter_get(hdl, dev, pipe, stage, table)
                    .await?;
            display_counters(&[c])?
        }
        DbgCounter::Get {
            dev,
            pipe,
            stage,
            table: None,
        } => {
            let counters =
                dbg_counter::dbg_counter_stage_get(hdl, dev, pipe, stage)
                    .await?;
            display_counters(&counters)?
        }
        DbgCounter::Clear {
            dev,
            pipe,
            stage,
            table,
        } => {
            dbg_counter::dbg_counter_clear(hdl, dev, pipe, stage, table)
                .await?
        }
    }
    Ok(())
}
