// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Per-logical-table debug counters.
//!
//! Each logical table in each stage has a counter that can be pointed at one
//! kind of lookup event.  The hardware encodes "count nothing" as zero, which
//! is also what an unprogrammed register holds, so the type programmed into
//! each counter is tracked in the device shadow: a counter nobody has
//! configured reports no type at all rather than `Disabled`.

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use slog::debug;

use aal::AsicError;
use aal::AsicResult;
use aal::DevId;
use aal::PipeScope;
use aal::RegTarget;

use crate::chip::Block;
use crate::chip::LOGICAL_TABLES;
use crate::device;
use crate::device::Device;
use crate::regio;
use crate::Handle;

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Deserialize,
    Serialize,
    JsonSchema,
    strum::EnumString,
    strum::Display,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum DbgCounterType {
    Disabled,
    TableMiss,
    TableHit,
    GatewayMiss,
    GatewayHit,
    GatewayInhibit,
}

impl DbgCounterType {
    pub fn as_raw(self) -> u32 {
        match self {
            DbgCounterType::Disabled => 0,
            DbgCounterType::TableMiss => 1,
            DbgCounterType::TableHit => 2,
            DbgCounterType::GatewayMiss => 3,
            DbgCounterType::GatewayHit => 4,
            DbgCounterType::GatewayInhibit => 5,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, JsonSchema)]
pub struct DbgCounter {
    pub pipe: u32,
    pub stage: u8,
    pub table: u8,
    /// `None` until the counter has been configured.
    pub kind: Option<DbgCounterType>,
    pub value: u32,
}

fn check_table(table: u8) -> AsicResult<()> {
    if table as usize >= LOGICAL_TABLES {
        return Err(AsicError::InvalidArg(format!(
            "logical table {table} out of range"
        )));
    }
    Ok(())
}

// Every counter register selected by the arguments.
fn targets(
    device: &Device,
    scope: PipeScope,
    stage: u8,
    table: u8,
    block: Block,
) -> AsicResult<Vec<(u32, RegTarget)>> {
    check_table(table)?;
    device.check_stage(stage)?;
    device
        .pipes_in(scope)?
        .into_iter()
        .map(|pipe| {
            let base = device.resolve(pipe, stage, block)?;
            Ok((pipe, base.offset(table as usize)))
        })
        .collect()
}

/// Choose what a counter counts, on one pipe or all of them.
pub async fn dbg_counter_type_set(
    hdl: &Handle,
    dev: DevId,
    scope: PipeScope,
    stage: u8,
    table: u8,
    kind: DbgCounterType,
) -> AsicResult<()> {
    let device = device::get(hdl, dev)?;
    let targets = targets(&device, scope, stage, table, Block::DbgCounterCtl)?;
    let writes = targets
        .iter()
        .map(|(_, target)| (*target, vec![kind.as_raw()]))
        .collect();
    regio::write_all(hdl, writes).await?;

    let mut shadow = device.shadow();
    for (pipe, _) in targets {
        shadow.counter_set(pipe, stage, table, kind);
    }
    debug!(hdl.log, "debug counter type set";
        "dev" => dev,
        "pipe" => %scope,
        "stage" => stage,
        "table" => table,
        "kind" => %kind);
    Ok(())
}

pub async fn dbg_counter_get(
    hdl: &Handle,
    dev: DevId,
    pipe: u32,
    stage: u8,
    table: u8,
) -> AsicResult<DbgCounter> {
    let device = device::get(hdl, dev)?;
    let (_, target) = targets(
        &device,
        PipeScope::Pipe(pipe),
        stage,
        table,
        Block::DbgCounterValue,
    )?
    .remove(0);
    let value = regio::read(hdl, target, 1).await?[0];
    let kind = device.shadow().counter(pipe, stage, table);
    Ok(DbgCounter {
        pipe,
        stage,
        table,
        kind,
        value,
    })
}

/// Every counter of one stage.
pub async fn dbg_counter_stage_get(
    hdl: &Handle,
    dev: DevId,
    pipe: u32,
    stage: u8,
) -> AsicResult<Vec<DbgCounter>> {
    let device = device::get(hdl, dev)?;
    let target = device.resolve(pipe, stage, Block::DbgCounterValue)?;
    let values = regio::read(hdl, target, LOGICAL_TABLES).await?;
    let shadow = device.shadow();
    Ok(values
        .into_iter()
        .enumerate()
        .map(|(table, value)| DbgCounter {
            pipe,
            stage,
            table: table as u8,
            kind: shadow.counter(pipe, stage, table as u8),
            value,
        })
        .collect())
}

/// Zero a counter, on one pipe or all of them.  Its type is unchanged.
pub async fn dbg_counter_clear(
    hdl: &Handle,
    dev: DevId,
    scope: PipeScope,
    stage: u8,
    table: u8,
) -> AsicResult<()> {
    let device = device::get(hdl, dev)?;
    let writes = targets(&device, scope, stage, table, Block::DbgCounterValue)?
        .into_iter()
        .map(|(_, target)| (target, vec![0]))
        .collect();
    regio::write_all(hdl, writes).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_raw_encoding() {
        assert_eq!(DbgCounterType::Disabled.as_raw(), 0);
        let raw: Vec<u32> =
            DbgCounterType::iter().map(|t| t.as_raw()).collect();
        assert_eq!(raw, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            "table_hit".parse::<DbgCounterType>().unwrap(),
            DbgCounterType::TableHit
        );
        assert_eq!(
            "Gateway_Inhibit".parse::<DbgCounterType>().unwrap(),
            DbgCounterType::GatewayInhibit
        );
        assert!("hit".parse::<DbgCounterType>().is_err());
    }

    #[test]
    fn test_table_range() {
        assert!(check_table(15).is_ok());
        assert!(check_table(16).is_err());
    }
}
