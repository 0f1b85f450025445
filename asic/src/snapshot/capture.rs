// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Reading and decoding a triggered snapshot's capture registers.

use std::collections::BTreeMap;

use chrono::DateTime;
use chrono::Utc;
use futures::future::join_all;
use schemars::JsonSchema;
use serde::Serialize;
use slog::debug;
use slog::warn;
use tokio::time::Instant;

use aal::AsicResult;
use aal::ChipFamily;

use super::phv::Phv;
use super::SnapshotCfg;
use crate::chip::Block;
use crate::chip::ALU_COUNT;
use crate::chip::LB_LOOKUP_ENTRIES;
use crate::chip::PHYS_BUS_COUNT;
use crate::chip::STATUS_LOCAL_TRIGGER;
use crate::chip::STATUS_PREV_STAGE_TRIGGER;
use crate::chip::STATUS_TIMER_TRIGGER;
use crate::device::Device;
use crate::regio;
use crate::Handle;

/// A single captured value, along with whether the capture actually
/// produced it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Captured<T> {
    Valid(T),
    /// The register could not be read.
    Missing,
    /// The chip family doesn't implement this register.
    Absent,
}

impl<T> Captured<T> {
    pub fn valid(&self) -> Option<&T> {
        match self {
            Captured::Valid(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Captured::Missing)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Captured<U> {
        match self {
            Captured::Valid(v) => Captured::Valid(f(v)),
            Captured::Missing => Captured::Missing,
            Captured::Absent => Captured::Absent,
        }
    }
}

/// Why a stage captured.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, JsonSchema)]
pub struct StageTriggers {
    /// The stage's own compare matched.
    pub local: bool,
    /// A previous stage triggered and this one followed.
    pub prev_stage: bool,
    /// The watchdog expired.
    pub timer: bool,
}

impl StageTriggers {
    pub fn from_status(status: u32) -> Self {
        StageTriggers {
            local: status & STATUS_LOCAL_TRIGGER != 0,
            prev_stage: status & STATUS_PREV_STAGE_TRIGGER != 0,
            timer: status & STATUS_TIMER_TRIGGER != 0,
        }
    }
}

/// The frozen execution state of one stage of one pipe.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, JsonSchema)]
pub struct StageCapture {
    pub stage: u8,
    pub triggers: Captured<StageTriggers>,
    pub datapath_capture: Captured<u32>,
    pub logical_table_hit: Captured<u16>,
    pub gateway_table_hit: Captured<u16>,
    pub phys_bus_hit_addr: Captured<[u32; PHYS_BUS_COUNT]>,
    pub table_active: Captured<u16>,
    pub next_table_out: Captured<u16>,
    pub next_table_pred: Captured<u16>,
    pub next_table_pred_enabled: Captured<u16>,
    pub global_exec_out: Captured<u16>,
    pub global_exec_pred: Captured<u16>,
    pub long_branch_out: Captured<u8>,
    pub long_branch_pred: Captured<u8>,
    pub alu_addr: Captured<[u32; ALU_COUNT]>,
    pub error_bitmap: Captured<u32>,
    pub phv: Captured<Phv>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, JsonSchema)]
pub struct LongBranchData {
    /// Predicted source table for each stage of the pipe.
    pub src_tables: Box<[u8]>,
    pub lookup: [u8; LB_LOOKUP_ENTRIES],
    pub terminate: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, JsonSchema)]
pub struct PipeCapture {
    /// Logical pipe.
    pub pipe: u32,
    pub stages: Vec<StageCapture>,
    pub long_branch: Captured<LongBranchData>,
}

/// Where, and how, a snapshot was triggered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, JsonSchema)]
pub struct TriggerInfo {
    /// Logical pipe.
    pub pipe: u32,
    pub stage: u8,
    /// Set when the watchdog expired rather than a field matching.
    pub forced: bool,
}

/// Everything read back from a triggered snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, JsonSchema)]
pub struct CaptureData {
    pub family: ChipFamily,
    pub trigger: TriggerInfo,
    pub captured_at: DateTime<Utc>,
    pub pipes: Vec<PipeCapture>,
}

impl CaptureData {
    pub fn pipe(&self, pipe: u32) -> Option<&PipeCapture> {
        self.pipes.iter().find(|p| p.pipe == pipe)
    }

    pub fn stage(&self, pipe: u32, stage: u8) -> Option<&StageCapture> {
        self.pipe(pipe)?.stages.iter().find(|s| s.stage == stage)
    }
}

type ReadKey = (u32, u8, Block);

// The outcome of every read issued for one capture.
struct Reads {
    results: BTreeMap<ReadKey, AsicResult<Vec<u32>>>,
}

impl Reads {
    fn get(&self, pipe: u32, stage: u8, block: Block) -> Captured<&[u32]> {
        match self.results.get(&(pipe, stage, block)) {
            Some(Ok(words)) => Captured::Valid(words.as_slice()),
            Some(Err(_)) => Captured::Missing,
            None => Captured::Absent,
        }
    }

    fn word(&self, pipe: u32, stage: u8, block: Block) -> Captured<u32> {
        self.get(pipe, stage, block).map(|w| w[0])
    }

    fn array<const N: usize>(
        &self,
        pipe: u32,
        stage: u8,
        block: Block,
    ) -> Captured<[u32; N]> {
        match self.get(pipe, stage, block) {
            Captured::Valid(w) => match w.try_into() {
                Ok(a) => Captured::Valid(a),
                Err(_) => Captured::Missing,
            },
            Captured::Missing => Captured::Missing,
            Captured::Absent => Captured::Absent,
        }
    }

    fn failures(&self) -> usize {
        self.results.values().filter(|r| r.is_err()).count()
    }
}

const STAGE_BLOCKS: [Block; 13] = [
    Block::Status,
    Block::DatapathCapture,
    Block::LogicalTableHit,
    Block::GatewayTableHit,
    Block::PhysBusHitAddr,
    Block::TableActive,
    Block::NextTable,
    Block::GlobalExec,
    Block::LongBranch,
    Block::AluAddr,
    Block::ErrorBitmap,
    Block::PhvData,
    Block::PhvValid,
];

const PREDICTION_BLOCKS: [Block; 3] =
    [Block::NextTablePred, Block::GlobalExecPred, Block::LongBranchPred];

// Issue every read for the capture, then wait for all of them against a
// single deadline.
async fn read_all(
    hdl: &Handle,
    device: &Device,
    cfg: &SnapshotCfg,
) -> AsicResult<Reads> {
    let layout = device.layout();
    let mut keys: Vec<ReadKey> = Vec::new();
    for pipe in device.pipes_in(cfg.pipe)? {
        for stage in cfg.start_stage..=cfg.end_stage {
            keys.extend(STAGE_BLOCKS.iter().map(|b| (pipe, stage, *b)));
            if layout.has_branch_prediction() {
                keys.extend(
                    PREDICTION_BLOCKS.iter().map(|b| (pipe, stage, *b)),
                );
            }
        }
        if layout.has_branch_prediction() {
            keys.push((pipe, 0, Block::LongBranchTable));
        }
    }

    let deadline = Instant::now() + hdl.config.read_timeout();
    let mut issued = Vec::with_capacity(keys.len());
    for key in keys {
        let (pipe, stage, block) = key;
        let target = device.resolve_dir(pipe, stage, block, cfg.dir)?;
        let words = device.block_words(block);
        let rx = hdl.regs.read(target, words);
        issued.push(async move {
            (key, regio::wait_read(target, words, rx, deadline).await)
        });
    }

    let results = join_all(issued).await.into_iter().collect();
    Ok(Reads { results })
}

fn low16(w: u32) -> u16 {
    (w & 0xffff) as u16
}

fn decode_stage(
    device: &Device,
    reads: &Reads,
    pipe: u32,
    stage: u8,
) -> StageCapture {
    let family = device.family();
    let phv = match (
        reads.get(pipe, stage, Block::PhvData),
        reads.get(pipe, stage, Block::PhvValid),
    ) {
        (Captured::Valid(data), Captured::Valid(valid)) => {
            match Phv::unpack(family, device.layout().phv(), data, valid) {
                Ok(phv) => Captured::Valid(phv),
                Err(_) => Captured::Missing,
            }
        }
        _ => Captured::Missing,
    };

    let next_pred = reads.word(pipe, stage, Block::NextTablePred);
    StageCapture {
        stage,
        triggers: reads
            .word(pipe, stage, Block::Status)
            .map(StageTriggers::from_status),
        datapath_capture: reads.word(pipe, stage, Block::DatapathCapture),
        logical_table_hit: reads
            .word(pipe, stage, Block::LogicalTableHit)
            .map(low16),
        gateway_table_hit: reads
            .word(pipe, stage, Block::GatewayTableHit)
            .map(low16),
        phys_bus_hit_addr: reads.array(pipe, stage, Block::PhysBusHitAddr),
        table_active: reads.word(pipe, stage, Block::TableActive).map(low16),
        next_table_out: reads.word(pipe, stage, Block::NextTable).map(low16),
        next_table_pred: next_pred.clone().map(low16),
        next_table_pred_enabled: next_pred.map(|w| (w >> 16) as u16),
        global_exec_out: reads.word(pipe, stage, Block::GlobalExec).map(low16),
        global_exec_pred: reads
            .word(pipe, stage, Block::GlobalExecPred)
            .map(low16),
        long_branch_out: reads
            .word(pipe, stage, Block::LongBranch)
            .map(|w| w as u8),
        long_branch_pred: reads
            .word(pipe, stage, Block::LongBranchPred)
            .map(|w| w as u8),
        alu_addr: reads.array(pipe, stage, Block::AluAddr),
        error_bitmap: reads.word(pipe, stage, Block::ErrorBitmap),
        phv,
    }
}

// The long-branch table is the per-stage source tables packed four to a
// word, then one word per lookup entry, then the termination flag.
fn decode_long_branch(
    device: &Device,
    reads: &Reads,
    pipe: u32,
) -> Captured<LongBranchData> {
    let stages = device.layout().max_stages() as usize;
    let src_words = stages.div_ceil(4);
    reads.get(pipe, 0, Block::LongBranchTable).map(|w| {
        let src_tables = (0..stages)
            .map(|s| (w[s / 4] >> ((s % 4) * 8)) as u8)
            .collect();
        let mut lookup = [0u8; LB_LOOKUP_ENTRIES];
        for (i, entry) in lookup.iter_mut().enumerate() {
            *entry = w[src_words + i] as u8;
        }
        LongBranchData {
            src_tables,
            lookup,
            terminate: w[src_words + LB_LOOKUP_ENTRIES] & 1 == 1,
        }
    })
}

/// Read back and decode every stage of every pipe in the snapshot's scope.
/// Registers that can't be read are marked `Missing`; only a failure to
/// resolve the snapshot's own scope is an error.
pub(crate) async fn capture_read(
    hdl: &Handle,
    device: &Device,
    cfg: &SnapshotCfg,
    trigger: TriggerInfo,
) -> AsicResult<CaptureData> {
    let reads = read_all(hdl, device, cfg).await?;

    let failures = reads.failures();
    if failures > 0 {
        warn!(hdl.log, "partial capture";
            "dev" => device.id,
            "failed_reads" => failures,
            "total_reads" => reads.results.len());
        for (key, result) in &reads.results {
            if let Err(e) = result {
                debug!(hdl.log, "capture read failed";
                    "pipe" => key.0,
                    "stage" => key.1,
                    "block" => ?key.2,
                    "error" => %e);
            }
        }
    }

    let pipes = device
        .pipes_in(cfg.pipe)?
        .into_iter()
        .map(|pipe| PipeCapture {
            pipe,
            stages: (cfg.start_stage..=cfg.end_stage)
                .map(|stage| decode_stage(device, &reads, pipe, stage))
                .collect(),
            long_branch: decode_long_branch(device, &reads, pipe),
        })
        .collect();

    Ok(CaptureData {
        family: device.family(),
        trigger,
        captured_at: Utc::now(),
        pipes,
    })
}
