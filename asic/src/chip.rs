// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Per-family register layout.
//!
//! Each Tofino generation places the snapshot control registers and capture
//! memories at different addresses, and each has its own PHV geometry.  A
//! device's `ChipLayout` is chosen once when the device is registered and
//! cached on the device record, so nothing downstream ever switches on the
//! family.

use std::fmt;
use std::sync::Arc;

use aal::AsicError;
use aal::AsicResult;
use aal::ChipFamily;

/// Physical match buses reporting a hit address in each stage.
pub const PHYS_BUS_COUNT: usize = 16;
/// Meter/selector/stateful ALUs in each stage.
pub const ALU_COUNT: usize = 4;
/// Logical tables in each stage.
pub const LOGICAL_TABLES: usize = 16;
/// Entries in the long-branch prediction lookup table.
pub const LB_LOOKUP_ENTRIES: usize = 8;

/// The register blocks and capture memories the snapshot subsystem touches.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::EnumString,
    strum::Display,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Block {
    /// Enable, ingress mode, direction, and match-any bits.
    TriggerCtl,
    /// Trigger key compare value.
    CompareValue,
    /// Trigger key compare mask.
    CompareMask,
    /// Watchdog: timeout in microseconds, then an enable word.
    Timer,
    /// Snapshot status; write-one-to-clear.
    Status,
    /// Datapath error interrupt enable.
    ErrorCtl,
    /// Datapath error status; write-one-to-clear.
    ErrorStatus,
    DatapathCapture,
    LogicalTableHit,
    GatewayTableHit,
    PhysBusHitAddr,
    TableActive,
    NextTable,
    NextTablePred,
    GlobalExec,
    GlobalExecPred,
    LongBranch,
    LongBranchPred,
    AluAddr,
    ErrorBitmap,
    PhvData,
    PhvValid,
    /// Per-pipe long-branch prediction state.  The stage is ignored.
    LongBranchTable,
    DbgCounterCtl,
    DbgCounterValue,
}

impl Block {
    /// Blocks only implemented by families with branch prediction.
    pub fn is_branch_prediction(&self) -> bool {
        matches!(
            self,
            Block::NextTablePred
                | Block::GlobalExecPred
                | Block::LongBranchPred
                | Block::LongBranchTable
        )
    }

    /// Snapshot control blocks exist once per direction.  The egress copy
    /// sits `EGRESS_OFFSET_WORDS` into the block's window.
    pub fn is_directional(&self) -> bool {
        matches!(
            self,
            Block::TriggerCtl
                | Block::CompareValue
                | Block::CompareMask
                | Block::Timer
                | Block::Status
        )
    }

    /// Blocks that live in the per-pipe region rather than in a stage.
    pub fn is_pipe_level(&self) -> bool {
        matches!(self, Block::LongBranchTable)
    }

    // Every block gets a 1KiB window within its stage.
    fn stage_offset(&self) -> u64 {
        (*self as u64) * 0x400
    }
}

/// Offset of the egress copy of a directional block.
pub const EGRESS_OFFSET_WORDS: usize = 0x80;

// Status register bits
pub const STATUS_LOCAL_TRIGGER: u32 = 1 << 0;
pub const STATUS_PREV_STAGE_TRIGGER: u32 = 1 << 1;
pub const STATUS_TIMER_TRIGGER: u32 = 1 << 2;
pub const STATUS_FULL: u32 = 1 << 3;
pub const STATUS_ALL: u32 = STATUS_LOCAL_TRIGGER
    | STATUS_PREV_STAGE_TRIGGER
    | STATUS_TIMER_TRIGGER
    | STATUS_FULL;
/// The bits saying why a stage captured.
pub const STATUS_CAUSES: u32 =
    STATUS_LOCAL_TRIGGER | STATUS_PREV_STAGE_TRIGGER | STATUS_TIMER_TRIGGER;

// TriggerCtl register bits
pub const TRIG_CTL_ENABLE: u32 = 1 << 0;
pub const TRIG_CTL_MODE_SHIFT: u32 = 1;
pub const TRIG_CTL_MATCH_ANY: u32 = 1 << 3;
pub const TRIG_CTL_EGRESS: u32 = 1 << 4;

/// One class of same-width PHV containers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhvClass {
    /// Container width in bits.
    pub width: u32,
    /// Number of containers of this width.
    pub count: usize,
    /// Global container index of the first container.  The validity bitmap
    /// is indexed by global container index.
    pub base: usize,
    /// Word offset of the class within the packed capture memory.
    pub word_offset: usize,
}

impl PhvClass {
    const fn new(
        width: u32,
        count: usize,
        base: usize,
        word_offset: usize,
    ) -> Self {
        PhvClass {
            width,
            count,
            base,
            word_offset,
        }
    }

    /// Containers packed into one 32-bit capture word.
    pub fn per_word(&self) -> usize {
        (32 / self.width) as usize
    }

    /// Capture words occupied by this class.
    pub fn words(&self) -> usize {
        self.count.div_ceil(self.per_word())
    }
}

/// The PHV geometry of one chip family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhvLayout {
    pub c32: PhvClass,
    pub c16: PhvClass,
    pub c8: PhvClass,
}

impl PhvLayout {
    pub fn containers(&self) -> usize {
        self.c32.count + self.c16.count + self.c8.count
    }

    /// Size of the packed data memory.
    pub fn data_words(&self) -> usize {
        self.c32.words() + self.c16.words() + self.c8.words()
    }

    /// Size of the validity bitmap.
    pub fn valid_words(&self) -> usize {
        self.containers().div_ceil(32)
    }
}

/// The physical location of a register block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Location {
    pub subdev: u8,
    pub addr: u64,
}

/// The per-family address-resolution strategy.
pub trait ChipLayout: Send + Sync + fmt::Debug {
    fn family(&self) -> ChipFamily;

    /// Physical pipes on the device, across all sub-devices.
    fn max_pipes(&self) -> u32;

    /// Match-action stages per pipe.
    fn max_stages(&self) -> u8;

    fn phv(&self) -> &PhvLayout;

    /// Size of a stage's trigger key, in 32-bit words.
    fn trigger_key_words(&self) -> usize;

    /// Does the family predict next-table decisions (long branch)?
    fn has_branch_prediction(&self) -> bool;

    /// Does the family run a ghost thread alongside ingress?
    fn has_ghost_threads(&self) -> bool;

    /// Compute the location of `block` in `stage` of physical pipe `pipe`.
    fn resolve(&self, pipe: u32, stage: u8, block: Block)
        -> AsicResult<Location>;

    /// Size of `block` in 32-bit words.
    fn block_words(&self, block: Block) -> usize {
        match block {
            Block::CompareValue | Block::CompareMask => {
                self.trigger_key_words()
            }
            Block::Timer => 2,
            Block::PhysBusHitAddr => PHYS_BUS_COUNT,
            Block::AluAddr => ALU_COUNT,
            Block::PhvData => self.phv().data_words(),
            Block::PhvValid => self.phv().valid_words(),
            Block::LongBranchTable => {
                // Four 8-bit source table ids per word, then the lookup
                // table, then the termination flag.
                (self.max_stages() as usize).div_ceil(4) + LB_LOOKUP_ENTRIES + 1
            }
            Block::DbgCounterCtl | Block::DbgCounterValue => LOGICAL_TABLES,
            _ => 1,
        }
    }
}

fn check_bounds(
    layout: &dyn ChipLayout,
    pipe: u32,
    stage: u8,
    block: Block,
) -> AsicResult<()> {
    if pipe >= layout.max_pipes() {
        return Err(AsicError::InvalidArg(format!(
            "physical pipe {pipe} out of range for {}",
            layout.family()
        )));
    }
    if !block.is_pipe_level() && stage >= layout.max_stages() {
        return Err(AsicError::InvalidArg(format!(
            "stage {stage} out of range for {}",
            layout.family()
        )));
    }
    if block.is_branch_prediction() && !layout.has_branch_prediction() {
        return Err(AsicError::InvalidArg(format!(
            "{block:?} not implemented on {}",
            layout.family()
        )));
    }
    Ok(())
}

const TF1_PHV: PhvLayout = PhvLayout {
    c32: PhvClass::new(32, 64, 0, 0),
    c8: PhvClass::new(8, 64, 64, 64),
    c16: PhvClass::new(16, 96, 128, 80),
};

/// Tofino1: four pipes, twelve stages, no branch prediction.
#[derive(Debug, Default)]
pub struct Tofino1Layout;

impl Tofino1Layout {
    const PIPE_BASE: u64 = 0x0200_0000;
    const PIPE_STRIDE: u64 = 0x0080_0000;
    const STAGE_STRIDE: u64 = 0x0004_0000;
    const PIPE_REGION: u64 = 0x0070_0000;
}

impl ChipLayout for Tofino1Layout {
    fn family(&self) -> ChipFamily {
        ChipFamily::Tofino1
    }

    fn max_pipes(&self) -> u32 {
        4
    }

    fn max_stages(&self) -> u8 {
        12
    }

    fn phv(&self) -> &PhvLayout {
        &TF1_PHV
    }

    fn trigger_key_words(&self) -> usize {
        8
    }

    fn has_branch_prediction(&self) -> bool {
        false
    }

    fn has_ghost_threads(&self) -> bool {
        false
    }

    fn resolve(
        &self,
        pipe: u32,
        stage: u8,
        block: Block,
    ) -> AsicResult<Location> {
        check_bounds(self, pipe, stage, block)?;
        let pipe_base = Self::PIPE_BASE + pipe as u64 * Self::PIPE_STRIDE;
        let addr = if block.is_pipe_level() {
            pipe_base + Self::PIPE_REGION + block.stage_offset()
        } else {
            pipe_base + stage as u64 * Self::STAGE_STRIDE + block.stage_offset()
        };
        Ok(Location { subdev: 0, addr })
    }
}

const TF2_PHV: PhvLayout = PhvLayout {
    c32: PhvClass::new(32, 80, 0, 0),
    c8: PhvClass::new(8, 80, 80, 80),
    c16: PhvClass::new(16, 120, 160, 100),
};

/// Tofino2: four pipes, twenty stages, branch prediction and ghost threads.
#[derive(Debug, Default)]
pub struct Tofino2Layout;

impl Tofino2Layout {
    const PIPE_BASE: u64 = 0x0400_0000;
    const PIPE_STRIDE: u64 = 0x0100_0000;
    const STAGE_STRIDE: u64 = 0x0008_0000;
    const PIPE_REGION: u64 = 0x00f0_0000;
}

impl ChipLayout for Tofino2Layout {
    fn family(&self) -> ChipFamily {
        ChipFamily::Tofino2
    }

    fn max_pipes(&self) -> u32 {
        4
    }

    fn max_stages(&self) -> u8 {
        20
    }

    fn phv(&self) -> &PhvLayout {
        &TF2_PHV
    }

    fn trigger_key_words(&self) -> usize {
        16
    }

    fn has_branch_prediction(&self) -> bool {
        true
    }

    fn has_ghost_threads(&self) -> bool {
        true
    }

    fn resolve(
        &self,
        pipe: u32,
        stage: u8,
        block: Block,
    ) -> AsicResult<Location> {
        check_bounds(self, pipe, stage, block)?;
        let pipe_base = Self::PIPE_BASE + pipe as u64 * Self::PIPE_STRIDE;
        let addr = if block.is_pipe_level() {
            pipe_base + Self::PIPE_REGION + block.stage_offset()
        } else {
            pipe_base + stage as u64 * Self::STAGE_STRIDE + block.stage_offset()
        };
        Ok(Location { subdev: 0, addr })
    }
}

const TF3_PHV: PhvLayout = PhvLayout {
    c32: PhvClass::new(32, 80, 0, 0),
    c16: PhvClass::new(16, 120, 80, 80),
    c8: PhvClass::new(8, 80, 200, 140),
};

/// Tofino3: two dies of four pipes each.  Physical pipes 4-7 are pipes 0-3 of
/// sub-device 1.
#[derive(Debug, Default)]
pub struct Tofino3Layout;

impl Tofino3Layout {
    const PIPES_PER_DIE: u32 = 4;
    const PIPE_BASE: u64 = 0x0400_0000;
    const PIPE_STRIDE: u64 = 0x0100_0000;
    const STAGE_STRIDE: u64 = 0x0008_0000;
    const PIPE_REGION: u64 = 0x00f0_0000;
}

impl ChipLayout for Tofino3Layout {
    fn family(&self) -> ChipFamily {
        ChipFamily::Tofino3
    }

    fn max_pipes(&self) -> u32 {
        2 * Self::PIPES_PER_DIE
    }

    fn max_stages(&self) -> u8 {
        20
    }

    fn phv(&self) -> &PhvLayout {
        &TF3_PHV
    }

    fn trigger_key_words(&self) -> usize {
        16
    }

    fn has_branch_prediction(&self) -> bool {
        true
    }

    fn has_ghost_threads(&self) -> bool {
        true
    }

    fn resolve(
        &self,
        pipe: u32,
        stage: u8,
        block: Block,
    ) -> AsicResult<Location> {
        check_bounds(self, pipe, stage, block)?;
        let subdev = (pipe / Self::PIPES_PER_DIE) as u8;
        let local = (pipe % Self::PIPES_PER_DIE) as u64;
        let pipe_base = Self::PIPE_BASE + local * Self::PIPE_STRIDE;
        let addr = if block.is_pipe_level() {
            pipe_base + Self::PIPE_REGION + block.stage_offset()
        } else {
            pipe_base + stage as u64 * Self::STAGE_STRIDE + block.stage_offset()
        };
        Ok(Location { subdev, addr })
    }
}

/// Select the layout for a family.  This is the only place the family is
/// examined.
pub fn layout_for(family: ChipFamily) -> Arc<dyn ChipLayout> {
    match family {
        ChipFamily::Tofino1 => Arc::new(Tofino1Layout),
        ChipFamily::Tofino2 => Arc::new(Tofino2Layout),
        ChipFamily::Tofino3 => Arc::new(Tofino3Layout),
    }
}
