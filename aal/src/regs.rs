// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

use std::fmt;

use tokio::sync::mpsc;
use tokio::sync::oneshot;

use crate::AsicResult;
use crate::DevId;
use crate::Direction;

/// The location of a block of 32-bit registers or capture memory: a device,
/// the sub-device (die) within it, and a byte address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegTarget {
    pub dev: DevId,
    pub subdev: u8,
    pub addr: u64,
}

impl RegTarget {
    pub fn new(dev: DevId, subdev: u8, addr: u64) -> Self {
        RegTarget { dev, subdev, addr }
    }

    /// The target `words` 32-bit words further along.
    pub fn offset(&self, words: usize) -> Self {
        RegTarget {
            addr: self.addr + 4 * words as u64,
            ..*self
        }
    }
}

impl fmt::Display for RegTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{}.{}@{:#010x}", self.dev, self.subdev, self.addr)
    }
}

/// Completion of an outstanding block read.  The register engine fulfills it
/// from its own completion context; the requester awaits it with a deadline.
pub type ReadCompletion = oneshot::Receiver<AsicResult<Vec<u32>>>;

/// Completion of an outstanding block write.
pub type WriteCompletion = oneshot::Receiver<AsicResult<()>>;

/// The raw register/DMA engine.  Both calls only queue the request; they
/// never block waiting for the hardware.
pub trait RegisterOps: Send + Sync {
    /// Queue a read of `words` consecutive 32-bit words at `target`.
    fn read(&self, target: RegTarget, words: usize) -> ReadCompletion;

    /// Queue a write of `data` to consecutive words starting at `target`.
    fn write(&self, target: RegTarget, data: Vec<u32>) -> WriteCompletion;
}

/// An interrupt raised by the ASIC.  Pipe numbers are physical.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AsicIrq {
    /// The snapshot logic in a stage triggered and froze its capture
    /// registers.
    Snapshot {
        dev: DevId,
        pipe: u32,
        stage: u8,
        dir: Direction,
    },
    /// A stage detected a datapath error.
    Error { dev: DevId, pipe: u32, stage: u8 },
}

/// Something that can deliver ASIC interrupts.
pub trait InterruptSource {
    /// Register the channel on which all subsequent interrupts should be
    /// delivered, replacing any earlier registration.
    fn register_irq_handler(
        &self,
        tx: mpsc::UnboundedSender<AsicIrq>,
    ) -> AsicResult<()>;
}
