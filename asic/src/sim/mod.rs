// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! A register-level model of the snapshot hardware.
//!
//! `SimAsic` implements every collaborator trait the subsystem needs, so the
//! whole snapshot path can be driven without a switch: writes land in a
//! sparse word-addressed memory, the snapshot status and error status
//! registers are write-one-to-clear, a write to a watchdog timer starts a
//! real tokio timer, and a "packet" matching an armed stage's compare
//! registers latches the status bits and raises an interrupt.
//!
//! All pipe ids taken by the simulator are physical pipes.  Faults can be
//! injected per register, randomly via `Chaos`, or by slowing every
//! completion down.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use serde::Deserialize;
use slog::debug;
use slog::o;
use slog::warn;
use slog::Logger;
use tokio::sync::mpsc;
use tokio::sync::oneshot;

use aal::AsicError;
use aal::AsicIrq;
use aal::AsicResult;
use aal::ChipFamily;
use aal::DevId;
use aal::DeviceInfo;
use aal::Direction;
use aal::FieldDictionary;
use aal::FieldInfo;
use aal::InterruptSource;
use aal::ReadCompletion;
use aal::RegTarget;
use aal::RegisterOps;
use aal::Topology;
use aal::WriteCompletion;

use crate::chip::layout_for;
use crate::chip::Block;
use crate::chip::ChipLayout;
use crate::chip::ALU_COUNT;
use crate::chip::EGRESS_OFFSET_WORDS;
use crate::chip::LB_LOOKUP_ENTRIES;
use crate::chip::PHYS_BUS_COUNT;
use crate::chip::STATUS_ALL;
use crate::chip::STATUS_FULL;
use crate::chip::STATUS_LOCAL_TRIGGER;
use crate::chip::STATUS_PREV_STAGE_TRIGGER;
use crate::chip::STATUS_TIMER_TRIGGER;
use crate::chip::TRIG_CTL_ENABLE;
use crate::chip::TRIG_CTL_MATCH_ANY;
use crate::snapshot::phv::Phv;
use crate::snapshot::phv::PhvContainer;
use crate::snapshot::trigger::normalize_field_name;
use crate::snapshot::trigger::place;
use crate::Backend;

mod chaos;
mod dictionary;

pub use chaos::Chaos;
pub use dictionary::field_names;

/// One simulated device.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SimDevice {
    pub id: DevId,
    pub family: ChipFamily,
    /// Physical pipe for each logical pipe.  Defaults to every pipe of the
    /// family, in order.
    #[serde(default)]
    pub pipes: Option<Vec<u32>>,
    /// Active stages.  Defaults to the family maximum.
    #[serde(default)]
    pub stages: Option<u8>,
}

impl SimDevice {
    pub fn new(id: DevId, family: ChipFamily) -> Self {
        SimDevice {
            id,
            family,
            pipes: None,
            stages: None,
        }
    }

    fn info(&self, layout: &dyn ChipLayout) -> DeviceInfo {
        DeviceInfo {
            family: self.family,
            pipes: self
                .pipes
                .clone()
                .unwrap_or_else(|| (0..layout.max_pipes()).collect()),
            stages: self.stages.unwrap_or(layout.max_stages()),
        }
    }
}

/// The contents of a simulator config file.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SimConfig {
    pub device: Vec<SimDevice>,
    /// Probability that any one register read fails.
    pub read_chaos: f64,
    /// Delay applied to every register completion.
    pub latency_us: u64,
}

impl SimConfig {
    pub fn from_toml(s: &str) -> AsicResult<Self> {
        toml::from_str(s).map_err(|e| AsicError::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> AsicResult<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|err| AsicError::Io {
                ctx: format!("reading {}", path.display()),
                err,
            })?;
        Self::from_toml(&contents)
    }
}

struct SimDev {
    info: DeviceInfo,
    layout: Arc<dyn ChipLayout>,
}

// A register with side effects, and the slot it belongs to.
#[derive(Clone, Copy, Debug)]
struct Reg {
    dev: DevId,
    pipe: u32,
    stage: u8,
    block: Block,
    dir: Direction,
}

// Per-slot registers whose writes have side effects
const SLOT_REGS: [Block; 3] = [Block::TriggerCtl, Block::Timer, Block::Status];

#[derive(Default)]
struct Faults {
    reads: HashMap<RegTarget, u32>,
    writes: HashMap<RegTarget, u32>,
}

fn take_fault(
    faults: &mut HashMap<RegTarget, u32>,
    target: &RegTarget,
) -> bool {
    match faults.get_mut(target) {
        Some(n) if *n > 0 => {
            *n -= 1;
            true
        }
        _ => false,
    }
}

struct Inner {
    log: Logger,
    devices: Mutex<BTreeMap<DevId, SimDev>>,
    mem: Mutex<HashMap<RegTarget, u32>>,
    special: Mutex<HashMap<RegTarget, Reg>>,
    irq_tx: Mutex<Option<mpsc::UnboundedSender<AsicIrq>>>,
    faults: Mutex<Faults>,
    read_chaos: Mutex<Chaos>,
    latency: Mutex<Option<Duration>>,
    irqs_suppressed: AtomicBool,
    // Generation of the most recent write to each watchdog timer
    timers: Mutex<HashMap<RegTarget, u64>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

/// A simulated ASIC.  Clones share the same hardware.
#[derive(Clone)]
pub struct SimAsic {
    inner: Arc<Inner>,
}

impl SimAsic {
    pub fn new(log: &Logger) -> Self {
        SimAsic {
            inner: Arc::new(Inner {
                log: log.new(o!("unit" => "sim")),
                devices: Mutex::new(BTreeMap::new()),
                mem: Mutex::new(HashMap::new()),
                special: Mutex::new(HashMap::new()),
                irq_tx: Mutex::new(None),
                faults: Mutex::new(Faults::default()),
                read_chaos: Mutex::new(Chaos::default()),
                latency: Mutex::new(None),
                irqs_suppressed: AtomicBool::new(false),
                timers: Mutex::new(HashMap::new()),
                reads: AtomicU64::new(0),
                writes: AtomicU64::new(0),
            }),
        }
    }

    pub fn from_config(log: &Logger, config: &SimConfig) -> AsicResult<Self> {
        let sim = SimAsic::new(log);
        for dev in &config.device {
            sim.add_device(dev)?;
        }
        sim.set_read_chaos(config.read_chaos)?;
        if config.latency_us > 0 {
            sim.set_latency(Some(Duration::from_micros(config.latency_us)));
        }
        Ok(sim)
    }

    /// The simulator as the collaborators of a `Handle`.
    pub fn backend(&self) -> Backend {
        Backend {
            regs: Arc::new(self.clone()),
            topology: Arc::new(self.clone()),
            dictionary: Arc::new(self.clone()),
        }
    }

    pub fn add_device(&self, dev: &SimDevice) -> AsicResult<()> {
        let layout = layout_for(dev.family);
        let info = dev.info(layout.as_ref());
        if let Some(p) = info.pipes.iter().find(|p| **p >= layout.max_pipes())
        {
            return Err(AsicError::InvalidArg(format!(
                "physical pipe {p} out of range for {}",
                dev.family
            )));
        }
        if info.stages > layout.max_stages() {
            return Err(AsicError::InvalidArg(format!(
                "{} stages out of range for {}",
                info.stages, dev.family
            )));
        }

        let mut regs = Vec::new();
        for pipe in info.pipes.iter().copied() {
            for stage in 0..info.stages {
                for dir in [Direction::Ingress, Direction::Egress] {
                    for block in SLOT_REGS {
                        let reg = Reg {
                            dev: dev.id,
                            pipe,
                            stage,
                            block,
                            dir,
                        };
                        regs.push((locate(&*layout, reg)?, reg));
                    }
                }
                let reg = Reg {
                    dev: dev.id,
                    pipe,
                    stage,
                    block: Block::ErrorStatus,
                    dir: Direction::Ingress,
                };
                regs.push((locate(&*layout, reg)?, reg));
            }
        }

        let mut devices = self.inner.devices.lock().unwrap();
        if devices.contains_key(&dev.id) {
            return Err(AsicError::InvalidArg(format!(
                "device {} already exists",
                dev.id
            )));
        }
        devices.insert(dev.id, SimDev { info, layout });
        self.inner.special.lock().unwrap().extend(regs);
        debug!(self.inner.log, "added device";
            "dev" => dev.id, "family" => %dev.family);
        Ok(())
    }

    /// Pull a device out of the topology.  Its register contents are kept.
    pub fn remove_device(&self, dev: DevId) -> AsicResult<()> {
        self.inner
            .devices
            .lock()
            .unwrap()
            .remove(&dev)
            .map(|_| ())
            .ok_or_else(|| AsicError::Missing(format!("device {dev}")))
    }

    fn layout(&self, dev: DevId) -> AsicResult<(Arc<dyn ChipLayout>, u8)> {
        self.inner
            .devices
            .lock()
            .unwrap()
            .get(&dev)
            .map(|d| (d.layout.clone(), d.info.stages))
            .ok_or_else(|| AsicError::Missing(format!("device {dev}")))
    }

    /// Locate `block` of physical pipe `pipe`, using the copy for `dir`.
    pub fn target(
        &self,
        dev: DevId,
        pipe: u32,
        stage: u8,
        block: Block,
        dir: Direction,
    ) -> AsicResult<RegTarget> {
        let (layout, _) = self.layout(dev)?;
        locate(
            &*layout,
            Reg {
                dev,
                pipe,
                stage,
                block,
                dir,
            },
        )
    }

    /// Read memory directly, without side effects or fault injection.
    pub fn peek(&self, target: RegTarget, words: usize) -> Vec<u32> {
        let mem = self.inner.mem.lock().unwrap();
        (0..words)
            .map(|i| mem.get(&target.offset(i)).copied().unwrap_or(0))
            .collect()
    }

    /// Write memory directly, without side effects or fault injection.
    pub fn poke(&self, target: RegTarget, data: &[u32]) {
        let mut mem = self.inner.mem.lock().unwrap();
        for (i, w) in data.iter().enumerate() {
            mem.insert(target.offset(i), *w);
        }
    }

    fn word(&self, target: RegTarget) -> u32 {
        self.peek(target, 1)[0]
    }

    fn enabled(
        &self,
        dev: DevId,
        pipe: u32,
        stage: u8,
        dir: Direction,
    ) -> bool {
        self.target(dev, pipe, stage, Block::TriggerCtl, dir)
            .map(|t| self.word(t) & TRIG_CTL_ENABLE != 0)
            .unwrap_or(false)
    }

    /// Deliver a packet that matches any armed trigger to a stage.  Returns
    /// whether the stage's snapshot logic fired.
    pub fn fire(
        &self,
        dev: DevId,
        pipe: u32,
        stage: u8,
        dir: Direction,
    ) -> bool {
        if !self.enabled(dev, pipe, stage, dir) {
            return false;
        }
        self.trigger_at(dev, pipe, stage, dir, STATUS_LOCAL_TRIGGER)
    }

    /// Deliver a packet with trigger key `key` to a stage.  The stage fires
    /// if it is armed and the key matches its compare registers.
    pub fn inject(
        &self,
        dev: DevId,
        pipe: u32,
        stage: u8,
        dir: Direction,
        key: &[u32],
    ) -> bool {
        let Ok((layout, _)) = self.layout(dev) else {
            return false;
        };
        let words = layout.trigger_key_words();
        let reg = |block| self.target(dev, pipe, stage, block, dir);
        let (Ok(ctl), Ok(value), Ok(mask)) = (
            reg(Block::TriggerCtl),
            reg(Block::CompareValue),
            reg(Block::CompareMask),
        ) else {
            return false;
        };

        let ctl = self.word(ctl);
        if ctl & TRIG_CTL_ENABLE == 0 {
            return false;
        }
        let value = self.peek(value, words);
        let mask = self.peek(mask, words);
        let hit = ctl & TRIG_CTL_MATCH_ANY != 0
            || (0..words).all(|i| {
                let k = key.get(i).copied().unwrap_or(0);
                k & mask[i] == value[i] & mask[i]
            });
        hit && self.trigger_at(dev, pipe, stage, dir, STATUS_LOCAL_TRIGGER)
    }

    /// Build the trigger key a packet with the given field values would
    /// present to `stage`.  Fields not in scope at that stage are skipped.
    pub fn key(
        family: ChipFamily,
        stage: u8,
        fields: &[(&str, u128)],
    ) -> Vec<u32> {
        let mut key = vec![0u32; layout_for(family).trigger_key_words()];
        for (name, value) in fields {
            let name = normalize_field_name(name);
            if let Some(info) = dictionary::resolve(family, stage, &name) {
                place(&mut key, info.offset, info.width, *value);
            }
        }
        key
    }

    // Latch `cause` into the status of `stage`, propagate to the enabled
    // stages downstream, and interrupt.
    fn trigger_at(
        &self,
        dev: DevId,
        pipe: u32,
        stage: u8,
        dir: Direction,
        cause: u32,
    ) -> bool {
        let Ok((_, stages)) = self.layout(dev) else {
            return false;
        };
        let mut latch = Vec::new();
        let mut timers = Vec::new();
        for s in 0..stages {
            let bits = if s == stage {
                cause | STATUS_FULL
            } else if s > stage && self.enabled(dev, pipe, s, dir) {
                STATUS_PREV_STAGE_TRIGGER | STATUS_FULL
            } else {
                0
            };
            if let Ok(t) = self.target(dev, pipe, s, Block::Status, dir) {
                if bits != 0 {
                    latch.push((t, bits));
                }
            }
            if let Ok(t) = self.target(dev, pipe, s, Block::Timer, dir) {
                timers.push(t);
            }
        }

        {
            let mut mem = self.inner.mem.lock().unwrap();
            for (t, bits) in latch {
                *mem.entry(t).or_default() |= bits;
            }
        }
        // A snapshot fires once per arming, so stop any pending watchdog.
        {
            let mut gens = self.inner.timers.lock().unwrap();
            for t in timers {
                if let Some(g) = gens.get_mut(&t) {
                    *g += 1;
                }
            }
        }
        debug!(self.inner.log, "snapshot fired";
            "dev" => dev,
            "pipe" => pipe,
            "stage" => stage,
            "dir" => %dir,
            "cause" => cause);
        self.raise(AsicIrq::Snapshot {
            dev,
            pipe,
            stage,
            dir,
        });
        true
    }

    /// Latch datapath error bits in a stage and interrupt.
    pub fn raise_error(
        &self,
        dev: DevId,
        pipe: u32,
        stage: u8,
        bits: u32,
    ) -> AsicResult<()> {
        let t = self.target(
            dev,
            pipe,
            stage,
            Block::ErrorStatus,
            Direction::Ingress,
        )?;
        *self.inner.mem.lock().unwrap().entry(t).or_default() |= bits;
        self.raise(AsicIrq::Error { dev, pipe, stage });
        Ok(())
    }

    fn raise(&self, irq: AsicIrq) {
        if self.inner.irqs_suppressed.load(Ordering::Relaxed) {
            debug!(self.inner.log, "interrupt suppressed"; "irq" => ?irq);
            return;
        }
        if let Some(tx) = self.inner.irq_tx.lock().unwrap().as_ref() {
            let _ = tx.send(irq);
        }
    }

    /// Fill the capture registers of a stage with a pattern derived from
    /// `seed`, with every PHV container valid.
    pub fn fill_capture(
        &self,
        dev: DevId,
        pipe: u32,
        stage: u8,
        seed: u32,
    ) -> AsicResult<()> {
        let (layout, stages) = self.layout(dev)?;
        let dir = Direction::Ingress;
        let t = |block| self.target(dev, pipe, stage, block, dir);

        self.poke(t(Block::DatapathCapture)?, &[0x8000_0000 | seed]);
        self.poke(t(Block::LogicalTableHit)?, &[0x0100 | (seed & 0xff)]);
        self.poke(t(Block::GatewayTableHit)?, &[0x0002]);
        let bus: Vec<u32> =
            (0..PHYS_BUS_COUNT as u32).map(|i| seed << 8 | i).collect();
        self.poke(t(Block::PhysBusHitAddr)?, &bus);
        self.poke(t(Block::TableActive)?, &[0x0105]);
        self.poke(t(Block::NextTable)?, &[0x10 + (seed & 0xff)]);
        self.poke(t(Block::GlobalExec)?, &[0x00ff]);
        self.poke(t(Block::LongBranch)?, &[0x3]);
        let alu: Vec<u32> =
            (0..ALU_COUNT as u32).map(|i| 0x1000 * (i + 1) + seed).collect();
        self.poke(t(Block::AluAddr)?, &alu);
        self.poke(t(Block::ErrorBitmap)?, &[0]);

        let phv = layout.phv();
        let pattern = Phv {
            family: layout.family(),
            c32: (0..phv.c32.count as u32)
                .map(|i| PhvContainer {
                    value: seed << 16 | i,
                    valid: true,
                })
                .collect(),
            c16: (0..phv.c16.count as u32)
                .map(|i| PhvContainer {
                    value: (seed << 8 | i) as u16,
                    valid: true,
                })
                .collect(),
            c8: (0..phv.c8.count as u32)
                .map(|i| PhvContainer {
                    value: seed.wrapping_add(i) as u8,
                    valid: true,
                })
                .collect(),
        };
        let (data, valid) = pattern.pack(phv);
        self.poke(t(Block::PhvData)?, &data);
        self.poke(t(Block::PhvValid)?, &valid);

        if layout.has_branch_prediction() {
            self.poke(t(Block::NextTablePred)?, &[0x0001_0000 | 0x10]);
            self.poke(t(Block::GlobalExecPred)?, &[0x00ff]);
            self.poke(t(Block::LongBranchPred)?, &[0x3]);

            let max = layout.max_stages() as usize;
            let mut table = vec![0u32; max.div_ceil(4) + LB_LOOKUP_ENTRIES + 1];
            for s in 0..stages as usize {
                table[s / 4] |= (s as u32) << ((s % 4) * 8);
            }
            for i in 0..LB_LOOKUP_ENTRIES {
                table[max.div_ceil(4) + i] = i as u32;
            }
            table[max.div_ceil(4) + LB_LOOKUP_ENTRIES] = 1;
            self.poke(t(Block::LongBranchTable)?, &table);
        }
        Ok(())
    }

    /// Fail the next `count` reads of `target`.
    pub fn fail_reads(&self, target: RegTarget, count: u32) {
        self.inner.faults.lock().unwrap().reads.insert(target, count);
    }

    /// Fail the next `count` writes to `target`.
    pub fn fail_writes(&self, target: RegTarget, count: u32) {
        self.inner.faults.lock().unwrap().writes.insert(target, count);
    }

    pub fn set_read_chaos(&self, value: f64) -> AsicResult<()> {
        self.inner.read_chaos.lock().unwrap().set(value)
    }

    /// Delay every completion by `latency`.  Register contents change when
    /// the operation is issued.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.inner.latency.lock().unwrap() = latency;
    }

    /// Stop delivering interrupts, modeling a lost or masked interrupt line.
    pub fn suppress_irqs(&self, suppress: bool) {
        self.inner.irqs_suppressed.store(suppress, Ordering::Relaxed);
    }

    pub fn read_count(&self) -> u64 {
        self.inner.reads.load(Ordering::Relaxed)
    }

    pub fn write_count(&self) -> u64 {
        self.inner.writes.load(Ordering::Relaxed)
    }

    fn complete<T: Send + 'static>(
        &self,
        result: AsicResult<T>,
    ) -> oneshot::Receiver<AsicResult<T>> {
        let (tx, rx) = oneshot::channel();
        let latency = *self.inner.latency.lock().unwrap();
        match (latency, tokio::runtime::Handle::try_current()) {
            (Some(delay), Ok(rt)) => {
                rt.spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(result);
                });
            }
            _ => {
                let _ = tx.send(result);
            }
        }
        rx
    }

    fn read_words(
        &self,
        target: RegTarget,
        words: usize,
    ) -> AsicResult<Vec<u32>> {
        if take_fault(&mut self.inner.faults.lock().unwrap().reads, &target) {
            return Err(AsicError::busy(target, "injected read fault"));
        }
        let chaos = *self.inner.read_chaos.lock().unwrap();
        chaos.unfurled(&self.inner.log, &format!("read {target}"))?;
        Ok(self.peek(target, words))
    }

    fn write_words(&self, target: RegTarget, data: Vec<u32>) -> AsicResult<()> {
        if take_fault(&mut self.inner.faults.lock().unwrap().writes, &target) {
            return Err(AsicError::busy(target, "injected write fault"));
        }
        let reg = self.inner.special.lock().unwrap().get(&target).copied();
        match reg.map(|r| r.block) {
            Some(Block::Status) | Some(Block::ErrorStatus) => {
                let bits = data.first().copied().unwrap_or(0);
                let mut mem = self.inner.mem.lock().unwrap();
                *mem.entry(target).or_default() &= !bits;
            }
            _ => self.poke(target, &data),
        }
        if let Some(reg) = reg.filter(|r| r.block == Block::Timer) {
            self.timer_written(target, reg, &data);
        }
        Ok(())
    }

    fn timer_written(&self, target: RegTarget, reg: Reg, data: &[u32]) {
        let gen = {
            let mut gens = self.inner.timers.lock().unwrap();
            let gen = gens.entry(target).or_insert(0);
            *gen += 1;
            *gen
        };
        let usec = data.first().copied().unwrap_or(0);
        let enabled = data.get(1).copied().unwrap_or(0) & 1 == 1;
        if !enabled || usec == 0 {
            return;
        }
        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            warn!(self.inner.log, "no runtime for watchdog timer";
                "target" => %target);
            return;
        };
        let sim = self.clone();
        rt.spawn(async move {
            tokio::time::sleep(Duration::from_micros(usec as u64)).await;
            sim.timer_expired(target, reg, gen);
        });
    }

    fn timer_expired(&self, target: RegTarget, reg: Reg, gen: u64) {
        if self.inner.timers.lock().unwrap().get(&target) != Some(&gen) {
            return;
        }
        let Ok(status) =
            self.target(reg.dev, reg.pipe, reg.stage, Block::Status, reg.dir)
        else {
            return;
        };
        if self.word(status) & STATUS_ALL != 0
            || !self.enabled(reg.dev, reg.pipe, reg.stage, reg.dir)
        {
            return;
        }
        debug!(self.inner.log, "watchdog expired";
            "dev" => reg.dev, "pipe" => reg.pipe, "stage" => reg.stage);
        self.trigger_at(
            reg.dev,
            reg.pipe,
            reg.stage,
            reg.dir,
            STATUS_TIMER_TRIGGER,
        );
    }
}

fn locate(layout: &dyn ChipLayout, reg: Reg) -> AsicResult<RegTarget> {
    let loc = layout.resolve(reg.pipe, reg.stage, reg.block)?;
    let target = RegTarget::new(reg.dev, loc.subdev, loc.addr);
    Ok(match reg.dir {
        Direction::Egress if reg.block.is_directional() => {
            target.offset(EGRESS_OFFSET_WORDS)
        }
        _ => target,
    })
}

impl RegisterOps for SimAsic {
    fn read(&self, target: RegTarget, words: usize) -> ReadCompletion {
        self.inner.reads.fetch_add(1, Ordering::Relaxed);
        self.complete(self.read_words(target, words))
    }

    fn write(&self, target: RegTarget, data: Vec<u32>) -> WriteCompletion {
        self.inner.writes.fetch_add(1, Ordering::Relaxed);
        self.complete(self.write_words(target, data))
    }
}

impl Topology for SimAsic {
    fn device_info(&self, dev: DevId) -> AsicResult<DeviceInfo> {
        self.inner
            .devices
            .lock()
            .unwrap()
            .get(&dev)
            .map(|d| d.info.clone())
            .ok_or_else(|| AsicError::Missing(format!("device {dev}")))
    }
}

impl FieldDictionary for SimAsic {
    fn resolve_field(
        &self,
        family: ChipFamily,
        stage: u8,
        name: &str,
    ) -> Option<FieldInfo> {
        dictionary::resolve(family, stage, name)
    }
}

impl InterruptSource for SimAsic {
    fn register_irq_handler(
        &self,
        tx: mpsc::UnboundedSender<AsicIrq>,
    ) -> AsicResult<()> {
        *self.inner.irq_tx.lock().unwrap() = Some(tx);
        Ok(())
    }
}
