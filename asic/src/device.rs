// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Registered devices and their shadow state.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use schemars::JsonSchema;
use serde::Serialize;
use slog::debug;
use slog::info;
use slog::warn;

use aal::AsicError;
use aal::AsicResult;
use aal::ChipFamily;
use aal::DevId;
use aal::Direction;
use aal::PipeScope;
use aal::RegTarget;

use crate::chip::layout_for;
use crate::chip::Block;
use crate::chip::ChipLayout;
use crate::chip::EGRESS_OFFSET_WORDS;
use crate::chip::LOGICAL_TABLES;
use crate::dbg_counter::DbgCounterType;
use crate::snapshot;
use crate::snapshot::SnapshotEntry;
use crate::snapshot::SnapshotHdl;
use crate::Handle;

/// Software shadow of per-(pipe, stage) hardware ownership.  Both tables are
/// dense, indexed by logical pipe and stage, and are allocated in full when
/// the device is registered.
pub(crate) struct Shadow {
    pipes: usize,
    stages: usize,
    /// The snapshot programmed into each (pipe, stage, direction) slot.
    owners: Vec<Option<SnapshotHdl>>,
    /// The event each (pipe, stage, table) debug counter was programmed to
    /// count.
    counters: Vec<Option<DbgCounterType>>,
}

impl Shadow {
    fn new(pipes: usize, stages: usize) -> AsicResult<Self> {
        let slots = pipes.checked_mul(stages).ok_or_else(|| {
            AsicError::ResourceExhausted(format!(
                "{pipes} pipes x {stages} stages"
            ))
        })?;
        let owners = alloc_table(slots, 2, "snapshot slots")?;
        let counters = alloc_table(slots, LOGICAL_TABLES, "debug counters")?;
        Ok(Shadow {
            pipes,
            stages,
            owners,
            counters,
        })
    }

    // The tables are sized once and never resized, so any mismatch means
    // memory corruption and there is no safe way to continue.
    fn check(&self) {
        assert_eq!(self.owners.len(), self.pipes * self.stages * 2);
        assert_eq!(
            self.counters.len(),
            self.pipes * self.stages * LOGICAL_TABLES
        );
    }

    fn slot_idx(&self, pipe: u32, stage: u8, dir: Direction) -> usize {
        self.check();
        let (pipe, stage) = (pipe as usize, stage as usize);
        assert!(pipe < self.pipes && stage < self.stages);
        (pipe * self.stages + stage) * 2 + dir.as_raw() as usize
    }

    fn counter_idx(&self, pipe: u32, stage: u8, table: u8) -> usize {
        self.check();
        let (pipe, stage) = (pipe as usize, stage as usize);
        let table = table as usize;
        assert!(
            pipe < self.pipes && stage < self.stages && table < LOGICAL_TABLES
        );
        (pipe * self.stages + stage) * LOGICAL_TABLES + table
    }

    pub fn owner(
        &self,
        pipe: u32,
        stage: u8,
        dir: Direction,
    ) -> Option<SnapshotHdl> {
        self.owners[self.slot_idx(pipe, stage, dir)]
    }

    /// Claim every listed slot for `snap`.  Either all of the slots are
    /// claimed or none are.
    pub fn claim(
        &mut self,
        snap: SnapshotHdl,
        slots: &[(u32, u8, Direction)],
    ) -> AsicResult<()> {
        for (pipe, stage, dir) in slots {
            match self.owner(*pipe, *stage, *dir) {
                Some(other) if other != snap => {
                    return Err(AsicError::InvalidArg(format!(
                        "pipe {pipe} stage {stage} {dir} is in use by \
                         snapshot {other}"
                    )));
                }
                _ => {}
            }
        }
        for (pipe, stage, dir) in slots {
            let idx = self.slot_idx(*pipe, *stage, *dir);
            self.owners[idx] = Some(snap);
        }
        Ok(())
    }

    /// Release every slot owned by `snap`.
    pub fn release(&mut self, snap: SnapshotHdl) {
        self.check();
        for owner in self.owners.iter_mut() {
            if *owner == Some(snap) {
                *owner = None;
            }
        }
    }

    /// Every occupied slot, as (pipe, stage, direction, owner).
    pub fn owned_slots(&self) -> Vec<(u32, u8, Direction, SnapshotHdl)> {
        self.check();
        self.owners
            .iter()
            .enumerate()
            .filter_map(|(idx, owner)| {
                owner.map(|snap| {
                    let dir = if idx % 2 == 0 {
                        Direction::Ingress
                    } else {
                        Direction::Egress
                    };
                    let stage = ((idx / 2) % self.stages) as u8;
                    let pipe = (idx / 2 / self.stages) as u32;
                    (pipe, stage, dir, snap)
                })
            })
            .collect()
    }

    pub fn counter(
        &self,
        pipe: u32,
        stage: u8,
        table: u8,
    ) -> Option<DbgCounterType> {
        self.counters[self.counter_idx(pipe, stage, table)]
    }

    pub fn counter_set(
        &mut self,
        pipe: u32,
        stage: u8,
        table: u8,
        kind: DbgCounterType,
    ) {
        let idx = self.counter_idx(pipe, stage, table);
        self.counters[idx] = Some(kind);
    }
}

fn alloc_table<T: Clone>(
    slots: usize,
    per_slot: usize,
    what: &str,
) -> AsicResult<Vec<Option<T>>> {
    let len = slots.checked_mul(per_slot).ok_or_else(|| {
        AsicError::ResourceExhausted(format!("{what}: too many entries"))
    })?;
    let mut table = Vec::new();
    table.try_reserve_exact(len).map_err(|e| {
        AsicError::ResourceExhausted(format!("allocating {what}: {e}"))
    })?;
    table.resize(len, None);
    Ok(table)
}

/// A registered ASIC.
pub struct Device {
    pub id: DevId,
    layout: Arc<dyn ChipLayout>,
    /// Physical pipe id, indexed by logical pipe id.
    pipes: Vec<u32>,
    stages: u8,
    /// Should datapath error interrupts be recorded?
    err_int_mode: AtomicBool,
    pub(crate) snapshots: Mutex<BTreeMap<u16, SnapshotEntry>>,
    shadow: Mutex<Shadow>,
}

impl Device {
    pub fn family(&self) -> ChipFamily {
        self.layout.family()
    }

    pub fn layout(&self) -> &dyn ChipLayout {
        self.layout.as_ref()
    }

    /// Number of active logical pipes.
    pub fn pipe_count(&self) -> u32 {
        self.pipes.len() as u32
    }

    pub fn stages(&self) -> u8 {
        self.stages
    }

    pub(crate) fn shadow(&self) -> MutexGuard<'_, Shadow> {
        self.shadow.lock().unwrap()
    }

    pub(crate) fn err_int_mode(&self) -> bool {
        self.err_int_mode.load(Ordering::Relaxed)
    }

    pub(crate) fn err_int_mode_set(&self, enabled: bool) {
        self.err_int_mode.store(enabled, Ordering::Relaxed)
    }

    pub(crate) fn check_pipe(&self, pipe: u32) -> AsicResult<()> {
        if pipe >= self.pipe_count() {
            return Err(AsicError::InvalidArg(format!(
                "pipe {pipe} out of range on device {}: {} pipes active",
                self.id,
                self.pipe_count()
            )));
        }
        Ok(())
    }

    pub(crate) fn check_stage(&self, stage: u8) -> AsicResult<()> {
        if stage >= self.stages {
            return Err(AsicError::InvalidArg(format!(
                "stage {stage} out of range on device {}: {} stages active",
                self.id, self.stages
            )));
        }
        Ok(())
    }

    /// The logical pipes covered by `scope`.
    pub(crate) fn pipes_in(&self, scope: PipeScope) -> AsicResult<Vec<u32>> {
        match scope {
            PipeScope::All => Ok((0..self.pipe_count()).collect()),
            PipeScope::Pipe(p) => {
                self.check_pipe(p)?;
                Ok(vec![p])
            }
        }
    }

    /// Map a physical pipe, as reported by an interrupt, back to its logical
    /// id.
    pub(crate) fn logical_pipe(&self, phys: u32) -> Option<u32> {
        self.pipes.iter().position(|p| *p == phys).map(|l| l as u32)
    }

    /// Locate `block` in `stage` of logical pipe `pipe`.
    pub(crate) fn resolve(
        &self,
        pipe: u32,
        stage: u8,
        block: Block,
    ) -> AsicResult<RegTarget> {
        self.check_pipe(pipe)?;
        if !block.is_pipe_level() {
            self.check_stage(stage)?;
        }
        let loc = self.layout.resolve(self.pipes[pipe as usize], stage, block)?;
        Ok(RegTarget::new(self.id, loc.subdev, loc.addr))
    }

    /// Locate the copy of `block` used by snapshots in direction `dir`.
    pub(crate) fn resolve_dir(
        &self,
        pipe: u32,
        stage: u8,
        block: Block,
        dir: Direction,
    ) -> AsicResult<RegTarget> {
        let target = self.resolve(pipe, stage, block)?;
        Ok(match dir {
            Direction::Egress if block.is_directional() => {
                target.offset(EGRESS_OFFSET_WORDS)
            }
            _ => target,
        })
    }

    pub(crate) fn block_words(&self, block: Block) -> usize {
        self.layout.block_words(block)
    }
}

pub(crate) fn get(hdl: &Handle, dev: DevId) -> AsicResult<Arc<Device>> {
    hdl.devices_get()
        .get(&dev)
        .cloned()
        .ok_or_else(|| AsicError::Missing(format!("device {dev}")))
}

/// Register a device with the snapshot subsystem, building its shadow state.
/// Registration is all-or-nothing: on failure no trace of the device
/// remains.
pub fn device_add(hdl: &Handle, dev: DevId) -> AsicResult<()> {
    if hdl.devices_get().contains_key(&dev) {
        return Err(AsicError::InvalidArg(format!(
            "device {dev} already registered"
        )));
    }

    let info = hdl.topology.device_info(dev)?;
    let layout = layout_for(info.family);
    if info.pipes.is_empty() {
        return Err(AsicError::InvalidArg(format!(
            "device {dev} has no active pipes"
        )));
    }
    let mut seen = BTreeSet::new();
    for phys in &info.pipes {
        if *phys >= layout.max_pipes() || !seen.insert(*phys) {
            return Err(AsicError::InvalidArg(format!(
                "device {dev}: bad physical pipe {phys}"
            )));
        }
    }
    if info.stages == 0 || info.stages > layout.max_stages() {
        return Err(AsicError::InvalidArg(format!(
            "device {dev}: {} stages not supported on {}",
            info.stages, info.family
        )));
    }

    let shadow = Shadow::new(info.pipes.len(), info.stages as usize)?;
    let device = Arc::new(Device {
        id: dev,
        layout,
        pipes: info.pipes,
        stages: info.stages,
        err_int_mode: AtomicBool::new(false),
        snapshots: Mutex::new(BTreeMap::new()),
        shadow: Mutex::new(shadow),
    });

    let mut devices = hdl.devices_get();
    if devices.contains_key(&dev) {
        return Err(AsicError::InvalidArg(format!(
            "device {dev} already registered"
        )));
    }
    info!(hdl.log, "registered device";
        "dev" => dev,
        "family" => %device.family(),
        "pipes" => device.pipe_count(),
        "stages" => device.stages);
    devices.insert(dev, device);
    Ok(())
}

/// Unregister a device.  Every snapshot on the device is deleted first.
pub async fn device_remove(hdl: &Handle, dev: DevId) -> AsicResult<()> {
    let device = hdl
        .devices_get()
        .remove(&dev)
        .ok_or_else(|| AsicError::Missing(format!("device {dev}")))?;

    let entries: Vec<SnapshotEntry> =
        device.snapshots.lock().unwrap().values().cloned().collect();
    for entry in entries {
        let mut state = entry.lock().await;
        let snap = state.hdl();
        if let Err(e) = snapshot::teardown(hdl, &device, &mut state).await {
            warn!(hdl.log, "failed to disarm snapshot on device removal";
                "snapshot" => %snap,
                "error" => %e);
        }
        debug!(hdl.log, "deleted snapshot with device"; "snapshot" => %snap);
    }
    device.snapshots.lock().unwrap().clear();
    info!(hdl.log, "unregistered device"; "dev" => dev);
    Ok(())
}

/// Every registered device.
pub fn devices_list(hdl: &Handle) -> Vec<DevId> {
    hdl.devices_get().keys().copied().collect()
}

/// A complete image of a device's software state, used to confirm that
/// operations leave no residue behind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, JsonSchema)]
pub struct DeviceView {
    pub dev: DevId,
    pub family: ChipFamily,
    pub pipes: Vec<u32>,
    pub stages: u8,
    pub err_int_mode: bool,
    pub snapshots: Vec<SnapshotHdl>,
    pub slot_owners: Vec<Option<SnapshotHdl>>,
    pub counters: Vec<Option<DbgCounterType>>,
}

pub fn device_view(hdl: &Handle, dev: DevId) -> AsicResult<DeviceView> {
    let device = get(hdl, dev)?;
    let snapshots = device
        .snapshots
        .lock()
        .unwrap()
        .keys()
        .map(|slot| SnapshotHdl::new(dev, *slot))
        .collect();
    let shadow = device.shadow();
    Ok(DeviceView {
        dev,
        family: device.family(),
        pipes: device.pipes.clone(),
        stages: device.stages,
        err_int_mode: device.err_int_mode(),
        snapshots,
        slot_owners: shadow.owners.clone(),
        counters: shadow.counters.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hdl(n: u32) -> SnapshotHdl {
        SnapshotHdl::new(0, n as u16)
    }

    #[test]
    fn test_shadow_claim_release() {
        let mut shadow = Shadow::new(2, 4).unwrap();
        let a = [(0, 1, Direction::Ingress), (0, 2, Direction::Ingress)];
        let b = [(0, 2, Direction::Ingress), (0, 3, Direction::Ingress)];

        shadow.claim(hdl(1), &a).unwrap();
        assert_eq!(shadow.owner(0, 1, Direction::Ingress), Some(hdl(1)));
        assert_eq!(shadow.owner(0, 1, Direction::Egress), None);

        // Overlap with another owner is refused, and nothing is claimed
        assert!(matches!(
            shadow.claim(hdl(2), &b),
            Err(AsicError::InvalidArg(_))
        ));
        assert_eq!(shadow.owner(0, 3, Direction::Ingress), None);

        // Re-claiming our own slots is fine
        shadow.claim(hdl(1), &a).unwrap();

        // The other direction is a different slot
        shadow.claim(hdl(2), &[(0, 2, Direction::Egress)]).unwrap();

        let mut owned = shadow.owned_slots();
        owned.sort();
        assert_eq!(
            owned,
            vec![
                (0, 1, Direction::Ingress, hdl(1)),
                (0, 2, Direction::Ingress, hdl(1)),
                (0, 2, Direction::Egress, hdl(2)),
            ]
        );

        shadow.release(hdl(1));
        assert_eq!(shadow.owned_slots().len(), 1);
        shadow.claim(hdl(2), &b).unwrap();
    }

    #[test]
    fn test_shadow_slot_decode() {
        let mut shadow = Shadow::new(3, 5).unwrap();
        shadow.claim(hdl(7), &[(2, 4, Direction::Egress)]).unwrap();
        assert_eq!(
            shadow.owned_slots(),
            vec![(2, 4, Direction::Egress, hdl(7))]
        );
    }

    #[test]
    fn test_shadow_counters() {
        let mut shadow = Shadow::new(1, 2).unwrap();
        assert_eq!(shadow.counter(0, 1, 15), None);
        shadow.counter_set(0, 1, 15, DbgCounterType::TableHit);
        assert_eq!(shadow.counter(0, 1, 15), Some(DbgCounterType::TableHit));
        assert_eq!(shadow.counter(0, 0, 15), None);
    }

    #[test]
    fn test_shadow_too_large() {
        assert!(matches!(
            Shadow::new(usize::MAX / 4, 4),
            Err(AsicError::ResourceExhausted(_))
        ));
    }
}
