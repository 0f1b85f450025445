// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Snapshot handles and their state machine.
//!
//! A snapshot starts out Disabled.  Enabling it programs the compare and
//! enable registers of every stage in its range and moves it to Armed.  When
//! the hardware triggers, the interrupt handler reads back the capture and
//! moves it to Triggered.  Disabling it from either state clears the enable
//! bits but keeps the last capture around until the snapshot is re-armed or
//! deleted.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use slog::debug;
use slog::info;
use slog::warn;
use tokio::sync::Mutex;
use tokio::sync::OwnedMutexGuard;

use aal::AsicError;
use aal::AsicResult;
use aal::DevId;
use aal::Direction;
use aal::PipeScope;
use aal::RegTarget;

use crate::chip::Block;
use crate::chip::STATUS_ALL;
use crate::chip::TRIG_CTL_EGRESS;
use crate::chip::TRIG_CTL_ENABLE;
use crate::chip::TRIG_CTL_MATCH_ANY;
use crate::chip::TRIG_CTL_MODE_SHIFT;
use crate::device;
use crate::device::Device;
use crate::regio;
use crate::Handle;

pub mod capture;
pub mod phv;
pub mod query;
pub mod trigger;

pub use capture::CaptureData;
pub use capture::Captured;
pub use capture::PipeCapture;
pub use capture::StageCapture;
pub use capture::TriggerInfo;
pub use query::*;
pub use trigger::snapshot_trigger_add;
pub use trigger::snapshot_triggers_clear;
pub use trigger::TriggerFieldView;

use trigger::TriggerField;

/// Identifies a snapshot.  The device id is carried in the upper bits, so a
/// handle alone is enough to find its snapshot.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Deserialize,
    Serialize,
    JsonSchema,
)]
pub struct SnapshotHdl(u32);

impl SnapshotHdl {
    pub(crate) fn new(dev: DevId, slot: u16) -> Self {
        SnapshotHdl(((dev as u32) << 16) | slot as u32)
    }

    pub fn from_raw(raw: u32) -> Self {
        SnapshotHdl(raw)
    }

    pub fn as_raw(&self) -> u32 {
        self.0
    }

    pub fn dev(&self) -> DevId {
        (self.0 >> 16) as DevId
    }

    pub(crate) fn slot(&self) -> u16 {
        (self.0 & 0xffff) as u16
    }
}

impl fmt::Display for SnapshotHdl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl FromStr for SnapshotHdl {
    type Err = AsicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = match s.strip_prefix("0x") {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => s.parse(),
        };
        raw.map(SnapshotHdl).map_err(|_| {
            AsicError::InvalidArg(format!("invalid snapshot handle: {s}"))
        })
    }
}

/// Which ingress threads a snapshot triggers on.  Ghost threads only exist on
/// tofino2 and later.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Deserialize,
    Serialize,
    JsonSchema,
    strum::EnumString,
    strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum IngressMode {
    #[default]
    IngressOnly,
    GhostOnly,
    /// Both threads must match.
    Both,
    /// Either thread matching is enough.
    Any,
}

impl IngressMode {
    pub fn as_raw(self) -> u32 {
        match self {
            IngressMode::IngressOnly => 0,
            IngressMode::GhostOnly => 1,
            IngressMode::Both => 2,
            IngressMode::Any => 3,
        }
    }

    fn needs_ghost(self) -> bool {
        self != IngressMode::IngressOnly
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Serialize,
    JsonSchema,
    strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FsmState {
    Disabled,
    Armed,
    Triggered,
}

/// The full configuration of a snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, JsonSchema)]
pub struct SnapshotCfg {
    pub dev: DevId,
    pub pipe: PipeScope,
    pub start_stage: u8,
    pub end_stage: u8,
    pub dir: Direction,
    pub enabled: bool,
    /// Watchdog timeout in microseconds.  Zero disables the watchdog.
    pub timeout_usec: u32,
    pub ingress_mode: IngressMode,
}

/// The settings that can be changed on an existing snapshot, read and
/// written as a unit.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Deserialize,
    Serialize,
    JsonSchema,
)]
pub struct SnapshotSettings {
    pub enabled: bool,
    pub timeout_usec: u32,
    pub ingress_mode: IngressMode,
}

/// What `snapshot_state_get` reports.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, JsonSchema)]
pub struct SnapshotStatus {
    pub snapshot: SnapshotHdl,
    pub state: FsmState,
    pub enabled: bool,
    pub timeout_usec: u32,
    /// Where the most recent capture was triggered, if one is held.
    pub trigger: Option<TriggerInfo>,
}

/// A snapshot's configuration along with its trigger fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, JsonSchema)]
pub struct SnapshotConfigView {
    pub snapshot: SnapshotHdl,
    pub cfg: SnapshotCfg,
    pub triggers: Vec<TriggerFieldView>,
}

pub(crate) struct SnapshotState {
    hdl: SnapshotHdl,
    pub cfg: SnapshotCfg,
    pub triggers: Vec<TriggerField>,
    pub fsm: FsmState,
    pub capture: Option<Arc<CaptureData>>,
    /// Set once the snapshot has been torn down.  Anybody who was waiting on
    /// the lock when that happened must treat the handle as stale.
    deleted: bool,
}

impl SnapshotState {
    pub fn hdl(&self) -> SnapshotHdl {
        self.hdl
    }
}

pub(crate) type SnapshotEntry = Arc<Mutex<SnapshotState>>;

/// Find a snapshot and take its lock.
pub(crate) async fn lock(
    hdl: &Handle,
    snap: SnapshotHdl,
) -> AsicResult<(Arc<Device>, OwnedMutexGuard<SnapshotState>)> {
    let missing = || AsicError::Missing(format!("snapshot {snap}"));
    let device = device::get(hdl, snap.dev()).map_err(|_| missing())?;
    let entry = device
        .snapshots
        .lock()
        .unwrap()
        .get(&snap.slot())
        .cloned()
        .ok_or_else(missing)?;
    let state = entry.lock_owned().await;
    if state.deleted {
        return Err(missing());
    }
    Ok((device, state))
}

/// Create a snapshot covering stages `start_stage..=end_stage` of the pipes
/// in `pipe`.  The snapshot starts out disabled with no trigger fields, and
/// nothing is written to the hardware.
pub fn snapshot_create(
    hdl: &Handle,
    dev: DevId,
    pipe: PipeScope,
    start_stage: u8,
    end_stage: u8,
    dir: Direction,
) -> AsicResult<SnapshotHdl> {
    let device = device::get(hdl, dev)?;
    if start_stage > end_stage {
        return Err(AsicError::InvalidArg(format!(
            "start stage {start_stage} is after end stage {end_stage}"
        )));
    }
    device.check_stage(end_stage)?;
    device.pipes_in(pipe)?;

    let mut snapshots = device.snapshots.lock().unwrap();
    let slot = (0..=u16::MAX)
        .find(|slot| !snapshots.contains_key(slot))
        .ok_or_else(|| {
            AsicError::ResourceExhausted(format!(
                "no free snapshot handles on device {dev}"
            ))
        })?;
    let snap = SnapshotHdl::new(dev, slot);
    let state = SnapshotState {
        hdl: snap,
        cfg: SnapshotCfg {
            dev,
            pipe,
            start_stage,
            end_stage,
            dir,
            enabled: false,
            timeout_usec: 0,
            ingress_mode: IngressMode::default(),
        },
        triggers: Vec::new(),
        fsm: FsmState::Disabled,
        capture: None,
        deleted: false,
    };
    snapshots.insert(slot, Arc::new(Mutex::new(state)));

    info!(hdl.log, "created snapshot";
        "snapshot" => %snap,
        "pipe" => %pipe,
        "start_stage" => start_stage,
        "end_stage" => end_stage,
        "dir" => %dir);
    Ok(snap)
}

/// Delete a snapshot, disarming it first if needed.  Any capture in
/// progress completes before the snapshot is torn down.
pub async fn snapshot_delete(
    hdl: &Handle,
    snap: SnapshotHdl,
) -> AsicResult<()> {
    let (device, mut state) = lock(hdl, snap).await?;
    if let Err(e) = teardown(hdl, &device, &mut state).await {
        warn!(hdl.log, "failed to disarm deleted snapshot";
            "snapshot" => %snap,
            "error" => %e);
    }
    device.snapshots.lock().unwrap().remove(&snap.slot());
    info!(hdl.log, "deleted snapshot"; "snapshot" => %snap);
    Ok(())
}

/// Release everything a snapshot holds.  The caller removes it from the
/// device's table.  A failure to disarm the hardware is reported, but the
/// snapshot is torn down regardless.
pub(crate) async fn teardown(
    hdl: &Handle,
    device: &Device,
    state: &mut SnapshotState,
) -> AsicResult<()> {
    let result = match state.fsm {
        FsmState::Disabled => Ok(()),
        _ => disarm_hw(hdl, device, &state.cfg).await,
    };
    device.shadow().release(state.hdl);
    state.deleted = true;
    state.fsm = FsmState::Disabled;
    state.capture = None;
    state.triggers.clear();
    result
}

fn stage_range(cfg: &SnapshotCfg) -> impl Iterator<Item = u8> + Clone {
    cfg.start_stage..=cfg.end_stage
}

fn trigger_ctl(cfg: &SnapshotCfg, match_any: bool) -> u32 {
    let mut ctl = TRIG_CTL_ENABLE;
    match cfg.dir {
        Direction::Ingress => {
            ctl |= cfg.ingress_mode.as_raw() << TRIG_CTL_MODE_SHIFT
        }
        Direction::Egress => ctl |= TRIG_CTL_EGRESS,
    }
    if match_any {
        ctl |= TRIG_CTL_MATCH_ANY;
    }
    ctl
}

// Clear stale status and load the compare keys, then turn on the stages and
// start the watchdog.
async fn program(
    hdl: &Handle,
    device: &Device,
    state: &SnapshotState,
    pipes: &[u32],
) -> AsicResult<()> {
    let cfg = &state.cfg;
    let key_words = device.layout().trigger_key_words();
    let ctl = trigger_ctl(cfg, state.triggers.is_empty());

    let dir = cfg.dir;
    let target =
        |pipe, stage, block| device.resolve_dir(pipe, stage, block, dir);

    let mut setup: Vec<(RegTarget, Vec<u32>)> = Vec::new();
    let mut enable: Vec<(RegTarget, Vec<u32>)> = Vec::new();
    for pipe in pipes.iter().copied() {
        for (idx, stage) in stage_range(cfg).enumerate() {
            let (value, mask) =
                trigger::compose_key(&state.triggers, idx, key_words);
            setup.push((target(pipe, stage, Block::Status)?, vec![STATUS_ALL]));
            setup.push((target(pipe, stage, Block::CompareValue)?, value));
            setup.push((target(pipe, stage, Block::CompareMask)?, mask));
            enable.push((target(pipe, stage, Block::TriggerCtl)?, vec![ctl]));
        }
        let timer = match cfg.timeout_usec {
            0 => vec![0, 0],
            t => vec![t, 1],
        };
        enable.push((target(pipe, cfg.start_stage, Block::Timer)?, timer));
    }

    regio::write_all(hdl, setup).await?;
    regio::write_all(hdl, enable).await
}

async fn disarm_hw(
    hdl: &Handle,
    device: &Device,
    cfg: &SnapshotCfg,
) -> AsicResult<()> {
    let target = |pipe, stage, block| {
        device.resolve_dir(pipe, stage, block, cfg.dir)
    };
    let mut writes = Vec::new();
    for pipe in device.pipes_in(cfg.pipe)? {
        for stage in stage_range(cfg) {
            writes.push((target(pipe, stage, Block::TriggerCtl)?, vec![0]));
        }
        writes.push((target(pipe, cfg.start_stage, Block::Timer)?, vec![0, 0]));
    }
    regio::write_all(hdl, writes).await
}

// Claim the slots before touching anything, so a conflict leaves the
// snapshot as it was.  A failed programming pass restores the old settings
// and keeps the last capture.
async fn arm(
    hdl: &Handle,
    device: &Device,
    state: &mut SnapshotState,
    settings: &SnapshotSettings,
) -> AsicResult<()> {
    let snap = state.hdl;
    let pipes = device.pipes_in(state.cfg.pipe)?;
    let dir = state.cfg.dir;
    let slots: Vec<(u32, u8, Direction)> = pipes
        .iter()
        .flat_map(|p| stage_range(&state.cfg).map(move |s| (*p, s, dir)))
        .collect();
    device.shadow().claim(snap, &slots)?;

    let previous = state.cfg.clone();
    state.cfg.ingress_mode = settings.ingress_mode;
    state.cfg.timeout_usec = settings.timeout_usec;
    if let Err(e) = program(hdl, device, state, &pipes).await {
        warn!(hdl.log, "failed to arm snapshot";
            "snapshot" => %snap,
            "error" => %e);
        if let Err(e) = disarm_hw(hdl, device, &state.cfg).await {
            warn!(hdl.log, "failed to roll back snapshot";
                "snapshot" => %snap,
                "error" => %e);
        }
        device.shadow().release(snap);
        state.cfg = previous;
        state.fsm = FsmState::Disabled;
        state.cfg.enabled = false;
        return Err(e);
    }

    state.capture = None;
    state.fsm = FsmState::Armed;
    state.cfg.enabled = true;
    Ok(())
}

async fn disarm(
    hdl: &Handle,
    device: &Device,
    state: &mut SnapshotState,
) -> AsicResult<()> {
    if state.fsm != FsmState::Disabled {
        disarm_hw(hdl, device, &state.cfg).await?;
        device.shadow().release(state.hdl);
    }
    state.fsm = FsmState::Disabled;
    state.cfg.enabled = false;
    Ok(())
}

fn check_ingress_mode(
    device: &Device,
    mode: IngressMode,
) -> AsicResult<()> {
    if mode.needs_ghost() && !device.layout().has_ghost_threads() {
        return Err(AsicError::InvalidArg(format!(
            "ingress mode {mode} needs ghost threads, which {} lacks",
            device.family()
        )));
    }
    Ok(())
}

// Apply new settings to a locked snapshot.  Arming always reprograms the
// hardware, and discards whatever was captured last time once it succeeds.
async fn apply(
    hdl: &Handle,
    device: &Device,
    state: &mut SnapshotState,
    settings: SnapshotSettings,
) -> AsicResult<()> {
    check_ingress_mode(device, settings.ingress_mode)?;
    if settings.enabled {
        arm(hdl, device, state, &settings).await?;
    } else {
        disarm(hdl, device, state).await?;
        state.cfg.ingress_mode = settings.ingress_mode;
        state.cfg.timeout_usec = settings.timeout_usec;
    }
    debug!(hdl.log, "snapshot state set";
        "snapshot" => %state.hdl,
        "state" => %state.fsm,
        "timeout_usec" => state.cfg.timeout_usec);
    Ok(())
}

/// Enable or disable a snapshot.  When enabling, a nonzero `timeout_usec`
/// starts a hardware watchdog that forces a capture if nothing matches in
/// time.
pub async fn snapshot_state_set(
    hdl: &Handle,
    snap: SnapshotHdl,
    enable: bool,
    timeout_usec: u32,
) -> AsicResult<()> {
    let (device, mut state) = lock(hdl, snap).await?;
    let settings = SnapshotSettings {
        enabled: enable,
        timeout_usec,
        ingress_mode: state.cfg.ingress_mode,
    };
    apply(hdl, &device, &mut state, settings).await
}

pub async fn snapshot_state_get(
    hdl: &Handle,
    snap: SnapshotHdl,
) -> AsicResult<SnapshotStatus> {
    let (_device, state) = lock(hdl, snap).await?;
    Ok(SnapshotStatus {
        snapshot: snap,
        state: state.fsm,
        enabled: state.cfg.enabled,
        timeout_usec: state.cfg.timeout_usec,
        trigger: state.capture.as_ref().map(|c| c.trigger),
    })
}

pub async fn snapshot_cfg_get(
    hdl: &Handle,
    snap: SnapshotHdl,
) -> AsicResult<SnapshotSettings> {
    let (_device, state) = lock(hdl, snap).await?;
    Ok(SnapshotSettings {
        enabled: state.cfg.enabled,
        timeout_usec: state.cfg.timeout_usec,
        ingress_mode: state.cfg.ingress_mode,
    })
}

/// Replace a snapshot's settings.  Nothing changes if the new settings are
/// rejected.
pub async fn snapshot_cfg_set(
    hdl: &Handle,
    snap: SnapshotHdl,
    settings: SnapshotSettings,
) -> AsicResult<()> {
    let (device, mut state) = lock(hdl, snap).await?;
    apply(hdl, &device, &mut state, settings).await
}

/// Change only the ingress trigger mode.  An armed snapshot is reprogrammed
/// with the new mode.
pub async fn snapshot_ingress_mode_set(
    hdl: &Handle,
    snap: SnapshotHdl,
    mode: IngressMode,
) -> AsicResult<()> {
    let (device, mut state) = lock(hdl, snap).await?;
    check_ingress_mode(&device, mode)?;
    if state.fsm == FsmState::Armed {
        let settings = SnapshotSettings {
            enabled: true,
            timeout_usec: state.cfg.timeout_usec,
            ingress_mode: mode,
        };
        apply(hdl, &device, &mut state, settings).await
    } else {
        state.cfg.ingress_mode = mode;
        Ok(())
    }
}

pub async fn snapshot_config_get(
    hdl: &Handle,
    snap: SnapshotHdl,
) -> AsicResult<SnapshotConfigView> {
    let (_device, state) = lock(hdl, snap).await?;
    Ok(SnapshotConfigView {
        snapshot: snap,
        cfg: state.cfg.clone(),
        triggers: state.triggers.iter().map(TriggerFieldView::from).collect(),
    })
}

/// The most recent capture, if the snapshot holds one.
pub async fn snapshot_capture(
    hdl: &Handle,
    snap: SnapshotHdl,
) -> AsicResult<Arc<CaptureData>> {
    let (_device, state) = lock(hdl, snap).await?;
    state.capture.clone().ok_or_else(|| {
        AsicError::Missing(format!("snapshot {snap} has no capture"))
    })
}

/// The most recent capture of one logical pipe.
pub async fn snapshot_capture_get(
    hdl: &Handle,
    snap: SnapshotHdl,
    pipe: u32,
) -> AsicResult<PipeCapture> {
    let capture = snapshot_capture(hdl, snap).await?;
    capture.pipe(pipe).cloned().ok_or_else(|| {
        AsicError::InvalidArg(format!(
            "pipe {pipe} is not in the scope of snapshot {snap}"
        ))
    })
}

/// Every snapshot, on one device or on all of them.
pub fn snapshot_handles_get(
    hdl: &Handle,
    dev: Option<DevId>,
) -> AsicResult<Vec<SnapshotHdl>> {
    let devices: Vec<Arc<Device>> = match dev {
        Some(dev) => vec![device::get(hdl, dev)?],
        None => hdl.devices_get().values().cloned().collect(),
    };
    Ok(devices
        .iter()
        .flat_map(|d| {
            d.snapshots
                .lock()
                .unwrap()
                .keys()
                .map(|slot| SnapshotHdl::new(d.id, *slot))
                .collect::<Vec<_>>()
        })
        .collect())
}

/// Store the result of a capture, as long as the snapshot is still waiting
/// for one.  Returns whether it was stored.
pub(crate) fn capture_store(
    state: &mut SnapshotState,
    capture: CaptureData,
) -> bool {
    if state.deleted || state.fsm != FsmState::Armed {
        return false;
    }
    state.capture = Some(Arc::new(capture));
    state.fsm = FsmState::Triggered;
    true
}
