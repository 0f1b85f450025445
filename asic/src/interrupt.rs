// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Servicing snapshot and datapath-error interrupts.
//!
//! Interrupts arrive on a channel registered with the interrupt source and
//! are handled one at a time by the monitor task.  The status registers are
//! edge-triggered, so an interrupt can be lost if it races with a clear; the
//! scrub task re-polls the status of every occupied snapshot slot on a timer
//! and services anything it finds pending.

use std::sync::Arc;
use std::time::Duration;

use slog::debug;
use slog::error;
use slog::info;
use slog::o;
use slog::warn;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use aal::AsicError;
use aal::AsicIrq;
use aal::AsicResult;
use aal::DevId;
use aal::Direction;
use aal::InterruptSource;
use aal::RegTarget;

use crate::chip::Block;
use crate::chip::STATUS_ALL;
use crate::chip::STATUS_CAUSES;
use crate::chip::STATUS_LOCAL_TRIGGER;
use crate::chip::STATUS_TIMER_TRIGGER;
use crate::device;
use crate::device::Device;
use crate::event_log;
use crate::event_log::EventInfo;
use crate::event_log::EventKind;
use crate::regio;
use crate::snapshot;
use crate::snapshot::capture;
use crate::snapshot::FsmState;
use crate::snapshot::SnapshotHdl;
use crate::snapshot::TriggerInfo;
use crate::Handle;

/// The tasks servicing interrupts for a Handle.  They are stopped when this
/// is dropped.
pub struct InterruptMonitor {
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for InterruptMonitor {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Register with the interrupt source and start servicing interrupts, along
/// with the scrub timer if one is configured.
pub fn interrupt_monitor_start(
    hdl: &Arc<Handle>,
    source: &dyn InterruptSource,
) -> AsicResult<InterruptMonitor> {
    let (tx, rx) = mpsc::unbounded_channel();
    source.register_irq_handler(tx)?;

    let mut tasks = vec![tokio::spawn(monitoring_loop(hdl.clone(), rx))];
    match hdl.config.scrub_interval() {
        Some(interval) => {
            tasks.push(tokio::spawn(scrub_loop(hdl.clone(), interval)))
        }
        None => info!(hdl.log, "scrub timer disabled"),
    }
    Ok(InterruptMonitor { tasks })
}

async fn monitoring_loop(
    hdl: Arc<Handle>,
    mut rx: mpsc::UnboundedReceiver<AsicIrq>,
) {
    let log = hdl.log.new(o!("unit" => "interrupt monitor"));
    info!(log, "starting interrupt monitor");
    while let Some(irq) = rx.recv().await {
        interrupt_service(&hdl, irq).await;
    }
    info!(log, "interrupt source closed");
}

async fn scrub_loop(hdl: Arc<Handle>, interval: Duration) {
    let log = hdl.log.new(o!("unit" => "scrub"));
    info!(log, "starting scrub timer";
        "interval_ms" => interval.as_millis() as u64);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let serviced = scrub(&hdl).await;
        if serviced > 0 {
            info!(log, "scrub serviced pending snapshots";
                "count" => serviced);
        }
    }
}

/// Handle a single interrupt.  Failures are logged and recorded rather than
/// returned: nobody is waiting on an interrupt.
pub async fn interrupt_service(hdl: &Handle, irq: AsicIrq) {
    let result = match irq {
        AsicIrq::Snapshot {
            dev,
            pipe,
            stage,
            dir,
        } => snapshot_irq(hdl, dev, pipe, stage, dir).await,
        AsicIrq::Error { dev, pipe, stage } => {
            error_irq(hdl, dev, pipe, stage).await
        }
    };
    if let Err(e) = result {
        error!(hdl.log, "failed to service interrupt";
            "irq" => ?irq,
            "error" => %e);
    }
}

fn logical_pipe(device: &Device, phys: u32) -> AsicResult<u32> {
    device.logical_pipe(phys).ok_or_else(|| {
        AsicError::InvalidArg(format!(
            "physical pipe {phys} is not active on device {}",
            device.id
        ))
    })
}

async fn snapshot_irq(
    hdl: &Handle,
    dev: DevId,
    phys: u32,
    stage: u8,
    dir: Direction,
) -> AsicResult<()> {
    let device = device::get(hdl, dev)?;
    let pipe = logical_pipe(&device, phys)?;
    device.check_stage(stage)?;
    service_slot(hdl, &device, pipe, stage, dir, Via::Interrupt)
        .await
        .map(|_| ())
}

// How a pending slot was found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Via {
    Interrupt,
    Scrub,
}

// What servicing a slot found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    /// No live snapshot owns the slot.
    Unowned,
    /// The owner isn't waiting for a capture.
    NotArmed,
    /// The owner is armed, but no trigger cause is latched.
    Idle,
    /// The status register couldn't be read.  The slot is left for the next
    /// scrub pass.
    Unreadable,
    /// A trigger cause was latched.  `stored` is false if the capture could
    /// not be read back.
    Latched { status: u32, forced: bool, stored: bool },
}

/// Service a snapshot slot whose status register is (or may be) set.  If the
/// owning snapshot is armed and a trigger cause is latched, read the capture
/// back; then clear the status so the interrupt deasserts.  Returns whether
/// anything was serviced.
async fn service_slot(
    hdl: &Handle,
    device: &Device,
    pipe: u32,
    stage: u8,
    dir: Direction,
    via: Via,
) -> AsicResult<bool> {
    let status_target = device.resolve_dir(pipe, stage, Block::Status, dir)?;
    let event = |kind: EventKind,
                 snapshot: Option<SnapshotHdl>,
                 detail: String| EventInfo {
        kind,
        dev: device.id,
        pipe,
        stage,
        dir: Some(dir),
        snapshot,
        detail,
    };

    let owner = device.shadow().owner(pipe, stage, dir);
    let slot = match owner {
        Some(snap) => capture_slot(hdl, device, snap, pipe, stage, dir).await,
        None => Slot::Unowned,
    };

    let clear = match slot {
        Slot::Latched {
            status,
            forced,
            stored: true,
        } => {
            let kind = match (via, forced) {
                (Via::Scrub, _) => EventKind::ScrubRecovered,
                (Via::Interrupt, true) => EventKind::Watchdog,
                (Via::Interrupt, false) => EventKind::Triggered,
            };
            info!(hdl.log, "snapshot captured";
                "snapshot" => ?owner,
                "pipe" => pipe,
                "stage" => stage,
                "forced" => forced,
                "via" => ?via);
            event_log::record(
                hdl,
                event(kind, owner, format!("forced: {forced}")),
            );
            status
        }
        Slot::Latched { status, .. } => status,
        Slot::NotArmed => {
            debug!(hdl.log, "snapshot already serviced";
                "snapshot" => ?owner,
                "pipe" => pipe,
                "stage" => stage);
            STATUS_ALL
        }
        Slot::Idle | Slot::Unowned if via == Via::Interrupt => {
            warn!(hdl.log, "spurious snapshot interrupt";
                "dev" => device.id,
                "pipe" => pipe,
                "stage" => stage,
                "dir" => %dir);
            event_log::record(
                hdl,
                event(EventKind::Spurious, owner, String::new()),
            );
            // An armed slot keeps whatever the hardware latches from here on.
            match slot {
                Slot::Unowned => STATUS_ALL,
                _ => 0,
            }
        }
        Slot::Unowned => STATUS_ALL,
        Slot::Idle | Slot::Unreadable => 0,
    };
    if clear == 0 {
        return Ok(false);
    }

    if let Err(e) = status_clear(hdl, status_target, clear).await {
        error!(hdl.log, "failed to clear snapshot interrupt";
            "dev" => device.id,
            "pipe" => pipe,
            "stage" => stage,
            "dir" => %dir,
            "error" => %e);
        event_log::record(
            hdl,
            event(EventKind::ClearFailed, owner, e.to_string()),
        );
    }
    Ok(true)
}

// Read back the capture for `snap` if it is armed and its status shows a
// trigger cause.  The status is read under the snapshot's lock.
async fn capture_slot(
    hdl: &Handle,
    device: &Device,
    snap: SnapshotHdl,
    pipe: u32,
    stage: u8,
    dir: Direction,
) -> Slot {
    let Ok((_, mut state)) = snapshot::lock(hdl, snap).await else {
        return Slot::Unowned;
    };
    if state.fsm != FsmState::Armed {
        return Slot::NotArmed;
    }

    let Ok(target) = device.resolve_dir(pipe, stage, Block::Status, dir)
    else {
        return Slot::Unreadable;
    };
    let status = match regio::read(hdl, target, 1).await {
        Ok(words) => words[0],
        Err(e) => {
            warn!(hdl.log, "unable to read snapshot status";
                "snapshot" => %snap,
                "error" => %e);
            return Slot::Unreadable;
        }
    };
    if status & STATUS_CAUSES == 0 {
        return Slot::Idle;
    }

    // The watchdog only forces a capture when the compare didn't match.
    let forced = status & STATUS_TIMER_TRIGGER != 0
        && status & STATUS_LOCAL_TRIGGER == 0;
    let trigger = TriggerInfo {
        pipe,
        stage,
        forced,
    };
    let stored =
        match capture::capture_read(hdl, device, &state.cfg, trigger).await {
            Ok(data) => snapshot::capture_store(&mut state, data),
            Err(e) => {
                error!(hdl.log, "capture failed";
                    "snapshot" => %snap,
                    "error" => %e);
                false
            }
        };
    Slot::Latched {
        status,
        forced,
        stored,
    }
}

/// Write-one-to-clear `bits` in a status register, retrying with
/// exponential backoff while the hardware reports itself busy.
async fn status_clear(
    hdl: &Handle,
    target: RegTarget,
    bits: u32,
) -> AsicResult<()> {
    let attempts = hdl.config.clear_retries.max(1);
    let mut backoff = hdl.config.clear_backoff();
    let mut attempt = 1;
    loop {
        match regio::write(hdl, target, vec![bits]).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() && attempt < attempts => {
                debug!(hdl.log, "retrying interrupt clear";
                    "target" => %target,
                    "attempt" => attempt,
                    "error" => %e);
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn error_irq(
    hdl: &Handle,
    dev: DevId,
    phys: u32,
    stage: u8,
) -> AsicResult<()> {
    let device = device::get(hdl, dev)?;
    let pipe = logical_pipe(&device, phys)?;
    let target = device.resolve(pipe, stage, Block::ErrorStatus)?;
    let bits = regio::read(hdl, target, 1).await?[0];
    if bits == 0 {
        return Ok(());
    }

    if device.err_int_mode() {
        warn!(hdl.log, "datapath error";
            "dev" => dev,
            "pipe" => pipe,
            "stage" => stage,
            "status" => format!("{bits:#x}"));
        event_log::record(
            hdl,
            EventInfo {
                kind: EventKind::DatapathError,
                dev,
                pipe,
                stage,
                dir: None,
                snapshot: None,
                detail: format!("error status {bits:#x}"),
            },
        );
    } else {
        debug!(hdl.log, "ignoring datapath error";
            "dev" => dev,
            "pipe" => pipe,
            "stage" => stage);
    }
    status_clear(hdl, target, bits).await
}

/// Re-poll the status of every occupied snapshot slot and service any that
/// are pending.  Returns the number of slots serviced.
pub async fn scrub(hdl: &Handle) -> usize {
    let devices: Vec<Arc<Device>> =
        hdl.devices_get().values().cloned().collect();
    let mut serviced = 0;
    for device in devices {
        let slots = device.shadow().owned_slots();
        for (pipe, stage, dir, snap) in slots {
            let Ok(target) =
                device.resolve_dir(pipe, stage, Block::Status, dir)
            else {
                continue;
            };
            let status = match regio::read(hdl, target, 1).await {
                Ok(words) => words[0],
                Err(e) => {
                    debug!(hdl.log, "scrub: status read failed";
                        "snapshot" => %snap,
                        "error" => %e);
                    continue;
                }
            };
            if status & STATUS_ALL == 0 {
                continue;
            }
            match service_slot(hdl, &device, pipe, stage, dir, Via::Scrub)
                .await
            {
                Ok(true) => serviced += 1,
                Ok(false) => {}
                Err(e) => warn!(hdl.log, "scrub: failed to service slot";
                    "snapshot" => %snap,
                    "error" => %e),
            }
        }
    }
    serviced
}

/// Turn datapath-error interrupts on or off for every stage of a device.
pub async fn interrupt_mode_set(
    hdl: &Handle,
    dev: DevId,
    enable: bool,
) -> AsicResult<()> {
    let device = device::get(hdl, dev)?;
    let mut writes = Vec::new();
    for pipe in 0..device.pipe_count() {
        for stage in 0..device.stages() {
            writes.push((
                device.resolve(pipe, stage, Block::ErrorCtl)?,
                vec![enable as u32],
            ));
        }
    }
    regio::write_all(hdl, writes).await?;
    device.err_int_mode_set(enable);
    info!(hdl.log, "error interrupt handling mode set";
        "dev" => dev,
        "enabled" => enable);
    Ok(())
}

/// Clear a snapshot slot's status by hand.
pub async fn interrupt_clear(
    hdl: &Handle,
    dev: DevId,
    pipe: u32,
    stage: u8,
    dir: Direction,
) -> AsicResult<()> {
    let device = device::get(hdl, dev)?;
    let target = device.resolve_dir(pipe, stage, Block::Status, dir)?;
    status_clear(hdl, target, STATUS_ALL).await?;
    event_log::record(
        hdl,
        EventInfo {
            kind: EventKind::Cleared,
            dev,
            pipe,
            stage,
            dir: Some(dir),
            snapshot: device.shadow().owner(pipe, stage, dir),
            detail: String::new(),
        },
    );
    Ok(())
}
