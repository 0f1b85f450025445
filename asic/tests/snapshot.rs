// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! End-to-end tests of the snapshot subsystem, driven through the simulated
//! ASIC and the interrupt monitor.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use pretty_assertions::assert_eq;

use aal::AsicError;
use aal::AsicIrq;
use aal::ChipFamily;
use aal::DevId;
use aal::Direction;
use aal::PipeScope;
use aal::RegTarget;
use asic::chip::Block;
use asic::chip::STATUS_LOCAL_TRIGGER;
use asic::chip::TRIG_CTL_ENABLE;
use asic::device;
use asic::event_log::events_get;
use asic::event_log::Event;
use asic::event_log::EventKind;
use asic::interrupt;
use asic::interrupt::InterruptMonitor;
use asic::sim::SimAsic;
use asic::sim::SimDevice;
use asic::snapshot;
use asic::snapshot::Captured;
use asic::snapshot::FsmState;
use asic::snapshot::SnapshotHdl;
use asic::snapshot::SnapshotSettings;
use asic::snapshot::SnapshotStatus;
use asic::AsicConfig;
use asic::Handle;

const DEV: DevId = 0;
const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    sim: SimAsic,
    hdl: Arc<Handle>,
    _monitor: InterruptMonitor,
}

fn quiet_config() -> AsicConfig {
    AsicConfig {
        scrub_interval_ms: 0,
        ..Default::default()
    }
}

fn harness_with(
    dev: SimDevice,
    config: AsicConfig,
) -> anyhow::Result<Harness> {
    let log = common::logging::test_logger();
    let sim = SimAsic::new(&log);
    sim.add_device(&dev)?;
    let hdl = Arc::new(Handle::new(&log, config, sim.backend())?);
    device::device_add(&hdl, dev.id)?;
    let monitor = interrupt::interrupt_monitor_start(&hdl, &sim)?;
    Ok(Harness {
        sim,
        hdl,
        _monitor: monitor,
    })
}

fn harness(family: ChipFamily) -> anyhow::Result<Harness> {
    harness_with(SimDevice::new(DEV, family), quiet_config())
}

async fn wait_for_state(
    hdl: &Handle,
    snap: SnapshotHdl,
    want: FsmState,
) -> anyhow::Result<SnapshotStatus> {
    tokio::time::timeout(WAIT, async {
        loop {
            let status = snapshot::snapshot_state_get(hdl, snap).await?;
            if status.state == want {
                return Ok::<_, anyhow::Error>(status);
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await?
}

async fn wait_for_event(
    hdl: &Handle,
    kind: EventKind,
) -> anyhow::Result<Event> {
    tokio::time::timeout(WAIT, async {
        loop {
            if let Some(e) =
                events_get(hdl, -1).into_iter().find(|e| e.kind == kind)
            {
                return e;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .map_err(|_| anyhow!("no {kind} event"))
}

async fn wait_for_word(
    sim: &SimAsic,
    target: RegTarget,
    want: u32,
) -> anyhow::Result<()> {
    tokio::time::timeout(WAIT, async {
        while sim.peek(target, 1)[0] != want {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .map_err(|_| anyhow!("{target} never became {want:#x}"))
}

fn egress_port_key(family: ChipFamily, stage: u8, port: u128) -> Vec<u32> {
    SimAsic::key(family, stage, &[("egress_port", port)])
}

// Create, trigger on egress_port 0x42, and arm.
async fn armed_snapshot(
    h: &Harness,
    pipe: PipeScope,
    start: u8,
    end: u8,
) -> anyhow::Result<SnapshotHdl> {
    let snap = snapshot::snapshot_create(
        &h.hdl,
        DEV,
        pipe,
        start,
        end,
        Direction::Ingress,
    )?;
    snapshot::snapshot_trigger_add(
        &h.hdl,
        snap,
        "egress_port",
        &[0x00, 0x42],
        &[0xff, 0xff],
    )
    .await?;
    snapshot::snapshot_state_set(&h.hdl, snap, true, 0).await?;
    Ok(snap)
}

#[tokio::test]
async fn test_capture_example() -> anyhow::Result<()> {
    let h = harness(ChipFamily::Tofino2)?;
    let snap = armed_snapshot(&h, PipeScope::All, 2, 5).await?;
    h.sim.fill_capture(DEV, 1, 3, 0x5a)?;

    // The wrong port doesn't match
    let miss = egress_port_key(ChipFamily::Tofino2, 3, 0x43);
    assert!(!h.sim.inject(DEV, 1, 3, Direction::Ingress, &miss));

    let hit = egress_port_key(ChipFamily::Tofino2, 3, 0x42);
    assert!(h.sim.inject(DEV, 1, 3, Direction::Ingress, &hit));
    let status = wait_for_state(&h.hdl, snap, FsmState::Triggered).await?;
    let trigger = status.trigger.expect("trigger info");
    assert_eq!((trigger.pipe, trigger.stage), (1, 3));
    assert!(!trigger.forced);

    let capture = snapshot::snapshot_capture_get(&h.hdl, snap, 1).await?;
    assert_eq!(capture.pipe, 1);
    assert_eq!(capture.stages.len(), 4);
    let stage = &capture.stages[1];
    assert_eq!(stage.stage, 3);

    let reg = |block| h.sim.target(DEV, 1, 3, block, Direction::Ingress);
    let datapath = h.sim.peek(reg(Block::DatapathCapture)?, 1)[0];
    assert_ne!(datapath, 0);
    assert_eq!(stage.datapath_capture, Captured::Valid(datapath));
    let hit_bits = h.sim.peek(reg(Block::LogicalTableHit)?, 1)[0];
    assert_eq!(stage.logical_table_hit, Captured::Valid(hit_bits as u16));
    let bus = h.sim.peek(reg(Block::PhysBusHitAddr)?, 16);
    assert_eq!(
        stage.phys_bus_hit_addr.valid().map(|a| a.to_vec()),
        Some(bus)
    );
    let alu = h.sim.peek(reg(Block::AluAddr)?, 4);
    assert_eq!(stage.alu_addr.valid().map(|a| a.to_vec()), Some(alu));

    let triggers = stage.triggers.valid().expect("stage 3 status");
    assert!(triggers.local);
    assert!(capture.stages[2].triggers.valid().unwrap().prev_stage);

    let phv = stage.phv.valid().expect("stage 3 phv");
    assert!(phv.all_valid());
    assert_eq!(phv.family, ChipFamily::Tofino2);
    assert_eq!(phv.c32[1].value, 0x5a << 16 | 1);

    // The interrupt has been acknowledged
    let event = wait_for_event(&h.hdl, EventKind::Triggered).await?;
    assert_eq!(event.snapshot, Some(snap));
    wait_for_word(&h.sim, reg(Block::Status)?, 0).await?;

    // A pipe outside the capture is an argument error
    assert!(matches!(
        snapshot::snapshot_capture_get(&h.hdl, snap, 7).await,
        Err(AsicError::InvalidArg(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_create_delete_leaves_no_trace() -> anyhow::Result<()> {
    let h = harness(ChipFamily::Tofino2)?;
    let before = device::device_view(&h.hdl, DEV)?;

    for (pipe, start, end) in [
        (PipeScope::All, 0, 0),
        (PipeScope::Pipe(2), 3, 7),
        (PipeScope::All, 2, 5),
    ] {
        let snap = snapshot::snapshot_create(
            &h.hdl,
            DEV,
            pipe,
            start,
            end,
            Direction::Egress,
        )?;
        snapshot::snapshot_delete(&h.hdl, snap).await?;
        assert_eq!(device::device_view(&h.hdl, DEV)?, before);
    }

    // Arming claims slots, deleting releases them
    let snap = armed_snapshot(&h, PipeScope::All, 2, 5).await?;
    assert_ne!(device::device_view(&h.hdl, DEV)?, before);
    snapshot::snapshot_delete(&h.hdl, snap).await?;
    assert_eq!(device::device_view(&h.hdl, DEV)?, before);
    assert!(matches!(
        snapshot::snapshot_state_get(&h.hdl, snap).await,
        Err(AsicError::Missing(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_trigger_replace() -> anyhow::Result<()> {
    let h = harness(ChipFamily::Tofino2)?;
    let snap = snapshot::snapshot_create(
        &h.hdl,
        DEV,
        PipeScope::All,
        0,
        3,
        Direction::Ingress,
    )?;
    let hdl: &Handle = &h.hdl;
    let add = |field: &'static str,
               value: &'static [u8],
               mask: &'static [u8]| {
        snapshot::snapshot_trigger_add(hdl, snap, field, value, mask)
    };
    add("egress_port", &[0x42], &[0xff]).await?;
    add("hdr.ethernet.ether_type", &[0x08, 0x00], &[0xff, 0xff]).await?;
    add("egress_port", &[0x43], &[0x7f]).await?;

    let config = snapshot::snapshot_config_get(&h.hdl, snap).await?;
    assert_eq!(config.triggers.len(), 2);
    assert_eq!(config.triggers[0].name, "egress_port");
    assert_eq!(config.triggers[0].value, "0x43");
    assert_eq!(config.triggers[0].mask, "0x7f");
    assert_eq!(config.triggers[1].name, "hdr_ethernet_ether_type");

    // Unknown fields, oversized values, and fields not in every stage
    assert!(matches!(
        add("hdr.ipv4.ttl", &[1], &[1]).await,
        Err(AsicError::Missing(_))
    ));
    assert!(matches!(
        add("egress_port", &[0x01, 0x00, 0x00], &[0xff]).await,
        Err(AsicError::InvalidArg(_))
    ));
    assert!(matches!(
        add("meta.route_hit", &[1], &[1]).await,
        Err(AsicError::Missing(_))
    ));
    assert_eq!(
        snapshot::snapshot_config_get(&h.hdl, snap).await?.triggers.len(),
        2
    );

    // The trigger can't change while armed
    snapshot::snapshot_state_set(&h.hdl, snap, true, 0).await?;
    assert!(matches!(
        snapshot::snapshot_triggers_clear(&h.hdl, snap).await,
        Err(AsicError::InvalidArg(_))
    ));
    snapshot::snapshot_state_set(&h.hdl, snap, false, 0).await?;
    snapshot::snapshot_triggers_clear(&h.hdl, snap).await?;
    assert!(snapshot::snapshot_config_get(&h.hdl, snap)
        .await?
        .triggers
        .is_empty());
    Ok(())
}

#[tokio::test]
async fn test_disable_keeps_capture() -> anyhow::Result<()> {
    let h = harness(ChipFamily::Tofino2)?;
    let snap = armed_snapshot(&h, PipeScope::Pipe(0), 0, 1).await?;
    let ctl = h.sim.target(DEV, 0, 0, Block::TriggerCtl, Direction::Ingress)?;
    assert_ne!(h.sim.peek(ctl, 1)[0] & TRIG_CTL_ENABLE, 0);

    let key = egress_port_key(ChipFamily::Tofino2, 0, 0x42);
    assert!(h.sim.inject(DEV, 0, 0, Direction::Ingress, &key));
    wait_for_state(&h.hdl, snap, FsmState::Triggered).await?;

    snapshot::snapshot_state_set(&h.hdl, snap, false, 0).await?;
    let status = snapshot::snapshot_state_get(&h.hdl, snap).await?;
    assert_eq!(status.state, FsmState::Disabled);
    assert!(!status.enabled);
    assert!(status.trigger.is_some());
    assert_eq!(h.sim.peek(ctl, 1)[0], 0);
    let capture = snapshot::snapshot_capture(&h.hdl, snap).await?;
    assert_eq!(capture.pipes.len(), 1);

    // Re-arming discards it
    snapshot::snapshot_state_set(&h.hdl, snap, true, 0).await?;
    assert!(matches!(
        snapshot::snapshot_capture(&h.hdl, snap).await,
        Err(AsicError::Missing(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_create_checks_before_hardware() -> anyhow::Result<()> {
    let h = harness(ChipFamily::Tofino1)?;
    let (reads, writes) = (h.sim.read_count(), h.sim.write_count());

    let bad = [
        (PipeScope::All, 5, 2),
        (PipeScope::All, 0, 12),
        (PipeScope::Pipe(4), 0, 1),
    ];
    for (pipe, start, end) in bad {
        assert!(matches!(
            snapshot::snapshot_create(
                &h.hdl,
                DEV,
                pipe,
                start,
                end,
                Direction::Ingress
            ),
            Err(AsicError::InvalidArg(_))
        ));
    }
    assert!(matches!(
        snapshot::snapshot_create(
            &h.hdl,
            3,
            PipeScope::All,
            0,
            1,
            Direction::Ingress
        ),
        Err(AsicError::Missing(_))
    ));

    // Even a good create is software only
    snapshot::snapshot_create(
        &h.hdl,
        DEV,
        PipeScope::All,
        0,
        11,
        Direction::Ingress,
    )?;
    assert_eq!((h.sim.read_count(), h.sim.write_count()), (reads, writes));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_race_delete() -> anyhow::Result<()> {
    let h = harness(ChipFamily::Tofino2)?;
    let snap = armed_snapshot(&h, PipeScope::All, 1, 4).await?;

    let readers: Vec<_> = (0..100)
        .map(|_| {
            let hdl = h.hdl.clone();
            tokio::spawn(async move {
                for _ in 0..10 {
                    match snapshot::snapshot_state_get(&hdl, snap).await {
                        Ok(status) => {
                            assert_eq!(status.snapshot, snap);
                            assert_eq!(status.state, FsmState::Armed);
                            assert!(status.enabled);
                        }
                        Err(AsicError::Missing(_)) => return true,
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                    tokio::task::yield_now().await;
                }
                false
            })
        })
        .collect();
    let deleter = {
        let hdl = h.hdl.clone();
        tokio::spawn(
            async move { snapshot::snapshot_delete(&hdl, snap).await },
        )
    };

    deleter.await??;
    for reader in readers {
        reader.await?;
    }
    assert!(matches!(
        snapshot::snapshot_state_get(&h.hdl, snap).await,
        Err(AsicError::Missing(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_watchdog_forces_capture() -> anyhow::Result<()> {
    let h = harness(ChipFamily::Tofino2)?;
    let snap = snapshot::snapshot_create(
        &h.hdl,
        DEV,
        PipeScope::Pipe(2),
        4,
        6,
        Direction::Egress,
    )?;
    snapshot::snapshot_trigger_add(
        &h.hdl,
        snap,
        "egress_port",
        &[0x00, 0x42],
        &[0xff, 0xff],
    )
    .await?;
    snapshot::snapshot_state_set(&h.hdl, snap, true, 500).await?;

    let status = wait_for_state(&h.hdl, snap, FsmState::Triggered).await?;
    let trigger = status.trigger.expect("trigger info");
    assert!(trigger.forced);
    assert_eq!((trigger.pipe, trigger.stage), (2, 4));
    let capture = snapshot::snapshot_capture_get(&h.hdl, snap, 2).await?;
    let triggers = capture.stages[0].triggers.valid().unwrap();
    assert!(triggers.timer);
    assert!(!triggers.local);

    let event = wait_for_event(&h.hdl, EventKind::Watchdog).await?;
    assert_eq!(event.dir, Some(Direction::Egress));
    Ok(())
}

#[tokio::test]
async fn test_scrub_recovers_lost_interrupt() -> anyhow::Result<()> {
    let h = harness(ChipFamily::Tofino2)?;
    let snap = armed_snapshot(&h, PipeScope::All, 0, 2).await?;

    h.sim.suppress_irqs(true);
    let key = egress_port_key(ChipFamily::Tofino2, 1, 0x42);
    assert!(h.sim.inject(DEV, 3, 1, Direction::Ingress, &key));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(
        snapshot::snapshot_state_get(&h.hdl, snap).await?.state,
        FsmState::Armed
    );

    assert!(interrupt::scrub(&h.hdl).await >= 1);
    let status = snapshot::snapshot_state_get(&h.hdl, snap).await?;
    assert_eq!(status.state, FsmState::Triggered);
    let trigger = status.trigger.unwrap();
    assert_eq!((trigger.pipe, trigger.stage), (3, 1));
    let event = wait_for_event(&h.hdl, EventKind::ScrubRecovered).await?;
    assert_eq!(event.snapshot, Some(snap));

    // Nothing is left pending
    assert_eq!(interrupt::scrub(&h.hdl).await, 0);
    Ok(())
}

#[tokio::test]
async fn test_scrub_timer() -> anyhow::Result<()> {
    let config = AsicConfig {
        scrub_interval_ms: 5,
        ..Default::default()
    };
    let h = harness_with(SimDevice::new(DEV, ChipFamily::Tofino3), config)?;
    let snap = armed_snapshot(&h, PipeScope::All, 0, 0).await?;
    h.sim.suppress_irqs(true);
    assert!(h.sim.fire(DEV, 0, 0, Direction::Ingress));
    wait_for_state(&h.hdl, snap, FsmState::Triggered).await?;
    Ok(())
}

#[tokio::test]
async fn test_clear_retries() -> anyhow::Result<()> {
    let config = AsicConfig {
        scrub_interval_ms: 0,
        clear_retries: 4,
        ..Default::default()
    };
    let h = harness_with(SimDevice::new(DEV, ChipFamily::Tofino2), config)?;
    let snap = armed_snapshot(&h, PipeScope::Pipe(0), 0, 0).await?;
    let status = h.sim.target(DEV, 0, 0, Block::Status, Direction::Ingress)?;

    // Three failures are absorbed by the retries
    h.sim.fail_writes(status, 3);
    assert!(h.sim.fire(DEV, 0, 0, Direction::Ingress));
    wait_for_state(&h.hdl, snap, FsmState::Triggered).await?;
    wait_for_word(&h.sim, status, 0).await?;
    assert!(events_get(&h.hdl, -1)
        .iter()
        .all(|e| e.kind != EventKind::ClearFailed));

    // Persistent failure is given up on and recorded
    h.sim.fail_writes(status, 100);
    assert!(h.sim.fire(DEV, 0, 0, Direction::Ingress));
    let event = wait_for_event(&h.hdl, EventKind::ClearFailed).await?;
    assert_eq!(event.snapshot, Some(snap));
    assert_ne!(h.sim.peek(status, 1)[0] & STATUS_LOCAL_TRIGGER, 0);

    // Once the hardware recovers the slot can be cleared by hand
    h.sim.fail_writes(status, 0);
    interrupt::interrupt_clear(&h.hdl, DEV, 0, 0, Direction::Ingress).await?;
    assert_eq!(h.sim.peek(status, 1)[0], 0);
    wait_for_event(&h.hdl, EventKind::Cleared).await?;
    Ok(())
}

#[tokio::test]
async fn test_rejected_arm_keeps_settings() -> anyhow::Result<()> {
    let h = harness(ChipFamily::Tofino2)?;
    let first = armed_snapshot(&h, PipeScope::Pipe(0), 0, 1).await?;
    assert!(h.sim.fire(DEV, 0, 0, Direction::Ingress));
    wait_for_state(&h.hdl, first, FsmState::Triggered).await?;
    snapshot::snapshot_state_set(&h.hdl, first, false, 0).await?;
    let before = snapshot::snapshot_cfg_get(&h.hdl, first).await?;

    // Another snapshot now holds stage 1
    let second = armed_snapshot(&h, PipeScope::Pipe(0), 1, 2).await?;
    let settings = SnapshotSettings {
        enabled: true,
        timeout_usec: 777,
        ..before
    };
    assert!(matches!(
        snapshot::snapshot_cfg_set(&h.hdl, first, settings).await,
        Err(AsicError::InvalidArg(_))
    ));

    assert_eq!(snapshot::snapshot_cfg_get(&h.hdl, first).await?, before);
    let status = snapshot::snapshot_state_get(&h.hdl, first).await?;
    assert_eq!(status.state, FsmState::Disabled);
    let trigger = status.trigger.expect("capture kept");
    assert_eq!((trigger.pipe, trigger.stage), (0, 0));
    let capture = snapshot::snapshot_capture_get(&h.hdl, first, 0).await?;
    assert_eq!(capture.pipe, 0);

    // The snapshot that won the slot is untouched
    assert_eq!(
        snapshot::snapshot_state_get(&h.hdl, second).await?.state,
        FsmState::Armed
    );
    Ok(())
}

#[test]
fn test_handle_rejects_bad_config() {
    let log = common::logging::test_logger();
    let sim = SimAsic::new(&log);
    for config in [
        AsicConfig {
            event_log_depth: 0,
            ..Default::default()
        },
        AsicConfig {
            clear_retries: u32::MAX,
            ..Default::default()
        },
    ] {
        assert!(matches!(
            Handle::new(&log, config, sim.backend()),
            Err(AsicError::Config(_))
        ));
    }
}

#[tokio::test]
async fn test_partial_capture() -> anyhow::Result<()> {
    let h = harness(ChipFamily::Tofino2)?;
    let snap = armed_snapshot(&h, PipeScope::Pipe(1), 3, 4).await?;
    for stage in [3, 4] {
        h.sim.fill_capture(DEV, 1, stage, stage as u32)?;
    }
    let bitmap =
        h.sim.target(DEV, 1, 3, Block::ErrorBitmap, Direction::Ingress)?;
    let phv = h.sim.target(DEV, 1, 4, Block::PhvValid, Direction::Ingress)?;
    h.sim.fail_reads(bitmap, 1);
    h.sim.fail_reads(phv, 1);

    assert!(h.sim.fire(DEV, 1, 3, Direction::Ingress));
    wait_for_state(&h.hdl, snap, FsmState::Triggered).await?;
    let capture = snapshot::snapshot_capture_get(&h.hdl, snap, 1).await?;

    let s3 = &capture.stages[0];
    assert!(s3.error_bitmap.is_missing());
    assert!(s3.datapath_capture.valid().is_some());
    assert!(s3.phv.valid().is_some());

    let s4 = &capture.stages[1];
    assert!(s4.phv.is_missing());
    assert_eq!(s4.error_bitmap, Captured::Valid(0));
    assert!(s4.next_table_pred.valid().is_some());
    Ok(())
}

#[tokio::test]
async fn test_branch_prediction_absent_on_tofino1() -> anyhow::Result<()> {
    let h = harness(ChipFamily::Tofino1)?;
    let snap = snapshot::snapshot_create(
        &h.hdl,
        DEV,
        PipeScope::Pipe(0),
        0,
        0,
        Direction::Ingress,
    )?;
    snapshot::snapshot_state_set(&h.hdl, snap, true, 0).await?;
    h.sim.fill_capture(DEV, 0, 0, 1)?;
    // No trigger fields means any packet matches
    assert!(h.sim.inject(DEV, 0, 0, Direction::Ingress, &[]));
    wait_for_state(&h.hdl, snap, FsmState::Triggered).await?;

    let capture = snapshot::snapshot_capture_get(&h.hdl, snap, 0).await?;
    let stage = &capture.stages[0];
    assert_eq!(stage.next_table_pred, Captured::Absent);
    assert_eq!(stage.global_exec_pred, Captured::Absent);
    assert_eq!(stage.long_branch_pred, Captured::Absent);
    assert_eq!(capture.long_branch, Captured::Absent);
    assert!(stage.next_table_out.valid().is_some());
    assert!(stage.phv.valid().unwrap().all_valid());

    // Tofino1 has no ghost threads, and the key is too small for ipv6
    assert!(matches!(
        snapshot::snapshot_ingress_mode_set(
            &h.hdl,
            snap,
            snapshot::IngressMode::GhostOnly
        )
        .await,
        Err(AsicError::InvalidArg(_))
    ));
    snapshot::snapshot_state_set(&h.hdl, snap, false, 0).await?;
    assert!(matches!(
        snapshot::snapshot_trigger_add(
            &h.hdl,
            snap,
            "hdr.ipv6.dst_addr",
            &[1],
            &[1]
        )
        .await,
        Err(AsicError::Missing(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_long_branch_tofino3() -> anyhow::Result<()> {
    let mut dev = SimDevice::new(DEV, ChipFamily::Tofino3);
    dev.pipes = Some(vec![4, 5]);
    let h = harness_with(dev, quiet_config())?;
    let snap = armed_snapshot(&h, PipeScope::Pipe(1), 0, 2).await?;
    h.sim.fill_capture(DEV, 5, 2, 9)?;

    // Logical pipe 1 is physical pipe 5, on the second die
    let key = egress_port_key(ChipFamily::Tofino3, 2, 0x42);
    assert!(h.sim.inject(DEV, 5, 2, Direction::Ingress, &key));
    wait_for_state(&h.hdl, snap, FsmState::Triggered).await?;

    let capture = snapshot::snapshot_capture_get(&h.hdl, snap, 1).await?;
    let lb = capture.long_branch.valid().expect("long branch table");
    assert!(lb.terminate);
    assert_eq!(lb.src_tables[2], 2);
    assert_eq!(lb.lookup[7], 7);
    assert_eq!(capture.stages[2].next_table_pred_enabled, Captured::Valid(1));
    assert_eq!(
        capture.stages[2].phv.valid().unwrap().family,
        ChipFamily::Tofino3
    );
    Ok(())
}

#[tokio::test]
async fn test_slot_ownership() -> anyhow::Result<()> {
    let h = harness(ChipFamily::Tofino2)?;
    let create = |pipe, start, end, dir| {
        snapshot::snapshot_create(&h.hdl, DEV, pipe, start, end, dir)
    };
    let a = create(PipeScope::All, 2, 5, Direction::Ingress)?;
    let b = create(PipeScope::Pipe(1), 5, 6, Direction::Ingress)?;
    let c = create(PipeScope::Pipe(1), 2, 5, Direction::Egress)?;

    snapshot::snapshot_state_set(&h.hdl, a, true, 0).await?;
    assert!(matches!(
        snapshot::snapshot_state_set(&h.hdl, b, true, 0).await,
        Err(AsicError::InvalidArg(_))
    ));
    let status = snapshot::snapshot_state_get(&h.hdl, b).await?;
    assert_eq!(status.state, FsmState::Disabled);
    assert!(!status.enabled);

    // Egress is independent of ingress
    snapshot::snapshot_state_set(&h.hdl, c, true, 0).await?;
    assert!(h.sim.fire(DEV, 1, 3, Direction::Egress));
    wait_for_state(&h.hdl, c, FsmState::Triggered).await?;
    assert_eq!(
        snapshot::snapshot_state_get(&h.hdl, a).await?.state,
        FsmState::Armed
    );

    assert_eq!(
        snapshot::snapshot_handles_get(&h.hdl, Some(DEV))?,
        vec![a, b, c]
    );
    Ok(())
}

#[tokio::test]
async fn test_spurious_interrupt() -> anyhow::Result<()> {
    let h = harness(ChipFamily::Tofino2)?;
    let ctl = h.sim.target(DEV, 2, 7, Block::TriggerCtl, Direction::Ingress)?;
    h.sim.poke(ctl, &[TRIG_CTL_ENABLE]);
    assert!(h.sim.fire(DEV, 2, 7, Direction::Ingress));

    let event = wait_for_event(&h.hdl, EventKind::Spurious).await?;
    assert_eq!((event.pipe, event.stage), (2, 7));
    assert_eq!(event.snapshot, None);
    Ok(())
}

#[tokio::test]
async fn test_stale_interrupt_leaves_snapshot_armed() -> anyhow::Result<()> {
    let h = harness(ChipFamily::Tofino2)?;
    let snap = armed_snapshot(&h, PipeScope::Pipe(0), 0, 1).await?;

    // Nothing has latched in the slot, so there is nothing to capture
    let irq = AsicIrq::Snapshot {
        dev: DEV,
        pipe: 0,
        stage: 0,
        dir: Direction::Ingress,
    };
    interrupt::interrupt_service(&h.hdl, irq).await;
    let status = snapshot::snapshot_state_get(&h.hdl, snap).await?;
    assert_eq!(status.state, FsmState::Armed);
    assert!(status.trigger.is_none());
    let event = wait_for_event(&h.hdl, EventKind::Spurious).await?;
    assert_eq!(event.snapshot, Some(snap));
    assert_eq!((event.pipe, event.stage), (0, 0));

    // A real trigger is still caught
    assert!(h.sim.fire(DEV, 0, 0, Direction::Ingress));
    wait_for_state(&h.hdl, snap, FsmState::Triggered).await?;
    Ok(())
}

#[tokio::test]
async fn test_unreadable_status_left_for_scrub() -> anyhow::Result<()> {
    let h = harness(ChipFamily::Tofino2)?;
    let snap = armed_snapshot(&h, PipeScope::Pipe(0), 0, 0).await?;
    let status = h.sim.target(DEV, 0, 0, Block::Status, Direction::Ingress)?;

    h.sim.suppress_irqs(true);
    assert!(h.sim.fire(DEV, 0, 0, Direction::Ingress));
    h.sim.fail_reads(status, 1);
    let irq = AsicIrq::Snapshot {
        dev: DEV,
        pipe: 0,
        stage: 0,
        dir: Direction::Ingress,
    };
    interrupt::interrupt_service(&h.hdl, irq).await;

    // The trigger is neither captured nor cleared
    let state = snapshot::snapshot_state_get(&h.hdl, snap).await?;
    assert_eq!(state.state, FsmState::Armed);
    assert_ne!(h.sim.peek(status, 1)[0] & STATUS_LOCAL_TRIGGER, 0);
    assert!(events_get(&h.hdl, -1).is_empty());

    assert_eq!(interrupt::scrub(&h.hdl).await, 1);
    let state = snapshot::snapshot_state_get(&h.hdl, snap).await?;
    assert_eq!(state.state, FsmState::Triggered);
    assert!(!state.trigger.unwrap().forced);
    assert_eq!(h.sim.peek(status, 1)[0], 0);
    Ok(())
}

#[tokio::test]
async fn test_datapath_errors() -> anyhow::Result<()> {
    let h = harness(ChipFamily::Tofino2)?;
    let status =
        h.sim.target(DEV, 1, 2, Block::ErrorStatus, Direction::Ingress)?;

    // Without error interrupt mode the error is only cleared
    h.sim.raise_error(DEV, 1, 2, 0x4)?;
    wait_for_word(&h.sim, status, 0).await?;
    assert!(events_get(&h.hdl, -1).is_empty());

    interrupt::interrupt_mode_set(&h.hdl, DEV, true).await?;
    let ctl = h.sim.target(DEV, 3, 0, Block::ErrorCtl, Direction::Ingress)?;
    assert_eq!(h.sim.peek(ctl, 1)[0], 1);
    assert!(device::device_view(&h.hdl, DEV)?.err_int_mode);

    h.sim.raise_error(DEV, 1, 2, 0x6)?;
    let event = wait_for_event(&h.hdl, EventKind::DatapathError).await?;
    assert_eq!((event.pipe, event.stage, event.dir), (1, 2, None));
    assert!(event.detail.contains("0x6"));
    wait_for_word(&h.sim, status, 0).await?;
    Ok(())
}

#[tokio::test]
async fn test_dumps() -> anyhow::Result<()> {
    let h = harness(ChipFamily::Tofino2)?;
    let snap = armed_snapshot(&h, PipeScope::Pipe(0), 0, 0).await?;

    let mut small = [0u8; 8];
    let needed =
        match snapshot::snapshot_state_dump(&h.hdl, snap, &mut small).await {
            Err(AsicError::BufferTooSmall { needed }) => needed,
            other => panic!("expected BufferTooSmall, got {other:?}"),
        };
    assert_eq!(small, [0u8; 8]);

    let mut buf = vec![0u8; needed];
    let n = snapshot::snapshot_state_dump(&h.hdl, snap, &mut buf).await?;
    assert_eq!(n, needed);
    let json: serde_json::Value = serde_json::from_slice(&buf)?;
    assert_eq!(json["state"], "armed");

    let mut buf = vec![0u8; 4096];
    let n = snapshot::snapshot_cfg_dump(&h.hdl, snap, &mut buf).await?;
    let json: serde_json::Value = serde_json::from_slice(&buf[..n])?;
    assert_eq!(json["triggers"][0]["name"], "egress_port");
    assert_eq!(json["cfg"]["dir"], "ingress");

    // No capture yet
    assert!(matches!(
        snapshot::snapshot_capture_dump(&h.hdl, snap, 0, &mut buf).await,
        Err(AsicError::Missing(_))
    ));

    let key = egress_port_key(ChipFamily::Tofino2, 0, 0x42);
    assert!(h.sim.inject(DEV, 0, 0, Direction::Ingress, &key));
    wait_for_state(&h.hdl, snap, FsmState::Triggered).await?;
    wait_for_event(&h.hdl, EventKind::Triggered).await?;

    let mut buf = vec![0u8; 1 << 20];
    let n =
        snapshot::snapshot_capture_dump(&h.hdl, snap, 0, &mut buf).await?;
    let json: serde_json::Value = serde_json::from_slice(&buf[..n])?;
    assert_eq!(json["stages"][0]["triggers"]["status"], "valid");
    assert_eq!(json["stages"][0]["triggers"]["value"]["local"], true);

    let n = snapshot::events_dump(&h.hdl, -1, &mut buf)?;
    let json: serde_json::Value = serde_json::from_slice(&buf[..n])?;
    assert_eq!(json[0]["kind"], "triggered");

    let n = snapshot::snapshot_handles_dump(&h.hdl, None, &mut buf)?;
    let handles: Vec<u32> = serde_json::from_slice(&buf[..n])?;
    assert_eq!(handles, vec![snap.as_raw()]);
    Ok(())
}

#[tokio::test]
async fn test_dbg_counters() -> anyhow::Result<()> {
    use asic::dbg_counter;
    use asic::dbg_counter::DbgCounterType;

    let h = harness(ChipFamily::Tofino2)?;
    let counter = dbg_counter::dbg_counter_get(&h.hdl, DEV, 2, 1, 3).await?;
    assert_eq!(counter.kind, None);
    assert_eq!(counter.value, 0);

    dbg_counter::dbg_counter_type_set(
        &h.hdl,
        DEV,
        PipeScope::All,
        1,
        3,
        DbgCounterType::TableHit,
    )
    .await?;
    let ctl =
        h.sim.target(DEV, 2, 1, Block::DbgCounterCtl, Direction::Ingress)?;
    assert_eq!(h.sim.peek(ctl.offset(3), 1)[0], 2);

    let value =
        h.sim.target(DEV, 2, 1, Block::DbgCounterValue, Direction::Ingress)?;
    h.sim.poke(value.offset(3), &[1234]);
    let counter = dbg_counter::dbg_counter_get(&h.hdl, DEV, 2, 1, 3).await?;
    assert_eq!(counter.kind, Some(DbgCounterType::TableHit));
    assert_eq!(counter.value, 1234);

    let all = dbg_counter::dbg_counter_stage_get(&h.hdl, DEV, 2, 1).await?;
    assert_eq!(all.len(), 16);
    assert_eq!(all[3], counter);
    assert_eq!(all[4].kind, None);

    dbg_counter::dbg_counter_clear(&h.hdl, DEV, PipeScope::Pipe(2), 1, 3)
        .await?;
    let counter = dbg_counter::dbg_counter_get(&h.hdl, DEV, 2, 1, 3).await?;
    assert_eq!(counter.value, 0);
    assert_eq!(counter.kind, Some(DbgCounterType::TableHit));

    assert!(matches!(
        dbg_counter::dbg_counter_get(&h.hdl, DEV, 2, 1, 16).await,
        Err(AsicError::InvalidArg(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_device_remove() -> anyhow::Result<()> {
    let h = harness(ChipFamily::Tofino2)?;
    let armed = armed_snapshot(&h, PipeScope::All, 0, 1).await?;
    let idle = snapshot::snapshot_create(
        &h.hdl,
        DEV,
        PipeScope::All,
        4,
        4,
        Direction::Egress,
    )?;
    let ctl = h.sim.target(DEV, 3, 1, Block::TriggerCtl, Direction::Ingress)?;
    assert_ne!(h.sim.peek(ctl, 1)[0], 0);

    device::device_remove(&h.hdl, DEV).await?;
    assert!(device::devices_list(&h.hdl).is_empty());
    assert_eq!(h.sim.peek(ctl, 1)[0], 0);
    for snap in [armed, idle] {
        assert!(matches!(
            snapshot::snapshot_state_get(&h.hdl, snap).await,
            Err(AsicError::Missing(_))
        ));
    }
    assert!(matches!(
        device::device_remove(&h.hdl, DEV).await,
        Err(AsicError::Missing(_))
    ));

    // And it can come back
    device::device_add(&h.hdl, DEV)?;
    assert!(snapshot::snapshot_handles_get(&h.hdl, None)?.is_empty());
    Ok(())
}

mod mock {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;

    use aal::ReadCompletion;
    use aal::RegisterOps;
    use aal::WriteCompletion;
    use asic::Backend;
    use tokio::sync::oneshot;

    mockall::mock! {
        pub Regs {}
        impl RegisterOps for Regs {
            fn read(&self, target: RegTarget, words: usize) -> ReadCompletion;
            fn write(
                &self,
                target: RegTarget,
                data: Vec<u32>,
            ) -> WriteCompletion;
        }
    }

    fn handle(regs: MockRegs, config: AsicConfig) -> anyhow::Result<Handle> {
        let log = common::logging::test_logger();
        let sim = SimAsic::new(&log);
        sim.add_device(&SimDevice::new(DEV, ChipFamily::Tofino2))?;
        let backend = Backend {
            regs: Arc::new(regs),
            ..sim.backend()
        };
        let hdl = Handle::new(&log, config, backend)?;
        device::device_add(&hdl, DEV)?;
        Ok(hdl)
    }

    #[tokio::test]
    async fn test_failed_arm_rolls_back() -> anyhow::Result<()> {
        let mut regs = MockRegs::new();
        regs.expect_read().never();
        regs.expect_write().returning(|target, _| {
            let (tx, rx) = oneshot::channel();
            let _ = tx.send(Err(AsicError::busy(target, "engine busy")));
            rx
        });
        let hdl = handle(regs, quiet_config())?;
        let before = device::device_view(&hdl, DEV)?;

        let snap = snapshot::snapshot_create(
            &hdl,
            DEV,
            PipeScope::All,
            0,
            3,
            Direction::Ingress,
        )?;
        let err = snapshot::snapshot_state_set(&hdl, snap, true, 100)
            .await
            .unwrap_err();
        assert!(err.is_transient());

        let status = snapshot::snapshot_state_get(&hdl, snap).await?;
        assert_eq!(status.state, FsmState::Disabled);
        assert!(!status.enabled);

        // Deleting still succeeds, and the slots were never kept
        snapshot::snapshot_delete(&hdl, snap).await?;
        assert_eq!(device::device_view(&hdl, DEV)?, before);
        Ok(())
    }

    #[tokio::test]
    async fn test_write_timeout() -> anyhow::Result<()> {
        // Hold on to the senders so the completions never arrive
        let pending = Arc::new(Mutex::new(Vec::new()));
        let held = pending.clone();
        let mut regs = MockRegs::new();
        regs.expect_write().returning(move |_, _| {
            let (tx, rx) = oneshot::channel();
            held.lock().unwrap().push(tx);
            rx
        });
        let config = AsicConfig {
            write_timeout_ms: 20,
            ..quiet_config()
        };
        let hdl = handle(regs, config)?;

        let snap = snapshot::snapshot_create(
            &hdl,
            DEV,
            PipeScope::Pipe(0),
            0,
            0,
            Direction::Ingress,
        )?;
        assert!(matches!(
            snapshot::snapshot_state_set(&hdl, snap, true, 0).await,
            Err(AsicError::HardwareBusy { .. })
        ));
        assert!(!pending.lock().unwrap().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_dropped_completion() -> anyhow::Result<()> {
        let mut regs = MockRegs::new();
        regs.expect_read().returning(|_, _| {
            let (_, rx) = oneshot::channel();
            rx
        });
        let hdl = handle(regs, quiet_config())?;
        assert!(matches!(
            asic::dbg_counter::dbg_counter_get(&hdl, DEV, 0, 0, 0).await,
            Err(AsicError::HardwareBusy { .. })
        ));
        Ok(())
    }
    #[tokio::test]
    async fn test_scrub_rechecks_status_under_lock() -> anyhow::Result<()> {
        // The unlocked poll sees a latched trigger that is gone by the time
        // the slot is locked
        let reads = Arc::new(AtomicUsize::new(0));
        let counted = reads.clone();
        let mut regs = MockRegs::new();
        regs.expect_write().returning(|_, _| {
            let (tx, rx) = oneshot::channel();
            let _ = tx.send(Ok(()));
            rx
        });
        regs.expect_read().returning(move |_, words| {
            let status = match counted.fetch_add(1, Ordering::SeqCst) {
                0 => STATUS_LOCAL_TRIGGER,
                _ => 0,
            };
            let (tx, rx) = oneshot::channel();
            let _ = tx.send(Ok(vec![status; words]));
            rx
        });
        let hdl = handle(regs, quiet_config())?;

        let snap = snapshot::snapshot_create(
            &hdl,
            DEV,
            PipeScope::Pipe(0),
            0,
            0,
            Direction::Ingress,
        )?;
        snapshot::snapshot_state_set(&hdl, snap, true, 0).await?;

        assert_eq!(interrupt::scrub(&hdl).await, 0);
        assert_eq!(reads.load(Ordering::SeqCst), 2);
        let status = snapshot::snapshot_state_get(&hdl, snap).await?;
        assert_eq!(status.state, FsmState::Armed);
        assert!(status.trigger.is_none());
        assert!(events_get(&hdl, -1).is_empty());
        Ok(())
    }
}
