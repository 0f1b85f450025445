// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! The pipeline snapshot subsystem.
//!
//! An operator arms a trigger condition on PHV fields over a range of
//! match-action stages.  When a packet satisfies the condition, the ASIC
//! freezes the per-stage execution state and raises an interrupt.  The
//! interrupt handler reads back the frozen registers and decodes them into a
//! `CaptureData` that looks the same regardless of which Tofino generation
//! produced it.
//!
//! All operations are free functions taking the `Handle`, grouped by module:
//! `device` for registering ASICs, `snapshot` for the snapshot lifecycle,
//! `interrupt` for the interrupt and scrub machinery, and `dbg_counter` for
//! the per-table debug counters that share the same addressing.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use slog::o;

use aal::AsicResult;
use aal::DevId;
use aal::FieldDictionary;
use aal::RegisterOps;
use aal::Topology;

pub mod chip;
pub mod config;
pub mod dbg_counter;
pub mod device;
pub mod event_log;
pub mod interrupt;
mod regio;
pub mod sim;
pub mod snapshot;

pub use config::AsicConfig;

/// The collaborators the snapshot subsystem is built on.
#[derive(Clone)]
pub struct Backend {
    pub regs: Arc<dyn RegisterOps>,
    pub topology: Arc<dyn Topology>,
    pub dictionary: Arc<dyn FieldDictionary>,
}

/// The root of the snapshot subsystem's state.  A single Handle serves every
/// registered device.
pub struct Handle {
    log: slog::Logger,
    config: AsicConfig,
    regs: Arc<dyn RegisterOps>,
    topology: Arc<dyn Topology>,
    dictionary: Arc<dyn FieldDictionary>,
    devices: Mutex<BTreeMap<DevId, Arc<device::Device>>>,
    events: Mutex<event_log::EventLog>,
}

impl Handle {
    /// Build a Handle, refusing a config that fails
    /// `AsicConfig::validate`.
    pub fn new(
        log: &slog::Logger,
        config: AsicConfig,
        backend: Backend,
    ) -> AsicResult<Self> {
        config.validate()?;
        let events = event_log::EventLog::new(config.event_log_depth);
        Ok(Handle {
            log: log.new(o!("unit" => "snapshot")),
            config,
            regs: backend.regs,
            topology: backend.topology,
            dictionary: backend.dictionary,
            devices: Mutex::new(BTreeMap::new()),
            events: Mutex::new(events),
        })
    }

    pub fn config(&self) -> &AsicConfig {
        &self.config
    }

    pub fn log(&self) -> &slog::Logger {
        &self.log
    }

    pub(crate) fn devices_get(
        &self,
    ) -> MutexGuard<'_, BTreeMap<DevId, Arc<device::Device>>> {
        self.devices.lock().unwrap()
    }

    pub(crate) fn events_get(&self) -> MutexGuard<'_, event_log::EventLog> {
        self.events.lock().unwrap()
    }
}
