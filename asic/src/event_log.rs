// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! A bounded history of snapshot and datapath-error interrupts.
//!
//! Interrupts are serviced asynchronously and nobody is waiting on them, so
//! the only way an operator can find out that a trigger fired, that the
//! watchdog expired, or that a clear kept failing is by looking here after
//! the fact.

use std::collections::VecDeque;

use chrono::DateTime;
use chrono::Utc;
use schemars::JsonSchema;
use serde::Serialize;

use aal::DevId;
use aal::Direction;

use crate::snapshot::SnapshotHdl;
use crate::Handle;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, JsonSchema, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    /// A trigger condition matched and the capture was read back.
    Triggered,
    /// The watchdog expired before the trigger condition matched.
    Watchdog,
    /// A scrub pass found a trigger whose interrupt was never serviced.
    ScrubRecovered,
    /// A snapshot interrupt arrived for a slot no armed snapshot owns.
    Spurious,
    /// The interrupt condition could not be cleared in hardware.
    ClearFailed,
    /// The operator cleared a snapshot interrupt by hand.
    Cleared,
    /// A stage reported a datapath error.
    DatapathError,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, JsonSchema)]
pub struct Event {
    /// Monotonically increasing over the life of the Handle.
    pub seq: u64,
    pub time: DateTime<Utc>,
    pub kind: EventKind,
    pub dev: DevId,
    /// Logical pipe.
    pub pipe: u32,
    pub stage: u8,
    pub dir: Option<Direction>,
    pub snapshot: Option<SnapshotHdl>,
    pub detail: String,
}

/// The interesting parts of an event, before it is stamped and sequenced.
#[derive(Clone, Debug)]
pub struct EventInfo {
    pub kind: EventKind,
    pub dev: DevId,
    pub pipe: u32,
    pub stage: u8,
    pub dir: Option<Direction>,
    pub snapshot: Option<SnapshotHdl>,
    pub detail: String,
}

pub struct EventLog {
    depth: usize,
    next_seq: u64,
    events: VecDeque<Event>,
}

impl EventLog {
    /// A log retaining the last `depth` events, and never fewer than one.
    pub fn new(depth: usize) -> Self {
        let depth = depth.max(1);
        EventLog {
            depth,
            next_seq: 0,
            events: VecDeque::with_capacity(depth),
        }
    }

    /// Append an event, discarding the oldest if the log is full.
    pub fn record(&mut self, info: EventInfo) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        if self.events.len() >= self.depth {
            self.events.pop_front();
        }
        self.events.push_back(Event {
            seq,
            time: Utc::now(),
            kind: info.kind,
            dev: info.dev,
            pipe: info.pipe,
            stage: info.stage,
            dir: info.dir,
            snapshot: info.snapshot,
            detail: info.detail,
        });
        seq
    }

    /// Return up to `count` of the most recent events, oldest first.  A
    /// negative count returns everything retained.
    pub fn get(&self, count: i64) -> Vec<Event> {
        let count = match usize::try_from(count) {
            Ok(c) => c.min(self.events.len()),
            Err(_) => self.events.len(),
        };
        let skip = self.events.len() - count;
        self.events.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

pub(crate) fn record(hdl: &Handle, info: EventInfo) {
    let seq = hdl.events_get().record(info);
    slog::trace!(hdl.log, "recorded event"; "seq" => seq);
}

/// Fetch recent interrupt events.  See `EventLog::get`.
pub fn events_get(hdl: &Handle, count: i64) -> Vec<Event> {
    hdl.events_get().get(count)
}
