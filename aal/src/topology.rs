// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

use crate::AsicError;
use crate::AsicResult;

/// Identifies a single ASIC attached to this host.
pub type DevId = u8;

/// There are three generations of the Tofino ASIC, which the SDE refers to as
/// "families".  They share a pipeline model but differ in register layout,
/// PHV geometry, and in whether they implement branch prediction and ghost
/// threads.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Deserialize,
    Serialize,
    JsonSchema,
    strum::EnumString,
    strum::Display,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChipFamily {
    Tofino1,
    Tofino2,
    Tofino3,
}

/// Pipeline direction.
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
    strum::EnumString,
    strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Direction {
    Ingress,
    Egress,
}

impl Direction {
    pub fn as_raw(self) -> u32 {
        match self {
            Direction::Ingress => 0,
            Direction::Egress => 1,
        }
    }
}

/// The set of logical pipes a snapshot or counter operation applies to.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum PipeScope {
    All,
    Pipe(u32),
}

impl PipeScope {
    /// The raw pipe id callers use to mean "every pipe on the device".
    pub const ALL_PIPES: u32 = 0xffff;

    pub fn from_raw(pipe: u32) -> Self {
        match pipe {
            PipeScope::ALL_PIPES => PipeScope::All,
            p => PipeScope::Pipe(p),
        }
    }

    pub fn as_raw(self) -> u32 {
        match self {
            PipeScope::All => PipeScope::ALL_PIPES,
            PipeScope::Pipe(p) => p,
        }
    }

    /// Does this scope include the given logical pipe?
    pub fn contains(&self, pipe: u32) -> bool {
        match self {
            PipeScope::All => true,
            PipeScope::Pipe(p) => *p == pipe,
        }
    }
}

impl fmt::Display for PipeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipeScope::All => write!(f, "all"),
            PipeScope::Pipe(p) => write!(f, "{p}"),
        }
    }
}

impl FromStr for PipeScope {
    type Err = AsicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(PipeScope::All);
        }
        s.parse::<u32>()
            .map(PipeScope::from_raw)
            .map_err(|_| AsicError::InvalidArg(format!("invalid pipe: {s}")))
    }
}

/// What the topology layer knows about a single device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub family: ChipFamily,
    /// Physical pipe id for each active logical pipe, indexed by the logical
    /// pipe id.
    pub pipes: Vec<u32>,
    /// Number of active match-action stages in each pipe.
    pub stages: u8,
}

/// Device and pipe topology.
pub trait Topology: Send + Sync {
    /// Describe a device.  Fails with `Missing` for unknown devices.
    fn device_info(&self, dev: DevId) -> AsicResult<DeviceInfo>;
}

/// The position of a field within a stage's trigger key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, JsonSchema)]
pub struct FieldInfo {
    /// Bit offset of the field's least-significant bit.
    pub offset: u32,
    /// Width of the field in bits, at most 128.
    pub width: u32,
}

/// The register/field metadata dictionary mapping the names used by the P4
/// program onto positions in each stage's trigger key.
pub trait FieldDictionary: Send + Sync {
    /// Find `name` in the trigger key of `stage`.  Returns `None` if the field
    /// is not in scope at that stage.
    fn resolve_field(
        &self,
        family: ChipFamily,
        stage: u8,
        name: &str,
    ) -> Option<FieldInfo>;
}
