// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Trigger fields and the compare keys built from them.

use schemars::JsonSchema;
use serde::Serialize;
use slog::debug;

use aal::AsicError;
use aal::AsicResult;
use aal::FieldInfo;

use super::lock;
use super::FsmState;
use super::SnapshotHdl;
use crate::Handle;

/// Widest field a trigger can compare against.
pub const MAX_FIELD_BITS: u32 = 128;

/// Normalize a P4 field name to the form stored in the field dictionary,
/// which replaces `.`, `[`, `]`, and `$` with `_`.
pub fn normalize_field_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '.' | '[' | ']' | '$' => '_',
            other => other,
        })
        .collect()
}

/// One compare term of a snapshot's trigger condition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct TriggerField {
    pub name: String,
    pub value: u128,
    pub mask: u128,
    /// Where the field sits in each stage's key, starting at the snapshot's
    /// start stage.
    pub placement: Vec<FieldInfo>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, JsonSchema)]
pub struct TriggerFieldView {
    pub name: String,
    pub value: String,
    pub mask: String,
    pub width: u32,
}

impl From<&TriggerField> for TriggerFieldView {
    fn from(f: &TriggerField) -> Self {
        TriggerFieldView {
            name: f.name.clone(),
            value: format!("{:#x}", f.value),
            mask: format!("{:#x}", f.mask),
            width: f.placement.first().map(|p| p.width).unwrap_or(0),
        }
    }
}

// Big-endian bytes, right-aligned, as they are written in the P4 program.
fn bytes_to_u128(what: &str, bytes: &[u8]) -> AsicResult<u128> {
    if bytes.len() > (MAX_FIELD_BITS / 8) as usize {
        return Err(AsicError::InvalidArg(format!(
            "{what} is {} bytes, at most {} supported",
            bytes.len(),
            MAX_FIELD_BITS / 8
        )));
    }
    Ok(bytes.iter().fold(0u128, |acc, b| (acc << 8) | *b as u128))
}

fn check_width(what: &str, v: u128, width: u32) -> AsicResult<()> {
    if width < MAX_FIELD_BITS && (v >> width) != 0 {
        return Err(AsicError::InvalidArg(format!(
            "{what} {v:#x} does not fit in {width} bits"
        )));
    }
    Ok(())
}

/// Add a field to a snapshot's trigger condition, or replace the value and
/// mask of a field already present.
///
/// `value` and `mask` are big-endian byte slices (MSB first), right-aligned
/// within the field, so a 2-byte slice may be passed for a 9-bit field.
pub async fn snapshot_trigger_add(
    hdl: &Handle,
    snap: SnapshotHdl,
    field: &str,
    value: &[u8],
    mask: &[u8],
) -> AsicResult<()> {
    let value = bytes_to_u128("value", value)?;
    let mask = bytes_to_u128("mask", mask)?;
    let name = normalize_field_name(field);

    let (device, mut state) = lock(hdl, snap).await?;
    if state.fsm != FsmState::Disabled {
        return Err(AsicError::InvalidArg(format!(
            "snapshot {snap} must be disabled to change its trigger"
        )));
    }

    let family = device.family();
    let mut placement = Vec::new();
    for stage in state.cfg.start_stage..=state.cfg.end_stage {
        let info = hdl
            .dictionary
            .resolve_field(family, stage, &name)
            .ok_or_else(|| {
                AsicError::Missing(format!(
                    "field {field} not found in stage {stage}"
                ))
            })?;
        if info.width == 0
            || info.width > MAX_FIELD_BITS
            || (info.offset + info.width) as usize
                > 32 * device.layout().trigger_key_words()
        {
            return Err(AsicError::Internal(format!(
                "dictionary placed {name} at {}/{} in stage {stage}",
                info.offset, info.width
            )));
        }
        check_width("value", value, info.width)?;
        check_width("mask", mask, info.width)?;
        placement.push(info);
    }

    let new = TriggerField {
        name,
        value,
        mask,
        placement,
    };
    match state.triggers.iter_mut().find(|f| f.name == new.name) {
        Some(old) => *old = new,
        None => state.triggers.push(new),
    }
    debug!(hdl.log, "trigger field set";
        "snapshot" => %snap,
        "field" => field,
        "value" => format!("{value:#x}"),
        "mask" => format!("{mask:#x}"));
    Ok(())
}

/// Remove every field from a snapshot's trigger.  With no fields, the
/// snapshot triggers on any packet reaching its stage range.
pub async fn snapshot_triggers_clear(
    hdl: &Handle,
    snap: SnapshotHdl,
) -> AsicResult<()> {
    let (_device, mut state) = lock(hdl, snap).await?;
    if state.fsm != FsmState::Disabled {
        return Err(AsicError::InvalidArg(format!(
            "snapshot {snap} must be disabled to change its trigger"
        )));
    }
    state.triggers.clear();
    debug!(hdl.log, "trigger fields cleared"; "snapshot" => %snap);
    Ok(())
}

/// Set the `width` bits of `v` into `words` starting at bit `offset`.
pub(crate) fn place(words: &mut [u32], offset: u32, width: u32, v: u128) {
    for bit in 0..width {
        if (v >> bit) & 1 == 1 {
            let pos = (offset + bit) as usize;
            words[pos / 32] |= 1 << (pos % 32);
        }
    }
}

/// Build the compare value and mask words for one stage.  `idx` is the
/// stage's position within the snapshot's range.
pub(crate) fn compose_key(
    triggers: &[TriggerField],
    idx: usize,
    key_words: usize,
) -> (Vec<u32>, Vec<u32>) {
    let mut value = vec![0u32; key_words];
    let mut mask = vec![0u32; key_words];
    for f in triggers {
        let info = f.placement[idx];
        place(&mut value, info.offset, info.width, f.value & f.mask);
        place(&mut mask, info.offset, info.width, f.mask);
    }
    (value, mask)
}
