// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Formatting snapshot state into caller-supplied buffers.
//!
//! Every dump either writes its complete JSON rendering and returns the
//! number of bytes used, or writes nothing at all and returns
//! `BufferTooSmall` with the size the caller needs to retry with.

use serde::Serialize;

use aal::AsicError;
use aal::AsicResult;
use aal::DevId;

use super::snapshot_capture_get;
use super::snapshot_config_get;
use super::snapshot_handles_get;
use super::snapshot_state_get;
use super::SnapshotHdl;
use crate::event_log::events_get;
use crate::Handle;

fn emit<T: Serialize>(value: &T, buf: &mut [u8]) -> AsicResult<usize> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| AsicError::Internal(format!("formatting: {e}")))?;
    let needed = bytes.len();
    match buf.get_mut(..needed) {
        Some(dst) => {
            dst.copy_from_slice(&bytes);
            Ok(needed)
        }
        None => Err(AsicError::BufferTooSmall { needed }),
    }
}

pub async fn snapshot_state_dump(
    hdl: &Handle,
    snap: SnapshotHdl,
    buf: &mut [u8],
) -> AsicResult<usize> {
    emit(&snapshot_state_get(hdl, snap).await?, buf)
}

pub async fn snapshot_cfg_dump(
    hdl: &Handle,
    snap: SnapshotHdl,
    buf: &mut [u8],
) -> AsicResult<usize> {
    emit(&snapshot_config_get(hdl, snap).await?, buf)
}

pub async fn snapshot_capture_dump(
    hdl: &Handle,
    snap: SnapshotHdl,
    pipe: u32,
    buf: &mut [u8],
) -> AsicResult<usize> {
    emit(&snapshot_capture_get(hdl, snap, pipe).await?, buf)
}

pub fn snapshot_handles_dump(
    hdl: &Handle,
    dev: Option<DevId>,
    buf: &mut [u8],
) -> AsicResult<usize> {
    emit(&snapshot_handles_get(hdl, dev)?, buf)
}

pub fn events_dump(
    hdl: &Handle,
    count: i64,
    buf: &mut [u8],
) -> AsicResult<usize> {
    emit(&events_get(hdl, count), buf)
}
