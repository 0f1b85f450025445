// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Waiting on register engine completions.
//!
//! The register engine only queues requests.  Everything here issues the
//! whole batch first, then waits for all of the completions against a single
//! deadline, so a wedged engine costs one timeout rather than one per
//! register.

use futures::future::join_all;
use tokio::time::timeout_at;
use tokio::time::Instant;

use aal::AsicError;
use aal::AsicResult;
use aal::ReadCompletion;
use aal::RegTarget;
use aal::WriteCompletion;

use crate::Handle;

/// Wait for one read to complete, checking that the engine returned the
/// number of words we asked for.
pub(crate) async fn wait_read(
    target: RegTarget,
    words: usize,
    rx: ReadCompletion,
    deadline: Instant,
) -> AsicResult<Vec<u32>> {
    let data = match timeout_at(deadline, rx).await {
        Ok(Ok(result)) => result?,
        Ok(Err(_)) => {
            return Err(AsicError::busy(
                format!("read {target}"),
                "completion dropped",
            ))
        }
        Err(_) => {
            return Err(AsicError::busy(format!("read {target}"), "timed out"))
        }
    };
    if data.len() != words {
        return Err(AsicError::Internal(format!(
            "read {target}: expected {words} words, got {}",
            data.len()
        )));
    }
    Ok(data)
}

pub(crate) async fn wait_write(
    target: RegTarget,
    rx: WriteCompletion,
    deadline: Instant,
) -> AsicResult<()> {
    match timeout_at(deadline, rx).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(AsicError::busy(
            format!("write {target}"),
            "completion dropped",
        )),
        Err(_) => Err(AsicError::busy(format!("write {target}"), "timed out")),
    }
}

/// Read a single block.
pub(crate) async fn read(
    hdl: &Handle,
    target: RegTarget,
    words: usize,
) -> AsicResult<Vec<u32>> {
    let deadline = Instant::now() + hdl.config.read_timeout();
    let rx = hdl.regs.read(target, words);
    wait_read(target, words, rx, deadline).await
}

/// Write a single block.
pub(crate) async fn write(
    hdl: &Handle,
    target: RegTarget,
    data: Vec<u32>,
) -> AsicResult<()> {
    let deadline = Instant::now() + hdl.config.write_timeout();
    let rx = hdl.regs.write(target, data);
    wait_write(target, rx, deadline).await
}

/// Issue a batch of writes and wait for all of them.  Every write is waited
/// for even if an earlier one failed; the first failure is returned.
pub(crate) async fn write_all(
    hdl: &Handle,
    writes: Vec<(RegTarget, Vec<u32>)>,
) -> AsicResult<()> {
    let deadline = Instant::now() + hdl.config.write_timeout();
    let pending: Vec<_> = writes
        .into_iter()
        .map(|(target, data)| (target, hdl.regs.write(target, data)))
        .collect();

    join_all(
        pending
            .into_iter()
            .map(|(target, rx)| wait_write(target, rx, deadline)),
    )
    .await
    .into_iter()
    .collect::<AsicResult<Vec<()>>>()
    .map(|_| ())
}
