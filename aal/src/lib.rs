// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! The ASIC abstraction layer.
//!
//! This crate defines the vocabulary shared between the snapshot subsystem in
//! the `asic` crate and the collaborators it is built on: the register/DMA
//! engine, the device topology, the field dictionary, and the interrupt
//! source.  A real driver and the simulator in `asic::sim` both implement
//! these traits.

use thiserror::Error;

mod regs;
pub use regs::*;

mod topology;
pub use topology::*;

/// A specialized Result type for ASIC operations
pub type AsicResult<T> = Result<T, AsicError>;

/// Error type conveying additional information about ASIC errors
#[derive(Error, Debug)]
pub enum AsicError {
    /// An argument passed to the ASIC layer is invalid or inappropriate.  This
    /// indicates misbehavior from the caller, and is never retried.
    #[error("Invalid argument: {}", .0)]
    InvalidArg(String),
    /// A general indication that a caller is trying to use something that
    /// is not present: a stale snapshot handle, an unregistered device, or a
    /// field name the dictionary cannot resolve.
    #[error("Missing: {}", .0)]
    Missing(String),
    /// A transient failure reported by the register engine, or a completion
    /// that did not arrive before its deadline.
    #[error("Hardware busy at {ctx}: {err}")]
    HardwareBusy { ctx: String, err: String },
    /// Allocation failed while building per-device shadow state.
    #[error("Resource exhausted: {}", .0)]
    ResourceExhausted(String),
    /// The caller-supplied buffer cannot hold the formatted result.  Nothing
    /// was written; retry with at least `needed` bytes.
    #[error("Buffer too small: {needed} bytes needed")]
    BufferTooSmall { needed: usize },
    /// A configuration file could not be parsed.
    #[error("Invalid configuration: {}", .0)]
    Config(String),
    /// The ASIC encountered an error when interacting with the local file
    /// system.
    #[error("IO error: {ctx}: {err}")]
    Io { ctx: String, err: std::io::Error },
    /// The ASIC layer detected some internal inconsistency
    #[error("Internal error: {}", .0)]
    Internal(String),
}

impl AsicError {
    /// Build a HardwareBusy error for the given context.
    pub fn busy(ctx: impl ToString, err: impl ToString) -> Self {
        AsicError::HardwareBusy {
            ctx: ctx.to_string(),
            err: err.to_string(),
        }
    }

    /// Is this a transient register-access failure that may succeed if
    /// retried?
    pub fn is_transient(&self) -> bool {
        matches!(self, AsicError::HardwareBusy { .. })
    }
}
