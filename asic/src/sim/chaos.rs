// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

use rand::random;
use serde::Deserialize;
use serde::Serialize;
use slog::Logger;

use aal::AsicError;
use aal::AsicResult;

/// Chaos that happens according to a probability.
#[derive(Default, Debug, Serialize, Deserialize, Copy, Clone, PartialEq)]
pub struct Chaos {
    /// A probability between 0.0 and 1.0
    pub value: f64,
}

impl Chaos {
    /// Create a new chaos value.
    pub fn new(value: f64) -> AsicResult<Self> {
        let mut c = Self::default();
        c.set(value)?;
        Ok(c)
    }

    /// Set the chaos value, which must be in the range [0.0, 1.0].
    pub fn set(&mut self, value: f64) -> AsicResult<()> {
        if !(0.0..=1.0).contains(&value) {
            return Err(AsicError::InvalidArg(format!(
                "probability {value} out of range"
            )));
        }
        self.value = value;
        Ok(())
    }

    /// Get the underlying chaos value.
    pub fn get(&self) -> f64 {
        self.value
    }

    /// Return a transient register error according to the underlying
    /// probability value.
    pub fn unfurled(&self, log: &Logger, message: &str) -> AsicResult<()> {
        if self.value > 0.0 && self.value >= random() {
            slog::debug!(log, "chaos error: {}", message);
            return Err(AsicError::busy(message, "chaos"));
        }
        Ok(())
    }
}
