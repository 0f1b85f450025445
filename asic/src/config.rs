// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Tunables for the snapshot subsystem.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use aal::AsicError;
use aal::AsicResult;

/// The most attempts `clear_retries` may ask for.
pub const MAX_CLEAR_RETRIES: u32 = 16;

/// The following are the run-time settings for the snapshot subsystem.  Any
/// setting missing from the config file takes its default value.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AsicConfig {
    /// How often the scrub timer re-polls the snapshot status registers.
    /// Zero disables the scrub timer.
    pub scrub_interval_ms: u64,

    /// Number of interrupt/error events retained for postmortem retrieval.
    pub event_log_depth: usize,

    /// How long a capture waits for all of its register reads to complete.
    pub read_timeout_ms: u64,

    /// How long a state change waits for its register writes to complete.
    pub write_timeout_ms: u64,

    /// Attempts made to clear a snapshot interrupt before leaving it for the
    /// next scrub pass.
    pub clear_retries: u32,

    /// Delay before the first clear retry.  Each subsequent retry doubles it.
    pub clear_backoff_ms: u64,
}

impl Default for AsicConfig {
    fn default() -> Self {
        AsicConfig {
            scrub_interval_ms: 1000,
            event_log_depth: 128,
            read_timeout_ms: 500,
            write_timeout_ms: 500,
            clear_retries: 5,
            clear_backoff_ms: 1,
        }
    }
}

impl AsicConfig {
    /// Parse a config from its TOML representation.
    pub fn from_toml(s: &str) -> AsicResult<Self> {
        let config: AsicConfig =
            toml::from_str(s).map_err(|e| AsicError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> AsicResult<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|err| AsicError::Io {
                ctx: format!("reading {}", path.display()),
                err,
            })?;
        Self::from_toml(&contents)
    }

    /// Reject settings the subsystem cannot run with.
    pub fn validate(&self) -> AsicResult<()> {
        if self.event_log_depth == 0 {
            return Err(AsicError::Config(
                "event_log_depth must be at least 1".to_string(),
            ));
        }
        if self.read_timeout_ms == 0 || self.write_timeout_ms == 0 {
            return Err(AsicError::Config(
                "register timeouts must be nonzero".to_string(),
            ));
        }
        if self.clear_retries > MAX_CLEAR_RETRIES {
            return Err(AsicError::Config(format!(
                "clear_retries must be at most {MAX_CLEAR_RETRIES}"
            )));
        }
        Ok(())
    }

    pub fn scrub_interval(&self) -> Option<Duration> {
        match self.scrub_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn clear_backoff(&self) -> Duration {
        Duration::from_millis(self.clear_backoff_ms)
    }
}
