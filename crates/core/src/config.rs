// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Queue configuration — the recognized options table.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Default long-runner kill threshold factor.
pub const LONG_RUNNING_FACTOR: f64 = 1.25;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid queue configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Concrete scheduler behind the driver interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    #[default]
    Local,
    Lsf,
    Pbs,
    Slurm,
    Torque,
}

crate::simple_display! {
    DriverKind {
        Local => "local",
        Lsf => "lsf",
        Pbs => "pbs",
        Slurm => "slurm",
        Torque => "torque",
    }
}

/// Recognized queue options.
///
/// `max_running == 0` means unbounded; `max_runtime == 0` disables the
/// per-job runtime kill. Driver-specific sub-options are opaque key/value
/// pairs handed to the concrete driver untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_submit: u32,
    pub max_running: usize,
    /// Seconds a job may stay in RUNNING before it is killed.
    pub max_runtime: u64,
    /// Gates both the long-runner killer and queue completion accounting.
    pub min_realizations_required: usize,
    pub long_running_factor: f64,
    pub queue_driver: DriverKind,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub driver_options: IndexMap<String, String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_submit: 2,
            max_running: 0,
            max_runtime: 0,
            min_realizations_required: 0,
            long_running_factor: LONG_RUNNING_FACTOR,
            queue_driver: DriverKind::Local,
            driver_options: IndexMap::new(),
        }
    }
}

impl QueueConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    crate::setters! {
        set {
            max_submit: u32,
            max_running: usize,
            max_runtime: u64,
            min_realizations_required: usize,
            long_running_factor: f64,
            queue_driver: DriverKind,
        }
    }

    pub fn driver_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.driver_options.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
