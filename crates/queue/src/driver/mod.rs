// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Driver interface — the capability an external scheduler must supply.
//!
//! The engine never retries driver calls: an `Unknown` poll result is
//! treated as transient and re-polled next tick, and a failed submission
//! feeds the node's submit-retry path.

pub mod local;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

use async_trait::async_trait;
use std::path::PathBuf;

/// What a concrete scheduler reports for one submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverStatus {
    Submitted,
    Pending,
    Running,
    Done,
    Exit,
    NotActive,
    Unknown,
}

armada_core::simple_display! {
    DriverStatus {
        Submitted => "SUBMITTED",
        Pending => "PENDING",
        Running => "RUNNING",
        Done => "DONE",
        Exit => "EXIT",
        NotActive => "NOT_ACTIVE",
        Unknown => "UNKNOWN",
    }
}

/// Opaque per-submission handle issued by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DriverHandle(pub u64);

impl std::fmt::Display for DriverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "drv-{}", self.0)
    }
}

/// What a job node hands the driver at submission time.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub name: String,
    /// Script the scheduler executes.
    pub script: PathBuf,
    /// Working directory (the realization run path).
    pub run_path: PathBuf,
    pub num_cpu: usize,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, script: impl Into<PathBuf>, run_path: impl Into<PathBuf>) -> Self {
        Self { name: name.into(), script: script.into(), run_path: run_path.into(), num_cpu: 1 }
    }

    armada_core::setters! {
        set {
            num_cpu: usize,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("submit failed: {0}")]
    Submit(String),
    #[error("no such driver handle {0}")]
    UnknownHandle(DriverHandle),
    #[error("no driver available for {0}")]
    UnsupportedDriver(armada_core::DriverKind),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Instantiate the configured driver.
///
/// Only the local driver ships here; cluster schedulers (LSF, PBS, Slurm,
/// Torque) plug in through the same interface.
pub fn driver_for(config: &armada_core::QueueConfig) -> Result<std::sync::Arc<dyn Driver>, DriverError> {
    match config.queue_driver {
        armada_core::DriverKind::Local => Ok(std::sync::Arc::new(local::LocalDriver::new())),
        other => Err(DriverError::UnsupportedDriver(other)),
    }
}

/// Abstract submit/poll/kill over an external scheduler.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn submit(&self, spec: &JobSpec) -> Result<DriverHandle, DriverError>;
    async fn poll(&self, handle: DriverHandle) -> Result<DriverStatus, DriverError>;
    async fn kill(&self, handle: DriverHandle) -> Result<(), DriverError>;

    /// Global cap hint; `0` means unbounded.
    fn max_running(&self) -> usize;
    fn set_max_running(&self, n: usize);
}
