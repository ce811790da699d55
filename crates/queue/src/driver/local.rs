// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local driver — fork/exec on the machine running the queue.

use super::{Driver, DriverError, DriverHandle, DriverStatus, JobSpec};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::process::{Child, Command};

/// Runs job scripts as child processes of the queue itself.
///
/// Exit code 0 maps to `Done`, anything else to `Exit`. A handle whose
/// child has been reaped keeps reporting its final status.
pub struct LocalDriver {
    children: Mutex<HashMap<DriverHandle, ChildSlot>>,
    next_handle: AtomicU64,
    max_running: AtomicUsize,
}

enum ChildSlot {
    Running(Child),
    Finished(DriverStatus),
}

impl LocalDriver {
    pub fn new() -> Self {
        Self {
            children: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(0),
            max_running: AtomicUsize::new(0),
        }
    }
}

impl Default for LocalDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for LocalDriver {
    async fn submit(&self, spec: &JobSpec) -> Result<DriverHandle, DriverError> {
        let child = Command::new(&spec.script)
            .current_dir(&spec.run_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DriverError::Submit(format!("{}: {e}", spec.script.display())))?;

        let handle = DriverHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(%handle, name = %spec.name, "local driver: spawned");
        self.children.lock().insert(handle, ChildSlot::Running(child));
        Ok(handle)
    }

    async fn poll(&self, handle: DriverHandle) -> Result<DriverStatus, DriverError> {
        let mut children = self.children.lock();
        let slot = children.get_mut(&handle).ok_or(DriverError::UnknownHandle(handle))?;
        match slot {
            ChildSlot::Finished(status) => Ok(*status),
            ChildSlot::Running(child) => match child.try_wait()? {
                None => Ok(DriverStatus::Running),
                Some(exit) => {
                    let status = if exit.success() { DriverStatus::Done } else { DriverStatus::Exit };
                    tracing::debug!(%handle, %status, "local driver: child exited");
                    *slot = ChildSlot::Finished(status);
                    Ok(status)
                }
            },
        }
    }

    async fn kill(&self, handle: DriverHandle) -> Result<(), DriverError> {
        let mut children = self.children.lock();
        let slot = children.get_mut(&handle).ok_or(DriverError::UnknownHandle(handle))?;
        if let ChildSlot::Running(child) = slot {
            child.start_kill()?;
            *slot = ChildSlot::Finished(DriverStatus::Exit);
        }
        Ok(())
    }

    fn max_running(&self) -> usize {
        self.max_running.load(Ordering::Relaxed)
    }

    fn set_max_running(&self, n: usize) {
        self.max_running.store(n, Ordering::Relaxed);
    }
}

#[cfg(test)]
#[path = "local_tests.rs"]
mod tests;
