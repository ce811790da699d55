// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted driver for tests.

use super::{Driver, DriverError, DriverHandle, DriverStatus, JobSpec};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// A driver that replays a scripted status sequence per submission.
///
/// Each submit pops the next script from the queue; the last status of a
/// script repeats forever. Kills are recorded and flip the handle to `Exit`.
pub struct FakeDriver {
    scripts: Mutex<VecDeque<Vec<DriverStatus>>>,
    handles: Mutex<HashMap<DriverHandle, VecDeque<DriverStatus>>>,
    submits: Mutex<Vec<String>>,
    kills: Mutex<Vec<DriverHandle>>,
    submit_failures: AtomicUsize,
    next_handle: AtomicU64,
    max_running: AtomicUsize,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            handles: Mutex::new(HashMap::new()),
            submits: Mutex::new(Vec::new()),
            kills: Mutex::new(Vec::new()),
            submit_failures: AtomicUsize::new(0),
            next_handle: AtomicU64::new(0),
            max_running: AtomicUsize::new(0),
        }
    }

    /// Queue the poll sequence for the next submission.
    pub fn script(self, statuses: &[DriverStatus]) -> Self {
        self.scripts.lock().push_back(statuses.to_vec());
        self
    }

    /// Make the next `n` submits fail outright.
    pub fn failing_submits(self, n: usize) -> Self {
        self.submit_failures.store(n, Ordering::Relaxed);
        self
    }

    pub fn submitted_names(&self) -> Vec<String> {
        self.submits.lock().clone()
    }

    pub fn killed(&self) -> Vec<DriverHandle> {
        self.kills.lock().clone()
    }
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for FakeDriver {
    async fn submit(&self, spec: &JobSpec) -> Result<DriverHandle, DriverError> {
        self.submits.lock().push(spec.name.clone());
        if self
            .submit_failures
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(DriverError::Submit("scripted submit failure".to_string()));
        }
        let script = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or_else(|| vec![DriverStatus::Running, DriverStatus::Done]);
        let handle = DriverHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.handles.lock().insert(handle, script.into());
        Ok(handle)
    }

    async fn poll(&self, handle: DriverHandle) -> Result<DriverStatus, DriverError> {
        let mut handles = self.handles.lock();
        let script = handles.get_mut(&handle).ok_or(DriverError::UnknownHandle(handle))?;
        match script.len() {
            0 => Ok(DriverStatus::Unknown),
            1 => Ok(script[0]),
            _ => Ok(script.pop_front().unwrap_or(DriverStatus::Unknown)),
        }
    }

    async fn kill(&self, handle: DriverHandle) -> Result<(), DriverError> {
        self.kills.lock().push(handle);
        self.handles.lock().insert(handle, VecDeque::from(vec![DriverStatus::Exit]));
        Ok(())
    }

    fn max_running(&self) -> usize {
        self.max_running.load(Ordering::Relaxed)
    }

    fn set_max_running(&self, n: usize) {
        self.max_running.store(n, Ordering::Relaxed);
    }
}
