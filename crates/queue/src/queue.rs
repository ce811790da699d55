// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job queue engine — population supervisor.
//!
//! Owns the job nodes, enforces the concurrency cap on admission, kills
//! long-running outliers, and turns differ change sets into step events for
//! the evaluator. One `tick` drives admission, the long-runner check and a
//! differ transition; only changed indices cross the bus.

use crate::differ::QueueDiffer;
use crate::driver::Driver;
use crate::node::{JobNode, ThreadState};
use crate::publisher::{PublishError, QueuePublisher};
use crate::runpath;
use armada_core::{Clock, Event, EventPayload, QueueConfig, QueueState, Source, StepState, SystemClock};
use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// How the queue ended, for the façade's exit semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOutcome {
    /// Every job reached SUCCESS.
    Success,
    /// Some jobs failed or were killed.
    Partial { failed: usize },
    /// Invariant breach; the queue cannot vouch for its state.
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Fatal: a node still in a working state after termination.
    #[error("job {queue_index} in state {queue_state} with thread {thread_state:?} after termination")]
    Incomplete {
        queue_index: u64,
        queue_state: QueueState,
        thread_state: ThreadState,
    },
    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// The population supervisor.
///
/// With `size == 0` the queue grows as jobs are added and the caller must
/// call [`JobQueue::submit_complete`] once no more jobs are coming; with a
/// known `size` the queue finishes when that many jobs have completed.
pub struct JobQueue<C: Clock + 'static = SystemClock> {
    config: QueueConfig,
    size: usize,
    driver: Arc<dyn Driver>,
    job_list: Vec<Arc<JobNode<C>>>,
    differ: QueueDiffer,
    stopped: Arc<AtomicBool>,
    submit_done: AtomicBool,
    pool: Arc<Semaphore>,
    tick: Duration,
    clock: C,
}

/// Cloneable handle that flips a queue's stop flag from outside its task.
#[derive(Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Default cap on concurrently running done/exit callbacks.
const DEFAULT_CALLBACK_POOL: usize = 10;

impl JobQueue<SystemClock> {
    pub fn new(driver: Arc<dyn Driver>, config: QueueConfig, size: usize) -> Self {
        Self::with_clock(driver, config, size, SystemClock)
    }
}

impl<C: Clock + 'static> JobQueue<C> {
    pub fn with_clock(driver: Arc<dyn Driver>, config: QueueConfig, size: usize, clock: C) -> Self {
        driver.set_max_running(config.max_running);
        Self {
            config,
            size,
            driver,
            job_list: Vec::new(),
            differ: QueueDiffer::new(),
            stopped: Arc::new(AtomicBool::new(false)),
            submit_done: AtomicBool::new(false),
            pool: Arc::new(Semaphore::new(DEFAULT_CALLBACK_POOL)),
            tick: Duration::from_secs(1),
            clock,
        }
    }

    /// Replace the callback pool semaphore (shared with other queues).
    pub fn with_pool(mut self, pool: Arc<Semaphore>) -> Self {
        self.pool = pool;
        self
    }

    /// Tick duration of the execute loop (tests shrink this).
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Add a node under the next dense queue index.
    pub fn add_job(&mut self, node: Arc<JobNode<C>>, iens: usize) -> u64 {
        let queue_index = self.job_list.len() as u64;
        node.activate();
        self.differ.add_state(queue_index, iens, node.status());
        self.job_list.push(node);
        queue_index
    }

    /// Signal that no more jobs will be added (`size == 0` queues only).
    pub fn submit_complete(&self) {
        self.submit_done.store(true, Ordering::SeqCst);
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Begin the termination protocol: no new launches, stop everything.
    pub fn kill_all_jobs(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// A handle that can stop this queue from another task.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.stopped))
    }

    pub fn queue_size(&self) -> usize {
        self.job_list.len()
    }

    pub fn count_status(&self, state: QueueState) -> usize {
        self.job_list.iter().filter(|node| node.status() == state).count()
    }

    pub fn num_running(&self) -> usize {
        self.count_status(QueueState::Running)
    }

    pub fn num_pending(&self) -> usize {
        self.count_status(QueueState::Pending)
    }

    pub fn num_waiting(&self) -> usize {
        self.count_status(QueueState::Waiting) + self.count_status(QueueState::NotActive)
    }

    pub fn num_complete(&self) -> usize {
        self.job_list.iter().filter(|node| node.status().is_terminal()).count()
    }

    /// Any node whose lifecycle has not finished.
    pub fn is_active(&self) -> bool {
        self.job_list.iter().any(|node| node.is_active())
    }

    fn max_running(&self) -> usize {
        let cap = self.driver.max_running();
        if cap == 0 {
            self.job_list.len().max(1)
        } else {
            cap
        }
    }

    /// Launched and not yet settled. Thread state flips synchronously in
    /// `start()`, so this count is stable within one admission pass.
    fn count_in_flight(&self) -> usize {
        self.job_list
            .iter()
            .filter(|node| {
                matches!(node.thread_state(), ThreadState::Running | ThreadState::Stopping)
            })
            .count()
    }

    pub fn available_capacity(&self) -> bool {
        !self.stopped() && self.count_in_flight() < self.max_running()
    }

    fn fetch_next_ready(&self) -> Option<&Arc<JobNode<C>>> {
        self.job_list.iter().find(|node| {
            node.thread_state() == ThreadState::Ready && node.status() == QueueState::Waiting
        })
    }

    /// Admission loop: launch READY nodes while capacity remains.
    pub fn launch_jobs(&self) {
        while self.available_capacity() {
            let Some(node) = self.fetch_next_ready() else {
                break;
            };
            tracing::debug!(job = %node.name(), "launching");
            node.start(Arc::clone(&self.driver), Arc::clone(&self.pool), self.config.max_submit);
        }
    }

    /// Kill RUNNING outliers once enough realizations have completed.
    pub fn stop_long_running_jobs(&self) {
        let completed: Vec<_> = self
            .job_list
            .iter()
            .filter(|node| matches!(node.status(), QueueState::Done | QueueState::Success))
            .collect();
        // No average to compare against yet.
        if completed.is_empty() {
            return;
        }
        if completed.len() < self.config.min_realizations_required {
            return;
        }
        let total: Duration = completed.iter().map(|node| node.runtime()).sum();
        let average = total.as_secs_f64() / completed.len() as f64;
        let threshold = self.config.long_running_factor * average;

        for node in &self.job_list {
            if !node.status().is_terminal() && node.runtime().as_secs_f64() > threshold {
                tracing::info!(
                    job = %node.name(),
                    runtime_secs = node.runtime().as_secs_f64(),
                    threshold_secs = threshold,
                    "stopping long-running job"
                );
                node.stop();
            }
        }
    }

    /// Stop every node and wait for all lifecycles to settle.
    pub async fn stop_jobs(&self) {
        loop {
            for node in &self.job_list {
                node.stop();
            }
            if !self.is_active() {
                return;
            }
            tokio::time::sleep(self.tick).await;
        }
    }

    /// Verify no node is still in a working state. Violation is fatal.
    pub fn assert_complete(&self) -> Result<(), QueueError> {
        for (index, node) in self.job_list.iter().enumerate() {
            if node.thread_state() != ThreadState::Done {
                return Err(QueueError::Incomplete {
                    queue_index: index as u64,
                    queue_state: node.status(),
                    thread_state: node.thread_state(),
                });
            }
        }
        Ok(())
    }

    /// Full differ view.
    pub fn snapshot(&self) -> IndexMap<u64, QueueState> {
        self.differ.snapshot()
    }

    /// Run a differ transition and return only the changed indices.
    pub fn changes_after_transition(&mut self) -> IndexMap<u64, QueueState> {
        let current: Vec<(u64, QueueState)> = self
            .job_list
            .iter()
            .enumerate()
            .map(|(index, node)| (index as u64, node.status()))
            .collect();
        let (old, new) = self.differ.transition(current);
        QueueDiffer::diff_states(&old, &new)
    }

    /// Jobs that did not reach SUCCESS.
    pub fn failed_jobs(&self) -> usize {
        self.job_list
            .iter()
            .filter(|node| matches!(node.status(), QueueState::Failed | QueueState::IsKilled))
            .count()
    }

    pub fn outcome(&self) -> QueueOutcome {
        match self.failed_jobs() {
            0 => QueueOutcome::Success,
            failed => QueueOutcome::Partial { failed },
        }
    }

    fn drained(&self) -> bool {
        let target_reached = if self.size == 0 {
            self.submit_done.load(Ordering::SeqCst)
        } else {
            self.num_complete() >= self.size
        };
        target_reached && !self.is_active()
    }

    /// Translate a change set into step events on the bus.
    pub fn change_events(&self, ens_id: &str, changes: &IndexMap<u64, QueueState>) -> Vec<Event> {
        changes
            .iter()
            .filter_map(|(&queue_index, &state)| {
                let iens = self.differ.qindex_to_iens(queue_index)?;
                Some(Event::new(
                    Source::step(ens_id, &iens.to_string(), "0"),
                    self.clock.now_utc(),
                    step_payload(state.step_state()),
                ))
            })
            .collect()
    }

    /// Drive the queue to completion without publishing anywhere.
    pub async fn execute(&mut self) -> Result<QueueOutcome, QueueError> {
        self.run(None, "").await
    }

    /// Drive the queue, publishing change sets over the websocket.
    ///
    /// Publishes the full differ view before the first tick and after the
    /// last so observers converge even across reconnects.
    pub async fn execute_via_websockets(
        &mut self,
        publisher: &mut QueuePublisher,
        ens_id: &str,
    ) -> Result<QueueOutcome, QueueError> {
        self.run(Some(publisher), ens_id).await
    }

    async fn run(
        &mut self,
        mut publisher: Option<&mut QueuePublisher>,
        ens_id: &str,
    ) -> Result<QueueOutcome, QueueError> {
        if let Some(publisher) = publisher.as_deref_mut() {
            publisher.ensure_connected().await?;
            let full = self.snapshot();
            self.publish_changes(publisher, ens_id, &full).await?;
        }

        loop {
            self.launch_jobs();
            tokio::time::sleep(self.tick).await;
            self.stop_long_running_jobs();

            let changes = self.changes_after_transition();
            if !changes.is_empty() {
                if let Some(publisher) = publisher.as_deref_mut() {
                    self.publish_changes(publisher, ens_id, &changes).await?;
                }
            }

            if self.stopped() {
                tracing::debug!("queue stopped, stopping jobs");
                self.stop_jobs().await;
                break;
            }
            if self.drained() {
                break;
            }
        }

        self.assert_complete()?;
        // Final transition and full publish.
        let _ = self.changes_after_transition();
        if let Some(publisher) = publisher.as_deref_mut() {
            let full = self.snapshot();
            self.publish_changes(publisher, ens_id, &full).await?;
        }
        Ok(self.outcome())
    }

    /// Publish one change set, reconverging after a dropped connection.
    async fn publish_changes(
        &self,
        publisher: &mut QueuePublisher,
        ens_id: &str,
        changes: &IndexMap<u64, QueueState>,
    ) -> Result<(), QueueError> {
        let events = self.change_events(ens_id, changes);
        match publisher.publish(&events).await {
            Ok(()) => Ok(()),
            Err(PublishError::ConnectionLost(reason)) => {
                tracing::warn!(%reason, "queue dropped connection to evaluator, reconnecting");
                publisher.reconnect().await?;
                // Observers may have missed anything; resend the full view.
                let full = self.change_events(ens_id, &self.snapshot());
                publisher.publish(&full).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Rewrite each run path's jobs file with dispatch info, and write the
    /// CERT file when TLS is configured.
    ///
    /// Run paths without a jobs file are skipped: not every node feeds a
    /// job runner (plan-only nodes in tests, externally prepared paths).
    pub fn add_dispatch_information_to_jobs_file(
        &self,
        ens_id: &str,
        dispatch_url: &str,
        cert: Option<&[u8]>,
        token: Option<&str>,
        experiment_id: Option<&str>,
    ) -> std::io::Result<()> {
        for (queue_index, node) in self.job_list.iter().enumerate() {
            let Some(iens) = self.differ.qindex_to_iens(queue_index as u64) else {
                continue;
            };
            let run_path = &node.spec().run_path;
            if !run_path.join(runpath::JOBS_FILE).exists() {
                tracing::debug!(run_path = %run_path.display(), "no jobs file, skipping dispatch info");
                continue;
            }
            runpath::add_dispatch_info(
                run_path,
                &runpath::DispatchInfo {
                    ens_id: ens_id.to_string(),
                    real_id: iens,
                    step_id: 0,
                    dispatch_url: dispatch_url.to_string(),
                    token: token.map(str::to_string),
                    experiment_id: experiment_id.map(str::to_string),
                },
                cert,
            )?;
        }
        Ok(())
    }
}

fn step_payload(state: StepState) -> EventPayload {
    match state {
        StepState::Waiting => EventPayload::StepWaiting,
        StepState::Pending => EventPayload::StepPending,
        StepState::Running => EventPayload::StepRunning,
        StepState::Success => EventPayload::StepSuccess,
        StepState::Failed => EventPayload::StepFailure,
        StepState::Unknown => EventPayload::StepUnknown,
    }
}

impl<C: Clock + 'static> std::fmt::Display for JobQueue<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "JobQueue({}, running={}, complete={}, waiting={}, pending={})",
            if self.is_active() { "running" } else { "not running" },
            self.num_running(),
            self.num_complete(),
            self.num_waiting(),
            self.num_pending(),
        )
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
