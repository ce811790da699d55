// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job node — one realization-step's lifecycle state machine.
//!
//! Drives `WAITING → SUBMITTED → PENDING → RUNNING → (DONE|EXIT)` against
//! the driver, runs the done/exit callbacks on the blocking pool under the
//! shared semaphore, and settles in `SUCCESS`, `FAILED` or `IS_KILLED`.
//! Nodes never raise into the scheduler: every failure becomes a state
//! transition the queue observes through its differ.

use crate::driver::{Driver, DriverStatus, JobSpec};
use armada_core::{Clock, QueueState, SystemClock};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Where the node's lifecycle task is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Not started yet; eligible for launch.
    Ready,
    /// Lifecycle task running.
    Running,
    /// Stop requested, shutting down.
    Stopping,
    /// Lifecycle task finished; queue state is terminal.
    Done,
}

/// Failure taxonomy surfaced by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailKind {
    SubmitFailure,
    RunFailure,
    LoadFailure,
    Timeout,
    KilledByUser,
}

armada_core::simple_display! {
    FailKind {
        SubmitFailure => "SUBMIT_FAILURE",
        RunFailure => "RUN_FAILURE",
        LoadFailure => "LOAD_FAILURE",
        Timeout => "TIMEOUT",
        KilledByUser => "KILLED_BY_USER",
    }
}

/// Callback rejection; the message is attributed to the realization.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct CallbackError(pub String);

/// User-supplied hook run on the blocking pool after DONE/EXIT.
pub type Callback = Arc<dyn Fn() -> Result<(), CallbackError> + Send + Sync>;

/// Static configuration of one node.
#[derive(Clone)]
pub struct NodeConfig {
    pub spec: JobSpec,
    pub done_callback: Option<Callback>,
    pub exit_callback: Option<Callback>,
    pub timeout_callback: Option<Callback>,
    /// Kill the job once RUNNING exceeds this; `None` disables.
    pub max_runtime: Option<Duration>,
    pub poll_interval: Duration,
}

impl NodeConfig {
    pub fn new(spec: JobSpec) -> Self {
        Self {
            spec,
            done_callback: None,
            exit_callback: None,
            timeout_callback: None,
            max_runtime: None,
            poll_interval: Duration::from_secs(1),
        }
    }

    /// Node configuration with the queue-level `max_runtime` applied.
    pub fn from_queue_config(spec: JobSpec, config: &armada_core::QueueConfig) -> Self {
        let mut node = Self::new(spec);
        if config.max_runtime > 0 {
            node.max_runtime = Some(Duration::from_secs(config.max_runtime));
        }
        node
    }

    armada_core::setters! {
        set {
            poll_interval: Duration,
        }
        option {
            done_callback: Callback,
            exit_callback: Callback,
            timeout_callback: Callback,
            max_runtime: Duration,
        }
    }
}

#[derive(Debug)]
struct NodeState {
    queue_state: QueueState,
    thread_state: ThreadState,
    submit_attempts: u32,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
    fail: Option<FailKind>,
    error: Option<String>,
}

/// One queued job with its lifecycle state.
pub struct JobNode<C: Clock = SystemClock> {
    config: NodeConfig,
    state: Mutex<NodeState>,
    stop_requested: AtomicBool,
    clock: C,
}

enum PollOutcome {
    Done,
    Exit,
    Killed,
    TimedOut,
}

impl<C: Clock + 'static> JobNode<C> {
    pub fn with_clock(config: NodeConfig, clock: C) -> Self {
        Self {
            config,
            state: Mutex::new(NodeState {
                queue_state: QueueState::NotActive,
                thread_state: ThreadState::Ready,
                submit_attempts: 0,
                started_at: None,
                finished_at: None,
                fail: None,
                error: None,
            }),
            stop_requested: AtomicBool::new(false),
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.spec.name
    }

    pub fn spec(&self) -> &JobSpec {
        &self.config.spec
    }

    pub fn status(&self) -> QueueState {
        self.state.lock().queue_state
    }

    pub fn thread_state(&self) -> ThreadState {
        self.state.lock().thread_state
    }

    pub fn fail_kind(&self) -> Option<FailKind> {
        self.state.lock().fail
    }

    pub fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    pub fn submit_attempts(&self) -> u32 {
        self.state.lock().submit_attempts
    }

    /// Wall time spent since entering RUNNING (frozen once finished).
    pub fn runtime(&self) -> Duration {
        let state = self.state.lock();
        match (state.started_at, state.finished_at) {
            (Some(start), Some(end)) => end.duration_since(start),
            (Some(start), None) => self.clock.now().duration_since(start),
            _ => Duration::ZERO,
        }
    }

    /// Whether the lifecycle task is still alive or could still be launched.
    pub fn is_active(&self) -> bool {
        !matches!(self.thread_state(), ThreadState::Done)
    }

    /// Mark the node queued for execution.
    pub(crate) fn activate(&self) {
        self.set_queue_state(QueueState::Waiting);
    }

    /// Request a cooperative stop; settles the node at IS_KILLED.
    pub fn stop(&self) {
        if self.stop_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = self.state.lock();
        match state.thread_state {
            ThreadState::Ready => {
                // Never launched: settle immediately.
                state.queue_state = QueueState::IsKilled;
                state.thread_state = ThreadState::Done;
                state.fail = Some(FailKind::KilledByUser);
            }
            ThreadState::Running => state.thread_state = ThreadState::Stopping,
            ThreadState::Stopping | ThreadState::Done => {}
        }
    }

    /// Launch the lifecycle task.
    ///
    /// `pool` bounds callback concurrency across the whole queue;
    /// `max_submit` caps submission attempts including retries.
    pub fn start(
        self: &Arc<Self>,
        driver: Arc<dyn Driver>,
        pool: Arc<Semaphore>,
        max_submit: u32,
    ) -> JoinHandle<()> {
        {
            let mut state = self.state.lock();
            state.thread_state = ThreadState::Running;
        }
        let node = Arc::clone(self);
        tokio::spawn(async move {
            node.run_lifecycle(driver, pool, max_submit).await;
        })
    }

    async fn run_lifecycle(&self, driver: Arc<dyn Driver>, pool: Arc<Semaphore>, max_submit: u32) {
        loop {
            if self.stopping() {
                self.settle_killed();
                return;
            }

            // Entry to SUBMITTED counts an attempt, including retries.
            {
                let mut state = self.state.lock();
                state.submit_attempts += 1;
                if state.submit_attempts > max_submit {
                    state.queue_state = QueueState::Failed;
                    state.thread_state = ThreadState::Done;
                    state.fail.get_or_insert(FailKind::SubmitFailure);
                    return;
                }
                state.queue_state = QueueState::Submitted;
            }

            let handle = match driver.submit(&self.config.spec).await {
                Ok(handle) => handle,
                Err(e) => {
                    tracing::warn!(job = %self.name(), error = %e, "submit attempt failed");
                    self.record_error(FailKind::SubmitFailure, e.to_string());
                    continue; // retry path; attempt cap enforced above
                }
            };

            let outcome = self.poll_until_exit(&driver, handle).await;
            match outcome {
                PollOutcome::Killed => {
                    self.set_queue_state(QueueState::DoKill);
                    let _ = driver.kill(handle).await;
                    self.settle_killed();
                    return;
                }
                PollOutcome::TimedOut => {
                    self.set_queue_state(QueueState::DoKillNodeFailure);
                    let _ = driver.kill(handle).await;
                    let _ = self.run_callback(&pool, self.config.timeout_callback.clone()).await;
                    self.settle_failed(FailKind::Timeout, "max_runtime reached".to_string());
                    return;
                }
                PollOutcome::Done => {
                    self.mark_finished();
                    self.set_queue_state(QueueState::RunningDoneCallback);
                    match self.run_callback(&pool, self.config.done_callback.clone()).await {
                        Ok(()) => {
                            self.settle_success();
                            return;
                        }
                        Err(e) => {
                            // Results rejected: retry like a failed run.
                            tracing::warn!(job = %self.name(), error = %e, "done callback rejected results");
                            self.record_error(FailKind::LoadFailure, e.to_string());
                            self.set_queue_state(QueueState::Exit);
                        }
                    }
                }
                PollOutcome::Exit => {
                    self.mark_finished();
                    self.set_queue_state(QueueState::RunningExitCallback);
                    self.record_error(FailKind::RunFailure, format!("job {} exited", self.name()));
                    let _ = self.run_callback(&pool, self.config.exit_callback.clone()).await;
                }
            }

            // Retry path: back to WAITING if attempts remain, else FAILED.
            if self.submit_attempts() >= max_submit {
                let (fail, error) = {
                    let state = self.state.lock();
                    (state.fail.unwrap_or(FailKind::RunFailure), state.error.clone())
                };
                self.settle_failed(fail, error.unwrap_or_else(|| "job failed".to_string()));
                return;
            }
            self.reset_for_resubmit();
        }
    }

    async fn poll_until_exit(&self, driver: &Arc<dyn Driver>, handle: crate::driver::DriverHandle) -> PollOutcome {
        loop {
            if self.stopping() {
                return PollOutcome::Killed;
            }
            match driver.poll(handle).await {
                Ok(DriverStatus::Submitted) => {}
                Ok(DriverStatus::Pending) => self.set_queue_state(QueueState::Pending),
                Ok(DriverStatus::Running) => {
                    self.mark_started();
                    self.set_queue_state(QueueState::Running);
                    if let Some(max_runtime) = self.config.max_runtime {
                        if self.runtime() > max_runtime {
                            return PollOutcome::TimedOut;
                        }
                    }
                }
                Ok(DriverStatus::Done) => return PollOutcome::Done,
                Ok(DriverStatus::Exit) => return PollOutcome::Exit,
                Ok(DriverStatus::NotActive) => {}
                Ok(DriverStatus::Unknown) => {
                    // Transient; re-poll next tick.
                    self.set_queue_state(QueueState::Unknown);
                }
                Err(e) => {
                    tracing::warn!(job = %self.name(), error = %e, "driver poll failed");
                    self.set_queue_state(QueueState::StatusFailure);
                }
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn run_callback(
        &self,
        pool: &Arc<Semaphore>,
        callback: Option<Callback>,
    ) -> Result<(), CallbackError> {
        let Some(callback) = callback else {
            return Ok(());
        };
        let Ok(_permit) = Arc::clone(pool).acquire_owned().await else {
            return Err(CallbackError("callback pool closed".to_string()));
        };
        match tokio::task::spawn_blocking(move || callback()).await {
            Ok(result) => result,
            Err(e) => Err(CallbackError(format!("callback panicked: {e}"))),
        }
    }

    fn stopping(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    fn set_queue_state(&self, queue_state: QueueState) {
        let mut state = self.state.lock();
        if state.queue_state != queue_state {
            tracing::debug!(job = %self.config.spec.name, from = %state.queue_state, to = %queue_state, "queue state");
            state.queue_state = queue_state;
        }
    }

    fn mark_started(&self) {
        let mut state = self.state.lock();
        if state.started_at.is_none() {
            state.started_at = Some(self.clock.now());
        }
    }

    fn mark_finished(&self) {
        let mut state = self.state.lock();
        if state.finished_at.is_none() {
            state.finished_at = Some(self.clock.now());
        }
    }

    fn record_error(&self, fail: FailKind, error: String) {
        let mut state = self.state.lock();
        state.fail = Some(fail);
        state.error = Some(error);
    }

    fn reset_for_resubmit(&self) {
        let mut state = self.state.lock();
        state.queue_state = QueueState::Waiting;
        state.started_at = None;
        state.finished_at = None;
    }

    fn settle_success(&self) {
        let mut state = self.state.lock();
        state.queue_state = QueueState::Success;
        state.thread_state = ThreadState::Done;
        state.fail = None;
        state.error = None;
    }

    fn settle_failed(&self, fail: FailKind, error: String) {
        let mut state = self.state.lock();
        state.queue_state = QueueState::Failed;
        state.thread_state = ThreadState::Done;
        state.fail = Some(fail);
        state.error = Some(error);
    }

    fn settle_killed(&self) {
        self.mark_finished();
        let mut state = self.state.lock();
        state.queue_state = QueueState::IsKilled;
        state.thread_state = ThreadState::Done;
        state.fail = Some(FailKind::KilledByUser);
    }
}

impl JobNode<SystemClock> {
    pub fn new(config: NodeConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

#[cfg(any(test, feature = "test-support"))]
impl<C: Clock + 'static> JobNode<C> {
    /// Test hook: force a settled state with a fixed runtime.
    pub fn force_settled(&self, queue_state: QueueState, runtime: Duration) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.queue_state = queue_state;
        state.thread_state = ThreadState::Done;
        state.started_at = Some(now - runtime);
        state.finished_at = Some(now);
    }
}

#[cfg(test)]
#[path = "node_tests.rs"]
mod tests;
