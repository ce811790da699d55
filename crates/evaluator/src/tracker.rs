// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Evaluator tracker — snapshot reconstruction on the monitor side.
//!
//! A drainer task feeds monitor events into a bounded work channel; the
//! consumer pulls [`TrackerEvent`]s off `track()`. The original's "DONE"
//! sentinel is the closed channel: when the drainer ends, `track()` emits
//! the terminal [`TrackerEvent::End`].

use crate::config::ConnectionInfo;
use crate::monitor::Monitor;
use crate::run_model::RunModel;
use armada_core::{EnsembleState, Event, EventKind, EventPayload, PartialSnapshot, RealizationState, Snapshot};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// Update for an iteration with no stored full snapshot. Fatal.
    #[error("out of order: no full snapshot stored for iteration {0}")]
    OutOfOrder(usize),
}

/// What `track()` yields to the consumer.
#[derive(Debug, Clone)]
pub enum TrackerEvent {
    FullSnapshot {
        iteration: usize,
        snapshot: Snapshot,
        progress: f64,
    },
    SnapshotUpdate {
        iteration: usize,
        partial: PartialSnapshot,
        progress: f64,
    },
    End {
        failed: bool,
        failed_msg: Option<String>,
    },
}

/// Reconstructs per-iteration snapshots from the event stream.
pub struct EvaluatorTracker {
    model: Arc<dyn RunModel>,
    info: ConnectionInfo,
    work_rx: mpsc::Receiver<Event>,
    drainer: JoinHandle<()>,
    iter_snapshot: HashMap<usize, Snapshot>,
    ended: bool,
}

/// Wait between drainer reconnection attempts.
const NEXT_MONITOR_WAIT: Duration = Duration::from_secs(5);

/// Bound on undelivered monitor events.
const WORK_QUEUE_DEPTH: usize = 1024;

impl EvaluatorTracker {
    pub fn new(model: Arc<dyn RunModel>, info: ConnectionInfo) -> Self {
        Self::with_monitor_wait(model, info, NEXT_MONITOR_WAIT)
    }

    pub fn with_monitor_wait(
        model: Arc<dyn RunModel>,
        info: ConnectionInfo,
        monitor_wait: Duration,
    ) -> Self {
        let (work_tx, work_rx) = mpsc::channel(WORK_QUEUE_DEPTH);
        let drainer = tokio::spawn(drain_monitor(
            Arc::clone(&model),
            info.clone(),
            work_tx,
            monitor_wait,
        ));
        Self {
            model,
            info,
            work_rx,
            drainer,
            iter_snapshot: HashMap::new(),
            ended: false,
        }
    }

    /// Whether the drainer has exited (no more events will arrive).
    pub fn is_finished(&self) -> bool {
        self.drainer.is_finished()
    }

    /// The snapshot reconstructed for `iteration`, if any.
    pub fn snapshot(&self, iteration: usize) -> Option<&Snapshot> {
        self.iter_snapshot.get(&iteration)
    }

    /// Next tracker event; `None` after the terminal `End`.
    pub async fn track(&mut self) -> Result<Option<TrackerEvent>, TrackerError> {
        if self.ended {
            return Ok(None);
        }
        loop {
            let Some(event) = self.work_rx.recv().await else {
                // Closed channel is the DONE sentinel.
                self.ended = true;
                return Ok(Some(TrackerEvent::End {
                    failed: self.model.has_failed(),
                    failed_msg: self.model.fail_message(),
                }));
            };
            match event.payload {
                EventPayload::EeSnapshot(data) => {
                    self.iter_snapshot.insert(data.iter, data.snapshot.clone());
                    return Ok(Some(TrackerEvent::FullSnapshot {
                        iteration: data.iter,
                        snapshot: data.snapshot,
                        progress: self.progress(),
                    }));
                }
                EventPayload::EeSnapshotUpdate(data) => {
                    let Some(snapshot) = self.iter_snapshot.get_mut(&data.iter) else {
                        return Err(TrackerError::OutOfOrder(data.iter));
                    };
                    if let Err(e) = snapshot.merge(&data.partial) {
                        tracing::warn!(error = %e, iteration = data.iter, "dropping unmergeable update");
                        continue;
                    }
                    return Ok(Some(TrackerEvent::SnapshotUpdate {
                        iteration: data.iter,
                        partial: data.partial,
                        progress: self.progress(),
                    }));
                }
                _ => {
                    tracing::debug!(kind = %event.kind(), "tracker ignoring event");
                }
            }
        }
    }

    /// Fraction of the run completed.
    ///
    /// `(iter + done_reals/total_reals) / iteration_count`, where done
    /// realizations are FINISHED or FAILED. Guarded: an empty ensemble
    /// contributes `0.0`, and the model's *current* iteration counter is
    /// used rather than the highest stored key.
    pub fn progress(&self) -> f64 {
        if self.is_finished() {
            return 1.0;
        }
        let iteration = self.model.current_iteration();
        let real_progress = match self.iter_snapshot.get(&iteration) {
            None => return 0.0,
            Some(snapshot) if snapshot.reals.is_empty() => 0.0,
            Some(snapshot) => {
                let done = snapshot
                    .reals
                    .values()
                    .filter(|real| {
                        matches!(
                            real.status,
                            RealizationState::Finished | RealizationState::Failed
                        )
                    })
                    .count();
                done as f64 / snapshot.reals.len() as f64
            }
        };
        (iteration as f64 + real_progress) / self.model.iteration_count().max(1) as f64
    }

    /// Ask the evaluator to cancel, then drain until the drainer exits.
    ///
    /// The evaluation may be finished or not yet started; give up after
    /// two short connection attempts rather than waiting forever.
    pub async fn request_termination(&mut self) {
        let mut info = self.info.clone();
        info.open_timeout = Duration::from_secs(5);
        match Monitor::connect_with_retry(&info, 2, Duration::from_millis(500)).await {
            Ok(mut monitor) => {
                if let Err(e) = monitor.signal_cancel().await {
                    tracing::warn!(error = %e, "failed to send cancel signal");
                }
                monitor.close().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not reach evaluator for termination");
                return;
            }
        }
        while !self.drainer.is_finished() {
            while self.work_rx.try_recv().is_ok() {}
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Drainer: reconnects to the evaluator until the model reports finished,
/// forwarding snapshot events into the work channel.
async fn drain_monitor(
    model: Arc<dyn RunModel>,
    info: ConnectionInfo,
    work_tx: mpsc::Sender<Event>,
    monitor_wait: Duration,
) {
    while !model.is_finished() {
        tracing::debug!("connecting to new monitor...");
        match Monitor::connect(&info).await {
            Ok(mut monitor) => {
                tracing::debug!("connected");
                while let Some(event) = monitor.next_event().await {
                    match event.kind() {
                        EventKind::EeSnapshot | EventKind::EeSnapshotUpdate => {
                            let status = event.ensemble_status();
                            if work_tx.send(event).await.is_err() {
                                return;
                            }
                            match status {
                                Some(EnsembleState::Stopped | EnsembleState::Failed) => {
                                    tracing::debug!("observed evaluation stopped, signalling done");
                                    let _ = monitor.signal_done().await;
                                }
                                Some(EnsembleState::Cancelled) => {
                                    tracing::debug!("observed evaluation cancelled, exiting drainer");
                                    return;
                                }
                                _ => {}
                            }
                        }
                        EventKind::EeTerminated => {
                            tracing::debug!("got terminator event");
                        }
                        _ => {}
                    }
                }
            }
            Err(e) => {
                if !model.is_finished() {
                    tracing::debug!(error = %e, "monitor connection failed");
                }
            }
        }
        // The evaluator for the next iteration may not be up yet.
        tokio::time::sleep(monitor_wait).await;
    }
    tracing::debug!("model finished, closing work channel");
}
