// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ensemble evaluator façade — one iteration end-to-end.
//!
//! Owns the server, the batching dispatcher and the queue for a single
//! iteration: builds the initial snapshot greeting, ingests queue events
//! into snapshot updates, broadcasts them to monitors, and closes the
//! iteration with `EE_TERMINATED`.

use crate::config::EvaluatorServerConfig;
use crate::dispatcher::{BatchHandler, BatchingDispatcher};
use crate::server::{EvaluatorServer, ServerError};
use armada_core::{
    Clock, EnsembleState, Event, EventKind, EventPayload, PartialSnapshot, Snapshot, SnapshotData,
    SnapshotUpdateData, Source, TerminatedData,
};
use armada_queue::{JobQueue, PublisherConfig, QueueError, QueueOutcome, QueuePublisher};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Exit semantics of one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Every active realization finished.
    Success,
    /// Some realizations failed or were cancelled.
    Partial { failed: usize },
    /// The queue ended in an invariant-breached state.
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum EvaluatorError {
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error("queue task died: {0}")]
    QueueTask(String),
}

/// Every event kind the queue and job runners may push at `/dispatch`.
const SNAPSHOT_EVENTS: [EventKind; 15] = [
    EventKind::JobStart,
    EventKind::JobRunning,
    EventKind::JobSuccess,
    EventKind::JobFailure,
    EventKind::StepWaiting,
    EventKind::StepPending,
    EventKind::StepRunning,
    EventKind::StepSuccess,
    EventKind::StepFailure,
    EventKind::StepTimeout,
    EventKind::StepUnknown,
    EventKind::EnsembleStarted,
    EventKind::EnsembleStopped,
    EventKind::EnsembleCancelled,
    EventKind::EnsembleFailed,
];

/// Orchestrates one iteration.
pub struct EnsembleEvaluator {
    ens_id: String,
    iteration: usize,
    config: EvaluatorServerConfig,
    snapshot: Arc<Mutex<Snapshot>>,
    dispatcher_timeout: Duration,
    dispatcher_max_batch: usize,
}

impl EnsembleEvaluator {
    pub fn new(snapshot: Snapshot, config: EvaluatorServerConfig, iteration: usize) -> Self {
        Self::with_id(snapshot, config, iteration, uuid::Uuid::new_v4().to_string())
    }

    pub fn with_id(
        snapshot: Snapshot,
        config: EvaluatorServerConfig,
        iteration: usize,
        ens_id: String,
    ) -> Self {
        Self {
            ens_id,
            iteration,
            config,
            snapshot: Arc::new(Mutex::new(snapshot)),
            dispatcher_timeout: Duration::from_millis(500),
            dispatcher_max_batch: 500,
        }
    }

    /// Dispatcher tick parameters (tests shrink these).
    pub fn with_dispatcher(mut self, timeout: Duration, max_batch: usize) -> Self {
        self.dispatcher_timeout = timeout;
        self.dispatcher_max_batch = max_batch;
        self
    }

    pub fn ens_id(&self) -> &str {
        &self.ens_id
    }

    /// Current reconstructed snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.lock().clone()
    }

    fn full_snapshot_event(&self) -> Event {
        Event::now(
            Source::ensemble(&self.ens_id),
            EventPayload::EeSnapshot(SnapshotData {
                iter: self.iteration,
                snapshot: self.snapshot.lock().clone(),
            }),
        )
    }

    fn status_update_event(&self, status: EnsembleState) -> Event {
        let mut partial = PartialSnapshot::default();
        partial.set_status(status);
        Event::now(
            Source::ensemble(&self.ens_id),
            EventPayload::EeSnapshotUpdate(SnapshotUpdateData {
                iter: self.iteration,
                partial,
            }),
        )
    }

    /// Run one iteration to completion.
    ///
    /// Returns the exit status and hands the queue back for inspection.
    pub async fn run<C: Clock + 'static>(
        &self,
        queue: JobQueue<C>,
        output: Option<serde_json::Value>,
    ) -> Result<(ExitStatus, JobQueue<C>), EvaluatorError> {
        let (server, mut events_rx) = EvaluatorServer::start(self.config.clone()).await?;
        let server = Arc::new(server);
        let info = self.config.connection_info(server.local_addr());

        // Monitors connecting at any point start from the latest full view.
        server.set_greeting(Some(self.full_snapshot_event()));

        let dispatcher = BatchingDispatcher::new(self.dispatcher_timeout, self.dispatcher_max_batch);
        dispatcher.register_handler(&SNAPSHOT_EVENTS, self.snapshot_handler(&server), true);
        dispatcher.register_handler(
            &[EventKind::EnsembleFailed],
            self.failure_handler(&server),
            true,
        );

        let cancel = CancellationToken::new();
        let dispatcher_task = tokio::spawn(Arc::clone(&dispatcher).run(cancel.clone()));

        // Ingest loop: dispatch traffic and monitor control events.
        let stop_handle = queue.stop_handle();
        let cancelled = Arc::new(AtomicBool::new(false));
        let ingest_task = {
            let dispatcher = Arc::clone(&dispatcher);
            let cancelled = Arc::clone(&cancelled);
            tokio::spawn(async move {
                while let Some(event) = events_rx.recv().await {
                    match event.kind() {
                        EventKind::EeUserCancel => {
                            tracing::info!("user cancelled evaluation, stopping queue");
                            cancelled.store(true, Ordering::SeqCst);
                            stop_handle.stop();
                        }
                        EventKind::EeUserDone => {
                            tracing::debug!("monitor signalled done");
                        }
                        _ => {
                            if let Err(e) = dispatcher.handle_event(event).await {
                                tracing::warn!(error = %e, "dropping late event");
                            }
                        }
                    }
                }
            })
        };

        // The ensemble is live.
        {
            let mut snapshot = self.snapshot.lock();
            snapshot.reset_status(EnsembleState::Started);
        }
        let _ = server.broadcast(&self.status_update_event(EnsembleState::Started));

        // Stamp dispatch info into the run paths before anything is
        // submitted, so job runners know where to report.
        if let Err(e) = queue.add_dispatch_information_to_jobs_file(
            &self.ens_id,
            &info.dispatch_uri(),
            info.cert_pem.as_deref(),
            info.token.as_deref(),
            None,
        ) {
            tracing::warn!(error = %e, "failed to write dispatch info to run paths");
        }

        // Drive the queue against our own dispatch endpoint.
        let queue_task = {
            let mut publisher_config = PublisherConfig::new(info.dispatch_uri());
            if let Some(token) = &info.token {
                publisher_config = publisher_config.token(token.clone());
            }
            if let Some(cert) = &info.cert_pem {
                publisher_config = publisher_config.cert_pem(cert.clone());
            }
            let ens_id = self.ens_id.clone();
            let mut queue = queue;
            tokio::spawn(async move {
                let mut publisher = QueuePublisher::new(publisher_config);
                let result = queue.execute_via_websockets(&mut publisher, &ens_id).await;
                publisher.close().await;
                (result, queue)
            })
        };

        let (queue_result, queue) = queue_task
            .await
            .map_err(|e| EvaluatorError::QueueTask(e.to_string()))?;

        // Let in-flight frames reach the dispatcher, then drain it.
        tokio::time::sleep(self.dispatcher_timeout * 2).await;
        dispatcher.stop();
        let _ = dispatcher_task.await;

        let (final_status, exit) = match &queue_result {
            _ if cancelled.load(Ordering::SeqCst) => (
                EnsembleState::Cancelled,
                ExitStatus::Partial { failed: queue.failed_jobs() },
            ),
            Ok(QueueOutcome::Success) => (EnsembleState::Stopped, ExitStatus::Success),
            Ok(QueueOutcome::Partial { failed }) => {
                (EnsembleState::Stopped, ExitStatus::Partial { failed: *failed })
            }
            Ok(QueueOutcome::Failed) | Err(_) => (EnsembleState::Failed, ExitStatus::Failed),
        };
        if let Err(e) = &queue_result {
            log_queue_error(e);
        }

        {
            let mut snapshot = self.snapshot.lock();
            snapshot.reset_status(final_status);
        }
        let _ = server.broadcast(&self.status_update_event(final_status));
        server.set_greeting(Some(self.full_snapshot_event()));

        // Terminate: hand any output to the monitors, then shut down.
        let terminated = Event::now(
            Source::ensemble(&self.ens_id),
            EventPayload::EeTerminated(TerminatedData { result: output }),
        );
        let _ = server.broadcast(&terminated);

        // Give monitors a moment to drain their socket buffers.
        tokio::time::sleep(self.dispatcher_timeout).await;
        cancel.cancel();
        server.shutdown().await;
        ingest_task.abort();

        Ok((exit, queue))
    }

    /// Batch handler folding FM/ensemble events into the snapshot and
    /// broadcasting the merged partial.
    fn snapshot_handler(&self, server: &Arc<EvaluatorServer>) -> BatchHandler {
        let snapshot = Arc::clone(&self.snapshot);
        let server = Arc::clone(server);
        let ens_id = self.ens_id.clone();
        let iteration = self.iteration;
        Arc::new(move |events| {
            let snapshot = Arc::clone(&snapshot);
            let server = Arc::clone(&server);
            let ens_id = ens_id.clone();
            Box::pin(async move {
                if events.is_empty() {
                    return;
                }
                let mut partial = PartialSnapshot::default();
                {
                    let snap = snapshot.lock();
                    for event in &events {
                        if let Err(e) = partial.apply_event(event, &snap) {
                            tracing::warn!(error = %e, source = %event.source, "dropping event");
                        }
                    }
                }
                if partial.is_empty() {
                    return;
                }
                let full = {
                    let mut snap = snapshot.lock();
                    if let Err(e) = snap.merge(&partial) {
                        tracing::warn!(error = %e, "failed to merge batch into snapshot");
                        return;
                    }
                    snap.clone()
                };
                let update = Event::now(
                    Source::ensemble(&ens_id),
                    EventPayload::EeSnapshotUpdate(SnapshotUpdateData {
                        iter: iteration,
                        partial,
                    }),
                );
                let _ = server.broadcast(&update);
                server.set_greeting(Some(Event::now(
                    Source::ensemble(&ens_id),
                    EventPayload::EeSnapshot(SnapshotData { iter: iteration, snapshot: full }),
                )));
            })
        })
    }

    /// Failure handler for the dispatcher's synthesized `ENSEMBLE_FAILED`
    /// (empty batch): mark the ensemble failed and tell the monitors.
    fn failure_handler(&self, server: &Arc<EvaluatorServer>) -> BatchHandler {
        let snapshot = Arc::clone(&self.snapshot);
        let server = Arc::clone(server);
        let ens_id = self.ens_id.clone();
        let iteration = self.iteration;
        Arc::new(move |events| {
            let snapshot = Arc::clone(&snapshot);
            let server = Arc::clone(&server);
            let ens_id = ens_id.clone();
            Box::pin(async move {
                if !events.is_empty() {
                    // Real ENSEMBLE_FAILED events flow through the
                    // snapshot handler; this one only covers the
                    // dispatcher's failure fan-out.
                    return;
                }
                tracing::error!("dispatcher failed, marking ensemble failed");
                snapshot.lock().reset_status(EnsembleState::Failed);
                let mut partial = PartialSnapshot::default();
                partial.set_status(EnsembleState::Failed);
                let update = Event::now(
                    Source::ensemble(&ens_id),
                    EventPayload::EeSnapshotUpdate(SnapshotUpdateData {
                        iter: iteration,
                        partial,
                    }),
                );
                let _ = server.broadcast(&update);
            })
        })
    }
}

fn log_queue_error(error: &QueueError) {
    match error {
        QueueError::Incomplete { .. } => {
            tracing::error!(%error, "queue invariant breached");
        }
        QueueError::Publish(_) => {
            tracing::error!(%error, "queue lost its event channel");
        }
    }
}

#[cfg(test)]
#[path = "evaluator_tests.rs"]
mod tests;
