// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Batching dispatcher — timer-and-size triggered fan-out of events.
//!
//! Handlers register for event types; buffered events drain once per tick,
//! grouped per handler. Ordering across a tick is per `(real, step, job)`
//! via the snapshot's monotonic merge, not per event arrival, so the
//! adaptive throttle below is free to reshape batches.

use armada_core::{Event, EventKind};
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A handler receives every buffered event of its registered types for one
/// tick, in arrival order.
pub type BatchHandler = Arc<dyn Fn(Vec<Event>) -> BoxFuture<'static, ()> + Send + Sync>;

/// A tick that processes at least this long triggers throttling.
const SLOW_TICK: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum DispatcherError {
    /// `handle_event` after the dispatcher completed.
    #[error("invalid state: event received after dispatcher completed")]
    InvalidState,
}

struct Registration {
    id: usize,
    handler: BatchHandler,
    batching: bool,
}

struct Shared {
    handlers: HashMap<EventKind, Vec<Arc<Registration>>>,
    buffer: Vec<(Arc<Registration>, Event)>,
    timeout: Duration,
    max_batch: usize,
    next_id: usize,
}

/// Timer-and-size triggered event fan-out.
pub struct BatchingDispatcher {
    shared: Mutex<Shared>,
    base_timeout: Duration,
    base_max_batch: usize,
    running: AtomicBool,
    done: AtomicBool,
}

impl BatchingDispatcher {
    pub fn new(timeout: Duration, max_batch: usize) -> Arc<Self> {
        Arc::new(Self {
            shared: Mutex::new(Shared {
                handlers: HashMap::new(),
                buffer: Vec::new(),
                timeout,
                max_batch: max_batch.max(1),
                next_id: 0,
            }),
            base_timeout: timeout,
            base_max_batch: max_batch.max(1),
            running: AtomicBool::new(true),
            done: AtomicBool::new(false),
        })
    }

    /// Attach `handler` to one or more event types.
    ///
    /// With `batching` false the handler runs synchronously inside
    /// `handle_event` instead of on the tick.
    pub fn register_handler(&self, kinds: &[EventKind], handler: BatchHandler, batching: bool) {
        let mut shared = self.shared.lock();
        let id = shared.next_id;
        shared.next_id += 1;
        let registration = Arc::new(Registration { id, handler, batching });
        for kind in kinds {
            shared.handlers.entry(*kind).or_default().push(Arc::clone(&registration));
        }
    }

    /// Buffer (or immediately run) one event.
    pub async fn handle_event(&self, event: Event) -> Result<(), DispatcherError> {
        let registrations: Vec<Arc<Registration>> = {
            let shared = self.shared.lock();
            shared.handlers.get(&event.kind()).cloned().unwrap_or_default()
        };
        for registration in registrations {
            if registration.batching {
                if self.done.load(Ordering::SeqCst) {
                    return Err(DispatcherError::InvalidState);
                }
                self.shared.lock().buffer.push((registration, event.clone()));
            } else {
                (registration.handler)(vec![event.clone()]).await;
            }
        }
        Ok(())
    }

    /// End the loop after the next drain.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    fn current_timeout(&self) -> Duration {
        self.shared.lock().timeout
    }

    /// Drain up to `max_batch` buffered events, grouped per handler.
    ///
    /// Returns false when a handler died; the caller fans out the failure.
    async fn work(&self) -> bool {
        let (batch, left_in_buffer) = {
            let mut shared = self.shared.lock();
            if shared.buffer.is_empty() {
                return true;
            }
            let take = shared.max_batch.min(shared.buffer.len());
            let batch: Vec<_> = shared.buffer.drain(..take).collect();
            (batch, shared.buffer.len())
        };

        let started = std::time::Instant::now();
        let batch_len = batch.len();

        // Group by handler, preserving arrival order within each group.
        let mut order: Vec<usize> = Vec::new();
        let mut groups: HashMap<usize, (BatchHandler, Vec<Event>)> = HashMap::new();
        for (registration, event) in batch {
            let entry = groups.entry(registration.id).or_insert_with(|| {
                order.push(registration.id);
                (Arc::clone(&registration.handler), Vec::new())
            });
            entry.1.push(event);
        }

        let mut ok = true;
        let mut joins = Vec::new();
        for id in order {
            if let Some((handler, events)) = groups.remove(&id) {
                joins.push(tokio::spawn(async move { handler(events).await }));
            }
        }
        for join in joins {
            if let Err(e) = join.await {
                tracing::warn!(error = %e, "dispatcher handler died");
                ok = false;
            }
        }

        let elapsed = started.elapsed();
        tracing::debug!(
            processed = batch_len,
            left_in_buffer,
            elapsed_secs = elapsed.as_secs_f64(),
            "dispatcher tick"
        );

        // Adaptive throttling: a slow tick shrinks the batch and widens the
        // tick; a fast one restores the configured values.
        let mut shared = self.shared.lock();
        if elapsed >= SLOW_TICK {
            shared.max_batch = (self.base_max_batch / 10).max(1);
            shared.timeout = self.base_timeout * 10;
            tracing::debug!(max_batch = shared.max_batch, timeout = ?shared.timeout, "throttling dispatcher");
        } else if shared.max_batch != self.base_max_batch {
            shared.max_batch = self.base_max_batch;
            shared.timeout = self.base_timeout;
            tracing::debug!("dispatcher throttle restored");
        }
        ok
    }

    /// Tick loop. Runs until [`BatchingDispatcher::stop`] or cancellation;
    /// drains remaining buffered events before exiting either way.
    ///
    /// When a handler dies mid-batch an `ENSEMBLE_FAILED` is synthesized to
    /// any handlers registered for it, bypassing the buffer.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut failed = false;
        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("dispatcher cancelled, draining buffer");
                    break;
                }
                _ = tokio::time::sleep(self.current_timeout()) => {
                    if !self.work().await {
                        failed = true;
                        break;
                    }
                }
            }
        }

        // Make sure no events are lingering.
        if !self.work().await {
            failed = true;
        }
        self.done.store(true, Ordering::SeqCst);

        if failed {
            self.fan_out_failure().await;
        } else {
            tracing::debug!("dispatcher finished normally");
        }
    }

    /// Synthesize an `ENSEMBLE_FAILED` to its registered handlers.
    async fn fan_out_failure(&self) {
        let registrations: Vec<Arc<Registration>> = {
            let shared = self.shared.lock();
            shared
                .handlers
                .get(&EventKind::EnsembleFailed)
                .cloned()
                .unwrap_or_default()
        };
        for registration in registrations {
            (registration.handler)(Vec::new()).await;
        }
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
