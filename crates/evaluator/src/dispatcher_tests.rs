// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use armada_core::test_support::{ensemble_event, job_success_event};
use armada_core::EventPayload;
use parking_lot::Mutex as PlMutex;
use std::time::Duration;

fn collector() -> (BatchHandler, Arc<PlMutex<Vec<Vec<Event>>>>) {
    let seen: Arc<PlMutex<Vec<Vec<Event>>>> = Arc::new(PlMutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler: BatchHandler = Arc::new(move |events| {
        let sink = Arc::clone(&sink);
        Box::pin(async move {
            sink.lock().push(events);
        })
    });
    (handler, seen)
}

fn fast_dispatcher() -> Arc<BatchingDispatcher> {
    BatchingDispatcher::new(Duration::from_millis(5), 100)
}

#[tokio::test]
async fn batched_events_reach_handler_grouped() {
    let dispatcher = fast_dispatcher();
    let (handler, seen) = collector();
    dispatcher.register_handler(&[EventKind::JobSuccess], handler, true);

    let cancel = CancellationToken::new();
    let task = tokio::spawn(Arc::clone(&dispatcher).run(cancel.clone()));

    dispatcher.handle_event(job_success_event(0, "0", "0")).await.unwrap();
    dispatcher.handle_event(job_success_event(1, "0", "1")).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    dispatcher.stop();
    task.await.unwrap();

    let batches = seen.lock();
    let total: usize = batches.iter().map(Vec::len).sum();
    assert_eq!(total, 2);
    // Arrival order is preserved within batches.
    let flat: Vec<_> = batches.iter().flatten().collect();
    assert_eq!(flat[0].source.job_id(), Some("0"));
    assert_eq!(flat[1].source.job_id(), Some("1"));
}

#[tokio::test]
async fn unregistered_kinds_are_ignored() {
    let dispatcher = fast_dispatcher();
    let (handler, seen) = collector();
    dispatcher.register_handler(&[EventKind::JobSuccess], handler, true);

    dispatcher
        .handle_event(ensemble_event(0, EventPayload::EnsembleStarted))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    dispatcher.stop();
    Arc::clone(&dispatcher).run(cancel).await;
    assert!(seen.lock().is_empty());
}

#[tokio::test]
async fn non_batching_handler_runs_synchronously() {
    let dispatcher = fast_dispatcher();
    let (handler, seen) = collector();
    dispatcher.register_handler(&[EventKind::EeUserCancel], handler, false);

    // No run loop at all: the handler still fires.
    dispatcher
        .handle_event(ensemble_event(0, EventPayload::EeUserCancel))
        .await
        .unwrap();
    assert_eq!(seen.lock().len(), 1);
}

#[tokio::test]
async fn events_after_completion_are_invalid() {
    let dispatcher = fast_dispatcher();
    let (handler, _seen) = collector();
    dispatcher.register_handler(&[EventKind::JobSuccess], handler, true);

    dispatcher.stop();
    Arc::clone(&dispatcher).run(CancellationToken::new()).await;
    assert!(dispatcher.is_done());

    let err = dispatcher.handle_event(job_success_event(0, "0", "0")).await.unwrap_err();
    assert!(matches!(err, DispatcherError::InvalidState));
}

#[tokio::test]
async fn cancellation_drains_buffered_events() {
    let dispatcher = BatchingDispatcher::new(Duration::from_secs(3600), 100);
    let (handler, seen) = collector();
    dispatcher.register_handler(&[EventKind::JobSuccess], handler, true);

    let cancel = CancellationToken::new();
    let task = tokio::spawn(Arc::clone(&dispatcher).run(cancel.clone()));

    dispatcher.handle_event(job_success_event(0, "0", "0")).await.unwrap();
    // The tick is an hour out; cancellation must still deliver the event.
    cancel.cancel();
    task.await.unwrap();

    assert_eq!(seen.lock().len(), 1);
}

#[tokio::test]
async fn handler_death_fans_out_ensemble_failed() {
    let dispatcher = fast_dispatcher();
    let dying: BatchHandler = Arc::new(|_events| {
        Box::pin(async {
            panic!("handler died");
        })
    });
    dispatcher.register_handler(&[EventKind::JobSuccess], dying, true);

    let (failure_handler, failures) = collector();
    dispatcher.register_handler(&[EventKind::EnsembleFailed], failure_handler, true);

    let task = tokio::spawn(Arc::clone(&dispatcher).run(CancellationToken::new()));
    dispatcher.handle_event(job_success_event(0, "0", "0")).await.unwrap();

    task.await.unwrap();
    let failures = failures.lock();
    // Failure handlers get an empty batch: there is no event to pass.
    assert_eq!(failures.len(), 1);
    assert!(failures[0].is_empty());
}

#[tokio::test]
async fn batch_size_is_respected_per_tick() {
    let dispatcher = BatchingDispatcher::new(Duration::from_millis(5), 2);
    let (handler, seen) = collector();
    dispatcher.register_handler(&[EventKind::JobSuccess], handler, true);

    let task = tokio::spawn(Arc::clone(&dispatcher).run(CancellationToken::new()));
    for i in 0..5 {
        dispatcher.handle_event(job_success_event(i, "0", &i.to_string())).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    dispatcher.stop();
    task.await.unwrap();

    let batches = seen.lock();
    assert!(batches.iter().all(|batch| batch.len() <= 2));
    let total: usize = batches.iter().map(Vec::len).sum();
    assert_eq!(total, 5);
}
