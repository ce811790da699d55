// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconnect convergence: a dropped dispatch socket must not lose state —
//! after reconnecting, the queue republishes its full differ view and the
//! observer converges to the same terminal picture.

use armada_core::{Event, EventKind, QueueConfig};
use armada_queue::{
    DriverStatus, FakeDriver, JobNode, JobQueue, JobSpec, NodeConfig, PublisherConfig,
    QueueOutcome, QueuePublisher,
};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Accept dispatch connections; drop the first connection after
/// `drop_after` frames, then accept follow-ups normally.
async fn flaky_server(
    listener: TcpListener,
    frames_tx: mpsc::UnboundedSender<Event>,
    drop_after: usize,
) {
    let mut first = true;
    while let Ok((stream, _)) = listener.accept().await {
        let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
            continue;
        };
        let limit = if first { Some(drop_after) } else { None };
        first = false;

        let mut received = 0usize;
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Text(text) = message {
                if let Ok(event) = Event::from_json(&text) {
                    let _ = frames_tx.send(event);
                }
                received += 1;
                if limit.is_some_and(|limit| received >= limit) {
                    // Hang up mid-stream.
                    break;
                }
            }
        }
    }
}

#[tokio::test]
async fn s5_observer_converges_after_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
    tokio::spawn(flaky_server(listener, frames_tx, 3));

    let driver = Arc::new(
        FakeDriver::new()
            .script(&[DriverStatus::Pending, DriverStatus::Running, DriverStatus::Done])
            .script(&[DriverStatus::Pending, DriverStatus::Running, DriverStatus::Done])
            .script(&[DriverStatus::Pending, DriverStatus::Running, DriverStatus::Done]),
    );
    let mut queue = JobQueue::new(driver, QueueConfig::default(), 3)
        .with_tick(Duration::from_millis(10));
    for iens in 0..3 {
        queue.add_job(
            Arc::new(JobNode::new(
                NodeConfig::new(JobSpec::new(format!("real-{iens}"), "/bin/true", "/tmp"))
                    .poll_interval(Duration::from_millis(1)),
            )),
            iens,
        );
    }

    let mut publisher = QueuePublisher::new(
        PublisherConfig::new(format!("ws://{addr}/dispatch"))
            .backoff_start(Duration::from_millis(10)),
    );
    let outcome = queue.execute_via_websockets(&mut publisher, "ens-1").await.unwrap();
    publisher.close().await;
    assert_eq!(outcome, QueueOutcome::Success);

    // Fold the observed stream: last event kind per realization.
    let mut last_kind: HashMap<String, EventKind> = HashMap::new();
    let mut total = 0usize;
    while let Ok(event) = frames_rx.try_recv() {
        total += 1;
        if let Some(real) = event.source.real_id() {
            last_kind.insert(real.to_string(), event.kind());
        }
    }

    // The first connection died after three frames, yet every realization
    // still converges to SUCCESS thanks to the full republish.
    assert!(total > 3);
    assert_eq!(last_kind.len(), 3);
    for real in ["0", "1", "2"] {
        assert_eq!(last_kind.get(real), Some(&EventKind::StepSuccess), "real {real}");
    }
}
