// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Producer/observer rig for the scenario tests.
//!
//! The producer side owns the authoritative snapshot and translates wire
//! events into partials exactly the way the evaluator does; the observer
//! side is a real tracker connected over a real websocket.

use armada_core::test_support::test_time;
use armada_core::{
    Event, EventPayload, PartialSnapshot, Snapshot, SnapshotData, SnapshotUpdateData, Source,
};
use armada_evaluator::{
    EvaluatorServer, EvaluatorServerConfig, EvaluatorTracker, RunModel, SimpleRunModel,
};
use std::sync::Arc;
use std::time::Duration;

pub struct Rig {
    pub server: EvaluatorServer,
    pub model: Arc<SimpleRunModel>,
    pub tracker: EvaluatorTracker,
    /// Producer-side authoritative snapshot.
    pub snapshot: Snapshot,
    pub iter: usize,
}

/// Install a subscriber once so `RUST_LOG` works when a scenario fails.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

impl Rig {
    pub async fn start(snapshot: Snapshot) -> Self {
        init_tracing();
        let config = EvaluatorServerConfig::default();
        let (server, _events_rx) = EvaluatorServer::start(config.clone()).await.unwrap();
        let info = config.connection_info(server.local_addr());
        let model = Arc::new(SimpleRunModel::new(1));
        let tracker = EvaluatorTracker::with_monitor_wait(
            Arc::clone(&model) as Arc<dyn RunModel>,
            info,
            Duration::from_millis(20),
        );
        // Let the tracker's drainer connect before anything is broadcast.
        tokio::time::sleep(Duration::from_millis(100)).await;
        Self { server, model, tracker, snapshot, iter: 0 }
    }

    /// Publish the full snapshot for the current iteration.
    pub fn publish_full(&self) {
        let event = Event::new(
            Source::ensemble("ee-test"),
            test_time(0),
            EventPayload::EeSnapshot(SnapshotData {
                iter: self.iter,
                snapshot: self.snapshot.clone(),
            }),
        );
        self.server.broadcast(&event).unwrap();
    }

    /// Translate one wire event into a partial, fold it into the producer
    /// snapshot, and publish the update — the evaluator's own pipeline.
    pub fn publish_event(&mut self, event: &Event) {
        let partial = PartialSnapshot::from_event(event, &self.snapshot).unwrap();
        self.snapshot.merge(&partial).unwrap();
        self.publish_partial(self.iter, partial);
    }

    /// Publish a raw partial for an arbitrary iteration.
    pub fn publish_partial(&self, iter: usize, partial: PartialSnapshot) {
        let event = Event::new(
            Source::ensemble("ee-test"),
            test_time(0),
            EventPayload::EeSnapshotUpdate(SnapshotUpdateData { iter, partial }),
        );
        self.server.broadcast(&event).unwrap();
    }
}
