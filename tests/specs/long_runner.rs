// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Long-runner policy: with enough completed realizations, an outlier past
//! `long_running_factor × avg_runtime` is killed and its realization fails.

use armada_core::{
    EventKind, FakeClock, PartialSnapshot, QueueConfig, QueueState, RealizationState, Snapshot,
};
use armada_queue::{DriverStatus, FakeDriver, JobNode, JobQueue, JobSpec, NodeConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

#[tokio::test]
async fn s6_long_running_outlier_is_killed() {
    // Nine realizations completed with an average runtime of 10s; the
    // tenth sits at 13s, past the 1.25 × 10s threshold.
    let clock = FakeClock::new();
    clock.advance(Duration::from_secs(100));

    let driver = Arc::new(FakeDriver::new().script(&[DriverStatus::Running]));
    let config = QueueConfig::default().min_realizations_required(5);
    let mut queue = JobQueue::with_clock(
        Arc::clone(&driver) as Arc<dyn armada_queue::Driver>,
        config,
        10,
        clock.clone(),
    )
    .with_tick(Duration::from_millis(10));

    for iens in 0..9 {
        let node = Arc::new(JobNode::with_clock(
            NodeConfig::new(JobSpec::new(format!("done-{iens}"), "/bin/true", "/tmp")),
            clock.clone(),
        ));
        node.force_settled(QueueState::Success, Duration::from_secs(10));
        queue.add_job(node, iens);
    }
    let victim = Arc::new(JobNode::with_clock(
        NodeConfig::new(JobSpec::new("victim", "/bin/true", "/tmp"))
            .poll_interval(Duration::from_millis(1)),
        clock.clone(),
    ));
    queue.add_job(Arc::clone(&victim), 9);
    victim.start(
        Arc::clone(&driver) as Arc<dyn armada_queue::Driver>,
        Arc::new(Semaphore::new(1)),
        2,
    );

    for _ in 0..500 {
        if victim.status() == QueueState::Running {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(victim.status(), QueueState::Running);
    clock.advance(Duration::from_secs(13));

    queue.stop_long_running_jobs();
    for _ in 0..500 {
        if victim.status() == QueueState::IsKilled {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(victim.status(), QueueState::IsKilled);

    // The kill surfaces on the bus as a step failure, failing the
    // victim's realization in the observed snapshot.
    let changes = queue.changes_after_transition();
    let events = queue.change_events("ens-1", &changes);
    let kill_event = events
        .iter()
        .find(|event| event.source.real_id() == Some("9"))
        .expect("change event for the killed realization");
    assert_eq!(kill_event.kind(), EventKind::StepFailure);

    let mut snapshot = Snapshot::default();
    for event in &events {
        let partial = PartialSnapshot::from_event(event, &snapshot).unwrap();
        snapshot.merge(&partial).unwrap();
    }
    assert_eq!(
        snapshot.get_real("9").unwrap().status,
        RealizationState::Failed
    );
}

#[tokio::test]
async fn below_threshold_runner_survives() {
    let clock = FakeClock::new();
    clock.advance(Duration::from_secs(100));

    let driver = Arc::new(FakeDriver::new().script(&[DriverStatus::Running]));
    let config = QueueConfig::default().min_realizations_required(5);
    let mut queue = JobQueue::with_clock(
        Arc::clone(&driver) as Arc<dyn armada_queue::Driver>,
        config,
        10,
        clock.clone(),
    );

    for iens in 0..9 {
        let node = Arc::new(JobNode::with_clock(
            NodeConfig::new(JobSpec::new(format!("done-{iens}"), "/bin/true", "/tmp")),
            clock.clone(),
        ));
        node.force_settled(QueueState::Success, Duration::from_secs(10));
        queue.add_job(node, iens);
    }
    let runner = Arc::new(JobNode::with_clock(
        NodeConfig::new(JobSpec::new("runner", "/bin/true", "/tmp"))
            .poll_interval(Duration::from_millis(1)),
        clock.clone(),
    ));
    queue.add_job(Arc::clone(&runner), 9);
    runner.start(
        Arc::clone(&driver) as Arc<dyn armada_queue::Driver>,
        Arc::new(Semaphore::new(1)),
        2,
    );

    for _ in 0..500 {
        if runner.status() == QueueState::Running {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    // 12s < 1.25 × 10s: inside the threshold, left alone.
    clock.advance(Duration::from_secs(12));
    queue.stop_long_running_jobs();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(runner.status(), QueueState::Running);

    runner.stop();
}
