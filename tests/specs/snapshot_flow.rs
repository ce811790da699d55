// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One-realization scenarios: happy path, job failure, step timeout and
//! the out-of-order guard.

use super::rig::Rig;
use armada_core::test_support::{
    ensemble_event, job_failure_event, job_running_event, job_start_event, job_success_event,
    step_event, waiting_snapshot,
};
use armada_core::{
    EnsembleState, EventPayload, JobState, PartialSnapshot, RealizationDelta, RealizationState,
    StepState,
};
use armada_evaluator::{TrackerError, TrackerEvent};

/// Drive the tracker until the End event, collecting progress values.
async fn consume(rig: &mut Rig) -> (Vec<f64>, bool, Option<String>) {
    let mut progress_values = Vec::new();
    loop {
        match rig.tracker.track().await.unwrap() {
            Some(TrackerEvent::FullSnapshot { progress, .. }) => progress_values.push(progress),
            Some(TrackerEvent::SnapshotUpdate { progress, partial, .. }) => {
                progress_values.push(progress);
                // The consumer reacts to the terminal ensemble status.
                match partial.status() {
                    Some(EnsembleState::Stopped) => {
                        let failed = rig
                            .tracker
                            .snapshot(0)
                            .map(|snapshot| {
                                snapshot.reals.values().any(|real| {
                                    real.status == RealizationState::Failed
                                })
                            })
                            .unwrap_or(false);
                        if failed {
                            rig.model.fail("ensemble evaluation failed");
                        } else {
                            rig.model.finish();
                        }
                        rig.server.shutdown().await;
                    }
                    Some(EnsembleState::Cancelled) => {
                        rig.model.finish();
                        rig.server.shutdown().await;
                    }
                    _ => {}
                }
            }
            Some(TrackerEvent::End { failed, failed_msg }) => {
                return (progress_values, failed, failed_msg);
            }
            None => panic!("stream ended without End event"),
        }
    }
}

#[tokio::test]
async fn s1_single_job_happy_path() {
    let mut rig = Rig::start(waiting_snapshot(&["0"], 1)).await;
    rig.publish_full();

    rig.publish_event(&ensemble_event(0, EventPayload::EnsembleStarted));
    rig.publish_event(&step_event(1, "0", EventPayload::StepWaiting));
    rig.publish_event(&job_start_event(2, "0", "0"));
    rig.publish_event(&job_running_event(3, "0", "0", 1024));
    rig.publish_event(&job_success_event(4, "0", "0"));
    rig.publish_event(&step_event(5, "0", EventPayload::StepSuccess));
    rig.publish_event(&ensemble_event(6, EventPayload::EnsembleStopped));

    let (progress_values, failed, _) = consume(&mut rig).await;
    assert!(!failed);

    // Progress starts at zero, ends at one, and never decreases.
    assert_eq!(progress_values.first(), Some(&0.0));
    assert_eq!(progress_values.last(), Some(&1.0));
    assert!(progress_values.windows(2).all(|pair| pair[0] <= pair[1]));

    let snapshot = rig.tracker.snapshot(0).unwrap();
    assert_eq!(snapshot.status, EnsembleState::Stopped);

    let real = snapshot.get_real("0").unwrap();
    assert_eq!(real.status, RealizationState::Finished);

    let step = snapshot.get_step("0", "0").unwrap();
    assert_eq!(step.status, StepState::Success);

    let job = snapshot.get_job("0", "0", "0").unwrap();
    assert_eq!(job.status, JobState::Finished);
    assert_eq!(job.stdout.as_deref(), Some("out"));
    assert_eq!(job.stderr.as_deref(), Some("err"));
    assert_eq!(job.data.get("max_memory_usage"), Some(&1024.into()));
    let (start, end) = (job.start_time.unwrap(), job.end_time.unwrap());
    assert!(start <= end);
}

#[tokio::test]
async fn s2_job_failure() {
    let mut rig = Rig::start(waiting_snapshot(&["0"], 1)).await;
    rig.publish_full();

    rig.publish_event(&ensemble_event(0, EventPayload::EnsembleStarted));
    rig.publish_event(&step_event(1, "0", EventPayload::StepWaiting));
    rig.publish_event(&job_start_event(2, "0", "0"));
    rig.publish_event(&job_running_event(3, "0", "0", 1024));
    rig.publish_event(&job_failure_event(4, "0", "0", "bad"));
    rig.publish_event(&step_event(5, "0", EventPayload::StepFailure));
    rig.publish_event(&ensemble_event(6, EventPayload::EnsembleStopped));

    let (_, failed, failed_msg) = consume(&mut rig).await;
    assert!(failed);
    assert!(failed_msg.is_some());

    let snapshot = rig.tracker.snapshot(0).unwrap();
    let real = snapshot.get_real("0").unwrap();
    assert_eq!(real.status, RealizationState::Failed);

    let job = snapshot.get_job("0", "0", "0").unwrap();
    assert_eq!(job.status, JobState::Failed);
    assert_eq!(job.error.as_deref(), Some("bad"));
}

#[tokio::test]
async fn s3_step_timeout_stamps_unfinished_jobs() {
    let mut rig = Rig::start(waiting_snapshot(&["0"], 2)).await;
    rig.publish_full();

    rig.publish_event(&ensemble_event(0, EventPayload::EnsembleStarted));
    rig.publish_event(&job_start_event(1, "0", "0"));
    rig.publish_event(&job_running_event(2, "0", "0", 512));
    // Job 1 started but never reported running.
    rig.publish_event(&job_start_event(3, "0", "1"));
    rig.publish_event(&step_event(4, "0", EventPayload::StepTimeout));
    rig.publish_event(&ensemble_event(5, EventPayload::EnsembleStopped));

    let (_, failed, _) = consume(&mut rig).await;
    assert!(failed);

    let snapshot = rig.tracker.snapshot(0).unwrap();
    assert_eq!(snapshot.get_step("0", "0").unwrap().status, StepState::Failed);
    assert_eq!(snapshot.get_real("0").unwrap().status, RealizationState::Failed);
    for job_id in ["0", "1"] {
        let job = snapshot.get_job("0", "0", job_id).unwrap();
        assert_eq!(job.status, JobState::Failed);
        assert_eq!(job.error.as_deref(), Some(armada_core::TIMEOUT_ERROR));
    }
}

#[tokio::test]
async fn s4_update_without_snapshot_is_out_of_order() {
    let mut rig = Rig::start(waiting_snapshot(&["0"], 1)).await;
    // Iteration 0 gets its snapshot; iteration 1 never does.
    rig.publish_full();
    match rig.tracker.track().await.unwrap() {
        Some(TrackerEvent::FullSnapshot { .. }) => {}
        other => panic!("expected full snapshot, got {other:?}"),
    }

    let mut partial = PartialSnapshot::default();
    partial.update_real("0", RealizationDelta { active: Some(false), ..Default::default() });
    rig.publish_partial(1, partial);

    let err = rig.tracker.track().await.unwrap_err();
    assert!(matches!(err, TrackerError::OutOfOrder(1)));

    rig.server.shutdown().await;
}
