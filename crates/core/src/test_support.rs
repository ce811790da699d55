// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers for use across crates.
//!
//! Gated behind `#[cfg(any(test, feature = "test-support"))]`.

use crate::event::{
    Event, EventPayload, JobFailureData, JobRunningData, JobStartData, Source,
};
use crate::snapshot::{Snapshot, SnapshotBuilder};
use crate::state::{JobState, RealizationState, StepState};
use chrono::{DateTime, TimeZone, Utc};

/// Deterministic timestamp `secs` after a fixed epoch.
pub fn test_time(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_600_000_000 + secs, 0)
        .single()
        .unwrap_or_default()
}

/// A one-real/one-step plan with `jobs` planned jobs, everything waiting.
pub fn waiting_snapshot(real_ids: &[&str], jobs: usize) -> Snapshot {
    let mut builder = SnapshotBuilder::new().add_step("0", StepState::Waiting);
    for job in 0..jobs {
        let id = job.to_string();
        builder = builder.add_job("0", id.clone(), id, None, JobState::Unknown);
    }
    builder.build(real_ids.iter().copied(), RealizationState::Waiting)
}

// ── Event factory functions ─────────────────────────────────────────────

pub fn job_start_event(secs: i64, real: &str, job: &str) -> Event {
    Event::new(
        Source::job("ee-test", real, "0", job, job),
        test_time(secs),
        EventPayload::JobStart(JobStartData {
            stdout: Some("out".to_string()),
            stderr: Some("err".to_string()),
        }),
    )
}

pub fn job_running_event(secs: i64, real: &str, job: &str, memory: u64) -> Event {
    Event::new(
        Source::job("ee-test", real, "0", job, job),
        test_time(secs),
        EventPayload::JobRunning(JobRunningData {
            max_memory_usage: memory,
            current_memory_usage: memory,
        }),
    )
}

pub fn job_success_event(secs: i64, real: &str, job: &str) -> Event {
    Event::new(
        Source::job("ee-test", real, "0", job, job),
        test_time(secs),
        EventPayload::JobSuccess,
    )
}

pub fn job_failure_event(secs: i64, real: &str, job: &str, error: &str) -> Event {
    Event::new(
        Source::job("ee-test", real, "0", job, job),
        test_time(secs),
        EventPayload::JobFailure(JobFailureData { error_msg: error.to_string() }),
    )
}

pub fn step_event(secs: i64, real: &str, payload: EventPayload) -> Event {
    Event::new(Source::step("ee-test", real, "0"), test_time(secs), payload)
}

pub fn ensemble_event(secs: i64, payload: EventPayload) -> Event {
    Event::new(Source::ensemble("ee-test"), test_time(secs), payload)
}
