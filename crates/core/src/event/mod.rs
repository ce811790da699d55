// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire events for the evaluator bus.
//!
//! Every event is a CloudEvents-style envelope `{id, source, type, time,
//! data}`. The `type`/`data` pair is modelled as [`EventPayload`], a tagged
//! sum type with one payload struct per event type, so the codec boundary is
//! a single serde (de)serialization and everything behind it is typed.

mod source;

pub use source::Source;

use crate::snapshot::{PartialSnapshot, Snapshot};
use crate::state::{EnsembleState, JobState, StepState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The closed set of event types, used as handler registration keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    JobStart,
    JobRunning,
    JobSuccess,
    JobFailure,
    StepWaiting,
    StepPending,
    StepRunning,
    StepSuccess,
    StepFailure,
    StepTimeout,
    StepUnknown,
    EnsembleStarted,
    EnsembleStopped,
    EnsembleCancelled,
    EnsembleFailed,
    EeSnapshot,
    EeSnapshotUpdate,
    EeTerminated,
    EeUserCancel,
    EeUserDone,
}

crate::simple_display! {
    EventKind {
        JobStart => "FM_JOB_START",
        JobRunning => "FM_JOB_RUNNING",
        JobSuccess => "FM_JOB_SUCCESS",
        JobFailure => "FM_JOB_FAILURE",
        StepWaiting => "FM_STEP_WAITING",
        StepPending => "FM_STEP_PENDING",
        StepRunning => "FM_STEP_RUNNING",
        StepSuccess => "FM_STEP_SUCCESS",
        StepFailure => "FM_STEP_FAILURE",
        StepTimeout => "FM_STEP_TIMEOUT",
        StepUnknown => "FM_STEP_UNKNOWN",
        EnsembleStarted => "ENSEMBLE_STARTED",
        EnsembleStopped => "ENSEMBLE_STOPPED",
        EnsembleCancelled => "ENSEMBLE_CANCELLED",
        EnsembleFailed => "ENSEMBLE_FAILED",
        EeSnapshot => "EE_SNAPSHOT",
        EeSnapshotUpdate => "EE_SNAPSHOT_UPDATE",
        EeTerminated => "EE_TERMINATED",
        EeUserCancel => "EE_USER_CANCEL",
        EeUserDone => "EE_USER_DONE",
    }
}

/// `FM_JOB_START` side-data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStartData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

/// `FM_JOB_RUNNING` side-data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRunningData {
    pub max_memory_usage: u64,
    pub current_memory_usage: u64,
}

/// `FM_JOB_FAILURE` side-data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailureData {
    pub error_msg: String,
}

/// `EE_SNAPSHOT` side-data: a full snapshot for one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotData {
    pub iter: usize,
    pub snapshot: Snapshot,
}

/// `EE_SNAPSHOT_UPDATE` side-data: a partial for one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotUpdateData {
    pub iter: usize,
    pub partial: PartialSnapshot,
}

/// `EE_TERMINATED` side-data: serialized output record handles, if any.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TerminatedData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

/// Event type plus per-type payload.
///
/// Serializes as `{"type": "...", "data": {...}}`; types without side-data
/// omit `data` and accept `null` on decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    #[serde(rename = "FM_JOB_START")]
    JobStart(JobStartData),
    #[serde(rename = "FM_JOB_RUNNING")]
    JobRunning(JobRunningData),
    #[serde(rename = "FM_JOB_SUCCESS")]
    JobSuccess,
    #[serde(rename = "FM_JOB_FAILURE")]
    JobFailure(JobFailureData),

    #[serde(rename = "FM_STEP_WAITING")]
    StepWaiting,
    #[serde(rename = "FM_STEP_PENDING")]
    StepPending,
    #[serde(rename = "FM_STEP_RUNNING")]
    StepRunning,
    #[serde(rename = "FM_STEP_SUCCESS")]
    StepSuccess,
    #[serde(rename = "FM_STEP_FAILURE")]
    StepFailure,
    #[serde(rename = "FM_STEP_TIMEOUT")]
    StepTimeout,
    #[serde(rename = "FM_STEP_UNKNOWN")]
    StepUnknown,

    #[serde(rename = "ENSEMBLE_STARTED")]
    EnsembleStarted,
    #[serde(rename = "ENSEMBLE_STOPPED")]
    EnsembleStopped,
    #[serde(rename = "ENSEMBLE_CANCELLED")]
    EnsembleCancelled,
    #[serde(rename = "ENSEMBLE_FAILED")]
    EnsembleFailed,

    #[serde(rename = "EE_SNAPSHOT")]
    EeSnapshot(SnapshotData),
    #[serde(rename = "EE_SNAPSHOT_UPDATE")]
    EeSnapshotUpdate(SnapshotUpdateData),
    #[serde(rename = "EE_TERMINATED")]
    EeTerminated(TerminatedData),
    #[serde(rename = "EE_USER_CANCEL")]
    EeUserCancel,
    #[serde(rename = "EE_USER_DONE")]
    EeUserDone,
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::JobStart(_) => EventKind::JobStart,
            Self::JobRunning(_) => EventKind::JobRunning,
            Self::JobSuccess => EventKind::JobSuccess,
            Self::JobFailure(_) => EventKind::JobFailure,
            Self::StepWaiting => EventKind::StepWaiting,
            Self::StepPending => EventKind::StepPending,
            Self::StepRunning => EventKind::StepRunning,
            Self::StepSuccess => EventKind::StepSuccess,
            Self::StepFailure => EventKind::StepFailure,
            Self::StepTimeout => EventKind::StepTimeout,
            Self::StepUnknown => EventKind::StepUnknown,
            Self::EnsembleStarted => EventKind::EnsembleStarted,
            Self::EnsembleStopped => EventKind::EnsembleStopped,
            Self::EnsembleCancelled => EventKind::EnsembleCancelled,
            Self::EnsembleFailed => EventKind::EnsembleFailed,
            Self::EeSnapshot(_) => EventKind::EeSnapshot,
            Self::EeSnapshotUpdate(_) => EventKind::EeSnapshotUpdate,
            Self::EeTerminated(_) => EventKind::EeTerminated,
            Self::EeUserCancel => EventKind::EeUserCancel,
            Self::EeUserDone => EventKind::EeUserDone,
        }
    }
}

impl EventKind {
    pub fn is_job(self) -> bool {
        matches!(
            self,
            Self::JobStart | Self::JobRunning | Self::JobSuccess | Self::JobFailure
        )
    }

    pub fn is_step(self) -> bool {
        matches!(
            self,
            Self::StepWaiting
                | Self::StepPending
                | Self::StepRunning
                | Self::StepSuccess
                | Self::StepFailure
                | Self::StepTimeout
                | Self::StepUnknown
        )
    }

    pub fn is_ensemble(self) -> bool {
        matches!(
            self,
            Self::EnsembleStarted
                | Self::EnsembleStopped
                | Self::EnsembleCancelled
                | Self::EnsembleFailed
        )
    }

    /// Event-type → job-state mapping.
    pub fn job_state(self) -> Option<JobState> {
        match self {
            Self::JobStart => Some(JobState::Start),
            Self::JobRunning => Some(JobState::Running),
            Self::JobSuccess => Some(JobState::Finished),
            Self::JobFailure => Some(JobState::Failed),
            _ => None,
        }
    }

    /// Event-type → step-state mapping; `TIMEOUT` maps to failure.
    pub fn step_state(self) -> Option<StepState> {
        match self {
            Self::StepWaiting => Some(StepState::Waiting),
            Self::StepPending => Some(StepState::Pending),
            Self::StepRunning => Some(StepState::Running),
            Self::StepSuccess => Some(StepState::Success),
            Self::StepFailure | Self::StepTimeout => Some(StepState::Failed),
            Self::StepUnknown => Some(StepState::Unknown),
            _ => None,
        }
    }

    /// Event-type → ensemble-state mapping (identity).
    pub fn ensemble_state(self) -> Option<EnsembleState> {
        match self {
            Self::EnsembleStarted => Some(EnsembleState::Started),
            Self::EnsembleStopped => Some(EnsembleState::Stopped),
            Self::EnsembleCancelled => Some(EnsembleState::Cancelled),
            Self::EnsembleFailed => Some(EnsembleState::Failed),
            _ => None,
        }
    }
}

/// One event on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub source: Source,
    pub time: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

#[derive(Debug, thiserror::Error)]
pub enum EventDecodeError {
    #[error("malformed event frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl Event {
    /// New event stamped with a fresh id and the given wall-clock time.
    pub fn new(source: Source, time: DateTime<Utc>, payload: EventPayload) -> Self {
        Self { id: Uuid::new_v4(), source, time, payload }
    }

    /// New event stamped with the current wall-clock time.
    pub fn now(source: Source, payload: EventPayload) -> Self {
        Self::new(source, Utc::now(), payload)
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn to_json(&self) -> Result<String, EventDecodeError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, EventDecodeError> {
        Ok(serde_json::from_str(text)?)
    }

    /// The ensemble status carried by this event, if any.
    ///
    /// Ensemble events carry it by type; snapshot events carry it inside
    /// their payload. Used by the tracker's drainer to detect termination.
    pub fn ensemble_status(&self) -> Option<EnsembleState> {
        match &self.payload {
            EventPayload::EeSnapshot(data) => Some(data.snapshot.status),
            EventPayload::EeSnapshotUpdate(data) => data.partial.status(),
            payload => payload.kind().ensemble_state(),
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
