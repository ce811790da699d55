// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! armada-core: state vocabulary, events and the ensemble snapshot model.

pub mod macros;

pub mod clock;
pub mod config;
pub mod event;
pub mod snapshot;
pub mod state;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use clock::{Clock, FakeClock, SystemClock};
pub use config::{ConfigError, DriverKind, QueueConfig, LONG_RUNNING_FACTOR};
pub use event::{
    Event, EventDecodeError, EventKind, EventPayload, JobFailureData, JobRunningData,
    JobStartData, SnapshotData, SnapshotUpdateData, Source, TerminatedData,
};
pub use snapshot::{
    derive_realization_status, JobDelta, JobSnapshot, PartialSnapshot, RealizationDelta,
    RealizationSnapshot, Snapshot, SnapshotBuilder, SnapshotError, StepDelta, StepSnapshot,
    TIMEOUT_ERROR,
};
pub use state::{EnsembleState, JobState, QueueState, RealizationState, StepState};
