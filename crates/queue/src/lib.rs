// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! armada-queue: the job queue engine.
//!
//! A supervisor that owns a population of queued jobs, enforces concurrency
//! caps, drives retries, detects long-running outliers and publishes a
//! stream of state-change events to the evaluator.

pub mod differ;
pub mod driver;
pub mod node;
pub mod publisher;
pub mod queue;
pub mod runpath;

pub use differ::QueueDiffer;
pub use driver::{driver_for, Driver, DriverError, DriverHandle, DriverStatus, JobSpec};
pub use node::{Callback, CallbackError, FailKind, JobNode, NodeConfig, ThreadState};
pub use publisher::{PublishError, PublisherConfig, QueuePublisher};
pub use queue::{JobQueue, QueueError, QueueOutcome, StopHandle};
pub use runpath::{
    ForwardModelJob, JobsFile, CERT_FILE, ERROR_FILE, EXIT_FILE, JOBS_FILE, STATUS_FILE,
};

#[cfg(any(test, feature = "test-support"))]
pub use driver::fake::FakeDriver;
