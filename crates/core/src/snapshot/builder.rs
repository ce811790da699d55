// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Builder for the iteration-start snapshot.

use super::{JobSnapshot, RealizationSnapshot, Snapshot, StepSnapshot};
use crate::state::{EnsembleState, JobState, RealizationState, StepState};
use indexmap::IndexMap;
use serde_json::Value;

/// Builds the planned step/job layout once, then stamps it out over every
/// realization id. The produced snapshot starts in the pre-run state
/// (ensemble `Unknown`, everything waiting) and is only ever advanced by
/// merges.
#[derive(Debug, Clone, Default)]
pub struct SnapshotBuilder {
    steps: IndexMap<String, StepSnapshot>,
    metadata: IndexMap<String, Value>,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_step(mut self, step_id: impl Into<String>, status: StepState) -> Self {
        self.steps.insert(step_id.into(), StepSnapshot { status, ..Default::default() });
        self
    }

    /// Add a planned job under a previously added step.
    ///
    /// Ignored with a warning when the step is unknown; the builder is used
    /// at iteration start where a missing step is a plan bug, not a reason
    /// to crash the evaluator.
    pub fn add_job(
        mut self,
        step_id: &str,
        job_id: impl Into<String>,
        index: impl Into<String>,
        name: Option<String>,
        status: JobState,
    ) -> Self {
        match self.steps.get_mut(step_id) {
            Some(step) => {
                step.jobs.insert(
                    job_id.into(),
                    JobSnapshot { status, index: index.into(), name, ..Default::default() },
                );
            }
            None => {
                tracing::warn!(step_id, "add_job: unknown step, dropping job from plan");
            }
        }
        self
    }

    pub fn add_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Stamp the planned steps over each realization id.
    pub fn build<I, S>(self, real_ids: I, status: RealizationState) -> Snapshot
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut snapshot = Snapshot::new(EnsembleState::Unknown);
        snapshot.metadata = self.metadata;
        for real_id in real_ids {
            snapshot.reals.insert(
                real_id.into(),
                RealizationSnapshot {
                    status,
                    active: true,
                    steps: self.steps.clone(),
                    ..Default::default()
                },
            );
        }
        snapshot
    }
}

#[cfg(test)]
#[path = "builder_tests.rs"]
mod tests;
