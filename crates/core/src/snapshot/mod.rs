// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hierarchical ensemble snapshot: ensemble → realization → step → job.
//!
//! The snapshot is the authoritative view of one iteration. It is built once
//! by [`SnapshotBuilder`] with the planned steps and jobs, then mutated only
//! through [`Snapshot::merge`] with [`PartialSnapshot`] deltas. Sibling
//! ordering is insertion order (`IndexMap`), which keeps presentation stable
//! without being load-bearing for correctness.

mod builder;
mod partial;

pub use builder::SnapshotBuilder;
pub use partial::{JobDelta, PartialSnapshot, RealizationDelta, StepDelta};

use crate::state::{EnsembleState, JobState, RealizationState, StepState};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error stamped on jobs cut short by a step timeout.
pub const TIMEOUT_ERROR: &str = "cancelled due to reaching MAX_RUNTIME";

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// A partial referenced a key the snapshot does not contain.
    #[error("invalid field: no {level} {key:?} in snapshot")]
    InvalidField { level: &'static str, key: String },

    /// An event source path is missing the ids its type requires.
    #[error("source {addr:?} does not address a {level}")]
    InvalidSource { level: &'static str, addr: String },

    /// The event type has no snapshot mapping.
    #[error("unsupported event type {0} for snapshot update")]
    UnsupportedEvent(String),
}

/// One job within a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub status: JobState,
    pub index: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub data: IndexMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl Default for JobSnapshot {
    fn default() -> Self {
        Self {
            status: JobState::Unknown,
            index: String::new(),
            start_time: None,
            end_time: None,
            name: None,
            data: IndexMap::new(),
            error: None,
            stdout: None,
            stderr: None,
        }
    }
}

/// One step within a realization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSnapshot {
    pub status: StepState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub jobs: IndexMap<String, JobSnapshot>,
}

impl Default for StepSnapshot {
    fn default() -> Self {
        Self {
            status: StepState::Unknown,
            start_time: None,
            end_time: None,
            jobs: IndexMap::new(),
        }
    }
}

/// One realization of the ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealizationSnapshot {
    pub status: RealizationState,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub steps: IndexMap<String, StepSnapshot>,
}

impl Default for RealizationSnapshot {
    fn default() -> Self {
        Self {
            status: RealizationState::Unknown,
            active: true,
            start_time: None,
            end_time: None,
            steps: IndexMap::new(),
        }
    }
}

/// The ensemble state tree for one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub status: EnsembleState,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub metadata: IndexMap<String, Value>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub reals: IndexMap<String, RealizationSnapshot>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            status: EnsembleState::Unknown,
            metadata: IndexMap::new(),
            reals: IndexMap::new(),
        }
    }
}

/// Realization status derived from its steps.
///
/// Running beats everything while any step is in flight; a failure settles
/// the realization only once nothing further is pending; all-success
/// finishes it.
pub fn derive_realization_status<'a>(
    steps: impl IntoIterator<Item = &'a StepSnapshot>,
) -> RealizationState {
    let mut any = false;
    let mut running = false;
    let mut failed = false;
    let mut waiting = false;
    let mut all_success = true;
    for step in steps {
        any = true;
        match step.status {
            StepState::Running | StepState::Pending => running = true,
            StepState::Failed => failed = true,
            StepState::Waiting | StepState::Unknown => waiting = true,
            StepState::Success => {}
        }
        if step.status != StepState::Success {
            all_success = false;
        }
    }
    if !any {
        RealizationState::Unknown
    } else if running {
        RealizationState::Running
    } else if failed && !waiting {
        RealizationState::Failed
    } else if all_success {
        RealizationState::Finished
    } else {
        RealizationState::Waiting
    }
}

/// Keep the earliest observed start time.
fn merge_start(slot: &mut Option<DateTime<Utc>>, new: Option<DateTime<Utc>>) {
    if let Some(new) = new {
        if slot.map_or(true, |old| new < old) {
            *slot = Some(new);
        }
    }
}

/// Keep the latest observed end time.
fn merge_end(slot: &mut Option<DateTime<Utc>>, new: Option<DateTime<Utc>>) {
    if let Some(new) = new {
        if slot.map_or(true, |old| new > old) {
            *slot = Some(new);
        }
    }
}

impl Snapshot {
    pub fn new(status: EnsembleState) -> Self {
        Self { status, ..Default::default() }
    }

    pub fn get_real(&self, real_id: &str) -> Option<&RealizationSnapshot> {
        self.reals.get(real_id)
    }

    pub fn get_step(&self, real_id: &str, step_id: &str) -> Option<&StepSnapshot> {
        self.reals.get(real_id)?.steps.get(step_id)
    }

    pub fn get_job(&self, real_id: &str, step_id: &str, job_id: &str) -> Option<&JobSnapshot> {
        self.get_step(real_id, step_id)?.jobs.get(job_id)
    }

    pub fn all_steps_finished(&self, real_id: &str) -> bool {
        self.reals
            .get(real_id)
            .map(|real| real.steps.values().all(|step| step.status == StepState::Success))
            .unwrap_or(false)
    }

    pub fn successful_realizations(&self) -> usize {
        self.reals
            .values()
            .filter(|real| real.status == RealizationState::Finished)
            .count()
    }

    /// Count of realizations per status, in first-seen order.
    pub fn aggregate_real_states(&self) -> IndexMap<RealizationState, usize> {
        let mut counts = IndexMap::new();
        for real in self.reals.values() {
            *counts.entry(real.status).or_insert(0) += 1;
        }
        counts
    }

    /// Forcibly reset the ensemble status, bypassing the monotonic guard.
    pub fn reset_status(&mut self, status: EnsembleState) {
        self.status = status;
    }

    /// Apply a partial update.
    ///
    /// Deep, field-wise and idempotent. A partial may only reference keys
    /// already present, unless this snapshot is a fresh bootstrap (no reals
    /// yet), in which case referenced entities are created. Terminal
    /// realization statuses never regress, and the ensemble status only
    /// moves forward.
    pub fn merge(&mut self, partial: &PartialSnapshot) -> Result<(), SnapshotError> {
        let bootstrap = self.reals.is_empty();

        if let Some(status) = partial.status() {
            if self.status.can_advance_to(status) {
                self.status = status;
            } else {
                tracing::debug!(current = %self.status, update = %status, "ignoring ensemble status regression");
            }
        }
        for (key, value) in partial.metadata() {
            self.metadata.insert(key.clone(), value.clone());
        }

        for (real_id, delta) in partial.reals() {
            let real = lookup(&mut self.reals, real_id, bootstrap, "realization")?;
            if let Some(active) = delta.active {
                real.active = active;
            }
            merge_start(&mut real.start_time, delta.start_time);
            merge_end(&mut real.end_time, delta.end_time);
            if let Some(status) = delta.status {
                if !real.status.is_terminal() && status.rank() >= real.status.rank() {
                    real.status = status;
                }
            }
        }

        for ((real_id, step_id), delta) in partial.steps() {
            let real = lookup(&mut self.reals, real_id, bootstrap, "realization")?;
            let step = lookup(&mut real.steps, step_id, bootstrap, "step")?;
            merge_start(&mut step.start_time, delta.start_time);
            merge_end(&mut step.end_time, delta.end_time);
            if let Some(status) = delta.status {
                if status.rank() >= step.status.rank() {
                    step.status = status;
                }
            }
        }

        for ((real_id, step_id, job_id), delta) in partial.jobs() {
            let real = lookup(&mut self.reals, real_id, bootstrap, "realization")?;
            let step = lookup(&mut real.steps, step_id, bootstrap, "step")?;
            let job = lookup(&mut step.jobs, job_id, bootstrap, "job")?;
            if let Some(index) = &delta.index {
                job.index = index.clone();
            }
            if let Some(name) = &delta.name {
                job.name = Some(name.clone());
            }
            if let Some(data) = &delta.data {
                for (key, value) in data {
                    job.data.insert(key.clone(), value.clone());
                }
            }
            if let Some(error) = &delta.error {
                job.error = Some(error.clone());
            }
            if let Some(stdout) = &delta.stdout {
                job.stdout = Some(stdout.clone());
            }
            if let Some(stderr) = &delta.stderr {
                job.stderr = Some(stderr.clone());
            }
            merge_start(&mut job.start_time, delta.start_time);
            merge_end(&mut job.end_time, delta.end_time);
            if let Some(status) = delta.status {
                if status.rank() >= job.status.rank() {
                    job.status = status;
                }
            }
        }

        // Re-derive realization statuses for reals whose steps changed.
        for real_id in partial.touched_reals() {
            if let Some(real) = self.reals.get_mut(real_id) {
                if !real.status.is_terminal() {
                    real.status = derive_realization_status(real.steps.values());
                }
            }
        }

        Ok(())
    }
}

fn lookup<'a, V: Default>(
    map: &'a mut IndexMap<String, V>,
    key: &str,
    bootstrap: bool,
    level: &'static str,
) -> Result<&'a mut V, SnapshotError> {
    if bootstrap {
        Ok(map.entry(key.to_string()).or_default())
    } else {
        map.get_mut(key)
            .ok_or_else(|| SnapshotError::InvalidField { level, key: key.to_string() })
    }
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Snapshot({}, reals={}", self.status, self.reals.len())?;
        for (state, count) in self.aggregate_real_states() {
            write!(f, ", {state}={count}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
