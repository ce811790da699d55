// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Partial snapshot: the three-table delta merged into a [`Snapshot`].
//!
//! Internally the delta is flat — per-realization fields, per-(real, step)
//! fields and per-(real, step, job) fields — which keeps diffing and merging
//! O(changes). On the wire it serializes in the same nested shape as the
//! snapshot so observers can treat both uniformly.

use super::{Snapshot, SnapshotError, TIMEOUT_ERROR};
use crate::event::{Event, EventKind, EventPayload};
use crate::state::{EnsembleState, JobState, RealizationState, StepState};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field-wise delta for one realization. Unset fields mean "unchanged".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RealizationDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RealizationState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

/// Field-wise delta for one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StepState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Time of the event that set `status`; merge tie-break only.
    #[serde(skip)]
    pub event_time: Option<DateTime<Utc>>,
}

/// Field-wise delta for one job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<IndexMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// Time of the event that set `status`; merge tie-break only.
    #[serde(skip)]
    pub event_time: Option<DateTime<Utc>>,
}

/// A mergeable delta over a snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialSnapshot {
    status: Option<EnsembleState>,
    metadata: IndexMap<String, Value>,
    reals: IndexMap<String, RealizationDelta>,
    steps: IndexMap<(String, String), StepDelta>,
    jobs: IndexMap<(String, String, String), JobDelta>,
}

impl PartialSnapshot {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.metadata.is_empty()
            && self.reals.is_empty()
            && self.steps.is_empty()
            && self.jobs.is_empty()
    }

    pub fn status(&self) -> Option<EnsembleState> {
        self.status
    }

    pub fn set_status(&mut self, status: EnsembleState) -> &mut Self {
        self.status = Some(status);
        self
    }

    pub fn metadata(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.metadata.iter()
    }

    pub fn update_metadata(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn reals(&self) -> impl Iterator<Item = (&String, &RealizationDelta)> {
        self.reals.iter()
    }

    pub fn steps(&self) -> impl Iterator<Item = (&(String, String), &StepDelta)> {
        self.steps.iter()
    }

    pub fn jobs(&self) -> impl Iterator<Item = (&(String, String, String), &JobDelta)> {
        self.jobs.iter()
    }

    /// Realizations whose derived status may have changed (step-level edits).
    pub(super) fn touched_reals(&self) -> impl Iterator<Item = &str> {
        self.steps.keys().map(|(real_id, _)| real_id.as_str())
    }

    pub fn update_real(&mut self, real_id: impl Into<String>, delta: RealizationDelta) -> &mut Self {
        merge_real_delta(self.reals.entry(real_id.into()).or_default(), &delta);
        self
    }

    pub fn update_step(
        &mut self,
        real_id: impl Into<String>,
        step_id: impl Into<String>,
        delta: StepDelta,
    ) -> &mut Self {
        let key = (real_id.into(), step_id.into());
        merge_step_delta(self.steps.entry(key).or_default(), &delta);
        self
    }

    pub fn update_job(
        &mut self,
        real_id: impl Into<String>,
        step_id: impl Into<String>,
        job_id: impl Into<String>,
        delta: JobDelta,
    ) -> &mut Self {
        let key = (real_id.into(), step_id.into(), job_id.into());
        merge_job_delta(self.jobs.entry(key).or_default(), &delta);
        self
    }

    /// Combine another delta into this one, right-biased.
    ///
    /// Statuses keep the most advanced value with event time as tie-break,
    /// start times keep the earliest, end times the latest. Merging an
    /// identical partial is a no-op.
    pub fn merge(&mut self, other: &PartialSnapshot) {
        if let Some(status) = other.status {
            match self.status {
                Some(current) if !current.can_advance_to(status) => {}
                _ => self.status = Some(status),
            }
        }
        for (key, value) in &other.metadata {
            self.metadata.insert(key.clone(), value.clone());
        }
        for (real_id, delta) in &other.reals {
            merge_real_delta(self.reals.entry(real_id.clone()).or_default(), delta);
        }
        for (key, delta) in &other.steps {
            merge_step_delta(self.steps.entry(key.clone()).or_default(), delta);
        }
        for (key, delta) in &other.jobs {
            merge_job_delta(self.jobs.entry(key.clone()).or_default(), delta);
        }
    }

    /// Translate one wire event into delta fields against `snapshot`.
    ///
    /// The snapshot provides read-only context: terminal-realization guards,
    /// the all-steps-finished check and the job fan-out on step timeouts. It
    /// is not mutated here.
    pub fn apply_event(&mut self, event: &Event, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        let kind = event.kind();
        if kind.is_step() {
            self.apply_step_event(event, kind, snapshot)
        } else if kind.is_job() {
            self.apply_job_event(event, kind)
        } else if let Some(status) = kind.ensemble_state() {
            self.set_status(status);
            Ok(())
        } else if let EventPayload::EeSnapshotUpdate(data) = &event.payload {
            self.merge(&data.partial);
            Ok(())
        } else {
            Err(SnapshotError::UnsupportedEvent(kind.to_string()))
        }
    }

    /// One-event partial; see [`PartialSnapshot::apply_event`].
    pub fn from_event(event: &Event, snapshot: &Snapshot) -> Result<Self, SnapshotError> {
        let mut partial = Self::default();
        partial.apply_event(event, snapshot)?;
        Ok(partial)
    }

    fn apply_step_event(
        &mut self,
        event: &Event,
        kind: EventKind,
        snapshot: &Snapshot,
    ) -> Result<(), SnapshotError> {
        let (real_id, step_id) = step_ids(event)?;
        // Closed set: every step event kind maps to a step state.
        let Some(status) = kind.step_state() else {
            return Err(SnapshotError::UnsupportedEvent(kind.to_string()));
        };

        let mut delta = StepDelta { status: Some(status), event_time: Some(event.time), ..Default::default() };
        match kind {
            EventKind::StepRunning => delta.start_time = Some(event.time),
            EventKind::StepSuccess | EventKind::StepFailure | EventKind::StepTimeout => {
                delta.end_time = Some(event.time)
            }
            _ => {}
        }
        self.update_step(real_id.clone(), step_id.clone(), delta);

        if kind == EventKind::StepTimeout {
            // Stamp every job of the step that never finished.
            if let Some(step) = snapshot.get_step(&real_id, &step_id) {
                for (job_id, job) in &step.jobs {
                    if job.status != JobState::Finished {
                        self.update_job(
                            real_id.clone(),
                            step_id.clone(),
                            job_id.clone(),
                            JobDelta {
                                status: Some(JobState::Failed),
                                error: Some(TIMEOUT_ERROR.to_string()),
                                end_time: Some(event.time),
                                event_time: Some(event.time),
                                ..Default::default()
                            },
                        );
                    }
                }
            }
        }

        // Carry the step transition over to the realization, unless the
        // realization already settled.
        if let Some(real) = snapshot.get_real(&real_id) {
            if !real.status.is_terminal() {
                let real_status = match status {
                    StepState::Success => self
                        .real_finished(snapshot, &real_id)
                        .then_some(RealizationState::Finished),
                    other => other.realization_state(),
                };
                if let Some(real_status) = real_status {
                    self.update_real(
                        real_id,
                        RealizationDelta { status: Some(real_status), ..Default::default() },
                    );
                }
            }
        }
        Ok(())
    }

    fn apply_job_event(&mut self, event: &Event, kind: EventKind) -> Result<(), SnapshotError> {
        let (real_id, step_id, job_id) = job_ids(event)?;
        let Some(status) = kind.job_state() else {
            return Err(SnapshotError::UnsupportedEvent(kind.to_string()));
        };

        let mut delta = JobDelta {
            status: Some(status),
            index: event.source.job_index().map(str::to_string),
            event_time: Some(event.time),
            ..Default::default()
        };
        match &event.payload {
            EventPayload::JobStart(data) => {
                delta.start_time = Some(event.time);
                delta.stdout = data.stdout.clone();
                delta.stderr = data.stderr.clone();
            }
            EventPayload::JobRunning(data) => {
                let mut map = IndexMap::new();
                map.insert("max_memory_usage".to_string(), data.max_memory_usage.into());
                map.insert("current_memory_usage".to_string(), data.current_memory_usage.into());
                delta.data = Some(map);
            }
            EventPayload::JobSuccess => delta.end_time = Some(event.time),
            EventPayload::JobFailure(data) => {
                delta.end_time = Some(event.time);
                delta.error = Some(data.error_msg.clone());
            }
            _ => {}
        }
        self.update_job(real_id, step_id, job_id, delta);
        Ok(())
    }

    /// True when every step of `real_id` is success in the snapshot, or is
    /// marked success by this partial.
    fn real_finished(&self, snapshot: &Snapshot, real_id: &str) -> bool {
        let Some(real) = snapshot.get_real(real_id) else {
            return false;
        };
        real.steps.iter().all(|(step_id, step)| {
            step.status == StepState::Success
                || self
                    .steps
                    .get(&(real_id.to_string(), step_id.clone()))
                    .and_then(|delta| delta.status)
                    == Some(StepState::Success)
        })
    }
}

fn step_ids(event: &Event) -> Result<(String, String), SnapshotError> {
    match (event.source.real_id(), event.source.step_id()) {
        (Some(real), Some(step)) => Ok((real.to_string(), step.to_string())),
        _ => Err(SnapshotError::InvalidSource {
            level: "step",
            addr: event.source.to_string(),
        }),
    }
}

fn job_ids(event: &Event) -> Result<(String, String, String), SnapshotError> {
    match (event.source.real_id(), event.source.step_id(), event.source.job_id()) {
        (Some(real), Some(step), Some(job)) => {
            Ok((real.to_string(), step.to_string(), job.to_string()))
        }
        _ => Err(SnapshotError::InvalidSource {
            level: "job",
            addr: event.source.to_string(),
        }),
    }
}

fn merge_real_delta(left: &mut RealizationDelta, right: &RealizationDelta) {
    if let Some(status) = right.status {
        match left.status {
            Some(current) if status.rank() < current.rank() => {}
            _ => left.status = Some(status),
        }
    }
    if right.active.is_some() {
        left.active = right.active;
    }
    merge_start_opt(&mut left.start_time, right.start_time);
    merge_end_opt(&mut left.end_time, right.end_time);
}

fn merge_step_delta(left: &mut StepDelta, right: &StepDelta) {
    if let Some(status) = right.status {
        if take_status(
            left.status.map(StepState::rank),
            status.rank(),
            left.event_time,
            right.event_time,
        ) {
            left.status = Some(status);
            left.event_time = right.event_time;
        }
    }
    merge_start_opt(&mut left.start_time, right.start_time);
    merge_end_opt(&mut left.end_time, right.end_time);
}

fn merge_job_delta(left: &mut JobDelta, right: &JobDelta) {
    if let Some(status) = right.status {
        if take_status(
            left.status.map(JobState::rank),
            status.rank(),
            left.event_time,
            right.event_time,
        ) {
            left.status = Some(status);
            left.event_time = right.event_time;
        }
    }
    if right.index.is_some() {
        left.index = right.index.clone();
    }
    if right.name.is_some() {
        left.name = right.name.clone();
    }
    if let Some(data) = &right.data {
        left.data.get_or_insert_with(IndexMap::new).extend(
            data.iter().map(|(key, value)| (key.clone(), value.clone())),
        );
    }
    if right.error.is_some() {
        left.error = right.error.clone();
    }
    if right.stdout.is_some() {
        left.stdout = right.stdout.clone();
    }
    if right.stderr.is_some() {
        left.stderr = right.stderr.clone();
    }
    merge_start_opt(&mut left.start_time, right.start_time);
    merge_end_opt(&mut left.end_time, right.end_time);
}

/// Whether the incoming status rank should replace the current one.
///
/// Higher rank always wins; equal rank is broken by event time with a
/// right-bias when times are missing or equal.
fn take_status(
    current_rank: Option<u8>,
    incoming_rank: u8,
    current_time: Option<DateTime<Utc>>,
    incoming_time: Option<DateTime<Utc>>,
) -> bool {
    match current_rank {
        None => true,
        Some(current) if incoming_rank > current => true,
        Some(current) if incoming_rank < current => false,
        Some(_) => match (current_time, incoming_time) {
            (Some(old), Some(new)) => new >= old,
            _ => true,
        },
    }
}

fn merge_start_opt(slot: &mut Option<DateTime<Utc>>, new: Option<DateTime<Utc>>) {
    if let Some(new) = new {
        if slot.map_or(true, |old| new < old) {
            *slot = Some(new);
        }
    }
}

fn merge_end_opt(slot: &mut Option<DateTime<Utc>>, new: Option<DateTime<Utc>>) {
    if let Some(new) = new {
        if slot.map_or(true, |old| new > old) {
            *slot = Some(new);
        }
    }
}

// ── Wire form ───────────────────────────────────────────────────────────
//
// The flat tables serialize as the nested `{reals: {r: {steps: {s: {jobs:
// {j: …}}}}}}` shape so the wire looks like a sparse snapshot.

#[derive(Debug, Default, Serialize, Deserialize)]
struct NestedStep {
    #[serde(flatten)]
    fields: StepDelta,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    jobs: IndexMap<String, JobDelta>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct NestedReal {
    #[serde(flatten)]
    fields: RealizationDelta,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    steps: IndexMap<String, NestedStep>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct NestedPartial {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<EnsembleState>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    metadata: IndexMap<String, Value>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    reals: IndexMap<String, NestedReal>,
}

impl Serialize for PartialSnapshot {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut nested = NestedPartial {
            status: self.status,
            metadata: self.metadata.clone(),
            reals: IndexMap::new(),
        };
        for (real_id, delta) in &self.reals {
            nested.reals.entry(real_id.clone()).or_default().fields = delta.clone();
        }
        for ((real_id, step_id), delta) in &self.steps {
            nested
                .reals
                .entry(real_id.clone())
                .or_default()
                .steps
                .entry(step_id.clone())
                .or_default()
                .fields = delta.clone();
        }
        for ((real_id, step_id, job_id), delta) in &self.jobs {
            nested
                .reals
                .entry(real_id.clone())
                .or_default()
                .steps
                .entry(step_id.clone())
                .or_default()
                .jobs
                .insert(job_id.clone(), delta.clone());
        }
        nested.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PartialSnapshot {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let nested = NestedPartial::deserialize(deserializer)?;
        let mut partial = PartialSnapshot {
            status: nested.status,
            metadata: nested.metadata,
            ..Default::default()
        };
        for (real_id, real) in nested.reals {
            if real.fields != RealizationDelta::default() {
                partial.reals.insert(real_id.clone(), real.fields);
            }
            for (step_id, step) in real.steps {
                if step.fields != StepDelta::default() {
                    partial.steps.insert((real_id.clone(), step_id.clone()), step.fields);
                }
                for (job_id, job) in step.jobs {
                    partial.jobs.insert((real_id.clone(), step_id.clone(), job_id), job);
                }
            }
        }
        Ok(partial)
    }
}

#[cfg(test)]
#[path = "partial_tests.rs"]
mod tests;
