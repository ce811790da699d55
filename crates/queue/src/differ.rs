// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Queue differ — last-observed state per queue index, minimal change sets.
//!
//! The diff bounds bus traffic: only indices whose state changed since the
//! previous transition are published per tick.

use armada_core::QueueState;
use indexmap::IndexMap;

/// Per-index record: the sparse realization index and the last state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NodeRecord {
    iens: usize,
    state: QueueState,
}

/// Tracks per-queue-index state between engine ticks.
#[derive(Debug, Default)]
pub struct QueueDiffer {
    states: IndexMap<u64, NodeRecord>,
}

impl QueueDiffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new queue index with its realization index.
    pub fn add_state(&mut self, queue_index: u64, iens: usize, state: QueueState) {
        self.states.insert(queue_index, NodeRecord { iens, state });
    }

    /// Full view of the last-observed states.
    pub fn snapshot(&self) -> IndexMap<u64, QueueState> {
        self.states.iter().map(|(&index, record)| (index, record.state)).collect()
    }

    /// Read current node states and return `(old, new)` views.
    ///
    /// `current` supplies `(queue_index, state)` pairs, typically read off
    /// the engine's node list. Unknown indices are ignored with a warning.
    pub fn transition(
        &mut self,
        current: impl IntoIterator<Item = (u64, QueueState)>,
    ) -> (IndexMap<u64, QueueState>, IndexMap<u64, QueueState>) {
        let old = self.snapshot();
        for (queue_index, state) in current {
            match self.states.get_mut(&queue_index) {
                Some(record) => record.state = state,
                None => {
                    tracing::warn!(queue_index, %state, "transition for unregistered queue index");
                }
            }
        }
        (old, self.snapshot())
    }

    /// Entries of `new` that differ from `old`.
    pub fn diff_states(
        old: &IndexMap<u64, QueueState>,
        new: &IndexMap<u64, QueueState>,
    ) -> IndexMap<u64, QueueState> {
        new.iter()
            .filter(|(index, state)| old.get(*index) != Some(state))
            .map(|(&index, &state)| (index, state))
            .collect()
    }

    /// Map a dense queue index back to its sparse realization index.
    pub fn qindex_to_iens(&self, queue_index: u64) -> Option<usize> {
        self.states.get(&queue_index).map(|record| record.iens)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
#[path = "differ_tests.rs"]
mod tests;
