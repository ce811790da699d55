// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run model — what the tracker knows about the overall run.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// The tracker's view of the consumer driving the evaluation.
///
/// Supplies the iteration counters for progress and the failure flag
/// reported in the terminal event.
pub trait RunModel: Send + Sync {
    fn is_finished(&self) -> bool;
    fn has_failed(&self) -> bool;
    fn fail_message(&self) -> Option<String>;
    /// Zero-based iteration currently being evaluated.
    fn current_iteration(&self) -> usize;
    /// Total number of iterations in the run.
    fn iteration_count(&self) -> usize;
}

/// A plain single- or multi-iteration run model.
pub struct SimpleRunModel {
    iteration: AtomicUsize,
    iteration_count: usize,
    finished: AtomicBool,
    failed: AtomicBool,
    fail_message: Mutex<Option<String>>,
}

impl SimpleRunModel {
    pub fn new(iteration_count: usize) -> Self {
        Self {
            iteration: AtomicUsize::new(0),
            iteration_count: iteration_count.max(1),
            finished: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            fail_message: Mutex::new(None),
        }
    }

    pub fn set_iteration(&self, iteration: usize) {
        self.iteration.store(iteration, Ordering::SeqCst);
    }

    pub fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    pub fn fail(&self, message: impl Into<String>) {
        *self.fail_message.lock() = Some(message.into());
        self.failed.store(true, Ordering::SeqCst);
        self.finished.store(true, Ordering::SeqCst);
    }
}

impl RunModel for SimpleRunModel {
    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    fn fail_message(&self) -> Option<String> {
        self.fail_message.lock().clone()
    }

    fn current_iteration(&self) -> usize {
        self.iteration.load(Ordering::SeqCst)
    }

    fn iteration_count(&self) -> usize {
        self.iteration_count
    }
}

#[cfg(test)]
#[path = "run_model_tests.rs"]
mod tests;
