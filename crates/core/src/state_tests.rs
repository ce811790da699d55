// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[test]
fn ensemble_state_monotonic() {
    assert!(EnsembleState::Unknown.can_advance_to(EnsembleState::Started));
    assert!(EnsembleState::Started.can_advance_to(EnsembleState::Stopped));
    assert!(EnsembleState::Started.can_advance_to(EnsembleState::Failed));
    assert!(!EnsembleState::Started.can_advance_to(EnsembleState::Unknown));
    assert!(!EnsembleState::Stopped.can_advance_to(EnsembleState::Started));
    // Terminal states may be replaced by other terminal states.
    assert!(EnsembleState::Stopped.can_advance_to(EnsembleState::Failed));
}

#[parameterized(
    not_active = { QueueState::NotActive, StepState::Waiting },
    waiting = { QueueState::Waiting, StepState::Waiting },
    submitted = { QueueState::Submitted, StepState::Waiting },
    pending = { QueueState::Pending, StepState::Pending },
    running = { QueueState::Running, StepState::Running },
    done = { QueueState::Done, StepState::Running },
    exit = { QueueState::Exit, StepState::Running },
    done_callback = { QueueState::RunningDoneCallback, StepState::Running },
    exit_callback = { QueueState::RunningExitCallback, StepState::Running },
    success = { QueueState::Success, StepState::Success },
    is_killed = { QueueState::IsKilled, StepState::Failed },
    do_kill = { QueueState::DoKill, StepState::Failed },
    failed = { QueueState::Failed, StepState::Failed },
    kill_node_failure = { QueueState::DoKillNodeFailure, StepState::Failed },
    status_failure = { QueueState::StatusFailure, StepState::Unknown },
    unknown = { QueueState::Unknown, StepState::Unknown },
)]
fn queue_state_to_step_state(queue: QueueState, step: StepState) {
    assert_eq!(queue.step_state(), step);
}

#[test]
fn queue_state_wire_strings() {
    let json = serde_json::to_string(&QueueState::DoKillNodeFailure).unwrap();
    assert_eq!(json, "\"DO_KILL_NODE_FAILURE\"");
    let parsed: QueueState = serde_json::from_str("\"IS_KILLED\"").unwrap();
    assert_eq!(parsed, QueueState::IsKilled);
    assert_eq!(QueueState::RunningExitCallback.to_string(), "RUNNING_EXIT_CALLBACK");
}

#[test]
fn terminal_states() {
    assert!(QueueState::Success.is_terminal());
    assert!(QueueState::Failed.is_terminal());
    assert!(QueueState::IsKilled.is_terminal());
    assert!(!QueueState::DoKill.is_terminal());
    assert!(!QueueState::Running.is_terminal());

    assert!(RealizationState::Finished.is_terminal());
    assert!(RealizationState::Failed.is_terminal());
    assert!(!RealizationState::Running.is_terminal());
}

#[test]
fn step_state_realization_mapping() {
    assert_eq!(StepState::Running.realization_state(), Some(RealizationState::Running));
    assert_eq!(StepState::Failed.realization_state(), Some(RealizationState::Failed));
    assert_eq!(StepState::Success.realization_state(), None);
}
