//! Per-Task State Machine
//!
//! ```text
//! PENDING → DISPATCHED → EXECUTED → QA_PENDING → ACCEPTED
//!               ↑                        ↓
//!               └──────(retries)──── REJECTED
//! PENDING → SKIPPED
//! ```
//!
//! A failed execution (no candidate, timeout, cancellation) goes from
//! DISPATCHED straight to REJECTED.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Dispatched,
    Executed,
    QaPending,
    Accepted,
    Rejected,
    Skipped,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Dispatched => "DISPATCHED",
            Self::Executed => "EXECUTED",
            Self::QaPending => "QA_PENDING",
            Self::Accepted => "ACCEPTED",
            Self::Rejected => "REJECTED",
            Self::Skipped => "SKIPPED",
        }
    }

    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, Dispatched)
                | (Pending, Skipped)
                | (Dispatched, Executed)
                | (Dispatched, Rejected)
                | (Executed, QaPending)
                | (QaPending, Accepted)
                | (QaPending, Rejected)
                | (Rejected, Dispatched)
        )
    }

    /// No further transitions will be taken in this run
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected | Self::Skipped)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Refused state change
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Illegal transition for task '{task_id}': {from} -> {to}")]
pub struct IllegalTransition {
    pub task_id: String,
    pub from: TaskState,
    pub to: TaskState,
}

/// State of one task within a run
#[derive(Debug, Clone)]
pub struct TaskMachine {
    task_id: String,
    state: TaskState,
    dispatches: u32,
}

impl TaskMachine {
    pub fn new(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            state: TaskState::Pending,
            dispatches: 0,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Times this task has entered DISPATCHED
    pub fn dispatches(&self) -> u32 {
        self.dispatches
    }

    pub fn transition(&mut self, next: TaskState) -> Result<TaskState, IllegalTransition> {
        if !self.state.can_transition_to(next) {
            return Err(IllegalTransition {
                task_id: self.task_id.clone(),
                from: self.state,
                to: next,
            });
        }
        let previous = self.state;
        self.state = next;
        if next == TaskState::Dispatched {
            self.dispatches += 1;
        }
        Ok(previous)
    }
}
