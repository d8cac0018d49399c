//! Run Report

use serde::{Deserialize, Serialize};

use super::events::EventRecord;
use super::state::TaskState;

/// Every required task accepted
pub const EXIT_SUCCESS: i32 = 0;
/// Workflow rejected before dispatch
pub const EXIT_CONFIGURATION_ERROR: i32 = 1;
/// A required task was terminally rejected, or the run was cancelled
pub const EXIT_TASK_REJECTED: i32 = 2;

/// Final state of one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub status: TaskState,
    pub accepted: bool,
    pub payload: Option<String>,
    pub qa_feedback: Option<String>,
    pub attempts: u32,
    pub executed_by: Option<String>,
    pub optional: bool,
}

impl TaskOutcome {
    /// Fails the run if not accepted
    pub fn is_required_failure(&self) -> bool {
        !self.accepted && !self.optional
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    /// In task declaration order
    pub outcomes: Vec<TaskOutcome>,
    pub events: Vec<EventRecord>,
    pub cancelled: bool,
    pub success: bool,
}

impl RunReport {
    pub fn new(run_id: String, outcomes: Vec<TaskOutcome>, events: Vec<EventRecord>, cancelled: bool) -> Self {
        let success = !cancelled && outcomes.iter().all(|o| !o.is_required_failure());
        Self {
            run_id,
            outcomes,
            events,
            cancelled,
            success,
        }
    }

    pub fn outcome(&self, task_id: &str) -> Option<&TaskOutcome> {
        self.outcomes.iter().find(|o| o.task_id == task_id)
    }

    /// Tasks that did not end ACCEPTED
    pub fn failures(&self) -> Vec<&TaskOutcome> {
        self.outcomes.iter().filter(|o| !o.accepted).collect()
    }

    pub fn exit_code(&self) -> i32 {
        if self.success {
            EXIT_SUCCESS
        } else {
            EXIT_TASK_REJECTED
        }
    }

    /// Human-readable summary for the terminal
    pub fn render(&self) -> String {
        let mut out = format!(
            "Run {}: {}\n",
            self.run_id,
            if self.success {
                "SUCCESS"
            } else if self.cancelled {
                "CANCELLED"
            } else {
                "FAILED"
            }
        );

        for o in &self.outcomes {
            out.push_str(&format!(
                "  {:<24} {:<10} attempts={} by={}{}\n",
                o.task_id,
                o.status.as_str(),
                o.attempts,
                o.executed_by.as_deref().unwrap_or("-"),
                if o.optional { " (optional)" } else { "" }
            ));
        }

        let failures = self.failures();
        if !failures.is_empty() {
            out.push_str("\nFailed tasks:\n");
            for o in failures {
                out.push_str(&format!(
                    "  {}: {}\n",
                    o.task_id,
                    o.qa_feedback.as_deref().unwrap_or("no reason recorded")
                ));
            }
        }

        out
    }
}
