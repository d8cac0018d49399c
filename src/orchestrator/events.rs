//! Run Events
//!
//! Everything observable about a run, in the order it happened.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::TaskState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    StateChanged {
        task_id: String,
        from: TaskState,
        to: TaskState,
    },
    /// Hierarchical delegation moved a task to another agent
    Reassigned {
        task_id: String,
        from: String,
        to: String,
    },
    /// One attempt handed to an agent, with the context keys it can see
    Dispatched {
        task_id: String,
        agent: String,
        attempt: u32,
        visible_context: Vec<String>,
    },
    Cancelled {
        reason: String,
    },
}

/// An event with its timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: RunEvent,
}

/// Append-only event log for one run
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    records: Vec<EventRecord>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: RunEvent) {
        self.records.push(EventRecord {
            at: Utc::now(),
            event,
        });
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<EventRecord> {
        self.records
    }

    /// Reassignments so far, as (task, from, to)
    pub fn reassignments(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.records.iter().filter_map(|r| match &r.event {
            RunEvent::Reassigned { task_id, from, to } => {
                Some((task_id.as_str(), from.as_str(), to.as_str()))
            }
            _ => None,
        })
    }
}
