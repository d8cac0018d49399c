//! Tasks, Context and Results
//!
//! Tasks are immutable descriptors built once per workflow. Context and
//! results live for a single run.

use serde::{Deserialize, Serialize};

use crate::qa::ExpectedOutput;

/// A unit of work assigned to one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub expected_output: ExpectedOutput,
    pub agent_id: String,
    pub depends_on: Vec<String>,
    pub required_capabilities: Vec<String>,
    /// A terminally rejected optional task does not fail the run
    pub optional: bool,
    /// QA rejection retry budget; falls back to the run's retry bound
    pub max_retries: Option<u32>,
}

impl Task {
    pub fn new(id: &str, description: &str, agent_id: &str) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            expected_output: ExpectedOutput::default(),
            agent_id: agent_id.to_string(),
            depends_on: Vec::new(),
            required_capabilities: Vec::new(),
            optional: false,
            max_retries: None,
        }
    }

    pub fn depends_on(mut self, task_id: &str) -> Self {
        self.depends_on.push(task_id.to_string());
        self
    }

    pub fn requires(mut self, capability: &str) -> Self {
        self.required_capabilities.push(capability.to_string());
        self
    }

    pub fn with_contract(mut self, contract: ExpectedOutput) -> Self {
        self.expected_output = contract;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }
}

/// One accepted output visible to later tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub task_id: String,
    pub output: String,
    pub produced_by: String,
}

/// Read-only view of accepted outputs handed to an agent.
///
/// Only the orchestrator appends, and only accepted results get in. Each
/// dispatch receives its own snapshot, optionally carrying QA feedback for
/// the task being re-executed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    entries: Vec<ContextEntry>,
    feedback: Option<String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, task_id: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.task_id == task_id)
            .map(|e| e.output.as_str())
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.entries.iter().any(|e| e.task_id == task_id)
    }

    /// Task ids in acceptance order
    pub fn task_ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.task_id.clone()).collect()
    }

    pub fn entries(&self) -> &[ContextEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// QA feedback from this task's previous rejected attempt
    pub fn feedback(&self) -> Option<&str> {
        self.feedback.as_deref()
    }

    /// Snapshot for one dispatch
    pub fn snapshot(&self, feedback: Option<String>) -> Self {
        Self {
            entries: self.entries.clone(),
            feedback,
        }
    }

    /// Append an accepted result. Refuses rejected results and never
    /// overwrites an existing entry.
    pub(crate) fn admit(&mut self, result: &TaskResult) -> bool {
        let payload = match (&result.payload, result.accepted) {
            (Some(p), true) => p,
            _ => return false,
        };
        if self.contains(&result.task_id) {
            return false;
        }
        self.entries.push(ContextEntry {
            task_id: result.task_id.clone(),
            output: payload.clone(),
            produced_by: result.executed_by.clone(),
        });
        true
    }
}

/// Outcome of executing one task attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    /// `None` when the agent could not produce a candidate
    pub payload: Option<String>,
    pub accepted: bool,
    pub qa_feedback: Option<String>,
    pub executed_by: String,
    /// Reasoning attempts consumed by the agent
    pub attempts: u32,
}

impl TaskResult {
    /// A candidate awaiting QA
    pub fn candidate(task_id: &str, agent_id: &str, payload: String, attempts: u32) -> Self {
        Self {
            task_id: task_id.to_string(),
            payload: Some(payload),
            accepted: false,
            qa_feedback: None,
            executed_by: agent_id.to_string(),
            attempts,
        }
    }

    /// No candidate could be produced
    pub fn failed(task_id: &str, agent_id: &str, reason: String, attempts: u32) -> Self {
        Self {
            task_id: task_id.to_string(),
            payload: None,
            accepted: false,
            qa_feedback: Some(reason),
            executed_by: agent_id.to_string(),
            attempts,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.payload.is_none()
    }
}
