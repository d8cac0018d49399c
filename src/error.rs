//! Error Taxonomy
//!
//! Configuration errors abort a workflow before dispatch. Everything else is
//! caught at the Task boundary and turned into a rejected result.

use thiserror::Error;

/// Fatal workflow definition errors, detected before any Task is dispatched
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Dependency cycle detected: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("Agent '{agent}' lacks capability '{capability}' required by task '{task}'")]
    MissingCapability {
        task: String,
        agent: String,
        capability: String,
    },

    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    #[error("Unknown operation '{operation}' on bridge '{bridge}'")]
    UnknownOperation { bridge: String, operation: String },

    #[error("Unknown bridge: {0}")]
    UnknownBridge(String),

    #[error("Unknown agent '{agent}' assigned to task '{task}'")]
    UnknownAgent { task: String, agent: String },

    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("Duplicate {kind} id: {id}")]
    Duplicate { kind: &'static str, id: String },

    #[error("Invalid setting: {0}")]
    InvalidSetting(String),

    #[error("Failed to parse workflow: {0}")]
    Parse(String),
}

/// Tool Bridge invocation failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// Remote unreachable. Retryable.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Remote reported a processing failure. Not retried.
    #[error("Remote error ({code}): {message}")]
    Remote { code: i32, message: String },

    /// Payload does not match the operation schema. Fatal for the Task.
    #[error("Schema error: {0}")]
    Schema(String),
}

impl BridgeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

/// The reasoning function produced malformed or unusable output
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Reasoning failure: {0}")]
pub struct ReasoningFailure(pub String);

impl ReasoningFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }

    pub fn reason(&self) -> &str {
        &self.0
    }
}

/// Terminal reason a Task did not produce an accepted result
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskFailure {
    #[error("{reason} (after {attempts} attempts)")]
    ReasoningExhausted { attempts: u32, reason: String },

    #[error("Capability '{capability}' failed: {source}")]
    Bridge {
        capability: String,
        #[source]
        source: BridgeError,
    },

    #[error("Rejected by QA: {0}")]
    QaRejected(String),

    #[error("Timed out after {0:?}")]
    TimedOut(std::time::Duration),

    #[error("Cancelled")]
    Cancelled,
}

/// Errors refusing to start a run
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("A run is already in progress on this orchestrator")]
    AlreadyRunning,
}
