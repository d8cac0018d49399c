//! Orchestrator
//!
//! Sequences task dispatch over the dependency graph, optionally lets a
//! delegation policy move ready tasks between agents, drives each task
//! through its state machine and the QA gate, and builds the run report.

pub mod delegation;
pub mod events;
pub mod graph;
pub mod report;
pub mod run;
pub mod state;

pub use delegation::{
    DelegationHistory, DelegationPolicy, KeepAssignments, LeastLoaded, ReadyTask, Reassignment,
};
pub use events::{EventRecord, RunEvent};
pub use graph::topological_order;
pub use report::{RunReport, TaskOutcome, EXIT_CONFIGURATION_ERROR, EXIT_SUCCESS, EXIT_TASK_REJECTED};
pub use run::{Orchestrator, OrchestratorBuilder, ProcessMode, RunSettings};
pub use state::{IllegalTransition, TaskMachine, TaskState};
