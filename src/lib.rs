//! Crew MCP
//!
//! Multi-agent workflows over a shared MCP data server.
//!
//! # Features
//!
//! - **Tool Bridges**: typed, schema-checked JSON-RPC operations with backoff
//! - **Agents**: role, goal and a bounded capability set, driven by a reasoning function
//! - **Orchestrator**: topological dispatch, hierarchical delegation, per-task state machine
//! - **QA Gate**: declarative output contracts plus an optional reviewer agent
//! - **Reference Server**: research data store over HTTP or stdio
//!
//! # Architecture
//!
//! ```text
//! Workflow (TOML) ──► Orchestrator ──► Agent ──► ReasoningFn (Claude)
//!                          │             │
//!                          │             └── Capability ──► ToolBridge ──► MCP server
//!                          │
//!                          ├── Delegation (hierarchical)
//!                          ├── QA Gate (contract + reviewer)
//!                          └── Run Report (exit 0 / 1 / 2)
//! ```

pub mod agent;
pub mod bridge;
pub mod config;
pub mod error;
pub mod mcp;
pub mod orchestrator;
pub mod qa;
pub mod recovery;
pub mod server;
pub mod store;
pub mod task;
pub mod workflow;

pub use agent::{Agent, Capability, ClaudeReasoner, Completion, ReasoningFn, ScriptedReasoner, ToolCall};
pub use bridge::{HttpTransport, RpcTransport, ToolBridge, ToolSchema};
pub use config::{Config, Credential};
pub use error::{BridgeError, ConfigurationError, ReasoningFailure, RunError, TaskFailure};
pub use orchestrator::{
    Orchestrator, ProcessMode, RunEvent, RunReport, RunSettings, TaskOutcome, TaskState,
};
pub use qa::{ExpectedOutput, QaGate, Verdict};
pub use recovery::RetryPolicy;
pub use server::McpServer;
pub use store::ResearchDataStore;
pub use task::{Context, Task, TaskResult};
pub use workflow::Workflow;
