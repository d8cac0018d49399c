//! Agents
//!
//! An agent is a role, a goal and a bounded set of capabilities, driven by a
//! reasoning function:
//! - Capabilities: bridge operations resolved at configuration time
//! - Reasoning: the opaque model call (Claude, or scripted for tests)
//! - Execution: prompt assembly, tool loop and bounded reasoning retries

pub mod capability;
pub mod claude;
pub mod executor;
pub mod reasoning;

pub use capability::Capability;
pub use claude::ClaudeReasoner;
pub use executor::{Agent, AgentProfile, DEFAULT_MAX_TOOL_ROUNDS, DEFAULT_RETRY_BOUND};
pub use reasoning::{Completion, ReasoningFn, ScriptedReasoner, ToolCall};
