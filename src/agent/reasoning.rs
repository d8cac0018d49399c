//! Reasoning Function
//!
//! The opaque model call behind an agent: a prompt and the agent's tool
//! definitions in, text plus optional tool calls out. Implementations must
//! report unusable output as `ReasoningFailure` and nothing else.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;

use crate::bridge::ToolSchema;
use crate::error::ReasoningFailure;

/// A tool call requested by the reasoning function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID
    pub id: String,
    /// Capability name
    pub name: String,
    /// Arguments as JSON
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: &str, arguments: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            arguments,
        }
    }
}

/// Output of one reasoning call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl Completion {
    /// Final answer with no tool calls
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }

    /// Request capability calls before answering
    pub fn calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            text: String::new(),
            tool_calls,
        }
    }

    pub fn is_final(&self) -> bool {
        self.tool_calls.is_empty()
    }
}

#[async_trait]
pub trait ReasoningFn: Send + Sync {
    async fn complete(&self, prompt: &str, tools: &[ToolSchema]) -> Result<Completion, ReasoningFailure>;
}

/// Deterministic reasoner for tests and offline runs.
///
/// Replies are consumed in order; once the script runs out the fallback reply
/// repeats. Every prompt is recorded.
pub struct ScriptedReasoner {
    script: Mutex<VecDeque<Result<Completion, ReasoningFailure>>>,
    fallback: Result<Completion, ReasoningFailure>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedReasoner {
    /// Always answers with `text`
    pub fn answering(text: &str) -> Self {
        Self::new(Vec::new(), Ok(Completion::text(text)))
    }

    /// Always fails with `reason`
    pub fn failing(reason: &str) -> Self {
        Self::new(Vec::new(), Err(ReasoningFailure::new(reason)))
    }

    pub fn new(
        script: Vec<Result<Completion, ReasoningFailure>>,
        fallback: Result<Completion, ReasoningFailure>,
    ) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts received so far
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }
}

#[async_trait]
impl ReasoningFn for ScriptedReasoner {
    async fn complete(&self, prompt: &str, _tools: &[ToolSchema]) -> Result<Completion, ReasoningFailure> {
        self.prompts.lock().push(prompt.to_string());
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}
