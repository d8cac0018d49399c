//! Agent Execution
//!
//! An agent turns one task plus its context into a candidate result. Each
//! attempt runs a bounded tool loop against the reasoning function; reasoning
//! failures are retried with the failure fed back as a correction, bridge
//! failures end the task at once.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::capability::Capability;
use super::reasoning::ReasoningFn;
use crate::bridge::ToolSchema;
use crate::error::{BridgeError, ReasoningFailure, TaskFailure};
use crate::task::{Context, Task, TaskResult};

/// Default reasoning retries after the first attempt
pub const DEFAULT_RETRY_BOUND: u32 = 2;

/// Default capability rounds per attempt
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 8;

enum AttemptError {
    Reasoning(ReasoningFailure),
    Bridge { capability: String, source: BridgeError },
}

/// Summary of an agent used for delegation decisions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentProfile {
    pub id: String,
    pub role: String,
    pub capabilities: Vec<String>,
}

impl AgentProfile {
    pub fn can_execute(&self, task: &Task) -> bool {
        task.required_capabilities
            .iter()
            .all(|c| self.capabilities.contains(c))
    }
}

/// An autonomous task executor
pub struct Agent {
    pub id: String,
    pub role: String,
    pub goal: String,
    pub backstory: String,
    capabilities: Vec<Capability>,
    reasoner: Arc<dyn ReasoningFn>,
    /// Set explicitly; otherwise the run's bound applies
    retry_bound: Option<u32>,
    max_tool_rounds: usize,
}

impl Agent {
    pub fn new(id: &str, role: &str, goal: &str, reasoner: Arc<dyn ReasoningFn>) -> Self {
        Self {
            id: id.to_string(),
            role: role.to_string(),
            goal: goal.to_string(),
            backstory: String::new(),
            capabilities: Vec::new(),
            reasoner,
            retry_bound: None,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    pub fn with_backstory(mut self, backstory: &str) -> Self {
        self.backstory = backstory.to_string();
        self
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub fn with_retry_bound(mut self, retry_bound: u32) -> Self {
        self.retry_bound = Some(retry_bound);
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds.max(1);
        self
    }

    pub fn retry_bound(&self) -> u32 {
        self.retry_bound.unwrap_or(DEFAULT_RETRY_BOUND)
    }

    pub fn capability(&self, name: &str) -> Option<&Capability> {
        self.capabilities.iter().find(|c| c.name() == name)
    }

    pub fn capability_names(&self) -> Vec<String> {
        self.capabilities.iter().map(|c| c.name().to_string()).collect()
    }

    /// First required capability this agent lacks, if any
    pub fn missing_capability<'a>(&self, task: &'a Task) -> Option<&'a str> {
        task.required_capabilities
            .iter()
            .find(|c| self.capability(c).is_none())
            .map(|c| c.as_str())
    }

    pub fn profile(&self) -> AgentProfile {
        AgentProfile {
            id: self.id.clone(),
            role: self.role.clone(),
            capabilities: self.capability_names(),
        }
    }

    /// Produce a candidate result for `task`
    pub async fn execute(&self, task: &Task, context: &Context) -> TaskResult {
        self.execute_checked(task, context, |_| Ok(())).await
    }

    /// Like `execute`, but a final answer rejected by `validate` counts as a
    /// reasoning failure and is retried with the same budget.
    pub async fn execute_checked<F>(&self, task: &Task, context: &Context, validate: F) -> TaskResult
    where
        F: Fn(&str) -> Result<(), ReasoningFailure> + Send + Sync,
    {
        self.execute_bounded(task, context, self.retry_bound(), validate).await
    }

    /// Like `execute_checked`, with `run_retry_bound` used unless this agent
    /// was given its own bound.
    pub async fn execute_under<F>(
        &self,
        task: &Task,
        context: &Context,
        run_retry_bound: u32,
        validate: F,
    ) -> TaskResult
    where
        F: Fn(&str) -> Result<(), ReasoningFailure> + Send + Sync,
    {
        let retry_bound = self.retry_bound.unwrap_or(run_retry_bound);
        self.execute_bounded(task, context, retry_bound, validate).await
    }

    async fn execute_bounded<F>(&self, task: &Task, context: &Context, retry_bound: u32, validate: F) -> TaskResult
    where
        F: Fn(&str) -> Result<(), ReasoningFailure> + Send + Sync,
    {
        let tools: Vec<ToolSchema> = self.capabilities.iter().map(|c| c.descriptor()).collect();
        let mut last_failure: Option<ReasoningFailure> = None;

        for attempt in 0..=retry_bound {
            let prompt = self.build_prompt(task, context, last_failure.as_ref(), attempt);
            debug!("Agent '{}' attempt {} on task '{}'", self.id, attempt + 1, task.id);

            match self.run_attempt(&prompt, &tools, &validate).await {
                Ok(text) => {
                    info!(
                        "Agent '{}' produced candidate for '{}' ({} attempts)",
                        self.id,
                        task.id,
                        attempt + 1
                    );
                    return TaskResult::candidate(&task.id, &self.id, text, attempt + 1);
                }
                Err(AttemptError::Reasoning(failure)) => {
                    warn!(
                        "Agent '{}' reasoning failure on '{}' (attempt {}/{}): {}",
                        self.id,
                        task.id,
                        attempt + 1,
                        retry_bound + 1,
                        failure.reason()
                    );
                    last_failure = Some(failure);
                }
                Err(AttemptError::Bridge { capability, source }) => {
                    let failure = TaskFailure::Bridge { capability, source };
                    warn!("Agent '{}' failed task '{}': {}", self.id, task.id, failure);
                    return TaskResult::failed(&task.id, &self.id, failure.to_string(), attempt + 1);
                }
            }
        }

        let reason = last_failure
            .map(|f| f.reason().to_string())
            .unwrap_or_else(|| "no attempts made".to_string());
        let failure = TaskFailure::ReasoningExhausted {
            attempts: retry_bound + 1,
            reason,
        };
        TaskResult::failed(&task.id, &self.id, failure.to_string(), retry_bound + 1)
    }

    async fn run_attempt<F>(&self, prompt: &str, tools: &[ToolSchema], validate: &F) -> Result<String, AttemptError>
    where
        F: Fn(&str) -> Result<(), ReasoningFailure> + Send + Sync,
    {
        let mut transcript = String::new();

        for round in 0..self.max_tool_rounds {
            let full_prompt = format!("{}{}", prompt, transcript);
            let completion = self
                .reasoner
                .complete(&full_prompt, tools)
                .await
                .map_err(AttemptError::Reasoning)?;

            if completion.is_final() {
                validate(&completion.text).map_err(AttemptError::Reasoning)?;
                return Ok(completion.text);
            }

            if transcript.is_empty() {
                transcript.push_str("\n\n## Capability Results\n");
            }

            for call in completion.tool_calls {
                let capability = self.capability(&call.name).ok_or_else(|| {
                    AttemptError::Reasoning(ReasoningFailure::new(format!(
                        "Requested capability '{}' is not available to agent '{}'",
                        call.name, self.id
                    )))
                })?;

                debug!("Agent '{}' round {} calls '{}'", self.id, round + 1, call.name);
                let value = capability
                    .invoke(call.arguments.clone())
                    .await
                    .map_err(|source| AttemptError::Bridge {
                        capability: call.name.clone(),
                        source,
                    })?;

                transcript.push_str(&format!("- {}({}) -> {}\n", call.name, call.arguments, value));
            }
        }

        Err(AttemptError::Reasoning(ReasoningFailure::new(format!(
            "No final answer after {} capability rounds",
            self.max_tool_rounds
        ))))
    }

    fn build_prompt(
        &self,
        task: &Task,
        context: &Context,
        last_failure: Option<&ReasoningFailure>,
        attempt: u32,
    ) -> String {
        let mut prompt = format!("You are {}.\nGoal: {}\n", self.role, self.goal);
        if !self.backstory.is_empty() {
            prompt.push_str(&format!("{}\n", self.backstory));
        }

        prompt.push_str(&format!("\n## Task\n\n{}\n", task.description.trim()));

        if !task.expected_output.description.is_empty() {
            prompt.push_str(&format!(
                "\n## Expected Output\n\n{}\n",
                task.expected_output.description
            ));
        }

        prompt.push_str("\n## Available Capabilities\n\n");
        if self.capabilities.is_empty() {
            prompt.push_str("(none)\n");
        }
        for cap in &self.capabilities {
            let schema = cap.descriptor();
            prompt.push_str(&format!("- {}: {}\n", schema.name, schema.description));
        }

        let relevant: Vec<_> = task
            .depends_on
            .iter()
            .filter_map(|dep| context.get(dep).map(|out| (dep, out)))
            .collect();
        if !relevant.is_empty() {
            prompt.push_str("\n## Context from Completed Tasks\n");
            for (dep, output) in relevant {
                prompt.push_str(&format!("\n### {}\n\n{}\n", dep, output));
            }
        }

        if let Some(feedback) = context.feedback() {
            prompt.push_str(&format!(
                "\n## Reviewer Feedback\n\nA previous answer was rejected:\n{}\n",
                feedback
            ));
        }

        if let Some(failure) = last_failure {
            prompt.push_str(&format!(
                "\n## Correction Required (attempt {})\n\nYour previous response could not be used: {}\n",
                attempt + 1,
                failure.reason()
            ));
        }

        prompt
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("capabilities", &self.capability_names())
            .field("retry_bound", &self.retry_bound)
            .finish()
    }
}
