//! Hierarchical Delegation
//!
//! The manager's role in a hierarchical run: given the tasks that are ready
//! to dispatch, the worker agents, and who did what so far, decide which
//! tasks move to a different agent. Policies are pure functions and never
//! call a reasoning function.

use std::collections::HashMap;

use crate::agent::AgentProfile;

/// A task whose dependencies are all accepted and which has not been
/// dispatched yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyTask {
    pub task_id: String,
    pub assigned: String,
    pub required_capabilities: Vec<String>,
}

impl ReadyTask {
    pub fn runnable_by(&self, agent: &AgentProfile) -> bool {
        self.required_capabilities
            .iter()
            .all(|c| agent.capabilities.contains(c))
    }
}

/// Move `task_id` to agent `to`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reassignment {
    pub task_id: String,
    pub to: String,
}

impl Reassignment {
    pub fn new(task_id: &str, to: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            to: to.to_string(),
        }
    }
}

/// Dispatches made so far in this run
#[derive(Debug, Clone, Default)]
pub struct DelegationHistory {
    dispatches: Vec<(String, String)>,
    load: HashMap<String, usize>,
}

impl DelegationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, task_id: &str, agent_id: &str) {
        self.dispatches.push((task_id.to_string(), agent_id.to_string()));
        *self.load.entry(agent_id.to_string()).or_insert(0) += 1;
    }

    /// Dispatches handed to `agent_id`
    pub fn load(&self, agent_id: &str) -> usize {
        self.load.get(agent_id).copied().unwrap_or(0)
    }

    /// (task, agent) pairs in dispatch order
    pub fn dispatches(&self) -> &[(String, String)] {
        &self.dispatches
    }
}

pub trait DelegationPolicy: Send + Sync {
    fn decide(
        &self,
        ready: &[ReadyTask],
        agents: &[AgentProfile],
        history: &DelegationHistory,
    ) -> Vec<Reassignment>;
}

impl<F> DelegationPolicy for F
where
    F: Fn(&[ReadyTask], &[AgentProfile], &DelegationHistory) -> Vec<Reassignment> + Send + Sync,
{
    fn decide(
        &self,
        ready: &[ReadyTask],
        agents: &[AgentProfile],
        history: &DelegationHistory,
    ) -> Vec<Reassignment> {
        self(ready, agents, history)
    }
}

/// Keep every task with its configured agent
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepAssignments;

impl DelegationPolicy for KeepAssignments {
    fn decide(&self, _: &[ReadyTask], _: &[AgentProfile], _: &DelegationHistory) -> Vec<Reassignment> {
        Vec::new()
    }
}

/// Spread work across capable agents.
///
/// Each ready task goes to the capable agent with the fewest dispatches,
/// counting the choices already made in this round. Ties keep the current
/// assignee, then fall back to agent declaration order.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeastLoaded;

impl DelegationPolicy for LeastLoaded {
    fn decide(
        &self,
        ready: &[ReadyTask],
        agents: &[AgentProfile],
        history: &DelegationHistory,
    ) -> Vec<Reassignment> {
        let mut pending: HashMap<&str, usize> = HashMap::new();
        let mut decisions = Vec::new();

        for task in ready {
            let load = |id: &str| history.load(id) + pending.get(id).copied().unwrap_or(0);

            let best = agents
                .iter()
                .enumerate()
                .filter(|(_, a)| task.runnable_by(a))
                .min_by_key(|(i, a)| (load(&a.id), a.id != task.assigned, *i))
                .map(|(_, a)| a.id.as_str());

            let chosen = best.unwrap_or(task.assigned.as_str());
            *pending.entry(chosen).or_insert(0) += 1;

            if chosen != task.assigned {
                decisions.push(Reassignment::new(&task.task_id, chosen));
            }
        }

        decisions
    }
}

/// Check one decision against the current ready set
pub(crate) fn check_decision(
    decision: &Reassignment,
    ready: &[ReadyTask],
    agents: &[AgentProfile],
) -> Result<(), String> {
    let task = ready
        .iter()
        .find(|t| t.task_id == decision.task_id)
        .ok_or_else(|| format!("task '{}' is not ready for dispatch", decision.task_id))?;
    let agent = agents
        .iter()
        .find(|a| a.id == decision.to)
        .ok_or_else(|| format!("unknown agent '{}'", decision.to))?;
    if !task.runnable_by(agent) {
        return Err(format!(
            "agent '{}' lacks capabilities required by '{}'",
            agent.id, task.task_id
        ));
    }
    Ok(())
}
