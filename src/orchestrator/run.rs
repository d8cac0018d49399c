//! Run Loop
//!
//! One run at a time per orchestrator. Ready tasks are dispatched in
//! topological order, up to `worker_concurrency` at once. Each attempt is an
//! execution phase followed by a QA phase, both bounded by the same per-task
//! deadline and both dropped on cancellation.
//!
//! Context is written only here, and only for ACCEPTED results.

use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{error::Elapsed, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::delegation::{check_decision, DelegationHistory, DelegationPolicy, LeastLoaded, ReadyTask};
use super::events::{EventLog, RunEvent};
use super::graph::topological_order;
use super::report::{RunReport, TaskOutcome};
use super::state::{TaskMachine, TaskState};
use crate::agent::{Agent, AgentProfile, DEFAULT_RETRY_BOUND};
use crate::error::{ConfigurationError, RunError, TaskFailure};
use crate::qa::QaGate;
use crate::task::{Context, Task, TaskResult};

/// How tasks are assigned to agents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessMode {
    /// Every task runs on its configured agent
    #[default]
    Sequential,
    /// A delegation policy may move ready tasks between agents
    Hierarchical,
}

/// Run-level settings
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    /// Reasoning retries per attempt for agents without their own bound, and
    /// QA re-dispatches per task
    pub retry_bound: u32,
    pub task_timeout: Duration,
    pub worker_concurrency: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            retry_bound: DEFAULT_RETRY_BOUND,
            task_timeout: Duration::from_secs(60),
            worker_concurrency: 1,
        }
    }
}

impl RunSettings {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.worker_concurrency == 0 {
            return Err(ConfigurationError::InvalidSetting(
                "worker_concurrency must be at least 1".to_string(),
            ));
        }
        if self.task_timeout.is_zero() {
            return Err(ConfigurationError::InvalidSetting(
                "task_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder collecting agents and tasks before validation
pub struct OrchestratorBuilder {
    tasks: Vec<Task>,
    agents: Vec<Arc<Agent>>,
    qa: QaGate,
    mode: ProcessMode,
    settings: RunSettings,
    policy: Option<Arc<dyn DelegationPolicy>>,
}

impl OrchestratorBuilder {
    pub fn agent(mut self, agent: Agent) -> Self {
        self.agents.push(Arc::new(agent));
        self
    }

    pub fn shared_agent(mut self, agent: Arc<Agent>) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn qa(mut self, qa: QaGate) -> Self {
        self.qa = qa;
        self
    }

    pub fn mode(mut self, mode: ProcessMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Delegation policy for hierarchical runs (default: least loaded)
    pub fn delegation(mut self, policy: impl DelegationPolicy + 'static) -> Self {
        self.policy = Some(Arc::new(policy));
        self
    }

    /// Validate the workflow. Every check here runs before any dispatch.
    pub fn build(self) -> Result<Orchestrator, ConfigurationError> {
        self.settings.validate()?;

        let mut agent_ids = HashSet::new();
        for agent in &self.agents {
            if !agent_ids.insert(agent.id.as_str()) {
                return Err(ConfigurationError::Duplicate {
                    kind: "agent",
                    id: agent.id.clone(),
                });
            }
        }

        let mut task_ids = HashSet::new();
        for task in &self.tasks {
            if !task_ids.insert(task.id.as_str()) {
                return Err(ConfigurationError::Duplicate {
                    kind: "task",
                    id: task.id.clone(),
                });
            }
        }

        let known_capabilities: HashSet<String> = self
            .agents
            .iter()
            .flat_map(|a| a.capability_names())
            .collect();

        for task in &self.tasks {
            let agent = self
                .agents
                .iter()
                .find(|a| a.id == task.agent_id)
                .ok_or_else(|| ConfigurationError::UnknownAgent {
                    task: task.id.clone(),
                    agent: task.agent_id.clone(),
                })?;

            if let Some(missing) = agent.missing_capability(task) {
                if !known_capabilities.contains(missing) {
                    return Err(ConfigurationError::UnknownCapability(missing.to_string()));
                }
                return Err(ConfigurationError::MissingCapability {
                    task: task.id.clone(),
                    agent: agent.id.clone(),
                    capability: missing.to_string(),
                });
            }

            self.qa.validate_contract(task)?;
        }

        let order = topological_order(&self.tasks)?;

        let mut qa = self.qa;
        qa.set_run_retry_bound(self.settings.retry_bound);

        Ok(Orchestrator {
            tasks: self.tasks,
            agents: self.agents,
            qa,
            mode: self.mode,
            settings: self.settings,
            policy: self.policy.unwrap_or_else(|| Arc::new(LeastLoaded)),
            order,
            running: AtomicBool::new(false),
        })
    }
}

/// A validated workflow, ready to run
pub struct Orchestrator {
    tasks: Vec<Task>,
    agents: Vec<Arc<Agent>>,
    qa: QaGate,
    mode: ProcessMode,
    settings: RunSettings,
    policy: Arc<dyn DelegationPolicy>,
    order: Vec<usize>,
    running: AtomicBool,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("tasks", &self.tasks.len())
            .field("agents", &self.agents.len())
            .field("mode", &self.mode)
            .field("settings", &self.settings)
            .finish()
    }
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

enum Phase {
    Executed(Result<TaskResult, Elapsed>),
    Reviewed(Result<TaskResult, Elapsed>),
}

type Attempt = BoxFuture<'static, (usize, Phase)>;

/// Per-task bookkeeping for one run
struct TaskRun {
    machine: TaskMachine,
    assignee: usize,
    deadline: Option<Instant>,
    feedback: Option<String>,
    last: Option<TaskResult>,
    reason: Option<String>,
    attempts: u32,
    retry_pending: bool,
}

impl TaskRun {
    fn failed_for_good(&self) -> bool {
        match self.machine.state() {
            TaskState::Skipped => true,
            TaskState::Rejected => !self.retry_pending,
            _ => false,
        }
    }
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder {
            tasks: Vec::new(),
            agents: Vec::new(),
            qa: QaGate::new(),
            mode: ProcessMode::Sequential,
            settings: RunSettings::default(),
            policy: None,
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn agents(&self) -> &[Arc<Agent>] {
        &self.agents
    }

    pub fn mode(&self) -> ProcessMode {
        self.mode
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Task ids in dispatch order
    pub fn execution_order(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.tasks[i].id.as_str()).collect()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Execute the workflow once.
    ///
    /// Returns `RunError::AlreadyRunning` if another run on this instance is
    /// still in progress. Task failures never surface as errors; they are in
    /// the report.
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunReport, RunError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(RunError::AlreadyRunning);
        }
        let _guard = RunningGuard(&self.running);

        let run_id = uuid::Uuid::new_v4().to_string();
        info!(
            "Starting run {} ({} tasks, {:?}, concurrency {})",
            run_id,
            self.tasks.len(),
            self.mode,
            self.settings.worker_concurrency
        );

        let mut runner = Runner::new(self);
        let cancelled = runner.drive(&cancel).await;

        let report = runner.finish(run_id, cancelled);
        info!(
            "Run {} finished: success={}, failed={}",
            report.run_id,
            report.success,
            report.failures().len()
        );
        Ok(report)
    }

    fn agent_index(&self, agent_id: &str) -> Option<usize> {
        self.agents.iter().position(|a| a.id == agent_id)
    }

    fn retry_budget(&self, task: &Task) -> u32 {
        task.max_retries.unwrap_or(self.settings.retry_bound)
    }
}

/// Mutable state of a single run
struct Runner<'a> {
    orch: &'a Orchestrator,
    runs: Vec<TaskRun>,
    context: Context,
    events: EventLog,
    history: DelegationHistory,
    in_flight: HashSet<usize>,
}

impl<'a> Runner<'a> {
    fn new(orch: &'a Orchestrator) -> Self {
        let runs = orch
            .tasks
            .iter()
            .map(|t| TaskRun {
                machine: TaskMachine::new(&t.id),
                // Validated at build time
                assignee: orch.agent_index(&t.agent_id).unwrap_or(0),
                deadline: None,
                feedback: None,
                last: None,
                reason: None,
                attempts: 0,
                retry_pending: false,
            })
            .collect();

        Self {
            orch,
            runs,
            context: Context::new(),
            events: EventLog::new(),
            history: DelegationHistory::new(),
            in_flight: HashSet::new(),
        }
    }

    /// Returns true if the run was cancelled
    async fn drive(&mut self, cancel: &CancellationToken) -> bool {
        let mut attempts: FuturesUnordered<Attempt> = FuturesUnordered::new();

        loop {
            if cancel.is_cancelled() {
                drop(attempts);
                self.cancel_remaining();
                return true;
            }

            self.skip_blocked();

            let free = self
                .orch
                .settings
                .worker_concurrency
                .saturating_sub(self.in_flight.len());
            if free > 0 {
                let ready: Vec<usize> = self.ready().into_iter().take(free).collect();
                if self.orch.mode == ProcessMode::Hierarchical {
                    self.delegate(&ready);
                }
                for i in ready {
                    attempts.push(self.dispatch(i));
                }
            }

            if attempts.is_empty() {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    drop(attempts);
                    self.cancel_remaining();
                    return true;
                }
                Some((i, phase)) = attempts.next() => {
                    if let Some(next) = self.complete(i, phase) {
                        attempts.push(next);
                    }
                }
            }
        }

        // Nothing left in flight; anything still pending can never run
        for i in 0..self.runs.len() {
            if self.runs[i].machine.state() == TaskState::Pending {
                self.runs[i].reason = Some("Skipped: dependencies never completed".to_string());
                self.set_state(i, TaskState::Skipped);
            }
        }
        false
    }

    /// Tasks that can be dispatched now, in topological order
    fn ready(&self) -> Vec<usize> {
        self.orch
            .order
            .iter()
            .copied()
            .filter(|&i| !self.in_flight.contains(&i))
            .filter(|&i| {
                let run = &self.runs[i];
                match run.machine.state() {
                    TaskState::Pending => self.orch.tasks[i]
                        .depends_on
                        .iter()
                        .all(|d| self.context.contains(d)),
                    TaskState::Rejected => run.retry_pending,
                    _ => false,
                }
            })
            .collect()
    }

    /// Mark pending tasks whose dependencies failed for good as SKIPPED
    fn skip_blocked(&mut self) {
        let orch = self.orch;
        for &i in &orch.order {
            if self.runs[i].machine.state() != TaskState::Pending {
                continue;
            }
            let blocker = orch.tasks[i].depends_on.iter().find(|d| {
                orch.tasks
                    .iter()
                    .position(|t| &t.id == *d)
                    .map(|j| self.runs[j].failed_for_good())
                    .unwrap_or(false)
            });
            if let Some(dep) = blocker {
                let reason = format!("Skipped: dependency '{}' was not accepted", dep);
                info!("Task '{}' skipped: dependency '{}' was not accepted", orch.tasks[i].id, dep);
                self.runs[i].reason = Some(reason);
                self.set_state(i, TaskState::Skipped);
            }
        }
    }

    /// Let the delegation policy move pending tasks before dispatch
    fn delegate(&mut self, ready: &[usize]) {
        let ready_tasks: Vec<ReadyTask> = ready
            .iter()
            .filter(|&&i| self.runs[i].machine.state() == TaskState::Pending)
            .map(|&i| ReadyTask {
                task_id: self.orch.tasks[i].id.clone(),
                assigned: self.orch.agents[self.runs[i].assignee].id.clone(),
                required_capabilities: self.orch.tasks[i].required_capabilities.clone(),
            })
            .collect();
        if ready_tasks.is_empty() {
            return;
        }

        // The QA reviewer judges work; it never takes any
        let reviewer = self.orch.qa.reviewer().map(|r| r.id.as_str());
        let profiles: Vec<AgentProfile> = self
            .orch
            .agents
            .iter()
            .filter(|a| Some(a.id.as_str()) != reviewer)
            .map(|a| a.profile())
            .collect();
        let decisions = self.orch.policy.decide(&ready_tasks, &profiles, &self.history);

        let mut moved = HashSet::new();
        for decision in decisions {
            if let Err(reason) = check_decision(&decision, &ready_tasks, &profiles) {
                warn!("Ignoring reassignment of '{}': {}", decision.task_id, reason);
                continue;
            }
            if !moved.insert(decision.task_id.clone()) {
                warn!("Ignoring repeated reassignment of '{}'", decision.task_id);
                continue;
            }
            let (Some(i), Some(to)) = (
                self.orch.tasks.iter().position(|t| t.id == decision.task_id),
                self.orch.agent_index(&decision.to),
            ) else {
                continue;
            };
            let from = self.runs[i].assignee;
            if from == to {
                continue;
            }

            info!(
                "Reassigning task '{}': {} -> {}",
                decision.task_id, self.orch.agents[from].id, decision.to
            );
            self.runs[i].assignee = to;
            self.events.push(RunEvent::Reassigned {
                task_id: decision.task_id.clone(),
                from: self.orch.agents[from].id.clone(),
                to: decision.to.clone(),
            });
        }
    }

    fn dispatch(&mut self, i: usize) -> Attempt {
        self.set_state(i, TaskState::Dispatched);
        self.runs[i].retry_pending = false;
        self.in_flight.insert(i);

        let task = self.orch.tasks[i].clone();
        let agent = Arc::clone(&self.orch.agents[self.runs[i].assignee]);
        let snapshot = self.context.snapshot(self.runs[i].feedback.clone());
        let attempt = self.runs[i].machine.dispatches();

        debug!(
            "Dispatching '{}' to '{}' (attempt {}, context: {:?})",
            task.id,
            agent.id,
            attempt,
            snapshot.task_ids()
        );
        self.events.push(RunEvent::Dispatched {
            task_id: task.id.clone(),
            agent: agent.id.clone(),
            attempt,
            visible_context: snapshot.task_ids(),
        });
        self.history.record(&task.id, &agent.id);

        let deadline = Instant::now() + self.orch.settings.task_timeout;
        self.runs[i].deadline = Some(deadline);
        let retry_bound = self.orch.settings.retry_bound;

        async move {
            let work = agent.execute_under(&task, &snapshot, retry_bound, |_| Ok(()));
            let result = tokio::time::timeout_at(deadline, work).await;
            (i, Phase::Executed(result))
        }
        .boxed()
    }

    /// Apply a finished phase. Returns the QA phase to run next, if any.
    fn complete(&mut self, i: usize, phase: Phase) -> Option<Attempt> {
        match phase {
            Phase::Executed(Err(_)) | Phase::Reviewed(Err(_)) => {
                self.in_flight.remove(&i);
                let failure = TaskFailure::TimedOut(self.orch.settings.task_timeout);
                warn!("Task '{}' {}", self.orch.tasks[i].id, failure.to_string().to_lowercase());
                self.runs[i].reason = Some(failure.to_string());
                self.runs[i].retry_pending = false;
                self.set_state(i, TaskState::Rejected);
                None
            }
            Phase::Executed(Ok(result)) => {
                self.runs[i].attempts += result.attempts;
                if result.is_failure() {
                    self.in_flight.remove(&i);
                    self.runs[i].reason = result.qa_feedback.clone();
                    self.runs[i].last = Some(result);
                    self.runs[i].retry_pending = false;
                    self.set_state(i, TaskState::Rejected);
                    return None;
                }

                self.set_state(i, TaskState::Executed);
                self.set_state(i, TaskState::QaPending);

                let qa = self.orch.qa.clone();
                let task = self.orch.tasks[i].clone();
                let deadline = self.runs[i]
                    .deadline
                    .unwrap_or_else(|| Instant::now() + self.orch.settings.task_timeout);
                Some(
                    async move {
                        let reviewed = tokio::time::timeout_at(deadline, qa.review(result, &task)).await;
                        (i, Phase::Reviewed(reviewed))
                    }
                    .boxed(),
                )
            }
            Phase::Reviewed(Ok(result)) => {
                self.in_flight.remove(&i);
                let orch = self.orch;
                let task = &orch.tasks[i];

                if result.accepted {
                    self.context.admit(&result);
                    self.runs[i].reason = None;
                    self.runs[i].last = Some(result);
                    self.set_state(i, TaskState::Accepted);
                    return None;
                }

                let budget = orch.retry_budget(task);
                let dispatches = self.runs[i].machine.dispatches();
                let retry = dispatches <= budget;
                if retry {
                    info!(
                        "Task '{}' rejected by QA, re-dispatching ({}/{} retries)",
                        task.id, dispatches, budget
                    );
                } else {
                    warn!("Task '{}' rejected by QA, retries exhausted", task.id);
                }

                self.runs[i].feedback = result.qa_feedback.clone();
                self.runs[i].reason = result.qa_feedback.clone();
                self.runs[i].last = Some(result);
                self.runs[i].retry_pending = retry;
                self.set_state(i, TaskState::Rejected);
                None
            }
        }
    }

    fn cancel_remaining(&mut self) {
        warn!("Run cancelled");
        self.events.push(RunEvent::Cancelled {
            reason: "run cancelled".to_string(),
        });

        let in_flight: Vec<usize> = self.in_flight.drain().collect();
        for i in in_flight {
            self.runs[i].reason = Some("cancelled".to_string());
            self.runs[i].retry_pending = false;
            self.set_state(i, TaskState::Rejected);
        }

        for i in 0..self.runs.len() {
            match self.runs[i].machine.state() {
                TaskState::Pending => {
                    self.runs[i].reason = Some("Skipped: run cancelled".to_string());
                    self.set_state(i, TaskState::Skipped);
                }
                TaskState::Rejected if self.runs[i].retry_pending => {
                    self.runs[i].retry_pending = false;
                }
                _ => {}
            }
        }
    }

    fn set_state(&mut self, i: usize, to: TaskState) {
        match self.runs[i].machine.transition(to) {
            Ok(from) => {
                debug!("Task '{}': {} -> {}", self.orch.tasks[i].id, from, to);
                self.events.push(RunEvent::StateChanged {
                    task_id: self.orch.tasks[i].id.clone(),
                    from,
                    to,
                });
            }
            Err(e) => error!("{}", e),
        }
    }

    fn finish(self, run_id: String, cancelled: bool) -> RunReport {
        let outcomes = self
            .orch
            .tasks
            .iter()
            .zip(&self.runs)
            .map(|(task, run)| {
                let state = run.machine.state();
                let accepted = state == TaskState::Accepted;
                TaskOutcome {
                    task_id: task.id.clone(),
                    status: state,
                    accepted,
                    payload: run.last.as_ref().and_then(|r| r.payload.clone()),
                    qa_feedback: if accepted { None } else { run.reason.clone() },
                    attempts: run.attempts,
                    executed_by: run.last.as_ref().map(|r| r.executed_by.clone()),
                    optional: task.optional,
                }
            })
            .collect();

        RunReport::new(run_id, outcomes, self.events.into_records(), cancelled)
    }
}
