//! End-to-end workflow runs against the in-process data server and scripted
//! reasoning functions.

use async_trait::async_trait;
use crew_mcp::agent::{Agent, AgentProfile, Capability, Completion, ReasoningFn, ScriptedReasoner, ToolCall};
use crew_mcp::bridge::{RpcTransport, ToolBridge, ToolSchema};
use crew_mcp::error::{BridgeError, ConfigurationError, ReasoningFailure, RunError};
use crew_mcp::mcp::{McpRequest, McpResponse};
use crew_mcp::orchestrator::{
    DelegationHistory, Orchestrator, ProcessMode, ReadyTask, Reassignment, RunEvent, RunReport,
    RunSettings, TaskState,
};
use crew_mcp::qa::{ExpectedOutput, QaGate};
use crew_mcp::recovery::RetryPolicy;
use crew_mcp::server::McpServer;
use crew_mcp::store::ResearchDataStore;
use crew_mcp::task::Task;
use crew_mcp::workflow::{BridgeSpec, Workflow};
use std::collections::HashSet;
use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;
use tokio_util::sync::CancellationToken;

fn agent(id: &str, reasoner: Arc<dyn ReasoningFn>) -> Agent {
    Agent::new(id, &format!("{} role", id), &format!("{} goal", id), reasoner)
}

fn settings(retry_bound: u32, concurrency: usize) -> RunSettings {
    RunSettings {
        retry_bound,
        task_timeout: Duration::from_secs(5),
        worker_concurrency: concurrency,
    }
}

/// Every key visible at dispatch must belong to a task already ACCEPTED
fn assert_context_invariant(report: &RunReport) {
    let mut accepted = HashSet::new();
    for record in &report.events {
        match &record.event {
            RunEvent::StateChanged {
                task_id,
                to: TaskState::Accepted,
                ..
            } => {
                accepted.insert(task_id.clone());
            }
            RunEvent::Dispatched {
                task_id,
                visible_context,
                ..
            } => {
                for key in visible_context {
                    assert!(
                        accepted.contains(key),
                        "task '{}' saw '{}' before it was accepted",
                        task_id,
                        key
                    );
                }
            }
            _ => {}
        }
    }
}

fn dispatch_count(report: &RunReport, task: &str) -> usize {
    report
        .events
        .iter()
        .filter(|r| matches!(&r.event, RunEvent::Dispatched { task_id, .. } if task_id == task))
        .count()
}

/// Waits until `n` calls are in flight at once
struct BarrierReasoner {
    barrier: Arc<Barrier>,
}

#[async_trait]
impl ReasoningFn for BarrierReasoner {
    async fn complete(&self, _prompt: &str, _tools: &[ToolSchema]) -> Result<Completion, ReasoningFailure> {
        self.barrier.wait().await;
        Ok(Completion::text("done in parallel"))
    }
}

/// Takes a long time to answer
struct SlowReasoner {
    delay: Duration,
}

#[async_trait]
impl ReasoningFn for SlowReasoner {
    async fn complete(&self, _prompt: &str, _tools: &[ToolSchema]) -> Result<Completion, ReasoningFailure> {
        tokio::time::sleep(self.delay).await;
        Ok(Completion::text("eventually"))
    }
}

/// Fails with a connection error a fixed number of times
struct FlakyTransport {
    inner: Arc<McpServer>,
    failures_left: AtomicU32,
    calls: AtomicU32,
}

#[async_trait]
impl RpcTransport for FlakyTransport {
    async fn send(&self, request: McpRequest) -> Result<McpResponse, BridgeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(BridgeError::Connection("connection refused".into()));
        }
        self.inner.send(request).await
    }
}

#[tokio::test]
async fn test_independent_tasks_run_concurrently() {
    let reasoner: Arc<dyn ReasoningFn> = Arc::new(BarrierReasoner {
        barrier: Arc::new(Barrier::new(2)),
    });
    let orch = Orchestrator::builder()
        .agent(agent("researcher", reasoner.clone()))
        .agent(agent("analyst", reasoner))
        .task(Task::new("market", "Research the market", "researcher"))
        .task(Task::new("competitors", "List competitors", "analyst"))
        .settings(settings(0, 2))
        .build()
        .unwrap();

    let report = orch.run(CancellationToken::new()).await.unwrap();

    assert!(report.success);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.outcomes[0].task_id, "market");
    assert_eq!(report.outcomes[1].task_id, "competitors");
    assert!(report.outcomes.iter().all(|o| o.accepted && o.qa_feedback.is_none()));
}

#[tokio::test]
async fn test_exhausted_dependency_skips_dependent() {
    let failing = Arc::new(ScriptedReasoner::failing("unparseable output"));
    let fine = Arc::new(ScriptedReasoner::answering("analysis"));
    let orch = Orchestrator::builder()
        .agent(agent("a", failing.clone()).with_retry_bound(2))
        .agent(agent("b", fine.clone()))
        .task(Task::new("A", "First", "a"))
        .task(Task::new("B", "Second", "b").depends_on("A"))
        .settings(settings(2, 1))
        .build()
        .unwrap();

    let report = orch.run(CancellationToken::new()).await.unwrap();

    assert!(!report.success);
    assert_eq!(report.exit_code(), 2);

    let a = report.outcome("A").unwrap();
    assert_eq!(a.status, TaskState::Rejected);
    assert_eq!(a.attempts, 3);
    assert_eq!(failing.calls(), 3);
    assert!(a.qa_feedback.as_deref().unwrap().contains("unparseable output"));

    let b = report.outcome("B").unwrap();
    assert_eq!(b.status, TaskState::Skipped);
    assert!(b.payload.is_none());
    assert_eq!(dispatch_count(&report, "B"), 0);
    assert_eq!(fine.calls(), 0);
}

#[tokio::test]
async fn test_hierarchical_reassignment_is_recorded() {
    let x = Arc::new(ScriptedReasoner::answering("from x"));
    let y = Arc::new(ScriptedReasoner::answering("from y"));
    let policy = |ready: &[ReadyTask], _: &[AgentProfile], _: &DelegationHistory| -> Vec<Reassignment> {
        ready
            .iter()
            .filter(|t| t.task_id == "analysis")
            .map(|t| Reassignment::new(&t.task_id, "y"))
            .collect()
    };

    let orch = Orchestrator::builder()
        .agent(agent("x", x.clone()))
        .agent(agent("y", y.clone()))
        .task(Task::new("research", "Research", "x"))
        .task(Task::new("analysis", "Analyze", "x").depends_on("research"))
        .task(Task::new("report", "Report", "x").depends_on("analysis"))
        .mode(ProcessMode::Hierarchical)
        .delegation(policy)
        .build()
        .unwrap();

    let report = orch.run(CancellationToken::new()).await.unwrap();
    assert!(report.success);

    let reassignments: Vec<_> = report
        .events
        .iter()
        .filter_map(|r| match &r.event {
            RunEvent::Reassigned { task_id, from, to } => Some((task_id.clone(), from.clone(), to.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(
        reassignments,
        vec![("analysis".to_string(), "x".to_string(), "y".to_string())]
    );

    let analysis = report.outcome("analysis").unwrap();
    assert_eq!(analysis.executed_by.as_deref(), Some("y"));
    assert_eq!(analysis.payload.as_deref(), Some("from y"));

    // The downstream task sees y's output under the original task id
    let prompt = x.prompts().last().cloned().unwrap();
    assert!(prompt.contains("### analysis"));
    assert!(prompt.contains("from y"));
    assert_eq!(y.calls(), 1);
    assert_context_invariant(&report);
}

#[tokio::test]
async fn test_invalid_reassignment_is_ignored() {
    let reasoner = Arc::new(ScriptedReasoner::answering("ok"));
    let policy = |ready: &[ReadyTask], _: &[AgentProfile], _: &DelegationHistory| -> Vec<Reassignment> {
        ready.iter().map(|t| Reassignment::new(&t.task_id, "ghost")).collect()
    };
    let orch = Orchestrator::builder()
        .agent(agent("x", reasoner))
        .task(Task::new("t", "T", "x"))
        .mode(ProcessMode::Hierarchical)
        .delegation(policy)
        .build()
        .unwrap();

    let report = orch.run(CancellationToken::new()).await.unwrap();

    assert!(report.success);
    assert_eq!(report.outcome("t").unwrap().executed_by.as_deref(), Some("x"));
    assert!(!report.events.iter().any(|r| matches!(r.event, RunEvent::Reassigned { .. })));
}

#[tokio::test]
async fn test_bridge_recovers_from_connection_errors() {
    let store = Arc::new(ResearchDataStore::new());
    let transport = Arc::new(FlakyTransport {
        inner: Arc::new(McpServer::new(store.clone())),
        failures_left: AtomicU32::new(2),
        calls: AtomicU32::new(0),
    });
    let bridge = Arc::new(
        ToolBridge::new("research_store", transport.clone()).with_retry(RetryPolicy::immediate(3)),
    );
    let reasoner = Arc::new(ScriptedReasoner::new(
        vec![Ok(Completion::calls(vec![ToolCall::new(
            "store_findings",
            serde_json::json!({"key": "market_size", "value": "$15.7B"}),
        )]))],
        Ok(Completion::text("Market size stored")),
    ));

    let orch = Orchestrator::builder()
        .agent(
            agent("researcher", reasoner)
                .with_capability(Capability::new("store_findings", bridge, "write_record").unwrap()),
        )
        .task(Task::new("research", "Research", "researcher").requires("store_findings"))
        .build()
        .unwrap();

    let report = orch.run(CancellationToken::new()).await.unwrap();

    assert!(report.success);
    assert!(report.failures().is_empty());
    assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    assert_eq!(store.retrieve("market_size").unwrap().value, "$15.7B");
}

#[tokio::test]
async fn test_remote_error_fails_task_without_retry() {
    // The server has no such tool, so the call fails remotely
    let store = Arc::new(ResearchDataStore::new());
    let bridge = Arc::new(
        ToolBridge::new("research_store", Arc::new(McpServer::new(store)))
            .with_operations(vec![ToolSchema::new("archive_records", "Archive the store")]),
    );
    let reasoner = Arc::new(ScriptedReasoner::new(
        vec![Ok(Completion::calls(vec![ToolCall::new(
            "archive",
            serde_json::json!({}),
        )]))],
        Ok(Completion::text("unreachable")),
    ));

    let orch = Orchestrator::builder()
        .agent(
            agent("analyst", reasoner.clone())
                .with_capability(Capability::new("archive", bridge, "archive_records").unwrap()),
        )
        .task(Task::new("analysis", "Analyze", "analyst"))
        .build()
        .unwrap();

    let report = orch.run(CancellationToken::new()).await.unwrap();

    let outcome = report.outcome("analysis").unwrap();
    assert_eq!(outcome.status, TaskState::Rejected);
    assert!(outcome.qa_feedback.as_deref().unwrap().contains("Remote error"));
    assert_eq!(reasoner.calls(), 1);
    assert_eq!(dispatch_count(&report, "analysis"), 1);
}

#[tokio::test]
async fn test_missing_record_lets_agent_continue() {
    let store = Arc::new(ResearchDataStore::new());
    let bridge = Arc::new(ToolBridge::new("research_store", Arc::new(McpServer::new(store))));
    let reasoner = Arc::new(ScriptedReasoner::new(
        vec![Ok(Completion::calls(vec![ToolCall::new(
            "read_findings",
            serde_json::json!({"key": "maybe"}),
        )]))],
        Ok(Completion::text("No prior findings, analysis from scratch")),
    ));

    let orch = Orchestrator::builder()
        .agent(
            agent("analyst", reasoner.clone())
                .with_capability(Capability::new("read_findings", bridge, "read_record").unwrap()),
        )
        .task(Task::new("analysis", "Analyze", "analyst").requires("read_findings"))
        .build()
        .unwrap();

    let report = orch.run(CancellationToken::new()).await.unwrap();

    assert!(report.success);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(reasoner.calls(), 2);
    assert!(reasoner.prompts()[1].contains("No data found for key: maybe"));
}

#[tokio::test]
async fn test_qa_reviewer_is_never_delegated_work() {
    let writer = Arc::new(ScriptedReasoner::answering("draft text"));
    let judge = Arc::new(ScriptedReasoner::answering("Solid. APPROVED"));
    let reviewer = Arc::new(agent("reviewer", judge.clone()));

    let orch = Orchestrator::builder()
        .agent(agent("writer", writer.clone()))
        .shared_agent(reviewer.clone())
        .task(Task::new("report", "Write report", "writer").with_contract(ExpectedOutput::default().reviewed()))
        .task(
            Task::new("blurb", "Write blurb", "writer")
                .depends_on("report")
                .with_contract(ExpectedOutput::default().reviewed()),
        )
        .qa(QaGate::new().with_reviewer(reviewer))
        .mode(ProcessMode::Hierarchical)
        .build()
        .unwrap();

    let report = orch.run(CancellationToken::new()).await.unwrap();

    assert!(report.success);
    for outcome in &report.outcomes {
        assert_eq!(outcome.executed_by.as_deref(), Some("writer"));
    }
    assert!(!report.events.iter().any(|r| matches!(r.event, RunEvent::Reassigned { .. })));
    assert_eq!(writer.calls(), 2);
    assert_eq!(judge.calls(), 2);
}

#[tokio::test]
async fn test_run_retry_bound_applies_to_agents() {
    let failing = Arc::new(ScriptedReasoner::failing("unparseable output"));
    let orch = Orchestrator::builder()
        .agent(agent("a", failing.clone()))
        .task(Task::new("A", "First", "a"))
        .settings(settings(0, 1))
        .build()
        .unwrap();

    let report = orch.run(CancellationToken::new()).await.unwrap();

    assert_eq!(report.exit_code(), 2);
    assert_eq!(report.outcome("A").unwrap().attempts, 1);
    assert_eq!(failing.calls(), 1);
}

#[tokio::test]
async fn test_cycle_is_rejected_before_dispatch() {
    let reasoner = Arc::new(ScriptedReasoner::answering("never"));
    let err = Orchestrator::builder()
        .agent(agent("a", reasoner.clone()))
        .task(Task::new("one", "1", "a").depends_on("three"))
        .task(Task::new("two", "2", "a").depends_on("one"))
        .task(Task::new("three", "3", "a").depends_on("two"))
        .build()
        .unwrap_err();

    assert!(matches!(err, ConfigurationError::Cycle(_)));
    assert!(err.to_string().starts_with("Dependency cycle detected"));
    assert_eq!(reasoner.calls(), 0);
}

#[tokio::test]
async fn test_missing_capability_is_configuration_error() {
    let store = Arc::new(ResearchDataStore::new());
    let bridge = Arc::new(ToolBridge::new("research_store", Arc::new(McpServer::new(store))));
    let reasoner = Arc::new(ScriptedReasoner::answering("x"));

    let err = Orchestrator::builder()
        .agent(
            agent("researcher", reasoner.clone())
                .with_capability(Capability::new("store_findings", bridge, "write_record").unwrap()),
        )
        .agent(agent("writer", reasoner))
        .task(Task::new("report", "Write", "writer").requires("store_findings"))
        .build()
        .unwrap_err();

    assert_eq!(
        err,
        ConfigurationError::MissingCapability {
            task: "report".into(),
            agent: "writer".into(),
            capability: "store_findings".into(),
        }
    );
}

#[tokio::test]
async fn test_qa_rejection_redispatches_with_feedback() {
    let writer = Arc::new(ScriptedReasoner::new(
        vec![Ok(Completion::text("draft without heading"))],
        Ok(Completion::text("## Summary\nfinal report")),
    ));
    let reader = Arc::new(ScriptedReasoner::answering("read it"));

    for concurrency in [1, 3] {
        let orch = Orchestrator::builder()
            .agent(agent("writer", writer.clone()))
            .agent(agent("reader", reader.clone()))
            .task(
                Task::new("report", "Write report", "writer")
                    .with_contract(ExpectedOutput::described("Report").containing("## Summary")),
            )
            .task(Task::new("side", "Unrelated", "reader"))
            .task(Task::new("review", "Read report", "reader").depends_on("report"))
            .settings(settings(2, concurrency))
            .build()
            .unwrap();

        let report = orch.run(CancellationToken::new()).await.unwrap();

        assert!(report.success, "concurrency {}", concurrency);
        assert_context_invariant(&report);
        assert_eq!(report.outcome("report").unwrap().payload.as_deref(), Some("## Summary\nfinal report"));
    }

    // First run: draft rejected, feedback folded into the second prompt
    let prompts = writer.prompts();
    assert!(!prompts[0].contains("Reviewer Feedback"));
    assert!(prompts[1].contains("Reviewer Feedback"));
    assert!(prompts[1].contains("## Summary"));
}

#[tokio::test]
async fn test_qa_retry_budget_is_exact() {
    let writer = Arc::new(ScriptedReasoner::answering("too short"));
    let orch = Orchestrator::builder()
        .agent(agent("writer", writer.clone()))
        .task(
            Task::new("report", "Write report", "writer")
                .with_contract(ExpectedOutput::default().min_length(500))
                .with_max_retries(1),
        )
        .settings(settings(2, 1))
        .build()
        .unwrap();

    let report = orch.run(CancellationToken::new()).await.unwrap();

    let outcome = report.outcome("report").unwrap();
    assert_eq!(outcome.status, TaskState::Rejected);
    assert!(!outcome.accepted);
    assert!(outcome.qa_feedback.as_deref().unwrap().contains("too short"));
    assert_eq!(outcome.payload.as_deref(), Some("too short"));
    assert_eq!(dispatch_count(&report, "report"), 2);
    assert_eq!(writer.calls(), 2);
    assert_eq!(report.exit_code(), 2);
}

#[tokio::test]
async fn test_optional_failure_does_not_fail_run() {
    let failing = Arc::new(ScriptedReasoner::failing("nope"));
    let fine = Arc::new(ScriptedReasoner::answering("fine"));
    let orch = Orchestrator::builder()
        .agent(agent("a", failing).with_retry_bound(0))
        .agent(agent("b", fine))
        .task(Task::new("extra", "Nice to have", "a").optional())
        .task(Task::new("polish", "Depends on extra", "b").depends_on("extra").optional())
        .task(Task::new("core", "Required", "b"))
        .build()
        .unwrap();

    let report = orch.run(CancellationToken::new()).await.unwrap();

    assert!(report.success);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.outcome("extra").unwrap().status, TaskState::Rejected);
    assert_eq!(report.outcome("polish").unwrap().status, TaskState::Skipped);
    assert_eq!(report.outcome("core").unwrap().status, TaskState::Accepted);
}

#[tokio::test]
async fn test_task_timeout_rejects_and_skips_dependents() {
    let slow = Arc::new(SlowReasoner {
        delay: Duration::from_secs(30),
    });
    let orch = Orchestrator::builder()
        .agent(agent("slow", slow))
        .task(Task::new("A", "Slow", "slow"))
        .task(Task::new("B", "After", "slow").depends_on("A"))
        .settings(RunSettings {
            retry_bound: 0,
            task_timeout: Duration::from_millis(50),
            worker_concurrency: 1,
        })
        .build()
        .unwrap();

    let report = tokio::time::timeout(Duration::from_secs(5), orch.run(CancellationToken::new()))
        .await
        .expect("run must not hang")
        .unwrap();

    let a = report.outcome("A").unwrap();
    assert_eq!(a.status, TaskState::Rejected);
    assert!(a.qa_feedback.as_deref().unwrap().starts_with("Timed out"));
    assert_eq!(report.outcome("B").unwrap().status, TaskState::Skipped);
    assert_eq!(report.exit_code(), 2);
}

#[tokio::test]
async fn test_cancellation_rejects_in_flight_and_skips_rest() {
    let slow = Arc::new(SlowReasoner {
        delay: Duration::from_secs(30),
    });
    let orch = Orchestrator::builder()
        .agent(agent("slow", slow))
        .task(Task::new("A", "Slow", "slow"))
        .task(Task::new("B", "After", "slow").depends_on("A"))
        .task(Task::new("C", "Independent but queued", "slow"))
        .build()
        .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let report = tokio::time::timeout(Duration::from_secs(5), orch.run(cancel))
        .await
        .expect("run must not hang")
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.exit_code(), 2);
    let a = report.outcome("A").unwrap();
    assert_eq!(a.status, TaskState::Rejected);
    assert_eq!(a.qa_feedback.as_deref(), Some("cancelled"));
    assert_eq!(report.outcome("B").unwrap().status, TaskState::Skipped);
    assert_eq!(report.outcome("C").unwrap().status, TaskState::Skipped);
    assert!(report.events.iter().any(|r| matches!(r.event, RunEvent::Cancelled { .. })));
    assert!(!orch.is_running());
}

#[tokio::test]
async fn test_second_concurrent_run_is_refused() {
    let slow = Arc::new(SlowReasoner {
        delay: Duration::from_millis(50),
    });
    let orch = Orchestrator::builder()
        .agent(agent("slow", slow))
        .task(Task::new("A", "Slow", "slow"))
        .build()
        .unwrap();

    let (first, second) = tokio::join!(
        orch.run(CancellationToken::new()),
        orch.run(CancellationToken::new())
    );

    assert!(first.unwrap().success);
    assert!(matches!(second, Err(RunError::AlreadyRunning)));

    // Free again once the first run is done
    assert!(orch.run(CancellationToken::new()).await.is_ok());
}

#[tokio::test]
async fn test_workflow_file_runs_end_to_end() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[settings]
retry_bound = 1

[qa]
reviewer = "reviewer"

[[bridges]]
name = "research_store"

[[capabilities]]
name = "store_findings"
bridge = "research_store"
operation = "write_record"

[[capabilities]]
name = "read_findings"
bridge = "research_store"
operation = "read_record"

[[agents]]
id = "researcher"
role = "AI Research Specialist"
goal = "Gather market data"
capabilities = ["store_findings"]

[[agents]]
id = "analyst"
role = "Data Analysis Expert"
goal = "Find patterns"
capabilities = ["read_findings"]

[[agents]]
id = "reviewer"
role = "Quality Reviewer"
goal = "Check the analysis"

[[tasks]]
id = "research"
description = "Research the AI agent market and store the findings"
agent = "researcher"
required_capabilities = ["store_findings"]

[[tasks]]
id = "analysis"
description = "Analyze the stored findings"
agent = "analyst"
depends_on = ["research"]
required_capabilities = ["read_findings"]

[tasks.expected_output]
description = "JSON with trends"
required_keys = ["trends"]
review = true
"#
    )
    .unwrap();

    let store = Arc::new(ResearchDataStore::new());
    let server = Arc::new(McpServer::new(store.clone()));
    let reasoner = Arc::new(ScriptedReasoner::new(
        vec![
            Ok(Completion::calls(vec![ToolCall::new(
                "store_findings",
                serde_json::json!({"key": "ai_agents_market", "value": {"growth": "45% YoY"}}),
            )])),
            Ok(Completion::text("Findings stored under ai_agents_market")),
            Ok(Completion::calls(vec![ToolCall::new(
                "read_findings",
                serde_json::json!({"key": "ai_agents_market"}),
            )])),
            Ok(Completion::text(r#"{"trends": ["45% YoY growth"]}"#)),
            Ok(Completion::text("Solid analysis. APPROVED")),
        ],
        Err(ReasoningFailure::new("script exhausted")),
    ));

    let workflow = Workflow::load(file.path()).unwrap();
    let orch = workflow
        .build(reasoner.clone(), |_: &BridgeSpec| {
            Ok(server.clone() as Arc<dyn RpcTransport>)
        })
        .unwrap();

    let report = orch.run(CancellationToken::new()).await.unwrap();

    assert!(report.success, "{}", report.render());
    assert_eq!(store.keys(), vec!["ai_agents_market"]);
    assert_eq!(
        report.outcome("analysis").unwrap().payload.as_deref(),
        Some(r#"{"trends": ["45% YoY growth"]}"#)
    );
    // The analyst saw the stored record in its capability transcript
    assert!(reasoner.prompts()[3].contains("45% YoY"));
    assert_eq!(reasoner.calls(), 5);
}

#[test]
fn test_demo_workflow_builds() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/ai_agents_report.toml");
    let workflow = Workflow::load(&path).unwrap();
    let server = Arc::new(McpServer::new(Arc::new(ResearchDataStore::new())));

    let orch = workflow
        .build(Arc::new(ScriptedReasoner::answering("x")), |_: &BridgeSpec| {
            Ok(server.clone() as Arc<dyn RpcTransport>)
        })
        .unwrap();

    assert_eq!(
        orch.execution_order(),
        vec!["research", "analysis", "report", "press_blurb"]
    );
}
