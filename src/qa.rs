//! QA Gate
//!
//! Validates candidate results against a task's expected-output contract.
//! Declarative checks run first; an optional reviewer agent then judges the
//! candidate and ends its answer with a verdict token.
//!
//! Verdicts are memoized by SHA256(task id + contract + payload), so
//! reviewing the same candidate twice gives the same answer without a second
//! reasoning call.

use moka::future::Cache;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::agent::{Agent, DEFAULT_RETRY_BOUND};
use crate::error::{ConfigurationError, ReasoningFailure, TaskFailure};
use crate::task::{Context, Task, TaskResult};

const VERDICT_CACHE_CAPACITY: u64 = 1024;
const VERDICT_CACHE_TTL_SECS: u64 = 3600;

static RE_VERDICT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(NOT\s+)?(APPROVED_WITH_COMMENTS|APPROVED WITH COMMENTS|CHANGES_REQUESTED|CHANGES REQUESTED|APPROVED|BLOCKED)\b",
    )
    .unwrap()
});

/// Declarative expected-output contract
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpectedOutput {
    /// Free-text description shown to the executing agent
    pub description: String,
    /// Payload must be a JSON object
    pub json: bool,
    /// Keys the JSON object must carry (implies `json`)
    pub required_keys: Vec<String>,
    pub min_length: Option<usize>,
    pub must_contain: Vec<String>,
    /// Regex the payload must match
    pub pattern: Option<String>,
    /// Ask the reviewer agent for a verdict
    pub review: bool,
}

impl ExpectedOutput {
    pub fn described(description: &str) -> Self {
        Self {
            description: description.to_string(),
            ..Self::default()
        }
    }

    pub fn json_with_keys(mut self, keys: &[&str]) -> Self {
        self.json = true;
        self.required_keys = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn min_length(mut self, len: usize) -> Self {
        self.min_length = Some(len);
        self
    }

    pub fn containing(mut self, needle: &str) -> Self {
        self.must_contain.push(needle.to_string());
        self
    }

    pub fn matching(mut self, pattern: &str) -> Self {
        self.pattern = Some(pattern.to_string());
        self
    }

    pub fn reviewed(mut self) -> Self {
        self.review = true;
        self
    }

    /// Reject contracts that can never be evaluated
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if let Some(pattern) = &self.pattern {
            Regex::new(pattern).map_err(|e| {
                ConfigurationError::InvalidSetting(format!("invalid contract pattern '{}': {}", pattern, e))
            })?;
        }
        Ok(())
    }

    /// Run the declarative checks. All problems are reported together.
    pub fn check(&self, payload: &str) -> Result<(), String> {
        if payload.trim().is_empty() {
            return Err("Payload is empty".to_string());
        }

        let mut problems = Vec::new();

        if self.json || !self.required_keys.is_empty() {
            match serde_json::from_str::<serde_json::Value>(payload.trim()) {
                Ok(serde_json::Value::Object(map)) => {
                    let missing: Vec<&str> = self
                        .required_keys
                        .iter()
                        .filter(|k| !map.contains_key(k.as_str()))
                        .map(|k| k.as_str())
                        .collect();
                    if !missing.is_empty() {
                        problems.push(format!("Missing required keys: {}", missing.join(", ")));
                    }
                }
                Ok(_) => problems.push("Payload is not a JSON object".to_string()),
                Err(e) => problems.push(format!("Payload is not valid JSON: {}", e)),
            }
        }

        if let Some(min) = self.min_length {
            let len = payload.trim().chars().count();
            if len < min {
                problems.push(format!("Payload too short ({} < {} characters)", len, min));
            }
        }

        for needle in &self.must_contain {
            if !payload.contains(needle.as_str()) {
                problems.push(format!("Missing required text: '{}'", needle));
            }
        }

        if let Some(pattern) = &self.pattern {
            match Regex::new(pattern) {
                Ok(re) if !re.is_match(payload) => {
                    problems.push(format!("Payload does not match pattern '{}'", pattern))
                }
                Ok(_) => {}
                Err(e) => problems.push(format!("Invalid pattern '{}': {}", pattern, e)),
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }
}

/// Reviewer verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Approved,
    ApprovedWithComments,
    ChangesRequested,
    Blocked,
}

impl Verdict {
    pub fn is_approved(&self) -> bool {
        matches!(self, Verdict::Approved | Verdict::ApprovedWithComments)
    }

    /// The last whole-word verdict token in reviewer text. "NOT APPROVED"
    /// counts as changes requested.
    pub fn parse(response: &str) -> Option<Verdict> {
        let upper = response.to_uppercase();
        let caps = RE_VERDICT.captures_iter(&upper).last()?;
        let negated = caps.get(1).is_some();
        let verdict = match caps.get(2)?.as_str() {
            "CHANGES_REQUESTED" | "CHANGES REQUESTED" => Verdict::ChangesRequested,
            "BLOCKED" => Verdict::Blocked,
            "APPROVED_WITH_COMMENTS" | "APPROVED WITH COMMENTS" => Verdict::ApprovedWithComments,
            _ => Verdict::Approved,
        };
        if negated && verdict.is_approved() {
            return Some(Verdict::ChangesRequested);
        }
        Some(verdict)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct QaVerdict {
    accepted: bool,
    feedback: Option<String>,
    /// False when no verdict was reached (reviewer unavailable)
    settled: bool,
}

/// Validating gate applied to every candidate result
#[derive(Clone)]
pub struct QaGate {
    reviewer: Option<Arc<Agent>>,
    verdicts: Cache<String, QaVerdict>,
    run_retry_bound: u32,
}

impl Default for QaGate {
    fn default() -> Self {
        Self::new()
    }
}

impl QaGate {
    /// Gate with declarative checks only
    pub fn new() -> Self {
        let verdicts = Cache::builder()
            .max_capacity(VERDICT_CACHE_CAPACITY)
            .time_to_live(Duration::from_secs(VERDICT_CACHE_TTL_SECS))
            .build();
        Self {
            reviewer: None,
            verdicts,
            run_retry_bound: DEFAULT_RETRY_BOUND,
        }
    }

    /// Judge contracts with `review = true` through `reviewer`
    pub fn with_reviewer(mut self, reviewer: Arc<Agent>) -> Self {
        self.reviewer = Some(reviewer);
        self
    }

    pub fn reviewer(&self) -> Option<&Agent> {
        self.reviewer.as_deref()
    }

    /// Reasoning retries for a reviewer without its own bound
    pub(crate) fn set_run_retry_bound(&mut self, retry_bound: u32) {
        self.run_retry_bound = retry_bound;
    }

    /// Configuration check for one task's contract
    pub fn validate_contract(&self, task: &Task) -> Result<(), ConfigurationError> {
        task.expected_output.validate()?;
        if task.expected_output.review && self.reviewer.is_none() {
            return Err(ConfigurationError::InvalidSetting(format!(
                "task '{}' asks for review but no QA reviewer is configured",
                task.id
            )));
        }
        Ok(())
    }

    /// Cache key for (task id, contract, payload)
    pub fn compute_key(task: &Task, payload: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(task.id.as_bytes());
        hasher.update([0u8]);
        // Contract serializes from plain fields; fall back to Debug if it ever can't
        let contract = serde_json::to_string(&task.expected_output)
            .unwrap_or_else(|_| format!("{:?}", task.expected_output));
        hasher.update(contract.as_bytes());
        hasher.update([0u8]);
        hasher.update(payload.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Set `accepted` and `qa_feedback` on a candidate. Feedback is present
    /// iff the result is rejected.
    pub async fn review(&self, mut result: TaskResult, task: &Task) -> TaskResult {
        let payload = match &result.payload {
            Some(p) => p.clone(),
            None => {
                result.accepted = false;
                if result.qa_feedback.is_none() {
                    result.qa_feedback = Some("No candidate output produced".to_string());
                }
                return result;
            }
        };

        let key = Self::compute_key(task, &payload);
        let verdict = match self.verdicts.get(&key).await {
            Some(v) => {
                debug!("QA verdict cache hit for task '{}'", task.id);
                v
            }
            None => {
                let v = self.judge(task, &payload).await;
                if v.settled {
                    self.verdicts.insert(key, v.clone()).await;
                }
                v
            }
        };

        info!(
            "QA {} task '{}'",
            if verdict.accepted { "accepted" } else { "rejected" },
            task.id
        );
        result.accepted = verdict.accepted;
        result.qa_feedback = verdict.feedback;
        result
    }

    async fn judge(&self, task: &Task, payload: &str) -> QaVerdict {
        if let Err(problems) = task.expected_output.check(payload) {
            return QaVerdict {
                accepted: false,
                feedback: Some(TaskFailure::QaRejected(problems).to_string()),
                settled: true,
            };
        }

        if !task.expected_output.review {
            return QaVerdict {
                accepted: true,
                feedback: None,
                settled: true,
            };
        }

        let reviewer = match &self.reviewer {
            Some(r) => r,
            None => {
                return QaVerdict {
                    accepted: false,
                    feedback: Some("Review requested but no QA reviewer is configured".to_string()),
                    settled: false,
                }
            }
        };

        let review_task = Self::review_task(task, payload, &reviewer.id);
        let outcome = reviewer
            .execute_under(&review_task, &Context::new(), self.run_retry_bound, |text| {
                Verdict::parse(text).map(|_| ()).ok_or_else(|| {
                    ReasoningFailure::new(
                        "Review must end with APPROVED, APPROVED_WITH_COMMENTS, CHANGES_REQUESTED or BLOCKED",
                    )
                })
            })
            .await;

        match outcome.payload {
            Some(text) => match Verdict::parse(&text) {
                Some(v) if v.is_approved() => QaVerdict {
                    accepted: true,
                    feedback: None,
                    settled: true,
                },
                _ => QaVerdict {
                    accepted: false,
                    feedback: Some(TaskFailure::QaRejected(text.trim().to_string()).to_string()),
                    settled: true,
                },
            },
            None => QaVerdict {
                accepted: false,
                feedback: Some(format!(
                    "QA reviewer failed: {}",
                    outcome.qa_feedback.unwrap_or_default()
                )),
                settled: false,
            },
        }
    }

    fn review_task(task: &Task, payload: &str, reviewer_id: &str) -> Task {
        let description = format!(
            r#"Review the output of task '{}'.

## Original Task

{}

## Expected Output

{}

## Candidate Output

{}

## Verdict Options

End your review with exactly ONE of:
- APPROVED - Meets the expected output
- APPROVED_WITH_COMMENTS - Acceptable, minor issues noted
- CHANGES_REQUESTED - Must be revised (list the changes)
- BLOCKED - Fundamentally wrong"#,
            task.id,
            task.description.trim(),
            if task.expected_output.description.is_empty() {
                "(not specified)"
            } else {
                &task.expected_output.description
            },
            payload
        );
        Task::new(&format!("{}::qa", task.id), &description, reviewer_id)
    }
}

impl std::fmt::Debug for QaGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QaGate")
            .field("reviewer", &self.reviewer.as_ref().map(|r| r.id.clone()))
            .field("cached_verdicts", &self.verdicts.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::reasoning::{Completion, ScriptedReasoner};

    fn candidate(task: &Task, payload: &str) -> TaskResult {
        TaskResult::candidate(&task.id, &task.agent_id, payload.to_string(), 1)
    }

    #[test]
    fn test_parse_verdict() {
        assert_eq!(Verdict::parse("APPROVED"), Some(Verdict::Approved));
        assert_eq!(
            Verdict::parse("APPROVED_WITH_COMMENTS - minor nits"),
            Some(Verdict::ApprovedWithComments)
        );
        assert_eq!(
            Verdict::parse("CHANGES_REQUESTED: cite the sources"),
            Some(Verdict::ChangesRequested)
        );
        assert_eq!(Verdict::parse("This is BLOCKED"), Some(Verdict::Blocked));
        assert_eq!(Verdict::parse("Looks fine to me"), None);
    }

    #[test]
    fn test_parse_verdict_whole_words_last_wins() {
        assert_eq!(Verdict::parse("DISAPPROVED"), None);
        assert_eq!(Verdict::parse("Not approved yet"), Some(Verdict::ChangesRequested));
        assert_eq!(
            Verdict::parse("Was BLOCKED on sources, fixed now. APPROVED"),
            Some(Verdict::Approved)
        );
        assert_eq!(
            Verdict::parse("APPROVED? No. CHANGES_REQUESTED"),
            Some(Verdict::ChangesRequested)
        );
    }

    #[test]
    fn test_contract_checks() {
        let contract = ExpectedOutput::described("summary")
            .json_with_keys(&["findings", "sources"])
            .min_length(10);

        assert!(contract.check(r#"{"findings": [], "sources": []}"#).is_ok());

        let err = contract.check(r#"{"findings": []}"#).unwrap_err();
        assert!(err.contains("sources"));

        let err = contract.check("not json").unwrap_err();
        assert!(err.contains("not valid JSON"));
    }

    #[test]
    fn test_empty_payload_always_rejected() {
        let err = ExpectedOutput::default().check("   ").unwrap_err();
        assert_eq!(err, "Payload is empty");
    }

    #[test]
    fn test_problems_are_joined() {
        let contract = ExpectedOutput::default().containing("Summary").matching(r"\d+%");
        let err = contract.check("no numbers here").unwrap_err();
        assert!(err.contains("Summary"));
        assert!(err.contains("; "));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let contract = ExpectedOutput::default().matching("([");
        assert!(matches!(
            contract.validate(),
            Err(ConfigurationError::InvalidSetting(_))
        ));
    }

    #[test]
    fn test_review_without_reviewer_is_config_error() {
        let gate = QaGate::new();
        let task = Task::new("t", "T", "a").with_contract(ExpectedOutput::default().reviewed());
        assert!(gate.validate_contract(&task).is_err());
    }

    #[tokio::test]
    async fn test_feedback_iff_rejected() {
        let gate = QaGate::new();
        let task = Task::new("t", "T", "a").with_contract(ExpectedOutput::default().containing("Summary"));

        let ok = gate.review(candidate(&task, "Summary: fine"), &task).await;
        assert!(ok.accepted);
        assert!(ok.qa_feedback.is_none());

        let bad = gate.review(candidate(&task, "nothing"), &task).await;
        assert!(!bad.accepted);
        assert!(bad.qa_feedback.unwrap().contains("Summary"));
    }

    #[tokio::test]
    async fn test_failed_result_stays_rejected() {
        let gate = QaGate::new();
        let task = Task::new("t", "T", "a");
        let failed = TaskResult::failed("t", "a", "boom".into(), 3);

        let reviewed = gate.review(failed, &task).await;
        assert!(!reviewed.accepted);
        assert_eq!(reviewed.qa_feedback.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_reviewer_verdicts() {
        let reasoner = Arc::new(ScriptedReasoner::new(
            vec![Ok(Completion::text("CHANGES_REQUESTED: add market size"))],
            Ok(Completion::text("Good work. APPROVED")),
        ));
        let reviewer = Arc::new(Agent::new("reviewer", "Quality Reviewer", "Review", reasoner));
        let gate = QaGate::new().with_reviewer(reviewer);
        let task = Task::new("report", "Write report", "writer")
            .with_contract(ExpectedOutput::described("Report").reviewed());

        let first = gate.review(candidate(&task, "draft"), &task).await;
        assert!(!first.accepted);
        assert!(first.qa_feedback.unwrap().contains("add market size"));

        let second = gate.review(candidate(&task, "revised draft"), &task).await;
        assert!(second.accepted);
    }

    #[tokio::test]
    async fn test_reviewer_without_verdict_is_retried() {
        let reasoner = Arc::new(ScriptedReasoner::new(
            vec![Ok(Completion::text("Hmm, interesting."))],
            Ok(Completion::text("APPROVED")),
        ));
        let reviewer = Arc::new(Agent::new("reviewer", "Reviewer", "Review", reasoner.clone()));
        let gate = QaGate::new().with_reviewer(reviewer);
        let task = Task::new("t", "T", "a").with_contract(ExpectedOutput::default().reviewed());

        let result = gate.review(candidate(&task, "text"), &task).await;
        assert!(result.accepted);
        assert_eq!(reasoner.calls(), 2);
    }

    #[tokio::test]
    async fn test_reviewer_outage_is_not_cached() {
        let reasoner = Arc::new(ScriptedReasoner::new(
            vec![
                Err(ReasoningFailure::new("api 529")),
                Err(ReasoningFailure::new("api 529")),
                Err(ReasoningFailure::new("api 529")),
            ],
            Ok(Completion::text("APPROVED")),
        ));
        let reviewer = Arc::new(Agent::new("reviewer", "Reviewer", "Review", reasoner.clone()));
        let gate = QaGate::new().with_reviewer(reviewer);
        let task = Task::new("t", "T", "a").with_contract(ExpectedOutput::default().reviewed());

        let first = gate.review(candidate(&task, "final"), &task).await;
        assert!(!first.accepted);
        assert!(first.qa_feedback.unwrap().starts_with("QA reviewer failed"));
        assert_eq!(reasoner.calls(), 3);

        let second = gate.review(candidate(&task, "final"), &task).await;
        assert!(second.accepted);
        assert_eq!(reasoner.calls(), 4);
    }

    #[tokio::test]
    async fn test_review_is_idempotent() {
        let reasoner = Arc::new(ScriptedReasoner::new(
            vec![Ok(Completion::text("APPROVED"))],
            Ok(Completion::text("BLOCKED")),
        ));
        let reviewer = Arc::new(Agent::new("reviewer", "Reviewer", "Review", reasoner.clone()));
        let gate = QaGate::new().with_reviewer(reviewer);
        let task = Task::new("t", "T", "a").with_contract(ExpectedOutput::default().reviewed());

        let first = gate.review(candidate(&task, "final"), &task).await;
        let again = gate.review(first.clone(), &task).await;

        assert!(first.accepted);
        assert_eq!(first, again);
        assert_eq!(reasoner.calls(), 1);
    }

    #[test]
    fn test_key_depends_on_all_inputs() {
        let task = Task::new("t", "T", "a");
        let other = Task::new("u", "T", "a");
        let k = QaGate::compute_key(&task, "x");
        assert_eq!(k.len(), 64);
        assert_eq!(k, QaGate::compute_key(&task, "x"));
        assert_ne!(k, QaGate::compute_key(&task, "y"));
        assert_ne!(k, QaGate::compute_key(&other, "x"));
    }
}
