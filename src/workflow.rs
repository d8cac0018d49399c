//! Workflow Files
//!
//! TOML description of bridges, capabilities, agents and tasks, turned into a
//! validated `Orchestrator`. Every name is resolved here; nothing is looked
//! up by name once the run starts.
//!
//! ```toml
//! process = "sequential"
//!
//! [settings]
//! retry_bound = 2
//! task_timeout_secs = 60
//! worker_concurrency = 1
//!
//! [[bridges]]
//! name = "research_store"
//!
//! [[capabilities]]
//! name = "store_findings"
//! bridge = "research_store"
//! operation = "write_record"
//!
//! [[agents]]
//! id = "researcher"
//! role = "AI Research Specialist"
//! goal = "Gather market data"
//! capabilities = ["store_findings"]
//!
//! [[tasks]]
//! id = "research"
//! description = "Research the AI agent market"
//! agent = "researcher"
//! required_capabilities = ["store_findings"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::agent::{Agent, Capability, ReasoningFn, DEFAULT_MAX_TOOL_ROUNDS};
use crate::bridge::operation::PARAM_KINDS;
use crate::bridge::{default_operations, HttpTransport, RpcTransport, ToolBridge, ToolSchema};
use crate::config::{Config, Credential};
use crate::error::ConfigurationError;
use crate::orchestrator::{Orchestrator, ProcessMode, RunSettings};
use crate::qa::{ExpectedOutput, QaGate};
use crate::recovery::RetryPolicy;
use crate::task::Task;

fn default_retry_bound() -> u32 {
    crate::agent::DEFAULT_RETRY_BOUND
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_concurrency() -> usize {
    1
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsSpec {
    #[serde(default = "default_retry_bound")]
    pub retry_bound: u32,
    #[serde(default = "default_timeout_secs")]
    pub task_timeout_secs: u64,
    #[serde(default = "default_concurrency")]
    pub worker_concurrency: usize,
}

impl Default for SettingsSpec {
    fn default() -> Self {
        Self {
            retry_bound: default_retry_bound(),
            task_timeout_secs: default_timeout_secs(),
            worker_concurrency: default_concurrency(),
        }
    }
}

impl SettingsSpec {
    pub fn to_settings(&self) -> RunSettings {
        RunSettings {
            retry_bound: self.retry_bound,
            task_timeout: Duration::from_secs(self.task_timeout_secs),
            worker_concurrency: self.worker_concurrency,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamSpec {
    pub name: String,
    /// JSON type name, or "any"
    #[serde(rename = "type", default = "ParamSpec::default_kind")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub required: bool,
}

impl ParamSpec {
    fn default_kind() -> String {
        "string".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperationSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
}

impl OperationSpec {
    fn to_schema(&self) -> Result<ToolSchema, ConfigurationError> {
        let mut schema = ToolSchema::new(&self.name, &self.description);
        for p in &self.params {
            if !PARAM_KINDS.contains(&p.kind.as_str()) {
                return Err(ConfigurationError::InvalidSetting(format!(
                    "parameter '{}' of operation '{}' has unknown type '{}'",
                    p.name, self.name, p.kind
                )));
            }
            schema = schema.with_param(&p.name, &p.kind, &p.description, p.required);
        }
        Ok(schema)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeSpec {
    pub name: String,
    /// Server base URL; falls back to `CREW_MCP_URL`
    #[serde(default)]
    pub url: Option<String>,
    /// Environment variable holding the bearer token
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Connection retries per call
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Replaces the default operation set when present
    #[serde(default)]
    pub operations: Vec<OperationSpec>,
}

impl BridgeSpec {
    pub fn operation_schemas(&self) -> Result<Vec<ToolSchema>, ConfigurationError> {
        if self.operations.is_empty() {
            Ok(default_operations())
        } else {
            self.operations.iter().map(|o| o.to_schema()).collect()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CapabilitySpec {
    pub name: String,
    pub bridge: String,
    pub operation: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentSpec {
    pub id: String,
    pub role: String,
    pub goal: String,
    #[serde(default)]
    pub backstory: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub max_tool_rounds: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskSpec {
    pub id: String,
    pub description: String,
    pub agent: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub expected_output: ExpectedOutput,
}

impl TaskSpec {
    fn to_task(&self) -> Task {
        Task {
            id: self.id.clone(),
            description: self.description.clone(),
            expected_output: self.expected_output.clone(),
            agent_id: self.agent.clone(),
            depends_on: self.depends_on.clone(),
            required_capabilities: self.required_capabilities.clone(),
            optional: self.optional,
            max_retries: self.max_retries,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QaSpec {
    /// Agent that judges contracts with `review = true`
    #[serde(default)]
    pub reviewer: Option<String>,
}

/// Parsed workflow file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Workflow {
    #[serde(default)]
    pub process: ProcessMode,
    #[serde(default)]
    pub settings: SettingsSpec,
    #[serde(default)]
    pub qa: QaSpec,
    #[serde(default)]
    pub bridges: Vec<BridgeSpec>,
    #[serde(default)]
    pub capabilities: Vec<CapabilitySpec>,
    #[serde(default)]
    pub agents: Vec<AgentSpec>,
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
}

impl Workflow {
    /// Parse a workflow from TOML text
    pub fn parse(text: &str) -> Result<Self, ConfigurationError> {
        toml::from_str(text).map_err(|e| ConfigurationError::Parse(e.to_string()))
    }

    /// Load and parse a workflow file
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::Parse(format!("{}: {}", path.display(), e)))?;
        let workflow = Self::parse(&text)?;
        info!(
            "Loaded workflow {} ({} agents, {} tasks)",
            path.display(),
            workflow.agents.len(),
            workflow.tasks.len()
        );
        Ok(workflow)
    }

    /// Resolve every name and validate the whole workflow.
    ///
    /// `transport` supplies the connection for each bridge; `reasoner` drives
    /// every agent.
    pub fn build<T>(
        &self,
        reasoner: Arc<dyn ReasoningFn>,
        transport: T,
    ) -> Result<Orchestrator, ConfigurationError>
    where
        T: Fn(&BridgeSpec) -> Result<Arc<dyn RpcTransport>, ConfigurationError>,
    {
        let settings = self.settings.to_settings();

        let mut bridges: HashMap<&str, Arc<ToolBridge>> = HashMap::new();
        for spec in &self.bridges {
            if bridges.contains_key(spec.name.as_str()) {
                return Err(ConfigurationError::Duplicate {
                    kind: "bridge",
                    id: spec.name.clone(),
                });
            }
            let mut bridge = ToolBridge::new(&spec.name, transport(spec)?)
                .with_operations(spec.operation_schemas()?);
            if let Some(retries) = spec.max_retries {
                bridge = bridge.with_retry(RetryPolicy {
                    max_retries: retries,
                    ..RetryPolicy::default()
                });
            }
            debug!("Bridge '{}' with {} operations", spec.name, bridge.operations().len());
            bridges.insert(spec.name.as_str(), Arc::new(bridge));
        }

        let mut capabilities: HashMap<&str, Capability> = HashMap::new();
        for spec in &self.capabilities {
            if capabilities.contains_key(spec.name.as_str()) {
                return Err(ConfigurationError::Duplicate {
                    kind: "capability",
                    id: spec.name.clone(),
                });
            }
            let bridge = bridges
                .get(spec.bridge.as_str())
                .ok_or_else(|| ConfigurationError::UnknownBridge(spec.bridge.clone()))?;
            let mut capability = Capability::new(&spec.name, Arc::clone(bridge), &spec.operation)?;
            if let Some(description) = &spec.description {
                capability = capability.with_description(description);
            }
            capabilities.insert(spec.name.as_str(), capability);
        }

        let mut agents: Vec<Arc<Agent>> = Vec::with_capacity(self.agents.len());
        let mut seen = HashSet::new();
        for spec in &self.agents {
            if !seen.insert(spec.id.as_str()) {
                return Err(ConfigurationError::Duplicate {
                    kind: "agent",
                    id: spec.id.clone(),
                });
            }
            let mut agent = Agent::new(&spec.id, &spec.role, &spec.goal, Arc::clone(&reasoner))
                .with_backstory(&spec.backstory)
                .with_retry_bound(settings.retry_bound)
                .with_max_tool_rounds(spec.max_tool_rounds.unwrap_or(DEFAULT_MAX_TOOL_ROUNDS));
            for name in &spec.capabilities {
                let capability = capabilities
                    .get(name.as_str())
                    .ok_or_else(|| ConfigurationError::UnknownCapability(name.clone()))?;
                agent = agent.with_capability(capability.clone());
            }
            agents.push(Arc::new(agent));
        }

        let mut qa = QaGate::new();
        if let Some(reviewer_id) = &self.qa.reviewer {
            let reviewer = agents
                .iter()
                .find(|a| &a.id == reviewer_id)
                .ok_or_else(|| ConfigurationError::UnknownAgent {
                    task: "qa".to_string(),
                    agent: reviewer_id.clone(),
                })?;
            qa = qa.with_reviewer(Arc::clone(reviewer));
        }

        let builder = agents.into_iter().fold(
            Orchestrator::builder()
                .mode(self.process)
                .settings(settings)
                .qa(qa),
            |b, agent| b.shared_agent(agent),
        );
        self.tasks
            .iter()
            .fold(builder, |b, spec| b.task(spec.to_task()))
            .build()
    }

    /// Build against HTTP bridges. Bridges without a URL use `CREW_MCP_URL`;
    /// bridges without `api_key_env` use `CREW_MCP_API_KEY`.
    pub fn build_http(
        &self,
        reasoner: Arc<dyn ReasoningFn>,
        config: &Config,
    ) -> Result<Orchestrator, ConfigurationError> {
        let timeout = Duration::from_secs(config.http_timeout_secs);
        self.build(reasoner, |spec| {
            let url = spec.url.as_deref().unwrap_or(&config.mcp_url);
            let credential = match &spec.api_key_env {
                Some(var) => Credential::from_optional(std::env::var(var).ok()),
                None => config.mcp_api_key.clone(),
            };
            let transport = HttpTransport::new(url, credential, timeout).map_err(|e| {
                ConfigurationError::InvalidSetting(format!("bridge '{}': {}", spec.name, e))
            })?;
            Ok(Arc::new(transport) as Arc<dyn RpcTransport>)
        })
    }
}
