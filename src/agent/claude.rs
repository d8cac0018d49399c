//! Claude Reasoner
//!
//! Reasoning function backed by the Anthropic Messages API with native tool
//! use. Agent capabilities are sent as tool definitions; `tool_use` blocks
//! come back as tool calls.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use super::reasoning::{Completion, ReasoningFn, ToolCall};
use crate::bridge::ToolSchema;
use crate::config::Credential;
use crate::error::ReasoningFailure;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Message in conversation
#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

/// API request
#[derive(Debug, Serialize)]
struct MessageRequest {
    model: String,
    max_tokens: usize,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
}

/// API response
#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    r#type: String,
    text: Option<String>,
    id: Option<String>,
    name: Option<String>,
    input: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: usize,
    output_tokens: usize,
}

/// Claude API reasoner
#[derive(Clone)]
pub struct ClaudeReasoner {
    client: Client,
    api_key: Credential,
    model: String,
    max_tokens: usize,
}

impl ClaudeReasoner {
    pub fn new(api_key: Credential, model: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_key,
            model: model.to_string(),
            max_tokens: 4096,
        }
    }

    /// Create from config; `None` when no API key is configured
    pub fn from_config(config: &crate::config::Config) -> Option<Self> {
        config.anthropic_api_key.clone().map(|key| {
            Self::new(
                key,
                &config.default_model,
                Duration::from_secs(config.http_timeout_secs),
            )
        })
    }

    /// Get model ID from hint
    fn model_id(model: &str) -> &str {
        match model.to_lowercase().as_str() {
            "haiku" => "claude-3-5-haiku-20241022",
            "opus" => "claude-3-opus-20240229",
            "sonnet" => "claude-sonnet-4-20250514",
            _ => model,
        }
    }

    fn parse_response(response: MessageResponse) -> Result<Completion, ReasoningFailure> {
        let mut text = Vec::new();
        let mut tool_calls = Vec::new();

        for block in response.content {
            match block.r#type.as_str() {
                "text" => {
                    if let Some(t) = block.text {
                        text.push(t);
                    }
                }
                "tool_use" => {
                    let name = block
                        .name
                        .ok_or_else(|| ReasoningFailure::new("tool_use block without a name"))?;
                    tool_calls.push(ToolCall {
                        id: block.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                        name,
                        arguments: block.input.unwrap_or_else(|| serde_json::json!({})),
                    });
                }
                _ => {}
            }
        }

        if text.is_empty() && tool_calls.is_empty() {
            return Err(ReasoningFailure::new("Model returned no text and no tool calls"));
        }

        Ok(Completion {
            text: text.join("\n"),
            tool_calls,
        })
    }
}

impl std::fmt::Debug for ClaudeReasoner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeReasoner")
            .field("model", &self.model)
            .field("api_key", &self.api_key)
            .finish()
    }
}

#[async_trait]
impl ReasoningFn for ClaudeReasoner {
    async fn complete(&self, prompt: &str, tools: &[ToolSchema]) -> Result<Completion, ReasoningFailure> {
        let model_id = Self::model_id(&self.model);

        let request = MessageRequest {
            model: model_id.to_string(),
            max_tokens: self.max_tokens,
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            tools: tools.iter().map(|t| t.to_claude_format()).collect(),
        };

        debug!("Calling Claude API: model={}, prompt_len={}, tools={}", model_id, prompt.len(), tools.len());

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", self.api_key.expose())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| ReasoningFailure::new(format!("Claude API request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ReasoningFailure::new(format!("Claude API error {}: {}", status, text)));
        }

        let result: MessageResponse = response
            .json()
            .await
            .map_err(|e| ReasoningFailure::new(format!("Unreadable Claude response: {}", e)))?;

        info!(
            "Claude response: model={}, in={}, out={}",
            model_id, result.usage.input_tokens, result.usage.output_tokens
        );

        Self::parse_response(result)
    }
}
