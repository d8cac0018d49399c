//! Configuration management

use anyhow::Result;
use std::fmt;
use std::net::SocketAddr;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Opaque bearer credential.
///
/// Attached per request and never printed: `Debug` and `Display` are redacted
/// and the secret is wiped on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Build from an optional value, treating empty strings as absent
    pub fn from_optional(secret: Option<String>) -> Option<Self> {
        secret.filter(|s| !s.trim().is_empty()).map(Self)
    }

    /// Raw secret, for attaching to a request header only
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Process configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the MCP data server
    pub mcp_url: String,

    /// Bearer token for the MCP data server (optional)
    pub mcp_api_key: Option<Credential>,

    /// Anthropic API key (required for live reasoning)
    pub anthropic_api_key: Option<Credential>,

    /// Default model (haiku, sonnet, opus)
    pub default_model: String,

    /// Bind address for `serve`
    pub bind_addr: SocketAddr,

    /// Request timeout for bridge and reasoning calls, in seconds
    pub http_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mcp_url = std::env::var("CREW_MCP_URL")
            .unwrap_or_else(|_| "http://localhost:8000".to_string());

        let mcp_api_key = Credential::from_optional(std::env::var("CREW_MCP_API_KEY").ok());
        let anthropic_api_key = Credential::from_optional(std::env::var("ANTHROPIC_API_KEY").ok());

        let default_model = std::env::var("CREW_MODEL").unwrap_or_else(|_| "sonnet".to_string());

        let bind_addr = std::env::var("CREW_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8000".to_string())
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid CREW_BIND_ADDR: {}", e))?;

        let http_timeout_secs = std::env::var("CREW_HTTP_TIMEOUT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        Ok(Self {
            mcp_url,
            mcp_api_key,
            anthropic_api_key,
            default_model,
            bind_addr,
            http_timeout_secs,
        })
    }
}
