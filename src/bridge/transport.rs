//! RPC Transport
//!
//! The request/response seam between a Tool Bridge and the data server.
//! `HttpTransport` talks to a remote server; the reference server implements
//! the trait directly for in-process use.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use crate::config::Credential;
use crate::error::BridgeError;
use crate::mcp::{error_codes, McpRequest, McpResponse};

/// One JSON-RPC exchange with the data server.
///
/// Implementations report transport failures only; JSON-RPC errors travel
/// inside the returned response.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn send(&self, request: McpRequest) -> Result<McpResponse, BridgeError>;
}

/// JSON-RPC over HTTP POST
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    credential: Option<Credential>,
}

impl HttpTransport {
    /// Create a transport posting to `{base_url}/mcp`
    pub fn new(base_url: &str, credential: Option<Credential>, timeout: Duration) -> Result<Self, BridgeError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::Connection(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/mcp", base_url.trim_end_matches('/')),
            credential,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("endpoint", &self.endpoint)
            .field("credential", &self.credential)
            .finish()
    }
}

/// Statuses that mean the server is temporarily unreachable
fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
    )
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn send(&self, request: McpRequest) -> Result<McpResponse, BridgeError> {
        debug!("→ {} {}", self.endpoint, request.method);

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(cred) = &self.credential {
            builder = builder.header(reqwest::header::AUTHORIZATION, cred.bearer());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| BridgeError::Connection(e.to_string()))?;

        let status = response.status();
        if is_transient_status(status) {
            return Err(BridgeError::Connection(format!("Server returned {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::Remote {
                code: status.as_u16() as i32,
                message: if body.is_empty() { status.to_string() } else { body },
            });
        }

        let parsed = response.json::<McpResponse>().await.map_err(|e| BridgeError::Remote {
            code: error_codes::PARSE_ERROR,
            message: format!("Invalid JSON-RPC response: {}", e),
        })?;

        debug!("← {} ok", self.endpoint);
        Ok(parsed)
    }
}
