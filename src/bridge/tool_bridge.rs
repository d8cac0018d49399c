//! Tool Bridge
//!
//! Wraps a remote data server as a set of named operations. Calls through
//! one bridge instance are serialized; connection failures are retried with
//! backoff, remote and schema failures are not.

use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::operation::{default_operations, ToolSchema};
use super::transport::RpcTransport;
use crate::error::BridgeError;
use crate::mcp::{tool_result_payload, McpRequest};
use crate::recovery::RetryPolicy;

/// A named connection to one data server
pub struct ToolBridge {
    name: String,
    transport: Arc<dyn RpcTransport>,
    operations: Vec<ToolSchema>,
    retry: RetryPolicy,
    in_flight: Mutex<()>,
    next_id: AtomicU64,
}

impl ToolBridge {
    /// Create a bridge speaking the default operation set
    pub fn new(name: &str, transport: Arc<dyn RpcTransport>) -> Self {
        Self {
            name: name.to_string(),
            transport,
            operations: default_operations(),
            retry: RetryPolicy::default(),
            in_flight: Mutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Replace the operation set
    pub fn with_operations(mut self, operations: Vec<ToolSchema>) -> Self {
        self.operations = operations;
        self
    }

    /// Set the connection retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn operation(&self, name: &str) -> Option<&ToolSchema> {
        self.operations.iter().find(|op| op.name == name)
    }

    pub fn operations(&self) -> &[ToolSchema] {
        &self.operations
    }

    /// Invoke a remote operation.
    ///
    /// The payload is validated before the in-flight lock is taken, so schema
    /// errors never touch the transport.
    pub async fn invoke(&self, operation: &str, payload: Value) -> Result<Value, BridgeError> {
        let schema = self.operation(operation).ok_or_else(|| {
            BridgeError::Schema(format!("Unknown operation '{}' on bridge '{}'", operation, self.name))
        })?;
        schema.validate(&payload)?;

        let _guard = self.in_flight.lock().await;

        let mut attempt = 0;
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let request = McpRequest::tools_call(id, operation, payload.clone());

            match self.transport.send(request).await {
                Ok(response) => {
                    if let Some(err) = response.error {
                        return Err(BridgeError::Remote {
                            code: err.code,
                            message: err.message,
                        });
                    }

                    let result = response.result.unwrap_or(Value::Null);
                    if result.get("isError").and_then(|v| v.as_bool()) == Some(true) {
                        return Err(BridgeError::Remote {
                            code: crate::mcp::error_codes::TOOL_EXECUTION_ERROR,
                            message: tool_result_payload(&result).to_string(),
                        });
                    }

                    debug!("Bridge '{}' {} ok (attempt {})", self.name, operation, attempt + 1);
                    return Ok(tool_result_payload(&result));
                }
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        "Bridge '{}' {} retry {} after {:?} ({})",
                        self.name,
                        operation,
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl std::fmt::Debug for ToolBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolBridge")
            .field("name", &self.name)
            .field(
                "operations",
                &self.operations.iter().map(|o| o.name.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
