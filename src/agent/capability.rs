//! Capabilities
//!
//! A capability is one bridge operation published to an agent under its own
//! name. Resolved once at configuration time; unknown operations are
//! configuration errors, never runtime lookups.

use serde_json::Value;
use std::sync::Arc;

use crate::bridge::{ToolBridge, ToolSchema};
use crate::error::{BridgeError, ConfigurationError};

/// A declared, invocable operation against the data server
#[derive(Clone)]
pub struct Capability {
    name: String,
    description: String,
    bridge: Arc<ToolBridge>,
    operation: String,
}

impl Capability {
    /// Bind `operation` on `bridge` under `name`
    pub fn new(
        name: &str,
        bridge: Arc<ToolBridge>,
        operation: &str,
    ) -> Result<Self, ConfigurationError> {
        let schema = bridge
            .operation(operation)
            .ok_or_else(|| ConfigurationError::UnknownOperation {
                bridge: bridge.name().to_string(),
                operation: operation.to_string(),
            })?;

        Ok(Self {
            name: name.to_string(),
            description: schema.description.clone(),
            bridge,
            operation: operation.to_string(),
        })
    }

    /// Override the description shown to the reasoning function
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bridge_name(&self) -> &str {
        self.bridge.name()
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Tool definition as the reasoning function sees it
    pub fn descriptor(&self) -> ToolSchema {
        let mut schema = self
            .bridge
            .operation(&self.operation)
            .cloned()
            .unwrap_or_else(|| ToolSchema::new(&self.operation, ""));
        schema.name = self.name.clone();
        schema.description = self.description.clone();
        schema
    }

    pub async fn invoke(&self, arguments: Value) -> Result<Value, BridgeError> {
        self.bridge.invoke(&self.operation, arguments).await
    }
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.name)
            .field("bridge", &self.bridge.name())
            .field("operation", &self.operation)
            .finish()
    }
}
