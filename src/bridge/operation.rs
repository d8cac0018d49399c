//! Operation Schemas
//!
//! Each remote operation a bridge may call carries a JSON parameter schema.
//! Payloads are checked locally so malformed requests never reach the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BridgeError;

pub const READ_RECORD: &str = "read_record";
pub const WRITE_RECORD: &str = "write_record";
pub const LIST_RECORDS: &str = "list_records";
pub const RESEARCH_SUMMARY: &str = "research_summary";
pub const RECENT_RECORDS: &str = "recent_records";

/// Parameter types a schema can check
pub const PARAM_KINDS: &[&str] = &["string", "integer", "number", "boolean", "array", "object", "any"];

/// JSON Schema for operation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Operation name (snake_case)
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON Schema for parameters
    pub parameters: Value,
    /// Required parameter names
    pub required: Vec<String>,
}

impl ToolSchema {
    /// Create a new schema with no parameters
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {}
            }),
            required: vec![],
        }
    }

    /// Add a parameter of the given JSON type ("any" accepts every value)
    pub fn with_param(mut self, name: &str, kind: &str, description: &str, required: bool) -> Self {
        if let Some(props) = self.parameters.get_mut("properties") {
            props[name] = if kind == "any" {
                serde_json::json!({ "description": description })
            } else {
                serde_json::json!({ "type": kind, "description": description })
            };
        }
        if required {
            self.required.push(name.to_string());
        }
        self
    }

    pub fn with_string_param(self, name: &str, description: &str, required: bool) -> Self {
        self.with_param(name, "string", description, required)
    }

    pub fn with_int_param(self, name: &str, description: &str, required: bool) -> Self {
        self.with_param(name, "integer", description, required)
    }

    /// Validate a payload against the schema
    pub fn validate(&self, params: &Value) -> Result<(), BridgeError> {
        if !params.is_object() {
            return Err(BridgeError::Schema(format!(
                "Payload for '{}' must be a JSON object",
                self.name
            )));
        }

        for req in &self.required {
            if params.get(req).is_none() {
                return Err(BridgeError::Schema(format!(
                    "Missing required parameter '{}' for '{}'",
                    req, self.name
                )));
            }
        }

        if let Some(obj) = self.parameters.get("properties").and_then(|p| p.as_object()) {
            for (name, schema) in obj {
                if let Some(value) = params.get(name) {
                    let expected_type = schema.get("type").and_then(|t| t.as_str());
                    let valid = match expected_type {
                        Some("string") => value.is_string(),
                        Some("integer") => value.is_i64() || value.is_u64(),
                        Some("number") => value.is_number(),
                        Some("boolean") => value.is_boolean(),
                        Some("array") => value.is_array(),
                        Some("object") => value.is_object(),
                        _ => true,
                    };
                    if !valid {
                        return Err(BridgeError::Schema(format!(
                            "Parameter '{}' has wrong type, expected {}",
                            name,
                            expected_type.unwrap_or("unknown")
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// MCP `tools/list` entry
    pub fn to_mcp_format(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema()
        })
    }

    /// Claude tool-use definition
    pub fn to_claude_format(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "input_schema": self.input_schema()
        })
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": self.parameters.get("properties").cloned().unwrap_or(Value::Object(Default::default())),
            "required": self.required
        })
    }
}

/// The operation set a bridge speaks when none is configured
pub fn default_operations() -> Vec<ToolSchema> {
    vec![
        ToolSchema::new(READ_RECORD, "Retrieve a stored research record by key")
            .with_string_param("key", "Record key", true),
        ToolSchema::new(WRITE_RECORD, "Store a research record for other agents")
            .with_string_param("key", "Record key", true)
            .with_param("value", "any", "Record value (any JSON)", true),
        ToolSchema::new(LIST_RECORDS, "List all stored record keys"),
        ToolSchema::new(RESEARCH_SUMMARY, "Summarize the shared research store"),
        ToolSchema::new(RECENT_RECORDS, "Records stored within the last N minutes")
            .with_int_param("minutes", "Window in minutes (default 60)", false),
    ]
}
