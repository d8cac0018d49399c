//! Reference MCP Data Server
//!
//! Serves the research data store over JSON-RPC 2.0, either line-delimited on
//! stdio or as HTTP POST `/mcp`. Also usable in-process as an `RpcTransport`.

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::bridge::operation::{
    default_operations, LIST_RECORDS, READ_RECORD, RECENT_RECORDS, RESEARCH_SUMMARY, WRITE_RECORD,
};
use crate::bridge::transport::RpcTransport;
use crate::config::Credential;
use crate::error::BridgeError;
use crate::mcp::{error_codes, McpRequest, McpResponse, PROTOCOL_VERSION};
use crate::store::ResearchDataStore;

/// MCP server backed by a research data store
pub struct McpServer {
    store: Arc<ResearchDataStore>,
    api_key: Option<Credential>,
}

impl McpServer {
    pub fn new(store: Arc<ResearchDataStore>) -> Self {
        Self { store, api_key: None }
    }

    /// Require a bearer token on HTTP requests
    pub fn with_api_key(mut self, api_key: Option<Credential>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn store(&self) -> &Arc<ResearchDataStore> {
        &self.store
    }

    /// Run the MCP server (stdio mode)
    pub async fn run_stdio(&self) -> anyhow::Result<()> {
        let stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let mut reader = BufReader::new(stdin);
        let mut line = String::new();

        info!("MCP data server ready on stdio");

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;

            if bytes_read == 0 {
                info!("Client disconnected (EOF)");
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            debug!("← {}", trimmed);

            let response = match serde_json::from_str::<McpRequest>(trimmed) {
                Ok(request) => self.handle_request(request).await,
                Err(e) => {
                    error!("Parse error: {}", e);
                    McpResponse::error(None, error_codes::PARSE_ERROR, format!("Parse error: {}", e))
                }
            };

            if response.is_notification() {
                continue;
            }

            let response_json = serde_json::to_string(&response)?;
            debug!("→ {}", response_json);

            stdout.write_all(response_json.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }

        Ok(())
    }

    /// HTTP router: `POST /mcp` for JSON-RPC, `GET /health` for probes
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/mcp", post(rpc_handler))
            .route("/health", get(health_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self)
    }

    /// Serve HTTP until Ctrl-C
    pub async fn serve(self: Arc<Self>, addr: SocketAddr) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("MCP data server listening on http://{}", listener.local_addr()?);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("Failed to listen for shutdown signal: {}", e);
                }
                info!("Shutdown signal received");
            })
            .await?;

        Ok(())
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        match &self.api_key {
            None => true,
            Some(key) => headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(|v| v == key.bearer())
                .unwrap_or(false),
        }
    }

    /// Handle a single MCP request
    pub async fn handle_request(&self, request: McpRequest) -> McpResponse {
        if request.jsonrpc != crate::mcp::JSONRPC_VERSION {
            return McpResponse::error(
                request.id,
                error_codes::INVALID_REQUEST,
                "Unsupported jsonrpc version",
            );
        }

        match request.method.as_str() {
            // Lifecycle
            "initialize" => self.handle_initialize(request.id),
            "initialized" | "notifications/initialized" => McpResponse::notification(),
            "shutdown" => {
                info!("Shutdown requested");
                McpResponse::success(request.id, serde_json::json!({}))
            }

            // Tools
            "tools/list" => self.handle_tools_list(request.id),
            "tools/call" => self.handle_tools_call(request.id, request.params),

            "ping" => McpResponse::success(request.id, serde_json::json!({})),

            method => {
                warn!("Unknown method: {}", method);
                McpResponse::error(
                    request.id,
                    error_codes::METHOD_NOT_FOUND,
                    format!("Method not found: {}", method),
                )
            }
        }
    }

    fn handle_initialize(&self, id: Option<Value>) -> McpResponse {
        McpResponse::success(
            id,
            serde_json::json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {
                        "listChanged": false
                    }
                },
                "serverInfo": {
                    "name": "crew-mcp-store",
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        )
    }

    fn handle_tools_list(&self, id: Option<Value>) -> McpResponse {
        let tools: Vec<Value> = default_operations().iter().map(|s| s.to_mcp_format()).collect();
        McpResponse::success(id, serde_json::json!({ "tools": tools }))
    }

    fn handle_tools_call(&self, id: Option<Value>, params: Value) -> McpResponse {
        let name = match params.get("name").and_then(|v| v.as_str()) {
            Some(n) => n,
            None => {
                return McpResponse::error(id, error_codes::INVALID_PARAMS, "Missing 'name' parameter")
            }
        };

        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or(serde_json::json!({}));

        let schema = match default_operations().into_iter().find(|s| s.name == name) {
            Some(s) => s,
            None => {
                return McpResponse::error(
                    id,
                    error_codes::TOOL_NOT_FOUND,
                    format!("Tool not found: {}", name),
                )
            }
        };
        if let Err(e) = schema.validate(&arguments) {
            return McpResponse::error(id, error_codes::INVALID_PARAMS, e.to_string());
        }

        match self.call_tool(name, &arguments) {
            Ok(text) => McpResponse::tool_text(id, text),
            Err((code, message)) => McpResponse::error(id, code, message),
        }
    }

    fn call_tool(&self, name: &str, args: &Value) -> Result<String, (i32, String)> {
        let key = args.get("key").and_then(|v| v.as_str()).unwrap_or_default();

        match name {
            WRITE_RECORD => {
                let value = args.get("value").cloned().unwrap_or(Value::Null);
                self.store.store(key, value);
                info!("Stored record '{}'", key);
                Ok(format!("Data stored successfully with key: {}", key))
            }
            // A missing key is an answer, not a failure
            READ_RECORD => match self.store.retrieve(key) {
                Some(record) => Ok(record.value.to_string()),
                None => Ok(format!("No data found for key: {}", key)),
            },
            LIST_RECORDS => Ok(Value::from(self.store.keys()).to_string()),
            RESEARCH_SUMMARY => Ok(self.store.summary().format()),
            RECENT_RECORDS => {
                let minutes = args.get("minutes").and_then(|v| v.as_i64()).unwrap_or(60);
                let recent: serde_json::Map<String, Value> = self
                    .store
                    .recent(minutes)
                    .into_iter()
                    .map(|r| (r.key, r.value))
                    .collect();
                Ok(Value::Object(recent).to_string())
            }
            other => Err((error_codes::TOOL_NOT_FOUND, format!("Tool not found: {}", other))),
        }
    }
}

#[async_trait]
impl RpcTransport for McpServer {
    async fn send(&self, request: McpRequest) -> Result<McpResponse, BridgeError> {
        Ok(self.handle_request(request).await)
    }
}

async fn rpc_handler(State(server): State<Arc<McpServer>>, headers: HeaderMap, body: Bytes) -> Response {
    if !server.authorized(&headers) {
        warn!("Rejected unauthorized MCP request");
        return (
            StatusCode::UNAUTHORIZED,
            Json(McpResponse::error(None, error_codes::UNAUTHORIZED, "Unauthorized")),
        )
            .into_response();
    }

    let response = match serde_json::from_slice::<McpRequest>(&body) {
        Ok(request) => server.handle_request(request).await,
        Err(e) => McpResponse::error(None, error_codes::PARSE_ERROR, format!("Parse error: {}", e)),
    };

    if response.is_notification() {
        return StatusCode::ACCEPTED.into_response();
    }

    Json(response).into_response()
}

async fn health_handler(State(server): State<Arc<McpServer>>) -> Json<Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "records": server.store.len()
    }))
}
