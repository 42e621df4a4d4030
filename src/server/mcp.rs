//! JSON-RPC 2.0 over stdio, speaking the MCP tool protocol.
//!
//! One request per line on stdin, one response per line on stdout.
//! Notifications get no response.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};

use super::{handle_tool_call, SharedState};

#[cfg(test)]
#[path = "mcp_tests.rs"]
mod mcp_tests;

/// MCP protocol revision implemented by the server.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC 2.0 request.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    /// `None` for notifications.
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response. Exactly one of `result` and `error` is set.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    /// Always present; `null` when the request id was unknown.
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct Capabilities {
    pub tools: ToolCapabilities,
}

#[derive(Debug, Serialize)]
pub struct ToolCapabilities {
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

#[derive(Debug, Serialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: Capabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// Tool definition with its JSON Schema.
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Debug, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct ToolResultContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct ToolCallResult {
    pub content: Vec<ToolResultContent>,
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// MCP server running over stdio.
pub struct McpServer {
    state: SharedState,
}

impl McpServer {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Serve requests until stdin closes.
    pub async fn run(&self) -> std::io::Result<()> {
        info!("MCP cascade impact server starting...");

        let stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let mut reader = BufReader::new(stdin);
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;

            if bytes_read == 0 {
                info!("EOF received, shutting down");
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            debug!(request = %trimmed, "Received request");

            let response = match serde_json::from_str::<JsonRpcRequest>(trimmed) {
                Ok(request) => self.handle_request(request).await,
                Err(e) => {
                    error!(error = %e, "Failed to parse request");
                    Some(JsonRpcResponse::error(
                        None,
                        -32700,
                        format!("Parse error: {}", e),
                    ))
                }
            };

            if let Some(response) = response {
                let response_json = serde_json::to_string(&response)?;
                debug!(response = %response_json, "Sending response");
                stdout.write_all(response_json.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
        }

        Ok(())
    }

    /// Handle one request. Returns `None` for notifications.
    async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let is_notification = request.id.is_none();

        match request.method.as_str() {
            "initialize" => Some(self.handle_initialize(request.id)),
            "initialized" | "notifications/initialized" | "notifications/cancelled" => {
                debug!(method = %request.method, "Received notification");
                None
            }
            "tools/list" => Some(self.handle_tools_list(request.id)),
            "tools/call" => Some(self.handle_tool_call(request.id, request.params).await),
            "ping" => Some(JsonRpcResponse::success(
                request.id,
                Value::Object(Default::default()),
            )),
            method => {
                if is_notification {
                    debug!(method = %method, "Unknown notification, ignoring");
                    None
                } else {
                    error!(method = %method, "Unknown method");
                    Some(JsonRpcResponse::error(
                        request.id,
                        -32601,
                        format!("Method not found: {}", method),
                    ))
                }
            }
        }
    }

    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("Handling initialize request");

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: Capabilities {
                tools: ToolCapabilities {
                    list_changed: false,
                },
            },
            server_info: ServerInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        match serde_json::to_value(result) {
            Ok(val) => JsonRpcResponse::success(id, val),
            Err(e) => {
                error!(error = %e, "Failed to serialize initialize result");
                JsonRpcResponse::error(id, -32603, format!("Internal error: {}", e))
            }
        }
    }

    fn handle_tools_list(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("Handling tools/list request");
        JsonRpcResponse::success(id, json!({ "tools": tool_definitions() }))
    }

    async fn handle_tool_call(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params: ToolCallParams = match params {
            Some(p) => match serde_json::from_value(p) {
                Ok(p) => p,
                Err(e) => {
                    return JsonRpcResponse::error(id, -32602, format!("Invalid params: {}", e));
                }
            },
            None => {
                return JsonRpcResponse::error(id, -32602, "Missing params");
            }
        };

        info!(tool = %params.name, "Handling tool call");

        // Tool failures are reported in the result, not as protocol errors.
        let (content, is_error) =
            match handle_tool_call(&self.state, &params.name, params.arguments).await {
                Ok(result) => {
                    let text = serde_json::to_string_pretty(&result).unwrap_or_else(|e| {
                        error!(error = %e, "Failed to serialize tool result");
                        format!("{{\"error\": \"Serialization failed: {}\"}}", e)
                    });
                    (
                        ToolResultContent {
                            content_type: "text".to_string(),
                            text,
                        },
                        None,
                    )
                }
                Err(e) => (
                    ToolResultContent {
                        content_type: "text".to_string(),
                        text: format!("Error: {}", e),
                    },
                    Some(true),
                ),
            };

        let tool_result = ToolCallResult {
            content: vec![content],
            is_error,
        };

        match serde_json::to_value(tool_result) {
            Ok(val) => JsonRpcResponse::success(id, val),
            Err(e) => {
                error!(error = %e, "Failed to serialize tool call result");
                JsonRpcResponse::error(id, -32603, format!("Internal error: {}", e))
            }
        }
    }
}

// ============================================================================
// Tool definitions
// ============================================================================

const SERVICE_KINDS: [&str; 8] = [
    "api", "database", "queue", "cache", "auth", "frontend", "worker", "unknown",
];
const CRITICALITIES: [&str; 4] = ["low", "medium", "high", "critical"];
const DEPENDENCY_KINDS: [&str; 4] = ["synchronous", "asynchronous", "data", "shared_resource"];

fn service_id_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "service_id": {
                "type": "string",
                "description": description
            }
        },
        "required": ["service_id"],
        "additionalProperties": false
    })
}

/// Every tool the server exposes.
pub fn tool_definitions() -> Vec<Tool> {
    vec![
        get_analyze_impact_tool(),
        get_discover_dependencies_tool(),
        get_dependency_health_tool(),
        get_add_service_tool(),
        get_remove_service_tool(),
        get_add_dependency_tool(),
        get_update_health_tool(),
        get_graph_tool(),
        get_analysis_tool(),
    ]
}

fn get_analyze_impact_tool() -> Tool {
    Tool {
        name: "cascade_analyze_impact".to_string(),
        description: "Predict how a failure or degradation of a service cascades through its dependents: ranked propagation paths, blast radius tiers, business impact and mitigation strategies.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "service_id": {
                    "type": "string",
                    "description": "Service where the event happens"
                },
                "event_type": {
                    "type": "string",
                    "enum": ["failure", "degradation", "latency_spike", "capacity_exhaustion", "deployment"],
                    "description": "What happened (default: failure)"
                },
                "severity": {
                    "type": "string",
                    "enum": ["low", "medium", "high", "critical"],
                    "description": "Event severity (default: high)"
                }
            },
            "required": ["service_id"],
            "additionalProperties": false
        }),
    }
}

fn get_discover_dependencies_tool() -> Tool {
    Tool {
        name: "cascade_discover_dependencies".to_string(),
        description: "Query all configured evidence sources for a service's dependencies and store the edges they agree on.".to_string(),
        input_schema: service_id_schema("Service to discover dependencies for"),
    }
}

fn get_dependency_health_tool() -> Tool {
    Tool {
        name: "cascade_dependency_health".to_string(),
        description: "Report a service's health, the health of its upstream dependencies, critical path health and predictive insights.".to_string(),
        input_schema: service_id_schema("Service to report on"),
    }
}

fn get_add_service_tool() -> Tool {
    Tool {
        name: "cascade_add_service".to_string(),
        description: "Register a service or update its metadata.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "id": { "type": "string", "description": "Unique service id" },
                "name": { "type": "string", "description": "Display name (default: id)" },
                "kind": { "type": "string", "enum": SERVICE_KINDS },
                "criticality": { "type": "string", "enum": CRITICALITIES },
                "health": {
                    "type": "object",
                    "properties": {
                        "status": { "type": "string", "enum": ["healthy", "degraded", "unhealthy", "unknown"] },
                        "score": { "type": "number", "minimum": 0, "maximum": 1 }
                    },
                    "required": ["status", "score"]
                },
                "sla": {
                    "type": "object",
                    "properties": {
                        "availability": { "type": "number", "minimum": 0, "maximum": 1 },
                        "response_time_ms": { "type": "integer", "minimum": 0 },
                        "error_rate": { "type": "number", "minimum": 0, "maximum": 1 }
                    }
                },
                "deployment": {
                    "type": "object",
                    "properties": {
                        "version": { "type": "string" },
                        "environment": { "type": "string" },
                        "region": { "type": "string" },
                        "replicas": { "type": "integer", "minimum": 0 }
                    }
                },
                "business": {
                    "type": "object",
                    "properties": {
                        "revenue_per_minute": { "type": "number", "minimum": 0 },
                        "users": { "type": "integer", "minimum": 0 }
                    }
                }
            },
            "required": ["id"],
            "additionalProperties": false
        }),
    }
}

fn get_remove_service_tool() -> Tool {
    Tool {
        name: "cascade_remove_service".to_string(),
        description: "Remove a service and every dependency touching it.".to_string(),
        input_schema: service_id_schema("Service to remove"),
    }
}

fn get_add_dependency_tool() -> Tool {
    Tool {
        name: "cascade_add_dependency".to_string(),
        description: "Record that a failure of `from` propagates to `to`. Attributes not given default from the dependency kind.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "from": { "type": "string", "description": "Upstream service" },
                "to": { "type": "string", "description": "Dependent service" },
                "kind": { "type": "string", "enum": DEPENDENCY_KINDS },
                "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
                "criticality": { "type": "string", "enum": CRITICALITIES },
                "health_correlation": { "type": "number", "minimum": 0, "maximum": 1 },
                "failure_propagation_secs": { "type": "number", "minimum": 0 },
                "recovery_dependency": { "type": "boolean" },
                "sla_impact": { "type": "number", "minimum": 0, "maximum": 1 },
                "evidence": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["from", "to"],
            "additionalProperties": false
        }),
    }
}

fn get_update_health_tool() -> Tool {
    Tool {
        name: "cascade_update_health".to_string(),
        description: "Record a health reading for a service.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "service_id": { "type": "string" },
                "status": { "type": "string", "enum": ["healthy", "degraded", "unhealthy", "unknown"] },
                "score": { "type": "number", "minimum": 0, "maximum": 1 }
            },
            "required": ["service_id", "status", "score"],
            "additionalProperties": false
        }),
    }
}

fn get_graph_tool() -> Tool {
    Tool {
        name: "cascade_get_graph".to_string(),
        description: "Return the dependency graph with its layers, circular groups and critical path.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        }),
    }
}

fn get_analysis_tool() -> Tool {
    Tool {
        name: "cascade_get_analysis".to_string(),
        description: "Fetch a recent impact analysis by id.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "analysis_id": { "type": "string" }
            },
            "required": ["analysis_id"],
            "additionalProperties": false
        }),
    }
}
