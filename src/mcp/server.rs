//! The MCP protocol engine.
//!
//! One [`McpServer`] exists per protocol session: the stdio transport owns
//! exactly one, the HTTP session manager one per `Mcp-Session-Id`. Engines
//! never share protocol state; they share only the [`ToolContext`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde_json::{json, Value};

use crate::auth::TenantContext;
use crate::logging::{ClientLogger, LogLevel};

use super::tools::{get_tool_definitions, handle_tool_call, is_known_tool, CallScope, ToolContext};
use super::transport::{
    expects_no_response, ErrorCode, JsonRpcRequest, JsonRpcResponse, NotificationSink,
};

/// Protocol revisions this server can speak, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

const GRAPH_LIST_URI: &str = "graph://list";

/// Runtime statistics for one session.
pub struct ServerStats {
    started_at: Instant,
    total_requests: AtomicU64,
    tool_calls: AtomicU64,
    errors: AtomicU64,
}

impl ServerStats {
    fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_requests: AtomicU64::new(0),
            tool_calls: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }
}

#[derive(Debug, Default)]
struct Handshake {
    initialized: bool,
    protocol_version: Option<String>,
    client_name: Option<String>,
}

/// The MCP engine bound to one session.
pub struct McpServer {
    ctx: Arc<ToolContext>,
    logger: ClientLogger,
    handshake: Mutex<Handshake>,
    closed: AtomicBool,
    stats: ServerStats,
    tool_call_counts: Mutex<HashMap<String, u64>>,
}

impl McpServer {
    /// Creates an engine whose notifications go to `sink`.
    pub fn new(ctx: Arc<ToolContext>, sink: NotificationSink) -> Self {
        Self {
            ctx,
            logger: ClientLogger::new(sink),
            handshake: Mutex::new(Handshake::default()),
            closed: AtomicBool::new(false),
            stats: ServerStats::new(),
            tool_call_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` once an `initialize` request has succeeded.
    pub fn is_initialized(&self) -> bool {
        self.handshake.lock().map(|h| h.initialized).unwrap_or(false)
    }

    /// The protocol revision agreed during the handshake.
    pub fn protocol_version(&self) -> Option<String> {
        self.handshake
            .lock()
            .ok()
            .and_then(|h| h.protocol_version.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Protocol-level close. Idempotent; later messages are refused.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(
                requests = self.stats.total_requests.load(Ordering::Relaxed),
                "protocol engine closed"
            );
        }
    }

    /// Handles one decoded JSON-RPC message.
    ///
    /// Returns `None` for notifications and for client responses.
    pub async fn handle_message(
        &self,
        message: Value,
        tenant: &TenantContext,
    ) -> Option<JsonRpcResponse> {
        let no_response = expects_no_response(&message);

        let request: JsonRpcRequest = match serde_json::from_value(message) {
            Ok(request) => request,
            Err(e) if no_response => {
                tracing::debug!(error = %e, "ignoring malformed client message");
                return None;
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                return Some(JsonRpcResponse::error(
                    Value::Null,
                    ErrorCode::InvalidRequest,
                    format!("invalid JSON-RPC request: {}", e),
                ));
            }
        };

        if no_response {
            self.handle_notification(&request);
            return None;
        }

        let response = self.handle_request(request, tenant).await;
        if !response.is_success() {
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
        }
        Some(response)
    }

    fn handle_notification(&self, request: &JsonRpcRequest) {
        match request.method.as_str() {
            "notifications/initialized" | "initialized" => {
                tracing::debug!("client finished initialization");
            }
            "notifications/cancelled" => {
                tracing::debug!(params = ?request.params, "client cancelled a request");
            }
            other => tracing::debug!(method = other, "ignoring notification"),
        }
    }

    /// Dispatches a parsed JSON-RPC request to the appropriate handler.
    async fn handle_request(&self, request: JsonRpcRequest, tenant: &TenantContext) -> JsonRpcResponse {
        self.stats.total_requests.fetch_add(1, Ordering::Relaxed);
        let id = request.id.clone();

        if self.is_closed() {
            return JsonRpcResponse::error(id, ErrorCode::InvalidRequest, "session is closed".into());
        }

        match request.method.as_str() {
            "initialize" => return self.handle_initialize(id, &request.params),
            "ping" => return JsonRpcResponse::success(id, json!({})),
            _ => {}
        }

        if !self.is_initialized() {
            return JsonRpcResponse::error(
                id,
                ErrorCode::InvalidRequest,
                "session not initialized".to_string(),
            );
        }

        match request.method.as_str() {
            "tools/list" => JsonRpcResponse::success(id, json!({ "tools": get_tool_definitions() })),
            "tools/call" => self.handle_tools_call(id, &request.params, tenant).await,
            "resources/list" => JsonRpcResponse::success(id, resource_list()),
            "resources/read" => self.handle_resources_read(id, &request.params, tenant).await,
            "prompts/list" => JsonRpcResponse::success(id, prompt_list()),
            "prompts/get" => handle_prompts_get(id, &request.params),
            "logging/setLevel" => self.handle_set_level(id, &request.params),
            _ => JsonRpcResponse::error(
                id,
                ErrorCode::MethodNotFound,
                format!("method not found: {}", request.method),
            ),
        }
    }

    /// Handles the `initialize` method, negotiating the protocol revision.
    fn handle_initialize(&self, id: Value, params: &Option<Value>) -> JsonRpcResponse {
        let Ok(mut handshake) = self.handshake.lock() else {
            return JsonRpcResponse::error(id, ErrorCode::InternalError, "session state unavailable".into());
        };
        if handshake.initialized {
            return JsonRpcResponse::error(
                id,
                ErrorCode::InvalidRequest,
                "session already initialized".to_string(),
            );
        }

        let requested = params
            .as_ref()
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str);
        let version = requested
            .filter(|v| SUPPORTED_PROTOCOL_VERSIONS.contains(v))
            .unwrap_or(SUPPORTED_PROTOCOL_VERSIONS[0])
            .to_string();

        handshake.initialized = true;
        handshake.protocol_version = Some(version.clone());
        handshake.client_name = params
            .as_ref()
            .and_then(|p| p.pointer("/clientInfo/name"))
            .and_then(Value::as_str)
            .map(str::to_string);

        tracing::info!(
            client = handshake.client_name.as_deref().unwrap_or("unknown"),
            protocol = %version,
            "session initialized"
        );

        JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": version,
                "capabilities": {
                    "tools": {},
                    "resources": {},
                    "prompts": {},
                    "logging": {}
                },
                "serverInfo": {
                    "name": "graphgate",
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        )
    }

    /// Handles the `tools/call` method, dispatching to the appropriate tool handler.
    async fn handle_tools_call(
        &self,
        id: Value,
        params: &Option<Value>,
        tenant: &TenantContext,
    ) -> JsonRpcResponse {
        let Some(params) = params else {
            return JsonRpcResponse::error(
                id,
                ErrorCode::InvalidParams,
                "missing params for tools/call".to_string(),
            );
        };

        let Some(tool_name) = params.get("name").and_then(Value::as_str) else {
            return JsonRpcResponse::error(
                id,
                ErrorCode::InvalidParams,
                "missing 'name' in tools/call params".to_string(),
            );
        };

        if !is_known_tool(tool_name) {
            return JsonRpcResponse::error(
                id,
                ErrorCode::InvalidParams,
                format!("unknown tool: {}", tool_name),
            );
        }

        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

        self.stats.tool_calls.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut counts) = self.tool_call_counts.lock() {
            *counts.entry(tool_name.to_string()).or_insert(0) += 1;
        }

        let session_stats = (tool_name == "health_check").then(|| self.server_stats_json());
        let scope = CallScope {
            tenant,
            logger: &self.logger,
            session_stats,
        };

        let result = handle_tool_call(&self.ctx, scope, tool_name, arguments).await;
        JsonRpcResponse::success(id, result)
    }

    async fn handle_resources_read(
        &self,
        id: Value,
        params: &Option<Value>,
        tenant: &TenantContext,
    ) -> JsonRpcResponse {
        let uri = params
            .as_ref()
            .and_then(|p| p.get("uri"))
            .and_then(Value::as_str);
        if uri != Some(GRAPH_LIST_URI) {
            return JsonRpcResponse::error(
                id,
                ErrorCode::InvalidParams,
                format!("unknown resource: {}", uri.unwrap_or("<missing>")),
            );
        }

        match self.ctx.graph.list_graphs().await {
            Ok(all) => {
                let visible = self.ctx.resolver.filter_for_tenant(&all, tenant.tenant());
                JsonRpcResponse::success(
                    id,
                    json!({
                        "contents": [{
                            "uri": GRAPH_LIST_URI,
                            "mimeType": "application/json",
                            "text": serde_json::to_string(&visible).unwrap_or_default(),
                        }]
                    }),
                )
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to read graph list resource");
                let safe = crate::sanitize::to_safe_result(&e);
                JsonRpcResponse::error(id, ErrorCode::InternalError, safe.text)
            }
        }
    }

    fn handle_set_level(&self, id: Value, params: &Option<Value>) -> JsonRpcResponse {
        let level = params
            .as_ref()
            .and_then(|p| p.get("level"))
            .cloned()
            .and_then(|v| serde_json::from_value::<LogLevel>(v).ok());
        match level {
            Some(level) => {
                self.logger.set_level(level);
                JsonRpcResponse::success(id, json!({}))
            }
            None => JsonRpcResponse::error(
                id,
                ErrorCode::InvalidParams,
                "invalid or missing 'level'".to_string(),
            ),
        }
    }

    /// Returns the current session runtime statistics as a JSON value.
    pub fn server_stats_json(&self) -> Value {
        let uptime = self.stats.started_at.elapsed();
        let tool_counts: Value = self
            .tool_call_counts
            .lock()
            .map(|counts| json!(*counts))
            .unwrap_or(json!({}));

        json!({
            "uptime_secs": uptime.as_secs(),
            "total_requests": self.stats.total_requests.load(Ordering::Relaxed),
            "tool_calls": self.stats.tool_calls.load(Ordering::Relaxed),
            "errors": self.stats.errors.load(Ordering::Relaxed),
            "tool_call_counts": tool_counts,
        })
    }
}

fn resource_list() -> Value {
    json!({
        "resources": [{
            "uri": GRAPH_LIST_URI,
            "name": "graphs",
            "description": "Graphs visible to the caller",
            "mimeType": "application/json"
        }]
    })
}

fn prompt_list() -> Value {
    json!({
        "prompts": [{
            "name": "cypher_query_helper",
            "description": "Help writing a Cypher query that answers a question about a graph",
            "arguments": [
                { "name": "graphName", "description": "Graph to query", "required": true },
                { "name": "question", "description": "What the query should answer", "required": true }
            ]
        }]
    })
}

fn handle_prompts_get(id: Value, params: &Option<Value>) -> JsonRpcResponse {
    let params = params.as_ref();
    if params.and_then(|p| p.get("name")).and_then(Value::as_str) != Some("cypher_query_helper") {
        return JsonRpcResponse::error(id, ErrorCode::InvalidParams, "unknown prompt".to_string());
    }

    let arg = |name: &str| {
        params
            .and_then(|p| p.pointer(&format!("/arguments/{name}")))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string()
    };
    let (graph, question) = (arg("graphName"), arg("question"));
    if graph.is_empty() || question.is_empty() {
        return JsonRpcResponse::error(
            id,
            ErrorCode::InvalidParams,
            "graphName and question are required".to_string(),
        );
    }

    JsonRpcResponse::success(
        id,
        json!({
            "description": "Cypher query helper",
            "messages": [{
                "role": "user",
                "content": {
                    "type": "text",
                    "text": format!(
                        "Write a Cypher query for the graph '{graph}' that answers: {question}\n\
                         First inspect the schema with `CALL db.labels()` and \
                         `CALL db.relationshipTypes()` using query_graph_readonly, \
                         then run the query with query_graph_readonly."
                    )
                }
            }]
        }),
    )
}
