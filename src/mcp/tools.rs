//! MCP tool definitions and dispatch.
//!
//! Every graph and key name a caller supplies is a logical name; handlers
//! resolve it through the [`TenantResolver`] before touching the backend.
//! Handler failures never escape as JSON-RPC errors: they are logged in full
//! here and returned to the client as sanitized `isError` results.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::auth::TenantContext;
use crate::backend::{GraphBackend, KeyValueStore};
use crate::config::GatewayConfig;
use crate::errors::{GatewayError, Result};
use crate::logging::{ClientLogger, LogLevel};
use crate::sanitize::{opaque_failure, to_safe_result};
use crate::tenant::TenantResolver;

/// Maximum character length for a tool response before truncation.
const MAX_RESPONSE_CHARS: usize = 15_000;

/// Shared collaborators of every tool handler, one instance per process.
pub struct ToolContext {
    pub graph: Arc<dyn GraphBackend>,
    pub store: Arc<dyn KeyValueStore>,
    pub resolver: TenantResolver,
    pub default_readonly: bool,
    pub strict_readonly: bool,
}

impl ToolContext {
    pub fn new(
        config: &GatewayConfig,
        graph: Arc<dyn GraphBackend>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            graph,
            store,
            resolver: TenantResolver::from_config(&config.tenancy),
            default_readonly: config.server.default_readonly,
            strict_readonly: config.server.strict_readonly,
        }
    }

    fn ensure_writable(&self, what: &str) -> Result<()> {
        if self.strict_readonly {
            Err(GatewayError::validation(format!(
                "{what} is not allowed: server is in strict read-only mode"
            )))
        } else {
            Ok(())
        }
    }
}

/// A tool definition exposed by the MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description of what the tool does.
    pub description: String,
    /// JSON Schema describing the tool's input parameters.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

fn tool(name: &str, description: &str, input_schema: Value) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
    }
}

/// Returns the list of all tool definitions exposed by this MCP server.
pub fn get_tool_definitions() -> Vec<ToolDefinition> {
    let graph_name = json!({ "type": "string", "description": "Name of the graph" });
    let query = json!({ "type": "string", "description": "Cypher query to run" });
    let params = json!({
        "type": "object",
        "description": "Query parameters, referenced as $name in the query"
    });
    let key = json!({ "type": "string", "description": "Key name" });

    vec![
        tool(
            "query_graph",
            "Run a Cypher query against a graph. Runs read-only when readOnly is true or the server defaults to read-only.",
            json!({
                "type": "object",
                "properties": {
                    "graphName": graph_name,
                    "query": query,
                    "params": params,
                    "readOnly": { "type": "boolean", "description": "Run with GRAPH.RO_QUERY" }
                },
                "required": ["graphName", "query"]
            }),
        ),
        tool(
            "query_graph_readonly",
            "Run a read-only Cypher query against a graph. Write clauses are rejected by the engine.",
            json!({
                "type": "object",
                "properties": { "graphName": graph_name, "query": query, "params": params },
                "required": ["graphName", "query"]
            }),
        ),
        tool(
            "list_graphs",
            "List the graphs visible to the caller.",
            json!({ "type": "object", "properties": {} }),
        ),
        tool(
            "delete_graph",
            "Delete a graph and all of its data.",
            json!({
                "type": "object",
                "properties": { "graphName": graph_name },
                "required": ["graphName"]
            }),
        ),
        tool(
            "set_key",
            "Store a string value under a key, optionally expiring after expireSeconds.",
            json!({
                "type": "object",
                "properties": {
                    "key": key,
                    "value": { "type": "string", "description": "Value to store" },
                    "expireSeconds": { "type": "number", "description": "Time to live in seconds" }
                },
                "required": ["key", "value"]
            }),
        ),
        tool(
            "get_key",
            "Read the value stored under a key.",
            json!({
                "type": "object",
                "properties": { "key": key },
                "required": ["key"]
            }),
        ),
        tool(
            "delete_key",
            "Delete a key.",
            json!({
                "type": "object",
                "properties": { "key": key },
                "required": ["key"]
            }),
        ),
        tool(
            "list_keys",
            "List keys visible to the caller matching a glob pattern (default *).",
            json!({
                "type": "object",
                "properties": {
                    "pattern": { "type": "string", "description": "Glob pattern, e.g. user:*" }
                }
            }),
        ),
        tool(
            "health_check",
            "Report backend connectivity and latency together with session statistics.",
            json!({ "type": "object", "properties": {} }),
        ),
    ]
}

/// Returns `true` if `name` is one of the tools in [`get_tool_definitions`].
pub fn is_known_tool(name: &str) -> bool {
    get_tool_definitions().iter().any(|t| t.name == name)
}

/// Per-call inputs besides the tool arguments.
pub struct CallScope<'a> {
    pub tenant: &'a TenantContext,
    pub logger: &'a ClientLogger,
    /// Statistics of the calling session, reported by `health_check`.
    pub session_stats: Option<Value>,
}

/// Runs a tool and always produces an MCP tool result.
///
/// Failures, including panics inside the handler, are logged with full
/// detail and replaced by a sanitized `isError` result.
pub async fn handle_tool_call(
    ctx: &ToolContext,
    scope: CallScope<'_>,
    tool_name: &str,
    args: Value,
) -> Value {
    let tenant = scope.tenant.tenant().map(str::to_string);
    let logger = scope.logger;
    let outcome = AssertUnwindSafe(dispatch(ctx, &scope, tool_name, args))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            tracing::error!(
                tool = tool_name,
                tenant = tenant.as_deref().unwrap_or("-"),
                kind = e.kind().as_str(),
                error = %e,
                "tool call failed"
            );
            let safe = to_safe_result(&e);
            logger.log(LogLevel::Error, json!(format!("{tool_name}: {}", safe.text)));
            safe.into_tool_result()
        }
        Err(_) => {
            tracing::error!(tool = tool_name, "tool handler panicked");
            opaque_failure().into_tool_result()
        }
    }
}

async fn dispatch(
    ctx: &ToolContext,
    scope: &CallScope<'_>,
    tool_name: &str,
    args: Value,
) -> Result<Value> {
    let tenant = scope.tenant.tenant();
    match tool_name {
        "query_graph" => {
            let read_only = args
                .get("readOnly")
                .and_then(Value::as_bool)
                .unwrap_or(ctx.default_readonly);
            if !read_only {
                ctx.ensure_writable("a write query")?;
            }
            handle_query(ctx, tenant, &args, read_only).await
        }
        "query_graph_readonly" => handle_query(ctx, tenant, &args, true).await,
        "list_graphs" => handle_list_graphs(ctx, tenant).await,
        "delete_graph" => handle_delete_graph(ctx, scope, &args).await,
        "set_key" => handle_set_key(ctx, tenant, &args).await,
        "get_key" => handle_get_key(ctx, tenant, &args).await,
        "delete_key" => handle_delete_key(ctx, tenant, &args).await,
        "list_keys" => handle_list_keys(ctx, tenant, &args).await,
        "health_check" => handle_health(ctx, scope).await,
        _ => Err(GatewayError::validation(format!("unknown tool: {tool_name}"))),
    }
}

/// Truncates a string to the maximum response character limit, appending
/// a truncation notice if necessary.
fn truncate_response(s: &str) -> String {
    if s.len() <= MAX_RESPONSE_CHARS {
        s.to_string()
    } else {
        let mut end = MAX_RESPONSE_CHARS;
        while !s.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        format!("{}\n\n[... truncated at {} chars]", &s[..end], end)
    }
}

fn text_result(text: &str) -> Value {
    json!({
        "content": [{ "type": "text", "text": truncate_response(text) }]
    })
}

fn json_result(value: &Value) -> Value {
    text_result(&serde_json::to_string_pretty(value).unwrap_or_default())
}

fn required_str<'a>(args: &'a Value, field: &str) -> Result<&'a str> {
    match args.get(field).and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(GatewayError::validation(format!("{field} is required"))),
    }
}

fn optional_params(args: &Value) -> Result<Option<&Map<String, Value>>> {
    match args.get("params") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(GatewayError::validation("params must be an object")),
    }
}

async fn handle_query(
    ctx: &ToolContext,
    tenant: Option<&str>,
    args: &Value,
    read_only: bool,
) -> Result<Value> {
    let graph = required_str(args, "graphName")?;
    let query = required_str(args, "query")?;
    let params = optional_params(args)?;
    let physical = ctx.resolver.resolve(graph, tenant);

    let result = ctx
        .graph
        .execute_query(&physical, query, params, read_only)
        .await?;
    Ok(json_result(&serde_json::to_value(&result)?))
}

async fn handle_list_graphs(ctx: &ToolContext, tenant: Option<&str>) -> Result<Value> {
    let all = ctx.graph.list_graphs().await?;
    let visible = ctx.resolver.filter_for_tenant(&all, tenant);
    if visible.is_empty() {
        return Ok(text_result("No graphs found"));
    }
    Ok(json_result(&json!(visible)))
}

async fn handle_delete_graph(
    ctx: &ToolContext,
    scope: &CallScope<'_>,
    args: &Value,
) -> Result<Value> {
    let tenant = scope.tenant.tenant();
    let graph = required_str(args, "graphName")?;
    ctx.ensure_writable("deleting a graph")?;

    let all = ctx.graph.list_graphs().await?;
    if !ctx.resolver.validate_access(graph, tenant, &all) {
        return Err(GatewayError::validation(format!("graph '{graph}' not found")));
    }

    ctx.graph
        .delete_graph(&ctx.resolver.resolve(graph, tenant))
        .await?;
    scope.logger.info(format!("deleted graph '{graph}'"));
    Ok(text_result(&format!("Graph '{graph}' deleted")))
}

async fn handle_set_key(ctx: &ToolContext, tenant: Option<&str>, args: &Value) -> Result<Value> {
    let key = required_str(args, "key")?;
    let value = args
        .get("value")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::validation("value is required"))?;
    let ttl = args.get("expireSeconds").and_then(Value::as_u64);
    ctx.ensure_writable("setting a key")?;

    ctx.store
        .set(&ctx.resolver.resolve(key, tenant), value, ttl)
        .await?;
    Ok(text_result(&format!("Key '{key}' set")))
}

async fn handle_get_key(ctx: &ToolContext, tenant: Option<&str>, args: &Value) -> Result<Value> {
    let key = required_str(args, "key")?;
    match ctx.store.get(&ctx.resolver.resolve(key, tenant)).await? {
        Some(value) => Ok(text_result(&value)),
        None => Ok(text_result(&format!("Key '{key}' not found"))),
    }
}

async fn handle_delete_key(
    ctx: &ToolContext,
    tenant: Option<&str>,
    args: &Value,
) -> Result<Value> {
    let key = required_str(args, "key")?;
    ctx.ensure_writable("deleting a key")?;
    let removed = ctx.store.delete(&ctx.resolver.resolve(key, tenant)).await?;
    if removed {
        Ok(text_result(&format!("Key '{key}' deleted")))
    } else {
        Ok(text_result(&format!("Key '{key}' not found")))
    }
}

async fn handle_list_keys(ctx: &ToolContext, tenant: Option<&str>, args: &Value) -> Result<Value> {
    let pattern = args
        .get("pattern")
        .and_then(Value::as_str)
        .filter(|p| !p.is_empty())
        .unwrap_or("*");
    let all = ctx
        .store
        .list_keys(&ctx.resolver.resolve(pattern, tenant))
        .await?;
    let visible = ctx.resolver.filter_for_tenant(&all, tenant);
    Ok(json_result(&json!(visible)))
}

async fn handle_health(ctx: &ToolContext, scope: &CallScope<'_>) -> Result<Value> {
    let graph = ctx.graph.health_check().await;
    if !graph.connected {
        scope.logger.warning("graph backend is unreachable");
    }
    Ok(json_result(&json!({
        "graph": graph,
        "session": scope.session_stats.clone().unwrap_or(Value::Null),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_definitions_complete() {
        let tools = get_tool_definitions();
        assert_eq!(tools.len(), 9);
        for name in [
            "query_graph",
            "query_graph_readonly",
            "list_graphs",
            "delete_graph",
            "set_key",
            "get_key",
            "delete_key",
            "list_keys",
            "health_check",
        ] {
            assert!(is_known_tool(name), "missing tool {name}");
        }
    }

    #[test]
    fn test_tool_definitions_have_schemas() {
        for tool in get_tool_definitions() {
            assert!(!tool.description.is_empty());
            assert_eq!(tool.input_schema["type"], "object");
        }
    }

    #[test]
    fn test_truncate_long_response() {
        let long = "x".repeat(20_000);
        let result = truncate_response(&long);
        assert!(result.len() < 20_000);
        assert!(result.contains("[... truncated at 15000 chars]"));
    }

    #[test]
    fn test_required_str_rejects_blank() {
        let args = json!({"graphName": "  "});
        let err = required_str(&args, "graphName").unwrap_err();
        assert_eq!(err.to_string(), "graphName is required");
    }
}
