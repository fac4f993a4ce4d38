//! MCP (Model Context Protocol) server for the graph gateway.
//!
//! Provides a JSON-RPC 2.0 interface over stdio or streamable HTTP so that
//! AI assistants can query graphs and the auxiliary key/value store. Each
//! protocol session gets its own [`McpServer`]; all sessions share one
//! [`ToolContext`].

/// Streamable HTTP transport and session table.
pub mod http;

/// MCP protocol engine.
pub mod server;

/// Stdio transport.
pub mod stdio;

/// Tool definitions and dispatch.
pub mod tools;

/// JSON-RPC 2.0 transport types.
pub mod transport;

pub use http::{router, HttpReply, Session, SessionManager, SessionState, SESSION_HEADER};
pub use server::{McpServer, SUPPORTED_PROTOCOL_VERSIONS};
pub use tools::{get_tool_definitions, handle_tool_call, ToolContext, ToolDefinition};
pub use transport::{ErrorCode, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
