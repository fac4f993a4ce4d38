//! Streamable HTTP transport: many MCP sessions behind one listener.
//!
//! Every request is authenticated first, then routed by its
//! `Mcp-Session-Id` header. POST carries client messages, GET opens the
//! server-to-client event stream and DELETE ends the session. A session
//! exists in the table only after its `initialize` handshake succeeded and is
//! never brought back once removed.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{HeaderName, HeaderValue, ALLOW, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::auth::{Authenticator, TenantContext};

use super::server::McpServer;
use super::tools::ToolContext;
use super::transport::{ErrorCode, IncomingPayload, JsonRpcResponse, NotificationSink};

/// Request and response header carrying the session id.
pub const SESSION_HEADER: HeaderName = HeaderName::from_static("mcp-session-id");

/// Buffered notifications per session before slow streams start lagging.
const OUTBOUND_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Active,
    Closed,
}

/// One live protocol session.
pub struct Session {
    id: String,
    engine: McpServer,
    outbound: broadcast::Sender<Value>,
    closed: watch::Sender<bool>,
    state: Mutex<SessionState>,
}

impl Session {
    fn new(id: String, ctx: Arc<ToolContext>) -> Self {
        let (outbound, _) = broadcast::channel(OUTBOUND_CAPACITY);
        let (closed, _) = watch::channel(false);
        let engine = McpServer::new(ctx, NotificationSink::Broadcast(outbound.clone()));
        Self {
            id,
            engine,
            outbound,
            closed,
            state: Mutex::new(SessionState::Initializing),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn engine(&self) -> &McpServer {
        &self.engine
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Server-to-client messages, ending when the session closes.
    pub fn events(&self) -> BoxStream<'static, Value> {
        let mut closed = self.closed.subscribe();
        let until_closed = async move {
            let _ = closed.wait_for(|closed| *closed).await;
        };
        BroadcastStream::new(self.outbound.subscribe())
            .filter_map(|item| futures::future::ready(item.ok()))
            .take_until(until_closed)
            .boxed()
    }

    /// Protocol-level close. Safe to call more than once.
    fn close(&self) {
        self.set_state(SessionState::Closed);
        self.engine.close();
        self.closed.send_replace(true);
    }
}

/// Outcome of one HTTP exchange, independent of the web framework.
pub enum HttpReply {
    /// JSON body; `session_id` is echoed in the session header.
    Json {
        status: StatusCode,
        body: Value,
        session_id: Option<String>,
    },
    Empty(StatusCode),
    Stream {
        session_id: String,
        events: BoxStream<'static, Value>,
    },
    Error {
        status: StatusCode,
        code: i32,
        message: String,
    },
}

impl HttpReply {
    fn error(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            status,
            code: code.as_i32(),
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::error(StatusCode::BAD_REQUEST, ErrorCode::InvalidRequest, message)
    }

    fn unauthorized() -> Self {
        Self::Error {
            status: StatusCode::UNAUTHORIZED,
            code: -32001,
            message: "Unauthorized".to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Json { status, .. } | Self::Error { status, .. } => *status,
            Self::Empty(status) => *status,
            Self::Stream { .. } => StatusCode::OK,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Json { session_id, .. } => session_id.as_deref(),
            Self::Stream { session_id, .. } => Some(session_id),
            _ => None,
        }
    }

    /// The JSON body, if this reply carries one.
    pub fn body(&self) -> Option<Value> {
        match self {
            Self::Json { body, .. } => Some(body.clone()),
            Self::Error { code, message, .. } => Some(error_body(*code, message)),
            _ => None,
        }
    }
}

fn error_body(code: i32, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": { "code": code, "message": message },
        "id": null
    })
}

impl IntoResponse for HttpReply {
    fn into_response(self) -> Response {
        match self {
            Self::Json {
                status,
                body,
                session_id,
            } => {
                let mut response = (status, Json(body)).into_response();
                if let Some(value) = session_id.and_then(|id| HeaderValue::from_str(&id).ok()) {
                    response.headers_mut().insert(SESSION_HEADER, value);
                }
                response
            }
            Self::Empty(status) => status.into_response(),
            Self::Stream { session_id, events } => {
                let stream = events.map(|message| {
                    Ok::<_, Infallible>(
                        Event::default()
                            .event("message")
                            .data(serde_json::to_string(&message).unwrap_or_default()),
                    )
                });
                let mut response = Sse::new(stream)
                    .keep_alive(KeepAlive::default())
                    .into_response();
                if let Ok(value) = HeaderValue::from_str(&session_id) {
                    response.headers_mut().insert(SESSION_HEADER, value);
                }
                response
            }
            Self::Error {
                status,
                code,
                message,
            } => {
                let mut response = (status, Json(error_body(code, &message))).into_response();
                let headers = response.headers_mut();
                if status == StatusCode::UNAUTHORIZED {
                    headers.insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
                }
                if status == StatusCode::METHOD_NOT_ALLOWED {
                    headers.insert(ALLOW, HeaderValue::from_static("GET, POST, DELETE"));
                }
                response
            }
        }
    }
}

/// Owns the session table and routes HTTP requests to session engines.
pub struct SessionManager {
    authenticator: Authenticator,
    ctx: Arc<ToolContext>,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    pub fn new(authenticator: Authenticator, ctx: Arc<ToolContext>) -> Self {
        Self {
            authenticator,
            ctx,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn session_count(&self) -> usize {
        self.table().len()
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<Session>> {
        self.table().get(id).cloned()
    }

    /// Routes one HTTP request.
    pub async fn handle(&self, method: &Method, headers: &HeaderMap, body: Bytes) -> HttpReply {
        let tenant = match self.authenticator.authenticate(headers) {
            Ok(tenant) => tenant,
            Err(e) => {
                tracing::warn!(error = %e, "rejected request");
                return HttpReply::unauthorized();
            }
        };

        let session_id = headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if *method == Method::POST {
            self.handle_post(session_id, &body, &tenant).await
        } else if *method == Method::GET {
            self.handle_get(session_id)
        } else if *method == Method::DELETE {
            self.handle_delete(session_id)
        } else {
            HttpReply::error(
                StatusCode::METHOD_NOT_ALLOWED,
                ErrorCode::InvalidRequest,
                "Method not allowed",
            )
        }
    }

    async fn handle_post(
        &self,
        session_id: Option<String>,
        body: &[u8],
        tenant: &TenantContext,
    ) -> HttpReply {
        let payload = match IncomingPayload::parse(body) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!(error = %e, "unparseable request body");
                return HttpReply::error(
                    StatusCode::BAD_REQUEST,
                    ErrorCode::ParseError,
                    "Parse error",
                );
            }
        };

        match session_id {
            Some(id) => match self.lookup(&id) {
                Some(session) => {
                    let responses = process(&session.engine, payload.is_batch(), payload, tenant).await;
                    respond(responses, None)
                }
                None => HttpReply::bad_request("Bad Request: unknown session id"),
            },
            None if payload.contains_initialize() => self.open_session(payload, tenant).await,
            None => HttpReply::bad_request("Bad Request: no valid session id provided"),
        }
    }

    /// Runs an initialize payload through a fresh engine and registers the
    /// session only if the handshake succeeded.
    async fn open_session(&self, payload: IncomingPayload, tenant: &TenantContext) -> HttpReply {
        let id = Uuid::new_v4().to_string();
        let session = Arc::new(Session::new(id.clone(), Arc::clone(&self.ctx)));

        let responses = process(&session.engine, payload.is_batch(), payload, tenant).await;

        if !session.engine.is_initialized() {
            session.close();
            tracing::debug!("initialize handshake failed");
            return match respond(responses, None) {
                HttpReply::Json { body, .. } => HttpReply::Json {
                    status: StatusCode::BAD_REQUEST,
                    body,
                    session_id: None,
                },
                _ => HttpReply::bad_request("Bad Request: initialize failed"),
            };
        }

        session.set_state(SessionState::Active);
        self.table().insert(id.clone(), session);
        tracing::info!(session = %id, tenant = tenant.tenant().unwrap_or("-"), "session opened");
        respond(responses, Some(id))
    }

    fn handle_get(&self, session_id: Option<String>) -> HttpReply {
        match session_id.and_then(|id| self.lookup(&id)) {
            Some(session) => HttpReply::Stream {
                session_id: session.id().to_string(),
                events: session.events(),
            },
            None => HttpReply::bad_request("Bad Request: unknown or missing session id"),
        }
    }

    fn handle_delete(&self, session_id: Option<String>) -> HttpReply {
        match session_id {
            Some(id) if self.close_session(&id) => HttpReply::Empty(StatusCode::OK),
            _ => HttpReply::bad_request("Bad Request: unknown or missing session id"),
        }
    }

    /// Closes a session and drops it from the table.
    ///
    /// Returns `false` if no such session was registered, which makes a
    /// repeated close a no-op.
    pub fn close_session(&self, id: &str) -> bool {
        let Some(session) = self.lookup(id) else {
            return false;
        };
        session.close();
        self.table().remove(id);
        tracing::info!(session = %id, "session closed");
        true
    }

    /// Closes every open session, used at shutdown.
    pub fn close_all(&self) {
        let drained: Vec<Arc<Session>> = self.table().drain().map(|(_, s)| s).collect();
        for session in &drained {
            session.close();
        }
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "closed all sessions");
        }
    }
}

async fn process(
    engine: &McpServer,
    batch: bool,
    payload: IncomingPayload,
    tenant: &TenantContext,
) -> (bool, Vec<JsonRpcResponse>) {
    let mut responses = Vec::new();
    for message in payload.into_messages() {
        if let Some(response) = engine.handle_message(message, tenant).await {
            responses.push(response);
        }
    }
    (batch, responses)
}

/// 202 when nothing needs answering, otherwise the responses as JSON.
fn respond((batch, responses): (bool, Vec<JsonRpcResponse>), session_id: Option<String>) -> HttpReply {
    if responses.is_empty() {
        return HttpReply::Empty(StatusCode::ACCEPTED);
    }
    let body = if batch {
        serde_json::to_value(&responses)
    } else {
        serde_json::to_value(&responses[0])
    };
    HttpReply::Json {
        status: StatusCode::OK,
        body: body.unwrap_or(Value::Null),
        session_id,
    }
}

async fn dispatch(
    State(manager): State<Arc<SessionManager>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> HttpReply {
    manager.handle(&method, &headers, body).await
}

async fn health(State(manager): State<Arc<SessionManager>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "sessions": manager.session_count(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Mounts the MCP endpoint at `base_path` plus a `/health` probe.
pub fn router(manager: Arc<SessionManager>, base_path: &str) -> Router {
    Router::new()
        .route(base_path, any(dispatch))
        .route("/health", get(health))
        .with_state(manager)
}
