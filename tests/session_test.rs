mod common;

use std::sync::Arc;

use axum::body::Bytes;
use axum::http::header::{HeaderValue, AUTHORIZATION};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::IntoResponse;
use futures::StreamExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};

use common::*;
use graphgate::auth::{Authenticator, JwtVerifier};
use graphgate::config::GatewayConfig;
use graphgate::mcp::{HttpReply, SessionManager, SessionState, SESSION_HEADER};

fn manager_with(authenticator: Authenticator, config: &GatewayConfig, graph: Arc<MemoryGraph>) -> SessionManager {
    SessionManager::new(authenticator, context(config, graph, MemoryStore::new()))
}

fn keyed_manager() -> SessionManager {
    manager_with(
        Authenticator::ApiKey("secret".to_string()),
        &GatewayConfig::default(),
        MemoryGraph::with_graphs(&["orders"]),
    )
}

fn headers(token: Option<&str>, session: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(token) = token {
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
    }
    if let Some(session) = session {
        headers.insert(SESSION_HEADER, HeaderValue::from_str(session).unwrap());
    }
    headers
}

fn body(value: &Value) -> Bytes {
    Bytes::from(serde_json::to_vec(value).unwrap())
}

async fn post(manager: &SessionManager, session: Option<&str>, message: &Value) -> HttpReply {
    manager
        .handle(&Method::POST, &headers(Some("secret"), session), body(message))
        .await
}

/// Opens a session and returns its id.
async fn open(manager: &SessionManager) -> String {
    let reply = post(manager, None, &initialize_request(1)).await;
    assert_eq!(reply.status(), StatusCode::OK);
    reply.session_id().expect("session id header").to_string()
}

#[tokio::test]
async fn test_wrong_api_key_is_unauthorized() {
    let manager = keyed_manager();
    let reply = manager
        .handle(&Method::POST, &headers(Some("wrong"), None), body(&initialize_request(1)))
        .await;
    assert_eq!(reply.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body().unwrap()["error"]["code"], -32001);
    assert_eq!(manager.session_count(), 0);

    let reply = manager
        .handle(&Method::POST, &headers(None, None), body(&initialize_request(1)))
        .await;
    assert_eq!(reply.status(), StatusCode::UNAUTHORIZED);

    let response = reply.into_response();
    assert_eq!(response.headers()["www-authenticate"], "Bearer");
}

#[tokio::test]
async fn test_auth_runs_before_session_lookup() {
    let manager = keyed_manager();
    let id = open(&manager).await;
    let reply = manager
        .handle(&Method::DELETE, &headers(Some("wrong"), Some(&id)), Bytes::new())
        .await;
    assert_eq!(reply.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(manager.session_count(), 1);
}

#[tokio::test]
async fn test_initialize_then_follow_up() {
    let manager = keyed_manager();
    let reply = post(&manager, None, &initialize_request(1)).await;
    assert_eq!(reply.status(), StatusCode::OK);
    let id = reply.session_id().unwrap().to_string();
    assert_eq!(reply.body().unwrap()["result"]["serverInfo"]["name"], "graphgate");
    assert_eq!(manager.lookup(&id).unwrap().state(), SessionState::Active);

    let response = reply.into_response();
    assert_eq!(response.headers()[SESSION_HEADER], id.as_str());

    let reply = post(
        &manager,
        Some(&id),
        &json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
    )
    .await;
    assert_eq!(reply.status(), StatusCode::ACCEPTED);
    assert!(reply.body().is_none());

    let reply = post(&manager, Some(&id), &request(2, "tools/list", json!({}))).await;
    assert_eq!(reply.status(), StatusCode::OK);
    assert_eq!(reply.body().unwrap()["result"]["tools"].as_array().unwrap().len(), 9);
    assert!(reply.session_id().is_none());
}

#[tokio::test]
async fn test_session_ids_are_unique() {
    let manager = keyed_manager();
    let a = open(&manager).await;
    let b = open(&manager).await;
    assert_ne!(a, b);
    assert_eq!(manager.session_count(), 2);
}

#[tokio::test]
async fn test_deleted_session_is_never_resurrected() {
    let manager = keyed_manager();
    let id = open(&manager).await;
    let session = manager.lookup(&id).unwrap();

    let reply = manager
        .handle(&Method::DELETE, &headers(Some("secret"), Some(&id)), Bytes::new())
        .await;
    assert_eq!(reply.status(), StatusCode::OK);
    assert_eq!(manager.session_count(), 0);
    assert_eq!(session.state(), SessionState::Closed);
    assert!(session.engine().is_closed());

    let reply = post(&manager, Some(&id), &request(2, "tools/list", json!({}))).await;
    assert_eq!(reply.status(), StatusCode::BAD_REQUEST);

    let reply = manager
        .handle(&Method::DELETE, &headers(Some("secret"), Some(&id)), Bytes::new())
        .await;
    assert_eq!(reply.status(), StatusCode::BAD_REQUEST);
    assert!(!manager.close_session(&id));
}

#[tokio::test]
async fn test_non_initialize_without_session_is_bad_request() {
    let manager = keyed_manager();
    let reply = post(&manager, None, &request(1, "tools/list", json!({}))).await;
    assert_eq!(reply.status(), StatusCode::BAD_REQUEST);
    assert_eq!(manager.session_count(), 0);
}

#[tokio::test]
async fn test_unknown_session_and_methods() {
    let manager = keyed_manager();
    let ghost = "00000000-0000-4000-8000-000000000000";

    let reply = post(&manager, Some(ghost), &request(1, "ping", json!({}))).await;
    assert_eq!(reply.status(), StatusCode::BAD_REQUEST);

    for method in [Method::GET, Method::DELETE] {
        let reply = manager
            .handle(&method, &headers(Some("secret"), Some(ghost)), Bytes::new())
            .await;
        assert_eq!(reply.status(), StatusCode::BAD_REQUEST, "{method}");
        let reply = manager
            .handle(&method, &headers(Some("secret"), None), Bytes::new())
            .await;
        assert_eq!(reply.status(), StatusCode::BAD_REQUEST, "{method}");
    }

    let reply = manager
        .handle(&Method::PUT, &headers(Some("secret"), None), Bytes::new())
        .await;
    assert_eq!(reply.status(), StatusCode::METHOD_NOT_ALLOWED);
    let response = reply.into_response();
    assert_eq!(response.headers()["allow"], "GET, POST, DELETE");
}

#[tokio::test]
async fn test_unparseable_body_is_parse_error() {
    let manager = keyed_manager();
    let reply = manager
        .handle(
            &Method::POST,
            &headers(Some("secret"), None),
            Bytes::from_static(b"{\"jsonrpc\": "),
        )
        .await;
    assert_eq!(reply.status(), StatusCode::BAD_REQUEST);
    assert_eq!(reply.body().unwrap()["error"]["code"], -32700);
}

#[tokio::test]
async fn test_failed_handshake_registers_nothing() {
    let manager = keyed_manager();
    // Missing the `jsonrpc` member, so the engine rejects it.
    let broken = json!({"id": 1, "method": "initialize", "params": {}});
    let reply = post(&manager, None, &broken).await;
    assert_eq!(reply.status(), StatusCode::BAD_REQUEST);
    assert!(reply.session_id().is_none());
    assert_eq!(manager.session_count(), 0);
}

#[tokio::test]
async fn test_batch_initialize() {
    let manager = keyed_manager();
    let batch = json!([
        initialize_request(1),
        {"jsonrpc": "2.0", "method": "notifications/initialized"},
        request(2, "tools/list", json!({}))
    ]);
    let reply = post(&manager, None, &batch).await;
    assert_eq!(reply.status(), StatusCode::OK);
    assert!(reply.session_id().is_some());
    let responses = reply.body().unwrap();
    let responses = responses.as_array().unwrap();
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[1]["id"], 2);
}

#[tokio::test]
async fn test_event_stream_carries_notifications_and_ends_on_close() {
    let manager = keyed_manager();
    let id = open(&manager).await;

    let reply = manager
        .handle(&Method::GET, &headers(Some("secret"), Some(&id)), Bytes::new())
        .await;
    assert_eq!(reply.status(), StatusCode::OK);
    assert_eq!(reply.session_id(), Some(id.as_str()));
    let HttpReply::Stream { mut events, .. } = reply else {
        panic!("expected an event stream");
    };

    let reply = post(
        &manager,
        Some(&id),
        &tool_call(2, "delete_graph", json!({"graphName": "orders"})),
    )
    .await;
    assert_eq!(reply.status(), StatusCode::OK);

    let note = events.next().await.unwrap();
    assert_eq!(note["method"], "notifications/message");

    assert!(manager.close_session(&id));
    assert!(events.next().await.is_none());
}

#[tokio::test]
async fn test_close_all() {
    let manager = keyed_manager();
    let a = open(&manager).await;
    open(&manager).await;
    let session = manager.lookup(&a).unwrap();
    manager.close_all();
    assert_eq!(manager.session_count(), 0);
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_jwt_subject_scopes_session_requests() {
    #[derive(serde::Serialize)]
    struct Claims<'a> {
        sub: &'a str,
        exp: u64,
    }

    let exp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
        + 600;
    let token = encode(
        &Header::default(),
        &Claims { sub: "tenantA", exp },
        &EncodingKey::from_secret(b"jwt-secret"),
    )
    .unwrap();

    let config = multi_tenant_config();
    let manager = manager_with(
        Authenticator::Jwt {
            verifier: Arc::new(JwtVerifier::from_secret("jwt-secret", None, None)),
            tenant_scoped: true,
        },
        &config,
        MemoryGraph::with_graphs(&["orders", "tenantA_orders", "tenantA_users", "tenantB_orders"]),
    );

    let reply = manager
        .handle(&Method::POST, &headers(Some(&token), None), body(&initialize_request(1)))
        .await;
    let id = reply.session_id().unwrap().to_string();

    let reply = manager
        .handle(
            &Method::POST,
            &headers(Some(&token), Some(&id)),
            body(&tool_call(2, "list_graphs", json!({}))),
        )
        .await;
    let result = reply.body().unwrap()["result"].clone();
    let names: Vec<String> = serde_json::from_str(&tool_text(&result)).unwrap();
    assert_eq!(names, vec!["orders", "users"]);

    let reply = manager
        .handle(&Method::POST, &headers(Some("not-a-jwt"), Some(&id)), body(&request(3, "ping", json!({}))))
        .await;
    assert_eq!(reply.status(), StatusCode::UNAUTHORIZED);
}
