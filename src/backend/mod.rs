//! Backend adapter: the graph engine and the auxiliary key/value store.
//!
//! Both speak RESP over TCP. Tool handlers only see the [`GraphBackend`] and
//! [`KeyValueStore`] traits, shared as `Arc<dyn ...>` by every session.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::{GatewayError, Result};

/// FalkorDB graph engine adapter.
pub mod falkor;

/// Key/value store adapter.
pub mod kv;

/// Cached RESP connection with reconnect and timeouts.
pub mod connection;

/// RESP2 wire codec.
pub mod resp;

pub use connection::{ConnectSettings, RespClient, RespEndpoint};
pub use falkor::FalkorBackend;
pub use kv::RedisStore;

/// Tabular result of a graph query.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    /// Column names, empty for queries without a `RETURN`.
    pub header: Vec<String>,
    /// One JSON array per row.
    pub rows: Vec<Value>,
    /// Engine statistics lines (`Nodes created: 1`, ...).
    pub statistics: Vec<String>,
}

/// Outcome of a backend health probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

/// Operations the tool handlers need from the graph engine.
#[async_trait]
pub trait GraphBackend: Send + Sync {
    /// Connects (with retry) if not already connected. Idempotent.
    async fn initialize(&self) -> Result<()>;

    async fn execute_query(
        &self,
        graph: &str,
        query: &str,
        params: Option<&Map<String, Value>>,
        read_only: bool,
    ) -> Result<QueryResult>;

    async fn list_graphs(&self) -> Result<Vec<String>>;

    async fn delete_graph(&self, graph: &str) -> Result<()>;

    async fn health_check(&self) -> HealthStatus;

    async fn close(&self);
}

/// Operations the tool handlers need from the key/value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn initialize(&self) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value`, expiring after `ttl_secs` when given.
    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<()>;

    /// Returns `true` if a key was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn list_keys(&self, pattern: &str) -> Result<Vec<String>>;

    async fn close(&self);
}

/// Races `fut` against a timer; the future is dropped on expiry.
pub async fn with_timeout<T, F>(operation: &str, timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout {
            operation: operation.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt - 1)`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(16);
    base.saturating_mul(factor)
}

/// Rejects empty required inputs before any I/O happens.
pub fn require_non_empty<'a>(field: &str, value: &'a str) -> Result<&'a str> {
    if value.trim().is_empty() {
        Err(GatewayError::validation(format!("{field} is required")))
    } else {
        Ok(value)
    }
}
