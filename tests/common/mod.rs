#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use graphgate::backend::{GraphBackend, HealthStatus, KeyValueStore, QueryResult};
use graphgate::config::GatewayConfig;
use graphgate::errors::{GatewayError, Result};
use graphgate::mcp::ToolContext;

/// One recorded `execute_query` call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedQuery {
    pub graph: String,
    pub query: String,
    pub read_only: bool,
}

/// In-memory graph engine.
///
/// Queries containing `PANIC` panic; a query is answered with one row
/// holding the physical graph name.
#[derive(Default)]
pub struct MemoryGraph {
    graphs: Mutex<BTreeSet<String>>,
    queries: Mutex<Vec<RecordedQuery>>,
    failure: Mutex<Option<String>>,
}

impl MemoryGraph {
    pub fn with_graphs(names: &[&str]) -> Arc<Self> {
        let graph = Self::default();
        graph
            .graphs
            .lock()
            .unwrap()
            .extend(names.iter().map(|n| n.to_string()));
        Arc::new(graph)
    }

    /// Makes every later call fail with a connection error carrying `message`.
    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn queries(&self) -> Vec<RecordedQuery> {
        self.queries.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.graphs.lock().unwrap().iter().cloned().collect()
    }

    fn check(&self) -> Result<()> {
        match self.failure.lock().unwrap().as_ref() {
            Some(message) => Err(GatewayError::connection(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl GraphBackend for MemoryGraph {
    async fn initialize(&self) -> Result<()> {
        self.check()
    }

    async fn execute_query(
        &self,
        graph: &str,
        query: &str,
        _params: Option<&Map<String, Value>>,
        read_only: bool,
    ) -> Result<QueryResult> {
        if query.contains("PANIC") {
            panic!("query handler exploded");
        }
        self.check()?;
        self.queries.lock().unwrap().push(RecordedQuery {
            graph: graph.to_string(),
            query: query.to_string(),
            read_only,
        });
        if !read_only && query.starts_with("CREATE") {
            self.graphs.lock().unwrap().insert(graph.to_string());
        }
        Ok(QueryResult {
            header: vec!["graph".to_string()],
            rows: vec![json!([graph])],
            statistics: vec![],
        })
    }

    async fn list_graphs(&self) -> Result<Vec<String>> {
        self.check()?;
        Ok(self.names())
    }

    async fn delete_graph(&self, graph: &str) -> Result<()> {
        self.check()?;
        self.graphs.lock().unwrap().remove(graph);
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        HealthStatus {
            connected: self.check().is_ok(),
            latency_ms: Some(0),
        }
    }

    async fn close(&self) {}
}

/// In-memory key/value store; patterns support a trailing `*` only.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, (String, Option<u64>)>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn ttl(&self, key: &str) -> Option<u64> {
        self.entries.lock().unwrap().get(key).and_then(|(_, ttl)| *ttl)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().unwrap().get(key).map(|(v, _)| v.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_string(), ttl_secs));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.lock().unwrap().remove(key).is_some())
    }

    async fn list_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let entries = self.entries.lock().unwrap();
        let matched = match pattern.strip_suffix('*') {
            Some(prefix) => entries.keys().filter(|k| k.starts_with(prefix)).cloned().collect(),
            None => entries.keys().filter(|k| *k == pattern).cloned().collect(),
        };
        Ok(matched)
    }

    async fn close(&self) {}
}

/// Configuration with multi-tenancy and prefixing switched on.
pub fn multi_tenant_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.tenancy.multi_tenancy = true;
    config.tenancy.prefix_graph_names = true;
    config
}

pub fn context(
    config: &GatewayConfig,
    graph: Arc<MemoryGraph>,
    store: Arc<MemoryStore>,
) -> Arc<ToolContext> {
    Arc::new(ToolContext::new(config, graph, store))
}

pub fn initialize_request(id: u64) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-03-26",
            "capabilities": {},
            "clientInfo": { "name": "test-client", "version": "1.0" }
        }
    })
}

pub fn request(id: u64, method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
}

pub fn tool_call(id: u64, name: &str, arguments: Value) -> Value {
    request(id, "tools/call", json!({ "name": name, "arguments": arguments }))
}

/// The text of the first content block of a tool result.
pub fn tool_text(result: &Value) -> String {
    result["content"][0]["text"].as_str().unwrap_or_default().to_string()
}

pub fn is_error(result: &Value) -> bool {
    result["isError"].as_bool().unwrap_or(false)
}
