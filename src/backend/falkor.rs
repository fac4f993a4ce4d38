//! Graph engine adapter speaking the FalkorDB `GRAPH.*` command family.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::errors::{GatewayError, Result};

use super::resp::RespValue;
use super::{require_non_empty, GraphBackend, HealthStatus, QueryResult, RespClient};

pub struct FalkorBackend {
    client: RespClient,
    initialized: AtomicBool,
}

impl FalkorBackend {
    pub fn new(client: RespClient) -> Self {
        Self {
            client,
            initialized: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl GraphBackend for FalkorBackend {
    async fn initialize(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) && self.client.is_connected().await {
            return Ok(());
        }
        self.client.connect_with_backoff().await?;
        self.client.ping().await?;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    async fn execute_query(
        &self,
        graph: &str,
        query: &str,
        params: Option<&Map<String, Value>>,
        read_only: bool,
    ) -> Result<QueryResult> {
        let graph = require_non_empty("graphName", graph)?;
        let query = require_non_empty("query", query)?;

        let full_query = match params {
            Some(params) if !params.is_empty() => format!("{} {}", cypher_header(params)?, query),
            _ => query.to_string(),
        };
        let command = if read_only {
            "GRAPH.RO_QUERY"
        } else {
            "GRAPH.QUERY"
        };

        let reply = self.client.command(&[command, graph, &full_query]).await?;
        parse_query_reply(reply)
    }

    async fn list_graphs(&self) -> Result<Vec<String>> {
        let reply = self.client.command(&["GRAPH.LIST"]).await?;
        Ok(reply
            .into_array()
            .unwrap_or_default()
            .iter()
            .filter_map(RespValue::as_text)
            .collect())
    }

    async fn delete_graph(&self, graph: &str) -> Result<()> {
        let graph = require_non_empty("graphName", graph)?;
        self.client.command(&["GRAPH.DELETE", graph]).await?;
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.client.ping().await {
            Ok(rtt) => HealthStatus {
                connected: true,
                latency_ms: Some(rtt.as_millis() as u64),
            },
            Err(e) => {
                tracing::warn!(error = %e, "graph health check failed");
                HealthStatus {
                    connected: false,
                    latency_ms: None,
                }
            }
        }
    }

    async fn close(&self) {
        self.client.close().await;
        self.initialized.store(false, Ordering::Release);
    }
}

/// Builds the `CYPHER name=value ...` parameter header.
pub fn cypher_header(params: &Map<String, Value>) -> Result<String> {
    let mut parts = Vec::with_capacity(params.len());
    for (name, value) in params {
        if !is_identifier(name) {
            return Err(GatewayError::validation(format!(
                "invalid parameter name '{name}'"
            )));
        }
        parts.push(format!("{}={}", name, cypher_literal(value)));
    }
    Ok(format!("CYPHER {}", parts.join(" ")))
}

/// Renders a JSON value as a Cypher literal.
pub fn cypher_literal(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        Value::Array(items) => format!(
            "[{}]",
            items.iter().map(cypher_literal).collect::<Vec<_>>().join(", ")
        ),
        Value::Object(map) => format!(
            "{{{}}}",
            map.iter()
                .map(|(k, v)| {
                    let key = if is_identifier(k) {
                        k.clone()
                    } else {
                        format!("`{}`", k.replace('`', "``"))
                    };
                    format!("{}: {}", key, cypher_literal(v))
                })
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Converts a `GRAPH.QUERY` reply (`[header, rows, stats]` or `[stats]`).
pub fn parse_query_reply(reply: RespValue) -> Result<QueryResult> {
    let mut items = reply
        .into_array()
        .ok_or_else(|| GatewayError::operation("unexpected query reply shape"))?;

    let text_lines = |value: RespValue| -> Vec<String> {
        value
            .into_array()
            .unwrap_or_default()
            .iter()
            .filter_map(RespValue::as_text)
            .collect()
    };

    match items.len() {
        1 => Ok(QueryResult {
            statistics: text_lines(items.remove(0)),
            ..QueryResult::default()
        }),
        3 => {
            let statistics = text_lines(items.remove(2));
            let rows = items
                .remove(1)
                .into_array()
                .unwrap_or_default()
                .iter()
                .map(RespValue::to_json)
                .collect();
            let header = items
                .remove(0)
                .into_array()
                .unwrap_or_default()
                .into_iter()
                .filter_map(|column| match column {
                    // Older engines send `[type, name]` pairs.
                    RespValue::Array(Some(pair)) => pair.last().and_then(RespValue::as_text),
                    other => other.as_text(),
                })
                .collect();
            Ok(QueryResult {
                header,
                rows,
                statistics,
            })
        }
        n => Err(GatewayError::operation(format!(
            "unexpected query reply with {n} sections"
        ))),
    }
}
