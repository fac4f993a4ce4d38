//! Auxiliary key/value store adapter.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::errors::{GatewayError, Result};

use super::resp::RespValue;
use super::{require_non_empty, KeyValueStore, RespClient};

const COMPONENT: &str = "key/value store";

/// Page size hint passed to `SCAN`.
const SCAN_COUNT: &str = "200";

pub struct RedisStore {
    client: RespClient,
    initialized: AtomicBool,
}

impl RedisStore {
    pub fn new(client: RespClient) -> Self {
        Self {
            client,
            initialized: AtomicBool::new(false),
        }
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(GatewayError::NotInitialized {
                component: COMPONENT.to_string(),
            })
        }
    }

    /// Runs a command, wrapping non-connection failures as `"<op> failed"`.
    async fn run(&self, op: &str, args: &[&str]) -> Result<RespValue> {
        self.ensure_initialized()?;
        self.client.command(args).await.map_err(|e| match e {
            GatewayError::Operation { message } => {
                GatewayError::operation(format!("{op} failed: {message}"))
            }
            other => other,
        })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn initialize(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        self.client.connect_with_backoff().await?;
        self.client.ping().await?;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = require_non_empty("key", key)?;
        Ok(self.run("get", &["GET", key]).await?.as_text())
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<()> {
        let key = require_non_empty("key", key)?;
        match ttl_secs {
            Some(ttl) => {
                let ttl = ttl.to_string();
                self.run("set", &["SET", key, value, "EX", &ttl]).await?;
            }
            None => {
                self.run("set", &["SET", key, value]).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let key = require_non_empty("key", key)?;
        match self.run("delete", &["DEL", key]).await? {
            RespValue::Integer(n) => Ok(n > 0),
            other => Err(GatewayError::operation(format!(
                "delete failed: unexpected reply {:?}",
                other
            ))),
        }
    }

    async fn list_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let pattern = if pattern.is_empty() { "*" } else { pattern };
        let mut cursor = "0".to_string();
        let mut keys = Vec::new();

        loop {
            let reply = self
                .run("list keys", &["SCAN", &cursor, "MATCH", pattern, "COUNT", SCAN_COUNT])
                .await?;
            let mut page = reply
                .into_array()
                .filter(|items| items.len() == 2)
                .ok_or_else(|| GatewayError::operation("list keys failed: malformed SCAN reply"))?;
            let batch = page.pop().and_then(RespValue::into_array).unwrap_or_default();
            keys.extend(batch.iter().filter_map(RespValue::as_text));
            cursor = page
                .pop()
                .and_then(|c| c.as_text())
                .unwrap_or_else(|| "0".to_string());
            if cursor == "0" {
                break;
            }
        }

        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn close(&self) {
        self.client.close().await;
        self.initialized.store(false, Ordering::Release);
    }
}
