//! Logging setup and client-facing log forwarding.
//!
//! Server-side logs go through `tracing`. The sink is picked by transport
//! mode: over stdio, stdout carries nothing but protocol frames, so every
//! record is written to stderr instead.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use crate::config::TransportMode;
use crate::mcp::transport::{JsonRpcNotification, NotificationSink};

/// Installs the global `tracing` subscriber for the given transport.
///
/// `RUST_LOG` wins over `default_level` when set. Calling this twice is
/// harmless; the second installation is ignored.
pub fn init(mode: TransportMode, default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    // An already-installed subscriber (tests, embedding) is kept.
    let _ = match mode {
        TransportMode::Stdio => builder
            .with_ansi(false)
            .with_writer(std::io::stderr)
            .try_init(),
        TransportMode::Http => builder.with_writer(std::io::stdout).try_init(),
    };
}

/// MCP log severities, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

impl LogLevel {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Debug,
            1 => Self::Info,
            2 => Self::Notice,
            3 => Self::Warning,
            4 => Self::Error,
            5 => Self::Critical,
            6 => Self::Alert,
            _ => Self::Emergency,
        }
    }
}

/// Forwards log records to one connected client as `notifications/message`.
///
/// Delivery is fire-and-forget: a disconnected or slow client never makes
/// the logged operation fail or wait.
pub struct ClientLogger {
    sink: NotificationSink,
    min_level: AtomicU8,
}

impl ClientLogger {
    pub fn new(sink: NotificationSink) -> Self {
        Self {
            sink,
            min_level: AtomicU8::new(LogLevel::Info as u8),
        }
    }

    /// Sets the minimum level forwarded to the client (`logging/setLevel`).
    pub fn set_level(&self, level: LogLevel) {
        self.min_level.store(level as u8, Ordering::Relaxed);
    }

    pub fn level(&self) -> LogLevel {
        LogLevel::from_u8(self.min_level.load(Ordering::Relaxed))
    }

    pub fn log(&self, level: LogLevel, data: Value) {
        if level < self.level() {
            return;
        }
        let params = json!({
            "level": level,
            "logger": "graphgate",
            "data": data,
        });
        self.sink
            .deliver(JsonRpcNotification::new("notifications/message", params).into_value());
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, Value::String(message.into()));
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, Value::String(message.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast;

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Error > LogLevel::Warning);
        assert_eq!(LogLevel::from_u8(LogLevel::Notice as u8), LogLevel::Notice);
    }

    #[test]
    fn test_filters_below_min_level() {
        let (tx, mut rx) = broadcast::channel(4);
        let logger = ClientLogger::new(NotificationSink::Broadcast(tx));
        logger.log(LogLevel::Debug, json!("hidden"));
        logger.warning("shown");
        let msg = rx.try_recv().unwrap();
        assert_eq!(msg["params"]["level"], "warning");
        assert_eq!(msg["params"]["data"], "shown");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_delivery_without_receivers_is_silent() {
        let (tx, rx) = broadcast::channel(1);
        drop(rx);
        let logger = ClientLogger::new(NotificationSink::Broadcast(tx));
        logger.info("nobody listening");
    }
}
