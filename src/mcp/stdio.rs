//! Stdio transport: one session with the launching process.
//!
//! Reads newline-delimited JSON-RPC frames from stdin and writes responses
//! and server notifications to stdout through a single writer task, so
//! nothing else ever touches the protocol stream.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::auth::TenantContext;
use crate::errors::Result;

use super::server::McpServer;
use super::tools::ToolContext;
use super::transport::{ErrorCode, IncomingPayload, JsonRpcResponse, NotificationSink};

const OUTBOUND_CAPACITY: usize = 256;

/// Serves MCP on the process's stdin and stdout until stdin closes.
pub async fn run(ctx: Arc<ToolContext>) -> Result<()> {
    serve(ctx, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}

/// Serves one session over arbitrary streams.
pub async fn serve<R, W>(ctx: Arc<ToolContext>, reader: R, writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Value>(OUTBOUND_CAPACITY);
    let writer_task = tokio::spawn(write_frames(rx, writer));

    let engine = McpServer::new(ctx, NotificationSink::Channel(tx.clone()));
    let tenant = TenantContext::none();
    let mut lines = reader.lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "failed to read from stdin");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let outgoing = match IncomingPayload::parse(line.as_bytes()) {
            Ok(payload) => handle_payload(&engine, payload, &tenant).await,
            Err(e) => Some(to_value(&JsonRpcResponse::error(
                Value::Null,
                ErrorCode::ParseError,
                format!("failed to parse JSON-RPC message: {}", e),
            ))),
        };

        if let Some(message) = outgoing {
            if tx.send(message).await.is_err() {
                tracing::warn!("stdout writer stopped; ending session");
                break;
            }
        }
    }

    engine.close();
    tracing::info!("stdin closed, session ended");
    drop(engine);
    drop(tx);

    match writer_task.await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(error = %e, "stdout writer task failed");
            Ok(())
        }
    }
}

async fn handle_payload(
    engine: &McpServer,
    payload: IncomingPayload,
    tenant: &TenantContext,
) -> Option<Value> {
    let batch = payload.is_batch();
    let mut responses = Vec::new();
    for message in payload.into_messages() {
        if let Some(response) = engine.handle_message(message, tenant).await {
            responses.push(response);
        }
    }

    match (batch, responses.len()) {
        (_, 0) => None,
        (false, _) => responses.first().map(to_value),
        (true, _) => serde_json::to_value(&responses).ok(),
    }
}

fn to_value(response: &JsonRpcResponse) -> Value {
    serde_json::to_value(response).unwrap_or(Value::Null)
}

/// Owns the output stream: one JSON document per line.
async fn write_frames<W>(mut rx: mpsc::Receiver<Value>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let mut line = serde_json::to_string(&message)?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}
