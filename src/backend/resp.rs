use futures::future::BoxFuture;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::errors::{GatewayError, Result};

/// A decoded RESP2 reply.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    Simple(String),
    Error(String),
    Integer(i64),
    /// `None` is the null bulk string (`$-1`).
    Bulk(Option<Vec<u8>>),
    /// `None` is the null array (`*-1`).
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// Returns the value as text if it is a simple or bulk string.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Simple(s) => Some(s.clone()),
            Self::Bulk(Some(bytes)) => Some(String::from_utf8_lossy(bytes).into_owned()),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Vec<RespValue>> {
        match self {
            Self::Array(Some(items)) => Some(items),
            _ => None,
        }
    }

    /// Converts the reply into JSON. Error replies become strings.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Simple(s) | Self::Error(s) => Value::String(s.clone()),
            Self::Integer(i) => Value::from(*i),
            Self::Bulk(Some(bytes)) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
            Self::Bulk(None) | Self::Array(None) => Value::Null,
            Self::Array(Some(items)) => Value::Array(items.iter().map(Self::to_json).collect()),
        }
    }
}

/// Encodes a command as a RESP array of bulk strings.
pub fn encode_command(args: &[&str]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", args.len()).into_bytes();
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

fn protocol_error(message: impl Into<String>) -> GatewayError {
    GatewayError::connection(format!("protocol error: {}", message.into()))
}

async fn read_line<R: AsyncBufRead + Unpin + Send>(reader: &mut R) -> Result<String> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await.map_err(io_error)?;
    if n == 0 {
        return Err(GatewayError::connection("connection closed by server"));
    }
    if !line.ends_with("\r\n") {
        return Err(protocol_error("unterminated line"));
    }
    line.truncate(line.len() - 2);
    Ok(line)
}

fn io_error(e: std::io::Error) -> GatewayError {
    GatewayError::connection(e.to_string())
}

fn parse_len(s: &str) -> Result<i64> {
    s.parse::<i64>()
        .map_err(|_| protocol_error(format!("invalid length '{s}'")))
}

/// Reads one complete reply.
///
/// Any framing problem is reported as a connection-class error: the stream
/// position is unknown afterwards, so the link must not be reused.
pub fn read_value<'a, R>(reader: &'a mut R) -> BoxFuture<'a, Result<RespValue>>
where
    R: AsyncBufRead + Unpin + Send + 'a,
{
    Box::pin(async move {
        let line = read_line(reader).await?;
        let mut chars = line.chars();
        let tag = chars.next();
        let rest = chars.as_str();
        match tag {
            Some('+') => Ok(RespValue::Simple(rest.to_string())),
            Some('-') => Ok(RespValue::Error(rest.to_string())),
            Some(':') => Ok(RespValue::Integer(parse_len(rest)?)),
            Some('$') => {
                let len = parse_len(rest)?;
                if len < 0 {
                    return Ok(RespValue::Bulk(None));
                }
                let mut buf = vec![0u8; len as usize + 2];
                reader.read_exact(&mut buf).await.map_err(io_error)?;
                if !buf.ends_with(b"\r\n") {
                    return Err(protocol_error("bulk string not terminated"));
                }
                buf.truncate(len as usize);
                Ok(RespValue::Bulk(Some(buf)))
            }
            Some('*') => {
                let len = parse_len(rest)?;
                if len < 0 {
                    return Ok(RespValue::Array(None));
                }
                let mut items = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    items.push(read_value(reader).await?);
                }
                Ok(RespValue::Array(Some(items)))
            }
            other => Err(protocol_error(format!("unexpected reply type {other:?}"))),
        }
    })
}
