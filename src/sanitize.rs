//! Redaction boundary between internal failures and MCP clients.
//!
//! Every tool failure passes through [`to_safe_result`] before it is
//! serialized. The redaction passes in [`sanitize_message`] run in a fixed
//! order; later passes rely on earlier ones having already rewritten the
//! text (e.g. the plain-URI pass must never see a credentialed URI).

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Value};

use crate::errors::GatewayError;

/// Substituted when redaction leaves nothing behind.
pub const GENERIC_MESSAGE: &str = "An error occurred";

/// Substituted for failures that are not errors at all (e.g. panic payloads).
pub const UNEXPECTED_MESSAGE: &str = "An unexpected error occurred";

const URI_SCHEMES: &str =
    "redis|rediss|falkor|falkors|bolt|neo4j|http|https|mongodb|postgres|postgresql|mysql";

static STACK_FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:at\s|\d+:\s+[\w<][\w<>:]*::|stack backtrace:)").expect("valid regex")
});

static CREDENTIAL_URI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b({URI_SCHEMES})://[^\s<]*@[^\s/,;'\x22)]+"
    ))
    .expect("valid regex")
});

static PLAIN_URI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b({URI_SCHEMES})://[^\s/<,;'\x22)][^\s/,;'\x22)]*"
    ))
    .expect("valid regex")
});

static SECRET_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(password|token|api[_-]key)=[^\s&,;]+").expect("valid regex")
});

static IPV4_PORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}:\d+\b").expect("valid regex")
});

static LOCALHOST_PORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(localhost):\d+\b").expect("valid regex"));

// A lone `:/` starts a path (`ENOENT:/etc/x`); `://` is a URI.
static POSIX_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(^|[\s'"(\[=:])/[^\s'",;)\]/][^\s'",;)\]]*"#).expect("valid regex")
});

static DRIVE_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\b[A-Za-z]:[\\/][^\s'",;)]*"#).expect("valid regex"));

/// A client-safe tool failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeResult {
    pub text: String,
    pub is_error: bool,
}

impl SafeResult {
    fn error(text: String) -> Self {
        let text = if text.trim().is_empty() {
            GENERIC_MESSAGE.to_string()
        } else {
            text
        };
        Self {
            text,
            is_error: true,
        }
    }

    /// Renders the failure as an MCP `tools/call` result.
    pub fn into_tool_result(self) -> Value {
        json!({
            "content": [{ "type": "text", "text": self.text }],
            "isError": self.is_error,
        })
    }
}

/// Redacts credentials, topology and stack frames from a message.
pub fn sanitize_message(message: &str) -> String {
    let without_frames = message
        .lines()
        .filter(|line| !STACK_FRAME.is_match(line))
        .collect::<Vec<_>>()
        .join("\n");

    let s = CREDENTIAL_URI.replace_all(&without_frames, "$1://<credentials>@<host>");
    let s = PLAIN_URI.replace_all(&s, "$1://<host>");
    let s = SECRET_FIELD.replace_all(&s, "$1=<redacted>");
    let s = IPV4_PORT.replace_all(&s, "<host>:<port>");
    let s = LOCALHOST_PORT.replace_all(&s, "$1:<port>");
    let s = DRIVE_PATH.replace_all(&s, "<path>");
    let s = POSIX_PATH.replace_all(&s, "${1}<path>");

    let trimmed = s.trim();
    if trimmed.is_empty() {
        GENERIC_MESSAGE.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Converts any error into a client-safe result.
///
/// Gateway errors whose text the gateway composed itself are passed through
/// verbatim; everything else is sanitized.
pub fn to_safe_result(error: &(dyn std::error::Error + 'static)) -> SafeResult {
    if let Some(message) = error
        .downcast_ref::<GatewayError>()
        .and_then(GatewayError::client_message)
    {
        return SafeResult::error(message);
    }
    SafeResult::error(sanitize_message(&error.to_string()))
}

/// The result reported for failures that carry no error value.
pub fn opaque_failure() -> SafeResult {
    SafeResult::error(UNEXPECTED_MESSAGE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_js_and_rust_frames() {
        let msg = "boom\n    at Object.run (file.js:1:1)\n   3: graphgate::backend::run\nafter";
        assert_eq!(sanitize_message(msg), "boom\nafter");
    }

    #[test]
    fn test_credentials_before_plain_uri() {
        let out = sanitize_message("cannot reach falkor://bob:pw@db.internal:6379/0");
        assert_eq!(out, "cannot reach falkor://<credentials>@<host>/0");
    }

    #[test]
    fn test_empty_after_redaction() {
        assert_eq!(sanitize_message("   at foo (bar.js:1:1)"), GENERIC_MESSAGE);
    }

    #[test]
    fn test_tool_result_shape() {
        let value = opaque_failure().into_tool_result();
        assert_eq!(value["isError"], true);
        assert_eq!(value["content"][0]["text"], UNEXPECTED_MESSAGE);
    }
}
