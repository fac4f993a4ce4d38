use thiserror::Error;

/// Errors that can occur anywhere in the gateway.
///
/// The set is closed: every failure a tool handler or transport can observe
/// is one of these variants, so classification ([`GatewayError::kind`]) and
/// client-facing rendering ([`crate::sanitize::to_safe_result`]) are
/// exhaustive matches.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("connection error: {message}")]
    Connection { message: String },

    #[error("{message}")]
    Validation { message: String },

    #[error("operation error: {message}")]
    Operation { message: String },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("{component} is not initialized")]
    NotInitialized { component: String },

    #[error("authentication failed: {message}")]
    Auth { message: String },

    #[error("config error: {message}")]
    Config { message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification of a [`GatewayError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The backend is unreachable or the cached link died.
    Connection,
    /// The caller supplied missing or malformed input.
    Validation,
    /// The backend rejected a well-formed request.
    Operation,
    /// Anything else; treated as a programmer error.
    Unknown,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Validation => "validation",
            Self::Operation => "operation",
            Self::Unknown => "unknown",
        }
    }
}

impl GatewayError {
    /// Shorthand for a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Shorthand for an operation error.
    pub fn operation(message: impl Into<String>) -> Self {
        Self::Operation {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection { .. } | Self::Timeout { .. } => ErrorKind::Connection,
            Self::Validation { .. } | Self::NotInitialized { .. } | Self::Auth { .. } => {
                ErrorKind::Validation
            }
            Self::Operation { .. } => ErrorKind::Operation,
            Self::Config { .. } | Self::Io(_) | Self::Json(_) => ErrorKind::Unknown,
        }
    }

    /// Returns `true` for failures the process can keep running after.
    ///
    /// Unknown-kind errors that reach the top level terminate the process.
    pub fn is_operational(&self) -> bool {
        self.kind() != ErrorKind::Unknown
    }

    /// Returns `true` when the failure means the cached backend link is dead.
    pub fn is_connection(&self) -> bool {
        self.kind() == ErrorKind::Connection
    }

    /// The message a client may see verbatim, if this variant's text is
    /// composed entirely by the gateway.
    ///
    /// Variants wrapping foreign text (backend replies, I/O errors) return
    /// `None` and must go through the sanitizer instead.
    pub fn client_message(&self) -> Option<String> {
        match self {
            Self::Validation { message } => Some(message.clone()),
            Self::Timeout { .. } | Self::NotInitialized { .. } => Some(self.to_string()),
            Self::Auth { .. } => Some("authentication failed".to_string()),
            Self::Connection { .. }
            | Self::Operation { .. }
            | Self::Config { .. }
            | Self::Io(_)
            | Self::Json(_) => None,
        }
    }
}

/// Convenience alias for results using `GatewayError`.
pub type Result<T> = std::result::Result<T, GatewayError>;
