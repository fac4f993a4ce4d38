use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{GatewayError, Result};

/// Name of the configuration file looked up in the user config directory.
pub const CONFIG_FILENAME: &str = "config.toml";

/// Directory (under the platform config dir) holding gateway configuration.
pub const CONFIG_DIR: &str = "graphgate";

/// Which transport the gateway speaks MCP over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    #[default]
    Stdio,
    Http,
}

/// How tenant identity is established for HTTP requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    /// Static bearer API key; carries no tenant identity.
    #[default]
    ApiKey,
    /// Bearer JWT whose `sub` claim names the tenant.
    Jwt,
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    /// Path the MCP endpoint is mounted at.
    pub base_path: String,
    /// When set, every request must carry `Authorization: Bearer <api_key>`.
    pub api_key: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            base_path: "/mcp".to_string(),
            api_key: None,
        }
    }
}

/// Graph engine and key/value store connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// `redis://[user:pass@]host:port` of the auxiliary key/value store.
    /// Defaults to the graph engine's own endpoint.
    pub store_url: Option<String>,
    pub connect_timeout_ms: u64,
    pub operation_timeout_ms: u64,
    pub max_connect_attempts: u32,
    pub backoff_base_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            username: None,
            password: None,
            store_url: None,
            connect_timeout_ms: 5_000,
            operation_timeout_ms: 30_000,
            max_connect_attempts: 5,
            backoff_base_ms: 200,
        }
    }
}

/// Multi-tenancy and token verification settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenancyConfig {
    pub multi_tenancy: bool,
    /// Prefix physical graph and key names with the tenant identifier.
    pub prefix_graph_names: bool,
    pub auth_mode: AuthMode,
    /// HMAC secret for HS256 tokens.
    pub jwt_secret: Option<String>,
    /// JWKS endpoint for asymmetric tokens; fetched once at startup.
    pub jwks_url: Option<String>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            multi_tenancy: false,
            prefix_graph_names: true,
            auth_mode: AuthMode::ApiKey,
            jwt_secret: None,
            jwks_url: None,
            issuer: None,
            audience: None,
        }
    }
}

/// Behavioural switches of the MCP surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// `query_graph` runs read-only unless the caller asks otherwise.
    pub default_readonly: bool,
    /// Refuse every write, regardless of what the caller asks.
    pub strict_readonly: bool,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            default_readonly: false,
            strict_readonly: false,
            log_level: "info".to_string(),
        }
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub transport: TransportMode,
    pub http: HttpConfig,
    pub backend: BackendConfig,
    pub tenancy: TenancyConfig,
    pub server: ServerConfig,
}

impl GatewayConfig {
    /// Checks cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.transport == TransportMode::Http && self.http.port == 0 {
            return Err(GatewayError::Config {
                message: "http.port must be non-zero in http mode".to_string(),
            });
        }
        if !self.http.base_path.starts_with('/') {
            return Err(GatewayError::Config {
                message: format!("http.base_path '{}' must start with '/'", self.http.base_path),
            });
        }
        if self.tenancy.auth_mode == AuthMode::Jwt
            && self.tenancy.jwt_secret.is_none()
            && self.tenancy.jwks_url.is_none()
        {
            return Err(GatewayError::Config {
                message: "jwt auth mode needs tenancy.jwt_secret or tenancy.jwks_url".to_string(),
            });
        }
        if self.transport == TransportMode::Stdio
            && self.tenancy.multi_tenancy
            && self.tenancy.auth_mode == AuthMode::Jwt
        {
            return Err(GatewayError::Config {
                message: "jwt multi-tenancy requires the http transport".to_string(),
            });
        }
        if self.backend.max_connect_attempts == 0 {
            return Err(GatewayError::Config {
                message: "backend.max_connect_attempts must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Returns `redis://host:port` style address of the key/value store.
    pub fn store_url(&self) -> String {
        self.backend
            .store_url
            .clone()
            .unwrap_or_else(|| format!("redis://{}:{}", self.backend.host, self.backend.port))
    }

    /// Returns a copy with every secret replaced by `"***"`, for display.
    pub fn masked(&self) -> Self {
        let mask = |v: &Option<String>| v.as_ref().map(|_| "***".to_string());
        let mut copy = self.clone();
        copy.http.api_key = mask(&self.http.api_key);
        copy.backend.password = mask(&self.backend.password);
        copy.backend.store_url = self
            .backend
            .store_url
            .as_deref()
            .map(crate::sanitize::sanitize_message);
        copy.tenancy.jwt_secret = mask(&self.tenancy.jwt_secret);
        copy
    }
}

/// Returns the default configuration file location, if the platform has one.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILENAME))
}

/// Loads the configuration from a TOML file.
///
/// A missing file yields the default configuration.
pub fn load_config(path: &Path) -> Result<GatewayConfig> {
    if !path.exists() {
        return Ok(GatewayConfig::default());
    }

    let contents = fs::read_to_string(path).map_err(|e| GatewayError::Config {
        message: format!("failed to read config file '{}': {}", path.display(), e),
    })?;

    toml::from_str(&contents).map_err(|e| GatewayError::Config {
        message: format!("failed to parse config file '{}': {}", path.display(), e),
    })
}

/// Serializes the configuration as TOML.
pub fn to_toml(config: &GatewayConfig) -> Result<String> {
    toml::to_string_pretty(config).map_err(|e| GatewayError::Config {
        message: format!("failed to serialize config: {}", e),
    })
}
