use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::builder::BoolishValueParser;
use clap::{Args, Parser, Subcommand};

use graphgate::auth::{build_verifier, Authenticator};
use graphgate::backend::{
    ConnectSettings, FalkorBackend, GraphBackend, KeyValueStore, RedisStore, RespClient,
    RespEndpoint,
};
use graphgate::config::{self, AuthMode, GatewayConfig, TransportMode};
use graphgate::errors::{GatewayError, Result};
use graphgate::logging;
use graphgate::mcp::{self, SessionManager, ToolContext};

/// MCP gateway for FalkorDB graphs.
#[derive(Parser)]
#[command(name = "graphgate", version, about = "MCP gateway for FalkorDB graphs")]
struct Cli {
    /// Configuration file (default: <config dir>/graphgate/config.toml)
    #[arg(short, long, global = true, env = "GRAPHGATE_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve MCP over stdio or HTTP
    Serve,
    /// Connect to the backend once and report its health
    Check,
    /// Print the effective configuration with secrets masked
    Config,
}

/// Settings that override the configuration file.
#[derive(Args)]
struct Overrides {
    #[arg(long, global = true, env = "MCP_TRANSPORT", value_enum)]
    transport: Option<TransportMode>,
    #[arg(long, global = true, env = "MCP_PORT")]
    port: Option<u16>,
    #[arg(long, global = true, env = "MCP_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    #[arg(long, global = true, env = "FALKORDB_HOST")]
    falkordb_host: Option<String>,
    #[arg(long, global = true, env = "FALKORDB_PORT")]
    falkordb_port: Option<u16>,
    #[arg(long, global = true, env = "FALKORDB_USERNAME")]
    falkordb_username: Option<String>,
    #[arg(long, global = true, env = "FALKORDB_PASSWORD", hide_env_values = true)]
    falkordb_password: Option<String>,
    #[arg(long, global = true, env = "REDIS_URL", hide_env_values = true)]
    redis_url: Option<String>,
    #[arg(long, global = true, env = "ENABLE_MULTI_TENANCY", value_parser = BoolishValueParser::new())]
    multi_tenancy: Option<bool>,
    #[arg(long, global = true, env = "MULTI_TENANT_AUTH_MODE", value_enum)]
    auth_mode: Option<AuthMode>,
    #[arg(long, global = true, env = "JWT_SECRET", hide_env_values = true)]
    jwt_secret: Option<String>,
    #[arg(long, global = true, env = "OAUTH2_JWKS_URL")]
    jwks_url: Option<String>,
    #[arg(long, global = true, env = "OAUTH2_ISSUER")]
    issuer: Option<String>,
    #[arg(long, global = true, env = "OAUTH2_AUDIENCE")]
    audience: Option<String>,
    #[arg(long, global = true, env = "TENANT_GRAPH_PREFIX", value_parser = BoolishValueParser::new())]
    prefix_graph_names: Option<bool>,
    #[arg(long, global = true, env = "FALKORDB_DEFAULT_READONLY", value_parser = BoolishValueParser::new())]
    default_readonly: Option<bool>,
    #[arg(long, global = true, env = "FALKORDB_STRICT_READONLY", value_parser = BoolishValueParser::new())]
    strict_readonly: Option<bool>,
    #[arg(long, global = true, env = "LOG_LEVEL")]
    log_level: Option<String>,
}

impl Overrides {
    fn apply(self, config: &mut GatewayConfig) {
        fn set<T>(slot: &mut T, value: Option<T>) {
            if let Some(value) = value {
                *slot = value;
            }
        }
        fn set_opt<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        set(&mut config.transport, self.transport);
        set(&mut config.http.port, self.port);
        set_opt(&mut config.http.api_key, self.api_key);
        set(&mut config.backend.host, self.falkordb_host);
        set(&mut config.backend.port, self.falkordb_port);
        set_opt(&mut config.backend.username, self.falkordb_username);
        set_opt(&mut config.backend.password, self.falkordb_password);
        set_opt(&mut config.backend.store_url, self.redis_url);
        set(&mut config.tenancy.multi_tenancy, self.multi_tenancy);
        set(&mut config.tenancy.auth_mode, self.auth_mode);
        set_opt(&mut config.tenancy.jwt_secret, self.jwt_secret);
        set_opt(&mut config.tenancy.jwks_url, self.jwks_url);
        set_opt(&mut config.tenancy.issuer, self.issuer);
        set_opt(&mut config.tenancy.audience, self.audience);
        set(&mut config.tenancy.prefix_graph_names, self.prefix_graph_names);
        set(&mut config.server.default_readonly, self.default_readonly);
        set(&mut config.server.strict_readonly, self.strict_readonly);
        set(&mut config.server.log_level, self.log_level);
    }
}

fn main() {
    let cli = Cli::parse();

    let config = match load(cli.config.clone(), cli.overrides) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    logging::init(config.transport, &config.server.log_level);
    std::panic::set_hook(Box::new(|info| {
        tracing::error!(panic = %info, "unhandled panic");
    }));

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(cli.command, config)) {
        tracing::error!(
            kind = e.kind().as_str(),
            operational = e.is_operational(),
            error = %e,
            "fatal error"
        );
        process::exit(1);
    }
}

fn load(path: Option<PathBuf>, overrides: Overrides) -> Result<GatewayConfig> {
    let mut config = match path.or_else(config::default_config_path) {
        Some(path) => config::load_config(&path)?,
        None => GatewayConfig::default(),
    };
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

async fn run(command: Commands, config: GatewayConfig) -> Result<()> {
    match command {
        Commands::Config => {
            println!("{}", config::to_toml(&config.masked())?);
            Ok(())
        }
        Commands::Check => check(&config).await,
        Commands::Serve => serve(config).await,
    }
}

fn build_backends(config: &GatewayConfig) -> Result<(Arc<FalkorBackend>, Arc<RedisStore>)> {
    let settings = ConnectSettings::from_config(&config.backend);
    let graph = FalkorBackend::new(RespClient::new(
        "graph",
        RespEndpoint::from_config(&config.backend),
        settings,
    ));
    let store = RedisStore::new(RespClient::new(
        "store",
        RespEndpoint::parse_url(&config.store_url())?,
        settings,
    ));
    Ok((Arc::new(graph), Arc::new(store)))
}

async fn check(config: &GatewayConfig) -> Result<()> {
    let (graph, _) = build_backends(config)?;
    graph.initialize().await?;
    let health = graph.health_check().await;
    let graphs = graph.list_graphs().await?;
    println!(
        "Backend {}:{} reachable ({} ms), {} graph(s)",
        config.backend.host,
        config.backend.port,
        health.latency_ms.unwrap_or_default(),
        graphs.len()
    );
    graph.close().await;
    Ok(())
}

async fn serve(config: GatewayConfig) -> Result<()> {
    let (graph, store) = build_backends(&config)?;
    graph.initialize().await?;
    if let Err(e) = store.initialize().await {
        // Key tools report the store as not initialized until restart.
        tracing::warn!(error = %e, "key/value store unavailable");
    }

    let ctx = Arc::new(ToolContext::new(
        &config,
        Arc::clone(&graph) as Arc<dyn GraphBackend>,
        Arc::clone(&store) as Arc<dyn KeyValueStore>,
    ));

    let result = match config.transport {
        TransportMode::Stdio => {
            tracing::info!("serving MCP over stdio");
            tokio::select! {
                result = mcp::stdio::run(ctx) => result,
                _ = shutdown_signal() => Ok(()),
            }
        }
        TransportMode::Http => serve_http(&config, ctx).await,
    };

    graph.close().await;
    store.close().await;
    tracing::info!("shutdown complete");
    result
}

async fn serve_http(config: &GatewayConfig, ctx: Arc<ToolContext>) -> Result<()> {
    let verifier = if config.tenancy.auth_mode == AuthMode::Jwt {
        build_verifier(&config.tenancy).await?
    } else {
        None
    };
    let authenticator = Authenticator::from_config(config, verifier);
    if matches!(authenticator, Authenticator::Disabled) {
        tracing::warn!("no API key configured; HTTP endpoint is unauthenticated");
    }

    let manager = Arc::new(SessionManager::new(authenticator, ctx));
    let app = mcp::router(Arc::clone(&manager), &config.http.base_path);

    let addr = format!("{}:{}", config.http.host, config.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| GatewayError::Config {
            message: format!("failed to bind {}: {}", addr, e),
        })?;
    tracing::info!(addr = %addr, path = %config.http.base_path, "serving MCP over HTTP");

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    manager.close_all();
    result.map_err(GatewayError::from)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
