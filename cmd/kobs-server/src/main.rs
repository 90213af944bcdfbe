use anyhow::Context;
use clap::{Parser, ValueEnum};
use pkg_api::AppState;
use pkg_api::plugins::PluginRegistry;
use pkg_api::server::{ServerConfig, start_server};
use pkg_auth::{AuthResolver, SessionSigner};
use pkg_cluster::Clusters;
use pkg_constants::paths::DEFAULT_SERVER_CONFIG;
use pkg_constants::server::{DEFAULT_ADDRESS, DEFAULT_SHUTDOWN_DEADLINE_SECS};
use pkg_fleet::{Fleet, Policy};
use pkg_topology::TopologyEngine;
use pkg_types::config::{ServerConfigFile, load_config_file};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "kobs-server", about = "kobs multi-cluster dashboard server")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, env = "KOBS_CONFIG", default_value = DEFAULT_SERVER_CONFIG)]
    config: String,

    /// Address to listen on, e.g. 0.0.0.0:15220
    #[arg(long, env = "KOBS_ADDRESS")]
    address: Option<String>,

    /// Enable authentication via the auth proxy headers
    #[arg(long, env = "KOBS_AUTH_ENABLED")]
    auth_enabled: Option<bool>,

    /// Secret used to sign session cookies
    #[arg(long, env = "KOBS_AUTH_SECRET", hide_env_values = true)]
    auth_secret: Option<String>,

    /// Seconds in-flight requests may drain after SIGINT/SIGTERM
    #[arg(long, env = "KOBS_SHUTDOWN_DEADLINE")]
    shutdown_deadline: Option<u64>,

    /// Log output format
    #[arg(long, env = "KOBS_LOG_FORMAT", value_enum, default_value_t = LogFormat::Plain)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Plain,
    Json,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Plain => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    // Load config file (returns defaults if file not found)
    let mut file_cfg: ServerConfigFile = load_config_file(&cli.config)?;
    info!("Config file: {}", cli.config);

    // Merge: CLI args / env > config file > defaults
    let address = cli
        .address
        .or(file_cfg.address.take())
        .unwrap_or_else(|| DEFAULT_ADDRESS.to_string());
    let shutdown_deadline = cli
        .shutdown_deadline
        .or(file_cfg.shutdown_deadline)
        .unwrap_or(DEFAULT_SHUTDOWN_DEADLINE_SECS);
    if let Some(enabled) = cli.auth_enabled {
        file_cfg.auth.enabled = enabled;
    }
    if cli.auth_secret.is_some() {
        file_cfg.auth.secret = cli.auth_secret;
    }
    file_cfg.validate()?;
    let addr: SocketAddr = address
        .parse()
        .with_context(|| format!("invalid listen address {address}"))?;

    let clusters = Clusters::load(&file_cfg.clusters.providers).await?;
    info!("Starting kobs-server");
    info!("  Address:   {}", addr);
    info!("  Clusters:  {}", clusters.names().join(", "));
    info!("  Auth:      {}", file_cfg.auth.enabled);
    info!("  Plugins:   {}", file_cfg.plugins.len());

    let fleet = Fleet::new(clusters, Policy::from(&file_cfg.aggregator));
    let signer = match &file_cfg.auth.secret {
        Some(secret) => SessionSigner::new(secret.as_bytes()),
        None => {
            if file_cfg.auth.enabled {
                warn!("No session secret configured, sessions will not survive a restart");
            }
            SessionSigner::random()?
        }
    };
    let plugins = PluginRegistry::new().build(&file_cfg.plugins, &fleet)?;

    let state = AppState {
        topology: TopologyEngine::new(fleet.clone(), &file_cfg.cache),
        auth: AuthResolver::new(&file_cfg.auth, signer, fleet.clone()),
        plugins: Arc::new(plugins),
        fleet,
        namespaces_ttl: Duration::from_secs(file_cfg.cache.namespaces),
    };

    let config = ServerConfig {
        addr,
        shutdown_deadline: Duration::from_secs(shutdown_deadline),
    };
    start_server(config, state, shutdown_signal()).await?;

    info!("kobs-server stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
